use clap::Parser;
use sqltab::cli::Args;
use sqltab::{commands, logging};
use std::io::{BufWriter, Write};
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init_logging(args.verbose);

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let result = commands::execute(&args, &mut out).await;
    let flushed = out.flush();

    match result.map_err(|e| e.to_string()).and(flushed.map_err(|e| e.to_string())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
