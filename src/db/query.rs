// Script Execution
// Splits SQL scripts into statements and runs them one at a time through a driver

use crate::db::traits::{CellValue, Connection, DatabaseDriver, DatabaseError, DatabaseType, StatementOutcome};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Result of one executed statement
#[derive(Debug)]
pub struct StatementReport {
    /// Zero-based position of the statement in its script
    pub index: usize,
    pub statement: String,
    pub outcome: StatementOutcome,
    pub execution_time_ms: u64,
}

/// Runs statements against one connection through a driver
pub struct QueryEngine {
    driver: Arc<dyn DatabaseDriver>,
}

impl QueryEngine {
    pub fn new(driver: Arc<dyn DatabaseDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<dyn DatabaseDriver> {
        &self.driver
    }

    /// Split a script using the driver's dialect
    pub fn split(&self, sql: &str) -> Vec<String> {
        split_statements(sql, self.driver.database_type())
    }

    /// Execute a single statement with positional parameters
    pub async fn execute(
        &self,
        conn: &dyn Connection,
        sql: &str,
        params: &[CellValue],
    ) -> Result<StatementReport, DatabaseError> {
        self.execute_statement(conn, 0, sql, params).await
    }

    async fn execute_statement(
        &self,
        conn: &dyn Connection,
        index: usize,
        sql: &str,
        params: &[CellValue],
    ) -> Result<StatementReport, DatabaseError> {
        debug!(statement = index + 1, params = params.len(), "executing: {}", sql);
        let start = Instant::now();

        let outcome = self.driver.execute(conn, sql, params).await?;
        let execution_time_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            StatementOutcome::Rows(rows) => {
                debug!(statement = index + 1, rows = rows.len(), "fetched in {} ms", execution_time_ms)
            }
            StatementOutcome::RowSets(sets) => {
                debug!(statement = index + 1, sets = sets.len(), "fetched in {} ms", execution_time_ms)
            }
            StatementOutcome::RowCount(count) => {
                info!("({} row{} affected)", count, if *count == 1 { "" } else { "s" })
            }
        }

        Ok(StatementReport {
            index,
            statement: sql.to_string(),
            outcome,
            execution_time_ms,
        })
    }

    /// Execute every statement of a script in order, handing each report to `on_report`.
    ///
    /// Stops at the first failing statement or callback. Returns the number of statements run.
    pub async fn run_script<E, F>(
        &self,
        conn: &dyn Connection,
        sql: &str,
        mut on_report: F,
    ) -> Result<usize, E>
    where
        E: From<DatabaseError>,
        F: FnMut(StatementReport) -> Result<(), E>,
    {
        let statements = self.split(sql);
        debug!("script contains {} statement(s)", statements.len());

        for (index, statement) in statements.iter().enumerate() {
            let report = self.execute_statement(conn, index, statement, &[]).await?;
            on_report(report)?;
        }

        Ok(statements.len())
    }
}

/// Split SQL text into individual statements.
///
/// Splits on `;` and on lines consisting only of `GO` (any case). Separators inside
/// quoted strings, quoted identifiers, comments and (PostgreSQL) dollar-quoted bodies
/// are ignored, and fragments containing only comments are dropped.
///
/// For SQL Server, a batch starting with `DECLARE` or `SET` is kept whole so variables
/// stay in scope, and a bare procedure name is wrapped as `EXEC name`.
pub fn split_statements(sql: &str, dialect: DatabaseType) -> Vec<String> {
    let mut statements = Vec::new();

    for batch in split_fragments(sql, dialect, false) {
        if dialect == DatabaseType::Mssql && matches!(leading_keyword(&batch).as_str(), "DECLARE" | "SET") {
            statements.push(batch);
            continue;
        }
        for stmt in split_fragments(&batch, dialect, true) {
            if dialect == DatabaseType::Mssql {
                statements.push(auto_wrap_procedure(stmt));
            } else {
                statements.push(stmt);
            }
        }
    }

    statements
}

/// Whether a SQL Server statement produces a result set, judged by its leading keyword
pub fn statement_returns_rows(sql: &str) -> bool {
    match leading_keyword(sql).as_str() {
        "SELECT" => !select_into(sql),
        "WITH" | "EXEC" | "EXECUTE" | "VALUES" => true,
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" => has_word(sql, "OUTPUT"),
        // Batches kept whole may end in a query
        "DECLARE" | "SET" | "IF" | "BEGIN" => has_word(sql, "SELECT"),
        _ => false,
    }
}

/// `SELECT ... INTO new_table` creates a table instead of returning rows
fn select_into(sql: &str) -> bool {
    let words = sql_words(sql);
    let top_level = |word: &str| words.iter().position(|(w, depth)| *depth == 0 && w == word);
    match (top_level("INTO"), top_level("FROM")) {
        (Some(into), Some(from)) => into < from,
        (Some(_), None) => true,
        _ => false,
    }
}

fn has_word(sql: &str, word: &str) -> bool {
    sql_words(sql).iter().any(|(w, _)| w.eq_ignore_ascii_case(word))
}

/// Upper-cased keywords and identifiers with their parenthesis depth.
/// String literals, quoted identifiers and comments are skipped.
fn sql_words(sql: &str) -> Vec<(String, usize)> {
    let mut words = Vec::new();
    let mut depth = 0usize;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                // A doubled quote is an escaped quote inside the literal
                while let Some(q) = chars.next() {
                    if q == c {
                        if chars.peek() == Some(&c) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            '[' => {
                for q in chars.by_ref() {
                    if q == ']' {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for q in chars.by_ref() {
                    if q == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for q in chars.by_ref() {
                    if prev == '*' && q == '/' {
                        break;
                    }
                    prev = q;
                }
            }
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c.is_alphanumeric() || c == '_' || c == '@' || c == '#' => {
                let mut word = String::from(c);
                while let Some(&n) = chars.peek() {
                    if n.is_alphanumeric() || n == '_' || n == '@' || n == '#' || n == '$' {
                        word.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                words.push((word.to_uppercase(), depth));
            }
            _ => {}
        }
    }
    words
}

/// First keyword of a statement, upper-cased, skipping whitespace, comments and parentheses
pub fn leading_keyword(sql: &str) -> String {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, r)| r).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, r)| r).unwrap_or("");
        } else {
            break;
        }
    }
    rest.chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_uppercase()
}

/// Auto-wrap procedure calls without EXEC keyword.
/// A statement that looks like a bare procedure name (e.g. `sp_who2`, `dbo.sp_who2`)
/// is wrapped with EXEC, the way interactive SQL Server tools accept it.
pub fn auto_wrap_procedure(stmt: String) -> String {
    let trimmed = stmt.trim().trim_end_matches(';').trim_end();

    // If it starts with any of these keywords, it's not a bare procedure call
    let reserved_keywords = [
        "EXEC", "EXECUTE", "SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP",
        "DECLARE", "SET", "IF", "BEGIN", "END", "WHILE", "FOR", "MERGE", "WITH", "UNION", "USE",
        "PRINT", "RETURN", "CAST", "CASE", "TRUNCATE", "GRANT", "REVOKE", "DENY", "COMMIT",
        "ROLLBACK", "SAVE", "RAISERROR", "THROW", "WAITFOR", "BACKUP", "RESTORE", "DBCC", "VALUES",
        "GOTO", "OPEN", "CLOSE", "FETCH", "DEALLOCATE", "BULK", "KILL", "CHECKPOINT", "SHUTDOWN",
    ];

    let first_word = trimmed.split_whitespace().next().unwrap_or("").to_uppercase();
    if first_word.is_empty() || reserved_keywords.iter().any(|&kw| first_word == kw) {
        return stmt;
    }

    let is_likely_procedure = trimmed
        .chars()
        .next()
        .map(|c| c.is_alphabetic() || c == '_' || c == '[')
        .unwrap_or(false);
    if !is_likely_procedure {
        return stmt;
    }

    // Anything with clauses or parentheses is a query or expression, not a call
    let trimmed_upper = trimmed.to_uppercase();
    if trimmed.contains('(')
        || [" WITH", " ORDER BY", " GROUP BY", " WHERE", " FROM", " JOIN", " SET ", "="]
            .iter()
            .any(|kw| trimmed_upper.contains(kw))
    {
        return stmt;
    }

    format!("EXEC {}", stmt.trim())
}

#[derive(Debug, Clone, PartialEq)]
enum ScanState {
    Code,
    SingleQuoted,
    DoubleQuoted,
    BlockComment,
    DollarQuoted(Vec<char>),
}

/// Split on GO lines, and on `;` when `on_semicolon` is set
fn split_fragments(sql: &str, dialect: DatabaseType, on_semicolon: bool) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut state = ScanState::Code;

    for line in sql.lines() {
        if state == ScanState::Code && line.trim().eq_ignore_ascii_case("go") {
            push_fragment(&mut fragments, &mut current);
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let ch = chars[i];
            let next = chars.get(i + 1).copied();

            match state.clone() {
                ScanState::Code => match ch {
                    '\'' => state = ScanState::SingleQuoted,
                    '"' => state = ScanState::DoubleQuoted,
                    '-' if next == Some('-') => {
                        // Line comment runs to the end of the line
                        current.extend(&chars[i..]);
                        break;
                    }
                    '/' if next == Some('*') => {
                        current.push_str("/*");
                        state = ScanState::BlockComment;
                        i += 2;
                        continue;
                    }
                    '$' if dialect == DatabaseType::Postgresql => {
                        if let Some(tag) = dollar_tag(&chars[i..]) {
                            current.extend(&tag);
                            i += tag.len();
                            state = ScanState::DollarQuoted(tag);
                            continue;
                        }
                    }
                    ';' if on_semicolon => {
                        current.push(';');
                        push_fragment(&mut fragments, &mut current);
                        i += 1;
                        continue;
                    }
                    _ => {}
                },
                ScanState::SingleQuoted => {
                    // A doubled quote leaves and re-enters the string
                    if ch == '\'' {
                        state = ScanState::Code;
                    }
                }
                ScanState::DoubleQuoted => {
                    if ch == '"' {
                        state = ScanState::Code;
                    }
                }
                ScanState::BlockComment => {
                    if ch == '*' && next == Some('/') {
                        current.push_str("*/");
                        state = ScanState::Code;
                        i += 2;
                        continue;
                    }
                }
                ScanState::DollarQuoted(tag) => {
                    if chars[i..].starts_with(&tag) {
                        current.extend(&tag);
                        i += tag.len();
                        state = ScanState::Code;
                        continue;
                    }
                }
            }

            current.push(ch);
            i += 1;
        }

        current.push('\n');
    }

    push_fragment(&mut fragments, &mut current);
    fragments
}

/// `$$` or `$tag$` at the start of `chars`; `$1` style placeholders are not tags
fn dollar_tag(chars: &[char]) -> Option<Vec<char>> {
    let body: Vec<char> = chars[1..]
        .iter()
        .take_while(|c| c.is_alphanumeric() || **c == '_')
        .copied()
        .collect();
    if body.first().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        return None;
    }
    if chars.get(body.len() + 1) != Some(&'$') {
        return None;
    }
    Some(chars[..body.len() + 2].to_vec())
}

fn push_fragment(fragments: &mut Vec<String>, current: &mut String) {
    let stmt = current.trim();
    if !is_comment_only(stmt) {
        fragments.push(stmt.to_string());
    }
    current.clear();
}

fn is_comment_only(fragment: &str) -> bool {
    let mut rest = fragment;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ';');
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, r)| r).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, r)| r).unwrap_or("");
        } else {
            return rest.is_empty();
        }
    }
}
