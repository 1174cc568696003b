// Driver Registry
// Maps each database type to the driver that serves it

use crate::db::drivers::{MssqlDriver, PostgresDriver, SqliteDriver};
use crate::db::traits::{DatabaseDriver, DatabaseError, DatabaseType};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Registry for managing database drivers
pub struct DriverRegistry {
    drivers: RwLock<HashMap<DatabaseType, Arc<dyn DatabaseDriver>>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the SQL Server, PostgreSQL and SQLite drivers
    pub async fn with_builtin_drivers() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(MssqlDriver::new())).await;
        registry.register(Arc::new(PostgresDriver::new())).await;
        registry.register(Arc::new(SqliteDriver::new())).await;
        registry
    }

    /// Register a database driver, replacing any previous one for the same type
    pub async fn register(&self, driver: Arc<dyn DatabaseDriver>) {
        let db_type = driver.database_type();
        let mut drivers = self.drivers.write().await;
        drivers.insert(db_type, driver);
        debug!("registered driver for {:?}", db_type);
    }

    /// Get a driver by database type
    pub async fn get_driver(
        &self,
        db_type: DatabaseType,
    ) -> Result<Arc<dyn DatabaseDriver>, DatabaseError> {
        let drivers = self.drivers.read().await;
        drivers
            .get(&db_type)
            .cloned()
            .ok_or(DatabaseError::DriverNotFound(db_type))
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
