use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use super::{unexpected_response, Connection};
use crate::error::{DriverError, Result};
use crate::protocol::{Request, Response, ServerError, ServerErrorCode};

/// Entry of a database listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        Err(DriverError::MissingDatabaseName)
    } else {
        Ok(())
    }
}

/// Creates, lists and deletes databases on one connection
#[derive(Debug, Clone)]
pub struct DatabaseManager {
    connection: Connection,
}

impl DatabaseManager {
    pub(crate) fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }

    pub async fn create(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let request = Request::CreateDatabase {
            name: name.to_string(),
        };
        match self.connection.inner().call(request).await? {
            Response::Ok => {
                tracing::info!("Created database {}", name);
                Ok(())
            }
            other => Err(unexpected_response("create_database", other)),
        }
    }

    /// Delete a database; sessions this connection holds on it are closed.
    pub async fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let request = Request::DeleteDatabase {
            name: name.to_string(),
        };
        match self.connection.inner().call(request).await? {
            Response::Ok => {
                self.connection.inner().close_sessions_on(name);
                tracing::info!("Deleted database {}", name);
                Ok(())
            }
            other => Err(unexpected_response("delete_database", other)),
        }
    }

    pub async fn contains(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let request = Request::ContainsDatabase {
            name: name.to_string(),
        };
        match self.connection.inner().call(request).await? {
            Response::Bool { value } => Ok(value),
            other => Err(unexpected_response("contains_database", other)),
        }
    }

    pub async fn all(&self) -> Result<Vec<DatabaseInfo>> {
        match self.connection.inner().call(Request::ListDatabases).await? {
            Response::Databases { names } => {
                Ok(names.into_iter().map(|name| DatabaseInfo { name }).collect())
            }
            other => Err(unexpected_response("list_databases", other)),
        }
    }

    /// Handle on an existing database.
    pub async fn get(&self, name: &str) -> Result<Database> {
        validate_name(name)?;
        if !self.contains(name).await? {
            return Err(DriverError::Server(ServerError::new(
                ServerErrorCode::DatabaseNotFound,
                format!("Database '{}' does not exist", name),
            )));
        }
        Ok(Database {
            name: name.to_string(),
            manager: self.clone(),
            deleted: AtomicBool::new(false),
        })
    }
}

/// Handle on one named database
#[derive(Debug)]
pub struct Database {
    name: String,
    manager: DatabaseManager,
    deleted: AtomicBool,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_not_deleted(&self) -> Result<()> {
        if self.deleted.load(Ordering::SeqCst) {
            Err(DriverError::DatabaseDeleted(self.name.clone()))
        } else {
            Ok(())
        }
    }

    /// Schema of the database as define statements
    pub async fn schema(&self) -> Result<String> {
        self.check_not_deleted()?;
        let request = Request::DatabaseSchema {
            name: self.name.clone(),
        };
        match self.manager.connection().inner().call(request).await? {
            Response::Text { value } => Ok(value),
            other => Err(unexpected_response("database_schema", other)),
        }
    }

    pub async fn delete(&self) -> Result<()> {
        self.check_not_deleted()?;
        self.manager.delete(&self.name).await?;
        self.deleted.store(true, Ordering::SeqCst);
        Ok(())
    }
}
