use std::sync::Arc;

use dashmap::mapref::entry::Entry;

use crate::protocol::{Response, ServerError, ServerErrorCode};
use crate::server::state::DatabaseState;
use crate::server::InMemoryServer;

fn validate_name(name: &str) -> Result<(), ServerError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ServerError::new(
            ServerErrorCode::InvalidDatabaseName,
            format!(
                "Database name '{}' may only contain letters, digits, '_' and '-'",
                name
            ),
        ))
    }
}

pub fn handle_list_databases(server: &InMemoryServer) -> Result<Response, ServerError> {
    let mut names: Vec<String> = server.databases.iter().map(|db| db.key().clone()).collect();
    names.sort();
    Ok(Response::Databases { names })
}

pub fn handle_contains_database(
    server: &InMemoryServer,
    name: &str,
) -> Result<Response, ServerError> {
    Ok(Response::Bool {
        value: server.databases.contains_key(name),
    })
}

pub fn handle_create_database(server: &InMemoryServer, name: &str) -> Result<Response, ServerError> {
    validate_name(name)?;
    match server.databases.entry(name.to_string()) {
        Entry::Occupied(_) => Err(ServerError::new(
            ServerErrorCode::DatabaseAlreadyExists,
            format!("Database '{}' already exists", name),
        )),
        Entry::Vacant(slot) => {
            slot.insert(Arc::new(DatabaseState::new(name)));
            tracing::info!("[{}] Created database {}", server.name(), name);
            Ok(Response::Ok)
        }
    }
}

pub fn handle_delete_database(server: &InMemoryServer, name: &str) -> Result<Response, ServerError> {
    let (_, database) = server.databases.remove(name).ok_or_else(|| {
        ServerError::new(
            ServerErrorCode::DatabaseNotFound,
            format!("Database '{}' does not exist", name),
        )
    })?;
    server.remove_sessions_on(&database);
    tracing::info!("[{}] Deleted database {}", server.name(), name);
    Ok(Response::Ok)
}

pub fn handle_database_schema(server: &InMemoryServer, name: &str) -> Result<Response, ServerError> {
    let database = server.database(name)?;
    Ok(Response::Text {
        value: database.snapshot().graph.schema_text(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_names() {
        assert!(validate_name("social_network-2").is_ok());
        for bad in ["", "with space", "semi;colon"] {
            let err = validate_name(bad).unwrap_err();
            assert_eq!(err.code, ServerErrorCode::InvalidDatabaseName);
        }
    }
}
