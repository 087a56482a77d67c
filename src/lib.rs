pub mod answer;
pub mod concept;
pub mod config;
pub mod connection;
pub mod error;
pub mod logic;
pub mod options;
pub mod protocol;
pub mod query;
pub mod server;
pub mod transport;

pub use answer::{
    ConceptMap, ConceptMapGroup, Explainable, Explainables, Explanation, ResultStream, Rule,
    ValueGroup,
};
pub use concept::{
    Attribute, AttributeType, Concept, ConceptKind, Entity, EntityType, Relation, RelationType,
    RoleType, RootThingType, ScopedLabel, ThingApi, TypeApi, Value, ValueType,
};
pub use config::ConnectionSettings;
pub use connection::{
    Connection, Database, DatabaseInfo, DatabaseManager, Session, Transaction, TransactionState,
};
pub use error::{DriverError, ErrorKind, Result};
pub use logic::LogicManager;
pub use options::Options;
pub use protocol::{Credentials, QueryType, ServerError, ServerErrorCode, SessionType, TransactionType};
pub use query::QueryManager;
pub use server::InMemoryServer;
pub use transport::RpcTransport;
