//! Messages exchanged with the query-execution service
//!
//! Every request, response and stream frame is serialised with MessagePack
//! before crossing a transport, so answers decoded on the driver side never
//! alias service-side state.

pub mod codec;
pub mod command;
pub mod error;
pub mod records;
pub mod response;
pub mod types;

pub use codec::{decode_message, encode_message, MAX_MESSAGE_SIZE};
pub use command::Request;
pub use error::{ServerError, ServerErrorCode};
pub use records::{
    AnswerRecord, ConceptMapGroupRecord, ConceptMapRecord, ConceptRecord, ExplainableRecord,
    ExplainablesRecord, ExplanationRecord, OwnershipExplainableRecord, RuleRecord,
    ValueGroupRecord, ValueRecord,
};
pub use response::{Response, StreamFrame};
pub use types::{Credentials, QueryType, SessionType, TransactionType};
