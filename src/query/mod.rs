//! Query submission
//!
//! Every call is validated locally before anything is sent: an empty query
//! fails with `MissingQuery`, invalid options with `PositiveValueRequired`,
//! and a closed transaction with `TransactionClosed`.

use std::sync::Arc;

use crate::answer::{ConceptMap, ConceptMapGroup, Explainable, Explanation, ResultStream, ValueGroup};
use crate::concept::Value;
use crate::connection::transaction::TransactionShared;
use crate::connection::unexpected_response;
use crate::error::{DriverError, Result};
use crate::options::Options;
use crate::protocol::{AnswerRecord, QueryType, Request, Response};

/// Dispatch surface of one transaction
pub struct QueryManager<'a> {
    transaction: &'a Arc<TransactionShared>,
}

impl<'a> QueryManager<'a> {
    pub(crate) fn new(transaction: &'a Arc<TransactionShared>) -> Self {
        Self { transaction }
    }

    fn prepare(&self, query_type: QueryType, query: &str, options: &Options) -> Result<Request> {
        if query.trim().is_empty() {
            return Err(DriverError::MissingQuery);
        }
        options.validate()?;
        self.transaction.check_open()?;

        Ok(Request::Query {
            tx_id: self.transaction.id().to_string(),
            query_type,
            query: query.to_string(),
            options: options.merged_over(self.transaction.options()),
        })
    }

    async fn execute(&self, query_type: QueryType, query: &str, options: &Options) -> Result<()> {
        let request = self.prepare(query_type, query, options)?;
        tracing::debug!("Running {} query in transaction {}", query_type, self.transaction.id());
        match self.transaction.call(request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected_response(query_type.name(), other)),
        }
    }

    async fn stream<T>(
        &self,
        query_type: QueryType,
        query: &str,
        options: &Options,
        decode: fn(AnswerRecord) -> Result<T>,
    ) -> Result<ResultStream<T>> {
        let request = self.prepare(query_type, query, options)?;
        tracing::debug!("Streaming {} query in transaction {}", query_type, self.transaction.id());
        let frames = self.transaction.stream(request).await?;
        Ok(ResultStream::new(self.transaction.clone(), frames, decode))
    }

    pub async fn define(&self, query: &str, options: &Options) -> Result<()> {
        self.execute(QueryType::Define, query, options).await
    }

    pub async fn undefine(&self, query: &str, options: &Options) -> Result<()> {
        self.execute(QueryType::Undefine, query, options).await
    }

    pub async fn match_delete(&self, query: &str, options: &Options) -> Result<()> {
        self.execute(QueryType::Delete, query, options).await
    }

    pub async fn get(&self, query: &str, options: &Options) -> Result<ResultStream<ConceptMap>> {
        self.stream(QueryType::Get, query, options, decode_concept_map)
            .await
    }

    /// Insert answers are produced as the stream is pulled; drain it to make
    /// sure every row is written.
    pub async fn insert(&self, query: &str, options: &Options) -> Result<ResultStream<ConceptMap>> {
        self.stream(QueryType::Insert, query, options, decode_concept_map)
            .await
    }

    pub async fn update(&self, query: &str, options: &Options) -> Result<ResultStream<ConceptMap>> {
        self.stream(QueryType::Update, query, options, decode_concept_map)
            .await
    }

    pub async fn fetch(
        &self,
        query: &str,
        options: &Options,
    ) -> Result<ResultStream<serde_json::Value>> {
        self.stream(QueryType::Fetch, query, options, decode_json)
            .await
    }

    /// Single aggregate; `None` when there was nothing to aggregate.
    pub async fn get_aggregate(&self, query: &str, options: &Options) -> Result<Option<Value>> {
        let request = self.prepare(QueryType::GetAggregate, query, options)?;
        match self.transaction.call(request).await? {
            Response::Aggregate { value } => value.map(Value::from_record).transpose(),
            other => Err(unexpected_response("get aggregate", other)),
        }
    }

    pub async fn get_group(
        &self,
        query: &str,
        options: &Options,
    ) -> Result<ResultStream<ConceptMapGroup>> {
        self.stream(QueryType::GetGroup, query, options, decode_concept_map_group)
            .await
    }

    pub async fn get_group_aggregate(
        &self,
        query: &str,
        options: &Options,
    ) -> Result<ResultStream<ValueGroup>> {
        self.stream(QueryType::GetGroupAggregate, query, options, decode_value_group)
            .await
    }

    /// Explanations of an inferred fact found in an earlier answer of this
    /// transaction.
    pub async fn explain(
        &self,
        explainable: &Explainable,
        options: &Options,
    ) -> Result<ResultStream<Explanation>> {
        options.validate()?;
        self.transaction.check_open()?;

        let request = Request::Explain {
            tx_id: self.transaction.id().to_string(),
            explainable_id: explainable.id,
            options: options.merged_over(self.transaction.options()),
        };
        let frames = self.transaction.stream(request).await?;
        Ok(ResultStream::new(self.transaction.clone(), frames, decode_explanation))
    }
}

fn unexpected_answer(expected: &str, record: &AnswerRecord) -> DriverError {
    DriverError::UnexpectedNativeValue(format!("expected {} answer, got {:?}", expected, record))
}

fn decode_concept_map(record: AnswerRecord) -> Result<ConceptMap> {
    match record {
        AnswerRecord::ConceptMap(map) => ConceptMap::from_record(map),
        other => Err(unexpected_answer("concept map", &other)),
    }
}

fn decode_concept_map_group(record: AnswerRecord) -> Result<ConceptMapGroup> {
    match record {
        AnswerRecord::ConceptMapGroup(group) => ConceptMapGroup::from_record(group),
        other => Err(unexpected_answer("concept map group", &other)),
    }
}

fn decode_value_group(record: AnswerRecord) -> Result<ValueGroup> {
    match record {
        AnswerRecord::ValueGroup(group) => ValueGroup::from_record(group),
        other => Err(unexpected_answer("value group", &other)),
    }
}

fn decode_json(record: AnswerRecord) -> Result<serde_json::Value> {
    match record {
        AnswerRecord::Json(text) => serde_json::from_str(&text)
            .map_err(|e| DriverError::UnexpectedNativeValue(format!("invalid document: {}", e))),
        other => Err(unexpected_answer("document", &other)),
    }
}

fn decode_explanation(record: AnswerRecord) -> Result<Explanation> {
    match record {
        AnswerRecord::Explanation(explanation) => Explanation::from_record(explanation),
        other => Err(unexpected_answer("explanation", &other)),
    }
}
