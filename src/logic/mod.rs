//! Rule access
//!
//! Rules are schema: `put_rule` needs a write transaction in a schema
//! session, while lookups work in any open transaction.

use std::sync::Arc;

use crate::answer::{ResultStream, Rule};
use crate::connection::transaction::TransactionShared;
use crate::connection::unexpected_response;
use crate::error::{DriverError, Result};
use crate::protocol::{AnswerRecord, Request, Response};

/// Rule surface of one transaction
pub struct LogicManager<'a> {
    transaction: &'a Arc<TransactionShared>,
}

impl<'a> LogicManager<'a> {
    pub(crate) fn new(transaction: &'a Arc<TransactionShared>) -> Self {
        Self { transaction }
    }

    fn check_label(&self, label: &str) -> Result<()> {
        if label.trim().is_empty() {
            return Err(DriverError::MissingRuleLabel);
        }
        self.transaction.check_open()
    }

    /// The rule called `label`, if the transaction sees one.
    pub async fn get_rule(&self, label: &str) -> Result<Option<Rule>> {
        self.check_label(label)?;
        let request = Request::GetRule {
            tx_id: self.transaction.id().to_string(),
            label: label.to_string(),
        };
        match self.transaction.call(request).await? {
            Response::Rule { rule } => Ok(rule.map(Rule::from)),
            other => Err(unexpected_response("get_rule", other)),
        }
    }

    pub async fn get_rules(&self) -> Result<ResultStream<Rule>> {
        self.transaction.check_open()?;
        let request = Request::GetRules {
            tx_id: self.transaction.id().to_string(),
        };
        let frames = self.transaction.stream(request).await?;
        Ok(ResultStream::new(self.transaction.clone(), frames, decode_rule))
    }

    /// Define the rule `label` from its `when` and `then` patterns,
    /// replacing any rule with that label.
    pub async fn put_rule(&self, label: &str, when: &str, then: &str) -> Result<Rule> {
        self.check_label(label)?;
        if when.trim().is_empty() || then.trim().is_empty() {
            return Err(DriverError::MissingQuery);
        }
        let request = Request::PutRule {
            tx_id: self.transaction.id().to_string(),
            label: label.to_string(),
            when: when.to_string(),
            then: then.to_string(),
        };
        tracing::debug!("Putting rule {} in transaction {}", label, self.transaction.id());
        match self.transaction.call(request).await? {
            Response::Rule { rule: Some(rule) } => Ok(rule.into()),
            other => Err(unexpected_response("put_rule", other)),
        }
    }
}

fn decode_rule(record: AnswerRecord) -> Result<Rule> {
    match record {
        AnswerRecord::Rule(rule) => Ok(rule.into()),
        other => Err(DriverError::UnexpectedNativeValue(format!(
            "expected rule answer, got {:?}",
            other
        ))),
    }
}
