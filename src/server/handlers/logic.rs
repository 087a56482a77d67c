use crate::protocol::{AnswerRecord, Response, RuleRecord, ServerError};
use crate::server::engine;
use crate::server::graph::Graph;
use crate::server::parser;
use crate::server::state::TransactionEntry;
use crate::server::InMemoryServer;

use super::query::{abort, check_schema_write};

pub fn handle_get_rule(
    server: &InMemoryServer,
    connection_id: &str,
    tx_id: &str,
    label: &str,
) -> Result<Response, ServerError> {
    let handle = server.transaction(connection_id, tx_id)?;
    let result = {
        let entry = handle.entry.lock();
        entry.check_usable(tx_id).map(|_| Response::Rule {
            rule: entry.graph.rule(label).map(engine::rule_record),
        })
    };
    if let Err(e) = &result {
        abort(server, tx_id, e);
    }
    result
}

pub fn handle_put_rule(
    server: &InMemoryServer,
    connection_id: &str,
    tx_id: &str,
    label: &str,
    when: &str,
    then: &str,
) -> Result<Response, ServerError> {
    let handle = server.transaction(connection_id, tx_id)?;
    let result = {
        let mut entry = handle.entry.lock();
        put_rule(&mut entry, tx_id, label, when, then)
    };
    match result {
        Ok(rule) => {
            tracing::debug!("[{}] Rule {} written in {}", server.name(), label, tx_id);
            Ok(Response::Rule { rule: Some(rule) })
        }
        Err(e) => {
            abort(server, tx_id, &e);
            Err(e)
        }
    }
}

fn put_rule(
    entry: &mut TransactionEntry,
    tx_id: &str,
    label: &str,
    when: &str,
    then: &str,
) -> Result<RuleRecord, ServerError> {
    entry.check_usable(tx_id)?;
    check_schema_write(entry)?;
    let rule = parser::parse_rule(label, when, then)?;
    engine::put_rule(entry.graph_mut(), &rule)
}

/// Every rule of `graph`, ordered by label
pub(crate) fn rule_answers(graph: &Graph) -> Vec<AnswerRecord> {
    graph
        .rules()
        .map(|rule| AnswerRecord::Rule(engine::rule_record(rule)))
        .collect()
}
