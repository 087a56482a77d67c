use std::borrow::Cow;

use tokio::sync::mpsc;

use crate::options::Options;
use crate::protocol::{
    AnswerRecord, ConceptMapGroupRecord, QueryType, Request, Response, ServerError,
    ServerErrorCode, SessionType, StreamFrame, ValueGroupRecord,
};
use crate::server::engine::{self, Binding, Row};
use crate::server::graph::Graph;
use crate::server::parser::{self, DeleteStatement, InsertStatement, MatchTail, Query};
use crate::server::state::{SharedTransaction, TransactionEntry};
use crate::server::{encode_frame, InMemoryServer};

/// Work a query stream still has to do once it is opened
enum StreamPlan {
    /// Answers already computed
    Answers(Vec<AnswerRecord>),
    /// One write per row, applied as the consumer pulls
    Writes {
        rows: Vec<Row>,
        delete: Vec<DeleteStatement>,
        insert: Vec<InsertStatement>,
    },
}

fn read_view(graph: &Graph, infer: bool) -> Cow<'_, Graph> {
    if infer {
        Cow::Owned(graph.with_inferences())
    } else {
        Cow::Borrowed(graph)
    }
}

fn not_streamed(query_type: QueryType) -> ServerError {
    ServerError::new(
        ServerErrorCode::QueryTypeMismatch,
        format!("{} queries are not answered as a stream", query_type),
    )
}

fn not_unary(query_type: QueryType) -> ServerError {
    ServerError::new(
        ServerErrorCode::QueryTypeMismatch,
        format!("{} queries are answered as a stream", query_type),
    )
}

pub(crate) fn check_schema_write(entry: &TransactionEntry) -> Result<(), ServerError> {
    if entry.session_type != SessionType::Schema {
        return Err(ServerError::new(
            ServerErrorCode::SchemaWriteInDataSession,
            "Schema writes need a schema session",
        ));
    }
    entry.check_writable()
}

/// Close a transaction a query failed in, as the service does for any query error.
pub(crate) fn abort(server: &InMemoryServer, tx_id: &str, error: &ServerError) {
    tracing::debug!("[{}] Transaction {} failed: {}", server.name(), tx_id, error);
    server.remove_transaction(tx_id);
}

// ==================== Unary queries ====================

pub fn handle_query(
    server: &InMemoryServer,
    connection_id: &str,
    tx_id: &str,
    query_type: QueryType,
    query: &str,
    options: &Options,
) -> Result<Response, ServerError> {
    let handle = server.transaction(connection_id, tx_id)?;
    let result = {
        let mut entry = handle.entry.lock();
        run_unary(&mut entry, tx_id, query_type, query, options)
    };
    if let Err(e) = &result {
        abort(server, tx_id, e);
    }
    result
}

fn run_unary(
    entry: &mut TransactionEntry,
    tx_id: &str,
    query_type: QueryType,
    text: &str,
    options: &Options,
) -> Result<Response, ServerError> {
    entry.check_usable(tx_id)?;
    let query = parser::parse(text)?;
    engine::check_query_type(query_type, &query)?;
    let options = options.merged_over(&entry.options);

    match query {
        Query::Define(definables) => {
            check_schema_write(entry)?;
            engine::define(entry.graph_mut(), &definables)?;
            Ok(Response::Ok)
        }
        Query::Undefine(definables) => {
            check_schema_write(entry)?;
            engine::undefine(entry.graph_mut(), &definables)?;
            Ok(Response::Ok)
        }
        Query::Match {
            patterns,
            tail: MatchTail::Delete(statements),
        } => {
            entry.check_writable()?;
            let rows = engine::match_rows(&entry.graph, &patterns)?;
            let graph = entry.graph_mut();
            for row in &rows {
                engine::delete_row(graph, row, &statements)?;
            }
            Ok(Response::Ok)
        }
        Query::Match {
            patterns,
            tail:
                MatchTail::Get {
                    filter,
                    group: None,
                    aggregate: Some(aggregate),
                },
        } => {
            let view = read_view(&entry.graph, options.infer_enabled());
            let rows = engine::filter_rows(engine::match_rows(&view, &patterns)?, filter.as_deref());
            let value = engine::aggregate(&view, &rows, &aggregate)?;
            Ok(Response::Aggregate {
                value: value.map(|v| v.to_record()),
            })
        }
        _ => Err(not_unary(query_type)),
    }
}

// ==================== Streamed queries ====================

/// Open the answer stream of a query, explain or rule listing request.
pub(crate) fn open_stream(
    server: &InMemoryServer,
    connection_id: &str,
    request: Request,
) -> Result<mpsc::Receiver<Vec<u8>>, ServerError> {
    server.check_running()?;
    server.check_connection(connection_id)?;

    let (tx_id, planned) = match request {
        Request::Query {
            tx_id,
            query_type,
            query,
            options,
        } => {
            let handle = server.transaction(connection_id, &tx_id)?;
            let planned = {
                let mut entry = handle.entry.lock();
                plan_query(&mut entry, &tx_id, query_type, &query, &options)
            };
            (tx_id, planned.map(|(plan, capacity)| (plan, capacity, handle.entry)))
        }
        Request::Explain {
            tx_id,
            explainable_id,
            options,
        } => {
            let handle = server.transaction(connection_id, &tx_id)?;
            let planned = {
                let entry = handle.entry.lock();
                plan_explain(&entry, &tx_id, explainable_id, &options)
            };
            (tx_id, planned.map(|(plan, capacity)| (plan, capacity, handle.entry)))
        }
        Request::GetRules { tx_id } => {
            let handle = server.transaction(connection_id, &tx_id)?;
            let planned = {
                let entry = handle.entry.lock();
                entry.check_usable(&tx_id).map(|_| {
                    let answers = super::logic::rule_answers(&entry.graph);
                    (StreamPlan::Answers(answers), capacity(&entry.options))
                })
            };
            (tx_id, planned.map(|(plan, capacity)| (plan, capacity, handle.entry)))
        }
        other => {
            return Err(ServerError::new(
                ServerErrorCode::Internal,
                format!("{} cannot be streamed", other.name()),
            ))
        }
    };

    let (plan, capacity, entry) = planned.inspect_err(|e| abort(server, &tx_id, e))?;
    let (sender, receiver) = mpsc::channel(capacity);
    match plan {
        StreamPlan::Answers(answers) => {
            tokio::spawn(send_answers(entry, tx_id, sender, answers));
        }
        StreamPlan::Writes {
            rows,
            delete,
            insert,
        } => {
            tokio::spawn(apply_writes(entry, tx_id, sender, rows, delete, insert));
        }
    }
    Ok(receiver)
}

fn capacity(options: &Options) -> usize {
    if options.prefetch_enabled() {
        options.prefetch_size_or_default() as usize
    } else {
        1
    }
}

fn plan_query(
    entry: &mut TransactionEntry,
    tx_id: &str,
    query_type: QueryType,
    text: &str,
    options: &Options,
) -> Result<(StreamPlan, usize), ServerError> {
    entry.check_usable(tx_id)?;
    let query = parser::parse(text)?;
    engine::check_query_type(query_type, &query)?;
    let options = options.merged_over(&entry.options);
    let capacity = capacity(&options);

    let (patterns, tail) = match query {
        Query::Insert(insert) => {
            entry.check_writable()?;
            let plan = StreamPlan::Writes {
                rows: vec![Row::default()],
                delete: Vec::new(),
                insert,
            };
            return Ok((plan, capacity));
        }
        Query::Match { patterns, tail } => (patterns, tail),
        Query::Define(_) | Query::Undefine(_) => return Err(not_streamed(query_type)),
    };

    let plan = match tail {
        MatchTail::Insert(insert) => {
            entry.check_writable()?;
            StreamPlan::Writes {
                rows: engine::match_rows(&entry.graph, &patterns)?,
                delete: Vec::new(),
                insert,
            }
        }
        MatchTail::Update { delete, insert } => {
            entry.check_writable()?;
            StreamPlan::Writes {
                rows: engine::match_rows(&entry.graph, &patterns)?,
                delete,
                insert,
            }
        }
        MatchTail::Delete(_) => return Err(not_streamed(query_type)),
        MatchTail::Fetch(items) => {
            let view = read_view(&entry.graph, options.infer_enabled());
            let answers = engine::match_rows(&view, &patterns)?
                .iter()
                .map(|row| {
                    engine::fetch_document(&view, row, &items)
                        .map(|document| AnswerRecord::Json(document.to_string()))
                })
                .collect::<Result<Vec<_>, ServerError>>()?;
            StreamPlan::Answers(answers)
        }
        MatchTail::Get {
            filter,
            group,
            aggregate,
        } => {
            let infer = options.infer_enabled();
            let view = read_view(&entry.graph, infer);
            let rows = engine::filter_rows(engine::match_rows(&view, &patterns)?, filter.as_deref());
            let mut explanations = (infer && options.explain_enabled()).then_some(&mut entry.explanations);

            let answers = match (group, aggregate) {
                (None, None) => rows
                    .iter()
                    .map(|row| {
                        engine::concept_map(&view, row, explanations.as_deref_mut())
                            .map(AnswerRecord::ConceptMap)
                    })
                    .collect::<Result<Vec<_>, ServerError>>()?,
                (Some(var), None) => {
                    let mut answers = Vec::new();
                    for (owner, members) in engine::group_rows(rows, &var)? {
                        let concept_maps = members
                            .iter()
                            .map(|row| engine::concept_map(&view, row, explanations.as_deref_mut()))
                            .collect::<Result<Vec<_>, ServerError>>()?;
                        answers.push(AnswerRecord::ConceptMapGroup(ConceptMapGroupRecord {
                            owner: engine::concept_record(&view, &owner)?,
                            concept_maps,
                        }));
                    }
                    answers
                }
                (Some(var), Some(aggregate)) => {
                    let mut answers = Vec::new();
                    for (owner, members) in engine::group_rows(rows, &var)? {
                        answers.push(AnswerRecord::ValueGroup(ValueGroupRecord {
                            owner: engine::concept_record(&view, &owner)?,
                            value: engine::aggregate(&view, &members, &aggregate)?
                                .map(|v| v.to_record()),
                        }));
                    }
                    answers
                }
                (None, Some(_)) => return Err(not_streamed(query_type)),
            };
            StreamPlan::Answers(answers)
        }
    };
    Ok((plan, capacity))
}

fn plan_explain(
    entry: &TransactionEntry,
    tx_id: &str,
    explainable_id: i64,
    options: &Options,
) -> Result<(StreamPlan, usize), ServerError> {
    entry.check_usable(tx_id)?;
    let explanation = entry.explanations.get(explainable_id).cloned().ok_or_else(|| {
        ServerError::new(
            ServerErrorCode::ExplainableNotFound,
            format!("Explainable {} was not produced by this transaction", explainable_id),
        )
    })?;
    let options = options.merged_over(&entry.options);
    Ok((
        StreamPlan::Answers(vec![AnswerRecord::Explanation(explanation)]),
        capacity(&options),
    ))
}

async fn send_answers(
    entry: SharedTransaction,
    tx_id: String,
    sender: mpsc::Sender<Vec<u8>>,
    answers: Vec<AnswerRecord>,
) {
    for answer in answers {
        let frame = {
            let mut entry = entry.lock();
            match entry.check_usable(&tx_id) {
                Ok(()) => StreamFrame::Answer(answer),
                Err(e) => {
                    tracing::debug!("Transaction {} expired mid-stream: {}", tx_id, e);
                    entry.close();
                    StreamFrame::Error(e)
                }
            }
        };
        let failed = matches!(frame, StreamFrame::Error(_));
        if sender.send(encode_frame(&frame)).await.is_err() {
            tracing::debug!("Answer stream of {} dropped by its consumer", tx_id);
            return;
        }
        if failed {
            return;
        }
    }
    let _ = sender.send(encode_frame(&StreamFrame::Done)).await;
}

/// Apply one row's writes and build its answer.
fn write_row(
    entry: &mut TransactionEntry,
    tx_id: &str,
    row: &Row,
    delete: &[DeleteStatement],
    insert: &[InsertStatement],
) -> Result<AnswerRecord, ServerError> {
    entry.check_usable(tx_id)?;
    let graph = entry.graph_mut();
    engine::delete_row(graph, row, delete)?;
    let mut written = engine::insert_row(graph, row, insert)?;
    written.bindings.retain(|_, binding| match binding {
        Binding::Thing(iid) => graph.thing(iid).is_ok(),
        _ => true,
    });
    engine::concept_map(graph, &written, None).map(AnswerRecord::ConceptMap)
}

async fn apply_writes(
    entry: SharedTransaction,
    tx_id: String,
    sender: mpsc::Sender<Vec<u8>>,
    rows: Vec<Row>,
    delete: Vec<DeleteStatement>,
    insert: Vec<InsertStatement>,
) {
    for row in rows {
        let frame = {
            let mut entry = entry.lock();
            match write_row(&mut entry, &tx_id, &row, &delete, &insert) {
                Ok(answer) => StreamFrame::Answer(answer),
                Err(e) => {
                    tracing::debug!("Transaction {} failed mid-stream: {}", tx_id, e);
                    entry.close();
                    StreamFrame::Error(e)
                }
            }
        };
        let failed = matches!(frame, StreamFrame::Error(_));
        if sender.send(encode_frame(&frame)).await.is_err() {
            tracing::debug!("Write stream of {} dropped by its consumer", tx_id);
            return;
        }
        if failed {
            return;
        }
    }
    let _ = sender.send(encode_frame(&StreamFrame::Done)).await;
}
