//! Query evaluation over a [`Graph`]

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::graph::{
    literal, schema_error, Graph, RuleDef, TypeDef, TypeKind, RELATION, ROLE,
};
use super::parser::{
    Aggregate, AggregateMethod, Constraint, Definable, DeleteStatement, FetchItem,
    InsertStatement, Label, MatchTail, Operand, Query, Statement, TypeClause,
};
use crate::concept::{Value, ValueType};
use crate::protocol::{
    ConceptMapRecord, ConceptRecord, ExplainableRecord, ExplainablesRecord, ExplanationRecord,
    OwnershipExplainableRecord, QueryType, RuleRecord, ServerError, ServerErrorCode,
};

/// What a variable is bound to in one answer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Binding {
    Type(String),
    Role(String, String),
    Thing(String),
}

/// Ownership matched through a rule conclusion
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InferredOwnership {
    pub owner_var: String,
    pub attribute_var: String,
    pub owner: String,
    pub attribute: String,
    pub rule: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Row {
    pub bindings: BTreeMap<String, Binding>,
    pub inferred: Vec<InferredOwnership>,
}

impl Row {
    fn bound(&self, var: &str) -> Result<&Binding, ServerError> {
        self.bindings.get(var).ok_or_else(|| {
            ServerError::new(
                ServerErrorCode::QuerySyntax,
                format!("Variable ${} is not bound", var),
            )
        })
    }

    fn bound_thing(&self, var: &str) -> Result<&str, ServerError> {
        match self.bound(var)? {
            Binding::Thing(iid) => Ok(iid),
            _ => Err(ServerError::new(
                ServerErrorCode::QuerySyntax,
                format!("Variable ${} is not bound to a thing", var),
            )),
        }
    }

    /// Keep only `vars`; inferred ownerships are kept when both ends survive.
    fn project(&self, vars: &[String]) -> Row {
        let bindings: BTreeMap<String, Binding> = self
            .bindings
            .iter()
            .filter(|(var, _)| vars.contains(var))
            .map(|(var, binding)| (var.clone(), binding.clone()))
            .collect();
        let inferred = self
            .inferred
            .iter()
            .filter(|i| bindings.contains_key(&i.owner_var) && bindings.contains_key(&i.attribute_var))
            .cloned()
            .collect();
        Row { bindings, inferred }
    }
}

/// Explanations handed out in one transaction, by explainable id
#[derive(Debug, Default)]
pub(crate) struct ExplanationStore {
    next_id: i64,
    explanations: HashMap<i64, ExplanationRecord>,
}

impl ExplanationStore {
    fn register(&mut self, explanation: ExplanationRecord) -> i64 {
        self.next_id += 1;
        self.explanations.insert(self.next_id, explanation);
        self.next_id
    }

    pub(crate) fn get(&self, id: i64) -> Option<&ExplanationRecord> {
        self.explanations.get(&id)
    }
}

fn mismatch(query_type: QueryType, found: &str) -> ServerError {
    ServerError::new(
        ServerErrorCode::QueryTypeMismatch,
        format!("A {} query was submitted as {}", found, query_type),
    )
}

/// Check that `query` has the shape its declared `query_type` promises.
pub(crate) fn check_query_type(query_type: QueryType, query: &Query) -> Result<(), ServerError> {
    let found = match query {
        Query::Define(_) => QueryType::Define,
        Query::Undefine(_) => QueryType::Undefine,
        Query::Insert(_) => QueryType::Insert,
        Query::Match { tail, .. } => match tail {
            MatchTail::Fetch(_) => QueryType::Fetch,
            MatchTail::Insert(_) => QueryType::Insert,
            MatchTail::Delete(_) => QueryType::Delete,
            MatchTail::Update { .. } => QueryType::Update,
            MatchTail::Get {
                group, aggregate, ..
            } => match (group.is_some(), aggregate.is_some()) {
                (false, false) => QueryType::Get,
                (false, true) => QueryType::GetAggregate,
                (true, false) => QueryType::GetGroup,
                (true, true) => QueryType::GetGroupAggregate,
            },
        },
    };
    if found == query_type {
        Ok(())
    } else {
        Err(mismatch(query_type, found.name()))
    }
}

// ==================== Match ====================

pub(crate) fn match_rows(graph: &Graph, patterns: &[Statement]) -> Result<Vec<Row>, ServerError> {
    let mut rows = vec![Row::default()];
    for statement in patterns {
        for constraint in &statement.constraints {
            let mut next = Vec::new();
            for row in &rows {
                extend_row(graph, &statement.var, constraint, row, &mut next)?;
            }
            rows = next;
        }
    }
    Ok(rows)
}

fn require_type(graph: &Graph, label: &str) -> Result<(), ServerError> {
    if graph.contains_type(label) {
        Ok(())
    } else {
        graph.type_def(label).map(|_| ())
    }
}

fn bind(row: &Row, var: &str, binding: Binding, out: &mut Vec<Row>) {
    match row.bindings.get(var) {
        Some(existing) if *existing == binding => out.push(row.clone()),
        Some(_) => {}
        None => {
            let mut row = row.clone();
            row.bindings.insert(var.to_string(), binding);
            out.push(row);
        }
    }
}

fn extend_row(
    graph: &Graph,
    var: &str,
    constraint: &Constraint,
    row: &Row,
    out: &mut Vec<Row>,
) -> Result<(), ServerError> {
    match constraint {
        Constraint::Sub(Label::Plain(label)) => {
            require_type(graph, label)?;
            for sub in graph.subtypes(label) {
                bind(row, var, Binding::Type(sub), out);
            }
        }
        Constraint::Sub(Label::Scoped(scope, name)) => {
            let roles = graph.roles();
            let is_root = scope == RELATION && name == ROLE;
            if !is_root && !roles.iter().any(|(s, n)| s == scope && n == name) {
                return Err(ServerError::new(
                    ServerErrorCode::TypeNotFound,
                    format!("Role '{}:{}' does not exist", scope, name),
                ));
            }
            for (s, n) in roles {
                if is_root || (&s == scope && &n == name) {
                    bind(row, var, Binding::Role(s, n), out);
                }
            }
        }
        Constraint::Isa(label) => {
            require_type(graph, label)?;
            for thing in graph.things() {
                if graph.is_subtype(&thing.type_label, label) {
                    bind(row, var, Binding::Thing(thing.iid.clone()), out);
                }
            }
        }
        Constraint::Has(attribute, operand) => {
            let def = graph.type_def(attribute)?;
            if def.kind != TypeKind::Attribute {
                return Err(schema_error(format!("'{}' is not an attribute type", attribute)));
            }
            let owners: Vec<&str> = match row.bindings.get(var) {
                Some(Binding::Thing(iid)) => vec![iid.as_str()],
                Some(_) => return Ok(()),
                None => graph.things().map(|t| t.iid.as_str()).collect(),
            };
            for owner in owners {
                let base = match row.bindings.get(var) {
                    Some(_) => row.clone(),
                    None => {
                        let mut row = row.clone();
                        row.bindings
                            .insert(var.to_string(), Binding::Thing(owner.to_string()));
                        row
                    }
                };
                for (attribute_iid, rule) in &graph.thing(owner)?.has {
                    let owned = graph.thing(attribute_iid)?;
                    if !graph.is_subtype(&owned.type_label, attribute) {
                        continue;
                    }
                    match operand {
                        Operand::Literal(value) => {
                            if owned.value.as_ref() == Some(value) {
                                out.push(base.clone());
                            }
                        }
                        Operand::Var(attribute_var) => {
                            let before = out.len();
                            bind(&base, attribute_var, Binding::Thing(attribute_iid.clone()), out);
                            if let (Some(rule), Some(added)) = (rule, out.get_mut(before)) {
                                added.inferred.push(InferredOwnership {
                                    owner_var: var.to_string(),
                                    attribute_var: attribute_var.clone(),
                                    owner: owner.to_string(),
                                    attribute: attribute_iid.clone(),
                                    rule: rule.clone(),
                                });
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Project rows onto `filter` and drop duplicate answers.
pub(crate) fn filter_rows(rows: Vec<Row>, filter: Option<&[String]>) -> Vec<Row> {
    let Some(vars) = filter else {
        return rows;
    };
    let mut seen = BTreeSet::new();
    rows.into_iter()
        .map(|row| row.project(vars))
        .filter(|row| seen.insert(row.bindings.clone()))
        .collect()
}

// ==================== Answers ====================

pub(crate) fn concept_record(graph: &Graph, binding: &Binding) -> Result<ConceptRecord, ServerError> {
    match binding {
        Binding::Type(label) => Ok(graph.type_record(label)),
        Binding::Role(scope, name) => Ok(graph.role_record(scope, name)),
        Binding::Thing(iid) => graph.thing_record(iid),
    }
}

fn plain_concept_map(
    graph: &Graph,
    bindings: &BTreeMap<String, Binding>,
) -> Result<ConceptMapRecord, ServerError> {
    let concepts = bindings
        .iter()
        .map(|(var, binding)| Ok((var.clone(), concept_record(graph, binding)?)))
        .collect::<Result<BTreeMap<_, _>, ServerError>>()?;
    Ok(ConceptMapRecord {
        concepts,
        explainables: ExplainablesRecord::default(),
    })
}

fn explanation(graph: &Graph, inferred: &InferredOwnership) -> Result<ExplanationRecord, ServerError> {
    let rule: &RuleDef = graph.rule(&inferred.rule).ok_or_else(|| {
        ServerError::new(
            ServerErrorCode::Internal,
            format!("Rule '{}' disappeared", inferred.rule),
        )
    })?;
    let owner = Binding::Thing(inferred.owner.clone());
    let attribute = Binding::Thing(inferred.attribute.clone());

    let condition = plain_concept_map(graph, &BTreeMap::from([("x".to_string(), owner.clone())]))?;
    let conclusion = plain_concept_map(
        graph,
        &BTreeMap::from([("x".to_string(), owner), ("_0".to_string(), attribute)]),
    )?;
    Ok(ExplanationRecord {
        rule: rule_record(rule),
        conclusion,
        condition,
        variable_mapping: BTreeMap::from([
            (inferred.owner_var.clone(), vec!["x".to_string()]),
            (inferred.attribute_var.clone(), vec!["_0".to_string()]),
        ]),
    })
}

/// Answer for one row. With `explanations`, inferred ownerships are
/// registered and attached as explainables.
pub(crate) fn concept_map(
    graph: &Graph,
    row: &Row,
    explanations: Option<&mut ExplanationStore>,
) -> Result<ConceptMapRecord, ServerError> {
    let mut record = plain_concept_map(graph, &row.bindings)?;
    if let Some(store) = explanations {
        for inferred in &row.inferred {
            let id = store.register(explanation(graph, inferred)?);
            let conjunction = match graph.thing(&inferred.attribute) {
                Ok(attribute) => format!(
                    "{{ ${} has {} ${}; }}",
                    inferred.owner_var, attribute.type_label, inferred.attribute_var
                ),
                Err(_) => format!("{{ ${} has ${}; }}", inferred.owner_var, inferred.attribute_var),
            };
            record.explainables.ownerships.push(OwnershipExplainableRecord {
                owner: inferred.owner_var.clone(),
                attribute: inferred.attribute_var.clone(),
                explainable: ExplainableRecord { conjunction, id },
            });
        }
    }
    Ok(record)
}

// ==================== Aggregates and groups ====================

fn numeric_values(graph: &Graph, rows: &[Row], var: &str) -> Result<Vec<Value>, ServerError> {
    rows.iter()
        .map(|row| {
            let iid = row.bound_thing(var)?;
            let value = graph.thing(iid)?.value.clone().ok_or_else(|| {
                ServerError::new(
                    ServerErrorCode::QueryTypeMismatch,
                    format!("${} is not an attribute", var),
                )
            })?;
            match value {
                Value::Long(_) | Value::Double(_) => Ok(value),
                other => Err(ServerError::new(
                    ServerErrorCode::QueryTypeMismatch,
                    format!("Cannot aggregate {} values", other.value_type()),
                )),
            }
        })
        .collect()
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Long(v) => *v as f64,
        Value::Double(v) => *v,
        _ => f64::NAN,
    }
}

pub(crate) fn aggregate(
    graph: &Graph,
    rows: &[Row],
    aggregate: &Aggregate,
) -> Result<Option<Value>, ServerError> {
    let var = match (&aggregate.method, &aggregate.var) {
        (AggregateMethod::Count, _) => return Ok(Some(Value::Long(rows.len() as i64))),
        (_, Some(var)) => var,
        (_, None) => {
            return Err(ServerError::new(
                ServerErrorCode::QuerySyntax,
                "Aggregate needs a variable",
            ))
        }
    };
    let values = numeric_values(graph, rows, var)?;
    if values.is_empty() {
        return Ok(None);
    }
    let all_long = values.iter().all(Value::is_long);

    let result = match aggregate.method {
        AggregateMethod::Count => Value::Long(values.len() as i64),
        AggregateMethod::Sum if all_long => {
            let total = values
                .iter()
                .filter_map(|v| v.as_long().ok())
                .try_fold(0i64, i64::checked_add)
                .ok_or_else(|| {
                    ServerError::new(
                        ServerErrorCode::ArithmeticOverflow,
                        format!("Sum of ${} overflows a long", var),
                    )
                })?;
            Value::Long(total)
        }
        AggregateMethod::Sum => Value::Double(values.iter().map(as_f64).sum()),
        AggregateMethod::Mean => {
            Value::Double(values.iter().map(as_f64).sum::<f64>() / values.len() as f64)
        }
        AggregateMethod::Max | AggregateMethod::Min => {
            let pick_max = aggregate.method == AggregateMethod::Max;
            let mut best = values[0].clone();
            for value in &values[1..] {
                let ordering = match (value, &best) {
                    (Value::Long(a), Value::Long(b)) => a.cmp(b),
                    _ => as_f64(value)
                        .partial_cmp(&as_f64(&best))
                        .unwrap_or(std::cmp::Ordering::Equal),
                };
                let better = if pick_max {
                    ordering.is_gt()
                } else {
                    ordering.is_lt()
                };
                if better {
                    best = value.clone();
                }
            }
            if all_long {
                best
            } else {
                Value::Double(as_f64(&best))
            }
        }
    };
    Ok(Some(result))
}

/// Rows grouped by the binding of `var`, in order of first appearance
pub(crate) fn group_rows(rows: Vec<Row>, var: &str) -> Result<Vec<(Binding, Vec<Row>)>, ServerError> {
    let mut groups: Vec<(Binding, Vec<Row>)> = Vec::new();
    for row in rows {
        let owner = row.bound(var)?.clone();
        match groups.iter_mut().find(|(key, _)| *key == owner) {
            Some((_, members)) => members.push(row),
            None => groups.push((owner, vec![row])),
        }
    }
    Ok(groups)
}

// ==================== Fetch ====================

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Boolean(v) => serde_json::Value::Bool(*v),
        Value::Long(v) => serde_json::Value::from(*v),
        Value::Double(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(v) => serde_json::Value::String(v.clone()),
        Value::DateTime(_) => serde_json::Value::String(value.to_string()),
    }
}

fn type_document(graph: &Graph, label: &str) -> serde_json::Value {
    let root = graph
        .supertypes(label)
        .last()
        .map(|t| t.label.clone())
        .unwrap_or_else(|| label.to_string());
    serde_json::json!({ "label": label, "root": root })
}

fn attribute_document(graph: &Graph, iid: &str) -> Result<serde_json::Value, ServerError> {
    let attribute = graph.thing(iid)?;
    let value_type = graph.value_type(&attribute.type_label).unwrap_or(ValueType::Object);
    Ok(serde_json::json!({
        "value": attribute.value.as_ref().map(json_value).unwrap_or(serde_json::Value::Null),
        "value_type": value_type.name(),
        "type": type_document(graph, &attribute.type_label),
    }))
}

pub(crate) fn fetch_document(
    graph: &Graph,
    row: &Row,
    items: &[FetchItem],
) -> Result<serde_json::Value, ServerError> {
    let mut document = serde_json::Map::new();
    for item in items {
        let entry = match row.bound(&item.var)? {
            Binding::Type(label) => type_document(graph, label),
            Binding::Role(scope, name) => {
                serde_json::json!({ "label": format!("{}:{}", scope, name), "root": "relation:role" })
            }
            Binding::Thing(iid) => {
                let thing = graph.thing(iid)?;
                if thing.value.is_some() && item.attributes.is_empty() {
                    attribute_document(graph, iid)?
                } else {
                    let mut entry = serde_json::Map::new();
                    entry.insert("type".to_string(), type_document(graph, &thing.type_label));
                    for attribute in &item.attributes {
                        graph.type_def(attribute)?;
                        let owned = thing
                            .has
                            .keys()
                            .filter(|a| {
                                graph
                                    .thing(a)
                                    .map(|t| graph.is_subtype(&t.type_label, attribute))
                                    .unwrap_or(false)
                            })
                            .map(|a| attribute_document(graph, a))
                            .collect::<Result<Vec<_>, ServerError>>()?;
                        entry.insert(attribute.clone(), serde_json::Value::Array(owned));
                    }
                    serde_json::Value::Object(entry)
                }
            }
        };
        document.insert(item.var.clone(), entry);
    }
    Ok(serde_json::Value::Object(document))
}

// ==================== Writes ====================

/// Apply `statements` under the bindings of `row`; the returned row also
/// binds every inserted variable.
pub(crate) fn insert_row(
    graph: &mut Graph,
    row: &Row,
    statements: &[InsertStatement],
) -> Result<Row, ServerError> {
    let mut row = Row {
        bindings: row.bindings.clone(),
        inferred: Vec::new(),
    };
    for statement in statements {
        let owner = match row.bindings.get(&statement.var) {
            Some(Binding::Thing(iid)) => {
                if statement.isa.is_some() || statement.value.is_some() {
                    return Err(schema_error(format!(
                        "${} is already bound and cannot be redeclared",
                        statement.var
                    )));
                }
                iid.clone()
            }
            Some(_) => {
                return Err(schema_error(format!("${} is not bound to a thing", statement.var)))
            }
            None => {
                let type_label = statement.isa.as_ref().ok_or_else(|| {
                    schema_error(format!("${} needs a type to be inserted", statement.var))
                })?;
                let iid = graph.insert_thing(type_label, statement.value.clone(), false)?;
                row.bindings
                    .insert(statement.var.clone(), Binding::Thing(iid.clone()));
                iid
            }
        };

        for (attribute_label, operand) in &statement.has {
            let attribute = match operand {
                Operand::Literal(value) => {
                    let def = graph.type_def(attribute_label)?;
                    if def.kind != TypeKind::Attribute {
                        return Err(schema_error(format!(
                            "'{}' is not an attribute type",
                            attribute_label
                        )));
                    }
                    graph.insert_thing(attribute_label, Some(value.clone()), false)?
                }
                Operand::Var(var) => row.bound_thing(var)?.to_string(),
            };
            graph.add_ownership(&owner, &attribute, None)?;
        }
    }
    Ok(row)
}

pub(crate) fn delete_row(
    graph: &mut Graph,
    row: &Row,
    statements: &[DeleteStatement],
) -> Result<(), ServerError> {
    for statement in statements {
        match statement {
            DeleteStatement::Thing(var) => {
                let iid = row.bound_thing(var)?.to_string();
                graph.delete_thing(&iid);
            }
            DeleteStatement::Has { owner, attribute } => {
                let owner = row.bound_thing(owner)?.to_string();
                let attribute = row.bound_thing(attribute)?.to_string();
                graph.remove_ownership(&owner, &attribute);
            }
        }
    }
    Ok(())
}

// ==================== Schema ====================

pub(crate) fn define(graph: &mut Graph, definables: &[Definable]) -> Result<(), ServerError> {
    for definable in definables {
        match definable {
            Definable::Type { label, clauses } => define_type(graph, label, clauses)?,
            Definable::Rule(rule) => define_rule(graph, rule)?,
            Definable::RuleLabel(label) => {
                return Err(ServerError::new(
                    ServerErrorCode::QuerySyntax,
                    format!("Rule '{}' has no body", label),
                ))
            }
        }
    }
    Ok(())
}

fn define_type(graph: &mut Graph, label: &str, clauses: &[TypeClause]) -> Result<(), ServerError> {
    let parent = clauses.iter().find_map(|c| match c {
        TypeClause::Sub(parent) => Some(parent.as_str()),
        _ => None,
    });

    if graph.contains_type(label) {
        let def = graph.type_def(label)?;
        if let Some(parent) = parent {
            if def.parent.as_deref() != Some(parent) {
                return Err(schema_error(format!(
                    "Type '{}' cannot be moved under '{}'",
                    label, parent
                )));
            }
        }
    } else {
        let parent = parent.ok_or_else(|| {
            ServerError::new(
                ServerErrorCode::TypeNotFound,
                format!("Type '{}' does not exist; declare it with 'sub'", label),
            )
        })?;
        let kind = graph.type_def(parent)?.kind;
        graph.insert_type(TypeDef {
            label: label.to_string(),
            kind,
            parent: Some(parent.to_string()),
            is_abstract: false,
            value_type: None,
            owns: BTreeSet::new(),
            relates: BTreeSet::new(),
        });
    }

    for clause in clauses {
        match clause {
            TypeClause::Sub(_) => {}
            TypeClause::Abstract => graph.type_def_mut(label)?.is_abstract = true,
            TypeClause::Value(value_type) => {
                let inherited = graph.value_type(label);
                let def = graph.type_def_mut(label)?;
                if def.kind != TypeKind::Attribute {
                    return Err(schema_error(format!("'{}' cannot have a value type", label)));
                }
                if let Some(inherited) = inherited.filter(|v| *v != ValueType::Object) {
                    if inherited != *value_type {
                        return Err(schema_error(format!(
                            "'{}' already has value type {}",
                            label, inherited
                        )));
                    }
                }
                def.value_type = Some(*value_type);
            }
            TypeClause::Owns(attribute) => {
                if graph.type_def(attribute)?.kind != TypeKind::Attribute {
                    return Err(schema_error(format!("'{}' is not an attribute type", attribute)));
                }
                graph.type_def_mut(label)?.owns.insert(attribute.clone());
            }
            TypeClause::Relates(role) => {
                let def = graph.type_def_mut(label)?;
                if def.kind != TypeKind::Relation {
                    return Err(schema_error(format!("'{}' is not a relation type", label)));
                }
                def.relates.insert(role.clone());
            }
        }
    }

    let def = graph.type_def(label)?;
    if def.kind == TypeKind::Attribute
        && !def.is_abstract
        && graph.value_type(label).unwrap_or(ValueType::Object) == ValueType::Object
    {
        return Err(schema_error(format!("Attribute type '{}' needs a value type", label)));
    }
    Ok(())
}

fn define_rule(graph: &mut Graph, rule: &RuleDef) -> Result<(), ServerError> {
    graph.type_def(&rule.premise)?;
    let attribute = graph.type_def(&rule.attribute)?;
    if attribute.kind != TypeKind::Attribute {
        return Err(schema_error(format!("'{}' is not an attribute type", rule.attribute)));
    }
    if graph.value_type(&rule.attribute) != Some(rule.value.value_type()) {
        return Err(schema_error(format!(
            "Rule '{}' concludes {} which does not fit '{}'",
            rule.label,
            literal(&rule.value),
            rule.attribute
        )));
    }
    if !graph.can_own(&rule.premise, &rule.attribute) {
        return Err(schema_error(format!(
            "Rule '{}' gives '{}' an attribute it does not own",
            rule.label, rule.premise
        )));
    }
    graph.insert_rule(rule.clone());
    Ok(())
}

pub(crate) fn rule_record(rule: &RuleDef) -> RuleRecord {
    RuleRecord {
        label: rule.label.clone(),
        when: rule.when_text(),
        then: rule.then_text(),
    }
}

/// Define `rule`, replacing any rule with the same label.
pub(crate) fn put_rule(graph: &mut Graph, rule: &RuleDef) -> Result<RuleRecord, ServerError> {
    define_rule(graph, rule)?;
    Ok(rule_record(rule))
}

pub(crate) fn undefine(graph: &mut Graph, definables: &[Definable]) -> Result<(), ServerError> {
    for definable in definables {
        match definable {
            Definable::RuleLabel(label) => graph.remove_rule(label)?,
            Definable::Rule(rule) => graph.remove_rule(&rule.label)?,
            Definable::Type { label, clauses } => {
                for clause in clauses {
                    match clause {
                        TypeClause::Sub(_) => graph.remove_type(label)?,
                        TypeClause::Abstract => graph.type_def_mut(label)?.is_abstract = false,
                        TypeClause::Owns(attribute) => {
                            let in_use = graph.rules().any(|r| {
                                &r.attribute == attribute && graph.is_subtype(&r.premise, label)
                            });
                            if in_use {
                                return Err(schema_error(format!(
                                    "'{} owns {}' is used by a rule",
                                    label, attribute
                                )));
                            }
                            graph.type_def_mut(label)?.owns.remove(attribute);
                        }
                        TypeClause::Relates(role) => {
                            graph.type_def_mut(label)?.relates.remove(role);
                        }
                        TypeClause::Value(_) => {
                            return Err(schema_error(format!(
                                "The value type of '{}' cannot be undefined",
                                label
                            )))
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::parser::{parse, parse_rule};

    fn graph_with(schema: &str, data: &[&str]) -> Graph {
        let mut graph = Graph::new();
        let Query::Define(definables) = parse(schema).unwrap() else {
            panic!("expected define");
        };
        define(&mut graph, &definables).unwrap();
        for insert in data {
            let Query::Insert(statements) = parse(insert).unwrap() else {
                panic!("expected insert");
            };
            insert_row(&mut graph, &Row::default(), &statements).unwrap();
        }
        graph
    }

    fn rows(graph: &Graph, query: &str) -> Vec<Row> {
        let Query::Match { patterns, .. } = parse(query).unwrap() else {
            panic!("expected match");
        };
        match_rows(graph, &patterns).unwrap()
    }

    const SCHEMA: &str = "define
        name sub attribute, value string;
        age sub attribute, value long;
        person sub entity, owns name, owns age;";

    #[test]
    fn test_match_has_literal_and_variable() {
        let graph = graph_with(
            SCHEMA,
            &[
                "insert $x isa person, has name \"Alice\", has age 30;",
                "insert $x isa person, has name \"Bob\", has age 25;",
            ],
        );

        assert_eq!(rows(&graph, "match $x isa person;").len(), 2);
        assert_eq!(rows(&graph, "match $x isa person, has name \"Alice\";").len(), 1);

        let found = rows(&graph, "match $x isa person, has age $a;");
        let aggregate_sum = Aggregate {
            method: AggregateMethod::Sum,
            var: Some("a".to_string()),
        };
        assert_eq!(aggregate(&graph, &found, &aggregate_sum).unwrap(), Some(Value::Long(55)));
        let aggregate_mean = Aggregate {
            method: AggregateMethod::Mean,
            var: Some("a".to_string()),
        };
        assert_eq!(aggregate(&graph, &found, &aggregate_mean).unwrap(), Some(Value::Double(27.5)));
    }

    #[test]
    fn test_aggregate_of_nothing_is_empty() {
        let graph = graph_with(SCHEMA, &[]);
        let found = rows(&graph, "match $x isa person, has age $a;");
        let max = Aggregate {
            method: AggregateMethod::Max,
            var: Some("a".to_string()),
        };
        assert_eq!(aggregate(&graph, &found, &max).unwrap(), None);
        let count = Aggregate {
            method: AggregateMethod::Count,
            var: None,
        };
        assert_eq!(aggregate(&graph, &found, &count).unwrap(), Some(Value::Long(0)));
    }

    #[test]
    fn test_long_sum_overflow_is_an_error() {
        let graph = graph_with(
            SCHEMA,
            &[
                "insert $x isa person, has age 9223372036854775807;",
                "insert $x isa person, has age 1;",
            ],
        );
        let found = rows(&graph, "match $x isa person, has age $a;");
        let sum = Aggregate {
            method: AggregateMethod::Sum,
            var: Some("a".to_string()),
        };
        let err = aggregate(&graph, &found, &sum).unwrap_err();
        assert_eq!(err.code, ServerErrorCode::ArithmeticOverflow);

        let max = Aggregate {
            method: AggregateMethod::Max,
            var: Some("a".to_string()),
        };
        assert_eq!(
            aggregate(&graph, &found, &max).unwrap(),
            Some(Value::Long(i64::MAX))
        );
    }

    #[test]
    fn test_put_rule_replaces_by_label() {
        let mut graph = graph_with(SCHEMA, &[]);
        let first = parse_rule("anon", "$x isa person;", "$x has name \"A\";").unwrap();
        let second = parse_rule("anon", "$x isa person;", "$x has name \"B\";").unwrap();
        put_rule(&mut graph, &first).unwrap();
        let record = put_rule(&mut graph, &second).unwrap();
        assert_eq!(record.then, "$x has name \"B\";");
        assert_eq!(graph.rules().count(), 1);

        let misfit = parse_rule("bad", "$x isa person;", "$x has age \"old\";").unwrap();
        assert_eq!(put_rule(&mut graph, &misfit).unwrap_err().code, ServerErrorCode::SchemaViolation);
    }

    #[test]
    fn test_filter_deduplicates() {
        let graph = graph_with(
            SCHEMA,
            &[
                "insert $x isa person, has name \"Alice\";",
                "insert $x isa person, has name \"Alice\";",
            ],
        );
        let found = rows(&graph, "match $x isa person, has name $n;");
        assert_eq!(found.len(), 2);
        assert_eq!(filter_rows(found, Some(&["n".to_string()])).len(), 1);
    }

    #[test]
    fn test_inferred_ownership_is_explained() {
        let mut graph = graph_with(SCHEMA, &["insert $x isa person;"]);
        let Query::Define(rule) = parse(
            "define rule anon: when { $x isa person; } then { $x has name \"Anonymous\"; };",
        )
        .unwrap() else {
            panic!("expected define");
        };
        define(&mut graph, &rule).unwrap();

        assert!(rows(&graph, "match $x isa person, has name $n;").is_empty());

        let view = graph.with_inferences();
        let found = rows(&view, "match $x isa person, has name $n;");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].inferred[0].rule, "anon");

        let mut store = ExplanationStore::default();
        let answer = concept_map(&view, &found[0], Some(&mut store)).unwrap();
        let explainable = &answer.explainables.ownerships[0];
        assert_eq!((explainable.owner.as_str(), explainable.attribute.as_str()), ("x", "n"));

        let explanation = store.get(explainable.explainable.id).unwrap();
        assert_eq!(explanation.rule.label, "anon");
        assert_eq!(explanation.variable_mapping["x"], vec!["x".to_string()]);
    }

    #[test]
    fn test_schema_errors() {
        let mut graph = graph_with(SCHEMA, &["insert $x isa person;"]);

        let Query::Define(bad) = parse("define nickname sub attribute;").unwrap() else {
            panic!("expected define");
        };
        assert_eq!(define(&mut graph, &bad).unwrap_err().code, ServerErrorCode::SchemaViolation);

        let Query::Undefine(undefine_person) = parse("undefine person sub entity;").unwrap() else {
            panic!("expected undefine");
        };
        assert_eq!(
            undefine(&mut graph, &undefine_person).unwrap_err().code,
            ServerErrorCode::SchemaViolation
        );

        let Query::Insert(statements) = parse("insert $x isa robot;").unwrap() else {
            panic!("expected insert");
        };
        assert_eq!(
            insert_row(&mut graph, &Row::default(), &statements).unwrap_err().code,
            ServerErrorCode::TypeNotFound
        );
    }

    #[test]
    fn test_query_type_is_checked() {
        let query = parse("match $x isa person; get; count;").unwrap();
        assert!(check_query_type(QueryType::GetAggregate, &query).is_ok());
        let err = check_query_type(QueryType::Get, &query).unwrap_err();
        assert_eq!(err.code, ServerErrorCode::QueryTypeMismatch);
    }
}
