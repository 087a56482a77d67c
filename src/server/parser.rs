//! Parser for the service's query language

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;

use super::graph::RuleDef;
use crate::concept::{Value, ValueType};
use crate::protocol::{ServerError, ServerErrorCode};

static TOKEN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        (?P<space>\s+|\#[^\n]*)
        | (?P<var>\$[A-Za-z_][A-Za-z0-9_-]*)
        | (?P<string>"(?:[^"\\]|\\.)*")
        | (?P<datetime>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}(?::\d{2}(?:\.\d{1,3})?)?)
        | (?P<number>-?\d+(?:\.\d+)?)
        | (?P<word>[A-Za-z_][A-Za-z0-9_-]*)
        | (?P<punct>[;,:{}])
        "#,
    )
    .ok()
});

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Var(String),
    Word(String),
    Literal(Value),
    Punct(char),
}

fn syntax_error(message: impl Into<String>) -> ServerError {
    ServerError::new(ServerErrorCode::QuerySyntax, message)
}

fn tokenize(query: &str) -> Result<Vec<Token>, ServerError> {
    let pattern = TOKEN
        .as_ref()
        .ok_or_else(|| ServerError::new(ServerErrorCode::Internal, "Tokenizer unavailable"))?;

    let mut tokens = Vec::new();
    let mut position = 0;
    while position < query.len() {
        let captures = pattern
            .captures_at(query, position)
            .filter(|c| c.get(0).map(|m| m.start()) == Some(position))
            .ok_or_else(|| {
                syntax_error(format!("Unexpected input at offset {}: '{}'", position, &query[position..]))
            })?;
        let matched = captures
            .get(0)
            .ok_or_else(|| syntax_error("Empty match"))?;
        position = matched.end();

        if captures.name("space").is_some() {
            continue;
        }
        let token = if let Some(m) = captures.name("var") {
            Token::Var(m.as_str()[1..].to_string())
        } else if let Some(m) = captures.name("string") {
            let inner = &m.as_str()[1..m.as_str().len() - 1];
            Token::Literal(Value::String(inner.replace("\\\"", "\"").replace("\\\\", "\\")))
        } else if let Some(m) = captures.name("datetime") {
            Token::Literal(Value::DateTime(parse_datetime(m.as_str())?))
        } else if let Some(m) = captures.name("number") {
            let text = m.as_str();
            if text.contains('.') {
                Token::Literal(Value::Double(text.parse().map_err(|_| {
                    syntax_error(format!("Invalid number '{}'", text))
                })?))
            } else {
                Token::Literal(Value::Long(text.parse().map_err(|_| {
                    syntax_error(format!("Invalid number '{}'", text))
                })?))
            }
        } else if let Some(m) = captures.name("word") {
            match m.as_str() {
                "true" => Token::Literal(Value::Boolean(true)),
                "false" => Token::Literal(Value::Boolean(false)),
                word => Token::Word(word.to_string()),
            }
        } else if let Some(m) = captures.name("punct") {
            Token::Punct(m.as_str().chars().next().unwrap_or(';'))
        } else {
            return Err(syntax_error("Unrecognised token"));
        };
        tokens.push(token);
    }
    Ok(tokens)
}

fn parse_datetime(text: &str) -> Result<NaiveDateTime, ServerError> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .ok_or_else(|| syntax_error(format!("Invalid datetime '{}'", text)))
}

// ==================== Syntax tree ====================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Query {
    Define(Vec<Definable>),
    Undefine(Vec<Definable>),
    Insert(Vec<InsertStatement>),
    Match {
        patterns: Vec<Statement>,
        tail: MatchTail,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Definable {
    Type {
        label: String,
        clauses: Vec<TypeClause>,
    },
    Rule(RuleDef),
    /// `rule label;` inside undefine
    RuleLabel(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TypeClause {
    Sub(String),
    Abstract,
    Value(ValueType),
    Owns(String),
    Relates(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Label {
    Plain(String),
    /// `relation:role`
    Scoped(String, String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Var(String),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Constraint {
    Sub(Label),
    Isa(String),
    Has(String, Operand),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub var: String,
    pub constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AggregateMethod {
    Count,
    Sum,
    Max,
    Min,
    Mean,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Aggregate {
    pub method: AggregateMethod,
    /// Absent for `count`
    pub var: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FetchItem {
    pub var: String,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InsertStatement {
    pub var: String,
    pub value: Option<Value>,
    pub isa: Option<String>,
    pub has: Vec<(String, Operand)>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DeleteStatement {
    Thing(String),
    Has { owner: String, attribute: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MatchTail {
    Get {
        filter: Option<Vec<String>>,
        group: Option<String>,
        aggregate: Option<Aggregate>,
    },
    Fetch(Vec<FetchItem>),
    Insert(Vec<InsertStatement>),
    Delete(Vec<DeleteStatement>),
    Update {
        delete: Vec<DeleteStatement>,
        insert: Vec<InsertStatement>,
    },
}

// ==================== Parser ====================

pub(crate) fn parse(query: &str) -> Result<Query, ServerError> {
    let tokens = tokenize(query)?;
    let mut parser = Parser { tokens, position: 0 };
    let query = parser.query()?;
    if let Some(token) = parser.peek() {
        return Err(syntax_error(format!("Unexpected trailing {:?}", token)));
    }
    Ok(query)
}

/// Parse a rule given as separate `when` and `then` patterns. Surrounding
/// braces on either pattern are optional.
pub(crate) fn parse_rule(label: &str, when: &str, then: &str) -> Result<RuleDef, ServerError> {
    fn body(pattern: &str) -> &str {
        let trimmed = pattern.trim();
        trimmed
            .strip_prefix('{')
            .and_then(|p| p.strip_suffix('}'))
            .unwrap_or(trimmed)
    }

    let text = format!(
        "define rule {}: when {{ {} }} then {{ {} }};",
        label,
        body(when),
        body(then)
    );
    match parse(&text)? {
        Query::Define(mut definables) if definables.len() == 1 => match definables.remove(0) {
            Definable::Rule(rule) if rule.label == label => Ok(rule),
            _ => Err(syntax_error(format!("Invalid rule label '{}'", label))),
        },
        _ => Err(syntax_error(format!("Invalid rule '{}'", label))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Result<Token, ServerError> {
        let token = self
            .tokens
            .get(self.position)
            .cloned()
            .ok_or_else(|| syntax_error("Unexpected end of query"))?;
        self.position += 1;
        Ok(token)
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == word)
    }

    fn peek_punct(&self, punct: char) -> bool {
        self.peek() == Some(&Token::Punct(punct))
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.peek_word(word) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, punct: char) -> bool {
        if self.peek_punct(punct) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<(), ServerError> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(syntax_error(format!("Expected '{}', found {:?}", word, self.peek())))
        }
    }

    fn expect_punct(&mut self, punct: char) -> Result<(), ServerError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(syntax_error(format!("Expected '{}', found {:?}", punct, self.peek())))
        }
    }

    fn label(&mut self) -> Result<String, ServerError> {
        match self.next()? {
            Token::Word(word) => Ok(word),
            other => Err(syntax_error(format!("Expected a label, found {:?}", other))),
        }
    }

    fn var(&mut self) -> Result<String, ServerError> {
        match self.next()? {
            Token::Var(var) => Ok(var),
            other => Err(syntax_error(format!("Expected a variable, found {:?}", other))),
        }
    }

    fn literal(&mut self) -> Result<Value, ServerError> {
        match self.next()? {
            Token::Literal(value) => Ok(value),
            other => Err(syntax_error(format!("Expected a value, found {:?}", other))),
        }
    }

    fn operand(&mut self) -> Result<Operand, ServerError> {
        match self.next()? {
            Token::Var(var) => Ok(Operand::Var(var)),
            Token::Literal(value) => Ok(Operand::Literal(value)),
            other => Err(syntax_error(format!(
                "Expected a variable or value, found {:?}",
                other
            ))),
        }
    }

    fn at_statement_start(&self) -> bool {
        matches!(self.peek(), Some(Token::Var(_)))
    }

    fn query(&mut self) -> Result<Query, ServerError> {
        match self.next()? {
            Token::Word(w) if w == "define" => Ok(Query::Define(self.definables(false)?)),
            Token::Word(w) if w == "undefine" => Ok(Query::Undefine(self.definables(true)?)),
            Token::Word(w) if w == "insert" => Ok(Query::Insert(self.insert_statements()?)),
            Token::Word(w) if w == "match" => self.match_query(),
            other => Err(syntax_error(format!("Unknown query start {:?}", other))),
        }
    }

    // ---- define / undefine ----

    fn definables(&mut self, undefine: bool) -> Result<Vec<Definable>, ServerError> {
        let mut definables = Vec::new();
        while self.peek().is_some() {
            if self.eat_word("rule") {
                let label = self.label()?;
                if undefine {
                    self.expect_punct(';')?;
                    definables.push(Definable::RuleLabel(label));
                } else {
                    definables.push(Definable::Rule(self.rule_body(label)?));
                }
                continue;
            }
            let label = self.label()?;
            let mut clauses = vec![self.type_clause()?];
            while self.eat_punct(',') {
                clauses.push(self.type_clause()?);
            }
            self.expect_punct(';')?;
            definables.push(Definable::Type { label, clauses });
        }
        if definables.is_empty() {
            return Err(syntax_error("Nothing to define"));
        }
        Ok(definables)
    }

    fn type_clause(&mut self) -> Result<TypeClause, ServerError> {
        match self.label()?.as_str() {
            "sub" => Ok(TypeClause::Sub(self.label()?)),
            "abstract" => Ok(TypeClause::Abstract),
            "value" => {
                let name = self.label()?;
                let value_type = name
                    .parse::<ValueType>()
                    .map_err(|_| syntax_error(format!("Unknown value type '{}'", name)))?;
                Ok(TypeClause::Value(value_type))
            }
            "owns" => Ok(TypeClause::Owns(self.label()?)),
            "relates" => Ok(TypeClause::Relates(self.label()?)),
            other => Err(syntax_error(format!("Unknown type property '{}'", other))),
        }
    }

    /// `: when { $x isa T; } then { $x has A value; };`
    fn rule_body(&mut self, label: String) -> Result<RuleDef, ServerError> {
        self.expect_punct(':')?;
        self.expect_word("when")?;
        self.expect_punct('{')?;
        let premise_var = self.var()?;
        self.expect_word("isa")?;
        let premise = self.label()?;
        self.expect_punct(';')?;
        self.expect_punct('}')?;

        self.expect_word("then")?;
        self.expect_punct('{')?;
        let conclusion_var = self.var()?;
        if conclusion_var != premise_var {
            return Err(syntax_error(format!(
                "Rule '{}' concludes about ${} but matches ${}",
                label, conclusion_var, premise_var
            )));
        }
        self.expect_word("has")?;
        let attribute = self.label()?;
        let value = self.literal()?;
        self.expect_punct(';')?;
        self.expect_punct('}')?;
        self.expect_punct(';')?;

        Ok(RuleDef {
            label,
            premise,
            attribute,
            value,
        })
    }

    // ---- match ----

    fn match_query(&mut self) -> Result<Query, ServerError> {
        let mut patterns = Vec::new();
        while self.at_statement_start() {
            patterns.push(self.statement()?);
        }
        if patterns.is_empty() {
            return Err(syntax_error("A match clause needs at least one pattern"));
        }

        let tail = if self.eat_word("fetch") {
            MatchTail::Fetch(self.fetch_items()?)
        } else if self.eat_word("insert") {
            MatchTail::Insert(self.insert_statements()?)
        } else if self.eat_word("delete") {
            let delete = self.delete_statements()?;
            if self.eat_word("insert") {
                MatchTail::Update {
                    delete,
                    insert: self.insert_statements()?,
                }
            } else {
                MatchTail::Delete(delete)
            }
        } else {
            self.get_tail()?
        };
        Ok(Query::Match { patterns, tail })
    }

    fn statement(&mut self) -> Result<Statement, ServerError> {
        let var = self.var()?;
        let mut constraints = vec![self.constraint()?];
        while self.eat_punct(',') {
            constraints.push(self.constraint()?);
        }
        self.expect_punct(';')?;
        Ok(Statement { var, constraints })
    }

    fn constraint(&mut self) -> Result<Constraint, ServerError> {
        match self.label()?.as_str() {
            "sub" => {
                let label = self.label()?;
                if self.eat_punct(':') {
                    Ok(Constraint::Sub(Label::Scoped(label, self.label()?)))
                } else {
                    Ok(Constraint::Sub(Label::Plain(label)))
                }
            }
            "isa" => Ok(Constraint::Isa(self.label()?)),
            "has" => {
                let attribute = self.label()?;
                Ok(Constraint::Has(attribute, self.operand()?))
            }
            other => Err(syntax_error(format!("Unknown constraint '{}'", other))),
        }
    }

    fn var_list(&mut self) -> Result<Vec<String>, ServerError> {
        let mut vars = Vec::new();
        if matches!(self.peek(), Some(Token::Var(_))) {
            vars.push(self.var()?);
            while self.eat_punct(',') {
                vars.push(self.var()?);
            }
        }
        Ok(vars)
    }

    fn get_tail(&mut self) -> Result<MatchTail, ServerError> {
        let mut filter = None;
        if self.eat_word("get") {
            let vars = self.var_list()?;
            self.expect_punct(';')?;
            if !vars.is_empty() {
                filter = Some(vars);
            }
        }

        let mut group = None;
        if self.eat_word("group") {
            group = Some(self.var()?);
            self.expect_punct(';')?;
        }

        let aggregate = match self.peek() {
            Some(Token::Word(word)) => {
                let method = match word.as_str() {
                    "count" => AggregateMethod::Count,
                    "sum" => AggregateMethod::Sum,
                    "max" => AggregateMethod::Max,
                    "min" => AggregateMethod::Min,
                    "mean" => AggregateMethod::Mean,
                    other => return Err(syntax_error(format!("Unknown modifier '{}'", other))),
                };
                self.position += 1;
                let var = if method == AggregateMethod::Count {
                    None
                } else {
                    Some(self.var()?)
                };
                self.expect_punct(';')?;
                Some(Aggregate { method, var })
            }
            _ => None,
        };

        Ok(MatchTail::Get {
            filter,
            group,
            aggregate,
        })
    }

    fn fetch_items(&mut self) -> Result<Vec<FetchItem>, ServerError> {
        let mut items = Vec::new();
        while self.at_statement_start() {
            let var = self.var()?;
            let mut attributes = Vec::new();
            if self.eat_punct(':') {
                attributes.push(self.label()?);
                while self.eat_punct(',') {
                    attributes.push(self.label()?);
                }
            }
            self.expect_punct(';')?;
            items.push(FetchItem { var, attributes });
        }
        if items.is_empty() {
            return Err(syntax_error("Nothing to fetch"));
        }
        Ok(items)
    }

    fn insert_statements(&mut self) -> Result<Vec<InsertStatement>, ServerError> {
        let mut statements = Vec::new();
        while self.at_statement_start() {
            let var = self.var()?;
            let value = match self.peek() {
                Some(Token::Literal(_)) => Some(self.literal()?),
                _ => None,
            };
            let mut statement = InsertStatement {
                var,
                value,
                isa: None,
                has: Vec::new(),
            };
            loop {
                if self.eat_word("isa") {
                    statement.isa = Some(self.label()?);
                } else if self.eat_word("has") {
                    let attribute = self.label()?;
                    statement.has.push((attribute, self.operand()?));
                } else {
                    return Err(syntax_error(format!(
                        "Expected 'isa' or 'has', found {:?}",
                        self.peek()
                    )));
                }
                if !self.eat_punct(',') {
                    break;
                }
            }
            self.expect_punct(';')?;
            statements.push(statement);
        }
        if statements.is_empty() {
            return Err(syntax_error("Nothing to insert"));
        }
        Ok(statements)
    }

    fn delete_statements(&mut self) -> Result<Vec<DeleteStatement>, ServerError> {
        let mut statements = Vec::new();
        while self.at_statement_start() {
            let var = self.var()?;
            loop {
                if self.eat_word("isa") {
                    self.label()?;
                    statements.push(DeleteStatement::Thing(var.clone()));
                } else if self.eat_word("has") {
                    // `has $a` or `has label $a`
                    let attribute = match self.next()? {
                        Token::Var(attribute) => attribute,
                        Token::Word(_) => self.var()?,
                        other => {
                            return Err(syntax_error(format!(
                                "Expected an attribute variable, found {:?}",
                                other
                            )))
                        }
                    };
                    statements.push(DeleteStatement::Has {
                        owner: var.clone(),
                        attribute,
                    });
                } else {
                    return Err(syntax_error(format!(
                        "Expected 'isa' or 'has', found {:?}",
                        self.peek()
                    )));
                }
                if !self.eat_punct(',') {
                    break;
                }
            }
            self.expect_punct(';')?;
        }
        if statements.is_empty() {
            return Err(syntax_error("Nothing to delete"));
        }
        Ok(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_define() {
        let query = parse(
            "define name sub attribute, value string; person sub entity, owns name;
             rule anon: when { $x isa person; } then { $x has name \"Anonymous\"; };",
        )
        .unwrap();

        let Query::Define(definables) = query else {
            panic!("expected define");
        };
        assert_eq!(definables.len(), 3);
        assert_eq!(
            definables[0],
            Definable::Type {
                label: "name".to_string(),
                clauses: vec![
                    TypeClause::Sub("attribute".to_string()),
                    TypeClause::Value(ValueType::String),
                ],
            }
        );
        match &definables[2] {
            Definable::Rule(rule) => {
                assert_eq!(rule.premise, "person");
                assert_eq!(rule.value, Value::from("Anonymous"));
            }
            other => panic!("expected rule, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_match_with_modifiers() {
        let query = parse("match $x isa person, has age $a; get $a; group $x; max $a;").unwrap();
        let Query::Match { patterns, tail } = query else {
            panic!("expected match");
        };
        assert_eq!(patterns[0].var, "x");
        assert_eq!(
            patterns[0].constraints[1],
            Constraint::Has("age".to_string(), Operand::Var("a".to_string()))
        );
        assert_eq!(
            tail,
            MatchTail::Get {
                filter: Some(vec!["a".to_string()]),
                group: Some("x".to_string()),
                aggregate: Some(Aggregate {
                    method: AggregateMethod::Max,
                    var: Some("a".to_string()),
                }),
            }
        );
    }

    #[test]
    fn test_parse_scoped_label_and_literals() {
        let query = parse("match $r sub relation:role;").unwrap();
        let Query::Match { patterns, .. } = query else {
            panic!("expected match");
        };
        assert_eq!(
            patterns[0].constraints[0],
            Constraint::Sub(Label::Scoped("relation".to_string(), "role".to_string()))
        );

        let query = parse("insert $x isa event, has at 2024-01-02T03:04:05, has weight 1.5;").unwrap();
        let Query::Insert(statements) = query else {
            panic!("expected insert");
        };
        assert!(matches!(statements[0].has[0].1, Operand::Literal(Value::DateTime(_))));
        assert_eq!(statements[0].has[1].1, Operand::Literal(Value::Double(1.5)));
    }

    #[test]
    fn test_parse_update() {
        let query = parse(
            "match $x isa person, has name $n; delete $x has $n; insert $x has name \"Bob\";",
        )
        .unwrap();
        assert!(matches!(
            query,
            Query::Match {
                tail: MatchTail::Update { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_syntax_errors() {
        for query in ["match;", "define person sub;", "match $x isa person; get $x", "select *"] {
            let err = parse(query).unwrap_err();
            assert_eq!(err.code, ServerErrorCode::QuerySyntax, "{}", query);
        }
    }

    #[test]
    fn test_parse_rule_from_patterns() {
        let rule = parse_rule("anon", "{ $x isa person; }", "$x has name \"Anonymous\";").unwrap();
        assert_eq!(rule.label, "anon");
        assert_eq!(rule.premise, "person");
        assert_eq!(rule.attribute, "name");
        assert_eq!(rule.when_text(), "$x isa person;");

        for (label, when, then) in [
            ("anon", "$x isa person;", "$y has name \"A\";"),
            ("two words", "$x isa person;", "$x has name \"A\";"),
            ("", "$x isa person;", "$x has name \"A\";"),
        ] {
            let err = parse_rule(label, when, then).unwrap_err();
            assert_eq!(err.code, ServerErrorCode::QuerySyntax, "{:?}", label);
        }
    }
}
