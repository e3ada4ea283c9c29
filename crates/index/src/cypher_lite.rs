//! A small read-only Cypher dialect evaluated against the in-memory graph.
//!
//! This is not a Cypher engine. It answers the query shapes the router's
//! decision step and keyword templates produce, so the memory backend can
//! stand in for Neo4j in tests and single-process runs. Queries that pass
//! here may still behave differently on Neo4j.
//!
//! Supported:
//! - one or more `MATCH` clauses of node/relationship chains with labels,
//!   inline property maps, `|`-separated relationship types, directed or
//!   undirected single hops
//! - `WHERE` with `AND`/`OR`/`NOT`, `=`/`<>`/`<`/`>`/`<=`/`>=`, `CONTAINS`,
//!   `STARTS WITH`, `ENDS WITH`, `IN [...]`, `IS [NOT] NULL`
//! - `RETURN [DISTINCT]` of variables, properties, `type(r)`,
//!   `toLower`/`toUpper`/`trim`, `count(...)` and `collect(...)` with `AS`
//!   aliases
//! - `ORDER BY` (aliases allowed) `ASC`/`DESC`, `SKIP`, `LIMIT`
//! - `//` and `/* */` comments
//!
//! Not supported: `OPTIONAL MATCH`, `WITH`, `UNWIND`, variable-length paths,
//! parameters, arithmetic, and every write or procedure clause. All
//! property values are strings, so comparisons are lexical.

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::graph_store::Record;

/// Clauses that modify the graph or escape the query sandbox
const WRITE_CLAUSES: &[&str] = &[
    "CREATE", "MERGE", "DELETE", "DETACH", "SET", "REMOVE", "DROP", "LOAD", "CALL", "FOREACH",
];

/// Reject queries containing a write clause outside string literals and comments.
pub fn ensure_read_only(query: &str) -> Result<(), String> {
    let mut chars = query.char_indices().peekable();
    let mut previous_significant = ' ';

    while let Some((_, c)) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                let mut escaped = false;
                for (_, inner) in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if inner == '\\' && c != '`' {
                        escaped = true;
                    } else if inner == c {
                        break;
                    }
                }
                previous_significant = c;
            }
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                for (_, inner) in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut star = false;
                for (_, inner) in chars.by_ref() {
                    if star && inner == '/' {
                        break;
                    }
                    star = inner == '*';
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // `n.set` is a property, not a clause
                let upper = word.to_ascii_uppercase();
                if previous_significant != '.' && WRITE_CLAUSES.contains(&upper.as_str()) {
                    return Err(format!("write clause {upper} is not allowed in a read query"));
                }
                previous_significant = 'a';
            }
            c if c.is_whitespace() => {}
            c => previous_significant = c,
        }
    }

    Ok(())
}

/// Stored form of a node as the evaluator sees it
#[derive(Debug, Clone)]
pub struct NodeView<'a> {
    pub label: &'a str,
    pub props: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct EdgeView<'a> {
    pub source: usize,
    pub target: usize,
    pub rel_type: &'a str,
    pub props: &'a BTreeMap<String, String>,
}

/// Parse and run a query against a graph snapshot
pub fn run(
    text: &str,
    nodes: &[NodeView<'_>],
    edges: &[EdgeView<'_>],
) -> Result<Vec<Record>, String> {
    ensure_read_only(text)?;
    let query = parse(text)?;
    Evaluator { nodes, edges }.execute(&query)
}

// ---------------------------------------------------------------------------
// Lexer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(String),
    Param(String),
    Sym(&'static str),
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() || c == ';' {
            i += 1;
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i += 2;
            continue;
        }

        if c == '\'' || c == '"' {
            let mut value = String::new();
            i += 1;
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err("unterminated string literal".to_string());
                };
                i += 1;
                match ch {
                    '\\' => {
                        let escaped = chars.get(i).copied().unwrap_or('\\');
                        i += 1;
                        value.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                    ch if ch == c => break,
                    ch => value.push(ch),
                }
            }
            tokens.push(Token::Str(value));
            continue;
        }

        if c == '`' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|&ch| ch == '`')
                .map(|p| start + p)
                .ok_or("unterminated quoted identifier")?;
            tokens.push(Token::Ident(chars[start..end].iter().collect()));
            i = end + 1;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        if c == '$' {
            let start = i + 1;
            i = start;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Param(chars[start..i].iter().collect()));
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()) {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            tokens.push(Token::Num(chars[start..i].iter().collect()));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (sym, width) = match (c, next) {
            ('<', Some('>')) => ("<>", 2),
            ('<', Some('=')) => ("<=", 2),
            ('>', Some('=')) => (">=", 2),
            ('!', Some('=')) => ("<>", 2),
            ('(', _) => ("(", 1),
            (')', _) => (")", 1),
            ('[', _) => ("[", 1),
            (']', _) => ("]", 1),
            ('{', _) => ("{", 1),
            ('}', _) => ("}", 1),
            (':', _) => (":", 1),
            (',', _) => (",", 1),
            ('.', _) => (".", 1),
            ('-', _) => ("-", 1),
            ('<', _) => ("<", 1),
            ('>', _) => (">", 1),
            ('=', _) => ("=", 1),
            ('*', _) => ("*", 1),
            ('|', _) => ("|", 1),
            _ => return Err(format!("unexpected character {c:?}")),
        };
        tokens.push(Token::Sym(sym));
        i += width;
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Syntax tree

#[derive(Debug, Clone)]
struct Query {
    patterns: Vec<Pattern>,
    filter: Option<Condition>,
    distinct: bool,
    items: Vec<ReturnItem>,
    order: Vec<(Expr, bool)>,
    skip: usize,
    limit: Option<usize>,
}

#[derive(Debug, Clone)]
struct Pattern {
    start: NodePattern,
    steps: Vec<(RelPattern, NodePattern)>,
}

#[derive(Debug, Clone, Default)]
struct NodePattern {
    var: Option<String>,
    labels: Vec<String>,
    props: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Direction {
    Out,
    In,
    Either,
}

#[derive(Debug, Clone)]
struct RelPattern {
    var: Option<String>,
    types: Vec<String>,
    props: Vec<(String, Value)>,
    direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
    In,
}

#[derive(Debug, Clone)]
enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Compare(Expr, CompareOp, Expr),
    IsNull(Expr, bool),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AggregateFn {
    Count,
    Collect,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Var(String),
    Prop(String, String),
    Func(String, Box<Expr>),
    Aggregate {
        func: AggregateFn,
        distinct: bool,
        arg: Option<Box<Expr>>,
    },
}

impl Expr {
    fn is_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Func(_, inner) => inner.is_aggregate(),
            _ => false,
        }
    }

    /// Column name Neo4j would give this expression
    fn render(&self) -> String {
        match self {
            Expr::Literal(Value::String(s)) => format!("'{s}'"),
            Expr::Literal(v) => v.to_string(),
            Expr::Var(v) => v.clone(),
            Expr::Prop(v, p) => format!("{v}.{p}"),
            Expr::Func(name, arg) => format!("{name}({})", arg.render()),
            Expr::Aggregate { func, distinct, arg } => {
                let name = match func {
                    AggregateFn::Count => "count",
                    AggregateFn::Collect => "collect",
                };
                let inner = arg.as_ref().map_or("*".to_string(), |a| a.render());
                if *distinct {
                    format!("{name}(DISTINCT {inner})")
                } else {
                    format!("{name}({inner})")
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct ReturnItem {
    expr: Expr,
    text: String,
    name: String,
}

// ---------------------------------------------------------------------------
// Parser

fn parse(text: &str) -> Result<Query, String> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let query = parser.query()?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected {token:?} after end of query"));
    }
    Ok(query)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn is_keyword_at(&self, offset: usize, keyword: &str) -> bool {
        matches!(
            self.peek_at(offset),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword)
        )
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword_at(0, keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), String> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(format!("expected {keyword}, found {:?}", self.peek()))
        }
    }

    fn is_sym(&self, sym: &str) -> bool {
        matches!(self.peek(), Some(Token::Sym(s)) if *s == sym)
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if self.is_sym(sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: &str) -> Result<(), String> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(format!("expected '{sym}', found {:?}", self.peek()))
        }
    }

    fn ident(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            other => Err(format!("expected identifier, found {other:?}")),
        }
    }

    fn number(&mut self) -> Result<usize, String> {
        match self.next() {
            Some(Token::Num(n)) => n.parse().map_err(|_| format!("expected an integer, found {n}")),
            other => Err(format!("expected a number, found {other:?}")),
        }
    }

    fn query(&mut self) -> Result<Query, String> {
        let mut patterns = Vec::new();
        if !self.is_keyword_at(0, "MATCH") {
            return Err("query must start with MATCH".to_string());
        }
        while self.eat_keyword("MATCH") {
            patterns.push(self.pattern()?);
            while self.eat_sym(",") {
                patterns.push(self.pattern()?);
            }
        }

        let filter = if self.eat_keyword("WHERE") {
            Some(self.condition()?)
        } else {
            None
        };

        self.expect_keyword("RETURN")?;
        let distinct = self.eat_keyword("DISTINCT");
        if self.is_sym("*") {
            return Err("RETURN * is not supported".to_string());
        }
        let mut items = vec![self.return_item()?];
        while self.eat_sym(",") {
            items.push(self.return_item()?);
        }

        let mut order = Vec::new();
        if self.is_keyword_at(0, "ORDER") {
            self.pos += 1;
            self.expect_keyword("BY")?;
            loop {
                let expr = self.expr()?;
                let descending = if self.eat_keyword("DESC") || self.eat_keyword("DESCENDING") {
                    true
                } else {
                    let _ = self.eat_keyword("ASC") || self.eat_keyword("ASCENDING");
                    false
                };
                order.push((expr, descending));
                if !self.eat_sym(",") {
                    break;
                }
            }
        }

        let skip = if self.eat_keyword("SKIP") { self.number()? } else { 0 };
        let limit = if self.eat_keyword("LIMIT") {
            Some(self.number()?)
        } else {
            None
        };

        Ok(Query {
            patterns,
            filter,
            distinct,
            items,
            order,
            skip,
            limit,
        })
    }

    fn pattern(&mut self) -> Result<Pattern, String> {
        let start = self.node_pattern()?;
        let mut steps = Vec::new();
        while self.is_sym("-") || self.is_sym("<") {
            let rel = self.rel_pattern()?;
            let node = self.node_pattern()?;
            steps.push((rel, node));
        }
        Ok(Pattern { start, steps })
    }

    fn node_pattern(&mut self) -> Result<NodePattern, String> {
        self.expect_sym("(")?;
        let mut node = NodePattern::default();
        if let Some(Token::Ident(_)) = self.peek() {
            node.var = Some(self.ident()?);
        }
        while self.eat_sym(":") {
            node.labels.push(self.ident()?);
        }
        if self.is_sym("{") {
            node.props = self.property_map()?;
        }
        self.expect_sym(")")?;
        Ok(node)
    }

    fn rel_pattern(&mut self) -> Result<RelPattern, String> {
        let incoming = self.eat_sym("<");
        self.expect_sym("-")?;

        let mut rel = RelPattern {
            var: None,
            types: Vec::new(),
            props: Vec::new(),
            direction: Direction::Either,
        };

        if self.eat_sym("[") {
            if let Some(Token::Ident(_)) = self.peek() {
                rel.var = Some(self.ident()?);
            }
            if self.eat_sym(":") {
                rel.types.push(self.ident()?);
                while self.eat_sym("|") {
                    self.eat_sym(":");
                    rel.types.push(self.ident()?);
                }
            }
            if self.is_sym("*") {
                return Err("variable-length relationships are not supported".to_string());
            }
            if self.is_sym("{") {
                rel.props = self.property_map()?;
            }
            self.expect_sym("]")?;
        }

        self.expect_sym("-")?;
        let outgoing = self.eat_sym(">");

        rel.direction = match (incoming, outgoing) {
            (true, false) => Direction::In,
            (false, true) => Direction::Out,
            (false, false) => Direction::Either,
            (true, true) => return Err("relationship cannot point both ways".to_string()),
        };
        Ok(rel)
    }

    fn property_map(&mut self) -> Result<Vec<(String, Value)>, String> {
        self.expect_sym("{")?;
        let mut props = Vec::new();
        if self.eat_sym("}") {
            return Ok(props);
        }
        loop {
            let key = self.ident()?;
            self.expect_sym(":")?;
            let value = self.literal()?;
            props.push((key, value));
            if self.eat_sym("}") {
                return Ok(props);
            }
            self.expect_sym(",")?;
        }
    }

    fn literal(&mut self) -> Result<Value, String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Num(n)) => number_value(&n),
            Some(Token::Sym("-")) => match self.next() {
                Some(Token::Num(n)) => number_value(&format!("-{n}")),
                other => Err(format!("expected a number after '-', found {other:?}")),
            },
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("false") => {
                Ok(Value::Bool(false))
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("null") => Ok(Value::Null),
            Some(Token::Param(name)) => {
                Err(format!("query parameters are not supported (${name})"))
            }
            other => Err(format!("expected a literal, found {other:?}")),
        }
    }

    fn condition(&mut self) -> Result<Condition, String> {
        let mut terms = vec![self.and_condition()?];
        while self.eat_keyword("OR") {
            terms.push(self.and_condition()?);
        }
        Ok(if terms.len() == 1 { terms.remove(0) } else { Condition::Or(terms) })
    }

    fn and_condition(&mut self) -> Result<Condition, String> {
        let mut terms = vec![self.unary_condition()?];
        while self.eat_keyword("AND") {
            terms.push(self.unary_condition()?);
        }
        Ok(if terms.len() == 1 { terms.remove(0) } else { Condition::And(terms) })
    }

    fn unary_condition(&mut self) -> Result<Condition, String> {
        if self.eat_keyword("NOT") {
            return Ok(Condition::Not(Box::new(self.unary_condition()?)));
        }
        if self.eat_sym("(") {
            let inner = self.condition()?;
            self.expect_sym(")")?;
            return Ok(inner);
        }

        let left = self.expr()?;

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Condition::IsNull(left, negated));
        }

        let op = if self.eat_sym("=") {
            CompareOp::Eq
        } else if self.eat_sym("<>") {
            CompareOp::Ne
        } else if self.eat_sym("<=") {
            CompareOp::Le
        } else if self.eat_sym(">=") {
            CompareOp::Ge
        } else if self.eat_sym("<") {
            CompareOp::Lt
        } else if self.eat_sym(">") {
            CompareOp::Gt
        } else if self.eat_keyword("CONTAINS") {
            CompareOp::Contains
        } else if self.eat_keyword("IN") {
            CompareOp::In
        } else if self.is_keyword_at(0, "STARTS") {
            self.pos += 1;
            self.expect_keyword("WITH")?;
            CompareOp::StartsWith
        } else if self.is_keyword_at(0, "ENDS") {
            self.pos += 1;
            self.expect_keyword("WITH")?;
            CompareOp::EndsWith
        } else {
            return Err(format!("expected a comparison, found {:?}", self.peek()));
        };

        let right = if op == CompareOp::In { self.list()? } else { self.expr()? };
        Ok(Condition::Compare(left, op, right))
    }

    fn list(&mut self) -> Result<Expr, String> {
        self.expect_sym("[")?;
        let mut values = Vec::new();
        if !self.eat_sym("]") {
            loop {
                values.push(self.literal()?);
                if self.eat_sym("]") {
                    break;
                }
                self.expect_sym(",")?;
            }
        }
        Ok(Expr::Literal(Value::Array(values)))
    }

    fn expr(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some(Token::Ident(word))
                if !["true", "false", "null"].contains(&word.to_ascii_lowercase().as_str()) =>
            {
                let name = self.ident()?;
                if self.eat_sym("(") {
                    return self.call(name);
                }
                if self.eat_sym(".") {
                    let property = self.ident()?;
                    return Ok(Expr::Prop(name, property));
                }
                Ok(Expr::Var(name))
            }
            _ => self.literal().map(Expr::Literal),
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, String> {
        let lowered = name.to_ascii_lowercase();
        let aggregate = match lowered.as_str() {
            "count" => Some(AggregateFn::Count),
            "collect" => Some(AggregateFn::Collect),
            _ => None,
        };

        if let Some(func) = aggregate {
            let distinct = self.eat_keyword("DISTINCT");
            let arg = if func == AggregateFn::Count && self.eat_sym("*") {
                None
            } else {
                Some(Box::new(self.expr()?))
            };
            self.expect_sym(")")?;
            return Ok(Expr::Aggregate { func, distinct, arg });
        }

        const SCALAR_FUNCTIONS: &[&str] =
            &["type", "tolower", "toupper", "lower", "upper", "trim", "tostring"];
        if !SCALAR_FUNCTIONS.contains(&lowered.as_str()) {
            return Err(format!("unsupported function {name}()"));
        }
        let arg = self.expr()?;
        self.expect_sym(")")?;
        Ok(Expr::Func(name, Box::new(arg)))
    }

    fn return_item(&mut self) -> Result<ReturnItem, String> {
        let expr = self.expr()?;
        let text = expr.render();
        let name = if self.eat_keyword("AS") { self.ident()? } else { text.clone() };
        Ok(ReturnItem { expr, text, name })
    }
}

fn number_value(raw: &str) -> Result<Value, String> {
    if let Ok(int) = raw.parse::<i64>() {
        return Ok(Value::from(int));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("invalid number {raw}"))
}

// ---------------------------------------------------------------------------
// Evaluation

#[derive(Debug, Clone, Copy, PartialEq)]
enum Bound {
    Node(usize),
    Edge(usize),
}

type Row = HashMap<String, Bound>;

struct Evaluator<'g, 'a> {
    nodes: &'g [NodeView<'a>],
    edges: &'g [EdgeView<'a>],
}

impl Evaluator<'_, '_> {
    fn execute(&self, query: &Query) -> Result<Vec<Record>, String> {
        let mut rows = vec![Row::new()];
        for pattern in &query.patterns {
            let mut extended = Vec::new();
            for row in rows {
                self.match_pattern(pattern, row, &mut extended);
            }
            rows = extended;
        }

        if let Some(filter) = &query.filter {
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                if self.test(filter, &row)? {
                    kept.push(row);
                }
            }
            rows = kept;
        }

        let mut records = if query.items.iter().any(|item| item.expr.is_aggregate()) {
            self.aggregate(&query.items, &rows)?
        } else {
            rows.iter()
                .map(|row| self.project(&query.items, row))
                .collect::<Result<Vec<_>, _>>()?
        };

        if query.distinct {
            let mut seen = HashSet::new();
            records.retain(|record| seen.insert(Value::Object(record.clone()).to_string()));
        }

        if !query.order.is_empty() {
            let mut keys = Vec::with_capacity(query.order.len());
            for (expr, descending) in &query.order {
                let text = expr.render();
                let column = query
                    .items
                    .iter()
                    .find(|item| item.name == text || item.text == text)
                    .map(|item| item.name.clone())
                    .ok_or_else(|| format!("ORDER BY {text} must refer to a returned column"))?;
                keys.push((column, *descending));
            }
            records.sort_by(|a, b| {
                keys.iter()
                    .map(|(column, descending)| {
                        let ordering = compare_for_sort(a.get(column), b.get(column));
                        if *descending { ordering.reverse() } else { ordering }
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let records = records.into_iter().skip(query.skip);
        Ok(match query.limit {
            Some(limit) => records.take(limit).collect(),
            None => records.collect(),
        })
    }

    fn match_pattern(&self, pattern: &Pattern, row: Row, out: &mut Vec<Row>) {
        let candidates: Vec<usize> = match pattern.start.var.as_ref().and_then(|v| row.get(v)) {
            Some(Bound::Node(index)) => vec![*index],
            Some(Bound::Edge(_)) => Vec::new(),
            None => (0..self.nodes.len()).collect(),
        };

        for index in candidates {
            if !self.node_matches(&pattern.start, index) {
                continue;
            }
            let mut bound = row.clone();
            if let Some(var) = &pattern.start.var {
                bound.insert(var.clone(), Bound::Node(index));
            }
            self.walk(&pattern.steps, index, bound, &mut Vec::new(), out);
        }
    }

    fn walk(
        &self,
        steps: &[(RelPattern, NodePattern)],
        current: usize,
        row: Row,
        used: &mut Vec<usize>,
        out: &mut Vec<Row>,
    ) {
        let Some(((rel, node), rest)) = steps.split_first() else {
            out.push(row);
            return;
        };

        for (edge_index, edge) in self.edges.iter().enumerate() {
            if used.contains(&edge_index) {
                continue;
            }
            if !rel.types.is_empty() && !rel.types.iter().any(|t| t == edge.rel_type) {
                continue;
            }
            if !props_match(&rel.props, edge.props) {
                continue;
            }
            if let Some(Bound::Edge(bound)) = rel.var.as_ref().and_then(|v| row.get(v)) {
                if *bound != edge_index {
                    continue;
                }
            }

            let next = match rel.direction {
                Direction::Out => (edge.source == current).then_some(edge.target),
                Direction::In => (edge.target == current).then_some(edge.source),
                Direction::Either if edge.source == current => Some(edge.target),
                Direction::Either if edge.target == current => Some(edge.source),
                Direction::Either => None,
            };
            let Some(next) = next else { continue };

            if !self.node_matches(node, next) {
                continue;
            }
            if let Some(existing) = node.var.as_ref().and_then(|v| row.get(v)) {
                if *existing != Bound::Node(next) {
                    continue;
                }
            }

            let mut bound = row.clone();
            if let Some(var) = &rel.var {
                bound.insert(var.clone(), Bound::Edge(edge_index));
            }
            if let Some(var) = &node.var {
                bound.insert(var.clone(), Bound::Node(next));
            }

            used.push(edge_index);
            self.walk(rest, next, bound, used, out);
            used.pop();
        }
    }

    fn node_matches(&self, pattern: &NodePattern, index: usize) -> bool {
        let node = &self.nodes[index];
        pattern.labels.iter().all(|label| label == node.label)
            && props_match(&pattern.props, node.props)
    }

    fn test(&self, condition: &Condition, row: &Row) -> Result<bool, String> {
        Ok(match condition {
            Condition::And(terms) => {
                for term in terms {
                    if !self.test(term, row)? {
                        return Ok(false);
                    }
                }
                true
            }
            Condition::Or(terms) => {
                for term in terms {
                    if self.test(term, row)? {
                        return Ok(true);
                    }
                }
                false
            }
            Condition::Not(inner) => !self.test(inner, row)?,
            Condition::IsNull(expr, negated) => self.eval(expr, row)?.is_null() != *negated,
            Condition::Compare(left, op, right) => {
                compare(&self.eval(left, row)?, *op, &self.eval(right, row)?)
            }
        })
    }

    fn eval(&self, expr: &Expr, row: &Row) -> Result<Value, String> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(var) => match row.get(var) {
                Some(Bound::Node(index)) => Ok(props_object(self.nodes[*index].props)),
                Some(Bound::Edge(index)) => Ok(props_object(self.edges[*index].props)),
                None => Err(format!("variable `{var}` not defined")),
            },
            Expr::Prop(var, property) => {
                let props = match row.get(var) {
                    Some(Bound::Node(index)) => self.nodes[*index].props,
                    Some(Bound::Edge(index)) => self.edges[*index].props,
                    None => return Err(format!("variable `{var}` not defined")),
                };
                Ok(props.get(property).cloned().map_or(Value::Null, Value::String))
            }
            Expr::Func(name, arg) => {
                let lowered = name.to_ascii_lowercase();
                if lowered == "type" {
                    return match arg.as_ref() {
                        Expr::Var(var) => match row.get(var) {
                            Some(Bound::Edge(index)) => {
                                Ok(Value::String(self.edges[*index].rel_type.to_string()))
                            }
                            _ => Err(format!("type() expects a relationship, got `{var}`")),
                        },
                        _ => Err("type() expects a relationship variable".to_string()),
                    };
                }
                Ok(apply_function(&lowered, self.eval(arg, row)?))
            }
            Expr::Aggregate { .. } => Err("aggregate used outside RETURN".to_string()),
        }
    }

    fn project(&self, items: &[ReturnItem], row: &Row) -> Result<Record, String> {
        let mut record = Map::new();
        for item in items {
            record.insert(item.name.clone(), self.eval(&item.expr, row)?);
        }
        Ok(record)
    }

    /// Group by the non-aggregate columns, in order of first appearance
    fn aggregate(&self, items: &[ReturnItem], rows: &[Row]) -> Result<Vec<Record>, String> {
        let mut groups: Vec<(Vec<Value>, Vec<&Row>)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for row in rows {
            let mut key = Vec::new();
            for item in items.iter().filter(|item| !item.expr.is_aggregate()) {
                key.push(self.eval(&item.expr, row)?);
            }
            let fingerprint = Value::Array(key.clone()).to_string();
            match positions.get(&fingerprint) {
                Some(&position) => groups[position].1.push(row),
                None => {
                    positions.insert(fingerprint, groups.len());
                    groups.push((key, vec![row]));
                }
            }
        }

        // aggregates over nothing still produce one row
        if groups.is_empty() && items.iter().all(|item| item.expr.is_aggregate()) {
            groups.push((Vec::new(), Vec::new()));
        }

        let mut records = Vec::with_capacity(groups.len());
        for (key, members) in groups {
            let mut record = Map::new();
            let mut key_values = key.into_iter();
            for item in items {
                let value = if item.expr.is_aggregate() {
                    self.eval_aggregate(&item.expr, &members)?
                } else {
                    key_values.next().unwrap_or(Value::Null)
                };
                record.insert(item.name.clone(), value);
            }
            records.push(record);
        }
        Ok(records)
    }

    fn eval_aggregate(&self, expr: &Expr, rows: &[&Row]) -> Result<Value, String> {
        match expr {
            Expr::Func(name, inner) => {
                let value = self.eval_aggregate(inner, rows)?;
                Ok(apply_function(&name.to_ascii_lowercase(), value))
            }
            Expr::Aggregate { func, distinct, arg } => {
                let mut values = Vec::new();
                match arg {
                    None => values.extend(rows.iter().map(|_| Value::Bool(true))),
                    Some(arg) => {
                        for row in rows {
                            let value = self.eval(arg, row)?;
                            if !value.is_null() {
                                values.push(value);
                            }
                        }
                    }
                }
                if *distinct {
                    let mut seen = HashSet::new();
                    values.retain(|v| seen.insert(v.to_string()));
                }
                Ok(match func {
                    AggregateFn::Count => Value::from(values.len() as u64),
                    AggregateFn::Collect => Value::Array(values),
                })
            }
            other => Err(format!("{} is not an aggregate", other.render())),
        }
    }
}

fn props_match(expected: &[(String, Value)], actual: &BTreeMap<String, String>) -> bool {
    expected.iter().all(|(key, value)| match (actual.get(key), value) {
        (Some(stored), Value::String(wanted)) => stored == wanted,
        _ => false,
    })
}

fn props_object(props: &BTreeMap<String, String>) -> Value {
    Value::Object(
        props
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn apply_function(name: &str, value: Value) -> Value {
    match (name, value) {
        ("tolower" | "lower", Value::String(s)) => Value::String(s.to_lowercase()),
        ("toupper" | "upper", Value::String(s)) => Value::String(s.to_uppercase()),
        ("trim", Value::String(s)) => Value::String(s.trim().to_string()),
        ("tostring", Value::Null) => Value::Null,
        ("tostring", Value::String(s)) => Value::String(s),
        ("tostring", other) => Value::String(other.to_string()),
        (_, other) => other,
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        return false;
    }
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::In => right
            .as_array()
            .is_some_and(|list| list.iter().any(|v| values_equal(left, v))),
        CompareOp::Contains | CompareOp::StartsWith | CompareOp::EndsWith => {
            match (left.as_str(), right.as_str()) {
                (Some(l), Some(r)) => match op {
                    CompareOp::Contains => l.contains(r),
                    CompareOp::StartsWith => l.starts_with(r),
                    _ => l.ends_with(r),
                },
                _ => false,
            }
        }
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a.as_f64().partial_cmp(&b.as_f64()),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match ordering {
                Some(o) => match op {
                    CompareOp::Lt => o == Ordering::Less,
                    CompareOp::Le => o != Ordering::Greater,
                    CompareOp::Gt => o == Ordering::Greater,
                    _ => o != Ordering::Less,
                },
                None => false,
            }
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Nulls sort last, numbers numerically, everything else by text
fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
