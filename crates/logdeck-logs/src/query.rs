//! Filter query language evaluated against one structured entry.
//!
//! A query is a `;` separated list of expressions; an entry is kept when
//! every expression matches. Expressions support `&&`, `||`, `!`,
//! parentheses and the comparisons `=`/`==`, `!=`, `<`, `<=`, `>`, `>=`,
//! `~=`/`!~=` (regex), `is`/`isnot`, `contains`, plus the postfix checks
//! `is defined`, `isnot defined`, `is null` and `isnot null`.
//!
//! On the left of a comparison a bare word is a field path (`a.b.0`). On the
//! right it is a field path when the entry has that field and a plain string
//! otherwise, so `level is error` reads naturally.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde_json::{Map, Number, Value};

use logdeck_types::{Entry, ID_FIELD, RAW_FIELD};

use crate::parser::{LogParser, lookup_path};

/// Words with a meaning in the query language (offered for completion)
pub const KEYWORDS: &[&str] = &["is", "isnot", "defined", "null", "contains"];

/// Structural error in a query expression
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("unexpected end of expression, expected {0}")]
    UnexpectedEnd(&'static str),

    #[error("unexpected {found:?} at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid regex {pattern:?}: {message}")]
    InvalidRegex { pattern: String, message: String },
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Op(CmpOp),
    Str(String),
    Word(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
    Contains,
}

const WORD_STOP: &[char] = &['(', ')', '=', '!', '<', '>', '~', '&', '|', '\'', '"'];

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, QueryError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let rest = &input[offset..];
        let symbol = [
            ("&&", Token::And),
            ("||", Token::Or),
            ("!~=", Token::Op(CmpOp::NotMatch)),
            ("!=", Token::Op(CmpOp::Ne)),
            ("~=", Token::Op(CmpOp::Match)),
            ("==", Token::Op(CmpOp::Eq)),
            ("<=", Token::Op(CmpOp::Le)),
            (">=", Token::Op(CmpOp::Ge)),
            ("=", Token::Op(CmpOp::Eq)),
            ("<", Token::Op(CmpOp::Lt)),
            (">", Token::Op(CmpOp::Gt)),
            ("!", Token::Not),
            ("(", Token::LParen),
            (")", Token::RParen),
        ]
        .into_iter()
        .find(|(s, _)| rest.starts_with(s));

        if let Some((s, token)) = symbol {
            for _ in 0..s.len() {
                chars.next();
            }
            tokens.push((offset, token));
            continue;
        }

        if c == '\'' || c == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, ch)) = chars.next() {
                match ch {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                        }
                    }
                    ch if ch == c => {
                        closed = true;
                        break;
                    }
                    ch => value.push(ch),
                }
            }
            if !closed {
                return Err(QueryError::UnterminatedString(offset));
            }
            tokens.push((offset, Token::Str(value)));
            continue;
        }

        if WORD_STOP.contains(&c) {
            return Err(QueryError::UnexpectedToken {
                found: c.to_string(),
                offset,
            });
        }

        let mut word = String::new();
        while let Some(&(_, ch)) = chars.peek() {
            if ch.is_whitespace() || WORD_STOP.contains(&ch) {
                break;
            }
            word.push(ch);
            chars.next();
        }
        tokens.push((offset, Token::Word(word)));
    }

    Ok(tokens)
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone)]
enum Operand {
    /// Always a field path
    Field(String),
    /// A field path if present in the entry, the word itself otherwise
    FieldOrText(String),
    Literal(Value),
}

#[derive(Debug, Clone)]
enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        left: Operand,
        op: CmpOp,
        right: Operand,
    },
    Regex {
        left: Operand,
        regex: Regex,
        negate: bool,
    },
    Defined {
        operand: Operand,
        negate: bool,
    },
    IsNull {
        operand: Operand,
        negate: bool,
    },
    Truthy(Operand),
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

struct ExprParser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl ExprParser {
    fn parse(input: &str) -> Result<Expr, QueryError> {
        let mut parser = Self {
            tokens: tokenize(input)?,
            pos: 0,
        };
        let expr = parser.or()?;
        if let Some((offset, token)) = parser.tokens.get(parser.pos) {
            return Err(QueryError::UnexpectedToken {
                found: describe(token),
                offset: *offset,
            });
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_word(&self) -> Option<&str> {
        match self.peek() {
            Some(Token::Word(w)) => Some(w.as_str()),
            _ => None,
        }
    }

    fn advance(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn or(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, QueryError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, QueryError> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.or()?;
            return match self.advance() {
                Some((_, Token::RParen)) => Ok(inner),
                Some((offset, token)) => Err(QueryError::UnexpectedToken {
                    found: describe(&token),
                    offset,
                }),
                None => Err(QueryError::UnexpectedEnd("')'")),
            };
        }

        let left = self.operand(Side::Left)?;

        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            return match op {
                CmpOp::Match | CmpOp::NotMatch => self.regex(left, op == CmpOp::NotMatch),
                _ => Ok(Expr::Compare {
                    left,
                    op,
                    right: self.operand(Side::Right)?,
                }),
            };
        }

        match self.peek_word() {
            Some(word @ ("is" | "isnot")) => {
                let negate = word == "isnot";
                self.pos += 1;
                match self.peek_word() {
                    Some("defined") => {
                        self.pos += 1;
                        Ok(Expr::Defined {
                            operand: left,
                            negate,
                        })
                    }
                    Some("null") => {
                        self.pos += 1;
                        Ok(Expr::IsNull {
                            operand: left,
                            negate,
                        })
                    }
                    _ => Ok(Expr::Compare {
                        left,
                        op: if negate { CmpOp::Ne } else { CmpOp::Eq },
                        right: self.operand(Side::Right)?,
                    }),
                }
            }
            Some("contains") => {
                self.pos += 1;
                Ok(Expr::Compare {
                    left,
                    op: CmpOp::Contains,
                    right: self.operand(Side::Right)?,
                })
            }
            _ => Ok(Expr::Truthy(left)),
        }
    }

    fn regex(&mut self, left: Operand, negate: bool) -> Result<Expr, QueryError> {
        let pattern = match self.advance() {
            Some((_, Token::Str(s) | Token::Word(s))) => s,
            Some((offset, token)) => {
                return Err(QueryError::UnexpectedToken {
                    found: describe(&token),
                    offset,
                });
            }
            None => return Err(QueryError::UnexpectedEnd("a regular expression")),
        };
        let regex = Regex::new(&pattern).map_err(|e| QueryError::InvalidRegex {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;

        Ok(Expr::Regex {
            left,
            regex,
            negate,
        })
    }

    fn operand(&mut self, side: Side) -> Result<Operand, QueryError> {
        match self.advance() {
            Some((_, Token::Str(s))) => Ok(Operand::Literal(Value::String(s))),
            Some((_, Token::Word(w))) => Ok(word_operand(w, side)),
            Some((offset, token)) => Err(QueryError::UnexpectedToken {
                found: describe(&token),
                offset,
            }),
            None => Err(QueryError::UnexpectedEnd("a field or a value")),
        }
    }
}

fn word_operand(word: String, side: Side) -> Operand {
    match word.as_str() {
        "true" => return Operand::Literal(Value::Bool(true)),
        "false" => return Operand::Literal(Value::Bool(false)),
        "null" => return Operand::Literal(Value::Null),
        _ => {}
    }
    if let Some(number) = word.parse::<f64>().ok().and_then(Number::from_f64) {
        return Operand::Literal(Value::Number(number));
    }
    match side {
        Side::Left => Operand::Field(word),
        Side::Right => Operand::FieldOrText(word),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::LParen => "(".into(),
        Token::RParen => ")".into(),
        Token::And => "&&".into(),
        Token::Or => "||".into(),
        Token::Not => "!".into(),
        Token::Op(op) => format!("{:?}", op),
        Token::Str(s) => format!("'{}'", s),
        Token::Word(w) => w.clone(),
    }
}

// ============================================================================
// Evaluation
// ============================================================================

impl Operand {
    fn resolve<'a>(&'a self, doc: &'a Value) -> Option<&'a Value> {
        match self {
            Self::Field(path) => lookup_path(doc, path),
            Self::FieldOrText(_) => None,
            Self::Literal(value) => Some(value),
        }
    }

    /// Resolve to a value; missing fields read as null
    fn value(&self, doc: &Value) -> Value {
        match self {
            Self::FieldOrText(word) => lookup_path(doc, word)
                .cloned()
                .unwrap_or_else(|| Value::String(word.clone())),
            _ => self.resolve(doc).cloned().unwrap_or(Value::Null),
        }
    }
}

impl Expr {
    fn eval(&self, doc: &Value) -> bool {
        match self {
            Self::And(a, b) => a.eval(doc) && b.eval(doc),
            Self::Or(a, b) => a.eval(doc) || b.eval(doc),
            Self::Not(inner) => !inner.eval(doc),
            Self::Compare { left, op, right } => {
                compare(&left.value(doc), *op, &right.value(doc))
            }
            Self::Regex {
                left,
                regex,
                negate,
            } => {
                let matched = match left.value(doc) {
                    Value::Null => false,
                    value => regex.is_match(&as_text(&value)),
                };
                matched != *negate
            }
            Self::Defined { operand, negate } => {
                let defined = match operand {
                    Operand::Literal(_) => true,
                    Operand::Field(path) | Operand::FieldOrText(path) => {
                        lookup_path(doc, path).is_some()
                    }
                };
                defined != *negate
            }
            Self::IsNull { operand, negate } => operand.value(doc).is_null() != *negate,
            Self::Truthy(operand) => !matches!(operand.value(doc), Value::Null | Value::Bool(false)),
        }
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    match op {
        CmpOp::Eq => loose_eq(left, right),
        CmpOp::Ne => !loose_eq(left, right),
        CmpOp::Lt => order(left, right) == Some(Ordering::Less),
        CmpOp::Le => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => order(left, right) == Some(Ordering::Greater),
        CmpOp::Ge => matches!(
            order(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CmpOp::Contains => match left {
            Value::String(s) => s.contains(as_text(right).as_str()),
            Value::Array(items) => items.iter().any(|item| loose_eq(item, right)),
            Value::Object(map) => map.contains_key(as_text(right).as_str()),
            _ => false,
        },
        CmpOp::Match | CmpOp::NotMatch => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::String(_), _) | (_, Value::String(_)) | (Value::Number(_), Value::Number(_)) => {
            match (as_number(left), as_number(right)) {
                (Some(a), Some(b)) => a == b,
                _ => as_text(left) == as_text(right),
            }
        }
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        return a.partial_cmp(&b);
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Build the document a query sees for one entry.
///
/// Unparseable payloads become `{"raw": <text>}`; `raw` and `_id` are added
/// when the payload does not define them.
fn document(id: u64, raw: &[u8]) -> Value {
    let mut map = LogParser::parse_object(raw).unwrap_or_else(Map::new);
    if !map.contains_key(RAW_FIELD) || map[RAW_FIELD].is_null() {
        map.insert(
            RAW_FIELD.to_string(),
            Value::String(String::from_utf8_lossy(raw).into_owned()),
        );
    }
    if !map.contains_key(ID_FIELD) || map[ID_FIELD].is_null() {
        map.insert(ID_FIELD.to_string(), Value::from(id));
    }
    Value::Object(map)
}

// ============================================================================
// Compiled queries
// ============================================================================

/// A parsed query: the conjunction of its `;` separated expressions
#[derive(Debug, Clone)]
pub struct Query {
    parts: Vec<String>,
    exprs: Vec<Expr>,
}

impl Query {
    /// Parse a query string
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        let parts = split_query(input);
        let exprs = parts
            .iter()
            .map(|p| ExprParser::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { parts, exprs })
    }

    /// An empty query keeps everything
    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// Check whether an entry matches every expression
    pub fn matches(&self, id: u64, raw: &[u8]) -> bool {
        if self.exprs.is_empty() {
            return true;
        }
        let doc = document(id, raw);
        self.exprs.iter().all(|e| e.eval(&doc))
    }

    /// Normalized text of the query
    pub fn text(&self) -> String {
        self.parts.join("; ")
    }
}

fn split_query(input: &str) -> Vec<String> {
    input
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The active filter query shared between the input box and the refresh loop
pub struct QueryEngine {
    active: RwLock<ActiveQuery>,
}

struct ActiveQuery {
    text: String,
    compiled: Result<Query, QueryError>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(ActiveQuery {
                text: String::new(),
                compiled: Ok(Query {
                    parts: Vec::new(),
                    exprs: Vec::new(),
                }),
            }),
        }
    }

    /// Replace the active query. Structural errors surface on `execute`.
    pub fn set(&self, input: &str) {
        let compiled = Query::parse(input);
        let text = split_query(input).join("; ");
        *self.active.write() = ActiveQuery { text, compiled };
    }

    /// Normalized text of the active query (also the filter cache key)
    pub fn query(&self) -> String {
        self.active.read().text.clone()
    }

    /// Structural error of the active query, if any
    pub fn error(&self) -> Option<QueryError> {
        self.active.read().compiled.as_ref().err().cloned()
    }

    pub fn keywords(&self) -> &'static [&'static str] {
        KEYWORDS
    }

    /// Evaluate the active query against an entry.
    ///
    /// `Ok(Some(bytes))` keeps the entry, `Ok(None)` drops it.
    pub fn execute(&self, entry: &Entry) -> Result<Option<Arc<[u8]>>, QueryError> {
        let active = self.active.read();
        let query = active.compiled.as_ref().map_err(Clone::clone)?;
        if query.matches(entry.id, &entry.raw) {
            Ok(Some(Arc::clone(&entry.raw)))
        } else {
            Ok(None)
        }
    }
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keeps(query: &str, raw: &str) -> bool {
        Query::parse(query).unwrap().matches(7, raw.as_bytes())
    }

    #[test]
    fn test_level_is_error() {
        let engine = QueryEngine::new();
        engine.set("level is error");
        let error = Entry::new(1, None, br#"{"level":"error","msg":"x"}"#.to_vec());
        let info = Entry::new(2, None, br#"{"level":"info","msg":"y"}"#.to_vec());

        assert!(engine.execute(&error).unwrap().is_some());
        assert!(engine.execute(&info).unwrap().is_none());
    }

    #[test]
    fn test_empty_query_keeps_everything() {
        let engine = QueryEngine::new();
        engine.set("  ;  ");
        let entry = Entry::new(1, None, br#"{"level":"info"}"#.to_vec());
        let kept = engine.execute(&entry).unwrap().unwrap();
        assert_eq!(&*kept, &*entry.raw);
    }

    #[test]
    fn test_semicolon_is_conjunction() {
        let raw = r#"{"level":"error","code":500}"#;
        assert!(keeps("level is error; code >= 500", raw));
        assert!(!keeps("level is error; code < 500", raw));
    }

    #[test]
    fn test_structural_error_is_reported() {
        let engine = QueryEngine::new();
        engine.set("level = ");
        let entry = Entry::new(1, None, b"{}".to_vec());
        assert!(matches!(
            engine.execute(&entry),
            Err(QueryError::UnexpectedEnd(_))
        ));
        assert!(engine.error().is_some());

        assert!(matches!(
            Query::parse("msg = 'open"),
            Err(QueryError::UnterminatedString(6))
        ));
        assert!(matches!(
            Query::parse("msg ~= '('"),
            Err(QueryError::InvalidRegex { .. })
        ));
        assert!(Query::parse("(a = 1").is_err());
        assert!(Query::parse("a = 1 b").is_err());
    }

    #[test]
    fn test_raw_fallback_for_unparsed_lines() {
        assert!(keeps("raw ~= 'connection reset'", "panic: connection reset by peer"));
        assert!(!keeps("level is error", "plain text"));
    }

    #[test]
    fn test_synthetic_id_field() {
        assert!(keeps("_id = 7", r#"{"msg":"x"}"#));
        assert!(!keeps("_id = 8", r#"{"msg":"x"}"#));
        assert!(keeps("_id = 7", "not json"));
        // payload fields win over synthetic ones
        assert!(keeps("_id = 'abc'", r#"{"_id":"abc"}"#));
    }

    #[test]
    fn test_defined_and_null_checks() {
        let raw = r#"{"user":{"id":3},"gone":null}"#;
        assert!(keeps("user.id is defined", raw));
        assert!(keeps("trace isnot defined", raw));
        assert!(keeps("gone is null", raw));
        assert!(keeps("missing is null", raw));
        assert!(keeps("user isnot null", raw));
    }

    #[test]
    fn test_boolean_operators_and_grouping() {
        let raw = r#"{"level":"warning","status":"503","retry":true}"#;
        assert!(keeps("level is error || status >= 500", raw));
        assert!(keeps("retry && !(level is info)", raw));
        assert!(!keeps("retry && level isnot warning", raw));
    }

    #[test]
    fn test_contains_and_regex() {
        let raw = r#"{"msg":"user login failed","tags":["auth","web"]}"#;
        assert!(keeps("msg contains login", raw));
        assert!(keeps("tags contains 'auth'", raw));
        assert!(keeps(r#"msg ~= "^user .* failed$""#, raw));
        assert!(keeps("msg !~= timeout", raw));
        assert!(!keeps("missing ~= .*", raw));
    }

    #[test]
    fn test_right_hand_word_resolves_fields_first() {
        let raw = r#"{"expected":"ok","actual":"ok"}"#;
        assert!(keeps("actual = expected", raw));
        assert!(keeps("actual = ok", raw));
    }

    #[test]
    fn test_number_string_loose_equality() {
        assert!(keeps("status = 200", r#"{"status":"200"}"#));
        assert!(keeps("status = '200'", r#"{"status":200}"#));
        assert!(keeps("latency > 1.5", r#"{"latency":2}"#));
    }

    #[test]
    fn test_query_text_is_normalized() {
        let engine = QueryEngine::new();
        engine.set(" a = 1 ;; b = 2 ");
        assert_eq!(engine.query(), "a = 1; b = 2");
    }
}
