//! A small expression language for guards and operator input.
//!
//! Breakpoint conditions, allowlist guards and `push` arguments are written in
//! a restricted subset of the host language's expression syntax:
//!
//! - literals: integers (decimal, `0x`, `0o`, `0b`), floats, imaginary numbers,
//!   strings and bytes (with escapes and prefixes), `True`, `False`, `None`, `...`
//! - tuples and lists
//! - names, resolved through [`Layers`]
//! - unary `+ - ~ not`, binary arithmetic and bitwise operators
//! - chained comparisons, including `in`, `not in`, `is`, `is not`
//! - short-circuiting `and`/`or`
//! - subscripts and calls to pure builtins
//!
//! Nothing evaluated here can assign a name or run bytecode. The same parser
//! folds assembler operand literals into constants (see [`literal`]).

use std::{fmt, str::FromStr};

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::{
    bytecode::{
        op::CompareOp,
        vm::{
            binary::{BinaryOp, UnaryOp, binary_op, unary_op},
            collections::subscript,
            compare::compare,
        },
    },
    exception::{ExcType, RunResult, SimpleException},
    namespace::Layers,
    value::Value,
};

/// Parse or evaluation failure of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprError {
    /// The text is not a valid expression.
    Syntax { message: String, offset: usize },
    /// The expression is valid but not a constant literal.
    NotConstant(String),
    /// Evaluation raised an exception.
    Runtime(SimpleException),
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { message, offset } => write!(f, "invalid syntax at column {}: {message}", offset + 1),
            Self::NotConstant(source) => write!(f, "not a constant literal: {source}"),
            Self::Runtime(exc) => write!(f, "{exc}"),
        }
    }
}

impl std::error::Error for ExprError {}

impl From<SimpleException> for ExprError {
    fn from(exc: SimpleException) -> Self {
        Self::Runtime(exc)
    }
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `first op1 e1 op2 e2 ...`, evaluated pairwise with short-circuiting.
    Compare(Box<Expr>, Vec<(CompareOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Subscript(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
}

/// Parses an expression.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    match parser.peek() {
        Tok::End => Ok(expr),
        _ => Err(parser.error("unexpected trailing input")),
    }
}

/// Parses a constant literal: the subset of expressions a constant pool can hold.
///
/// Accepts literals, tuples and lists of literals, signed numbers and complex
/// sums such as `1+2j`.
pub fn literal(source: &str) -> Result<Value, ExprError> {
    parse(source)?
        .to_constant()
        .ok_or_else(|| ExprError::NotConstant(source.trim().to_owned()))
}

/// Parses and evaluates an expression in one go.
pub fn evaluate(source: &str, scope: &Layers<'_>) -> Result<Value, ExprError> {
    Ok(parse(source)?.eval(scope)?)
}

impl Expr {
    /// Folds the expression into a constant value, if it is a literal.
    #[must_use]
    pub fn to_constant(&self) -> Option<Value> {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Tuple(items) => Some(Value::tuple(items.iter().map(Self::to_constant).collect::<Option<_>>()?)),
            Self::List(items) => Some(Value::list(items.iter().map(Self::to_constant).collect::<Option<_>>()?)),
            Self::Unary(op @ (UnaryOp::Positive | UnaryOp::Negative), operand) => {
                let value = operand.to_constant()?;
                is_number(&value).then(|| unary_op(*op, &value).ok())?
            }
            Self::Binary(op @ (BinaryOp::Add | BinaryOp::Sub), lhs, rhs) => {
                let lhs = lhs.to_constant()?;
                let rhs = rhs.to_constant()?;
                let real = is_number(&lhs) && !matches!(lhs, Value::Complex { .. });
                (real && matches!(rhs, Value::Complex { .. }))
                    .then(|| binary_op(*op, &lhs, &rhs).ok())?
            }
            _ => None,
        }
    }

    /// Evaluates the expression against a read-only scope view.
    pub fn eval(&self, scope: &Layers<'_>) -> RunResult<Value> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Name(name) => scope.get(name).cloned().ok_or_else(|| ExcType::name_error(name)),
            Self::Tuple(items) => Ok(Value::tuple(eval_all(items, scope)?)),
            Self::List(items) => Ok(Value::list(eval_all(items, scope)?)),
            Self::Unary(op, operand) => unary_op(*op, &operand.eval(scope)?),
            Self::Binary(op, lhs, rhs) => binary_op(*op, &lhs.eval(scope)?, &rhs.eval(scope)?),
            Self::Compare(first, rest) => {
                let mut lhs = first.eval(scope)?;
                let mut result = Value::Bool(true);
                for (op, rhs) in rest {
                    let rhs = rhs.eval(scope)?;
                    result = compare(*op, &lhs, &rhs)?;
                    if !result.is_truthy() {
                        return Ok(result);
                    }
                    lhs = rhs;
                }
                Ok(result)
            }
            Self::And(lhs, rhs) => {
                let lhs = lhs.eval(scope)?;
                if lhs.is_truthy() { rhs.eval(scope) } else { Ok(lhs) }
            }
            Self::Or(lhs, rhs) => {
                let lhs = lhs.eval(scope)?;
                if lhs.is_truthy() { Ok(lhs) } else { rhs.eval(scope) }
            }
            Self::Subscript(container, index) => subscript(&container.eval(scope)?, &index.eval(scope)?),
            Self::Call(callee, args) => {
                let callee = callee.eval(scope)?;
                let args = eval_all(args, scope)?;
                match callee {
                    Value::Builtin(builtin) if builtin.is_pure() => builtin.call(&args),
                    Value::Builtin(builtin) => Err(ExcType::type_error(format!(
                        "{builtin}() has side effects and cannot be called in an expression"
                    ))),
                    Value::Function(func) => Err(ExcType::type_error(format!(
                        "{}() is bytecode and cannot be called in an expression",
                        func.name
                    ))),
                    other => Err(ExcType::type_error(format!(
                        "'{}' object is not callable",
                        other.type_name()
                    ))),
                }
            }
        }
    }
}

fn eval_all(items: &[Expr], scope: &Layers<'_>) -> RunResult<Vec<Value>> {
    items.iter().map(|item| item.eval(scope)).collect()
}

fn is_number(value: &Value) -> bool {
    matches!(
        value,
        Value::Int(_) | Value::LongInt(_) | Value::Float(_) | Value::Complex { .. }
    )
}

/// A guard expression attached to a breakpoint or an allowlist entry.
///
/// Parsed once when registered; serialized as its source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        Ok(Self {
            source: source.trim().to_owned(),
            expr: parse(source)?,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the guard and reports its truthiness.
    pub fn is_met(&self, scope: &Layers<'_>) -> RunResult<bool> {
        Ok(self.expr.eval(scope)?.is_truthy())
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for Condition {
    type Error = ExprError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        Self::parse(&source)
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.source
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(BigInt),
    Float(f64),
    Imag(f64),
    Str(String),
    Bytes(Vec<u8>),
    Name(String),
    Op(&'static str),
    End,
}

/// Operators, longest first so that prefix matching picks `**` over `*`.
const OPERATORS: &[&str] = &[
    "...", "**", "//", "<<", ">>", "<=", ">=", "==", "!=", "+", "-", "*", "/", "%", "@", "&", "|", "^", "~", "<", ">",
    "(", ")", "[", "]", ",",
];

fn tokenize(source: &str) -> Result<Vec<(Tok, usize)>, ExprError> {
    let mut lexer = Lexer {
        src: source,
        bytes: source.as_bytes(),
        pos: 0,
    };
    let mut tokens = Vec::new();
    loop {
        lexer.skip_whitespace();
        let start = lexer.pos;
        let Some(&c) = lexer.bytes.get(lexer.pos) else {
            tokens.push((Tok::End, start));
            return Ok(tokens);
        };
        let next = lexer.bytes.get(lexer.pos + 1).copied();
        let tok = if c.is_ascii_digit() || (c == b'.' && next.is_some_and(|n| n.is_ascii_digit())) {
            lexer.number()?
        } else if c == b'"' || c == b'\'' || (c.is_ascii_alphabetic() && lexer.string_prefix_len().is_some()) {
            lexer.string()?
        } else if c.is_ascii_alphabetic() || c == b'_' || !c.is_ascii() {
            lexer.name()?
        } else if let Some(op) = OPERATORS.iter().find(|op| lexer.src[lexer.pos..].starts_with(**op)) {
            lexer.pos += op.len();
            Tok::Op(*op)
        } else {
            return Err(syntax(format!("unexpected character {:?}", char::from(c)), start));
        };
        tokens.push((tok, start));
    }
}

fn syntax(message: impl Into<String>, offset: usize) -> ExprError {
    ExprError::Syntax {
        message: message.into(),
        offset,
    }
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Lexer<'_> {
    fn skip_whitespace(&mut self) {
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &str {
        let start = self.pos;
        while self.bytes.get(self.pos).is_some_and(|b| pred(*b)) {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    fn name(&mut self) -> Result<Tok, ExprError> {
        let start = self.pos;
        while let Some(c) = self.src[self.pos..].chars().next() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if self.pos == start {
            let c = self.src[start..].chars().next().unwrap_or_default();
            return Err(syntax(format!("unexpected character {c:?}"), start));
        }
        Ok(Tok::Name(self.src[start..self.pos].to_owned()))
    }

    fn number(&mut self) -> Result<Tok, ExprError> {
        let start = self.pos;
        let radix = match self.src[self.pos..].get(..2).map(str::to_ascii_lowercase).as_deref() {
            Some("0x") => Some(16),
            Some("0o") => Some(8),
            Some("0b") => Some(2),
            _ => None,
        };
        if let Some(radix) = radix {
            self.pos += 2;
            let digits: String = self.take_while(|b| b.is_ascii_alphanumeric() || b == b'_').replace('_', "");
            return BigInt::parse_bytes(digits.as_bytes(), radix)
                .map(Tok::Int)
                .ok_or_else(|| syntax("invalid integer literal", start));
        }

        let mut is_float = false;
        self.take_while(|b| b.is_ascii_digit() || b == b'_');
        if self.bytes.get(self.pos) == Some(&b'.') {
            is_float = true;
            self.pos += 1;
            self.take_while(|b| b.is_ascii_digit() || b == b'_');
        }
        if matches!(self.bytes.get(self.pos), Some(b'e' | b'E')) {
            let after = self.bytes.get(self.pos + 1).copied();
            let after_sign = self.bytes.get(self.pos + 2).copied();
            let exponent_follows = after.is_some_and(|b| b.is_ascii_digit())
                || (matches!(after, Some(b'+' | b'-')) && after_sign.is_some_and(|b| b.is_ascii_digit()));
            if exponent_follows {
                is_float = true;
                self.pos += 2;
                self.take_while(|b| b.is_ascii_digit());
            }
        }
        let text = self.src[start..self.pos].replace('_', "");
        if matches!(self.bytes.get(self.pos), Some(b'j' | b'J')) {
            self.pos += 1;
            return text
                .parse::<f64>()
                .map(Tok::Imag)
                .map_err(|_| syntax("invalid imaginary literal", start));
        }
        if is_float {
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| syntax("invalid float literal", start))
        } else {
            BigInt::from_str(&text)
                .map(Tok::Int)
                .map_err(|_| syntax("invalid integer literal", start))
        }
    }

    /// Length of a string prefix (`b`, `r`, `rb`, ...) directly followed by a quote.
    fn string_prefix_len(&self) -> Option<usize> {
        let rest = &self.bytes[self.pos..];
        let prefix_len = rest.iter().take_while(|b| b.is_ascii_alphabetic()).count();
        if prefix_len == 0 || prefix_len > 2 || !matches!(rest.get(prefix_len), Some(b'"' | b'\'')) {
            return None;
        }
        let prefix = self.src[self.pos..self.pos + prefix_len].to_ascii_lowercase();
        matches!(prefix.as_str(), "r" | "b" | "u" | "rb" | "br").then_some(prefix_len)
    }

    fn string(&mut self) -> Result<Tok, ExprError> {
        let start = self.pos;
        let prefix_len = self.string_prefix_len().unwrap_or(0);
        let prefix = self.src[self.pos..self.pos + prefix_len].to_ascii_lowercase();
        let raw = prefix.contains('r');
        let is_bytes = prefix.contains('b');
        self.pos += prefix_len;

        let quote = self.bytes[self.pos];
        let triple = self.bytes[self.pos..].starts_with(&[quote; 3]);
        let delimiter_len = if triple { 3 } else { 1 };
        self.pos += delimiter_len;

        let body_start = self.pos;
        loop {
            match self.bytes.get(self.pos) {
                None => return Err(syntax("unterminated string literal", start)),
                Some(b'\\') => self.pos += 2,
                Some(b'\n') if !triple => return Err(syntax("unterminated string literal", start)),
                Some(&b) if b == quote && (!triple || self.bytes[self.pos..].starts_with(&[quote; 3])) => break,
                Some(_) => self.pos += 1,
            }
        }
        let body = self
            .src
            .get(body_start..self.pos)
            .ok_or_else(|| syntax("unterminated string literal", start))?;
        self.pos += delimiter_len;

        if is_bytes && !body.is_ascii() {
            return Err(syntax("bytes can only contain ASCII literal characters", start));
        }
        let text = if raw { body.to_owned() } else { unescape(body, is_bytes, start)? };
        if is_bytes {
            // escapes above 0x7f decode to chars U+0080..=U+00FF
            return Ok(Tok::Bytes(text.chars().map(|c| c as u8).collect()));
        }
        Ok(Tok::Str(text))
    }
}

/// Decodes backslash escapes.
///
/// In bytes literals `\xNN` and octal escapes produce the char with that code
/// point (`U+0000..=U+00FF`), so the caller can map chars back to bytes.
fn unescape(body: &str, is_bytes: bool, offset: usize) -> Result<String, ExprError> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(escape) = chars.next() else {
            return Err(syntax("trailing backslash in string", offset));
        };
        match escape {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut code = escape.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(code_point(if is_bytes { code & 0xff } else { code }, offset)?);
            }
            'x' => out.push(code_point(hex_digits(&mut chars, 2, offset)?, offset)?),
            'u' if !is_bytes => out.push(code_point(hex_digits(&mut chars, 4, offset)?, offset)?),
            'U' if !is_bytes => out.push(code_point(hex_digits(&mut chars, 8, offset)?, offset)?),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

fn hex_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, count: usize, offset: usize) -> Result<u32, ExprError> {
    let mut code = 0;
    for _ in 0..count {
        let digit = chars
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or_else(|| syntax("truncated \\xXX escape", offset))?;
        code = code * 16 + digit;
    }
    Ok(code)
}

fn code_point(code: u32, offset: usize) -> Result<char, ExprError> {
    char::from_u32(code).ok_or_else(|| syntax("illegal Unicode character", offset))
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens.get(self.pos).map_or(&Tok::End, |(tok, _)| tok)
    }

    fn peek_at(&self, ahead: usize) -> &Tok {
        self.tokens.get(self.pos + ahead).map_or(&Tok::End, |(tok, _)| tok)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(0, |(_, offset)| *offset)
    }

    fn error(&self, message: &str) -> ExprError {
        syntax(message, self.offset())
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        self.pos += 1;
        tok
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Tok::Op(o) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Tok::Name(n) if n == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ExprError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{op}'")))
        }
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.and_expr()?;
        while self.eat_keyword("or") {
            lhs = Expr::Or(Box::new(lhs), Box::new(self.and_expr()?));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.not_expr()?;
        while self.eat_keyword("and") {
            lhs = Expr::And(Box::new(lhs), Box::new(self.not_expr()?));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, ExprError> {
        if self.eat_keyword("not") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CompareOp> {
        let op = match self.peek().clone() {
            Tok::Op(symbol) => CompareOp::from_symbol(symbol)?,
            Tok::Name(name) if name == "in" => CompareOp::In,
            Tok::Name(name) if name == "is" => {
                if matches!(self.peek_at(1), Tok::Name(n) if n == "not") {
                    self.pos += 1;
                    CompareOp::IsNot
                } else {
                    CompareOp::Is
                }
            }
            Tok::Name(name) if name == "not" && matches!(self.peek_at(1), Tok::Name(n) if n == "in") => {
                self.pos += 1;
                CompareOp::NotIn
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let first = self.bitwise_or()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.bitwise_or()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    /// Parses one left-associative binary precedence level.
    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ExprError>,
    ) -> Result<Expr, ExprError> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (symbol, op) in ops {
                if self.eat_op(symbol) {
                    lhs = Expr::Binary(*op, Box::new(lhs), Box::new(next(self)?));
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn bitwise_or(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[("|", BinaryOp::Or)], Self::bitwise_xor)
    }

    fn bitwise_xor(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[("^", BinaryOp::Xor)], Self::bitwise_and)
    }

    fn bitwise_and(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[("&", BinaryOp::And)], Self::shift)
    }

    fn shift(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[("<<", BinaryOp::LShift), (">>", BinaryOp::RShift)], Self::arith)
    }

    fn arith(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[("+", BinaryOp::Add), ("-", BinaryOp::Sub)], Self::term)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("//", BinaryOp::FloorDiv),
                ("/", BinaryOp::TrueDiv),
                ("%", BinaryOp::Mod),
                ("@", BinaryOp::MatMul),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr, ExprError> {
        let op = if self.eat_op("+") {
            UnaryOp::Positive
        } else if self.eat_op("-") {
            UnaryOp::Negative
        } else if self.eat_op("~") {
            UnaryOp::Invert
        } else {
            return self.power();
        };
        Ok(Expr::Unary(op, Box::new(self.factor()?)))
    }

    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(self.factor()?)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("[") {
                let index = self.expression()?;
                self.expect_op("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_op("(") {
                let (args, _) = self.sequence(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    /// Parses comma separated expressions up to `close`, consuming it.
    ///
    /// Also reports whether a comma was seen, which distinguishes `(x)` from `(x,)`.
    fn sequence(&mut self, close: &str) -> Result<(Vec<Expr>, bool), ExprError> {
        let mut items = Vec::new();
        let mut saw_comma = false;
        while !self.eat_op(close) {
            items.push(self.expression()?);
            if self.eat_op(",") {
                saw_comma = true;
            } else {
                self.expect_op(close)?;
                break;
            }
        }
        Ok((items, saw_comma))
    }

    fn atom(&mut self) -> Result<Expr, ExprError> {
        let offset = self.offset();
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Literal(Value::from_bigint(i))),
            Tok::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Tok::Imag(im) => Ok(Expr::Literal(Value::Complex { re: 0.0, im })),
            Tok::Str(mut s) => {
                while let Tok::Str(next) = self.peek() {
                    s.push_str(next);
                    self.pos += 1;
                }
                if matches!(self.peek(), Tok::Bytes(_)) {
                    return Err(self.error("cannot mix bytes and nonbytes literals"));
                }
                Ok(Expr::Literal(Value::str(&s)))
            }
            Tok::Bytes(mut b) => {
                while let Tok::Bytes(next) = self.peek() {
                    b.extend_from_slice(next);
                    self.pos += 1;
                }
                if matches!(self.peek(), Tok::Str(_)) {
                    return Err(self.error("cannot mix bytes and nonbytes literals"));
                }
                Ok(Expr::Literal(Value::bytes(&b)))
            }
            Tok::Name(name) => match name.as_str() {
                "True" => Ok(Expr::Literal(Value::Bool(true))),
                "False" => Ok(Expr::Literal(Value::Bool(false))),
                "None" => Ok(Expr::Literal(Value::None)),
                "and" | "or" | "not" | "in" | "is" | "if" | "else" | "lambda" | "for" => {
                    Err(syntax(format!("unexpected keyword '{name}'"), offset))
                }
                _ => Ok(Expr::Name(name)),
            },
            Tok::Op("...") => Ok(Expr::Literal(Value::Ellipsis)),
            Tok::Op("(") => {
                let (mut items, saw_comma) = self.sequence(")")?;
                if items.len() == 1 && !saw_comma {
                    return Ok(items.remove(0));
                }
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => Ok(Expr::List(self.sequence("]")?.0)),
            Tok::Op(op) => Err(syntax(format!("unexpected '{op}'"), offset)),
            Tok::End => Err(syntax("unexpected end of expression", offset)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builtins::Builtin, namespace::Scope};

    fn eval_with(source: &str, locals: &[(&str, Value)]) -> Result<Value, ExprError> {
        let mut builtins = Scope::new();
        builtins.insert("len".to_owned(), Value::Builtin(Builtin::Len));
        builtins.insert("print".to_owned(), Value::Builtin(Builtin::Print));
        let globals = Scope::new();
        let locals: Scope = locals.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect();
        evaluate(source, &Layers::new(&builtins, &globals, &locals, &[]))
    }

    fn eval(source: &str) -> Value {
        eval_with(source, &[]).unwrap()
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval("-2 ** 2"), Value::Int(-4));
        assert_eq!(eval("2 ** 3 ** 2"), Value::Int(512));
        assert_eq!(eval("7 // 2 + 7 % 2"), Value::Int(4));
        assert_eq!(eval("1 << 4 | 1"), Value::Int(17));
        assert_eq!(eval("(1 + 2) * 3"), Value::Int(9));
    }

    #[test]
    fn test_comparisons_chain() {
        assert_eq!(eval("1 < 2 < 3"), Value::Bool(true));
        assert_eq!(eval("1 < 3 < 2"), Value::Bool(false));
        assert_eq!(eval("2 in (1, 2)"), Value::Bool(true));
        assert_eq!(eval("'a' not in 'bcd'"), Value::Bool(true));
        assert_eq!(eval("None is not None"), Value::Bool(false));
    }

    #[test]
    fn test_boolean_operators_return_operands() {
        assert_eq!(eval("0 or 'x'"), Value::str("x"));
        assert_eq!(eval("1 and 2"), Value::Int(2));
        assert_eq!(eval("not 0"), Value::Bool(true));
        // short-circuit skips the undefined name
        assert_eq!(eval("0 and undefined"), Value::Int(0));
    }

    #[test]
    fn test_names_subscripts_and_calls() {
        let stack = Value::tuple(vec![Value::Int(10), Value::Int(20)]);
        let value = eval_with("stack[-1] == 20 and len(stack) == 2", &[("stack", stack)]).unwrap();
        assert_eq!(value, Value::Bool(true));
        let err = eval_with("missing + 1", &[]).unwrap_err();
        assert!(matches!(err, ExprError::Runtime(exc) if exc.exc_type() == ExcType::NameError));
    }

    #[test]
    fn test_impure_calls_rejected() {
        let err = eval_with("print(1)", &[]).unwrap_err();
        assert!(matches!(err, ExprError::Runtime(exc) if exc.exc_type() == ExcType::TypeError));
    }

    #[test]
    fn test_literals() {
        assert_eq!(literal("42").unwrap(), Value::Int(42));
        assert_eq!(literal("-0x10").unwrap(), Value::Int(-16));
        assert_eq!(literal("1_000.5").unwrap(), Value::Float(1000.5));
        assert_eq!(literal("1e3").unwrap(), Value::Float(1000.0));
        assert_eq!(literal("1+2j").unwrap(), Value::Complex { re: 1.0, im: 2.0 });
        assert_eq!(literal("(1,)").unwrap(), Value::tuple(vec![Value::Int(1)]));
        assert_eq!(literal("()").unwrap(), Value::tuple(vec![]));
        assert_eq!(literal("...").unwrap(), Value::Ellipsis);
        assert_eq!(literal("'a' 'b'").unwrap(), Value::str("ab"));
        assert_eq!(literal(r"b'\x00\xff'").unwrap(), Value::bytes(&[0, 255]));
        assert_eq!(literal(r"r'\n'").unwrap(), Value::str("\\n"));
        assert_eq!(literal("'\\u00e9'").unwrap(), Value::str("é"));
        assert_eq!(
            literal("123456789012345678901234567890").unwrap().repr(),
            "123456789012345678901234567890"
        );
    }

    #[test]
    fn test_non_literals_rejected() {
        assert!(matches!(literal("x"), Err(ExprError::NotConstant(_))));
        assert!(matches!(literal("1 + 2"), Err(ExprError::NotConstant(_))));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse("1 +"), Err(ExprError::Syntax { .. })));
        assert!(matches!(parse("(1, 2"), Err(ExprError::Syntax { .. })));
        assert!(matches!(parse("'abc"), Err(ExprError::Syntax { .. })));
        assert!(matches!(parse("1 2"), Err(ExprError::Syntax { .. })));
        assert!(matches!(parse("$"), Err(ExprError::Syntax { offset: 0, .. })));
    }

    #[test]
    fn test_condition_serializes_as_source() {
        let condition = Condition::parse(" x > 1 ").unwrap();
        assert_eq!(condition.source(), "x > 1");
        let bytes = postcard::to_allocvec(&condition).unwrap();
        let restored: Condition = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(restored, condition);
    }
}
