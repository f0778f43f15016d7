//! Parser for caller-supplied fragments: `where("p.name = \"Jimmy\"")` and
//! `update_all("p.name = {new_name}")`.
//!
//! Grammar:
//!
//! ```text
//! conditions  := comparison (AND comparison)*
//! comparison  := target op operand
//! assignments := ident '.' key '=' operand (',' ident '.' key '=' operand)*
//! target      := ident '.' key | ID '(' ident ')'
//! op          := = | <> | < | <= | > | >=
//! operand     := $param | {param} | 'str' | "str" | int | float | true | false | null
//! ```

use std::cmp::Ordering;

use super::EngineError;
use crate::value::{Params, Value};

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    Dot,
    LParen,
    RParen,
    Comma,
    Op(CmpOp),
    Param(String),
    Str(String),
    Int(i64),
    Float(f64),
}

/// Comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub(crate) fn holds(self, left: &Value, right: &Value) -> bool {
        if left.is_null() || right.is_null() {
            return false;
        }
        let ordering = left.partial_cmp_value(right);
        match self {
            CmpOp::Eq => left == right || ordering == Some(Ordering::Equal),
            CmpOp::Ne => !(left == right || ordering == Some(Ordering::Equal)),
            CmpOp::Lt => ordering == Some(Ordering::Less),
            CmpOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            CmpOp::Gt => ordering == Some(Ordering::Greater),
            CmpOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

/// Right-hand side of a comparison or assignment.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Operand {
    Param(String),
    Literal(Value),
}

impl Operand {
    pub(crate) fn resolve(&self, params: &Params) -> Result<Value, EngineError> {
        match self {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Param(name) => params
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::Failure(format!("missing parameter '{name}'"))),
        }
    }
}

/// Left-hand side of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Target {
    Prop { ident: String, key: String },
    Id(String),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Comparison {
    pub target: Target,
    pub op: CmpOp,
    pub operand: Operand,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Assignment {
    pub ident: String,
    pub key: String,
    pub operand: Operand,
}

pub(crate) fn parse_conditions(input: &str) -> Result<Vec<Comparison>, EngineError> {
    let mut parser = Parser::new(input)?;
    let mut out = vec![parser.comparison()?];
    while parser.eat_keyword("AND") {
        out.push(parser.comparison()?);
    }
    parser.finish()?;
    Ok(out)
}

pub(crate) fn parse_assignments(input: &str) -> Result<Vec<Assignment>, EngineError> {
    let mut parser = Parser::new(input)?;
    let mut out = vec![parser.assignment()?];
    while parser.peek() == Some(&Token::Comma) {
        parser.pos += 1;
        out.push(parser.assignment()?);
    }
    parser.finish()?;
    Ok(out)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    source: String,
}

impl Parser {
    fn new(input: &str) -> Result<Self, EngineError> {
        Ok(Self {
            tokens: tokenize(input)?,
            pos: 0,
            source: input.to_owned(),
        })
    }

    fn error(&self, msg: &str) -> EngineError {
        EngineError::Syntax(format!("{msg} in '{}'", self.source))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), EngineError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            _ => Err(self.error(&format!("expected {expected:?}"))),
        }
    }

    fn word(&mut self) -> Result<String, EngineError> {
        match self.next() {
            Some(Token::Word(word)) => Ok(word),
            _ => Err(self.error("expected identifier")),
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn finish(&self) -> Result<(), EngineError> {
        if self.pos < self.tokens.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(())
    }

    fn comparison(&mut self) -> Result<Comparison, EngineError> {
        let target = self.target()?;
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            _ => return Err(self.error("expected comparison operator")),
        };
        let operand = self.operand()?;
        Ok(Comparison {
            target,
            op,
            operand,
        })
    }

    fn assignment(&mut self) -> Result<Assignment, EngineError> {
        let ident = self.word()?;
        self.expect(Token::Dot)?;
        let key = self.word()?;
        self.expect(Token::Op(CmpOp::Eq))?;
        let operand = self.operand()?;
        Ok(Assignment {
            ident,
            key,
            operand,
        })
    }

    fn target(&mut self) -> Result<Target, EngineError> {
        let word = self.word()?;
        if word.eq_ignore_ascii_case("ID") && self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let ident = self.word()?;
            self.expect(Token::RParen)?;
            return Ok(Target::Id(ident));
        }
        self.expect(Token::Dot)?;
        let key = self.word()?;
        Ok(Target::Prop { ident: word, key })
    }

    fn operand(&mut self) -> Result<Operand, EngineError> {
        let operand = match self.next() {
            Some(Token::Param(name)) => Operand::Param(name),
            Some(Token::Str(text)) => Operand::Literal(Value::String(text)),
            Some(Token::Int(v)) => Operand::Literal(Value::Int(v)),
            Some(Token::Float(v)) => Operand::Literal(Value::Float(v)),
            Some(Token::Word(word)) => match word.to_ascii_lowercase().as_str() {
                "true" => Operand::Literal(Value::Bool(true)),
                "false" => Operand::Literal(Value::Bool(false)),
                "null" => Operand::Literal(Value::Null),
                _ => return Err(self.error("expected literal or parameter")),
            },
            _ => return Err(self.error("expected literal or parameter")),
        };
        Ok(operand)
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, EngineError> {
    let syntax = |msg: &str| EngineError::Syntax(format!("{msg} in '{input}'"));
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 1;
            }
            '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('<', Some('>')) => (CmpOp::Ne, 2),
                    ('<', Some('=')) => (CmpOp::Le, 2),
                    ('>', Some('=')) => (CmpOp::Ge, 2),
                    ('<', _) => (CmpOp::Lt, 1),
                    _ => (CmpOp::Gt, 1),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            '$' => {
                let start = i + 1;
                i = start;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                if i == start {
                    return Err(syntax("empty parameter name"));
                }
                tokens.push(Token::Param(chars[start..i].iter().collect()));
            }
            '{' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == '}')
                    .map(|offset| start + offset)
                    .ok_or_else(|| syntax("unterminated parameter"))?;
                let name: String = chars[start..end].iter().collect();
                tokens.push(Token::Param(name.trim().to_owned()));
                i = end + 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(syntax("unterminated string")),
                        Some('\\') => {
                            if let Some(&escaped) = chars.get(i + 1) {
                                text.push(escaped);
                            }
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let token = if literal.contains('.') {
                    literal
                        .parse()
                        .map(Token::Float)
                        .map_err(|_| syntax("bad float literal"))?
                } else {
                    literal
                        .parse()
                        .map(Token::Int)
                        .map_err(|_| syntax("bad integer literal"))?
                };
                tokens.push(token);
            }
            c if is_word_char(c) => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            '`' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == '`')
                    .map(|offset| start + offset)
                    .ok_or_else(|| syntax("unterminated quoted identifier"))?;
                tokens.push(Token::Word(chars[start..end].iter().collect()));
                i = end + 1;
            }
            other => return Err(syntax(&format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
