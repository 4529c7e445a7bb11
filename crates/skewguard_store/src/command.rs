//! Command dialect understood by the in-memory store.
//!
//! The dialect is a tiny SQL-like language:
//!
//! ```text
//! CREATE TABLE <ident>
//! SELECT * FROM <ident> [LIMIT <n>]
//! SELECT value FROM <ident> WHERE key = '<literal>'
//! SELECT SUM(value) FROM <ident>
//! UPSERT INTO <ident> VALUES ('<literal>', <int>)
//! DELETE FROM <ident> WHERE key = '<literal>'
//! SELECT APPLOCK_TEST('<resource>') [AS <alias>]
//! SELECT APPLOCK_ACQUIRE('<resource>', <timeout_ms>) [AS <alias>]
//! ```
//!
//! Keywords are case-insensitive. String literals are delimited by `'`
//! and an embedded quote is written as `''`. Anything after a complete
//! command is a parse error, so a literal that escapes its quotes can never
//! smuggle in a second statement.

use crate::error::{StoreError, StoreResult};

/// Default column name for the result of `APPLOCK_TEST`.
pub const LOCK_AVAILABLE_COLUMN: &str = "lock_available";

/// Default column name for the result of `APPLOCK_ACQUIRE`.
pub const LOCK_STATUS_COLUMN: &str = "lock_status";

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create an empty key/value table.
    CreateTable {
        /// Table name.
        table: String,
    },
    /// Read every visible row, optionally limited.
    SelectAll {
        /// Table name.
        table: String,
        /// Maximum number of rows.
        limit: Option<u64>,
    },
    /// Read the value stored under one key.
    SelectValue {
        /// Table name.
        table: String,
        /// Row key.
        key: String,
    },
    /// Sum every visible value.
    SelectSum {
        /// Table name.
        table: String,
    },
    /// Insert or replace a row.
    Upsert {
        /// Table name.
        table: String,
        /// Row key.
        key: String,
        /// New value.
        value: i64,
    },
    /// Delete a row.
    Delete {
        /// Table name.
        table: String,
        /// Row key.
        key: String,
    },
    /// Test whether an advisory lock could be granted to this session.
    LockTest {
        /// Lock resource name.
        resource: String,
        /// Result column name.
        column: String,
    },
    /// Request an exclusive advisory lock, waiting up to `timeout_ms`.
    LockAcquire {
        /// Lock resource name.
        resource: String,
        /// Wait budget in milliseconds.
        timeout_ms: i64,
        /// Result column name.
        column: String,
    },
}

impl Command {
    /// Returns true if the command reads or writes table data.
    ///
    /// Lock commands do not count; a session must run at least one
    /// data command before the store accepts lock calls.
    #[must_use]
    pub fn touches_data(&self) -> bool {
        !matches!(
            self,
            Command::LockTest { .. } | Command::LockAcquire { .. }
        )
    }
}

/// Parses a command.
///
/// # Errors
///
/// Returns [`StoreError::Parse`] with the byte offset of the offending
/// token if the text is not exactly one well-formed command.
pub fn parse(input: &str) -> StoreResult<Command> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
        end: input.len(),
    };
    let command = parser.command()?;
    parser.finish()?;
    Ok(command)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    LParen,
    RParen,
    Comma,
    Eq,
    Star,
}

fn tokenize(input: &str) -> StoreResult<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '=' => Some(Token::Eq),
            '*' => Some(Token::Star),
            _ => None,
        };
        if let Some(token) = single {
            chars.next();
            tokens.push((pos, token));
            continue;
        }

        if c.is_whitespace() {
            chars.next();
        } else if c == '\'' {
            chars.next();
            let mut literal = String::new();
            loop {
                match chars.next() {
                    Some((_, '\'')) => {
                        if matches!(chars.peek(), Some((_, '\''))) {
                            chars.next();
                            literal.push('\'');
                        } else {
                            break;
                        }
                    }
                    Some((_, ch)) => literal.push(ch),
                    None => return Err(StoreError::parse(pos, "unterminated string literal")),
                }
            }
            tokens.push((pos, Token::Str(literal)));
        } else if c.is_ascii_digit() || c == '-' {
            chars.next();
            let mut text = String::from(c);
            while let Some(&(_, d)) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                text.push(d);
                chars.next();
            }
            let value = text
                .parse::<i64>()
                .map_err(|_| StoreError::parse(pos, format!("invalid integer literal {text:?}")))?;
            tokens.push((pos, Token::Int(value)));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if !(d.is_alphanumeric() || d == '_') {
                    break;
                }
                ident.push(d);
                chars.next();
            }
            tokens.push((pos, Token::Ident(ident)));
        } else {
            return Err(StoreError::parse(pos, format!("unexpected character {c:?}")));
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn command(&mut self) -> StoreResult<Command> {
        let start = self.position();
        let verb = self.ident("a command")?;
        match verb.to_ascii_uppercase().as_str() {
            "CREATE" => {
                self.keyword("TABLE")?;
                let table = self.ident("a table name")?;
                Ok(Command::CreateTable { table })
            }
            "SELECT" => self.select(),
            "UPSERT" => {
                self.keyword("INTO")?;
                let table = self.ident("a table name")?;
                self.keyword("VALUES")?;
                self.punct(&Token::LParen, "(")?;
                let key = self.string("a key literal")?;
                self.punct(&Token::Comma, ",")?;
                let value = self.int("an integer value")?;
                self.punct(&Token::RParen, ")")?;
                Ok(Command::Upsert { table, key, value })
            }
            "DELETE" => {
                self.keyword("FROM")?;
                let table = self.ident("a table name")?;
                let key = self.where_key()?;
                Ok(Command::Delete { table, key })
            }
            _ => Err(StoreError::parse(start, format!("unknown command {verb}"))),
        }
    }

    fn select(&mut self) -> StoreResult<Command> {
        if self.eat(&Token::Star) {
            self.keyword("FROM")?;
            let table = self.ident("a table name")?;
            let limit = if self.eat_keyword("LIMIT") {
                let at = self.position();
                let n = self.int("a row limit")?;
                Some(
                    u64::try_from(n)
                        .map_err(|_| StoreError::parse(at, "LIMIT must not be negative"))?,
                )
            } else {
                None
            };
            return Ok(Command::SelectAll { table, limit });
        }

        let start = self.position();
        let item = self.ident("a select list")?;
        match item.to_ascii_uppercase().as_str() {
            "VALUE" => {
                self.keyword("FROM")?;
                let table = self.ident("a table name")?;
                let key = self.where_key()?;
                Ok(Command::SelectValue { table, key })
            }
            "SUM" => {
                self.punct(&Token::LParen, "(")?;
                self.keyword("VALUE")?;
                self.punct(&Token::RParen, ")")?;
                self.keyword("FROM")?;
                let table = self.ident("a table name")?;
                Ok(Command::SelectSum { table })
            }
            "APPLOCK_TEST" => {
                self.punct(&Token::LParen, "(")?;
                let resource = self.string("a resource literal")?;
                self.punct(&Token::RParen, ")")?;
                let column = self.alias(LOCK_AVAILABLE_COLUMN)?;
                Ok(Command::LockTest { resource, column })
            }
            "APPLOCK_ACQUIRE" => {
                self.punct(&Token::LParen, "(")?;
                let resource = self.string("a resource literal")?;
                self.punct(&Token::Comma, ",")?;
                let timeout_ms = self.int("a timeout in milliseconds")?;
                self.punct(&Token::RParen, ")")?;
                let column = self.alias(LOCK_STATUS_COLUMN)?;
                Ok(Command::LockAcquire {
                    resource,
                    timeout_ms,
                    column,
                })
            }
            _ => Err(StoreError::parse(start, format!("unsupported select item {item}"))),
        }
    }

    fn where_key(&mut self) -> StoreResult<String> {
        self.keyword("WHERE")?;
        self.keyword("KEY")?;
        self.punct(&Token::Eq, "=")?;
        self.string("a key literal")
    }

    fn alias(&mut self, default: &str) -> StoreResult<String> {
        if self.eat_keyword("AS") {
            self.ident("a column alias")
        } else {
            Ok(default.to_string())
        }
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(p, _)| *p)
    }

    fn error(&self, message: impl Into<String>) -> StoreError {
        StoreError::parse(self.position(), message)
    }

    fn ident(&mut self, what: &str) -> StoreResult<String> {
        match self.tokens.get(self.pos) {
            Some((_, Token::Ident(name))) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn string(&mut self, what: &str) -> StoreResult<String> {
        match self.tokens.get(self.pos) {
            Some((_, Token::Str(value))) => {
                let value = value.clone();
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn int(&mut self, what: &str) -> StoreResult<i64> {
        match self.tokens.get(self.pos) {
            Some((_, Token::Int(value))) => {
                let value = *value;
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn keyword(&mut self, keyword: &str) -> StoreResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected {keyword}")))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.tokens.get(self.pos) {
            Some((_, Token::Ident(name))) if name.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn punct(&mut self, token: &Token, display: &str) -> StoreResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {display}")))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        match self.tokens.get(self.pos) {
            Some((_, t)) if t == token => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn finish(&self) -> StoreResult<()> {
        if self.pos < self.tokens.len() {
            Err(self.error("unexpected trailing input"))
        } else {
            Ok(())
        }
    }
}
