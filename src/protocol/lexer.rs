//! Minimal JSON tokenizer for the top level of a message envelope.
//!
//! Only the outer object is tokenized. Nested containers are reported as a
//! single opening token and never walked; callers either hand them to
//! `serde_json` or stop before them.

use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token<'a> {
    StartObject,
    EndObject,
    StartArray,
    PropertyName(Cow<'a, str>),
    String(Cow<'a, str>),
    Number(&'a [u8]),
    True,
    False,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Start,
    FirstName,
    NextName,
    Value,
    Done,
}

pub(crate) struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
    token_start: usize,
    expect: Expect,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            token_start: 0,
            expect: Expect::Start,
        }
    }

    /// Offset of the first byte of the last token read (or attempted).
    pub(crate) fn token_start(&self) -> usize {
        self.token_start
    }

    /// Read the next token, or `None` if the input is malformed or truncated.
    pub(crate) fn next_token(&mut self) -> Option<Token<'a>> {
        self.skip_whitespace();
        self.token_start = self.pos;

        match self.expect {
            Expect::Start => {
                self.eat(b'{')?;
                self.expect = Expect::FirstName;
                Some(Token::StartObject)
            }
            Expect::FirstName => self.name_or_end(),
            Expect::NextName => {
                if self.peek()? == b',' {
                    self.pos += 1;
                    self.skip_whitespace();
                    self.token_start = self.pos;
                }
                self.name_or_end()
            }
            Expect::Value => {
                let token = self.value()?;
                self.expect = Expect::NextName;
                Some(token)
            }
            Expect::Done => None,
        }
    }

    /// Skip whitespace in front of the next value and return its offset.
    pub(crate) fn value_start(&mut self) -> usize {
        self.skip_whitespace();
        self.token_start = self.pos;
        self.pos
    }

    /// Move past a value of `len` bytes starting at the current position,
    /// after it was consumed by another decoder.
    pub(crate) fn skip_value(&mut self, len: usize) {
        self.pos = (self.pos + len).min(self.bytes.len());
        self.expect = Expect::NextName;
    }

    fn name_or_end(&mut self) -> Option<Token<'a>> {
        match self.peek()? {
            b'}' => {
                self.pos += 1;
                self.expect = Expect::Done;
                Some(Token::EndObject)
            }
            b'"' => {
                let name = self.string()?;
                self.skip_whitespace();
                self.eat(b':')?;
                self.expect = Expect::Value;
                Some(Token::PropertyName(name))
            }
            _ => None,
        }
    }

    fn value(&mut self) -> Option<Token<'a>> {
        match self.peek()? {
            b'"' => self.string().map(Token::String),
            b'{' => {
                self.pos += 1;
                Some(Token::StartObject)
            }
            b'[' => {
                self.pos += 1;
                Some(Token::StartArray)
            }
            b'-' | b'0'..=b'9' => {
                let start = self.pos;
                while let Some(b) = self.bytes.get(self.pos) {
                    if matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                Some(Token::Number(&self.bytes[start..self.pos]))
            }
            b't' => self.literal(b"true", Token::True),
            b'f' => self.literal(b"false", Token::False),
            b'n' => self.literal(b"null", Token::Null),
            _ => None,
        }
    }

    fn literal(&mut self, text: &[u8], token: Token<'a>) -> Option<Token<'a>> {
        if self.bytes[self.pos..].starts_with(text) {
            self.pos += text.len();
            Some(token)
        } else {
            None
        }
    }

    /// Read a quoted string starting at the current position.
    fn string(&mut self) -> Option<Cow<'a, str>> {
        let start = self.pos;
        self.eat(b'"')?;

        let mut escaped = false;
        let mut i = self.pos;
        loop {
            match *self.bytes.get(i)? {
                b'\\' => {
                    escaped = true;
                    i += 2;
                }
                b'"' => break,
                _ => i += 1,
            }
        }
        self.pos = i + 1;

        if escaped {
            serde_json::from_slice::<String>(&self.bytes[start..self.pos])
                .ok()
                .map(Cow::Owned)
        } else {
            std::str::from_utf8(&self.bytes[start + 1..i])
                .ok()
                .map(Cow::Borrowed)
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, expected: u8) -> Option<()> {
        if self.peek()? == expected {
            self.pos += 1;
            Some(())
        } else {
            None
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\t' | b'\r' | b'\n') = self.peek() {
            self.pos += 1;
        }
    }
}
