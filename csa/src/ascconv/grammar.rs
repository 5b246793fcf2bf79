//! Lexer and statement parser for the assignment language of ASCCONV blocks.
//!
//! The language is a small subset of conventional assignment syntax:
//!
//! ```text
//! statement := target '=' value
//! target    := ident ( '.' ident | '[' int ']' )*
//! value     := int | float | string | '-' int | '-' float
//! ```
//!
//! where a target may not subscript the same name twice in a row,
//! strings are enclosed by a configurable delimiter (`"` or `""`)
//! with no escape sequences,
//! and `#` starts a comment running to the end of the line.
use super::{
    ParseError, SyntaxSnafu, TooManyTargetsSnafu, UnexpectedLhsSnafu, UnexpectedRhsSnafu,
};
use crate::tree::{AscconvNode, Path, PathAtom};
use smallvec::SmallVec;
use std::convert::TryFrom;

type Result<T, E = ParseError> = std::result::Result<T, E>;

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum Token<'a> {
    Ident(&'a str),
    Int(u64),
    Float(f64),
    Text(&'a str),
    Dot,
    Open,
    Close,
    Assign,
    Minus,
    Newline,
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct Spanned<'a> {
    token: Token<'a>,
    start: usize,
    end: usize,
}

/// A tokenizer over normalized ASCCONV text.
#[derive(Debug)]
pub(crate) struct Lexer<'a> {
    text: &'a str,
    delimiter: &'a str,
    pos: usize,
    /// 1-based line number at `pos`
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str, delimiter: &'a str) -> Self {
        Lexer {
            text,
            delimiter,
            pos: 0,
            line: 1,
        }
    }

    fn syntax_error<T>(&self, start: usize, reason: &'static str) -> Result<T> {
        let rest = &self.text[start..];
        let end = rest.find('\n').unwrap_or(rest.len());
        SyntaxSnafu {
            line: self.line,
            fragment: rest[..end].trim(),
            reason,
        }
        .fail()
    }

    fn next_token(&mut self) -> Result<Option<Spanned<'a>>> {
        let text = self.text;
        loop {
            let rest = &text[self.pos..];
            let c = match rest.chars().next() {
                Some(c) => c,
                None => return Ok(None),
            };
            let start = self.pos;

            if rest.starts_with(self.delimiter) {
                let body_start = start + self.delimiter.len();
                let body_len = match text[body_start..].find(self.delimiter) {
                    Some(len) => len,
                    None => return self.syntax_error(start, "unterminated string"),
                };
                let body = &text[body_start..body_start + body_len];
                // strings may span lines
                self.line += body.matches('\n').count();
                self.pos = body_start + body_len + self.delimiter.len();
                return Ok(Some(self.spanned(Token::Text(body), start)));
            }

            let token = match c {
                '\n' => {
                    self.pos += 1;
                    let token = Spanned {
                        token: Token::Newline,
                        start,
                        end: self.pos,
                    };
                    self.line += 1;
                    return Ok(Some(token));
                }
                '#' => {
                    self.pos += rest.find('\n').unwrap_or(rest.len());
                    continue;
                }
                c if c.is_whitespace() => {
                    self.pos += c.len_utf8();
                    continue;
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if rest[1..].starts_with(|c: char| c.is_ascii_digit()) => self.number()?,
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let len = rest
                        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                        .unwrap_or(rest.len());
                    self.pos += len;
                    Token::Ident(&rest[..len])
                }
                '.' => self.punct(Token::Dot),
                '[' => self.punct(Token::Open),
                ']' => self.punct(Token::Close),
                '=' => self.punct(Token::Assign),
                '-' => self.punct(Token::Minus),
                _ => return self.syntax_error(start, "unexpected character"),
            };
            return Ok(Some(self.spanned(token, start)));
        }
    }

    fn spanned(&self, token: Token<'a>, start: usize) -> Spanned<'a> {
        Spanned {
            token,
            start,
            end: self.pos,
        }
    }

    fn punct(&mut self, token: Token<'a>) -> Token<'a> {
        self.pos += 1;
        token
    }

    /// Lex a decimal integer, hexadecimal integer or float literal.
    fn number(&mut self) -> Result<Token<'a>> {
        let start = self.pos;
        let text = self.text;
        let rest = &text[start..];
        let bytes = rest.as_bytes();

        if rest.starts_with("0x") || rest.starts_with("0X") {
            let len = rest[2..]
                .find(|c: char| !c.is_ascii_hexdigit())
                .unwrap_or(rest.len() - 2);
            let value = match u64::from_str_radix(&rest[2..2 + len], 16) {
                Ok(value) => value,
                Err(_) => return self.syntax_error(start, "invalid hexadecimal literal"),
            };
            self.pos += 2 + len;
            return Ok(Token::Int(value));
        }

        let digits = |mut i: usize| {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            i
        };
        let mut is_float = false;
        let mut i = digits(0);
        if i < bytes.len() && bytes[i] == b'.' {
            is_float = true;
            i = digits(i + 1);
        }
        if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
            let mut j = i + 1;
            if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                j += 1;
            }
            if j < bytes.len() && bytes[j].is_ascii_digit() {
                is_float = true;
                i = digits(j);
            }
        }

        let lexeme = &rest[..i];
        let token = if is_float {
            lexeme.parse().map(Token::Float).ok()
        } else {
            lexeme.parse().map(Token::Int).ok()
        };
        match token {
            Some(token) => {
                self.pos += i;
                Ok(token)
            }
            None => self.syntax_error(start, "numeric literal out of range"),
        }
    }

    /// Collect the tokens of the next non-empty statement.
    pub fn next_statement(&mut self) -> Result<Option<Statement<'a>>> {
        let mut tokens = SmallVec::new();
        let mut span: Option<(usize, usize)> = None;
        let mut line = self.line;
        loop {
            match self.next_token()? {
                None => break,
                Some(Spanned {
                    token: Token::Newline,
                    ..
                }) => {
                    if span.is_some() {
                        break;
                    }
                    line = self.line;
                }
                Some(spanned) => {
                    span = Some(match span {
                        Some((start, _)) => (start, spanned.end),
                        None => (spanned.start, spanned.end),
                    });
                    tokens.push(spanned.token);
                }
            }
        }
        Ok(span.map(|(start, end)| Statement {
            line,
            source: &self.text[start..end],
            tokens,
        }))
    }
}

/// The tokens of a single statement.
#[derive(Debug)]
pub(crate) struct Statement<'a> {
    /// The line on which the statement starts.
    pub line: usize,
    /// The statement's text, without comments.
    pub source: &'a str,
    tokens: SmallVec<[Token<'a>; 16]>,
}

impl<'a> Statement<'a> {
    /// Interpret the statement as an assignment.
    pub fn assignment(&self) -> Result<(Path, AscconvNode)> {
        let mut targets = self
            .tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| **t == Token::Assign)
            .map(|(i, _)| i);
        let split = match (targets.next(), targets.next()) {
            (Some(i), None) => i,
            (None, _) => {
                return SyntaxSnafu {
                    line: self.line,
                    fragment: self.source,
                    reason: "expected an assignment",
                }
                .fail()
            }
            (Some(_), Some(_)) => {
                return TooManyTargetsSnafu {
                    line: self.line,
                    fragment: self.source,
                }
                .fail()
            }
        };
        let path = self.target(&self.tokens[..split])?;
        let value = self.value(&self.tokens[split + 1..])?;
        Ok((path, value))
    }

    fn target(&self, tokens: &[Token<'a>]) -> Result<Path> {
        let unexpected = || {
            UnexpectedLhsSnafu {
                line: self.line,
                fragment: self.source,
            }
            .build()
        };

        let mut tokens = tokens.iter();
        let mut path = Path::new();
        match tokens.next() {
            Some(Token::Ident(name)) => path.push(PathAtom::new(*name, None)),
            _ => return Err(unexpected()),
        }
        while let Some(token) = tokens.next() {
            match token {
                Token::Dot => match tokens.next() {
                    Some(Token::Ident(name)) => path.push(PathAtom::new(*name, None)),
                    _ => return Err(unexpected()),
                },
                Token::Open => {
                    let index = match (tokens.next(), tokens.next()) {
                        (Some(Token::Int(index)), Some(Token::Close)) => {
                            usize::try_from(*index).map_err(|_| unexpected())?
                        }
                        _ => return Err(unexpected()),
                    };
                    match path.last_mut() {
                        Some(atom) if atom.index.is_none() => atom.index = Some(index),
                        // chained subscripts
                        _ => return Err(unexpected()),
                    }
                }
                _ => return Err(unexpected()),
            }
        }
        Ok(path)
    }

    fn value(&self, tokens: &[Token<'a>]) -> Result<AscconvNode> {
        let out_of_range = || {
            SyntaxSnafu {
                line: self.line,
                fragment: self.source,
                reason: "integer literal out of range",
            }
            .build()
        };
        match *tokens {
            [Token::Int(v)] => i64::try_from(v)
                .map(AscconvNode::Int)
                .map_err(|_| out_of_range()),
            [Token::Minus, Token::Int(v)] => i64::try_from(-i128::from(v))
                .map(AscconvNode::Int)
                .map_err(|_| out_of_range()),
            [Token::Float(v)] => Ok(AscconvNode::Float(v)),
            [Token::Minus, Token::Float(v)] => Ok(AscconvNode::Float(-v)),
            [Token::Text(s)] => Ok(AscconvNode::Text(s.to_owned())),
            _ => UnexpectedRhsSnafu {
                line: self.line,
                fragment: self.source,
            }
            .fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<Token<'_>> {
        let mut lexer = Lexer::new(text, "\"");
        let mut out = Vec::new();
        while let Some(spanned) = lexer.next_token().unwrap() {
            out.push(spanned.token);
        }
        out
    }

    #[test]
    fn lex_assignment() {
        assert_eq!(
            tokens("sSliceArray.asSlice[0].dThickness\t = \t2.5 # mm\n"),
            vec![
                Token::Ident("sSliceArray"),
                Token::Dot,
                Token::Ident("asSlice"),
                Token::Open,
                Token::Int(0),
                Token::Close,
                Token::Dot,
                Token::Ident("dThickness"),
                Token::Assign,
                Token::Float(2.5),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn lex_numbers() {
        assert_eq!(tokens("0x41"), vec![Token::Int(0x41)]);
        assert_eq!(tokens("1e-05"), vec![Token::Float(1e-5)]);
        assert_eq!(tokens(".5"), vec![Token::Float(0.5)]);
        assert_eq!(tokens("3."), vec![Token::Float(3.0)]);
        assert_eq!(tokens("-12"), vec![Token::Minus, Token::Int(12)]);
    }

    #[test]
    fn strings_have_no_escapes() {
        let mut lexer = Lexer::new(r#"a = ""C:\temp\x"" # path"#, "\"\"");
        let statement = lexer.next_statement().unwrap().unwrap();
        let (_, value) = statement.assignment().unwrap();
        assert_eq!(value, AscconvNode::Text(r"C:\temp\x".to_string()));
    }

    #[test]
    fn statements_skip_blank_lines() {
        let mut lexer = Lexer::new("\n\n# heading\na = 1\n\nb = -2\n", "\"");
        let first = lexer.next_statement().unwrap().unwrap();
        assert_eq!(first.line, 4);
        assert_eq!(first.source, "a = 1");
        let second = lexer.next_statement().unwrap().unwrap();
        assert_eq!(second.line, 6);
        assert_eq!(second.assignment().unwrap().1, AscconvNode::Int(-2));
        assert!(lexer.next_statement().unwrap().is_none());
    }

    #[test]
    fn chained_subscripts_are_rejected() {
        let mut lexer = Lexer::new("a[0][1] = 1", "\"");
        let statement = lexer.next_statement().unwrap().unwrap();
        assert!(matches!(
            statement.assignment(),
            Err(ParseError::UnexpectedLhs { .. })
        ));
    }
}
