// patina-lexer - Scanner implementation
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The scanner converts Patina source code into tokens on demand.

use crate::token::{Token, TokenKind};

/// A pull-model scanner over a source string.
pub struct Scanner<'src> {
    source: &'src str,
    /// Byte offset of the start of the token being scanned.
    start: usize,
    /// Byte offset of the next character to consume.
    current: usize,
    /// Current source line (1-indexed).
    line: u32,
}

impl<'src> Scanner<'src> {
    /// Create a scanner for the given source. A leading `#!` line is
    /// skipped here so a script can carry a shebang.
    pub fn new(source: &'src str) -> Self {
        let mut scanner = Scanner {
            source,
            start: 0,
            current: 0,
            line: 1,
        };
        if source.starts_with("#!") {
            while let Some(c) = scanner.peek() {
                if c == '\n' {
                    break;
                }
                scanner.advance();
            }
        }
        scanner
    }

    /// Scan and return the next token.
    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        // A float may start with '.' when a digit follows.
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            return self.number();
        }

        let c = self.advance();
        if is_alpha(c) {
            return self.identifier();
        }
        if c.is_ascii_digit() {
            return self.number();
        }

        match c {
            '(' => self.make_token(TokenKind::LeftParen),
            ')' => self.make_token(TokenKind::RightParen),
            '{' => self.make_token(TokenKind::LeftBrace),
            '}' => self.make_token(TokenKind::RightBrace),
            '[' => self.make_token(TokenKind::LeftBracket),
            ']' => self.make_token(TokenKind::RightBracket),
            ';' => self.make_token(TokenKind::Semicolon),
            ',' => self.make_token(TokenKind::Comma),
            '.' => self.make_token(TokenKind::Dot),
            '?' => self.make_token(TokenKind::Question),
            ':' => self.make_token(TokenKind::Colon),
            '~' => self.make_token(TokenKind::Tilde),

            '/' => {
                let kind = if self.match_char('=') {
                    TokenKind::SlashEqual
                } else {
                    TokenKind::Slash
                };
                self.make_token(kind)
            }
            '^' => {
                let kind = if self.match_char('=') {
                    TokenKind::CaretEqual
                } else {
                    TokenKind::Caret
                };
                self.make_token(kind)
            }
            '!' => {
                let kind = if self.match_char('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.make_token(kind)
            }
            '=' => {
                let kind = if self.match_char('=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.make_token(kind)
            }

            '&' => {
                let kind = if self.match_char('=') {
                    TokenKind::AmpEqual
                } else if self.match_char('&') {
                    TokenKind::And
                } else {
                    TokenKind::Amp
                };
                self.make_token(kind)
            }
            '|' => {
                let kind = if self.match_char('=') {
                    TokenKind::PipeEqual
                } else if self.match_char('|') {
                    TokenKind::Or
                } else {
                    TokenKind::Pipe
                };
                self.make_token(kind)
            }
            '-' => {
                let kind = if self.match_char('=') {
                    TokenKind::MinusEqual
                } else if self.match_char('-') {
                    TokenKind::MinusMinus
                } else if self.match_char('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                };
                self.make_token(kind)
            }
            '+' => {
                let kind = if self.match_char('=') {
                    TokenKind::PlusEqual
                } else if self.match_char('+') {
                    TokenKind::PlusPlus
                } else {
                    TokenKind::Plus
                };
                self.make_token(kind)
            }

            '*' => {
                let kind = if self.match_char('*') {
                    if self.match_char('=') {
                        TokenKind::StarStarEqual
                    } else {
                        TokenKind::StarStar
                    }
                } else if self.match_char('=') {
                    TokenKind::StarEqual
                } else {
                    TokenKind::Star
                };
                self.make_token(kind)
            }
            '%' => {
                let kind = if self.match_char('%') {
                    if self.match_char('=') {
                        TokenKind::PercentPercentEqual
                    } else {
                        TokenKind::PercentPercent
                    }
                } else if self.match_char('=') {
                    TokenKind::PercentEqual
                } else {
                    TokenKind::Percent
                };
                self.make_token(kind)
            }
            '<' => {
                let kind = if self.match_char('<') {
                    if self.match_char('=') {
                        TokenKind::LessLessEqual
                    } else {
                        TokenKind::LessLess
                    }
                } else if self.match_char('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.make_token(kind)
            }
            '>' => {
                let kind = if self.match_char('>') {
                    if self.match_char('=') {
                        TokenKind::GreaterGreaterEqual
                    } else {
                        TokenKind::GreaterGreater
                    }
                } else if self.match_char('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.make_token(kind)
            }

            '\'' | '"' => self.string(c),

            _ => self.error_token("Unexpected character."),
        }
    }

    /// The current source line.
    pub fn line(&self) -> u32 {
        self.line
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn peek(&self) -> Option<char> {
        self.source[self.current..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.current..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> char {
        let c = self.peek().expect("advance past end of source");
        self.current += c.len_utf8();
        c
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() != Some(expected) {
            return false;
        }
        self.advance();
        true
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        Token {
            kind,
            lexeme: &self.source[self.start..self.current],
            line: self.line,
        }
    }

    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token {
            kind: TokenKind::Error,
            lexeme: message,
            line: self.line,
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\r') | Some('\t') => {
                    self.advance();
                }
                Some('\n') => {
                    self.line += 1;
                    self.advance();
                }
                Some('/') => {
                    if self.peek_next() == Some('/') {
                        while let Some(c) = self.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.advance();
                        }
                    } else if self.peek_next() == Some('*') {
                        self.block_comment();
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    /// Block comments nest; an unterminated comment ends at EOF.
    fn block_comment(&mut self) {
        self.advance();
        self.advance();
        let mut depth = 1usize;
        while depth > 0 && !self.is_at_end() {
            if self.peek() == Some('/') && self.peek_next() == Some('*') {
                depth += 1;
                self.advance();
                self.advance();
            } else if self.peek() == Some('*') && self.peek_next() == Some('/') {
                depth -= 1;
                self.advance();
                self.advance();
            } else {
                if self.peek() == Some('\n') {
                    self.line += 1;
                }
                self.advance();
            }
        }
    }

    fn string(&mut self, quote: char) -> Token<'src> {
        if self.peek() == Some(quote) && self.peek_next() == Some(quote) {
            // Triple-quoted string: may span lines.
            self.advance();
            self.advance();
            loop {
                if self.is_at_end() {
                    return self.error_token("Unterminated string.");
                }
                let c = self.advance();
                if c == '\n' {
                    self.line += 1;
                }
                if c == quote && self.peek() == Some(quote) && self.peek_next() == Some(quote) {
                    self.advance();
                    self.advance();
                    return self.make_token(TokenKind::String);
                }
            }
        }

        while let Some(c) = self.peek() {
            if c == quote || c == '\n' {
                break;
            }
            self.advance();
        }
        if self.peek() != Some(quote) {
            return self.error_token("Unterminated string.");
        }
        self.advance();
        self.make_token(TokenKind::String)
    }

    fn number(&mut self) -> Token<'src> {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
            return self.make_token(TokenKind::Float);
        }

        self.make_token(TokenKind::Int)
    }

    fn identifier(&mut self) -> Token<'src> {
        while self.peek().is_some_and(|c| is_alpha(c) || c.is_ascii_digit()) {
            self.advance();
        }
        self.make_token(self.identifier_kind())
    }

    /// Keyword recognition dispatches on the first letter, then compares
    /// the full lexeme.
    fn identifier_kind(&self) -> TokenKind {
        let text = &self.source[self.start..self.current];
        match text.as_bytes()[0] {
            b'a' => check_keyword(text, "and", TokenKind::And),
            b'c' => check_keyword(text, "class", TokenKind::Class),
            b'e' => check_keyword(text, "else", TokenKind::Else),
            b'f' => match text.as_bytes().get(1) {
                Some(b'a') => check_keyword(text, "false", TokenKind::False),
                Some(b'o') => check_keyword(text, "for", TokenKind::For),
                Some(b'u') => check_keyword(text, "func", TokenKind::Func),
                _ => TokenKind::Identifier,
            },
            b'i' => check_keyword(text, "if", TokenKind::If),
            b'n' => check_keyword(text, "none", TokenKind::None),
            b'o' => check_keyword(text, "or", TokenKind::Or),
            b'p' => check_keyword(text, "print", TokenKind::Print),
            b'r' => check_keyword(text, "return", TokenKind::Return),
            b's' => check_keyword(text, "super", TokenKind::Super),
            b't' => match text.as_bytes().get(1) {
                Some(b'h') => check_keyword(text, "this", TokenKind::This),
                Some(b'r') => check_keyword(text, "true", TokenKind::True),
                _ => TokenKind::Identifier,
            },
            b'v' => check_keyword(text, "var", TokenKind::Var),
            b'w' => check_keyword(text, "while", TokenKind::While),
            _ => TokenKind::Identifier,
        }
    }
}

fn is_alpha(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn check_keyword(text: &str, keyword: &str, kind: TokenKind) -> TokenKind {
    if text == keyword {
        kind
    } else {
        TokenKind::Identifier
    }
}
