use log::trace;
use phf::phf_map;

use crate::error::EmberError;
use crate::token::{Literal, Token, TokenType};

/// Check if a character can start an identifier
pub fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

/// Check if a character can continue an identifier
pub fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// All reserved words with their token types
pub static KEYWORDS: phf::Map<&'static str, TokenType> = phf_map! {
    "and" => TokenType::And,
    "class" => TokenType::Class,
    "else" => TokenType::Else,
    "false" => TokenType::False,
    "for" => TokenType::For,
    "fun" => TokenType::Fun,
    "if" => TokenType::If,
    "nil" => TokenType::Nil,
    "or" => TokenType::Or,
    "print" => TokenType::Print,
    "return" => TokenType::Return,
    "super" => TokenType::Super,
    "this" => TokenType::This,
    "true" => TokenType::True,
    "var" => TokenType::Var,
    "while" => TokenType::While,
};

/// Lazily turns source text into tokens.
///
/// Errors are yielded in-stream so a caller can keep collecting tokens (and
/// further errors) after a bad character. The final item is always an `Eof`
/// token.
pub struct Scanner<'a> {
    source: &'a str,
    start: usize,
    current: usize,
    line: usize,
    start_line: usize,
    include_comments: bool,
    finished: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            start: 0,
            current: 0,
            line: 1,
            start_line: 1,
            include_comments: false,
            finished: false,
        }
    }

    /// Create a scanner that includes comment tokens (for highlighting)
    pub fn with_comments(source: &'a str) -> Self {
        Self {
            include_comments: true,
            ..Self::new(source)
        }
    }
}

impl Iterator for Scanner<'_> {
    type Item = Result<Token, EmberError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }

            if self.is_at_end() {
                self.finished = true;
                return Some(Ok(Token {
                    token_type: TokenType::Eof,
                    lexeme: String::new(),
                    literal: None,
                    line: self.line,
                    span: self.current..self.current,
                }));
            }

            self.start = self.current;
            self.start_line = self.line;
            let c = self.advance();

            let token_type = match c {
                ' ' | '\r' | '\t' => continue,
                '\n' => {
                    self.line += 1;
                    continue;
                }
                '(' => TokenType::LeftParen,
                ')' => TokenType::RightParen,
                '{' => TokenType::LeftBrace,
                '}' => TokenType::RightBrace,
                ',' => TokenType::Comma,
                '.' => TokenType::Dot,
                '-' => TokenType::Minus,
                '+' => TokenType::Plus,
                ';' => TokenType::Semicolon,
                '*' => TokenType::Star,
                '/' => {
                    if self.match_char('/') {
                        while self.peek().is_some_and(|c| c != '\n') {
                            self.advance();
                        }
                        if self.include_comments {
                            return Some(Ok(self.add_token(TokenType::Comment)));
                        }
                        continue;
                    }
                    TokenType::Slash
                }
                '!' => self.either('=', TokenType::BangEqual, TokenType::Bang),
                '=' => self.either('=', TokenType::EqualEqual, TokenType::Equal),
                '<' => self.either('=', TokenType::LessEqual, TokenType::Less),
                '>' => self.either('=', TokenType::GreaterEqual, TokenType::Greater),
                '"' => return Some(self.string()),
                c if c.is_ascii_digit() => return Some(self.number()),
                c if is_identifier_start(c) => return Some(Ok(self.identifier())),
                _ => {
                    return Some(Err(EmberError::Scan {
                        message: "Unexpected character.".to_string(),
                        line: self.line,
                        span: self.start..self.current,
                    }));
                }
            };

            return Some(Ok(self.add_token(token_type)));
        }
    }
}

impl Scanner<'_> {
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current..].chars().next().unwrap_or('\0');
        self.current += c.len_utf8();
        c
    }

    fn peek(&self) -> Option<char> {
        self.source[self.current..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.current..].chars();
        chars.next();
        chars.next()
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn either(&mut self, expected: char, matched: TokenType, otherwise: TokenType) -> TokenType {
        if self.match_char(expected) {
            matched
        } else {
            otherwise
        }
    }

    fn add_token(&self, token_type: TokenType) -> Token {
        self.add_token_with_literal(token_type, None)
    }

    fn add_token_with_literal(&self, token_type: TokenType, literal: Option<Literal>) -> Token {
        let token = Token {
            token_type,
            lexeme: self.source[self.start..self.current].to_string(),
            literal,
            line: self.start_line,
            span: self.start..self.current,
        };
        trace!("scanned {:?} on line {}", token.token_type, token.line);
        token
    }

    fn identifier(&mut self) -> Token {
        while self.peek().is_some_and(is_identifier_char) {
            self.advance();
        }

        let text = &self.source[self.start..self.current];
        let token_type = KEYWORDS.get(text).copied().unwrap_or(TokenType::Identifier);
        self.add_token(token_type)
    }

    fn number(&mut self) -> Result<Token, EmberError> {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        // A fractional part needs at least one digit after the dot
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let text = &self.source[self.start..self.current];
        let value: f64 = text.parse().map_err(|_| EmberError::Scan {
            message: format!("Invalid number '{}'.", text),
            line: self.line,
            span: self.start..self.current,
        })?;
        Ok(self.add_token_with_literal(TokenType::Number, Some(Literal::Number(value))))
    }

    fn string(&mut self) -> Result<Token, EmberError> {
        while let Some(c) = self.peek() {
            if c == '"' {
                break;
            }
            if c == '\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            return Err(EmberError::Scan {
                message: "Unterminated string.".to_string(),
                line: self.line,
                span: self.start..self.current,
            });
        }

        // The closing quote
        self.advance();

        let value = self.source[self.start + 1..self.current - 1].to_string();
        Ok(self.add_token_with_literal(TokenType::String, Some(Literal::String(value))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(source: &str) -> Vec<TokenType> {
        Scanner::new(source)
            .filter_map(Result::ok)
            .map(|t| t.token_type)
            .collect()
    }

    #[test]
    fn empty_source_returns_eof() {
        let mut scanner = Scanner::new("");
        let token = scanner.next().unwrap().unwrap();
        assert_eq!(token.token_type, TokenType::Eof);
        assert!(scanner.next().is_none());
    }

    #[test]
    fn scans_all_single_char_tokens() {
        assert_eq!(
            types("(){},.-+;*/"),
            vec![
                TokenType::LeftParen,
                TokenType::RightParen,
                TokenType::LeftBrace,
                TokenType::RightBrace,
                TokenType::Comma,
                TokenType::Dot,
                TokenType::Minus,
                TokenType::Plus,
                TokenType::Semicolon,
                TokenType::Star,
                TokenType::Slash,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn scans_two_char_operators() {
        assert_eq!(
            types("! != = == < <= > >="),
            vec![
                TokenType::Bang,
                TokenType::BangEqual,
                TokenType::Equal,
                TokenType::EqualEqual,
                TokenType::Less,
                TokenType::LessEqual,
                TokenType::Greater,
                TokenType::GreaterEqual,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn tokens_have_correct_spans() {
        let mut scanner = Scanner::new("(\n)");

        let first = scanner.next().unwrap().unwrap();
        assert_eq!(first.span, 0..1);
        assert_eq!(first.line, 1);

        let second = scanner.next().unwrap().unwrap();
        assert_eq!(second.token_type, TokenType::RightParen);
        assert_eq!(second.span, 2..3);
        assert_eq!(second.line, 2);
    }

    #[test]
    fn scans_integer_and_decimal_numbers() {
        let tokens: Vec<Token> = Scanner::new("123 4.5").filter_map(Result::ok).collect();
        assert_eq!(tokens[0].literal, Some(Literal::Number(123.0)));
        assert_eq!(tokens[1].literal, Some(Literal::Number(4.5)));
    }

    #[test]
    fn trailing_dot_is_not_part_of_number() {
        assert_eq!(
            types("12."),
            vec![TokenType::Number, TokenType::Dot, TokenType::Eof]
        );
    }

    #[test]
    fn scans_string_literal_without_quotes() {
        let token = Scanner::new("\"ember\"").next().unwrap().unwrap();
        assert_eq!(token.token_type, TokenType::String);
        assert_eq!(token.lexeme, "\"ember\"");
        assert_eq!(token.literal, Some(Literal::String("ember".to_string())));
    }

    #[test]
    fn multiline_string_advances_line() {
        let tokens: Vec<Token> = Scanner::new("\"a\nb\" x").filter_map(Result::ok).collect();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].lexeme, "x");
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn unterminated_string_is_reported_and_scanning_ends() {
        let results: Vec<_> = Scanner::new("print \"oops").collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(EmberError::Scan { message, line, .. }) => {
                assert_eq!(message, "Unterminated string.");
                assert_eq!(*line, 1);
            }
            other => panic!("expected scan error, got {:?}", other),
        }
        assert_eq!(
            results[2].as_ref().unwrap().token_type,
            TokenType::Eof
        );
    }

    #[test]
    fn returns_error_for_unexpected_characters_and_continues() {
        let mut scanner = Scanner::new("(@)");

        let first = scanner.next().unwrap();
        assert_eq!(first.unwrap().token_type, TokenType::LeftParen);

        let second = scanner.next().unwrap();
        assert!(matches!(
            second,
            Err(EmberError::Scan { ref message, .. }) if message == "Unexpected character."
        ));

        let third = scanner.next().unwrap();
        assert_eq!(third.unwrap().token_type, TokenType::RightParen);
    }

    #[test]
    fn reports_each_bad_character() {
        let errors = Scanner::new("@ # $").filter(Result::is_err).count();
        assert_eq!(errors, 3);
    }

    #[test]
    fn recognizes_keywords_and_identifiers() {
        assert_eq!(
            types("class classy _under var1 this"),
            vec![
                TokenType::Class,
                TokenType::Identifier,
                TokenType::Identifier,
                TokenType::Identifier,
                TokenType::This,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn every_keyword_maps_to_a_keyword_type() {
        for (word, token_type) in KEYWORDS.entries() {
            assert!(token_type.is_keyword(), "{} should be a keyword", word);
            assert_eq!(types(word)[0], *token_type);
        }
    }

    #[test]
    fn line_comments_are_skipped() {
        assert_eq!(
            types("1 // the rest\n2"),
            vec![TokenType::Number, TokenType::Number, TokenType::Eof]
        );
    }

    #[test]
    fn with_comments_yields_comment_tokens() {
        let tokens: Vec<Token> = Scanner::with_comments("x // note")
            .filter_map(Result::ok)
            .collect();
        assert_eq!(tokens[1].token_type, TokenType::Comment);
        assert_eq!(tokens[1].lexeme, "// note");
    }

    #[test]
    fn scanning_restarts_from_the_beginning() {
        let source = "var a = 1;";
        assert_eq!(types(source), types(source));
    }
}
