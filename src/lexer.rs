use super::token::{Token, TokenType};

/// Lazy scanner: one token per `next_token` call, nothing buffered ahead.
pub struct Lexer<'src> {
    source: &'src str,
    start: usize,
    current: usize,
    line: usize,
}

fn is_alpha(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_digit(c: char) -> bool {
    c.is_ascii_digit()
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            start: 0,
            current: 0,
            line: 1,
        }
    }

    fn at_end(&self) -> bool {
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
        let c = self.peek().unwrap();
        self.current += c.len_utf8();
        c
    }

    fn check(&mut self, expected: char) -> bool {
        match self.peek() {
            Some(c) if c == expected => {
                self.advance();
                true
            }
            _ => false,
        }
    }

    fn make_token(&self, typ: TokenType) -> Token<'src> {
        Token::new(typ, &self.source[self.start..self.current], self.line)
    }

    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token::new(TokenType::Error, message, self.line)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '\n' => {
                    self.line += 1;
                    self.advance();
                }
                '/' => {
                    if self.peek_next() == Some('/') {
                        while !self.at_end() && self.peek() != Some('\n') {
                            self.advance();
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn check_keyword(&self, from: usize, rest: &str, typ: TokenType) -> TokenType {
        let lexeme = &self.source[self.start..self.current];
        if lexeme.len() == from + rest.len() && &lexeme[from..] == rest {
            typ
        } else {
            TokenType::Identifier
        }
    }

    fn identifier_type(&self) -> TokenType {
        use TokenType::*;

        let bytes = self.source[self.start..self.current].as_bytes();
        match bytes[0] {
            b'a' => self.check_keyword(1, "nd", And),
            b'c' => self.check_keyword(1, "lass", Class),
            b'e' => self.check_keyword(1, "lse", Else),
            b'f' => match bytes.get(1) {
                Some(b'a') => self.check_keyword(2, "lse", False),
                Some(b'o') => self.check_keyword(2, "r", For),
                Some(b'u') => self.check_keyword(2, "n", Fun),
                _ => Identifier,
            },
            b'i' => self.check_keyword(1, "f", If),
            b'n' => self.check_keyword(1, "il", Nil),
            b'o' => self.check_keyword(1, "r", Or),
            b'p' => self.check_keyword(1, "rint", Print),
            b'r' => self.check_keyword(1, "eturn", Return),
            b's' => self.check_keyword(1, "uper", Super),
            b't' => match bytes.get(1) {
                Some(b'h') => self.check_keyword(2, "is", This),
                Some(b'r') => self.check_keyword(2, "ue", True),
                _ => Identifier,
            },
            b'v' => self.check_keyword(1, "ar", Var),
            b'w' => self.check_keyword(1, "hile", While),
            _ => Identifier,
        }
    }

    fn identifier(&mut self) -> Token<'src> {
        while let Some(c) = self.peek() {
            if is_alpha(c) || is_digit(c) {
                self.advance();
            } else {
                break;
            }
        }
        self.make_token(self.identifier_type())
    }

    fn number(&mut self) -> Token<'src> {
        while let Some(c) = self.peek() {
            if is_digit(c) {
                self.advance();
            } else {
                break;
            }
        }

        // A fractional part only if a digit follows the dot.
        if self.peek() == Some('.') && self.peek_next().map_or(false, is_digit) {
            self.advance();
            while let Some(c) = self.peek() {
                if is_digit(c) {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        self.make_token(TokenType::Number)
    }

    fn string(&mut self) -> Token<'src> {
        while let Some(c) = self.peek() {
            match c {
                '"' => {
                    self.advance();
                    return self.make_token(TokenType::String);
                }
                '\n' => {
                    self.line += 1;
                    self.advance();
                }
                _ => {
                    self.advance();
                }
            }
        }
        self.error_token("Unterminated string.")
    }

    pub fn next_token(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;

        if self.at_end() {
            return self.make_token(TokenType::Eof);
        }

        let c = self.advance();
        if is_alpha(c) {
            return self.identifier();
        }
        if is_digit(c) {
            return self.number();
        }

        match c {
            '(' => self.make_token(TokenType::LeftParen),
            ')' => self.make_token(TokenType::RightParen),
            '{' => self.make_token(TokenType::LeftBrace),
            '}' => self.make_token(TokenType::RightBrace),
            ';' => self.make_token(TokenType::Semicolon),
            ',' => self.make_token(TokenType::Comma),
            '.' => self.make_token(TokenType::Dot),
            '-' => self.make_token(TokenType::Minus),
            '+' => self.make_token(TokenType::Plus),
            '/' => self.make_token(TokenType::Slash),
            '*' => self.make_token(TokenType::Star),
            '!' => {
                if self.check('=') {
                    self.make_token(TokenType::BangEqual)
                } else {
                    self.make_token(TokenType::Bang)
                }
            }
            '=' => {
                if self.check('=') {
                    self.make_token(TokenType::EqualEqual)
                } else {
                    self.make_token(TokenType::Equal)
                }
            }
            '<' => {
                if self.check('=') {
                    self.make_token(TokenType::LessEqual)
                } else {
                    self.make_token(TokenType::Less)
                }
            }
            '>' => {
                if self.check('=') {
                    self.make_token(TokenType::GreaterEqual)
                } else {
                    self.make_token(TokenType::Greater)
                }
            }
            '"' => self.string(),
            _ => self.error_token("Unexpected character."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<(TokenType, &str)> {
        let mut lexer = Lexer::new(source);
        let mut tokens = vec![];
        loop {
            let token = lexer.next_token();
            let done = token.typ == TokenType::Eof;
            tokens.push((token.typ, token.lexeme));
            if done {
                break;
            }
        }
        tokens
    }

    #[test]
    fn punctuation_and_operators() {
        use TokenType::*;

        let tokens = lex("(){};,.-+/* ! != = == < <= > >=");
        let expected = [
            LeftParen,
            RightParen,
            LeftBrace,
            RightBrace,
            Semicolon,
            Comma,
            Dot,
            Minus,
            Plus,
            Slash,
            Star,
            Bang,
            BangEqual,
            Equal,
            EqualEqual,
            Less,
            LessEqual,
            Greater,
            GreaterEqual,
            Eof,
        ];
        assert_eq!(
            tokens.iter().map(|(typ, _)| *typ).collect::<Vec<_>>(),
            expected
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        use TokenType::*;

        let tokens = lex("and class else false for fun if nil or print return super this true var while");
        assert!(tokens[..tokens.len() - 1].iter().all(|(typ, _)| *typ != Identifier));

        for source in ["anda", "classy", "fals", "f", "t", "printx", "_var", "va"] {
            let tokens = lex(source);
            assert_eq!(tokens[0], (Identifier, source), "{source}");
        }
    }

    #[test]
    fn numbers() {
        assert_eq!(lex("123")[0], (TokenType::Number, "123"));
        assert_eq!(lex("12.5")[0], (TokenType::Number, "12.5"));
        // No digit after the dot: the dot is its own token.
        let tokens = lex("12.");
        assert_eq!(tokens[0], (TokenType::Number, "12"));
        assert_eq!(tokens[1].0, TokenType::Dot);
    }

    #[test]
    fn string_token_spans_quotes() {
        assert_eq!(lex("\"foo\"")[0], (TokenType::String, "\"foo\""));
    }

    #[test]
    fn unterminated_string() {
        assert_eq!(lex("\"foo")[0], (TokenType::Error, "Unterminated string."));
    }

    #[test]
    fn line_counting() {
        let mut lexer = Lexer::new("one\n// comment\ntwo \"a\nb\" three");
        assert_eq!(lexer.next_token().line, 1);
        let two = lexer.next_token();
        assert_eq!((two.lexeme, two.line), ("two", 3));
        // The newline inside the string advances the line counter.
        assert_eq!(lexer.next_token().line, 4);
        assert_eq!(lexer.next_token().line, 4);
    }

    #[test]
    fn eof_is_idempotent() {
        let mut lexer = Lexer::new("");
        assert_eq!(lexer.next_token().typ, TokenType::Eof);
        assert_eq!(lexer.next_token().typ, TokenType::Eof);
    }

    #[test]
    fn unexpected_character() {
        assert_eq!(lex("@")[0], (TokenType::Error, "Unexpected character."));
    }
}
