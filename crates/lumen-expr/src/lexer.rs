use crate::error::ExprError;

// ── Token ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Eof,
}

/// A token plus the 1-based column where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenWithPos {
    pub token: Token,
    pub col: usize,
}

// ── Lexer ─────────────────────────────────────────────────────────────────

pub struct Lexer<'s> {
    src: &'s str,
    pos: usize,
}

impl<'s> Lexer<'s> {
    pub fn new(src: &'s str) -> Self {
        Self { src, pos: 0 }
    }

    pub fn tokenize(mut self) -> Result<Vec<TokenWithPos>, ExprError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let col = self.col();
            let token = self.next_token()?;
            let eof = token == Token::Eof;
            tokens.push(TokenWithPos { token, col });
            if eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn col(&self) -> usize {
        self.src[..self.pos].chars().count() + 1
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.src[self.pos..].chars().next()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn err(&self, msg: impl Into<String>, col: usize) -> ExprError {
        ExprError::new(msg, self.src, col)
    }

    fn next_token(&mut self) -> Result<Token, ExprError> {
        let ch = match self.peek() {
            None => return Ok(Token::Eof),
            Some(c) => c,
        };

        match ch {
            '+' => { self.advance(); Ok(Token::Plus) }
            '-' => { self.advance(); Ok(Token::Minus) }
            '*' => { self.advance(); Ok(Token::Star) }
            '/' => { self.advance(); Ok(Token::Slash) }
            '(' => { self.advance(); Ok(Token::LParen) }
            ')' => { self.advance(); Ok(Token::RParen) }
            c if c.is_ascii_digit() || c == '.' => self.lex_number(),
            c if c.is_ascii_alphabetic() || c == '_' => Ok(self.lex_ident()),
            other => Err(self.err(format!("unexpected character {:?}", other), self.col())),
        }
    }

    fn lex_number(&mut self) -> Result<Token, ExprError> {
        let start = self.pos;
        let col = self.col();
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') {
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        // Exponent: `1e3`, `2.5E-2`
        if matches!(self.peek(), Some('e' | 'E')) {
            self.advance();
            if matches!(self.peek(), Some('+' | '-')) {
                self.advance();
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        let s = &self.src[start..self.pos];
        s.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.err(format!("invalid number {:?}", s), col))
    }

    fn lex_ident(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.advance();
        }
        Token::Ident(self.src[start..self.pos].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn operators_and_parens() {
        assert_eq!(
            kinds("(width+1)*2/dpr-3"),
            vec![
                Token::LParen,
                Token::Ident("width".into()),
                Token::Plus,
                Token::Number(1.0),
                Token::RParen,
                Token::Star,
                Token::Number(2.0),
                Token::Slash,
                Token::Ident("dpr".into()),
                Token::Minus,
                Token::Number(3.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn decimals_and_exponents() {
        assert_eq!(kinds("0.25"), vec![Token::Number(0.25), Token::Eof]);
        assert_eq!(kinds(".5"), vec![Token::Number(0.5), Token::Eof]);
        assert_eq!(kinds("1e3"), vec![Token::Number(1000.0), Token::Eof]);
        assert_eq!(kinds("2.5E-1"), vec![Token::Number(0.25), Token::Eof]);
    }

    #[test]
    fn columns_are_one_based() {
        let toks = Lexer::new("  width * 2").tokenize().unwrap();
        assert_eq!(toks[0].col, 3);
        assert_eq!(toks[1].col, 9);
        assert_eq!(toks[2].col, 11);
    }

    #[test]
    fn rejects_foreign_characters() {
        let err = Lexer::new("width % 2").tokenize().unwrap_err();
        assert_eq!(err.col, 7);
        assert_eq!(err.source, "width % 2");
    }
}
