use crate::ast::{BinOp, Expr, Var};
use crate::error::ExprError;
use crate::lexer::{Lexer, Token, TokenWithPos};

// ── Parser ────────────────────────────────────────────────────────────────

/// Recursive-descent parser over the fixed grammar:
///
/// ```text
/// expr    := term (('+' | '-') term)*
/// term    := unary (('*' | '/') unary)*
/// unary   := ('-' | '+') unary | primary
/// primary := number | 'width' | 'height' | 'dpr' | '(' expr ')'
/// ```
pub struct Parser<'s> {
    src: &'s str,
    tokens: Vec<TokenWithPos>,
    pos: usize,
}

impl<'s> Parser<'s> {
    pub fn new(src: &'s str, tokens: Vec<TokenWithPos>) -> Self {
        Self { src, tokens, pos: 0 }
    }

    fn current_col(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.col)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |t| &t.token)
    }

    fn advance(&mut self) -> Token {
        let tok = self
            .tokens
            .get(self.pos)
            .map_or(Token::Eof, |t| t.token.clone());
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn err(&self, msg: impl Into<String>) -> ExprError {
        ExprError::new(msg, self.src, self.current_col())
    }

    // ── Entry ─────────────────────────────────────────────────────────────

    pub fn parse(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == &Token::Eof {
            return Err(self.err("empty expression"));
        }
        let expr = self.parse_expr()?;
        match self.peek() {
            Token::Eof => Ok(expr),
            tok => Err(self.err(format!("unexpected {:?} after expression", tok))),
        }
    }

    // ── Precedence levels ─────────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Token::Minus => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Token::Plus => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let col = self.current_col();
        match self.advance() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Ident(name) => Var::from_ident(&name).map(Expr::Var).ok_or_else(|| {
                ExprError::new(
                    format!("unknown identifier {:?}; expected width, height or dpr", name),
                    self.src,
                    col,
                )
            }),
            Token::LParen => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Token::RParen => Ok(inner),
                    Token::Eof => Err(ExprError::new("unclosed '('", self.src, col)),
                    tok => Err(self.err(format!("expected ')', got {:?}", tok))),
                }
            }
            Token::Eof => Err(ExprError::new("unexpected end of expression", self.src, col)),
            tok => Err(ExprError::new(format!("expected a value, got {:?}", tok), self.src, col)),
        }
    }
}

// ── Public parse entry point ──────────────────────────────────────────────

/// Parse an arithmetic expression over `width`, `height` and `dpr`.
pub fn parse_expr(src: &str) -> Result<Expr, ExprError> {
    let tokens = Lexer::new(src).tokenize()?;
    Parser::new(src, tokens).parse()
}
