//! Hand-written recursive descent parser.
//!
//! Precedence, lowest first: ternary / elvis, `||`, `&&`, equality,
//! relational and `in`, additive, multiplicative, unary, postfix
//! (member access, calls, indexing, collection operators), primary.

use super::ast::{BinaryOp, CollectionOp, Expr, Literal, UnaryOp};
use super::error::EvalError;
use super::lexer::{SpannedToken, Token};

/// Maximum recursion depth of the parser itself.
pub const MAX_NESTING: usize = 64;

/// Recursive descent parser over a token stream.
pub struct Parser<'a> {
    tokens: &'a [SpannedToken],
    pos: usize,
    depth: usize,
    source_len: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [SpannedToken], source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            source_len,
        }
    }

    /// Parse a complete expression; trailing tokens are an error.
    pub fn parse(mut self) -> Result<Expr, EvalError> {
        let expr = self.parse_expr()?;
        if let Some(token) = self.peek() {
            return Err(self.error_here(format!("unexpected '{token}' after expression")));
        }
        Ok(expr)
    }

    // === Utility Methods ===

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_nth(&self, n: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, span)| span.start)
            .unwrap_or(self.source_len)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), EvalError> {
        if self.match_token(token) {
            return Ok(());
        }
        let found = match self.peek() {
            Some(t) => format!("'{t}'"),
            None => "end of expression".to_string(),
        };
        Err(self.error_here(format!("expected '{token}', found {found}")))
    }

    fn error_here(&self, message: String) -> EvalError {
        EvalError::syntax(message, self.offset())
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error_here(format!(
                "expression nesting exceeds {MAX_NESTING} levels"
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // === Grammar ===

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        self.enter()?;
        let result = self.parse_ternary();
        self.leave();
        result
    }

    fn parse_ternary(&mut self) -> Result<Expr, EvalError> {
        let condition = self.parse_or()?;
        if self.match_token(&Token::Question) {
            let then = self.parse_expr()?;
            self.expect(&Token::Colon)?;
            let otherwise = self.parse_expr()?;
            return Ok(Expr::Ternary {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        if self.match_token(&Token::Elvis) {
            let fallback = self.parse_expr()?;
            return Ok(Expr::Elvis {
                value: Box::new(condition),
                fallback: Box::new(fallback),
            });
        }
        Ok(condition)
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_and()?;
        while self.match_token(&Token::Or) {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_equality()?;
        while self.match_token(&Token::And) {
            let right = self.parse_equality()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::In) => BinaryOp::In,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        if let Some(literal) = self.negative_literal() {
            self.pos += 2;
            return Ok(Expr::Literal(literal));
        }
        let op = match self.peek() {
            Some(Token::Not) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        self.enter()?;
        let operand = self.parse_unary();
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    /// `-<int>` not followed by a postfix operator, as one literal.
    fn negative_literal(&self) -> Option<Literal> {
        let (Some(Token::Minus), Some(Token::Int(n))) = (self.peek(), self.peek_nth(1)) else {
            return None;
        };
        let postfix = matches!(
            self.peek_nth(2),
            Some(
                Token::Dot
                    | Token::SafeDot
                    | Token::LBracket
                    | Token::Select
                    | Token::Project
                    | Token::SelectFirst
                    | Token::SelectLast
            )
        );
        if postfix {
            return None;
        }
        0i64.checked_sub_unsigned(*n).map(Literal::Int)
    }

    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_primary()?;
        loop {
            expr = match self.peek() {
                Some(Token::Dot) | Some(Token::SafeDot) => {
                    let safe = self.check(&Token::SafeDot);
                    self.pos += 1;
                    self.parse_member(expr, safe)?
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    }
                }
                Some(Token::Select) => self.parse_collection(expr, CollectionOp::Select)?,
                Some(Token::Project) => self.parse_collection(expr, CollectionOp::Project)?,
                Some(Token::SelectFirst) => self.parse_collection(expr, CollectionOp::First)?,
                Some(Token::SelectLast) => self.parse_collection(expr, CollectionOp::Last)?,
                _ => break,
            };
        }
        Ok(expr)
    }

    fn parse_member(&mut self, target: Expr, safe: bool) -> Result<Expr, EvalError> {
        let name = match self.advance() {
            Some(Token::Ident(name)) => name.clone(),
            Some(other) => {
                self.pos -= 1;
                return Err(self.error_here(format!("expected member name, found '{other}'")));
            }
            None => return Err(self.error_here("expected member name".to_string())),
        };
        if self.check(&Token::LParen) {
            let args = self.parse_args()?;
            return Ok(Expr::Call {
                target: Box::new(target),
                method: name,
                args,
                safe,
            });
        }
        Ok(Expr::Member {
            target: Box::new(target),
            name,
            safe,
        })
    }

    fn parse_collection(&mut self, target: Expr, op: CollectionOp) -> Result<Expr, EvalError> {
        self.pos += 1;
        let body = self.parse_expr()?;
        self.expect(&Token::RBracket)?;
        Ok(Expr::Collection {
            op,
            target: Box::new(target),
            body: Box::new(body),
        })
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, EvalError> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if self.match_token(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.match_token(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen)?;
            return Ok(args);
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        let start = self.offset();
        let Some(token) = self.advance() else {
            return Err(self.error_here("unexpected end of expression".to_string()));
        };
        match token {
            Token::Int(n) => i64::try_from(*n)
                .map(|n| Expr::Literal(Literal::Int(n)))
                .map_err(|_| EvalError::syntax(format!("integer literal {n} is out of range"), start)),
            Token::Float(n) => Ok(Expr::Literal(Literal::Float(*n))),
            Token::Str(s) => Ok(Expr::Literal(Literal::Str(s.clone()))),
            Token::True => Ok(Expr::Literal(Literal::Bool(true))),
            Token::False => Ok(Expr::Literal(Literal::Bool(false))),
            Token::Null => Ok(Expr::Literal(Literal::Null)),
            Token::Ident(name) => {
                if self.check(&Token::LParen) {
                    return Err(EvalError::syntax(
                        format!("'{name}(...)' has no receiver; only methods of bindings are callable"),
                        start,
                    ));
                }
                Ok(Expr::Binding(name.clone()))
            }
            Token::Variable(name) if name == "this" => Ok(Expr::This),
            Token::Variable(name) => Err(EvalError::syntax(
                format!("unknown variable '#{name}'; only #this is defined"),
                start,
            )),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => self.parse_list(),
            Token::LBrace => self.parse_map(),
            other => Err(EvalError::syntax(format!("unexpected '{other}'"), start)),
        }
    }

    fn parse_list(&mut self) -> Result<Expr, EvalError> {
        let mut items = Vec::new();
        if self.match_token(&Token::RBracket) {
            return Ok(Expr::List(items));
        }
        loop {
            items.push(self.parse_expr()?);
            if self.match_token(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RBracket)?;
            return Ok(Expr::List(items));
        }
    }

    fn parse_map(&mut self) -> Result<Expr, EvalError> {
        let mut entries = Vec::new();
        if self.match_token(&Token::RBrace) {
            return Ok(Expr::Map(entries));
        }
        loop {
            // Bare identifiers before ':' are string keys.
            let key = match (self.peek(), self.peek_nth(1)) {
                (Some(Token::Ident(name)), Some(Token::Colon)) => {
                    self.pos += 1;
                    Expr::Literal(Literal::Str(name.clone()))
                }
                _ => self.parse_expr()?,
            };
            self.expect(&Token::Colon)?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            if self.match_token(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RBrace)?;
            return Ok(Expr::Map(entries));
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
