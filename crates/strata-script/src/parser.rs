//! Recursive-descent parser for configuration scripts.
//!
//! Grammar, one statement per line:
//!
//! ```text
//! stmt  := IDENT (',' IDENT)* '=' expr
//!        | ('computed' | 'cached') IDENT '=' expr
//! expr  := or
//! or    := and ('||' and)*
//! and   := cmp ('&&' cmp)*
//! cmp   := add (('<'|'<='|'>'|'>='|'=='|'!=') add)?
//! add   := mul (('+'|'-') mul)*
//! mul   := unary (('*'|'/'|'%') unary)*
//! unary := ('-'|'!') unary | primary
//! primary := literal | list | IDENT | IDENT '(' args ')' | '(' expr ')'
//! ```

use crate::ast::{BinaryOp, Expr, Script, Stmt, UnaryOp};
use crate::error::ScriptError;
use crate::lexer::{tokenize, SpannedTok, Tok};

/// Parse a complete script.
pub fn parse(text: &str) -> Result<Script, ScriptError> {
    let toks = tokenize(text)?;
    let mut parser = Parser { toks, pos: 0 };
    let mut stmts = Vec::new();
    loop {
        parser.skip_newlines();
        if parser.at_end() {
            break;
        }
        stmts.push(parser.statement()?);
    }
    Ok(Script { stmts })
}

struct Parser {
    toks: Vec<SpannedTok>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|t| &t.tok)
    }

    fn line(&self) -> usize {
        self.toks
            .get(self.pos.min(self.toks.len().saturating_sub(1)))
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn next(&mut self) -> Option<SpannedTok> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some(Tok::Newline)) {
            self.pos += 1;
        }
    }

    fn error(&self, expected: &str) -> ScriptError {
        let (found, line) = match self.toks.get(self.pos) {
            Some(t) => (t.tok.describe(), t.line),
            None => ("end of input".to_string(), self.line()),
        };
        ScriptError::UnexpectedToken {
            expected: expected.to_string(),
            found,
            line,
        }
    }

    fn expect(&mut self, tok: Tok, expected: &str) -> Result<(), ScriptError> {
        if self.peek() == Some(&tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ScriptError> {
        match self.peek() {
            Some(Tok::Ident(_)) => match self.next() {
                Some(SpannedTok {
                    tok: Tok::Ident(name),
                    ..
                }) => Ok(name),
                _ => Err(self.error("identifier")),
            },
            _ => Err(self.error("identifier")),
        }
    }

    /// A statement ends at a newline or at end of input.
    fn end_of_statement(&mut self) -> Result<(), ScriptError> {
        match self.peek() {
            None => Ok(()),
            Some(Tok::Newline) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error("end of statement")),
        }
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.line();
        match self.peek() {
            Some(Tok::Computed) | Some(Tok::Cached) => {
                let memoize = self.peek() == Some(&Tok::Cached);
                self.pos += 1;
                let name = self.expect_ident()?;
                self.expect(Tok::Eq, "'='")?;
                let expr = self.expr()?;
                self.end_of_statement()?;
                Ok(Stmt::Computed {
                    name,
                    memoize,
                    expr,
                    line,
                })
            }
            Some(Tok::Ident(_)) => {
                let first = self.expect_ident()?;
                let mut names = vec![first];
                while self.peek() == Some(&Tok::Comma) {
                    self.pos += 1;
                    names.push(self.expect_ident()?);
                }
                self.expect(Tok::Eq, "'='")?;
                let expr = self.expr()?;
                self.end_of_statement()?;
                if names.len() == 1 {
                    Ok(Stmt::Assign {
                        name: names.remove(0),
                        expr,
                        line,
                    })
                } else {
                    Ok(Stmt::TupleAssign { names, expr, line })
                }
            }
            _ => Err(self.error("statement")),
        }
    }

    fn expr(&mut self) -> Result<Expr, ScriptError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Tok::OrOr) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.cmp_expr()?;
        while self.peek() == Some(&Tok::AndAnd) {
            self.pos += 1;
            let rhs = self.cmp_expr()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn cmp_expr(&mut self) -> Result<Expr, ScriptError> {
        let lhs = self.add_expr()?;
        let op = match self.peek() {
            Some(Tok::Lt) => BinaryOp::Lt,
            Some(Tok::Le) => BinaryOp::Le,
            Some(Tok::Gt) => BinaryOp::Gt,
            Some(Tok::Ge) => BinaryOp::Ge,
            Some(Tok::EqEq) => BinaryOp::Eq,
            Some(Tok::Ne) => BinaryOp::Ne,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.add_expr()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn add_expr(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.mul_expr()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinaryOp::Add,
                Some(Tok::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.mul_expr()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn mul_expr(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.unary_expr()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinaryOp::Mul,
                Some(Tok::Slash) => BinaryOp::Div,
                Some(Tok::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary_expr()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary_expr(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.peek() {
            Some(Tok::Minus) => Some(UnaryOp::Neg),
            Some(Tok::Bang) => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.unary_expr()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        match self.peek() {
            Some(Tok::Int(_)) => match self.next() {
                Some(SpannedTok { tok: Tok::Int(v), .. }) => Ok(Expr::Int(v)),
                _ => Err(self.error("expression")),
            },
            Some(Tok::Float(_)) => match self.next() {
                Some(SpannedTok {
                    tok: Tok::Float(v), ..
                }) => Ok(Expr::Float(v)),
                _ => Err(self.error("expression")),
            },
            Some(Tok::Str(_)) => match self.next() {
                Some(SpannedTok { tok: Tok::Str(s), .. }) => Ok(Expr::Str(s)),
                _ => Err(self.error("expression")),
            },
            Some(Tok::True) => {
                self.pos += 1;
                Ok(Expr::Bool(true))
            }
            Some(Tok::False) => {
                self.pos += 1;
                Ok(Expr::Bool(false))
            }
            Some(Tok::LBracket) => {
                self.pos += 1;
                let mut items = Vec::new();
                if self.peek() != Some(&Tok::RBracket) {
                    loop {
                        items.push(self.expr()?);
                        if self.peek() == Some(&Tok::Comma) {
                            self.pos += 1;
                            // Allow a trailing comma before the bracket.
                            if self.peek() == Some(&Tok::RBracket) {
                                break;
                            }
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Tok::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Some(Tok::Ident(_)) => {
                let name = self.expect_ident()?;
                if self.peek() == Some(&Tok::LParen) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Tok::RParen) {
                        loop {
                            args.push(self.expr()?);
                            if self.peek() == Some(&Tok::Comma) {
                                self.pos += 1;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Tok::RParen, "')'")?;
                    Ok(Expr::Call { name, args, line })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            _ => Err(self.error("expression")),
        }
    }
}
