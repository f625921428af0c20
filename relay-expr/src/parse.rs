//! Pratt expression parser producing a flat AST arena.

use crate::error::ExprError;
use crate::token::{Token, TokenKind};

pub(crate) type AstId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone)]
pub(crate) enum Ast {
    Literal { token: usize },
    Identifier { token: usize },
    Unary { op: UnaryOp, child: AstId },
    Binary { op: BinaryOp, token: usize, left: AstId, right: AstId },
    Group { child: AstId },
    Call { target: AstId, token: usize, args: Vec<AstId> },
}

#[derive(Debug)]
pub(crate) struct ParseTree {
    pub nodes: Vec<Ast>,
    pub root: AstId,
}

/// Prefix position: operator and right binding power.
fn unary_power(kind: TokenKind) -> Option<(Option<UnaryOp>, i32)> {
    match kind {
        TokenKind::Minus => Some((Some(UnaryOp::Negate), 3)),
        // A parenthesised group; binds nothing on the right.
        TokenKind::LParen => Some((None, 0)),
        _ => None,
    }
}

/// Infix position: left binding power; `LParen` here is a call.
fn binary_power(kind: TokenKind) -> Option<(Option<BinaryOp>, i32)> {
    match kind {
        TokenKind::Plus => Some((Some(BinaryOp::Add), 1)),
        TokenKind::Minus => Some((Some(BinaryOp::Sub), 1)),
        TokenKind::Star => Some((Some(BinaryOp::Mul), 2)),
        TokenKind::Slash => Some((Some(BinaryOp::Div), 2)),
        TokenKind::LParen => Some((None, 4)),
        _ => None,
    }
}

pub(crate) fn parse(source: &str, tokens: &[Token]) -> Result<ParseTree, ExprError> {
    if tokens.is_empty() {
        return Err(ExprError::EmptyExpression);
    }

    let mut parser = Parser {
        source,
        tokens,
        next: 0,
        nodes: Vec::new(),
    };

    let root = parser.parse_expr(0)?;

    if let Some(token) = parser.peek() {
        return Err(ExprError::TrailingTokens {
            offset: token.offset,
        });
    }

    Ok(ParseTree {
        nodes: parser.nodes,
        root,
    })
}

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    next: usize,
    nodes: Vec<Ast>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.next)
    }

    fn end_offset(&self) -> usize {
        self.source.len()
    }

    fn push(&mut self, node: Ast) -> AstId {
        let id = self.nodes.len() as AstId;
        self.nodes.push(node);
        id
    }

    fn parse_expr(&mut self, power: i32) -> Result<AstId, ExprError> {
        let token = *self.peek().ok_or(ExprError::UnexpectedToken {
            offset: self.end_offset(),
        })?;

        // Parse an atom or a prefix operator.
        let mut left = match token.kind {
            TokenKind::LiteralInt => {
                self.next += 1;
                self.push(Ast::Literal { token: self.next - 1 })
            }
            TokenKind::Identifier => {
                self.next += 1;
                self.push(Ast::Identifier { token: self.next - 1 })
            }
            TokenKind::Reserved => {
                return Err(ExprError::ReservedKeyword {
                    keyword: reserved_name(token.text(self.source)),
                    offset: token.offset,
                });
            }
            _ => {
                let Some((op, right_power)) = unary_power(token.kind) else {
                    return Err(ExprError::UnexpectedToken {
                        offset: token.offset,
                    });
                };
                self.next += 1;

                let child = self.parse_expr(right_power)?;
                match op {
                    Some(op) => self.push(Ast::Unary { op, child }),
                    None => {
                        self.expect_rparen()?;
                        self.push(Ast::Group { child })
                    }
                }
            }
        };

        // Fold infix operators of higher binding power onto `left`.
        while let Some(&token) = self.peek() {
            let Some((op, left_power)) = binary_power(token.kind) else {
                break;
            };
            if left_power <= power {
                break;
            }
            let op_token = self.next;
            self.next += 1;

            left = match op {
                Some(op) => {
                    let right = self.parse_expr(left_power)?;
                    self.push(Ast::Binary {
                        op,
                        token: op_token,
                        left,
                        right,
                    })
                }
                None => self.parse_call(left, op_token)?,
            };
        }

        Ok(left)
    }

    fn parse_call(&mut self, target: AstId, token: usize) -> Result<AstId, ExprError> {
        let mut args = Vec::new();

        if self.peek().map(|t| t.kind) != Some(TokenKind::RParen) {
            loop {
                args.push(self.parse_expr(0)?);
                if self.peek().map(|t| t.kind) == Some(TokenKind::Comma) {
                    self.next += 1;
                    continue;
                }
                break;
            }
        }
        self.expect_rparen()?;

        Ok(self.push(Ast::Call {
            target,
            token,
            args,
        }))
    }

    fn expect_rparen(&mut self) -> Result<(), ExprError> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::RParen => {
                self.next += 1;
                Ok(())
            }
            Some(token) => Err(ExprError::UnbalancedParens {
                offset: token.offset,
            }),
            None => Err(ExprError::UnbalancedParens {
                offset: self.end_offset(),
            }),
        }
    }
}

fn reserved_name(text: &str) -> &'static str {
    match text {
        "and" => "and",
        "or" => "or",
        "not" => "not",
        "xor" => "xor",
        "true" => "true",
        "false" => "false",
        "nil" => "nil",
        _ => "is",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tokenize;

    fn parse_text(source: &str) -> Result<ParseTree, ExprError> {
        parse(source, &tokenize(source).unwrap())
    }

    #[test]
    fn precedence_binds_mul_over_add() {
        // 1 + 2 * 3 parses as 1 + (2 * 3): root is Add with Mul on the right.
        let tree = parse_text("1 + 2 * 3").unwrap();
        let Ast::Binary { op, right, .. } = &tree.nodes[tree.root as usize] else {
            panic!("expected binary root");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            tree.nodes[*right as usize],
            Ast::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn subtraction_is_left_associative() {
        // 5 - 2 - 1 parses as (5 - 2) - 1.
        let tree = parse_text("5 - 2 - 1").unwrap();
        let Ast::Binary { op, left, .. } = &tree.nodes[tree.root as usize] else {
            panic!("expected binary root");
        };
        assert_eq!(*op, BinaryOp::Sub);
        assert!(matches!(
            tree.nodes[*left as usize],
            Ast::Binary {
                op: BinaryOp::Sub,
                ..
            }
        ));
    }

    #[test]
    fn groups_override_precedence() {
        let tree = parse_text("(1 + 2) * 3").unwrap();
        let Ast::Binary { op, left, .. } = &tree.nodes[tree.root as usize] else {
            panic!("expected binary root");
        };
        assert_eq!(*op, BinaryOp::Mul);
        assert!(matches!(tree.nodes[*left as usize], Ast::Group { .. }));
    }

    #[test]
    fn calls_collect_arguments() {
        let tree = parse_text("f(1, 2 + 3, g())").unwrap();
        let Ast::Call { args, .. } = &tree.nodes[tree.root as usize] else {
            panic!("expected call root");
        };
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn error_cases() {
        assert!(matches!(parse_text(""), Err(ExprError::EmptyExpression)));
        assert!(matches!(
            parse_text("(1 + 2"),
            Err(ExprError::UnbalancedParens { .. })
        ));
        assert!(matches!(
            parse_text("1 2"),
            Err(ExprError::TrailingTokens { .. })
        ));
        assert!(matches!(
            parse_text("1 +"),
            Err(ExprError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            parse_text("not 1"),
            Err(ExprError::ReservedKeyword { keyword: "not", .. })
        ));
    }
}
