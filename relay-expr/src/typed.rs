//! Typed lowering of the parsed tree, and the constant folder.

use relay_types::{FunctionId, NameHash, TypeId, Value};

use crate::compiler::ExpressionCompilerHost;
use crate::error::ExprError;
use crate::parse::{Ast, AstId, BinaryOp, ParseTree, UnaryOp};
use crate::token::Token;

pub(crate) type TypedId = u32;

#[derive(Debug, Clone)]
pub(crate) enum Typed {
    Literal {
        value: Value,
    },
    Variable {
        ty: TypeId,
        name_hash: NameHash,
    },
    Unary {
        ty: TypeId,
        op: UnaryOp,
        child: TypedId,
    },
    Binary {
        ty: TypeId,
        op: BinaryOp,
        left: TypedId,
        right: TypedId,
    },
    Call {
        ty: TypeId,
        function: FunctionId,
        args: Vec<TypedId>,
    },
}

impl Typed {
    pub(crate) fn ty(&self) -> TypeId {
        match self {
            Self::Literal { value } => value.type_id(),
            Self::Variable { ty, .. }
            | Self::Unary { ty, .. }
            | Self::Binary { ty, .. }
            | Self::Call { ty, .. } => *ty,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TypedTree {
    pub nodes: Vec<Typed>,
    pub root: TypedId,
}

const fn is_numeric(ty: TypeId) -> bool {
    ty.raw() == TypeId::INT32.raw() || ty.raw() == TypeId::FLOAT32.raw()
}

pub(crate) fn lower(
    host: &dyn ExpressionCompilerHost,
    source: &str,
    tokens: &[Token],
    tree: &ParseTree,
) -> Result<TypedTree, ExprError> {
    let mut lowerer = Lowerer {
        host,
        source,
        tokens,
        ast: &tree.nodes,
        nodes: Vec::new(),
    };
    let root = lowerer.lower(tree.root)?;
    Ok(TypedTree {
        nodes: lowerer.nodes,
        root,
    })
}

struct Lowerer<'a> {
    host: &'a dyn ExpressionCompilerHost,
    source: &'a str,
    tokens: &'a [Token],
    ast: &'a [Ast],
    nodes: Vec<Typed>,
}

impl Lowerer<'_> {
    fn push(&mut self, node: Typed) -> TypedId {
        let id = self.nodes.len() as TypedId;
        self.nodes.push(node);
        id
    }

    fn lower(&mut self, ast_id: AstId) -> Result<TypedId, ExprError> {
        match &self.ast[ast_id as usize] {
            Ast::Literal { token } => {
                let token = &self.tokens[*token];
                let value = i32::try_from(token.value).map_err(|_| ExprError::LiteralOverflow {
                    offset: token.offset,
                })?;
                Ok(self.push(Typed::Literal {
                    value: Value::Int32(value),
                }))
            }
            Ast::Identifier { token } => {
                let token = &self.tokens[*token];
                let name = token.text(self.source);
                let ty = self
                    .host
                    .lookup_variable(name)
                    .ok_or_else(|| ExprError::UnknownVariable {
                        name: name.to_owned(),
                    })?;
                Ok(self.push(Typed::Variable {
                    ty,
                    name_hash: NameHash::of(name),
                }))
            }
            Ast::Unary { op, child } => {
                let op = *op;
                let child_offset = self.offset_of(*child);
                let child = self.lower(*child)?;
                let child_ty = self.nodes[child as usize].ty();

                let legal = match op {
                    UnaryOp::Negate => is_numeric(child_ty),
                    UnaryOp::Not => child_ty == TypeId::BOOL,
                };
                if !legal {
                    return Err(ExprError::TypeMismatch {
                        offset: child_offset,
                    });
                }
                Ok(self.push(Typed::Unary {
                    ty: child_ty,
                    op,
                    child,
                }))
            }
            Ast::Binary {
                op,
                token,
                left,
                right,
            } => {
                let op = *op;
                let offset = self.tokens[*token].offset;
                let (left, right) = (*left, *right);
                let left = self.lower(left)?;
                let right = self.lower(right)?;
                let (left_ty, right_ty) =
                    (self.nodes[left as usize].ty(), self.nodes[right as usize].ty());

                let legal = match op {
                    BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                        left_ty == right_ty && is_numeric(left_ty)
                    }
                    BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                        left_ty == TypeId::BOOL && right_ty == TypeId::BOOL
                    }
                };
                if !legal {
                    return Err(ExprError::TypeMismatch { offset });
                }
                Ok(self.push(Typed::Binary {
                    ty: left_ty,
                    op,
                    left,
                    right,
                }))
            }
            Ast::Group { child } => self.lower(*child),
            Ast::Call {
                target,
                token,
                args,
            } => {
                let offset = self.tokens[*token].offset;
                let Ast::Identifier { token: name_token } = &self.ast[*target as usize] else {
                    return Err(ExprError::InvalidCallTarget { offset });
                };
                let name = self.tokens[*name_token].text(self.source);
                let meta = self
                    .host
                    .lookup_function(name)
                    .ok_or_else(|| ExprError::UnknownFunction {
                        name: name.to_owned(),
                    })?;

                if args.len() > u8::MAX as usize {
                    return Err(ExprError::ArityMismatch {
                        expected: u8::MAX as u32,
                        found: args.len() as u32,
                    });
                }

                let mut lowered = Vec::with_capacity(args.len());
                for &arg in args {
                    lowered.push(self.lower(arg)?);
                }

                // Arity and parameter types are only checked when the host
                // supplies a full signature.
                if let Some(params) = &meta.params {
                    if params.len() != lowered.len() {
                        return Err(ExprError::ArityMismatch {
                            expected: params.len() as u32,
                            found: lowered.len() as u32,
                        });
                    }
                    for (param, arg) in params.iter().zip(&lowered) {
                        if self.nodes[*arg as usize].ty() != *param {
                            return Err(ExprError::TypeMismatch { offset });
                        }
                    }
                }

                Ok(self.push(Typed::Call {
                    ty: meta.return_type,
                    function: meta.function,
                    args: lowered,
                }))
            }
        }
    }

    fn offset_of(&self, ast_id: AstId) -> usize {
        match &self.ast[ast_id as usize] {
            Ast::Literal { token } | Ast::Identifier { token } => self.tokens[*token].offset,
            Ast::Unary { child, .. } | Ast::Group { child } => self.offset_of(*child),
            Ast::Binary { token, .. } | Ast::Call { token, .. } => self.tokens[*token].offset,
        }
    }
}

/// Fold every subtree whose inputs are all literals. Integer arithmetic
/// wraps; division by zero folds to zero, matching the evaluator.
pub(crate) fn fold(tree: &TypedTree) -> TypedTree {
    let mut out = TypedTree::default();
    out.root = fold_node(&tree.nodes, tree.root, &mut out.nodes);
    out
}

fn push_folded(out: &mut Vec<Typed>, node: Typed) -> TypedId {
    let id = out.len() as TypedId;
    out.push(node);
    id
}

fn fold_node(nodes: &[Typed], id: TypedId, out: &mut Vec<Typed>) -> TypedId {
    match &nodes[id as usize] {
        node @ (Typed::Literal { .. } | Typed::Variable { .. }) => push_folded(out, node.clone()),
        Typed::Unary { ty, op, child } => {
            let child = fold_node(nodes, *child, out);
            if let Typed::Literal { value } = &out[child as usize] {
                let folded = apply_unary(*op, *value);
                out.truncate(out.len() - 1);
                return push_folded(out, Typed::Literal { value: folded });
            }
            push_folded(
                out,
                Typed::Unary {
                    ty: *ty,
                    op: *op,
                    child,
                },
            )
        }
        Typed::Binary {
            ty,
            op,
            left,
            right,
        } => {
            let left = fold_node(nodes, *left, out);
            let right = fold_node(nodes, *right, out);
            if let (Typed::Literal { value: lhs }, Typed::Literal { value: rhs }) =
                (&out[left as usize], &out[right as usize])
            {
                let folded = apply_binary(*op, *lhs, *rhs);
                out.truncate(out.len() - 2);
                return push_folded(out, Typed::Literal { value: folded });
            }
            push_folded(
                out,
                Typed::Binary {
                    ty: *ty,
                    op: *op,
                    left,
                    right,
                },
            )
        }
        Typed::Call { ty, function, args } => {
            // Host functions are never assumed pure.
            let args = args.iter().map(|arg| fold_node(nodes, *arg, out)).collect();
            push_folded(
                out,
                Typed::Call {
                    ty: *ty,
                    function: *function,
                    args,
                },
            )
        }
    }
}

fn apply_unary(op: UnaryOp, value: Value) -> Value {
    match (op, value) {
        (UnaryOp::Negate, Value::Int32(v)) => Value::Int32(v.wrapping_neg()),
        (UnaryOp::Negate, Value::Float32(v)) => Value::Float32(-v),
        (UnaryOp::Not, Value::Bool(v)) => Value::Bool(!v),
        // Unreachable after type-checking.
        _ => Value::Nil,
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Int32(l), Value::Int32(r)) => match op {
            BinaryOp::Add => Value::Int32(l.wrapping_add(r)),
            BinaryOp::Sub => Value::Int32(l.wrapping_sub(r)),
            BinaryOp::Mul => Value::Int32(l.wrapping_mul(r)),
            BinaryOp::Div => Value::Int32(if r == 0 { 0 } else { l.wrapping_div(r) }),
            _ => Value::Nil,
        },
        (Value::Float32(l), Value::Float32(r)) => match op {
            BinaryOp::Add => Value::Float32(l + r),
            BinaryOp::Sub => Value::Float32(l - r),
            BinaryOp::Mul => Value::Float32(l * r),
            BinaryOp::Div => Value::Float32(if r == 0.0 { 0.0 } else { l / r }),
            _ => Value::Nil,
        },
        (Value::Bool(l), Value::Bool(r)) => match op {
            BinaryOp::And => Value::Bool(l && r),
            BinaryOp::Or => Value::Bool(l || r),
            BinaryOp::Xor => Value::Bool(l ^ r),
            _ => Value::Nil,
        },
        _ => Value::Nil,
    }
}
