//! The expression compiler: orchestrates the pipeline and generates
//! bytecode through a host-supplied builder.

use relay_asm::Instruction;
use relay_types::{FunctionId, NameHash, TypeId, Value};

use crate::error::ExprError;
use crate::parse::{parse, BinaryOp, UnaryOp};
use crate::token::tokenize;
use crate::typed::{fold, lower, Typed, TypedId, TypedTree};

/// What the host knows about a callable function at compile time.
#[derive(Debug, Clone)]
pub struct FunctionCompileMeta {
    /// Host identity of the function, stored in the assembly.
    pub function: FunctionId,
    /// The call's result type.
    pub return_type: TypeId,
    /// Parameter types, if the signature is fixed. `None` means the
    /// function is variadic and arguments are unchecked.
    pub params: Option<Vec<TypeId>>,
}

/// Name resolution for the expression compiler.
pub trait ExpressionCompilerHost {
    /// Resolve a variable name to its type.
    fn lookup_variable(&self, name: &str) -> Option<TypeId>;
    /// Resolve a function name.
    fn lookup_function(&self, name: &str) -> Option<FunctionCompileMeta>;
}

/// Sink for generated code. The builder owns the enclosing assembly's
/// constant/function/variable tables and returns dense indices into them,
/// de-duplicating as it sees fit; `None` signals a full table.
pub trait ExpressionBuilder {
    /// Append one instruction to the byte stream.
    fn emit(&mut self, instruction: Instruction);
    /// Intern a constant.
    fn push_constant(&mut self, value: Value) -> Option<u16>;
    /// Intern a function reference.
    fn push_function(&mut self, function: FunctionId) -> Option<u16>;
    /// Intern a variable reference by name hash.
    fn push_variable(&mut self, name_hash: NameHash) -> Option<u16>;
}

/// Compiles a single expression. Reusable across expressions via
/// [`ExpressionCompiler::compile`], which resets prior state.
#[derive(Debug, Default)]
pub struct ExpressionCompiler {
    tree: Option<TypedTree>,
    empty: bool,
}

impl ExpressionCompiler {
    /// A fresh compiler with no compiled expression.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any compiled expression.
    pub fn reset(&mut self) {
        self.tree = None;
        self.empty = false;
    }

    /// Compile `source`. An all-whitespace source compiles successfully to
    /// the empty expression, queryable via [`Self::is_empty`].
    pub fn compile(
        &mut self,
        host: &dyn ExpressionCompilerHost,
        source: &str,
    ) -> Result<(), ExprError> {
        self.reset();

        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            self.empty = true;
            return Ok(());
        }

        let ast = parse(source, &tokens)?;
        self.tree = Some(lower(host, source, &tokens, &ast)?);
        Ok(())
    }

    /// Fold constant subtrees. Idempotent.
    pub fn optimize(&mut self) -> Result<(), ExprError> {
        if self.empty {
            return Ok(());
        }
        let tree = self.tree.as_ref().ok_or(ExprError::NotCompiled)?;
        self.tree = Some(fold(tree));
        Ok(())
    }

    /// Whether the compiled source had no tokens.
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Whether the expression folded down to a single constant.
    pub fn is_constant(&self) -> bool {
        match &self.tree {
            Some(tree) => matches!(tree.nodes[tree.root as usize], Typed::Literal { .. }),
            None => false,
        }
    }

    /// Whether the expression is exactly one variable read.
    pub fn is_variable_only(&self) -> bool {
        match &self.tree {
            Some(tree) => matches!(tree.nodes[tree.root as usize], Typed::Variable { .. }),
            None => false,
        }
    }

    /// The expression's result type; `void` when empty or not compiled.
    pub fn result_type(&self) -> TypeId {
        match &self.tree {
            Some(tree) => tree.nodes[tree.root as usize].ty(),
            None => TypeId::VOID,
        }
    }

    /// The folded constant value, if [`Self::is_constant`].
    pub fn as_constant(&self) -> Option<Value> {
        match &self.tree {
            Some(tree) => match tree.nodes[tree.root as usize] {
                Typed::Literal { value } => Some(value),
                _ => None,
            },
            None => None,
        }
    }

    /// Generate bytecode through `builder`. Building the empty expression
    /// is an error; the caller decides what an empty binding means.
    pub fn build(&self, builder: &mut dyn ExpressionBuilder) -> Result<(), ExprError> {
        if self.empty {
            return Err(ExprError::EmptyExpression);
        }
        let tree = self.tree.as_ref().ok_or(ExprError::NotCompiled)?;
        generate(tree, tree.root, builder)
    }
}

fn generate(
    tree: &TypedTree,
    id: TypedId,
    builder: &mut dyn ExpressionBuilder,
) -> Result<(), ExprError> {
    match &tree.nodes[id as usize] {
        Typed::Literal { value } => generate_literal(*value, builder),
        Typed::Variable { name_hash, .. } => {
            let index = builder
                .push_variable(*name_hash)
                .ok_or(ExprError::TooManyVariables)?;
            builder.emit(Instruction::Read(index));
            Ok(())
        }
        Typed::Unary { op, child, .. } => {
            generate(tree, *child, builder)?;
            builder.emit(match op {
                UnaryOp::Negate => Instruction::Neg,
                UnaryOp::Not => Instruction::Not,
            });
            Ok(())
        }
        Typed::Binary {
            op, left, right, ..
        } => {
            generate(tree, *left, builder)?;
            generate(tree, *right, builder)?;
            builder.emit(match op {
                BinaryOp::Add => Instruction::Add,
                BinaryOp::Sub => Instruction::Sub,
                BinaryOp::Mul => Instruction::Mul,
                BinaryOp::Div => Instruction::Div,
                BinaryOp::And => Instruction::And,
                BinaryOp::Or => Instruction::Or,
                BinaryOp::Xor => Instruction::Xor,
            });
            Ok(())
        }
        Typed::Call { function, args, .. } => {
            for &arg in args {
                generate(tree, arg, builder)?;
            }
            let index = builder
                .push_function(*function)
                .ok_or(ExprError::TooManyFunctions)?;
            builder.emit(Instruction::Call {
                function: index,
                argc: args.len() as u8,
            });
            Ok(())
        }
    }
}

/// Pick the narrowest push for a literal before falling back to the
/// constant table.
fn generate_literal(value: Value, builder: &mut dyn ExpressionBuilder) -> Result<(), ExprError> {
    let instruction = match value {
        Value::Nil => Instruction::PushNil,
        Value::Bool(true) => Instruction::PushTrue,
        Value::Bool(false) => Instruction::PushFalse,
        Value::Int32(0) => Instruction::Push0,
        Value::Int32(1) => Instruction::Push1,
        Value::Int32(2) => Instruction::Push2,
        Value::Int32(-1) => Instruction::PushNeg1,
        Value::Int32(v) if i8::try_from(v).is_ok() => Instruction::PushS8(v as i8),
        Value::Int32(v) if u8::try_from(v).is_ok() => Instruction::PushU8(v as u8),
        Value::Int32(v) if i16::try_from(v).is_ok() => Instruction::PushS16(v as i16),
        Value::Int32(v) if u16::try_from(v).is_ok() => Instruction::PushU16(v as u16),
        other => {
            let index = builder
                .push_constant(other)
                .ok_or(ExprError::TooManyConstants)?;
            Instruction::PushConstant(index)
        }
    };
    builder.emit(instruction);
    Ok(())
}
