//! Expression compiler and evaluator.
//!
//! Single-line arithmetic/logical expressions are compiled to stack-machine
//! bytecode (see `relay-asm`) and evaluated against a host-supplied
//! constant/variable/function provider. The compiler pipeline is
//! tokenise → parse (Pratt) → type-check → optionally fold constants → emit.

mod compiler;
mod error;
mod eval;
mod parse;
mod token;
mod typed;

pub use compiler::{
    ExpressionBuilder, ExpressionCompiler, ExpressionCompilerHost, FunctionCompileMeta,
};
pub use error::ExprError;
pub use eval::{evaluate, EvalError, EvaluateHost, MAX_STACK_DEPTH};
