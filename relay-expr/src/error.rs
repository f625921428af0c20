/// Expression compile error.
///
/// Offsets are byte offsets into the source text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    /// A character outside the expression grammar.
    #[error("unexpected character {character:?} at offset {offset}")]
    UnexpectedCharacter {
        /// The offending character.
        character: char,
        /// Where it was found.
        offset: usize,
    },
    /// An integer literal that does not fit `int32`.
    #[error("integer literal out of range at offset {offset}")]
    LiteralOverflow {
        /// Start of the literal.
        offset: usize,
    },
    /// A keyword that is reserved but not part of the expression grammar.
    #[error("reserved keyword `{keyword}` at offset {offset}")]
    ReservedKeyword {
        /// The keyword.
        keyword: &'static str,
        /// Where it was found.
        offset: usize,
    },
    /// A token that cannot start or continue an expression here.
    #[error("unexpected token at offset {offset}")]
    UnexpectedToken {
        /// Where it was found.
        offset: usize,
    },
    /// A group or call without its closing parenthesis.
    #[error("unbalanced parenthesis at offset {offset}")]
    UnbalancedParens {
        /// Where the closing parenthesis was expected.
        offset: usize,
    },
    /// Leftover tokens after a complete expression.
    #[error("trailing tokens at offset {offset}")]
    TrailingTokens {
        /// Start of the leftovers.
        offset: usize,
    },
    /// Built or evaluated an expression with no tokens.
    #[error("empty expression")]
    EmptyExpression,
    /// An identifier the host does not know as a variable.
    #[error("unknown variable `{name}`")]
    UnknownVariable {
        /// The identifier.
        name: String,
    },
    /// A call target the host does not know as a function.
    #[error("unknown function `{name}`")]
    UnknownFunction {
        /// The identifier.
        name: String,
    },
    /// A call of something that is not a function name.
    #[error("call target at offset {offset} is not a function name")]
    InvalidCallTarget {
        /// Where the call target is.
        offset: usize,
    },
    /// Operand or binding types do not line up.
    #[error("type mismatch at offset {offset}")]
    TypeMismatch {
        /// Where the mismatch was detected.
        offset: usize,
    },
    /// A call with the wrong number of arguments.
    #[error("call expects {expected} arguments, found {found}")]
    ArityMismatch {
        /// Declared parameter count.
        expected: u32,
        /// Supplied argument count.
        found: u32,
    },
    /// The enclosing assembly's constant table is full.
    #[error("too many constants")]
    TooManyConstants,
    /// The enclosing assembly's variable table is full.
    #[error("too many variables")]
    TooManyVariables,
    /// The enclosing assembly's function table is full.
    #[error("too many functions")]
    TooManyFunctions,
    /// A compiler query before a successful `compile`.
    #[error("expression not compiled")]
    NotCompiled,
}
