use core::fmt;

/// The byte can't be mapped to any known [`Opcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("invalid opcode byte {0:#04x}")]
pub struct InvalidOpcode(
    /// The unrecognised byte.
    pub u8,
);

/// Opcode representation of the expression VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// No operation.
    Nop = 0x00,

    /// Push `true`.
    PushTrue = 0x01,
    /// Push `false`.
    PushFalse = 0x02,
    /// Push nil.
    PushNil = 0x03,
    /// Push `int32` 0.
    Push0 = 0x04,
    /// Push `int32` 1.
    Push1 = 0x05,
    /// Push `int32` 2.
    Push2 = 0x06,
    /// Push `int32` −1.
    PushNeg1 = 0x07,

    /// Push a sign-extended 8-bit immediate as `int32`.
    PushS8 = 0x08,
    /// Push a zero-extended 8-bit immediate as `int32`.
    PushU8 = 0x09,
    /// Push a sign-extended big-endian 16-bit immediate as `int32`.
    PushS16 = 0x0a,
    /// Push a zero-extended big-endian 16-bit immediate as `int32`.
    PushU16 = 0x0b,

    /// Push an entry of the enclosing assembly's constant table.
    PushConstant = 0x0c,

    /// Push the current value of a variable.
    Read = 0x0d,

    /// Call a host function: pops `argc` arguments, pushes the result.
    Call = 0x0e,

    /// Arithmetic negation.
    Neg = 0x0f,
    /// Boolean negation.
    Not = 0x10,

    /// Addition.
    Add = 0x11,
    /// Subtraction.
    Sub = 0x12,
    /// Multiplication.
    Mul = 0x13,
    /// Division; division by zero yields zero.
    Div = 0x14,
    /// Boolean conjunction.
    And = 0x15,
    /// Boolean disjunction.
    Or = 0x16,
    /// Boolean exclusive or.
    Xor = 0x17,
}

impl Opcode {
    /// Number of immediate bytes following the opcode byte.
    pub const fn immediate_len(self) -> usize {
        match self {
            Self::PushS8 | Self::PushU8 => 1,
            Self::PushS16 | Self::PushU16 | Self::PushConstant | Self::Read => 2,
            Self::Call => 3,
            _ => 0,
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcode;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        match byte {
            0x00 => Ok(Nop),
            0x01 => Ok(PushTrue),
            0x02 => Ok(PushFalse),
            0x03 => Ok(PushNil),
            0x04 => Ok(Push0),
            0x05 => Ok(Push1),
            0x06 => Ok(Push2),
            0x07 => Ok(PushNeg1),
            0x08 => Ok(PushS8),
            0x09 => Ok(PushU8),
            0x0a => Ok(PushS16),
            0x0b => Ok(PushU16),
            0x0c => Ok(PushConstant),
            0x0d => Ok(Read),
            0x0e => Ok(Call),
            0x0f => Ok(Neg),
            0x10 => Ok(Not),
            0x11 => Ok(Add),
            0x12 => Ok(Sub),
            0x13 => Ok(Mul),
            0x14 => Ok(Div),
            0x15 => Ok(And),
            0x16 => Ok(Or),
            0x17 => Ok(Xor),
            _ => Err(InvalidOpcode(byte)),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
