use crate::opcode::{InvalidOpcode, Opcode};

/// Failure while decoding an instruction from a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The opcode byte is not part of the instruction set.
    #[error(transparent)]
    InvalidOpcode(#[from] InvalidOpcode),
    /// The stream ended inside an instruction's immediate bytes.
    #[error("truncated immediate for {opcode}")]
    TruncatedImmediate {
        /// The instruction whose immediate was cut short.
        opcode: Opcode,
    },
    /// The stream ended where an opcode byte was expected.
    #[error("unexpected end of bytecode")]
    UnexpectedEnd,
}

/// A decoded instruction: opcode plus immediates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Instruction {
    /// No operation.
    Nop,
    /// Push `true`.
    PushTrue,
    /// Push `false`.
    PushFalse,
    /// Push nil.
    PushNil,
    /// Push `int32` 0.
    Push0,
    /// Push `int32` 1.
    Push1,
    /// Push `int32` 2.
    Push2,
    /// Push `int32` −1.
    PushNeg1,
    /// Push a small signed integer.
    PushS8(i8),
    /// Push a small unsigned integer.
    PushU8(u8),
    /// Push a medium signed integer.
    PushS16(i16),
    /// Push a medium unsigned integer.
    PushU16(u16),
    /// Push an assembly constant by table index.
    PushConstant(u16),
    /// Push a variable's current value by table index.
    Read(u16),
    /// Call a host function by table index with `argc` stack arguments.
    Call {
        /// Index into the assembly's function table.
        function: u16,
        /// Number of arguments popped from the stack.
        argc: u8,
    },
    /// Arithmetic negation.
    Neg,
    /// Boolean negation.
    Not,
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Boolean conjunction.
    And,
    /// Boolean disjunction.
    Or,
    /// Boolean exclusive or.
    Xor,
}

impl Instruction {
    /// The instruction's opcode.
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Nop => Opcode::Nop,
            Self::PushTrue => Opcode::PushTrue,
            Self::PushFalse => Opcode::PushFalse,
            Self::PushNil => Opcode::PushNil,
            Self::Push0 => Opcode::Push0,
            Self::Push1 => Opcode::Push1,
            Self::Push2 => Opcode::Push2,
            Self::PushNeg1 => Opcode::PushNeg1,
            Self::PushS8(_) => Opcode::PushS8,
            Self::PushU8(_) => Opcode::PushU8,
            Self::PushS16(_) => Opcode::PushS16,
            Self::PushU16(_) => Opcode::PushU16,
            Self::PushConstant(_) => Opcode::PushConstant,
            Self::Read(_) => Opcode::Read,
            Self::Call { .. } => Opcode::Call,
            Self::Neg => Opcode::Neg,
            Self::Not => Opcode::Not,
            Self::Add => Opcode::Add,
            Self::Sub => Opcode::Sub,
            Self::Mul => Opcode::Mul,
            Self::Div => Opcode::Div,
            Self::And => Opcode::And,
            Self::Or => Opcode::Or,
            Self::Xor => Opcode::Xor,
        }
    }

    /// Encoded length in bytes: the opcode byte plus immediates.
    pub const fn len(&self) -> usize {
        1 + self.opcode().immediate_len()
    }

    /// Append the encoded instruction to `buffer`. Immediates are
    /// big-endian.
    pub fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.opcode() as u8);
        match *self {
            Self::PushS8(value) => buffer.push(value as u8),
            Self::PushU8(value) => buffer.push(value),
            Self::PushS16(value) => buffer.extend_from_slice(&value.to_be_bytes()),
            Self::PushU16(value) => buffer.extend_from_slice(&value.to_be_bytes()),
            Self::PushConstant(index) => buffer.extend_from_slice(&index.to_be_bytes()),
            Self::Read(index) => buffer.extend_from_slice(&index.to_be_bytes()),
            Self::Call { function, argc } => {
                buffer.extend_from_slice(&function.to_be_bytes());
                buffer.push(argc);
            }
            _ => {}
        }
    }

    /// Decode one instruction from the head of `bytes`, returning it with
    /// its encoded length.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        let (&first, rest) = bytes.split_first().ok_or(DecodeError::UnexpectedEnd)?;
        let opcode = Opcode::try_from(first)?;

        let truncated = DecodeError::TruncatedImmediate { opcode };
        let immediate = rest
            .get(..opcode.immediate_len())
            .ok_or(truncated)?;

        let instruction = match opcode {
            Opcode::Nop => Self::Nop,
            Opcode::PushTrue => Self::PushTrue,
            Opcode::PushFalse => Self::PushFalse,
            Opcode::PushNil => Self::PushNil,
            Opcode::Push0 => Self::Push0,
            Opcode::Push1 => Self::Push1,
            Opcode::Push2 => Self::Push2,
            Opcode::PushNeg1 => Self::PushNeg1,
            Opcode::PushS8 => Self::PushS8(immediate[0] as i8),
            Opcode::PushU8 => Self::PushU8(immediate[0]),
            Opcode::PushS16 => Self::PushS16(i16::from_be_bytes([immediate[0], immediate[1]])),
            Opcode::PushU16 => Self::PushU16(u16::from_be_bytes([immediate[0], immediate[1]])),
            Opcode::PushConstant => {
                Self::PushConstant(u16::from_be_bytes([immediate[0], immediate[1]]))
            }
            Opcode::Read => Self::Read(u16::from_be_bytes([immediate[0], immediate[1]])),
            Opcode::Call => Self::Call {
                function: u16::from_be_bytes([immediate[0], immediate[1]]),
                argc: immediate[2],
            },
            Opcode::Neg => Self::Neg,
            Opcode::Not => Self::Not,
            Opcode::Add => Self::Add,
            Opcode::Sub => Self::Sub,
            Opcode::Mul => Self::Mul,
            Opcode::Div => Self::Div,
            Opcode::And => Self::And,
            Opcode::Or => Self::Or,
            Opcode::Xor => Self::Xor,
        };

        Ok((instruction, instruction.len()))
    }

    /// Iterate over the instructions of an encoded byte stream.
    pub fn iter(bytes: &[u8]) -> InstructionIter<'_> {
        InstructionIter { bytes }
    }
}

/// Iterator over an encoded instruction stream; yields a [`DecodeError`]
/// and stops if the stream is malformed.
#[derive(Debug, Clone)]
pub struct InstructionIter<'a> {
    bytes: &'a [u8],
}

impl Iterator for InstructionIter<'_> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes.is_empty() {
            return None;
        }
        match Instruction::decode(self.bytes) {
            Ok((instruction, len)) => {
                self.bytes = &self.bytes[len..];
                Some(Ok(instruction))
            }
            Err(error) => {
                self.bytes = &[];
                Some(Err(error))
            }
        }
    }
}

impl FromIterator<Instruction> for Vec<u8> {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Instruction>,
    {
        let mut buffer = Vec::new();
        for instruction in iter {
            instruction.encode(&mut buffer);
        }
        buffer
    }
}
