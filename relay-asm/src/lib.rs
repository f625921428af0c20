//! Instruction set of the relay expression VM.
//!
//! Expression bytecode is a byte-aligned stream: one opcode byte followed by
//! zero or more big-endian immediate bytes. Multi-byte immediates are
//! big-endian so sign-extension of the narrow push forms is unambiguous.

#![warn(missing_docs)]

mod instruction;
mod opcode;

#[cfg(test)]
mod encoding_tests;

pub use instruction::{DecodeError, Instruction, InstructionIter};
pub use opcode::{InvalidOpcode, Opcode};
