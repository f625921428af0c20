use strum::IntoEnumIterator;

use crate::{DecodeError, Instruction, Opcode};

fn sample(opcode: Opcode) -> Instruction {
    match opcode {
        Opcode::Nop => Instruction::Nop,
        Opcode::PushTrue => Instruction::PushTrue,
        Opcode::PushFalse => Instruction::PushFalse,
        Opcode::PushNil => Instruction::PushNil,
        Opcode::Push0 => Instruction::Push0,
        Opcode::Push1 => Instruction::Push1,
        Opcode::Push2 => Instruction::Push2,
        Opcode::PushNeg1 => Instruction::PushNeg1,
        Opcode::PushS8 => Instruction::PushS8(-100),
        Opcode::PushU8 => Instruction::PushU8(200),
        Opcode::PushS16 => Instruction::PushS16(-30000),
        Opcode::PushU16 => Instruction::PushU16(60000),
        Opcode::PushConstant => Instruction::PushConstant(0x0102),
        Opcode::Read => Instruction::Read(0x0304),
        Opcode::Call => Instruction::Call {
            function: 0x0506,
            argc: 3,
        },
        Opcode::Neg => Instruction::Neg,
        Opcode::Not => Instruction::Not,
        Opcode::Add => Instruction::Add,
        Opcode::Sub => Instruction::Sub,
        Opcode::Mul => Instruction::Mul,
        Opcode::Div => Instruction::Div,
        Opcode::And => Instruction::And,
        Opcode::Or => Instruction::Or,
        Opcode::Xor => Instruction::Xor,
    }
}

#[test]
fn opcode_bytes_round_trip() {
    for opcode in Opcode::iter() {
        let byte = opcode as u8;
        assert_eq!(Opcode::try_from(byte), Ok(opcode));
    }

    let last = Opcode::iter().map(|op| op as u8).max().unwrap();
    for byte in (last + 1)..=255 {
        assert!(Opcode::try_from(byte).is_err());
    }
}

#[test]
fn instructions_round_trip() {
    for opcode in Opcode::iter() {
        let instruction = sample(opcode);
        let mut bytes = Vec::new();
        instruction.encode(&mut bytes);
        assert_eq!(bytes.len(), instruction.len());

        let (decoded, len) = Instruction::decode(&bytes).unwrap();
        assert_eq!(decoded, instruction);
        assert_eq!(len, bytes.len());
    }
}

#[test]
fn immediates_are_big_endian() {
    let mut bytes = Vec::new();
    Instruction::PushU16(0x1234).encode(&mut bytes);
    assert_eq!(bytes, [Opcode::PushU16 as u8, 0x12, 0x34]);

    bytes.clear();
    Instruction::PushS16(-2).encode(&mut bytes);
    assert_eq!(bytes, [Opcode::PushS16 as u8, 0xff, 0xfe]);
}

#[test]
fn truncated_immediates_fail() {
    for opcode in Opcode::iter().filter(|op| op.immediate_len() > 0) {
        let mut bytes = Vec::new();
        sample(opcode).encode(&mut bytes);
        bytes.pop();
        assert_eq!(
            Instruction::decode(&bytes),
            Err(DecodeError::TruncatedImmediate { opcode })
        );
    }
}

#[test]
fn stream_iteration_decodes_in_order() {
    let program = [
        Instruction::Push1,
        Instruction::PushS8(16),
        Instruction::Add,
    ];
    let bytes: Vec<u8> = program.iter().copied().collect();

    let decoded: Result<Vec<Instruction>, _> = Instruction::iter(&bytes).collect();
    assert_eq!(decoded.unwrap(), program);
}
