use std::fmt::Write as _;

use bitreader::BitReader;

use crate::error::{ZError, ZResult};
use crate::opcode_tables;
use crate::text;

/// Operand types, two bits each in the encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperandType {
    /// Large constant (2 bytes)
    LargeConstant,
    /// Small constant (1 byte)
    SmallConstant,
    /// Variable selector (1 byte)
    Variable,
    /// Not present
    Omitted,
}

impl OperandType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0b00 => OperandType::LargeConstant,
            0b01 => OperandType::SmallConstant,
            0b10 => OperandType::Variable,
            _ => OperandType::Omitted,
        }
    }
}

/// The four instruction forms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InstructionForm {
    Long,
    Short,
    Extended,
    Variable,
}

/// Operand count class. For Variable-form instructions "OP2" means the
/// opcode comes from the 2OP set, not that exactly two operands appear.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperandCount {
    OP0,
    OP1,
    OP2,
    VAR,
}

/// Decoded branch trailer.
#[derive(Debug, Clone)]
pub struct BranchInfo {
    /// Branch when the condition is true (set) or false (clear).
    pub on_true: bool,
    /// Offsets 0 and 1 mean return-false / return-true; anything else is a
    /// jump relative to the address after the trailer, minus two.
    pub offset: i16,
}

/// One decoded instruction. The inline text of `print`/`print_ret` is
/// located but not decoded; `size` covers it, so the next instruction
/// starts at `addr + size`.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub addr: u32,
    pub opcode: u8,
    pub ext_opcode: Option<u8>,
    pub form: InstructionForm,
    pub operand_count: OperandCount,
    pub operand_types: Vec<OperandType>,
    pub operands: Vec<u16>,
    pub store_var: Option<u8>,
    pub branch: Option<BranchInfo>,
    pub text_addr: Option<u32>,
    pub size: usize,
}

fn malformed(addr: u32, reason: &'static str) -> ZError {
    ZError::MalformedInstruction { addr, reason }
}

impl Instruction {
    /// Decode the instruction starting at `addr`.
    pub fn decode(memory: &[u8], addr: usize, version: u8) -> ZResult<Instruction> {
        let start = addr as u32;
        if addr >= memory.len() {
            return Err(malformed(start, "instruction address out of bounds"));
        }

        let mut offset = addr;
        let opcode_byte = memory[offset];
        offset += 1;

        let form = match opcode_byte >> 6 {
            0b11 => InstructionForm::Variable,
            0b10 => {
                if opcode_byte == 0xbe && version >= 5 {
                    InstructionForm::Extended
                } else {
                    InstructionForm::Short
                }
            }
            _ => InstructionForm::Long,
        };

        let (opcode, ext_opcode, operand_count) = match form {
            InstructionForm::Long => (opcode_byte & 0x1f, None, OperandCount::OP2),
            InstructionForm::Short => {
                let count = if (opcode_byte >> 4) & 0x03 == 0x03 {
                    OperandCount::OP0
                } else {
                    OperandCount::OP1
                };
                (opcode_byte & 0x0f, None, count)
            }
            InstructionForm::Variable => {
                let count = if opcode_byte & 0x20 == 0 {
                    OperandCount::OP2
                } else {
                    OperandCount::VAR
                };
                (opcode_byte & 0x1f, None, count)
            }
            InstructionForm::Extended => {
                let ext = *memory
                    .get(offset)
                    .ok_or(malformed(start, "extended opcode out of bounds"))?;
                offset += 1;
                (opcode_byte, Some(ext), OperandCount::VAR)
            }
        };

        // Operand types.
        let mut operand_types = Vec::new();
        match form {
            InstructionForm::Long => {
                // Bits 6 and 5 pick small constant or variable.
                for bit in [0x40u8, 0x20] {
                    operand_types.push(if opcode_byte & bit != 0 {
                        OperandType::Variable
                    } else {
                        OperandType::SmallConstant
                    });
                }
            }
            InstructionForm::Short => {
                if operand_count == OperandCount::OP1 {
                    operand_types.push(OperandType::from_bits((opcode_byte >> 4) & 0x03));
                }
            }
            InstructionForm::Variable | InstructionForm::Extended => {
                // call_vs2/call_vn2 carry a second type byte for up to
                // eight operands.
                let double = version >= 4
                    && form == InstructionForm::Variable
                    && operand_count == OperandCount::VAR
                    && (opcode == 0x0c || opcode == 0x1a);
                let type_byte_count = if double { 2 } else { 1 };

                'types: for _ in 0..type_byte_count {
                    let type_byte = *memory
                        .get(offset)
                        .ok_or(malformed(start, "operand type byte out of bounds"))?;
                    offset += 1;
                    let mut reader = BitReader::new(std::slice::from_ref(&type_byte));
                    for _ in 0..4 {
                        let bits = reader
                            .read_u8(2)
                            .map_err(|_| malformed(start, "operand type byte exhausted"))?;
                        let op_type = OperandType::from_bits(bits);
                        if op_type == OperandType::Omitted {
                            break 'types;
                        }
                        operand_types.push(op_type);
                    }
                }
            }
        }

        // Operand values.
        let mut operands = Vec::with_capacity(operand_types.len());
        for op_type in &operand_types {
            match op_type {
                OperandType::LargeConstant => {
                    if offset + 1 >= memory.len() {
                        return Err(malformed(start, "large constant out of bounds"));
                    }
                    operands.push(((memory[offset] as u16) << 8) | memory[offset + 1] as u16);
                    offset += 2;
                }
                OperandType::SmallConstant | OperandType::Variable => {
                    let byte = *memory
                        .get(offset)
                        .ok_or(malformed(start, "operand byte out of bounds"))?;
                    operands.push(byte as u16);
                    offset += 1;
                }
                OperandType::Omitted => {}
            }
        }

        let meta = opcode_tables::lookup(form, operand_count, opcode, ext_opcode, version);

        let store_var = if meta.stores {
            let byte = *memory
                .get(offset)
                .ok_or(malformed(start, "store variable out of bounds"))?;
            offset += 1;
            Some(byte)
        } else {
            None
        };

        let branch = if meta.branches {
            let first = *memory
                .get(offset)
                .ok_or(malformed(start, "branch trailer out of bounds"))?;
            offset += 1;
            let on_true = first & 0x80 != 0;
            let branch_offset = if first & 0x40 != 0 {
                // One byte: 6-bit unsigned offset.
                (first & 0x3f) as i16
            } else {
                // Two bytes: 14-bit signed offset.
                let second = *memory
                    .get(offset)
                    .ok_or(malformed(start, "branch trailer second byte out of bounds"))?;
                offset += 1;
                let raw = (((first & 0x3f) as i16) << 8) | second as i16;
                if raw & 0x2000 != 0 {
                    raw | 0xc000u16 as i16
                } else {
                    raw
                }
            };
            Some(BranchInfo {
                on_true,
                offset: branch_offset,
            })
        } else {
            None
        };

        // Inline text is located, never decoded here; the handler reads it.
        let text_addr = if meta.has_text {
            let text_start = offset;
            let len = text::encoded_len(&memory[offset..])?;
            offset += len;
            Some(text_start as u32)
        } else {
            None
        };

        Ok(Instruction {
            addr: start,
            opcode,
            ext_opcode,
            form,
            operand_count,
            operand_types,
            operands,
            store_var,
            branch,
            text_addr,
            size: offset - addr,
        })
    }

    /// Mnemonic for this instruction in the given story version.
    pub fn name(&self, version: u8) -> &'static str {
        opcode_tables::lookup(
            self.form,
            self.operand_count,
            self.opcode,
            self.ext_opcode,
            version,
        )
        .name
    }

    /// One-line disassembly, the shape the `--debug` trace prints.
    pub fn disassemble(&self, version: u8) -> String {
        let mut out = String::from(self.name(version));

        for (i, op) in self.operands.iter().enumerate() {
            out.push_str(if i == 0 { " " } else { ", " });
            match self.operand_types[i] {
                OperandType::Variable => write!(out, "V{op:02x}").unwrap(),
                _ => write!(out, "#{op:04x}").unwrap(),
            }
        }

        if let Some(var) = self.store_var {
            write!(out, " -> V{var:02x}").unwrap();
        }

        if let Some(ref branch) = self.branch {
            write!(
                out,
                " [{}{}]",
                if branch.on_true { "TRUE" } else { "FALSE" },
                match branch.offset {
                    0 => " RFALSE".to_string(),
                    1 => " RTRUE".to_string(),
                    n => format!(" {n:+}"),
                }
            )
            .unwrap();
        }

        if self.text_addr.is_some() {
            out.push_str(" \"...\"");
        }

        out
    }
}

impl std::fmt::Display for Instruction {
    /// Version-blind rendering; callers that know the story version should
    /// prefer [`Instruction::disassemble`].
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.disassemble(3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_type_from_bits() {
        assert_eq!(OperandType::from_bits(0b00), OperandType::LargeConstant);
        assert_eq!(OperandType::from_bits(0b01), OperandType::SmallConstant);
        assert_eq!(OperandType::from_bits(0b10), OperandType::Variable);
        assert_eq!(OperandType::from_bits(0b11), OperandType::Omitted);
    }

    #[test]
    fn decodes_long_form() {
        // je #34 #78 with a branch-on-true return-false trailer
        let memory = [0x01, 0x34, 0x78, 0xc0];
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        assert_eq!(inst.form, InstructionForm::Long);
        assert_eq!(inst.operand_count, OperandCount::OP2);
        assert_eq!(inst.opcode, 0x01);
        assert_eq!(inst.operands, vec![0x34, 0x78]);
        let branch = inst.branch.unwrap();
        assert!(branch.on_true);
        assert_eq!(branch.offset, 0);
        assert_eq!(inst.size, 4);
    }

    #[test]
    fn long_form_type_bits_select_variables() {
        // bit 6 set: first operand is a variable selector
        let memory = [0x41, 0x05, 0x78, 0xc0];
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        assert_eq!(inst.operand_types[0], OperandType::Variable);
        assert_eq!(inst.operand_types[1], OperandType::SmallConstant);
    }

    #[test]
    fn decodes_short_form_jump() {
        // jump #0034 (large constant, bits 5-4 = 00)
        let memory = [0x8c, 0x00, 0x34];
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        assert_eq!(inst.form, InstructionForm::Short);
        assert_eq!(inst.operand_count, OperandCount::OP1);
        assert_eq!(inst.opcode, 0x0c);
        assert_eq!(inst.operands, vec![0x34]);
        assert_eq!(inst.size, 3);
    }

    #[test]
    fn decodes_zero_op() {
        let memory = [0xba]; // quit
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        assert_eq!(inst.operand_count, OperandCount::OP0);
        assert_eq!(inst.opcode, 0x0a);
        assert_eq!(inst.size, 1);
    }

    #[test]
    fn decodes_variable_form_call() {
        // call with a large constant and three variable operands
        let memory = [0xe0, 0x2a, 0x12, 0x34, 0x01, 0x02, 0x03, 0x00];
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        assert_eq!(inst.form, InstructionForm::Variable);
        assert_eq!(inst.operand_count, OperandCount::VAR);
        assert_eq!(inst.operands, vec![0x1234, 0x01, 0x02, 0x03]);
        assert_eq!(inst.store_var, Some(0x00));
        assert_eq!(inst.size, 8);
    }

    #[test]
    fn variable_form_stops_at_omitted() {
        // print_num with one small constant
        let memory = [0xe6, 0x7f, 0x2a];
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        assert_eq!(inst.operands, vec![0x2a]);
        assert_eq!(inst.size, 3);
    }

    #[test]
    fn two_byte_branch_sign_extends() {
        // je #01 #02 with branch-on-false, 14-bit offset -3
        let offset = -3i16 & 0x3fff;
        let memory = [0x01, 0x01, 0x02, (offset >> 8) as u8, (offset & 0xff) as u8];
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        let branch = inst.branch.unwrap();
        assert!(!branch.on_true);
        assert_eq!(branch.offset, -3);
        assert_eq!(inst.size, 5);
    }

    #[test]
    fn print_text_is_located_not_decoded() {
        // print "hi" : h=13 i=14, one word with the stop bit
        let word = (13u16 << 10) | (14 << 5) | 5 | 0x8000;
        let memory = [0xb2, (word >> 8) as u8, (word & 0xff) as u8, 0xba];
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        assert_eq!(inst.text_addr, Some(1));
        assert_eq!(inst.size, 3);
    }

    #[test]
    fn call_vs2_reads_two_type_bytes() {
        // call_vs2 with five small-constant operands (v4)
        let memory = [0xec, 0x55, 0x7f, 0x01, 0x02, 0x03, 0x04, 0x05, 0x00];
        let inst = Instruction::decode(&memory, 0, 4).unwrap();
        assert_eq!(inst.operands, vec![1, 2, 3, 4, 5]);
        assert_eq!(inst.store_var, Some(0x00));
        assert_eq!(inst.size, 9);
    }

    #[test]
    fn extended_form_decodes_in_v5() {
        // save_undo -> sp
        let memory = [0xbe, 0x09, 0xff, 0x00];
        let inst = Instruction::decode(&memory, 0, 5).unwrap();
        assert_eq!(inst.form, InstructionForm::Extended);
        assert_eq!(inst.ext_opcode, Some(0x09));
        assert_eq!(inst.store_var, Some(0x00));
        assert_eq!(inst.size, 4);
    }

    #[test]
    fn truncated_operands_are_malformed() {
        let memory = [0x01, 0x34]; // je missing its second operand
        assert!(matches!(
            Instruction::decode(&memory, 0, 3),
            Err(ZError::MalformedInstruction { .. })
        ));
    }

    #[test]
    fn disassembly_names_operands() {
        let memory = [0x41, 0x05, 0x78, 0xc2];
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        assert_eq!(inst.disassemble(3), "je V05, #0078 [TRUE +2]");
    }
}
