//! Per-opcode metadata. The decoder asks whether an opcode carries a store
//! or branch trailer or inline text; the dispatcher asks for mnemonics and
//! for the in-place family whose first operand names a variable rather
//! than supplying a value.

use crate::instruction::{InstructionForm, OperandCount};

/// Everything the decoder and dispatcher need to know about one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeMeta {
    pub name: &'static str,
    pub stores: bool,
    pub branches: bool,
    pub has_text: bool,
}

const fn meta(name: &'static str, stores: bool, branches: bool, has_text: bool) -> OpcodeMeta {
    OpcodeMeta {
        name,
        stores,
        branches,
        has_text,
    }
}

const UNKNOWN: OpcodeMeta = meta("unknown", false, false, false);

/// Metadata for an opcode as keyed by the decoder: form, operand-count
/// class, the low opcode bits, the extended opcode byte if any, and the
/// story version (several opcodes change meaning across versions).
pub fn lookup(
    form: InstructionForm,
    operand_count: OperandCount,
    opcode: u8,
    ext_opcode: Option<u8>,
    version: u8,
) -> OpcodeMeta {
    match form {
        InstructionForm::Extended => ext_op(ext_opcode.unwrap_or(0xff)),
        InstructionForm::Long => two_op(opcode, version),
        InstructionForm::Short => match operand_count {
            OperandCount::OP0 => zero_op(opcode, version),
            _ => one_op(opcode, version),
        },
        InstructionForm::Variable => match operand_count {
            OperandCount::OP2 => two_op(opcode, version),
            _ => var_op(opcode, version),
        },
    }
}

fn two_op(opcode: u8, version: u8) -> OpcodeMeta {
    match opcode {
        0x01 => meta("je", false, true, false),
        0x02 => meta("jl", false, true, false),
        0x03 => meta("jg", false, true, false),
        0x04 => meta("dec_chk", false, true, false),
        0x05 => meta("inc_chk", false, true, false),
        0x06 => meta("jin", false, true, false),
        0x07 => meta("test", false, true, false),
        0x08 => meta("or", true, false, false),
        0x09 => meta("and", true, false, false),
        0x0a => meta("test_attr", false, true, false),
        0x0b => meta("set_attr", false, false, false),
        0x0c => meta("clear_attr", false, false, false),
        0x0d => meta("store", false, false, false),
        0x0e => meta("insert_obj", false, false, false),
        0x0f => meta("loadw", true, false, false),
        0x10 => meta("loadb", true, false, false),
        0x11 => meta("get_prop", true, false, false),
        0x12 => meta("get_prop_addr", true, false, false),
        0x13 => meta("get_next_prop", true, false, false),
        0x14 => meta("add", true, false, false),
        0x15 => meta("sub", true, false, false),
        0x16 => meta("mul", true, false, false),
        0x17 => meta("div", true, false, false),
        0x18 => meta("mod", true, false, false),
        0x19 if version >= 4 => meta("call_2s", true, false, false),
        0x1a if version >= 5 => meta("call_2n", false, false, false),
        0x1b if version >= 5 => meta("set_colour", false, false, false),
        0x1c if version >= 5 => meta("throw", false, false, false),
        _ => UNKNOWN,
    }
}

fn one_op(opcode: u8, version: u8) -> OpcodeMeta {
    match opcode {
        0x00 => meta("jz", false, true, false),
        0x01 => meta("get_sibling", true, true, false),
        0x02 => meta("get_child", true, true, false),
        0x03 => meta("get_parent", true, false, false),
        0x04 => meta("get_prop_len", true, false, false),
        0x05 => meta("inc", false, false, false),
        0x06 => meta("dec", false, false, false),
        0x07 => meta("print_addr", false, false, false),
        0x08 if version >= 4 => meta("call_1s", true, false, false),
        0x09 => meta("remove_obj", false, false, false),
        0x0a => meta("print_obj", false, false, false),
        0x0b => meta("ret", false, false, false),
        0x0c => meta("jump", false, false, false),
        0x0d => meta("print_paddr", false, false, false),
        0x0e => meta("load", true, false, false),
        0x0f if version <= 4 => meta("not", true, false, false),
        0x0f => meta("call_1n", false, false, false),
        _ => UNKNOWN,
    }
}

fn zero_op(opcode: u8, version: u8) -> OpcodeMeta {
    match opcode {
        0x00 => meta("rtrue", false, false, false),
        0x01 => meta("rfalse", false, false, false),
        0x02 => meta("print", false, false, true),
        0x03 => meta("print_ret", false, false, true),
        0x04 => meta("nop", false, false, false),
        0x05 if version <= 3 => meta("save", false, true, false),
        0x05 if version == 4 => meta("save", true, false, false),
        0x06 if version <= 3 => meta("restore", false, true, false),
        0x06 if version == 4 => meta("restore", true, false, false),
        0x07 => meta("restart", false, false, false),
        0x08 => meta("ret_popped", false, false, false),
        0x09 if version <= 4 => meta("pop", false, false, false),
        0x09 => meta("catch", true, false, false),
        0x0a => meta("quit", false, false, false),
        0x0b => meta("new_line", false, false, false),
        0x0c if version == 3 => meta("show_status", false, false, false),
        0x0d if version >= 3 => meta("verify", false, true, false),
        0x0f if version >= 5 => meta("piracy", false, true, false),
        _ => UNKNOWN,
    }
}

fn var_op(opcode: u8, version: u8) -> OpcodeMeta {
    match opcode {
        0x00 => meta(
            if version >= 4 { "call_vs" } else { "call" },
            true,
            false,
            false,
        ),
        0x01 => meta("storew", false, false, false),
        0x02 => meta("storeb", false, false, false),
        0x03 => meta("put_prop", false, false, false),
        0x04 if version <= 4 => meta("sread", false, false, false),
        0x04 => meta("aread", true, false, false),
        0x05 => meta("print_char", false, false, false),
        0x06 => meta("print_num", false, false, false),
        0x07 => meta("random", true, false, false),
        0x08 => meta("push", false, false, false),
        0x09 => meta("pull", false, false, false),
        0x0a if version >= 3 => meta("split_window", false, false, false),
        0x0b if version >= 3 => meta("set_window", false, false, false),
        0x0c if version >= 4 => meta("call_vs2", true, false, false),
        0x0d if version >= 4 => meta("erase_window", false, false, false),
        0x0e if version >= 4 => meta("erase_line", false, false, false),
        0x0f if version >= 4 => meta("set_cursor", false, false, false),
        0x10 if version >= 4 => meta("get_cursor", false, false, false),
        0x11 if version >= 4 => meta("set_text_style", false, false, false),
        0x12 if version >= 4 => meta("buffer_mode", false, false, false),
        0x13 if version >= 3 => meta("output_stream", false, false, false),
        0x14 if version >= 3 => meta("input_stream", false, false, false),
        0x15 if version >= 3 => meta("sound_effect", false, false, false),
        0x16 if version >= 4 => meta("read_char", true, false, false),
        0x17 if version >= 4 => meta("scan_table", true, true, false),
        0x18 if version >= 5 => meta("not", true, false, false),
        0x19 if version >= 5 => meta("call_vn", false, false, false),
        0x1a if version >= 5 => meta("call_vn2", false, false, false),
        0x1b if version >= 5 => meta("tokenise", false, false, false),
        0x1c if version >= 5 => meta("encode_text", false, false, false),
        0x1d if version >= 5 => meta("copy_table", false, false, false),
        0x1e if version >= 5 => meta("print_table", false, false, false),
        0x1f if version >= 5 => meta("check_arg_count", false, true, false),
        _ => UNKNOWN,
    }
}

fn ext_op(ext_opcode: u8) -> OpcodeMeta {
    match ext_opcode {
        0x00 => meta("save", true, false, false),
        0x01 => meta("restore", true, false, false),
        0x02 => meta("log_shift", true, false, false),
        0x03 => meta("art_shift", true, false, false),
        0x04 => meta("set_font", true, false, false),
        0x09 => meta("save_undo", true, false, false),
        0x0a => meta("restore_undo", true, false, false),
        0x0b => meta("print_unicode", false, false, false),
        0x0c => meta("check_unicode", true, false, false),
        _ => UNKNOWN,
    }
}

/// The in-place family: the first operand is a variable selector, never a
/// value, and must not be dereferenced by the operand-resolution loop
/// (Standard 1.1 section 6.3.4).
pub fn indirect_first_operand(
    form: InstructionForm,
    operand_count: OperandCount,
    opcode: u8,
    version: u8,
) -> bool {
    match form {
        InstructionForm::Long => matches!(opcode, 0x04 | 0x05 | 0x0d),
        InstructionForm::Short => {
            operand_count == OperandCount::OP1 && matches!(opcode, 0x05 | 0x06 | 0x0e)
        }
        InstructionForm::Variable => match operand_count {
            OperandCount::OP2 => matches!(opcode, 0x04 | 0x05 | 0x0d),
            // pull, in the versions where it takes a variable operand
            _ => opcode == 0x09 && version <= 5,
        },
        InstructionForm::Extended => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_branch_flags_match_the_standard() {
        let add = lookup(InstructionForm::Long, OperandCount::OP2, 0x14, None, 3);
        assert_eq!(add.name, "add");
        assert!(add.stores);
        assert!(!add.branches);

        let je = lookup(InstructionForm::Long, OperandCount::OP2, 0x01, None, 3);
        assert!(je.branches);
        assert!(!je.stores);

        let get_sibling = lookup(InstructionForm::Short, OperandCount::OP1, 0x01, None, 3);
        assert!(get_sibling.stores);
        assert!(get_sibling.branches);

        let print = lookup(InstructionForm::Short, OperandCount::OP0, 0x02, None, 3);
        assert!(print.has_text);
    }

    #[test]
    fn meaning_shifts_across_versions() {
        let v3 = lookup(InstructionForm::Short, OperandCount::OP1, 0x0f, None, 3);
        assert_eq!(v3.name, "not");
        assert!(v3.stores);

        let v5 = lookup(InstructionForm::Short, OperandCount::OP1, 0x0f, None, 5);
        assert_eq!(v5.name, "call_1n");
        assert!(!v5.stores);

        let pop = lookup(InstructionForm::Short, OperandCount::OP0, 0x09, None, 3);
        assert_eq!(pop.name, "pop");
        let catch = lookup(InstructionForm::Short, OperandCount::OP0, 0x09, None, 5);
        assert_eq!(catch.name, "catch");
        assert!(catch.stores);
    }

    #[test]
    fn variable_form_of_2op_shares_metadata() {
        let long = lookup(InstructionForm::Long, OperandCount::OP2, 0x01, None, 3);
        let var = lookup(InstructionForm::Variable, OperandCount::OP2, 0x01, None, 3);
        assert_eq!(long.name, var.name);
        assert_eq!(long.branches, var.branches);
    }

    #[test]
    fn in_place_family_is_flagged() {
        assert!(indirect_first_operand(
            InstructionForm::Long,
            OperandCount::OP2,
            0x0d,
            3
        )); // store
        assert!(indirect_first_operand(
            InstructionForm::Short,
            OperandCount::OP1,
            0x05,
            3
        )); // inc
        assert!(indirect_first_operand(
            InstructionForm::Variable,
            OperandCount::VAR,
            0x09,
            3
        )); // pull
        assert!(!indirect_first_operand(
            InstructionForm::Long,
            OperandCount::OP2,
            0x14,
            3
        )); // add
    }
}
