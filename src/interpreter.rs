use log::{debug, info};

use crate::error::{ZError, ZResult};
use crate::instruction::{Instruction, InstructionForm, OperandCount, OperandType};
use crate::opcode_tables;
use crate::screen::Screen;
use crate::text::{self, Alphabet, StoryText};
use crate::vm::{CallFrame, VM, MAX_LOCALS};
use crate::zobject;

/// What an opcode handler did with the execution cursor.
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// PC already advanced past the instruction; keep going.
    Continue,
    /// Branch taken; PC updated.
    Branched,
    /// New frame pushed; PC at the routine's first instruction.
    Called,
    /// Frame popped; PC back in the caller.
    Returned(u16),
    /// The story executed quit.
    Quit,
    /// The base frame returned; the story is over.
    BaseReturned,
}

/// Drives fetch-decode-execute over a VM, talking to the screen and random
/// collaborators.
pub struct Interpreter {
    pub vm: VM,
    screen: Box<dyn Screen>,
    alphabet: Alphabet,
    /// Per-instruction disassembly to stderr.
    pub debug: bool,
    instruction_count: u64,
}

impl Interpreter {
    pub fn new(vm: VM, screen: Box<dyn Screen>) -> ZResult<Interpreter> {
        let alphabet = Alphabet::from_memory(&vm.memory)?;
        Ok(Interpreter {
            vm,
            screen,
            alphabet,
            debug: false,
            instruction_count: 0,
        })
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Run until the story quits, the base frame returns, or something
    /// fatal happens. The screen is released either way.
    pub fn run(&mut self) -> ZResult<()> {
        let outcome = self.run_with_limit(None);
        self.screen.end();
        outcome
    }

    /// As `run`, but stops cleanly after `max_instructions` steps. The
    /// embedding program uses this to bound a run; tests use it to catch
    /// runaway fixtures.
    fn run_with_limit(&mut self, max_instructions: Option<u64>) -> ZResult<()> {
        info!(
            "starting story: version {}, pc {:#06x}",
            self.vm.memory.version(),
            self.vm.pc
        );
        loop {
            let pc = self.vm.pc;
            let version = self.vm.memory.version();
            let inst = Instruction::decode(self.vm.memory.as_slice(), pc as usize, version)?;

            if self.debug {
                eprintln!("{pc:05x}: {}", inst.disassemble(version));
            }

            // Handlers that do not touch the cursor fall through to the
            // next instruction.
            self.vm.pc = pc + inst.size as u32;

            match self.execute(&inst)? {
                ExecutionResult::Quit | ExecutionResult::BaseReturned => return Ok(()),
                _ => {}
            }

            self.instruction_count += 1;
            if let Some(limit) = max_instructions {
                if self.instruction_count >= limit {
                    info!("stopping at the {limit}-instruction limit");
                    return Ok(());
                }
            }
        }
    }

    /// Execute one decoded instruction against the current state.
    pub fn execute(&mut self, inst: &Instruction) -> ZResult<ExecutionResult> {
        let operands = self.resolve_operands(inst)?;
        match inst.form {
            InstructionForm::Long => self.exec_2op(inst, &operands),
            InstructionForm::Short => match inst.operand_count {
                OperandCount::OP0 => self.exec_0op(inst),
                _ => self.exec_1op(inst, &operands),
            },
            InstructionForm::Variable => match inst.operand_count {
                OperandCount::OP2 => self.exec_2op(inst, &operands),
                _ => self.exec_var(inst, &operands),
            },
            InstructionForm::Extended => Err(ZError::UnknownOpcode {
                opcode: inst.ext_opcode.unwrap_or(0xbe),
                version: self.vm.memory.version(),
            }),
        }
    }

    /// Dereference variable operands, exactly once each, with pop
    /// semantics. The in-place family's first operand names its target
    /// variable and is passed through raw.
    fn resolve_operands(&mut self, inst: &Instruction) -> ZResult<Vec<u16>> {
        let keep_first_raw = opcode_tables::indirect_first_operand(
            inst.form,
            inst.operand_count,
            inst.opcode,
            self.vm.memory.version(),
        );
        let mut values = Vec::with_capacity(inst.operands.len());
        for (i, &operand) in inst.operands.iter().enumerate() {
            let deref = inst.operand_types[i] == OperandType::Variable && !(keep_first_raw && i == 0);
            values.push(if deref {
                self.vm.read_variable(operand as u8)?
            } else {
                operand
            });
        }
        Ok(values)
    }

    fn unknown(&self, inst: &Instruction) -> ZError {
        ZError::UnknownOpcode {
            opcode: inst.opcode,
            version: self.vm.memory.version(),
        }
    }

    fn version(&self) -> u8 {
        self.vm.memory.version()
    }

    /// Write to the instruction's store target, if it has one.
    fn store(&mut self, inst: &Instruction, value: u16) -> ZResult<()> {
        if let Some(var) = inst.store_var {
            self.vm.write_variable(var, value)?;
        }
        Ok(())
    }

    /// Decode the ZString at a byte address.
    fn decoded_at(&self, addr: u32) -> ZResult<String> {
        let lens = StoryText::new(&self.vm.memory, &self.alphabet);
        Ok(lens.decode_at(addr)?.0)
    }

    fn print(&mut self, s: &str) {
        self.screen.print_text(s);
    }

    // --- branch / call / return plumbing -----------------------------------

    fn do_branch(&mut self, inst: &Instruction, condition: bool) -> ZResult<ExecutionResult> {
        let branch = inst.branch.as_ref().ok_or(ZError::MalformedInstruction {
            addr: inst.addr,
            reason: "branch trailer missing",
        })?;
        if condition != branch.on_true {
            return Ok(ExecutionResult::Continue);
        }
        match branch.offset {
            0 => self.do_return(0),
            1 => self.do_return(1),
            offset => {
                // Relative to the instruction after the trailer.
                self.vm.pc = (self.vm.pc as i64 + offset as i64 - 2) as u32;
                Ok(ExecutionResult::Branched)
            }
        }
    }

    /// Materialize a frame for a routine call. Calling packed address 0
    /// succeeds immediately with result 0.
    fn do_call(
        &mut self,
        packed: u16,
        args: &[u16],
        result_var: Option<u8>,
    ) -> ZResult<ExecutionResult> {
        if packed == 0 {
            if let Some(var) = result_var {
                self.vm.write_variable(var, 0)?;
            }
            return Ok(ExecutionResult::Continue);
        }

        let addr = self.vm.memory.packed_routine(packed)?;
        let num_locals = self.vm.memory.read_byte(addr)? as usize;
        if num_locals > MAX_LOCALS {
            return Err(ZError::MalformedInstruction {
                addr,
                reason: "routine declares more than 15 locals",
            });
        }
        debug!(
            "call {:#06x} ({} locals, {} args), depth {}",
            addr,
            num_locals,
            args.len(),
            self.vm.call_depth()
        );

        let mut frame = CallFrame {
            resume_pc: self.vm.pc,
            result_var,
            num_locals: num_locals as u8,
            locals: [0; MAX_LOCALS],
            eval_stack: Vec::new(),
        };

        let mut code = addr + 1;
        if self.version() <= 4 {
            // Initial local values live in the routine header.
            for slot in frame.locals.iter_mut().take(num_locals) {
                *slot = self.vm.memory.read_word(code)?;
                code += 2;
            }
        }
        // Arguments overwrite the leading locals.
        for (i, &arg) in args.iter().enumerate().take(num_locals) {
            frame.locals[i] = arg;
        }

        self.vm.frames.push(frame);
        self.vm.pc = code;
        Ok(ExecutionResult::Called)
    }

    /// Pop the current frame and deliver the return value. Returning from
    /// the base frame ends the story.
    fn do_return(&mut self, value: u16) -> ZResult<ExecutionResult> {
        let frame = self.vm.frames.pop().ok_or(ZError::StackUnderflow)?;
        if self.vm.frames.is_empty() {
            debug!("base frame returned, story over");
            return Ok(ExecutionResult::BaseReturned);
        }
        self.vm.pc = frame.resume_pc;
        if let Some(var) = frame.result_var {
            self.vm.write_variable(var, value)?;
        }
        Ok(ExecutionResult::Returned(value))
    }

    // --- 0OP ----------------------------------------------------------------

    fn exec_0op(&mut self, inst: &Instruction) -> ZResult<ExecutionResult> {
        match inst.opcode {
            0x00 => self.do_return(1), // rtrue
            0x01 => self.do_return(0), // rfalse
            0x02 => {
                // print
                let addr = inst.text_addr.ok_or(ZError::MalformedInstruction {
                    addr: inst.addr,
                    reason: "inline text missing",
                })?;
                let s = self.decoded_at(addr)?;
                self.print(&s);
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                // print_ret
                let addr = inst.text_addr.ok_or(ZError::MalformedInstruction {
                    addr: inst.addr,
                    reason: "inline text missing",
                })?;
                let s = self.decoded_at(addr)?;
                self.print(&s);
                self.print("\n");
                self.do_return(1)
            }
            0x04 => Ok(ExecutionResult::Continue), // nop
            0x08 => {
                // ret_popped
                let value = self.vm.pop()?;
                self.do_return(value)
            }
            0x09 if self.version() <= 4 => {
                // pop
                self.vm.pop()?;
                Ok(ExecutionResult::Continue)
            }
            0x0a => Ok(ExecutionResult::Quit),
            0x0b => {
                self.print("\n");
                Ok(ExecutionResult::Continue)
            }
            0x0c if self.version() == 3 => {
                // show_status: the status line belongs to the display
                // layer, which this core does not drive.
                debug!("show_status ignored");
                Ok(ExecutionResult::Continue)
            }
            0x0d if self.version() >= 3 => {
                // verify, stubbed to succeed
                self.do_branch(inst, true)
            }
            0x0f if self.version() >= 5 => {
                // piracy: be gullible and always take the branch.
                let on_true = inst
                    .branch
                    .as_ref()
                    .map(|b| b.on_true)
                    .unwrap_or(true);
                self.do_branch(inst, on_true)
            }
            _ => Err(self.unknown(inst)),
        }
    }

    // --- 1OP ----------------------------------------------------------------

    fn exec_1op(&mut self, inst: &Instruction, ops: &[u16]) -> ZResult<ExecutionResult> {
        let op = *ops.first().ok_or(ZError::MalformedInstruction {
            addr: inst.addr,
            reason: "operand missing",
        })?;
        match inst.opcode {
            0x00 => self.do_branch(inst, op == 0), // jz
            0x01 => {
                // get_sibling
                let value = zobject::sibling(&self.vm.memory, op)?;
                self.store(inst, value)?;
                self.do_branch(inst, value != 0)
            }
            0x02 => {
                // get_child
                let value = zobject::child(&self.vm.memory, op)?;
                self.store(inst, value)?;
                self.do_branch(inst, value != 0)
            }
            0x03 => {
                // get_parent
                let value = zobject::parent(&self.vm.memory, op)?;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => {
                // get_prop_len
                let len = zobject::property_len_from_data_addr(&self.vm.memory, op)?;
                self.store(inst, len)?;
                Ok(ExecutionResult::Continue)
            }
            0x05 => {
                // inc: the operand names the variable
                let selector = op as u8;
                let value = self.vm.read_variable_in_place(selector)?;
                self.vm
                    .write_variable_in_place(selector, value.wrapping_add(1))?;
                Ok(ExecutionResult::Continue)
            }
            0x06 => {
                // dec
                let selector = op as u8;
                let value = self.vm.read_variable_in_place(selector)?;
                self.vm
                    .write_variable_in_place(selector, value.wrapping_sub(1))?;
                Ok(ExecutionResult::Continue)
            }
            0x07 => {
                // print_addr
                let s = self.decoded_at(op as u32)?;
                self.print(&s);
                Ok(ExecutionResult::Continue)
            }
            0x08 if self.version() >= 4 => self.do_call(op, &[], inst.store_var), // call_1s
            0x09 => {
                zobject::remove(&mut self.vm.memory, op)?;
                Ok(ExecutionResult::Continue)
            }
            0x0a => {
                // print_obj
                let (addr, len) = zobject::short_name_location(&self.vm.memory, op)?;
                if len > 0 {
                    let s = self.decoded_at(addr)?;
                    self.print(&s);
                }
                Ok(ExecutionResult::Continue)
            }
            0x0b => self.do_return(op), // ret
            0x0c => {
                // jump: signed offset from the following instruction
                self.vm.pc = (self.vm.pc as i64 + (op as i16) as i64 - 2) as u32;
                Ok(ExecutionResult::Branched)
            }
            0x0d => {
                // print_paddr
                let lens = StoryText::new(&self.vm.memory, &self.alphabet);
                let s = lens.decode_packed(op)?;
                self.print(&s);
                Ok(ExecutionResult::Continue)
            }
            0x0e => {
                // load: reads the named variable without popping
                let value = self.vm.read_variable_in_place(op as u8)?;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x0f if self.version() <= 4 => {
                // not
                self.store(inst, !op)?;
                Ok(ExecutionResult::Continue)
            }
            0x0f => self.do_call(op, &[], None), // call_1n
            _ => Err(self.unknown(inst)),
        }
    }

    // --- 2OP ----------------------------------------------------------------

    fn exec_2op(&mut self, inst: &Instruction, ops: &[u16]) -> ZResult<ExecutionResult> {
        if ops.len() < 2 {
            return Err(ZError::MalformedInstruction {
                addr: inst.addr,
                reason: "two operands required",
            });
        }
        let (a, b) = (ops[0], ops[1]);
        match inst.opcode {
            0x01 => {
                // je: equal to any of the remaining operands
                let condition = ops[1..].contains(&a);
                self.do_branch(inst, condition)
            }
            0x02 => self.do_branch(inst, (a as i16) < (b as i16)), // jl
            0x03 => self.do_branch(inst, (a as i16) > (b as i16)), // jg
            0x04 => {
                // dec_chk
                let selector = a as u8;
                let value = self
                    .vm
                    .read_variable_in_place(selector)?
                    .wrapping_sub(1);
                self.vm.write_variable_in_place(selector, value)?;
                self.do_branch(inst, (value as i16) < (b as i16))
            }
            0x05 => {
                // inc_chk
                let selector = a as u8;
                let value = self
                    .vm
                    .read_variable_in_place(selector)?
                    .wrapping_add(1);
                self.vm.write_variable_in_place(selector, value)?;
                self.do_branch(inst, (value as i16) > (b as i16))
            }
            0x06 => {
                // jin: is a's parent b?
                let parent = zobject::parent(&self.vm.memory, a)?;
                self.do_branch(inst, parent == b)
            }
            0x07 => self.do_branch(inst, a & b == b), // test
            0x08 => {
                self.store(inst, a | b)?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                self.store(inst, a & b)?;
                Ok(ExecutionResult::Continue)
            }
            0x0a => {
                // test_attr
                let set = zobject::attribute(&self.vm.memory, a, b)?;
                self.do_branch(inst, set)
            }
            0x0b => {
                zobject::set_attribute(&mut self.vm.memory, a, b, true)?;
                Ok(ExecutionResult::Continue)
            }
            0x0c => {
                zobject::set_attribute(&mut self.vm.memory, a, b, false)?;
                Ok(ExecutionResult::Continue)
            }
            0x0d => {
                // store: the first operand names the variable
                self.vm.write_variable_in_place(a as u8, b)?;
                Ok(ExecutionResult::Continue)
            }
            0x0e => {
                zobject::insert(&mut self.vm.memory, a, b)?;
                Ok(ExecutionResult::Continue)
            }
            0x0f => {
                // loadw
                let value = self.vm.memory.read_word(a as u32 + 2 * b as u32)?;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x10 => {
                // loadb
                let value = self.vm.memory.read_byte(a as u32 + b as u32)? as u16;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x11 => {
                // get_prop
                let value = zobject::property_value(&self.vm.memory, a, b as u8)?;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x12 => {
                // get_prop_addr
                let addr = zobject::property_data_addr(&self.vm.memory, a, b as u8)?;
                self.store(inst, addr)?;
                Ok(ExecutionResult::Continue)
            }
            0x13 => {
                // get_next_prop
                let next = zobject::next_property(&self.vm.memory, a, b as u8)?;
                self.store(inst, next as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x14 => {
                let value = (a as i16).wrapping_add(b as i16) as u16;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x15 => {
                let value = (a as i16).wrapping_sub(b as i16) as u16;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x16 => {
                let value = (a as i16).wrapping_mul(b as i16) as u16;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x17 => {
                // div: truncating, and -32768 / -1 must not abort
                if b == 0 {
                    return Err(ZError::DivisionByZero);
                }
                let value = (a as i16).wrapping_div(b as i16) as u16;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x18 => {
                // mod
                if b == 0 {
                    return Err(ZError::DivisionByZero);
                }
                let value = (a as i16).wrapping_rem(b as i16) as u16;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x19 if self.version() >= 4 => self.do_call(a, &ops[1..2], inst.store_var), // call_2s
            0x1a if self.version() >= 5 => self.do_call(a, &ops[1..2], None),          // call_2n
            _ => Err(self.unknown(inst)),
        }
    }

    // --- VAR ----------------------------------------------------------------

    fn exec_var(&mut self, inst: &Instruction, ops: &[u16]) -> ZResult<ExecutionResult> {
        let need = |n: usize| -> ZResult<()> {
            if ops.len() < n {
                Err(ZError::MalformedInstruction {
                    addr: inst.addr,
                    reason: "operand missing",
                })
            } else {
                Ok(())
            }
        };
        match inst.opcode {
            0x00 => {
                // call / call_vs
                need(1)?;
                self.do_call(ops[0], &ops[1..], inst.store_var)
            }
            0x01 => {
                // storew
                need(3)?;
                self.vm
                    .memory
                    .write_word(ops[0] as u32 + 2 * ops[1] as u32, ops[2])?;
                Ok(ExecutionResult::Continue)
            }
            0x02 => {
                // storeb
                need(3)?;
                self.vm
                    .memory
                    .write_byte(ops[0] as u32 + ops[1] as u32, ops[2] as u8)?;
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                // put_prop
                need(3)?;
                zobject::set_property(
                    &mut self.vm.memory,
                    ops[0],
                    ops[1] as u8,
                    &ops[2].to_be_bytes(),
                )?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => {
                // sread / aread
                need(1)?;
                self.do_read(inst, ops)
            }
            0x05 => {
                // print_char
                need(1)?;
                let ch = text::zscii_char(ops[0]);
                self.print(&ch.to_string());
                Ok(ExecutionResult::Continue)
            }
            0x06 => {
                // print_num
                need(1)?;
                self.print(&(ops[0] as i16).to_string());
                Ok(ExecutionResult::Continue)
            }
            0x07 => {
                // random
                need(1)?;
                let range = ops[0] as i16;
                let value = if range > 0 {
                    self.vm.rng.uniform(range as u16)
                } else if range < 0 {
                    self.vm.rng.reseed((range as i32).unsigned_abs() as u64);
                    0
                } else {
                    self.vm.rng.reseed_from_entropy();
                    0
                };
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x08 => {
                // push
                need(1)?;
                self.vm.push(ops[0])?;
                Ok(ExecutionResult::Continue)
            }
            0x09 if self.version() <= 5 => {
                // pull: the operand names the destination variable
                need(1)?;
                let value = self.vm.pop()?;
                self.vm.write_variable_in_place(ops[0] as u8, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x0c if self.version() >= 4 => {
                // call_vs2
                need(1)?;
                self.do_call(ops[0], &ops[1..], inst.store_var)
            }
            0x18 if self.version() >= 5 => {
                // not
                need(1)?;
                self.store(inst, !ops[0])?;
                Ok(ExecutionResult::Continue)
            }
            0x19 if self.version() >= 5 => {
                // call_vn
                need(1)?;
                self.do_call(ops[0], &ops[1..], None)
            }
            0x1a if self.version() >= 5 => {
                // call_vn2
                need(1)?;
                self.do_call(ops[0], &ops[1..], None)
            }
            _ => Err(self.unknown(inst)),
        }
    }

    /// The read opcode: pull a line from the screen, fill the text buffer
    /// per the version's contract, and leave an empty parse table (lexical
    /// analysis is the dictionary's business, not this core's).
    fn do_read(&mut self, inst: &Instruction, ops: &[u16]) -> ZResult<ExecutionResult> {
        let text_buffer = ops[0] as u32;
        let parse_buffer = if ops.len() > 1 { ops[1] as u32 } else { 0 };

        let input = self.screen.read_line().to_lowercase();
        debug!("read: {input:?}");

        let max_len = self.vm.memory.read_byte(text_buffer)? as usize;
        if self.version() <= 4 {
            // Characters from byte 1, zero-terminated.
            let limit = max_len.saturating_sub(1);
            let mut cursor = text_buffer + 1;
            for &b in input.as_bytes().iter().take(limit) {
                self.vm.memory.write_byte(cursor, b)?;
                cursor += 1;
            }
            self.vm.memory.write_byte(cursor, 0)?;
        } else {
            // Length byte at +1, characters from +2.
            let count = input.len().min(max_len);
            self.vm.memory.write_byte(text_buffer + 1, count as u8)?;
            for (i, &b) in input.as_bytes().iter().take(count).enumerate() {
                self.vm.memory.write_byte(text_buffer + 2 + i as u32, b)?;
            }
        }

        if parse_buffer != 0 {
            // Word count zero: nothing tokenized.
            self.vm.memory.write_byte(parse_buffer + 1, 0)?;
        }

        if self.version() >= 5 {
            // aread stores the terminator, always newline here.
            self.store(inst, 13)?;
        }
        Ok(ExecutionResult::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::BufferScreen;
    use crate::test_utils::StoryBuilder;
    use crate::zrand::ZRand;
    use test_log::test;

    fn interpreter_for(builder: StoryBuilder) -> Interpreter {
        let memory = builder.build();
        let vm = VM::new(memory, ZRand::seeded(0xdead)).unwrap();
        Interpreter::new(vm, Box::new(BufferScreen::new())).unwrap()
    }

    fn run_one(interp: &mut Interpreter) -> ExecutionResult {
        let pc = interp.vm.pc;
        let inst = Instruction::decode(
            interp.vm.memory.as_slice(),
            pc as usize,
            interp.vm.memory.version(),
        )
        .unwrap();
        interp.vm.pc = pc + inst.size as u32;
        interp.execute(&inst).unwrap()
    }

    #[test]
    fn add_stores_to_a_global() {
        let mut builder = StoryBuilder::new(3);
        // add #10 #32 -> G00
        builder.code(&[0x14, 0x0a, 0x20, 0x10]);
        let mut interp = interpreter_for(builder);
        run_one(&mut interp);
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 42);
    }

    #[test]
    fn signed_arithmetic_wraps() {
        let mut builder = StoryBuilder::new(3);
        // sub #0x8000 #1 -> G00 (i.e. -32768 - 1 wraps to 32767)
        builder.code(&[0xd5, 0x1f, 0x80, 0x00, 0x01, 0x10]);
        let mut interp = interpreter_for(builder);
        run_one(&mut interp);
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 0x7fff);
    }

    #[test]
    fn division_by_zero_is_fatal() {
        let mut builder = StoryBuilder::new(3);
        // div #8 #0 -> G00
        builder.code(&[0x17, 0x08, 0x00, 0x10]);
        let memory = builder.build();
        let vm = VM::new(memory, ZRand::seeded(1)).unwrap();
        let mut interp = Interpreter::new(vm, Box::new(BufferScreen::new())).unwrap();
        let pc = interp.vm.pc;
        let inst =
            Instruction::decode(interp.vm.memory.as_slice(), pc as usize, 3).unwrap();
        interp.vm.pc = pc + inst.size as u32;
        assert!(matches!(
            interp.execute(&inst),
            Err(ZError::DivisionByZero)
        ));
    }

    #[test]
    fn division_edge_case_wraps() {
        let mut builder = StoryBuilder::new(3);
        // div #0x8000 #0xffff -> G00 (-32768 / -1)
        builder.code(&[0xd7, 0x0f, 0x80, 0x00, 0xff, 0xff]);
        // store trailer
        builder.code(&[0x10]);
        let mut interp = interpreter_for(builder);
        run_one(&mut interp);
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 0x8000);
    }

    #[test]
    fn je_accepts_up_to_four_operands() {
        let mut builder = StoryBuilder::new(3);
        // Variable-form je #5 #9 #5 branching forward on true
        builder.code(&[0xc1, 0x57, 0x05, 0x09, 0x05, 0xc3]);
        builder.code(&[0xba, 0xba]); // two quits; branch lands on the second
        let mut interp = interpreter_for(builder);
        let result = run_one(&mut interp);
        assert!(matches!(result, ExecutionResult::Branched));
        assert_eq!(interp.vm.pc, 0x5007);
    }

    #[test]
    fn call_and_return_keep_frame_discipline() {
        let mut builder = StoryBuilder::new(3);
        let routine = builder.routine(1, &[0xab, 0x01]); // ret local1
        let packed = builder.pack_routine(routine);
        // call routine #7 -> G00, then quit
        let main = builder.code(&[0xe0, 0x1f, (packed >> 8) as u8, packed as u8, 0x07, 0x10]);
        builder.code(&[0xba]);
        builder.set_initial_pc(main);
        let mut interp = interpreter_for(builder);

        assert_eq!(interp.vm.call_depth(), 1);
        let result = run_one(&mut interp);
        assert!(matches!(result, ExecutionResult::Called));
        assert_eq!(interp.vm.call_depth(), 2);
        assert_eq!(interp.vm.frame().unwrap().num_locals, 1);
        assert_eq!(interp.vm.frame().unwrap().locals[0], 7);

        let result = run_one(&mut interp);
        assert!(matches!(result, ExecutionResult::Returned(7)));
        assert_eq!(interp.vm.call_depth(), 1);
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 7);
    }

    #[test]
    fn call_to_address_zero_stores_false() {
        let mut builder = StoryBuilder::new(3);
        builder.code(&[0xe0, 0x1f, 0x00, 0x00, 0x07, 0x10]);
        let mut interp = interpreter_for(builder);
        let result = run_one(&mut interp);
        assert!(matches!(result, ExecutionResult::Continue));
        assert_eq!(interp.vm.call_depth(), 1);
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 0);
    }

    #[test]
    fn in_place_family_leaves_stack_depth_alone() {
        let mut builder = StoryBuilder::new(3);
        // push #5 ; inc sp ; pull G00
        builder.code(&[0xe8, 0x7f, 0x05]);
        builder.code(&[0x95, 0x00]); // inc (small const selector 0)
        builder.code(&[0xe9, 0x7f, 0x10]); // pull -> G00
        let mut interp = interpreter_for(builder);

        run_one(&mut interp);
        assert_eq!(interp.vm.frame().unwrap().eval_stack.len(), 1);
        run_one(&mut interp); // inc operates on the stack top in place
        assert_eq!(interp.vm.frame().unwrap().eval_stack.len(), 1);
        assert_eq!(interp.vm.peek_top().unwrap(), 6);
        run_one(&mut interp); // pull pops it
        assert_eq!(interp.vm.frame().unwrap().eval_stack.len(), 0);
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 6);
    }

    #[test]
    fn store_writes_in_place() {
        let mut builder = StoryBuilder::new(3);
        // push #1 ; store sp #9  (replaces the top, no net push)
        builder.code(&[0xe8, 0x7f, 0x01]);
        builder.code(&[0x0d, 0x00, 0x09]);
        let mut interp = interpreter_for(builder);
        run_one(&mut interp);
        run_one(&mut interp);
        assert_eq!(interp.vm.frame().unwrap().eval_stack.len(), 1);
        assert_eq!(interp.vm.peek_top().unwrap(), 9);
    }

    #[test]
    fn variable_operands_pop_the_stack() {
        let mut builder = StoryBuilder::new(3);
        // push #3 ; add sp #4 -> G00
        builder.code(&[0xe8, 0x7f, 0x03]);
        builder.code(&[0x54, 0x00, 0x04, 0x10]);
        let mut interp = interpreter_for(builder);
        run_one(&mut interp);
        run_one(&mut interp);
        assert_eq!(interp.vm.frame().unwrap().eval_stack.len(), 0);
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 7);
    }

    #[test]
    fn inc_chk_branches_on_signed_compare() {
        let mut builder = StoryBuilder::new(3);
        builder.set_global_word(0, 0xffff); // G00 = -1
        // inc_chk G00 #0 ?+4 ; quit ; quit
        builder.code(&[0x05, 0x10, 0x00, 0xc4]);
        builder.code(&[0xba, 0xba]);
        let mut interp = interpreter_for(builder);
        let result = run_one(&mut interp);
        // -1 incremented is 0, not greater than 0: no branch
        assert!(matches!(result, ExecutionResult::Continue));
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 0);
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        // 0OP:0x0f is unassigned before v5.
        let builder = StoryBuilder::new(3);
        let mut interp = interpreter_for(builder);
        let inst = Instruction::decode(&[0xbf], 0, 3).unwrap();
        assert!(matches!(
            interp.execute(&inst),
            Err(ZError::UnknownOpcode {
                opcode: 0x0f,
                version: 3
            })
        ));
    }

    #[test]
    fn read_fills_the_text_buffer_v3() {
        let mut builder = StoryBuilder::new(3);
        builder.write(0x0700, &[16]); // text buffer, room for 15 letters
        // sread text=0x0700 parse=0x0720
        builder.code(&[0xe4, 0x0f, 0x07, 0x00, 0x07, 0x20]);
        let memory = builder.build();
        let vm = VM::new(memory, ZRand::seeded(1)).unwrap();
        let screen = BufferScreen::with_input(["Open The MAILBOX"]);
        let mut interp = Interpreter::new(vm, Box::new(screen)).unwrap();
        run_one(&mut interp);

        let mem = &interp.vm.memory;
        let stored: Vec<u8> = (0..15)
            .map(|i| mem.read_byte(0x0701 + i).unwrap())
            .take_while(|&b| b != 0)
            .collect();
        assert_eq!(&stored, b"open the mailbo");
        // parse buffer reports zero words
        assert_eq!(mem.read_byte(0x0721).unwrap(), 0);
    }
}
