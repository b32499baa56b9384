//! Instruction stream assembly and operand reading
//!
//! `BytecodeWriter` assembles instruction streams (hosts and tests use it to
//! build scripts), `BytecodeReader` walks them back operand by operand.

use crate::opcode::{OperandFormat, Opcode};
use thiserror::Error;

/// Malformed instruction stream
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// An operand runs past the end of the code
    #[error("Truncated instruction at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Table switch whose high bound is below its low bound
    #[error("Malformed table switch at offset {0}")]
    InvalidSwitch(usize),
}

/// Assembles a script's code bytes
///
/// Every `emit_*` helper returns the offset of the instruction it wrote. Jump helpers take absolute targets and encode them relative to the start of
/// the jumping instruction.
pub struct BytecodeWriter {
    code: Vec<u8>,
}

impl BytecodeWriter {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            code: Vec::with_capacity(capacity),
        }
    }

    /// Code written so far
    pub fn buffer(&self) -> &[u8] {
        &self.code
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.code
    }

    /// Offset the next instruction will start at
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn clear(&mut self) {
        self.code.clear();
    }

    // ===== Raw operands =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.code.push(value);
    }

    /// Emit a signed byte
    pub fn emit_i8(&mut self, value: i8) {
        self.code.push(value as u8);
    }

    /// Little-endian u16
    pub fn emit_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Little-endian u32
    pub fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Little-endian i32
    pub fn emit_i32(&mut self, value: i32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Little-endian f64
    pub fn emit_f64(&mut self, value: f64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    // ===== Instructions =====

    /// Emit an opcode without operands, returning its offset
    pub fn emit_op(&mut self, opcode: Opcode) -> usize {
        debug_assert_eq!(opcode.format(), OperandFormat::None, "{} takes operands", opcode.name());
        let at = self.offset();
        self.emit_u8(opcode.to_u8());
        at
    }

    /// Emit an opcode with a u8 operand (Pick, NewInit, Iter)
    pub fn emit_op_u8(&mut self, opcode: Opcode, value: u8) -> usize {
        debug_assert_eq!(opcode.format(), OperandFormat::U8);
        let at = self.offset();
        self.emit_u8(opcode.to_u8());
        self.emit_u8(value);
        at
    }

    /// Emit an opcode with a u16 operand (slots, argc, counts)
    pub fn emit_op_u16(&mut self, opcode: Opcode, value: u16) -> usize {
        debug_assert_eq!(opcode.format(), OperandFormat::U16);
        let at = self.offset();
        self.emit_u8(opcode.to_u8());
        self.emit_u16(value);
        at
    }

    /// Emit an opcode with a u32 index operand (atoms, objects, functions)
    pub fn emit_op_u32(&mut self, opcode: Opcode, value: u32) -> usize {
        debug_assert_eq!(opcode.format(), OperandFormat::U32);
        let at = self.offset();
        self.emit_u8(opcode.to_u8());
        self.emit_u32(value);
        at
    }

    // ===== Constants =====

    /// Emit the smallest integer constant instruction for a value
    pub fn emit_int(&mut self, value: i32) -> usize {
        let at = self.offset();
        match value {
            0 => {
                self.emit_u8(Opcode::Zero.to_u8());
            }
            1 => {
                self.emit_u8(Opcode::One.to_u8());
            }
            v if i8::try_from(v).is_ok() => {
                self.emit_u8(Opcode::Int8.to_u8());
                self.emit_i8(v as i8);
            }
            v => {
                self.emit_u8(Opcode::Int32.to_u8());
                self.emit_i32(v);
            }
        }
        at
    }

    /// Emit DOUBLE instruction with value
    pub fn emit_double(&mut self, value: f64) -> usize {
        let at = self.offset();
        self.emit_u8(Opcode::Double.to_u8());
        self.emit_f64(value);
        at
    }

    /// Emit STRING instruction with atom index
    pub fn emit_string(&mut self, atom: u32) -> usize {
        self.emit_op_u32(Opcode::String, atom)
    }

    // ===== Locals & Arguments =====

    /// Emit GETLOCAL instruction
    pub fn emit_get_local(&mut self, local: u16) -> usize {
        self.emit_op_u16(Opcode::GetLocal, local)
    }

    /// Emit SETLOCAL instruction
    pub fn emit_set_local(&mut self, local: u16) -> usize {
        self.emit_op_u16(Opcode::SetLocal, local)
    }

    /// Emit GETARG instruction
    pub fn emit_get_arg(&mut self, arg: u16) -> usize {
        self.emit_op_u16(Opcode::GetArg, arg)
    }

    /// Emit SETARG instruction
    pub fn emit_set_arg(&mut self, arg: u16) -> usize {
        self.emit_op_u16(Opcode::SetArg, arg)
    }

    // ===== Names & Properties =====

    /// Emit GETGNAME instruction
    pub fn emit_get_gname(&mut self, atom: u32) -> usize {
        self.emit_op_u32(Opcode::GetGName, atom)
    }

    /// Emit GETPROP instruction
    pub fn emit_get_prop(&mut self, atom: u32) -> usize {
        self.emit_op_u32(Opcode::GetProp, atom)
    }

    /// Emit SETPROP instruction
    pub fn emit_set_prop(&mut self, atom: u32) -> usize {
        self.emit_op_u32(Opcode::SetProp, atom)
    }

    // ===== Calls =====

    /// Emit CALL instruction with argument count
    pub fn emit_call(&mut self, argc: u16) -> usize {
        self.emit_op_u16(Opcode::Call, argc)
    }

    /// Emit NEW instruction with argument count
    pub fn emit_new(&mut self, argc: u16) -> usize {
        self.emit_op_u16(Opcode::New, argc)
    }

    // ===== Control Flow =====

    /// Emit a jump to a known target
    pub fn emit_jump(&mut self, opcode: Opcode, target: usize) -> usize {
        debug_assert!(opcode.is_jump());
        let at = self.offset();
        self.emit_u8(opcode.to_u8());
        self.emit_i32(relative(at, target));
        at
    }

    /// Emit a jump whose target is patched later with `patch_jump`
    pub fn emit_forward_jump(&mut self, opcode: Opcode) -> usize {
        debug_assert!(opcode.is_jump());
        let at = self.offset();
        self.emit_u8(opcode.to_u8());
        self.emit_i32(0);
        at
    }

    /// Point the jump at `at` to the current offset
    pub fn patch_jump(&mut self, at: usize) {
        let target = self.offset();
        self.patch_jump_to(at, target);
    }

    /// Point the jump at `at` to `target`
    pub fn patch_jump_to(&mut self, at: usize, target: usize) {
        self.patch_i32(at + 1, relative(at, target));
    }

    /// Emit a TABLESWITCH for cases `low..=high`; targets are patched later
    pub fn emit_table_switch(&mut self, low: i32, high: i32) -> usize {
        debug_assert!(high >= low);
        let at = self.offset();
        self.emit_u8(Opcode::TableSwitch.to_u8());
        self.emit_i32(0);
        self.emit_i32(low);
        self.emit_i32(high);
        for _ in low..=high {
            self.emit_i32(0);
        }
        at
    }

    /// Emit a LOOKUPSWITCH over atom keys; targets are patched later
    pub fn emit_lookup_switch(&mut self, atoms: &[u32]) -> usize {
        let at = self.offset();
        self.emit_u8(Opcode::LookupSwitch.to_u8());
        self.emit_i32(0);
        self.emit_u16(atoms.len() as u16);
        for &atom in atoms {
            self.emit_u32(atom);
            self.emit_i32(0);
        }
        at
    }

    /// Patch the default target of the switch at `at`
    pub fn patch_switch_default(&mut self, at: usize, target: usize) {
        self.patch_i32(at + 1, relative(at, target));
    }

    /// Patch case `index` of the table switch at `at`
    pub fn patch_table_case(&mut self, at: usize, index: usize, target: usize) {
        self.patch_i32(at + 13 + 4 * index, relative(at, target));
    }

    /// Patch case `index` of the lookup switch at `at`
    pub fn patch_lookup_case(&mut self, at: usize, index: usize, target: usize) {
        self.patch_i32(at + 7 + 8 * index + 4, relative(at, target));
    }

    /// Emit a TRY whose handler offsets are patched later with `patch_try`
    pub fn emit_try(&mut self) -> usize {
        let at = self.offset();
        self.emit_u8(Opcode::Try.to_u8());
        self.emit_i32(-1);
        self.emit_i32(-1);
        at
    }

    /// Patch the catch and finally handlers of the TRY at `at`
    pub fn patch_try(&mut self, at: usize, catch: Option<usize>, finally: Option<usize>) {
        let catch = catch.map_or(-1, |target| relative(at, target));
        let finally = finally.map_or(-1, |target| relative(at, target));
        self.patch_i32(at + 1, catch);
        self.patch_i32(at + 5, finally);
    }

    // ===== Patching =====

    /// Overwrite the i32 operand starting at `offset`
    pub fn patch_i32(&mut self, offset: usize, value: i32) {
        self.code[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn relative(at: usize, target: usize) -> i32 {
    target as i32 - at as i32
}

/// Cursor over code bytes; every read is bounds-checked
pub struct BytecodeReader<'a> {
    code: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self { code, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.code.len().saturating_sub(self.position)
    }

    pub fn has_more(&self) -> bool {
        self.remaining() > 0
    }

    /// Move the cursor to an instruction offset
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    // ===== Raw operands =====

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.position + N;
        let slice = self
            .code
            .get(self.position..end)
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(slice);
        self.position = end;
        Ok(bytes)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a signed byte
    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.take::<1>()?[0] as i8)
    }

    /// Little-endian u16
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    /// Little-endian u32
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    /// Little-endian i32
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    /// Little-endian f64
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    /// Read an opcode
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let at = self.position;
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_operands_are_little_endian() {
        let mut w = BytecodeWriter::new();
        let get = w.emit_get_local(0x0102);
        let set = w.emit_set_arg(7);

        let code = w.buffer();
        assert_eq!(get, 0);
        assert_eq!(set, 3);
        assert_eq!(&code[..3], &[Opcode::GetLocal.to_u8(), 0x02, 0x01]);
        assert_eq!(&code[3..], &[Opcode::SetArg.to_u8(), 7, 0]);
    }

    #[test]
    fn test_int_emission_picks_smallest_form() {
        let mut writer = BytecodeWriter::new();
        writer.emit_int(0);
        writer.emit_int(1);
        writer.emit_int(-7);
        writer.emit_int(1000);

        let bytes = writer.buffer();
        assert_eq!(bytes[0], Opcode::Zero.to_u8());
        assert_eq!(bytes[1], Opcode::One.to_u8());
        assert_eq!(bytes[2], Opcode::Int8.to_u8());
        assert_eq!(bytes[3] as i8, -7);
        assert_eq!(bytes[4], Opcode::Int32.to_u8());
        assert_eq!(i32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]), 1000);
    }

    #[test]
    fn test_forward_jump_patching() {
        let mut writer = BytecodeWriter::new();
        let jump = writer.emit_forward_jump(Opcode::IfEq);
        writer.emit_int(42);
        writer.emit_op(Opcode::Pop);
        writer.patch_jump(jump);

        // Relative to the jump instruction itself
        let bytes = writer.buffer();
        let patched = i32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        assert_eq!(patched, 8);
    }

    #[test]
    fn test_backward_jump() {
        let mut writer = BytecodeWriter::new();
        let head = writer.emit_op(Opcode::LoopHead);
        writer.emit_op(Opcode::Nop);
        let jump = writer.emit_jump(Opcode::Goto, head);

        let bytes = writer.buffer();
        let rel = i32::from_le_bytes([bytes[jump + 1], bytes[jump + 2], bytes[jump + 3], bytes[jump + 4]]);
        assert_eq!(rel, -2);
    }

    #[test]
    fn test_try_patching() {
        let mut writer = BytecodeWriter::new();
        let try_at = writer.emit_try();
        writer.emit_op(Opcode::Nop);
        writer.patch_try(try_at, Some(12), None);

        let mut reader = BytecodeReader::new(writer.buffer());
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Try);
        assert_eq!(reader.read_i32().unwrap(), 12);
        assert_eq!(reader.read_i32().unwrap(), -1);
    }

    #[test]
    fn test_instruction_lengths_match_formats() {
        let mut w = BytecodeWriter::new();
        let starts = [
            w.emit_op(Opcode::Nop),
            w.emit_get_local(3),
            w.emit_get_prop(0),
            w.emit_double(0.5),
            w.emit_call(2),
        ];
        let opcodes = [Opcode::Nop, Opcode::GetLocal, Opcode::GetProp, Opcode::Double, Opcode::Call];
        for (window, opcode) in starts.windows(2).zip(opcodes) {
            assert_eq!(Some(window[1] - window[0]), opcode.fixed_length(), "{}", opcode.name());
        }
        assert_eq!(w.offset() - starts[4], 3);

        w.clear();
        assert_eq!(w.offset(), 0);
    }

    // ===== Reading =====

    #[test]
    fn test_reader_walks_operands() {
        let mut w = BytecodeWriter::new();
        w.emit_int(-3);
        w.emit_int(70_000);
        w.emit_double(2.5);
        let code = w.into_bytes();

        let mut reader = BytecodeReader::new(&code);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Int8);
        assert_eq!(reader.read_i8().unwrap(), -3);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Int32);
        assert_eq!(reader.read_i32().unwrap(), 70_000);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Double);
        assert_eq!(reader.remaining(), 8);
        assert_eq!(reader.read_f64().unwrap(), 2.5);
        assert!(!reader.has_more());
    }

    #[test]
    fn test_reader_unexpected_end() {
        let bytes = [0x01, 0x02];
        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(reader.read_u32(), Err(DecodeError::UnexpectedEnd(0)));
        reader.seek(1);
        assert_eq!(reader.read_u8().unwrap(), 0x02);
        assert_eq!(reader.read_u8(), Err(DecodeError::UnexpectedEnd(2)));
    }

    #[test]
    fn test_reader_invalid_opcode() {
        let bytes = [Opcode::Nop.to_u8(), 0xFF];
        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Nop);
        assert_eq!(reader.read_opcode(), Err(DecodeError::InvalidOpcode(0xFF, 1)));
    }
}
