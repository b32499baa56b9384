//! Bytecode instruction decoder
//!
//! Decodes raw bytecode bytes into typed instruction structs with parsed
//! operands, and answers the stack side table (`uses`/`defs`) per instruction.

use crate::encoder::{BytecodeReader, DecodeError};
use crate::opcode::{OperandFormat, Opcode};

/// A decoded bytecode instruction with typed operands
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    /// Byte offset in the script's code array
    pub offset: u32,
    /// The opcode
    pub opcode: Opcode,
    /// Decoded operands
    pub operands: Operands,
    /// Total size in bytes (opcode + operands)
    pub size: u32,
}

/// Typed operands for each instruction format
#[derive(Debug, Clone, PartialEq)]
pub enum Operands {
    /// No operands
    None,
    /// Signed byte (Int8)
    I8(i8),
    /// Unsigned byte (Pick, NewInit, Iter)
    U8(u8),
    /// Slot, argc or count
    U16(u16),
    /// Signed immediate (Int32)
    I32(i32),
    /// Atom, object, function or template index
    U32(u32),
    /// Double immediate
    F64(f64),
    /// Relative jump offset
    Jump(i32),
    /// Dense switch with relative targets
    TableSwitch {
        default: i32,
        low: i32,
        high: i32,
        targets: Vec<i32>,
    },
    /// Sparse switch with (atom, relative target) pairs
    LookupSwitch { default: i32, pairs: Vec<(u32, i32)> },
    /// Relative handler offsets, negative when absent
    Try { catch_offset: i32, finally_offset: i32 },
}

impl Instr {
    /// Offset of the instruction following this one
    pub fn next_offset(&self) -> u32 {
        self.offset + self.size
    }

    fn resolve(&self, rel: i32) -> i64 {
        self.offset as i64 + rel as i64
    }

    /// Absolute target of a single-jump instruction
    pub fn jump_target(&self) -> Option<i64> {
        match self.operands {
            Operands::Jump(rel) => Some(self.resolve(rel)),
            _ => None,
        }
    }

    /// Absolute default target of a switch
    pub fn switch_default(&self) -> Option<i64> {
        match &self.operands {
            Operands::TableSwitch { default, .. } | Operands::LookupSwitch { default, .. } => {
                Some(self.resolve(*default))
            }
            _ => None,
        }
    }

    /// Absolute case targets of a switch, in encoding order
    pub fn switch_cases(&self) -> Vec<i64> {
        match &self.operands {
            Operands::TableSwitch { targets, .. } => {
                targets.iter().map(|&rel| self.resolve(rel)).collect()
            }
            Operands::LookupSwitch { pairs, .. } => {
                pairs.iter().map(|&(_, rel)| self.resolve(rel)).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Absolute catch and finally handler offsets of a TRY
    pub fn try_handlers(&self) -> Vec<i64> {
        match self.operands {
            Operands::Try {
                catch_offset,
                finally_offset,
            } => [catch_offset, finally_offset]
                .into_iter()
                .filter(|rel| *rel >= 0)
                .map(|rel| self.resolve(rel))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Every offset control may transfer to other than the fallthrough
    pub fn jump_targets(&self) -> Vec<i64> {
        let mut targets = Vec::new();
        targets.extend(self.jump_target());
        targets.extend(self.switch_default());
        targets.extend(self.switch_cases());
        targets.extend(self.try_handlers());
        targets
    }

    /// Slot, argc or count operand
    pub fn u16_operand(&self) -> u32 {
        match self.operands {
            Operands::U16(v) => v as u32,
            Operands::U8(v) => v as u32,
            _ => 0,
        }
    }

    /// Atom, object, function or template index operand
    pub fn index_operand(&self) -> u32 {
        match self.operands {
            Operands::U32(v) => v,
            _ => 0,
        }
    }

    /// Integer pushed by an integer constant instruction
    pub fn int_constant(&self) -> Option<i32> {
        match (self.opcode, &self.operands) {
            (Opcode::Zero, _) => Some(0),
            (Opcode::One, _) => Some(1),
            (Opcode::Int8, Operands::I8(v)) => Some(*v as i32),
            (Opcode::Int32, Operands::I32(v)) => Some(*v),
            _ => None,
        }
    }

    /// Number of stack values this instruction pops
    pub fn uses(&self) -> u32 {
        use Opcode::*;
        match self.opcode {
            PopN => self.u16_operand(),
            Pick => self.u16_operand() + 1,
            Call | New | Eval | FunCall | FunApply => self.u16_operand() + 2,

            Pop | Dup | Void | SetArg | SetLocal | GetProp | CallProp | Length | IncProp
            | PropInc | DelProp | ToId | Neg | Pos | BitNot | Not | TypeOf | IfEq | IfNe | Or
            | And | Default | TableSwitch | LookupSwitch | Throw | Return | SetRval | PopV
            | Iter | MoreIter | EndIter | ArrayPush | Yield | EnterWith | XmlName => 1,

            Dup2 | Swap | SetGName | SetName | SetProp | GetElem | CallElem | IncElem
            | ElemInc | DelElem | In | InstanceOf | Add | Sub | Mul | Div | Mod | BitAnd
            | BitOr | BitXor | Lsh | Rsh | Ursh | Lt | Le | Gt | Ge | Eq | Ne | StrictEq
            | StrictNe | Case | InitProp => 2,

            SetElem | InitElem | EnumElem => 3,

            _ => 0,
        }
    }

    /// Number of stack values this instruction pushes
    pub fn defs(&self) -> u32 {
        use Opcode::*;
        match self.opcode {
            Pick => self.u16_operand() + 1,

            Nop | LoopHead | Pop | PopN | SetRval | PopV | Return | RetRval | Stop | Goto
            | IfEq | IfNe | Default | TableSwitch | LookupSwitch | Try | Throw | EnterBlock
            | LeaveBlock | EndInit | ArrayPush | EndIter | EnumElem | Generator | EnterWith
            | LeaveWith | Debugger => 0,

            Dup | Swap | CallArg | CallLocal | CallGName | CallName | CallProp | CallElem
            | MoreIter => 2,

            Dup2 => 4,

            _ => 1,
        }
    }
}

/// Decode the instruction starting at `offset`
pub fn decode_instr(code: &[u8], offset: usize) -> Result<Instr, DecodeError> {
    let mut reader = BytecodeReader::new(code);
    reader.seek(offset);
    let opcode = reader.read_opcode()?;
    let operands = decode_operands(opcode, &mut reader, offset)?;
    let size = reader.position() - offset;

    Ok(Instr {
        offset: offset as u32,
        opcode,
        operands,
        size: size as u32,
    })
}

/// Decode all instructions in a script's bytecode
pub fn decode_script(code: &[u8]) -> Result<Vec<Instr>, DecodeError> {
    let mut instrs = Vec::new();
    let mut pos = 0;

    while pos < code.len() {
        let instr = decode_instr(code, pos)?;
        pos = instr.next_offset() as usize;
        instrs.push(instr);
    }

    Ok(instrs)
}

fn decode_operands(
    opcode: Opcode,
    reader: &mut BytecodeReader<'_>,
    offset: usize,
) -> Result<Operands, DecodeError> {
    match opcode.format() {
        OperandFormat::None => Ok(Operands::None),
        OperandFormat::I8 => Ok(Operands::I8(reader.read_i8()?)),
        OperandFormat::U8 => Ok(Operands::U8(reader.read_u8()?)),
        OperandFormat::U16 => Ok(Operands::U16(reader.read_u16()?)),
        OperandFormat::I32 => Ok(Operands::I32(reader.read_i32()?)),
        OperandFormat::U32 => Ok(Operands::U32(reader.read_u32()?)),
        OperandFormat::F64 => Ok(Operands::F64(reader.read_f64()?)),
        OperandFormat::Jump => Ok(Operands::Jump(reader.read_i32()?)),
        OperandFormat::TableSwitch => {
            let default = reader.read_i32()?;
            let low = reader.read_i32()?;
            let high = reader.read_i32()?;
            if high < low {
                return Err(DecodeError::InvalidSwitch(offset));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            if count * 4 > reader.remaining() {
                return Err(DecodeError::UnexpectedEnd(reader.position()));
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(reader.read_i32()?);
            }
            Ok(Operands::TableSwitch {
                default,
                low,
                high,
                targets,
            })
        }
        OperandFormat::LookupSwitch => {
            let default = reader.read_i32()?;
            let npairs = reader.read_u16()?;
            let mut pairs = Vec::with_capacity(npairs as usize);
            for _ in 0..npairs {
                let atom = reader.read_u32()?;
                let target = reader.read_i32()?;
                pairs.push((atom, target));
            }
            Ok(Operands::LookupSwitch { default, pairs })
        }
        OperandFormat::Try => {
            let catch_offset = reader.read_i32()?;
            let finally_offset = reader.read_i32()?;
            Ok(Operands::Try {
                catch_offset,
                finally_offset,
            })
        }
    }
}
