//! Bytecode opcodes analyzed by tyflow
//!
//! This module defines the instruction set the flow, lifetime and type
//! analyses run over. Operands are little-endian and follow the opcode byte.
//! Jump operands are signed 32-bit offsets relative to the start of the
//! jumping instruction.

/// Bytecode opcode enumeration
///
/// Opcodes are organized into categories:
/// - 0x00-0x0F: Stack manipulation
/// - 0x10-0x1F: Constants
/// - 0x20-0x3F: Arguments, locals and frame values
/// - 0x40-0x4F: Global and scope names
/// - 0x50-0x5F: Properties and elements
/// - 0x60-0x7F: Arithmetic, bitwise and comparison
/// - 0x80-0x8F: Control flow
/// - 0x90-0x9F: Returns and calls
/// - 0xA0-0xAF: Initializers
/// - 0xB0-0xBF: Iteration and generators
/// - 0xC0-0xCF: Scope objects, XML and debugging
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Pop n values from stack (operand: u16 n)
    PopN = 0x02,
    /// Duplicate top stack value
    Dup = 0x03,
    /// Duplicate top two stack values
    Dup2 = 0x04,
    /// Swap top two stack values
    Swap = 0x05,
    /// Move the value n slots down to the top (operand: u8 n)
    Pick = 0x06,
    /// Marks the head of a loop body, target of the loop's backedge
    LoopHead = 0x07,

    // ===== Constants (0x10-0x1F) =====
    /// Push undefined
    Undefined = 0x10,
    /// Push null
    Null = 0x11,
    /// Push true
    True = 0x12,
    /// Push false
    False = 0x13,
    /// Push integer 0
    Zero = 0x14,
    /// Push integer 1
    One = 0x15,
    /// Push small integer (operand: i8)
    Int8 = 0x16,
    /// Push 32-bit integer (operand: i32)
    Int32 = 0x17,
    /// Push double (operand: f64)
    Double = 0x18,
    /// Push string atom (operand: u32 atom index)
    String = 0x19,
    /// Push object constant (operand: u32 object index)
    Object = 0x1A,
    /// Push a fresh regular expression (operand: u32 object index)
    RegExp = 0x1B,
    /// Push an array hole
    Hole = 0x1C,
    /// Pop a value and push undefined
    Void = 0x1D,

    // ===== Arguments, Locals & Frame Values (0x20-0x3F) =====
    /// Push argument (operand: u16 arg)
    GetArg = 0x20,
    /// Store top of stack to argument, leaving it pushed (operand: u16 arg)
    SetArg = 0x21,
    /// Push argument and undefined `this` (operand: u16 arg)
    CallArg = 0x22,
    /// Pre-increment argument (operand: u16 arg)
    IncArg = 0x23,
    /// Pre-decrement argument (operand: u16 arg)
    DecArg = 0x24,
    /// Post-increment argument (operand: u16 arg)
    ArgInc = 0x25,
    /// Post-decrement argument (operand: u16 arg)
    ArgDec = 0x26,
    /// Push local (operand: u16 local)
    GetLocal = 0x27,
    /// Store top of stack to local, leaving it pushed (operand: u16 local)
    SetLocal = 0x28,
    /// Push local and undefined `this` (operand: u16 local)
    CallLocal = 0x29,
    /// Pre-increment local (operand: u16 local)
    IncLocal = 0x2A,
    /// Pre-decrement local (operand: u16 local)
    DecLocal = 0x2B,
    /// Post-increment local (operand: u16 local)
    LocalInc = 0x2C,
    /// Post-decrement local (operand: u16 local)
    LocalDec = 0x2D,
    /// Push `this`
    This = 0x2E,
    /// Push the arguments object
    Arguments = 0x2F,
    /// Push the running function
    Callee = 0x30,

    // ===== Global & Scope Names (0x40-0x4F) =====
    /// Push global property (operand: u32 atom)
    GetGName = 0x40,
    /// Assign global property (operand: u32 atom)
    SetGName = 0x41,
    /// Push global property and undefined `this` (operand: u32 atom)
    CallGName = 0x42,
    /// Pre-increment global property (operand: u32 atom)
    IncGName = 0x43,
    /// Post-increment global property (operand: u32 atom)
    GNameInc = 0x44,
    /// Push scope-chain name (operand: u32 atom)
    Name = 0x45,
    /// Assign scope-chain name; pops the scope object and the value (operand: u32 atom)
    SetName = 0x46,
    /// Push scope-chain name and its `this` (operand: u32 atom)
    CallName = 0x47,
    /// Push the scope object holding a name (operand: u32 atom)
    BindName = 0x48,
    /// Push the global object for a global assignment (operand: u32 atom)
    BindGName = 0x49,
    /// Pre-increment scope-chain name (operand: u32 atom)
    IncName = 0x4A,
    /// Post-increment scope-chain name (operand: u32 atom)
    NameInc = 0x4B,
    /// Delete scope-chain name (operand: u32 atom)
    DelName = 0x4C,

    // ===== Properties & Elements (0x50-0x5F) =====
    /// Pop object, push property (operand: u32 atom)
    GetProp = 0x50,
    /// Pop value and object, assign property, push value (operand: u32 atom)
    SetProp = 0x51,
    /// Pop object, push property and the object as `this` (operand: u32 atom)
    CallProp = 0x52,
    /// Pop object, push its length
    Length = 0x53,
    /// Pre-increment property (operand: u32 atom)
    IncProp = 0x54,
    /// Post-increment property (operand: u32 atom)
    PropInc = 0x55,
    /// Delete property (operand: u32 atom)
    DelProp = 0x56,
    /// Pop index and object, push element
    GetElem = 0x57,
    /// Pop value, index and object, assign element, push value
    SetElem = 0x58,
    /// Pop index and object, push element and the object as `this`
    CallElem = 0x59,
    /// Pre-increment element
    IncElem = 0x5A,
    /// Post-increment element
    ElemInc = 0x5B,
    /// Delete element
    DelElem = 0x5C,
    /// Convert the index on top of stack to a property key
    ToId = 0x5D,
    /// Pop object and key, push whether the key is present
    In = 0x5E,
    /// Pop constructor and value, push instanceof result
    InstanceOf = 0x5F,

    // ===== Arithmetic, Bitwise & Comparison (0x60-0x7F) =====
    /// Addition or string concatenation
    Add = 0x60,
    /// Subtraction
    Sub = 0x61,
    /// Multiplication
    Mul = 0x62,
    /// Division
    Div = 0x63,
    /// Remainder
    Mod = 0x64,
    /// Numeric negation
    Neg = 0x65,
    /// Numeric conversion
    Pos = 0x66,
    /// Bitwise and
    BitAnd = 0x67,
    /// Bitwise or
    BitOr = 0x68,
    /// Bitwise xor
    BitXor = 0x69,
    /// Bitwise not
    BitNot = 0x6A,
    /// Left shift
    Lsh = 0x6B,
    /// Signed right shift
    Rsh = 0x6C,
    /// Unsigned right shift
    Ursh = 0x6D,
    /// Logical not
    Not = 0x6E,
    /// Push the typeof string of a value
    TypeOf = 0x6F,
    /// Less than
    Lt = 0x70,
    /// Less or equal
    Le = 0x71,
    /// Greater than
    Gt = 0x72,
    /// Greater or equal
    Ge = 0x73,
    /// Loose equality
    Eq = 0x74,
    /// Loose inequality
    Ne = 0x75,
    /// Strict equality
    StrictEq = 0x76,
    /// Strict inequality
    StrictNe = 0x77,

    // ===== Control Flow (0x80-0x8F) =====
    /// Unconditional jump (operand: i32 offset)
    Goto = 0x80,
    /// Pop a value and jump if falsy (operand: i32 offset)
    IfEq = 0x81,
    /// Pop a value and jump if truthy (operand: i32 offset)
    IfNe = 0x82,
    /// Jump keeping the value if truthy, else pop and fall through (operand: i32 offset)
    Or = 0x83,
    /// Jump keeping the value if falsy, else pop and fall through (operand: i32 offset)
    And = 0x84,
    /// Compare against the switch value; jump and drop it on match (operand: i32 offset)
    Case = 0x85,
    /// Drop the switch value and jump (operand: i32 offset)
    Default = 0x86,
    /// Dense switch (operands: i32 default, i32 low, i32 high, i32 targets[high - low + 1])
    TableSwitch = 0x87,
    /// Sparse switch (operands: i32 default, u16 npairs, (u32 atom, i32 target)[npairs])
    LookupSwitch = 0x88,
    /// Enter a try block (operands: i32 catch offset, i32 finally offset; negative means absent)
    Try = 0x89,
    /// Throw the value on top of stack
    Throw = 0x8A,
    /// Push the pending exception at a handler entry
    Exception = 0x8B,
    /// Enter a lexical block (operand: u16 slot count)
    EnterBlock = 0x8C,
    /// Leave a lexical block (operand: u16 slot count)
    LeaveBlock = 0x8D,

    // ===== Returns & Calls (0x90-0x9F) =====
    /// Return the value on top of stack
    Return = 0x90,
    /// Store the return value without returning
    SetRval = 0x91,
    /// Store the completion value of a statement
    PopV = 0x92,
    /// Return the stored return value
    RetRval = 0x93,
    /// End of script, returns undefined
    Stop = 0x94,
    /// Call (operand: u16 argc); stack is callee, this, args
    Call = 0x95,
    /// Construct (operand: u16 argc)
    New = 0x96,
    /// Direct eval (operand: u16 argc)
    Eval = 0x97,
    /// Function.prototype.call (operand: u16 argc)
    FunCall = 0x98,
    /// Function.prototype.apply (operand: u16 argc)
    FunApply = 0x99,
    /// Push a closure for a nested function (operand: u32 function index)
    Lambda = 0x9A,

    // ===== Initializers (0xA0-0xAF) =====
    /// Push an empty object or array literal (operand: u8 kind, 0 object, 1 array)
    NewInit = 0xA0,
    /// Push an array literal (operand: u32 length)
    NewArray = 0xA1,
    /// Push an object literal from a property template (operand: u32 template index)
    NewObject = 0xA2,
    /// Pop value, define property on the literal below (operand: u32 atom)
    InitProp = 0xA3,
    /// Pop value and index, define element on the literal below
    InitElem = 0xA4,
    /// Finish an object or array literal
    EndInit = 0xA5,
    /// Pop value and push it onto the array held in a local (operand: u16 local)
    ArrayPush = 0xA6,

    // ===== Iteration & Generators (0xB0-0xBF) =====
    /// Replace an object with its iterator (operand: u8 flags, bit 0 is for-each)
    Iter = 0xB0,
    /// Push whether the iterator has another value
    MoreIter = 0xB1,
    /// Push the next iterated value
    IterNext = 0xB2,
    /// Pop and close an iterator
    EndIter = 0xB3,
    /// Assign an iterated value to an element: pops value, object, index
    EnumElem = 0xB4,
    /// Turn the running function into a generator
    Generator = 0xB5,
    /// Yield the value on top of stack and push the resumed value
    Yield = 0xB6,

    // ===== Scope Objects, XML & Debugging (0xC0-0xCF) =====
    /// Push an object onto the scope chain
    EnterWith = 0xC0,
    /// Pop the innermost with scope
    LeaveWith = 0xC1,
    /// Resolve an XML name
    XmlName = 0xC2,
    /// Debugger statement
    Debugger = 0xC3,
}

/// Layout of the operands that follow an opcode byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandFormat {
    /// No operands
    None,
    /// Signed byte
    I8,
    /// Unsigned byte
    U8,
    /// Unsigned 16-bit value: local, arg, argc or count
    U16,
    /// Signed 32-bit immediate
    I32,
    /// Unsigned 32-bit index: atom, object, function or template
    U32,
    /// 64-bit float immediate
    F64,
    /// Signed 32-bit relative jump
    Jump,
    /// Table switch, variable length
    TableSwitch,
    /// Lookup switch, variable length
    LookupSwitch,
    /// Two signed 32-bit relative handler offsets
    Try,
}

impl OperandFormat {
    /// Number of operand bytes for fixed-size formats
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::None => Some(0),
            Self::I8 | Self::U8 => Some(1),
            Self::U16 => Some(2),
            Self::I32 | Self::U32 | Self::Jump => Some(4),
            Self::F64 | Self::Try => Some(8),
            Self::TableSwitch | Self::LookupSwitch => None,
        }
    }
}

impl Opcode {
    /// Convert byte to opcode
    ///
    /// Returns None if the byte does not correspond to a valid opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            // Stack manipulation
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::PopN),
            0x03 => Some(Self::Dup),
            0x04 => Some(Self::Dup2),
            0x05 => Some(Self::Swap),
            0x06 => Some(Self::Pick),
            0x07 => Some(Self::LoopHead),

            // Constants
            0x10 => Some(Self::Undefined),
            0x11 => Some(Self::Null),
            0x12 => Some(Self::True),
            0x13 => Some(Self::False),
            0x14 => Some(Self::Zero),
            0x15 => Some(Self::One),
            0x16 => Some(Self::Int8),
            0x17 => Some(Self::Int32),
            0x18 => Some(Self::Double),
            0x19 => Some(Self::String),
            0x1A => Some(Self::Object),
            0x1B => Some(Self::RegExp),
            0x1C => Some(Self::Hole),
            0x1D => Some(Self::Void),

            // Arguments, locals & frame values
            0x20 => Some(Self::GetArg),
            0x21 => Some(Self::SetArg),
            0x22 => Some(Self::CallArg),
            0x23 => Some(Self::IncArg),
            0x24 => Some(Self::DecArg),
            0x25 => Some(Self::ArgInc),
            0x26 => Some(Self::ArgDec),
            0x27 => Some(Self::GetLocal),
            0x28 => Some(Self::SetLocal),
            0x29 => Some(Self::CallLocal),
            0x2A => Some(Self::IncLocal),
            0x2B => Some(Self::DecLocal),
            0x2C => Some(Self::LocalInc),
            0x2D => Some(Self::LocalDec),
            0x2E => Some(Self::This),
            0x2F => Some(Self::Arguments),
            0x30 => Some(Self::Callee),

            // Global & scope names
            0x40 => Some(Self::GetGName),
            0x41 => Some(Self::SetGName),
            0x42 => Some(Self::CallGName),
            0x43 => Some(Self::IncGName),
            0x44 => Some(Self::GNameInc),
            0x45 => Some(Self::Name),
            0x46 => Some(Self::SetName),
            0x47 => Some(Self::CallName),
            0x48 => Some(Self::BindName),
            0x49 => Some(Self::BindGName),
            0x4A => Some(Self::IncName),
            0x4B => Some(Self::NameInc),
            0x4C => Some(Self::DelName),

            // Properties & elements
            0x50 => Some(Self::GetProp),
            0x51 => Some(Self::SetProp),
            0x52 => Some(Self::CallProp),
            0x53 => Some(Self::Length),
            0x54 => Some(Self::IncProp),
            0x55 => Some(Self::PropInc),
            0x56 => Some(Self::DelProp),
            0x57 => Some(Self::GetElem),
            0x58 => Some(Self::SetElem),
            0x59 => Some(Self::CallElem),
            0x5A => Some(Self::IncElem),
            0x5B => Some(Self::ElemInc),
            0x5C => Some(Self::DelElem),
            0x5D => Some(Self::ToId),
            0x5E => Some(Self::In),
            0x5F => Some(Self::InstanceOf),

            // Arithmetic, bitwise & comparison
            0x60 => Some(Self::Add),
            0x61 => Some(Self::Sub),
            0x62 => Some(Self::Mul),
            0x63 => Some(Self::Div),
            0x64 => Some(Self::Mod),
            0x65 => Some(Self::Neg),
            0x66 => Some(Self::Pos),
            0x67 => Some(Self::BitAnd),
            0x68 => Some(Self::BitOr),
            0x69 => Some(Self::BitXor),
            0x6A => Some(Self::BitNot),
            0x6B => Some(Self::Lsh),
            0x6C => Some(Self::Rsh),
            0x6D => Some(Self::Ursh),
            0x6E => Some(Self::Not),
            0x6F => Some(Self::TypeOf),
            0x70 => Some(Self::Lt),
            0x71 => Some(Self::Le),
            0x72 => Some(Self::Gt),
            0x73 => Some(Self::Ge),
            0x74 => Some(Self::Eq),
            0x75 => Some(Self::Ne),
            0x76 => Some(Self::StrictEq),
            0x77 => Some(Self::StrictNe),

            // Control flow
            0x80 => Some(Self::Goto),
            0x81 => Some(Self::IfEq),
            0x82 => Some(Self::IfNe),
            0x83 => Some(Self::Or),
            0x84 => Some(Self::And),
            0x85 => Some(Self::Case),
            0x86 => Some(Self::Default),
            0x87 => Some(Self::TableSwitch),
            0x88 => Some(Self::LookupSwitch),
            0x89 => Some(Self::Try),
            0x8A => Some(Self::Throw),
            0x8B => Some(Self::Exception),
            0x8C => Some(Self::EnterBlock),
            0x8D => Some(Self::LeaveBlock),

            // Returns & calls
            0x90 => Some(Self::Return),
            0x91 => Some(Self::SetRval),
            0x92 => Some(Self::PopV),
            0x93 => Some(Self::RetRval),
            0x94 => Some(Self::Stop),
            0x95 => Some(Self::Call),
            0x96 => Some(Self::New),
            0x97 => Some(Self::Eval),
            0x98 => Some(Self::FunCall),
            0x99 => Some(Self::FunApply),
            0x9A => Some(Self::Lambda),

            // Initializers
            0xA0 => Some(Self::NewInit),
            0xA1 => Some(Self::NewArray),
            0xA2 => Some(Self::NewObject),
            0xA3 => Some(Self::InitProp),
            0xA4 => Some(Self::InitElem),
            0xA5 => Some(Self::EndInit),
            0xA6 => Some(Self::ArrayPush),

            // Iteration & generators
            0xB0 => Some(Self::Iter),
            0xB1 => Some(Self::MoreIter),
            0xB2 => Some(Self::IterNext),
            0xB3 => Some(Self::EndIter),
            0xB4 => Some(Self::EnumElem),
            0xB5 => Some(Self::Generator),
            0xB6 => Some(Self::Yield),

            // Scope objects, XML & debugging
            0xC0 => Some(Self::EnterWith),
            0xC1 => Some(Self::LeaveWith),
            0xC2 => Some(Self::XmlName),
            0xC3 => Some(Self::Debugger),

            _ => None,
        }
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::PopN => "POPN",
            Self::Dup => "DUP",
            Self::Dup2 => "DUP2",
            Self::Swap => "SWAP",
            Self::Pick => "PICK",
            Self::LoopHead => "LOOPHEAD",
            Self::Undefined => "UNDEFINED",
            Self::Null => "NULL",
            Self::True => "TRUE",
            Self::False => "FALSE",
            Self::Zero => "ZERO",
            Self::One => "ONE",
            Self::Int8 => "INT8",
            Self::Int32 => "INT32",
            Self::Double => "DOUBLE",
            Self::String => "STRING",
            Self::Object => "OBJECT",
            Self::RegExp => "REGEXP",
            Self::Hole => "HOLE",
            Self::Void => "VOID",
            Self::GetArg => "GETARG",
            Self::SetArg => "SETARG",
            Self::CallArg => "CALLARG",
            Self::IncArg => "INCARG",
            Self::DecArg => "DECARG",
            Self::ArgInc => "ARGINC",
            Self::ArgDec => "ARGDEC",
            Self::GetLocal => "GETLOCAL",
            Self::SetLocal => "SETLOCAL",
            Self::CallLocal => "CALLLOCAL",
            Self::IncLocal => "INCLOCAL",
            Self::DecLocal => "DECLOCAL",
            Self::LocalInc => "LOCALINC",
            Self::LocalDec => "LOCALDEC",
            Self::This => "THIS",
            Self::Arguments => "ARGUMENTS",
            Self::Callee => "CALLEE",
            Self::GetGName => "GETGNAME",
            Self::SetGName => "SETGNAME",
            Self::CallGName => "CALLGNAME",
            Self::IncGName => "INCGNAME",
            Self::GNameInc => "GNAMEINC",
            Self::Name => "NAME",
            Self::SetName => "SETNAME",
            Self::CallName => "CALLNAME",
            Self::BindName => "BINDNAME",
            Self::BindGName => "BINDGNAME",
            Self::IncName => "INCNAME",
            Self::NameInc => "NAMEINC",
            Self::DelName => "DELNAME",
            Self::GetProp => "GETPROP",
            Self::SetProp => "SETPROP",
            Self::CallProp => "CALLPROP",
            Self::Length => "LENGTH",
            Self::IncProp => "INCPROP",
            Self::PropInc => "PROPINC",
            Self::DelProp => "DELPROP",
            Self::GetElem => "GETELEM",
            Self::SetElem => "SETELEM",
            Self::CallElem => "CALLELEM",
            Self::IncElem => "INCELEM",
            Self::ElemInc => "ELEMINC",
            Self::DelElem => "DELELEM",
            Self::ToId => "TOID",
            Self::In => "IN",
            Self::InstanceOf => "INSTANCEOF",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Mod => "MOD",
            Self::Neg => "NEG",
            Self::Pos => "POS",
            Self::BitAnd => "BITAND",
            Self::BitOr => "BITOR",
            Self::BitXor => "BITXOR",
            Self::BitNot => "BITNOT",
            Self::Lsh => "LSH",
            Self::Rsh => "RSH",
            Self::Ursh => "URSH",
            Self::Not => "NOT",
            Self::TypeOf => "TYPEOF",
            Self::Lt => "LT",
            Self::Le => "LE",
            Self::Gt => "GT",
            Self::Ge => "GE",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::StrictEq => "STRICTEQ",
            Self::StrictNe => "STRICTNE",
            Self::Goto => "GOTO",
            Self::IfEq => "IFEQ",
            Self::IfNe => "IFNE",
            Self::Or => "OR",
            Self::And => "AND",
            Self::Case => "CASE",
            Self::Default => "DEFAULT",
            Self::TableSwitch => "TABLESWITCH",
            Self::LookupSwitch => "LOOKUPSWITCH",
            Self::Try => "TRY",
            Self::Throw => "THROW",
            Self::Exception => "EXCEPTION",
            Self::EnterBlock => "ENTERBLOCK",
            Self::LeaveBlock => "LEAVEBLOCK",
            Self::Return => "RETURN",
            Self::SetRval => "SETRVAL",
            Self::PopV => "POPV",
            Self::RetRval => "RETRVAL",
            Self::Stop => "STOP",
            Self::Call => "CALL",
            Self::New => "NEW",
            Self::Eval => "EVAL",
            Self::FunCall => "FUNCALL",
            Self::FunApply => "FUNAPPLY",
            Self::Lambda => "LAMBDA",
            Self::NewInit => "NEWINIT",
            Self::NewArray => "NEWARRAY",
            Self::NewObject => "NEWOBJECT",
            Self::InitProp => "INITPROP",
            Self::InitElem => "INITELEM",
            Self::EndInit => "ENDINIT",
            Self::ArrayPush => "ARRAYPUSH",
            Self::Iter => "ITER",
            Self::MoreIter => "MOREITER",
            Self::IterNext => "ITERNEXT",
            Self::EndIter => "ENDITER",
            Self::EnumElem => "ENUMELEM",
            Self::Generator => "GENERATOR",
            Self::Yield => "YIELD",
            Self::EnterWith => "ENTERWITH",
            Self::LeaveWith => "LEAVEWITH",
            Self::XmlName => "XMLNAME",
            Self::Debugger => "DEBUGGER",
        }
    }

    /// Layout of the operands following this opcode
    pub fn format(self) -> OperandFormat {
        match self {
            Self::Int8 => OperandFormat::I8,
            Self::Pick | Self::NewInit | Self::Iter => OperandFormat::U8,
            Self::PopN
            | Self::GetArg
            | Self::SetArg
            | Self::CallArg
            | Self::IncArg
            | Self::DecArg
            | Self::ArgInc
            | Self::ArgDec
            | Self::GetLocal
            | Self::SetLocal
            | Self::CallLocal
            | Self::IncLocal
            | Self::DecLocal
            | Self::LocalInc
            | Self::LocalDec
            | Self::EnterBlock
            | Self::LeaveBlock
            | Self::Call
            | Self::New
            | Self::Eval
            | Self::FunCall
            | Self::FunApply
            | Self::ArrayPush => OperandFormat::U16,
            Self::Int32 => OperandFormat::I32,
            Self::Double => OperandFormat::F64,
            Self::String
            | Self::Object
            | Self::RegExp
            | Self::GetGName
            | Self::SetGName
            | Self::CallGName
            | Self::IncGName
            | Self::GNameInc
            | Self::Name
            | Self::SetName
            | Self::CallName
            | Self::BindName
            | Self::BindGName
            | Self::IncName
            | Self::NameInc
            | Self::DelName
            | Self::GetProp
            | Self::SetProp
            | Self::CallProp
            | Self::IncProp
            | Self::PropInc
            | Self::DelProp
            | Self::Lambda
            | Self::NewArray
            | Self::NewObject
            | Self::InitProp => OperandFormat::U32,
            Self::Goto
            | Self::IfEq
            | Self::IfNe
            | Self::Or
            | Self::And
            | Self::Case
            | Self::Default => OperandFormat::Jump,
            Self::TableSwitch => OperandFormat::TableSwitch,
            Self::LookupSwitch => OperandFormat::LookupSwitch,
            Self::Try => OperandFormat::Try,
            _ => OperandFormat::None,
        }
    }

    /// Instruction length in bytes, or None for variable-length switches
    pub fn fixed_length(self) -> Option<usize> {
        self.format().fixed_size().map(|size| size + 1)
    }

    /// Check if this opcode carries a single relative jump operand
    pub fn is_jump(self) -> bool {
        self.format() == OperandFormat::Jump
    }

    /// Check if this opcode is a table or lookup switch
    pub fn is_switch(self) -> bool {
        matches!(self, Self::TableSwitch | Self::LookupSwitch)
    }

    /// Check if control can continue to the next instruction
    pub fn falls_through(self) -> bool {
        !matches!(
            self,
            Self::Goto
                | Self::Default
                | Self::Return
                | Self::RetRval
                | Self::Stop
                | Self::Throw
                | Self::TableSwitch
                | Self::LookupSwitch
        )
    }

    /// Check if this opcode invokes a function
    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            Self::Call | Self::New | Self::Eval | Self::FunCall | Self::FunApply
        )
    }

    /// Check if the values this opcode pushes are observed at runtime
    ///
    /// Results of these opcodes cannot be fully predicted statically, so the
    /// interpreter reports what it sees into a per-offset observed set.
    pub fn is_typeset(self) -> bool {
        matches!(
            self,
            Self::GetGName
                | Self::CallGName
                | Self::IncGName
                | Self::GNameInc
                | Self::Name
                | Self::CallName
                | Self::IncName
                | Self::NameInc
                | Self::GetProp
                | Self::CallProp
                | Self::Length
                | Self::IncProp
                | Self::PropInc
                | Self::GetElem
                | Self::CallElem
                | Self::IncElem
                | Self::ElemInc
                | Self::Call
                | Self::New
                | Self::Eval
                | Self::FunCall
                | Self::FunApply
        )
    }

    /// Check if this opcode resolves a name through the scope chain
    pub fn is_name_op(self) -> bool {
        matches!(
            self,
            Self::Name
                | Self::SetName
                | Self::CallName
                | Self::BindName
                | Self::IncName
                | Self::NameInc
                | Self::DelName
        )
    }

    /// Check if this opcode accesses an argument slot
    pub fn is_arg_op(self) -> bool {
        matches!(
            self,
            Self::GetArg
                | Self::SetArg
                | Self::CallArg
                | Self::IncArg
                | Self::DecArg
                | Self::ArgInc
                | Self::ArgDec
        )
    }

    /// Check if this opcode accesses a local slot
    pub fn is_local_op(self) -> bool {
        matches!(
            self,
            Self::GetLocal
                | Self::SetLocal
                | Self::CallLocal
                | Self::IncLocal
                | Self::DecLocal
                | Self::LocalInc
                | Self::LocalDec
        )
    }

    /// Check if this opcode increments or decrements its operand in place
    pub fn is_inc_dec(self) -> bool {
        matches!(
            self,
            Self::IncArg
                | Self::DecArg
                | Self::ArgInc
                | Self::ArgDec
                | Self::IncLocal
                | Self::DecLocal
                | Self::LocalInc
                | Self::LocalDec
                | Self::IncGName
                | Self::GNameInc
                | Self::IncName
                | Self::NameInc
                | Self::IncProp
                | Self::PropInc
                | Self::IncElem
                | Self::ElemInc
        )
    }

    /// Check if this opcode is a relational or equality comparison
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Lt
                | Self::Le
                | Self::Gt
                | Self::Ge
                | Self::Eq
                | Self::Ne
                | Self::StrictEq
                | Self::StrictNe
        )
    }

    /// Check if this opcode only tests the truthiness or type of its operand
    pub fn is_detecting(self) -> bool {
        matches!(
            self,
            Self::IfEq | Self::IfNe | Self::Not | Self::Or | Self::And | Self::TypeOf
        )
    }
}
