// Bytecode representation: the Lua 5.5 opcode set, the packed 32-bit
// instruction word and the function prototype.

pub mod disasm;
pub mod dump;
mod instruction;
mod proto;
pub mod validate;

pub use instruction::Instruction;
pub use proto::{Proto, UpvalDesc};

/// Instruction format modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
    IAx,
    IsJ,
}

/// The Lua 5.5 opcode set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // Load/move
    Move = 0,   // R[A] := R[B]
    LoadI,      // R[A] := sBx
    LoadF,      // R[A] := (float)sBx
    LoadK,      // R[A] := K[Bx]
    LoadKX,     // R[A] := K[extra arg]
    LoadFalse,  // R[A] := false
    LFalseSkip, // R[A] := false; pc++
    LoadTrue,   // R[A] := true
    LoadNil,    // R[A], R[A+1], ..., R[A+B] := nil

    // Upvalues
    GetUpval, // R[A] := UpValue[B]
    SetUpval, // UpValue[B] := R[A]

    // Table reads
    GetTabUp, // R[A] := UpValue[B][K[C]:string]
    GetTable, // R[A] := R[B][R[C]]
    GetI,     // R[A] := R[B][C]
    GetField, // R[A] := R[B][K[C]:string]

    // Table writes
    SetTabUp, // UpValue[A][K[B]:string] := RK(C)
    SetTable, // R[A][R[B]] := RK(C)
    SetI,     // R[A][B] := RK(C)
    SetField, // R[A][K[B]:string] := RK(C)

    NewTable, // R[A] := {} (B/C capacity hints)

    Self_, // R[A+1] := R[B]; R[A] := R[B][K[C]:string]

    // Arithmetic with immediate/constant
    AddI,  // R[A] := R[B] + sC
    AddK,  // R[A] := R[B] + K[C]:number
    SubK,  // R[A] := R[B] - K[C]:number
    MulK,  // R[A] := R[B] * K[C]:number
    ModK,  // R[A] := R[B] % K[C]:number
    PowK,  // R[A] := R[B] ^ K[C]:number
    DivK,  // R[A] := R[B] / K[C]:number
    IDivK, // R[A] := R[B] // K[C]:number

    // Bitwise with constant
    BAndK, // R[A] := R[B] & K[C]:integer
    BOrK,  // R[A] := R[B] | K[C]:integer
    BXorK, // R[A] := R[B] ~ K[C]:integer

    // Shifts with immediate
    ShrI, // R[A] := R[B] >> sC
    ShlI, // R[A] := sC << R[B]

    // Arithmetic, register-register
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,

    // Bitwise, register-register
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,

    // Metamethod follow-ups for the arithmetic family
    MmBin,  // call metamethod C over R[A] and R[B]
    MmBinI, // call metamethod C over R[A] and sB
    MmBinK, // call metamethod C over R[A] and K[B]

    // Unary
    Unm,  // R[A] := -R[B]
    BNot, // R[A] := ~R[B]
    Not,  // R[A] := not R[B]
    Len,  // R[A] := #R[B]

    Concat, // R[A] := R[A].. ... ..R[A+B-1]

    // Upvalue/TBC management
    Close, // close upvalues and TBC slots >= R[A]
    Tbc,   // mark R[A] "to be closed"

    Jmp, // pc += sJ

    // Comparisons: if (<cmp> ~= k) then pc++
    Eq, // R[A] == R[B]
    Lt, // R[A] <  R[B]
    Le, // R[A] <= R[B]

    EqK, // R[A] == K[B]
    EqI, // R[A] == sB
    LtI, // R[A] <  sB
    LeI, // R[A] <= sB
    GtI, // R[A] >  sB
    GeI, // R[A] >= sB

    Test,    // if (not R[A] == k) then pc++
    TestSet, // if (not R[B] == k) then pc++ else R[A] := R[B]

    Call,     // R[A], ..., R[A+C-2] := R[A](R[A+1], ..., R[A+B-1])
    TailCall, // return R[A](R[A+1], ..., R[A+B-1])

    Return,  // return R[A], ..., R[A+B-2]; k: close upvalues first
    Return0, // return
    Return1, // return R[A]

    // Numeric for
    ForLoop, // update counters; if loop continues then pc -= Bx
    ForPrep, // check and prep counters; if loop is empty then pc += Bx+1

    // Generic for
    TForPrep, // set up TBC slot; pc += Bx
    TForCall, // R[A+4], ..., R[A+3+C] := R[A](R[A+1], R[A+2])
    TForLoop, // if R[A+4] ~= nil then { R[A+2] := R[A+4]; pc -= Bx }

    SetList, // R[A][C+i] := R[A+i], 1 <= i <= B (k: C extended by EXTRAARG)

    Closure, // R[A] := closure(KPROTO[Bx])

    Vararg,     // R[A], R[A+1], ..., R[A+C-2] := varargs
    VarargPrep, // adjust vararg parameters (A = fixed parameter count)

    ExtraArg, // extra (larger) argument for the previous opcode
}

pub const OPCODE_COUNT: u8 = OpCode::ExtraArg as u8 + 1;

/// Metamethod tags. The MMBIN instruction family carries one in its C field;
/// the VM indexes its interned name table with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tm {
    Index = 0,
    NewIndex,
    Len,
    Eq,
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
    Lt,
    Le,
    Concat,
    Call,
    Close,
    ToString,
}

pub const TM_COUNT: usize = Tm::ToString as usize + 1;

impl Tm {
    #[inline(always)]
    pub fn from_u8(byte: u8) -> Self {
        debug_assert!((byte as usize) < TM_COUNT);
        unsafe { std::mem::transmute(byte) }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tm::Index => "__index",
            Tm::NewIndex => "__newindex",
            Tm::Len => "__len",
            Tm::Eq => "__eq",
            Tm::Add => "__add",
            Tm::Sub => "__sub",
            Tm::Mul => "__mul",
            Tm::Mod => "__mod",
            Tm::Pow => "__pow",
            Tm::Div => "__div",
            Tm::IDiv => "__idiv",
            Tm::BAnd => "__band",
            Tm::BOr => "__bor",
            Tm::BXor => "__bxor",
            Tm::Shl => "__shl",
            Tm::Shr => "__shr",
            Tm::Unm => "__unm",
            Tm::BNot => "__bnot",
            Tm::Lt => "__lt",
            Tm::Le => "__le",
            Tm::Concat => "__concat",
            Tm::Call => "__call",
            Tm::Close => "__close",
            Tm::ToString => "__tostring",
        }
    }

    /// Verb for "attempt to <verb> a ..." type errors.
    pub fn describe(self) -> &'static str {
        match self {
            Tm::Index => "index",
            Tm::NewIndex => "index",
            Tm::Len => "get length of",
            Tm::Concat => "concatenate",
            Tm::Call => "call",
            Tm::BAnd | Tm::BOr | Tm::BXor | Tm::Shl | Tm::Shr | Tm::BNot => {
                "perform bitwise operation on"
            }
            _ => "perform arithmetic on",
        }
    }
}

impl OpCode {
    #[inline(always)]
    pub fn from_u8(byte: u8) -> Self {
        debug_assert!(byte < OPCODE_COUNT);
        unsafe { std::mem::transmute(byte) }
    }

    /// Instructions that consume the stack top set by the previous
    /// instruction (multret producers/consumers).
    pub fn uses_top(self) -> bool {
        use OpCode::*;
        matches!(self, Call | TailCall | Return | SetList | VarargPrep)
    }

    pub fn mode(self) -> OpMode {
        use OpCode::*;
        match self {
            LoadI | LoadF => OpMode::IAsBx,
            LoadK | LoadKX | ForLoop | ForPrep | TForPrep | TForLoop | Closure => OpMode::IABx,
            Jmp => OpMode::IsJ,
            ExtraArg => OpMode::IAx,
            _ => OpMode::IABC,
        }
    }

    /// Conditional instructions: the following JMP is controlled by them and
    /// jump-list patching inspects them.
    pub fn is_test(self) -> bool {
        use OpCode::*;
        matches!(
            self,
            Test | TestSet | Eq | Lt | Le | EqK | EqI | LtI | LeI | GtI | GeI
        )
    }

    pub fn name(self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadI => "LOADI",
            LoadF => "LOADF",
            LoadK => "LOADK",
            LoadKX => "LOADKX",
            LoadFalse => "LOADFALSE",
            LFalseSkip => "LFALSESKIP",
            LoadTrue => "LOADTRUE",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            SetUpval => "SETUPVAL",
            GetTabUp => "GETTABUP",
            GetTable => "GETTABLE",
            GetI => "GETI",
            GetField => "GETFIELD",
            SetTabUp => "SETTABUP",
            SetTable => "SETTABLE",
            SetI => "SETI",
            SetField => "SETFIELD",
            NewTable => "NEWTABLE",
            Self_ => "SELF",
            AddI => "ADDI",
            AddK => "ADDK",
            SubK => "SUBK",
            MulK => "MULK",
            ModK => "MODK",
            PowK => "POWK",
            DivK => "DIVK",
            IDivK => "IDIVK",
            BAndK => "BANDK",
            BOrK => "BORK",
            BXorK => "BXORK",
            ShrI => "SHRI",
            ShlI => "SHLI",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Mod => "MOD",
            Pow => "POW",
            Div => "DIV",
            IDiv => "IDIV",
            BAnd => "BAND",
            BOr => "BOR",
            BXor => "BXOR",
            Shl => "SHL",
            Shr => "SHR",
            MmBin => "MMBIN",
            MmBinI => "MMBINI",
            MmBinK => "MMBINK",
            Unm => "UNM",
            BNot => "BNOT",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Close => "CLOSE",
            Tbc => "TBC",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            EqK => "EQK",
            EqI => "EQI",
            LtI => "LTI",
            LeI => "LEI",
            GtI => "GTI",
            GeI => "GEI",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            Return0 => "RETURN0",
            Return1 => "RETURN1",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForPrep => "TFORPREP",
            TForCall => "TFORCALL",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Closure => "CLOSURE",
            Vararg => "VARARG",
            VarargPrep => "VARARGPREP",
            ExtraArg => "EXTRAARG",
        }
    }
}
