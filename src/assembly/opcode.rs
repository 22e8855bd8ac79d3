//! The CIL opcode set the patch engine reads and writes.
//!
//! Covers what injection synthesis emits, what structural scans match and what the
//! evaluator executes: compact and long argument/local forms, the constant loaders,
//! both branch distance families, calls, field access and the boxing group. Values are
//! the ECMA-335 encodings; two-byte instructions carry their `0xFE` prefix in the high
//! byte.

use strum::Display;

/// One CIL instruction opcode.
///
/// The numeric value is the wire encoding (`0xFExx` for prefixed instructions). Short
/// branch forms exist so scans can match them and the normalizer can widen them; the
/// synthesizer itself always emits long-distance branches.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    // Stack and argument group (0x00-0x20)
    /// No operation
    #[strum(serialize = "nop")]
    Nop = 0x0000,
    /// Load argument 0
    #[strum(serialize = "ldarg.0")]
    Ldarg0 = 0x0002,
    /// Load argument 1
    #[strum(serialize = "ldarg.1")]
    Ldarg1 = 0x0003,
    /// Load argument 2
    #[strum(serialize = "ldarg.2")]
    Ldarg2 = 0x0004,
    /// Load argument 3
    #[strum(serialize = "ldarg.3")]
    Ldarg3 = 0x0005,
    /// Load local 0
    #[strum(serialize = "ldloc.0")]
    Ldloc0 = 0x0006,
    /// Load local 1
    #[strum(serialize = "ldloc.1")]
    Ldloc1 = 0x0007,
    /// Load local 2
    #[strum(serialize = "ldloc.2")]
    Ldloc2 = 0x0008,
    /// Load local 3
    #[strum(serialize = "ldloc.3")]
    Ldloc3 = 0x0009,
    /// Store local 0
    #[strum(serialize = "stloc.0")]
    Stloc0 = 0x000A,
    /// Store local 1
    #[strum(serialize = "stloc.1")]
    Stloc1 = 0x000B,
    /// Store local 2
    #[strum(serialize = "stloc.2")]
    Stloc2 = 0x000C,
    /// Store local 3
    #[strum(serialize = "stloc.3")]
    Stloc3 = 0x000D,
    /// Load argument, short index
    #[strum(serialize = "ldarg.s")]
    LdargS = 0x000E,
    /// Load argument address, short index
    #[strum(serialize = "ldarga.s")]
    LdargaS = 0x000F,
    /// Store argument, short index
    #[strum(serialize = "starg.s")]
    StargS = 0x0010,
    /// Load local, short index
    #[strum(serialize = "ldloc.s")]
    LdlocS = 0x0011,
    /// Load local address, short index
    #[strum(serialize = "ldloca.s")]
    LdlocaS = 0x0012,
    /// Store local, short index
    #[strum(serialize = "stloc.s")]
    StlocS = 0x0013,
    /// Push null reference
    #[strum(serialize = "ldnull")]
    Ldnull = 0x0014,
    /// Push int32 -1
    #[strum(serialize = "ldc.i4.m1")]
    LdcI4M1 = 0x0015,
    /// Push int32 0
    #[strum(serialize = "ldc.i4.0")]
    LdcI40 = 0x0016,
    /// Push int32 1
    #[strum(serialize = "ldc.i4.1")]
    LdcI41 = 0x0017,
    /// Push int32 2
    #[strum(serialize = "ldc.i4.2")]
    LdcI42 = 0x0018,
    /// Push int32 3
    #[strum(serialize = "ldc.i4.3")]
    LdcI43 = 0x0019,
    /// Push int32 4
    #[strum(serialize = "ldc.i4.4")]
    LdcI44 = 0x001A,
    /// Push int32 5
    #[strum(serialize = "ldc.i4.5")]
    LdcI45 = 0x001B,
    /// Push int32 6
    #[strum(serialize = "ldc.i4.6")]
    LdcI46 = 0x001C,
    /// Push int32 7
    #[strum(serialize = "ldc.i4.7")]
    LdcI47 = 0x001D,
    /// Push int32 8
    #[strum(serialize = "ldc.i4.8")]
    LdcI48 = 0x001E,
    /// Push int32, short operand
    #[strum(serialize = "ldc.i4.s")]
    LdcI4S = 0x001F,
    /// Push int32
    #[strum(serialize = "ldc.i4")]
    LdcI4 = 0x0020,

    // Constants, stack shuffles and calls (0x21-0x2A)
    /// Push int64
    #[strum(serialize = "ldc.i8")]
    LdcI8 = 0x0021,
    /// Push float32
    #[strum(serialize = "ldc.r4")]
    LdcR4 = 0x0022,
    /// Push float64
    #[strum(serialize = "ldc.r8")]
    LdcR8 = 0x0023,
    /// Duplicate top of stack
    #[strum(serialize = "dup")]
    Dup = 0x0025,
    /// Pop top of stack
    #[strum(serialize = "pop")]
    Pop = 0x0026,
    /// Call method
    #[strum(serialize = "call")]
    Call = 0x0028,
    /// Return from method
    #[strum(serialize = "ret")]
    Ret = 0x002A,

    // Short-distance branches (0x2B-0x37)
    /// Unconditional branch, short
    #[strum(serialize = "br.s")]
    BrS = 0x002B,
    /// Branch on false/null/zero, short
    #[strum(serialize = "brfalse.s")]
    BrfalseS = 0x002C,
    /// Branch on true/non-null/non-zero, short
    #[strum(serialize = "brtrue.s")]
    BrtrueS = 0x002D,
    /// Branch on equal, short
    #[strum(serialize = "beq.s")]
    BeqS = 0x002E,
    /// Branch on greater or equal, short
    #[strum(serialize = "bge.s")]
    BgeS = 0x002F,
    /// Branch on greater, short
    #[strum(serialize = "bgt.s")]
    BgtS = 0x0030,
    /// Branch on less or equal, short
    #[strum(serialize = "ble.s")]
    BleS = 0x0031,
    /// Branch on less, short
    #[strum(serialize = "blt.s")]
    BltS = 0x0032,
    /// Branch on unequal (unordered), short
    #[strum(serialize = "bne.un.s")]
    BneUnS = 0x0033,
    /// Branch on greater or equal (unsigned), short
    #[strum(serialize = "bge.un.s")]
    BgeUnS = 0x0034,
    /// Branch on greater (unsigned), short
    #[strum(serialize = "bgt.un.s")]
    BgtUnS = 0x0035,
    /// Branch on less or equal (unsigned), short
    #[strum(serialize = "ble.un.s")]
    BleUnS = 0x0036,
    /// Branch on less (unsigned), short
    #[strum(serialize = "blt.un.s")]
    BltUnS = 0x0037,

    // Long-distance branches (0x38-0x45)
    /// Unconditional branch
    #[strum(serialize = "br")]
    Br = 0x0038,
    /// Branch on false/null/zero
    #[strum(serialize = "brfalse")]
    Brfalse = 0x0039,
    /// Branch on true/non-null/non-zero
    #[strum(serialize = "brtrue")]
    Brtrue = 0x003A,
    /// Branch on equal
    #[strum(serialize = "beq")]
    Beq = 0x003B,
    /// Branch on greater or equal
    #[strum(serialize = "bge")]
    Bge = 0x003C,
    /// Branch on greater
    #[strum(serialize = "bgt")]
    Bgt = 0x003D,
    /// Branch on less or equal
    #[strum(serialize = "ble")]
    Ble = 0x003E,
    /// Branch on less
    #[strum(serialize = "blt")]
    Blt = 0x003F,
    /// Branch on unequal (unordered)
    #[strum(serialize = "bne.un")]
    BneUn = 0x0040,
    /// Branch on greater or equal (unsigned)
    #[strum(serialize = "bge.un")]
    BgeUn = 0x0041,
    /// Branch on greater (unsigned)
    #[strum(serialize = "bgt.un")]
    BgtUn = 0x0042,
    /// Branch on less or equal (unsigned)
    #[strum(serialize = "ble.un")]
    BleUn = 0x0043,
    /// Branch on less (unsigned)
    #[strum(serialize = "blt.un")]
    BltUn = 0x0044,
    /// Jump table
    #[strum(serialize = "switch")]
    Switch = 0x0045,

    // Arithmetic and bitwise group (0x58-0x66)
    /// Add two values
    #[strum(serialize = "add")]
    Add = 0x0058,
    /// Subtract two values
    #[strum(serialize = "sub")]
    Sub = 0x0059,
    /// Multiply two values
    #[strum(serialize = "mul")]
    Mul = 0x005A,
    /// Divide two values
    #[strum(serialize = "div")]
    Div = 0x005B,
    /// Divide two values, unsigned
    #[strum(serialize = "div.un")]
    DivUn = 0x005C,
    /// Remainder of two values
    #[strum(serialize = "rem")]
    Rem = 0x005D,
    /// Remainder of two values, unsigned
    #[strum(serialize = "rem.un")]
    RemUn = 0x005E,
    /// Bitwise and
    #[strum(serialize = "and")]
    And = 0x005F,
    /// Bitwise or
    #[strum(serialize = "or")]
    Or = 0x0060,
    /// Bitwise xor
    #[strum(serialize = "xor")]
    Xor = 0x0061,
    /// Shift left
    #[strum(serialize = "shl")]
    Shl = 0x0062,
    /// Shift right
    #[strum(serialize = "shr")]
    Shr = 0x0063,
    /// Shift right, unsigned
    #[strum(serialize = "shr.un")]
    ShrUn = 0x0064,
    /// Negate value
    #[strum(serialize = "neg")]
    Neg = 0x0065,
    /// Bitwise complement
    #[strum(serialize = "not")]
    Not = 0x0066,

    // Object model group (0x6F-0xA5)
    /// Call virtual method
    #[strum(serialize = "callvirt")]
    Callvirt = 0x006F,
    /// Load value through typed pointer
    #[strum(serialize = "ldobj")]
    Ldobj = 0x0071,
    /// Push string literal
    #[strum(serialize = "ldstr")]
    Ldstr = 0x0072,
    /// Allocate object and call constructor
    #[strum(serialize = "newobj")]
    Newobj = 0x0073,
    /// Load instance field
    #[strum(serialize = "ldfld")]
    Ldfld = 0x007B,
    /// Load instance field address
    #[strum(serialize = "ldflda")]
    Ldflda = 0x007C,
    /// Store instance field
    #[strum(serialize = "stfld")]
    Stfld = 0x007D,
    /// Load static field
    #[strum(serialize = "ldsfld")]
    Ldsfld = 0x007E,
    /// Load static field address
    #[strum(serialize = "ldsflda")]
    Ldsflda = 0x007F,
    /// Store static field
    #[strum(serialize = "stsfld")]
    Stsfld = 0x0080,
    /// Store value through typed pointer
    #[strum(serialize = "stobj")]
    Stobj = 0x0081,
    /// Box value type
    #[strum(serialize = "box")]
    Box = 0x008C,
    /// Unbox to value
    #[strum(serialize = "unbox.any")]
    UnboxAny = 0x00A5,

    // Prefixed instructions (0xFE01-0xFE0E)
    /// Compare equal
    #[strum(serialize = "ceq")]
    Ceq = 0xFE01,
    /// Compare greater
    #[strum(serialize = "cgt")]
    Cgt = 0xFE02,
    /// Compare greater, unsigned
    #[strum(serialize = "cgt.un")]
    CgtUn = 0xFE03,
    /// Compare less
    #[strum(serialize = "clt")]
    Clt = 0xFE04,
    /// Compare less, unsigned
    #[strum(serialize = "clt.un")]
    CltUn = 0xFE05,
    /// Push method pointer
    #[strum(serialize = "ldftn")]
    Ldftn = 0xFE06,
    /// Load argument, long index
    #[strum(serialize = "ldarg")]
    Ldarg = 0xFE09,
    /// Load argument address, long index
    #[strum(serialize = "ldarga")]
    Ldarga = 0xFE0A,
    /// Store argument, long index
    #[strum(serialize = "starg")]
    Starg = 0xFE0B,
    /// Load local, long index
    #[strum(serialize = "ldloc")]
    Ldloc = 0xFE0C,
    /// Load local address, long index
    #[strum(serialize = "ldloca")]
    Ldloca = 0xFE0D,
    /// Store local, long index
    #[strum(serialize = "stloc")]
    Stloc = 0xFE0E,
}

impl Opcode {
    /// The ECMA-335 encoding; prefixed instructions carry `0xFE` in the high byte.
    #[must_use]
    pub const fn value(self) -> u16 {
        self as u16
    }

    /// `true` for every instruction whose operand is a branch target.
    #[must_use]
    pub const fn is_branch(self) -> bool {
        let v = self.value();
        v >= Opcode::BrS.value() && v <= Opcode::BltUn.value()
    }

    /// `true` for branches that consume a condition, which excludes `br`/`br.s`.
    #[must_use]
    pub const fn is_conditional_branch(self) -> bool {
        self.is_branch() && !matches!(self, Opcode::Br | Opcode::BrS)
    }

    /// The long-distance form of a short branch, `None` for everything else.
    #[must_use]
    pub const fn long_form(self) -> Option<Opcode> {
        match self {
            Opcode::BrS => Some(Opcode::Br),
            Opcode::BrfalseS => Some(Opcode::Brfalse),
            Opcode::BrtrueS => Some(Opcode::Brtrue),
            Opcode::BeqS => Some(Opcode::Beq),
            Opcode::BgeS => Some(Opcode::Bge),
            Opcode::BgtS => Some(Opcode::Bgt),
            Opcode::BleS => Some(Opcode::Ble),
            Opcode::BltS => Some(Opcode::Blt),
            Opcode::BneUnS => Some(Opcode::BneUn),
            Opcode::BgeUnS => Some(Opcode::BgeUn),
            Opcode::BgtUnS => Some(Opcode::BgtUn),
            Opcode::BleUnS => Some(Opcode::BleUn),
            Opcode::BltUnS => Some(Opcode::BltUn),
            _ => None,
        }
    }

    /// `true` for every int32 constant loader, compact or with operand.
    #[must_use]
    pub const fn is_ldc_i4(self) -> bool {
        let v = self.value();
        v >= Opcode::LdcI4M1.value() && v <= Opcode::LdcI4.value()
    }

    /// The constant embedded in a compact `ldc.i4.*` form.
    #[must_use]
    pub const fn ldc_i4_embedded(self) -> Option<i32> {
        match self {
            Opcode::LdcI4M1 => Some(-1),
            Opcode::LdcI40 => Some(0),
            Opcode::LdcI41 => Some(1),
            Opcode::LdcI42 => Some(2),
            Opcode::LdcI43 => Some(3),
            Opcode::LdcI44 => Some(4),
            Opcode::LdcI45 => Some(5),
            Opcode::LdcI46 => Some(6),
            Opcode::LdcI47 => Some(7),
            Opcode::LdcI48 => Some(8),
            _ => None,
        }
    }

    /// The argument index embedded in a compact `ldarg.*` form.
    #[must_use]
    pub const fn ldarg_embedded(self) -> Option<u16> {
        match self {
            Opcode::Ldarg0 => Some(0),
            Opcode::Ldarg1 => Some(1),
            Opcode::Ldarg2 => Some(2),
            Opcode::Ldarg3 => Some(3),
            _ => None,
        }
    }

    /// The local index embedded in a compact `ldloc.*` form.
    #[must_use]
    pub const fn ldloc_embedded(self) -> Option<u16> {
        match self {
            Opcode::Ldloc0 => Some(0),
            Opcode::Ldloc1 => Some(1),
            Opcode::Ldloc2 => Some(2),
            Opcode::Ldloc3 => Some(3),
            _ => None,
        }
    }

    /// The local index embedded in a compact `stloc.*` form.
    #[must_use]
    pub const fn stloc_embedded(self) -> Option<u16> {
        match self {
            Opcode::Stloc0 => Some(0),
            Opcode::Stloc1 => Some(1),
            Opcode::Stloc2 => Some(2),
            Opcode::Stloc3 => Some(3),
            _ => None,
        }
    }

    /// `true` for every local-load form.
    #[must_use]
    pub const fn is_ldloc(self) -> bool {
        matches!(
            self,
            Opcode::Ldloc0
                | Opcode::Ldloc1
                | Opcode::Ldloc2
                | Opcode::Ldloc3
                | Opcode::LdlocS
                | Opcode::Ldloc
        )
    }

    /// `true` for every local-store form.
    #[must_use]
    pub const fn is_stloc(self) -> bool {
        matches!(
            self,
            Opcode::Stloc0
                | Opcode::Stloc1
                | Opcode::Stloc2
                | Opcode::Stloc3
                | Opcode::StlocS
                | Opcode::Stloc
        )
    }

    /// `true` for every argument-load form, addresses excluded.
    #[must_use]
    pub const fn is_ldarg(self) -> bool {
        matches!(
            self,
            Opcode::Ldarg0
                | Opcode::Ldarg1
                | Opcode::Ldarg2
                | Opcode::Ldarg3
                | Opcode::LdargS
                | Opcode::Ldarg
        )
    }
}
