//! Instructions as shared, mutable graph nodes.
//!
//! Every instruction in a body is an [`InstructionRc`]; branch operands hold the weak
//! [`InstructionRef`] handle to the instruction they jump to, never a numeric offset.
//! That identity discipline is what lets the engine splice code into a body without any
//! offset fixups: moving an instruction moves every branch pointing at it, and rewriting
//! an instruction in place (the `ret` rewrite during postfix injection) keeps inbound
//! branches attached.
//!
//! Constructors pick compact encodings where CIL has them: `ldc_i4(3)` yields `ldc.i4.3`,
//! `ldarg(0)` yields `ldarg.0`. Local variable access always uses the short form carrying
//! the [`LocalRc`] identity, matching what the injection synthesizer emits.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use crate::assembly::body::LocalRc;
use crate::assembly::opcode::Opcode;
use crate::metadata::field::FieldRc;
use crate::metadata::method::MethodRc;
use crate::metadata::typesystem::CilTypeRc;

/// Reference-counted handle to a shared, mutable [`Instruction`].
pub type InstructionRc = Arc<RwLock<Instruction>>;

/// A weak reference to an [`Instruction`].
///
/// Branch and switch operands use this handle so a body owns its instructions exactly
/// once; a target that has been removed without repointing shows up as a dead reference
/// instead of keeping the removed instruction alive.
#[derive(Clone)]
pub struct InstructionRef {
    weak_ref: Weak<RwLock<Instruction>>,
}

impl InstructionRef {
    /// Create a weak handle from a strong reference.
    #[must_use]
    pub fn new(strong_ref: &InstructionRc) -> Self {
        InstructionRef {
            weak_ref: Arc::downgrade(strong_ref),
        }
    }

    /// Attempt to upgrade to a strong reference.
    #[must_use]
    pub fn upgrade(&self) -> Option<InstructionRc> {
        self.weak_ref.upgrade()
    }

    /// `true` while the referenced instruction is still alive.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.weak_ref.strong_count() > 0
    }

    /// `true` when this handle points at exactly the given instruction instance.
    #[must_use]
    pub fn points_to(&self, instruction: &InstructionRc) -> bool {
        self.weak_ref.as_ptr() == Arc::as_ptr(instruction)
    }
}

impl fmt::Debug for InstructionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(target) => write!(f, "InstructionRef({})", read_lock!(target).opcode),
            None => write!(f, "InstructionRef(<dead>)"),
        }
    }
}

/// The operand an instruction carries.
pub enum Operand {
    /// No operand
    None,
    /// Inline int32
    Int32(i32),
    /// Inline int64
    Int64(i64),
    /// Inline float32
    Float32(f32),
    /// Inline float64
    Float64(f64),
    /// Inline string literal
    String(String),
    /// Argument slot index
    Argument(u16),
    /// Local variable identity
    Local(LocalRc),
    /// Field reference
    Field(FieldRc),
    /// Method reference
    Method(MethodRc),
    /// Type reference
    Type(CilTypeRc),
    /// Branch target identity
    Target(InstructionRef),
    /// Jump table target identities
    Switch(Vec<InstructionRef>),
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => write!(f, "None"),
            Operand::Int32(v) => write!(f, "Int32({v})"),
            Operand::Int64(v) => write!(f, "Int64({v})"),
            Operand::Float32(v) => write!(f, "Float32({v})"),
            Operand::Float64(v) => write!(f, "Float64({v})"),
            Operand::String(v) => write!(f, "String({v:?})"),
            Operand::Argument(v) => write!(f, "Argument({v})"),
            Operand::Local(local) => write!(f, "Local({})", local.display_name()),
            Operand::Field(field) => write!(f, "Field({})", field.full_name()),
            Operand::Method(method) => write!(f, "Method({})", method.full_name()),
            Operand::Type(ty) => write!(f, "Type({})", ty.full_name()),
            Operand::Target(target) => write!(f, "Target({target:?})"),
            Operand::Switch(targets) => write!(f, "Switch({} targets)", targets.len()),
        }
    }
}

/// One CIL instruction: opcode plus operand, shared behind [`InstructionRc`].
#[derive(Debug)]
pub struct Instruction {
    /// The operation
    pub opcode: Opcode,
    /// The operand, [`Operand::None`] for operand-less instructions
    pub operand: Operand,
}

impl Instruction {
    /// An operand-less instruction.
    #[must_use]
    pub fn new(opcode: Opcode) -> InstructionRc {
        Instruction::with_operand(opcode, Operand::None)
    }

    /// An instruction with an explicit operand.
    #[must_use]
    pub fn with_operand(opcode: Opcode, operand: Operand) -> InstructionRc {
        Arc::new(RwLock::new(Instruction { opcode, operand }))
    }

    /// Rewrite this instruction in place, preserving its identity.
    ///
    /// Inbound branch references keep pointing here, which is exactly what the `ret`
    /// rewrite during postfix injection relies on.
    pub fn rewrite(&mut self, opcode: Opcode, operand: Operand) {
        self.opcode = opcode;
        self.operand = operand;
    }

    /// Load an int32 constant, using the most compact form.
    #[must_use]
    pub fn ldc_i4(value: i32) -> InstructionRc {
        match value {
            -1 => Instruction::new(Opcode::LdcI4M1),
            0 => Instruction::new(Opcode::LdcI40),
            1 => Instruction::new(Opcode::LdcI41),
            2 => Instruction::new(Opcode::LdcI42),
            3 => Instruction::new(Opcode::LdcI43),
            4 => Instruction::new(Opcode::LdcI44),
            5 => Instruction::new(Opcode::LdcI45),
            6 => Instruction::new(Opcode::LdcI46),
            7 => Instruction::new(Opcode::LdcI47),
            8 => Instruction::new(Opcode::LdcI48),
            -128..=127 => Instruction::with_operand(Opcode::LdcI4S, Operand::Int32(value)),
            _ => Instruction::with_operand(Opcode::LdcI4, Operand::Int32(value)),
        }
    }

    /// Load an int64 constant.
    #[must_use]
    pub fn ldc_i8(value: i64) -> InstructionRc {
        Instruction::with_operand(Opcode::LdcI8, Operand::Int64(value))
    }

    /// Load a float32 constant.
    #[must_use]
    pub fn ldc_r4(value: f32) -> InstructionRc {
        Instruction::with_operand(Opcode::LdcR4, Operand::Float32(value))
    }

    /// Load a float64 constant.
    #[must_use]
    pub fn ldc_r8(value: f64) -> InstructionRc {
        Instruction::with_operand(Opcode::LdcR8, Operand::Float64(value))
    }

    /// Load a string literal.
    #[must_use]
    pub fn ldstr(value: &str) -> InstructionRc {
        Instruction::with_operand(Opcode::Ldstr, Operand::String(value.to_string()))
    }

    /// Load the null reference.
    #[must_use]
    pub fn ldnull() -> InstructionRc {
        Instruction::new(Opcode::Ldnull)
    }

    /// Load an argument slot, using the most compact form.
    #[must_use]
    pub fn ldarg(index: u16) -> InstructionRc {
        match index {
            0 => Instruction::new(Opcode::Ldarg0),
            1 => Instruction::new(Opcode::Ldarg1),
            2 => Instruction::new(Opcode::Ldarg2),
            3 => Instruction::new(Opcode::Ldarg3),
            4..=255 => Instruction::with_operand(Opcode::LdargS, Operand::Argument(index)),
            _ => Instruction::with_operand(Opcode::Ldarg, Operand::Argument(index)),
        }
    }

    /// Load an argument slot's address.
    #[must_use]
    pub fn ldarga(index: u16) -> InstructionRc {
        if index <= 255 {
            Instruction::with_operand(Opcode::LdargaS, Operand::Argument(index))
        } else {
            Instruction::with_operand(Opcode::Ldarga, Operand::Argument(index))
        }
    }

    /// Store into an argument slot.
    #[must_use]
    pub fn starg(index: u16) -> InstructionRc {
        if index <= 255 {
            Instruction::with_operand(Opcode::StargS, Operand::Argument(index))
        } else {
            Instruction::with_operand(Opcode::Starg, Operand::Argument(index))
        }
    }

    /// Load a local variable.
    #[must_use]
    pub fn ldloc(local: &LocalRc) -> InstructionRc {
        Instruction::with_operand(Opcode::LdlocS, Operand::Local(local.clone()))
    }

    /// Load a local variable's address.
    #[must_use]
    pub fn ldloca(local: &LocalRc) -> InstructionRc {
        Instruction::with_operand(Opcode::LdlocaS, Operand::Local(local.clone()))
    }

    /// Store into a local variable.
    #[must_use]
    pub fn stloc(local: &LocalRc) -> InstructionRc {
        Instruction::with_operand(Opcode::StlocS, Operand::Local(local.clone()))
    }

    /// Call a method.
    #[must_use]
    pub fn call(method: &MethodRc) -> InstructionRc {
        Instruction::with_operand(Opcode::Call, Operand::Method(method.clone()))
    }

    /// Call a method with virtual dispatch.
    #[must_use]
    pub fn callvirt(method: &MethodRc) -> InstructionRc {
        Instruction::with_operand(Opcode::Callvirt, Operand::Method(method.clone()))
    }

    /// Allocate an object and run its constructor.
    #[must_use]
    pub fn newobj(constructor: &MethodRc) -> InstructionRc {
        Instruction::with_operand(Opcode::Newobj, Operand::Method(constructor.clone()))
    }

    /// Push a method pointer.
    #[must_use]
    pub fn ldftn(method: &MethodRc) -> InstructionRc {
        Instruction::with_operand(Opcode::Ldftn, Operand::Method(method.clone()))
    }

    /// Load an instance field.
    #[must_use]
    pub fn ldfld(field: &FieldRc) -> InstructionRc {
        Instruction::with_operand(Opcode::Ldfld, Operand::Field(field.clone()))
    }

    /// Load an instance field's address.
    #[must_use]
    pub fn ldflda(field: &FieldRc) -> InstructionRc {
        Instruction::with_operand(Opcode::Ldflda, Operand::Field(field.clone()))
    }

    /// Store into an instance field.
    #[must_use]
    pub fn stfld(field: &FieldRc) -> InstructionRc {
        Instruction::with_operand(Opcode::Stfld, Operand::Field(field.clone()))
    }

    /// Load a static field.
    #[must_use]
    pub fn ldsfld(field: &FieldRc) -> InstructionRc {
        Instruction::with_operand(Opcode::Ldsfld, Operand::Field(field.clone()))
    }

    /// Load a static field's address.
    #[must_use]
    pub fn ldsflda(field: &FieldRc) -> InstructionRc {
        Instruction::with_operand(Opcode::Ldsflda, Operand::Field(field.clone()))
    }

    /// Store into a static field.
    #[must_use]
    pub fn stsfld(field: &FieldRc) -> InstructionRc {
        Instruction::with_operand(Opcode::Stsfld, Operand::Field(field.clone()))
    }

    /// Box a value of the given type.
    #[must_use]
    pub fn box_value(ty: &CilTypeRc) -> InstructionRc {
        Instruction::with_operand(Opcode::Box, Operand::Type(ty.clone()))
    }

    /// Unbox to a value of the given type.
    #[must_use]
    pub fn unbox_any(ty: &CilTypeRc) -> InstructionRc {
        Instruction::with_operand(Opcode::UnboxAny, Operand::Type(ty.clone()))
    }

    /// Load a value of the given type through a pointer.
    #[must_use]
    pub fn ldobj(ty: &CilTypeRc) -> InstructionRc {
        Instruction::with_operand(Opcode::Ldobj, Operand::Type(ty.clone()))
    }

    /// Store a value of the given type through a pointer.
    #[must_use]
    pub fn stobj(ty: &CilTypeRc) -> InstructionRc {
        Instruction::with_operand(Opcode::Stobj, Operand::Type(ty.clone()))
    }

    /// A branch of the given kind to an existing instruction.
    ///
    /// # Panics
    ///
    /// Panics when `opcode` is not a branch; constructing a non-branch with a target
    /// operand is a programming error, not a patchable condition.
    #[must_use]
    pub fn branch(opcode: Opcode, target: &InstructionRc) -> InstructionRc {
        assert!(opcode.is_branch(), "{opcode} is not a branch");
        Instruction::with_operand(opcode, Operand::Target(InstructionRef::new(target)))
    }

    /// Unconditional branch to an existing instruction.
    #[must_use]
    pub fn br(target: &InstructionRc) -> InstructionRc {
        Instruction::branch(Opcode::Br, target)
    }

    /// Branch when the popped value is true/non-null/non-zero.
    #[must_use]
    pub fn brtrue(target: &InstructionRc) -> InstructionRc {
        Instruction::branch(Opcode::Brtrue, target)
    }

    /// Branch when the popped value is false/null/zero.
    #[must_use]
    pub fn brfalse(target: &InstructionRc) -> InstructionRc {
        Instruction::branch(Opcode::Brfalse, target)
    }

    /// Return from the current method.
    #[must_use]
    pub fn ret() -> InstructionRc {
        Instruction::new(Opcode::Ret)
    }

    /// No operation.
    #[must_use]
    pub fn nop() -> InstructionRc {
        Instruction::new(Opcode::Nop)
    }

    /// Duplicate the top of the stack.
    #[must_use]
    pub fn dup() -> InstructionRc {
        Instruction::new(Opcode::Dup)
    }

    /// Discard the top of the stack.
    #[must_use]
    pub fn pop() -> InstructionRc {
        Instruction::new(Opcode::Pop)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operand {
            Operand::None => write!(f, "{}", self.opcode),
            operand => write!(f, "{} {:?}", self.opcode, operand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ldc_i4_picks_compact_forms() {
        assert_eq!(read_lock!(Instruction::ldc_i4(-1)).opcode, Opcode::LdcI4M1);
        assert_eq!(read_lock!(Instruction::ldc_i4(0)).opcode, Opcode::LdcI40);
        assert_eq!(read_lock!(Instruction::ldc_i4(8)).opcode, Opcode::LdcI48);

        let short = Instruction::ldc_i4(9);
        assert_eq!(read_lock!(short).opcode, Opcode::LdcI4S);
        assert!(matches!(read_lock!(short).operand, Operand::Int32(9)));

        let long = Instruction::ldc_i4(1000);
        assert_eq!(read_lock!(long).opcode, Opcode::LdcI4);

        let negative = Instruction::ldc_i4(-100);
        assert_eq!(read_lock!(negative).opcode, Opcode::LdcI4S);
    }

    #[test]
    fn ldarg_picks_compact_forms() {
        assert_eq!(read_lock!(Instruction::ldarg(0)).opcode, Opcode::Ldarg0);
        assert_eq!(read_lock!(Instruction::ldarg(3)).opcode, Opcode::Ldarg3);
        assert_eq!(read_lock!(Instruction::ldarg(4)).opcode, Opcode::LdargS);
        assert_eq!(read_lock!(Instruction::ldarg(300)).opcode, Opcode::Ldarg);
        assert_eq!(read_lock!(Instruction::ldarga(0)).opcode, Opcode::LdargaS);
    }

    #[test]
    fn branch_keeps_identity_through_rewrite() {
        let target = Instruction::ret();
        let jump = Instruction::br(&target);

        // rewriting the target in place keeps the branch attached
        write_lock!(target).rewrite(Opcode::Nop, Operand::None);
        match &read_lock!(jump).operand {
            Operand::Target(r) => {
                assert!(r.points_to(&target));
                assert_eq!(read_lock!(r.upgrade().unwrap()).opcode, Opcode::Nop);
            }
            other => panic!("expected target operand, got {other:?}"),
        };
    }

    #[test]
    fn dead_target_is_detectable() {
        let target = Instruction::ret();
        let jump = Instruction::brtrue(&target);
        drop(target);
        match &read_lock!(jump).operand {
            Operand::Target(r) => {
                assert!(!r.is_valid());
                assert!(r.upgrade().is_none());
            }
            other => panic!("expected target operand, got {other:?}"),
        };
    }

    #[test]
    #[should_panic(expected = "not a branch")]
    fn branch_rejects_non_branch_opcodes() {
        let target = Instruction::ret();
        let _ = Instruction::branch(Opcode::Call, &target);
    }

    #[test]
    fn display_includes_operand() {
        let instr = Instruction::ldc_i4(42);
        assert_eq!(read_lock!(instr).to_string(), "ldc.i4.s Int32(42)");
        assert_eq!(read_lock!(Instruction::nop()).to_string(), "nop");
    }
}
