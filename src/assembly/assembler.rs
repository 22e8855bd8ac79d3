//! Fluent assembly of method bodies.
//!
//! [`BodyAssembler`] builds a [`MethodBody`] instruction by instruction. Branches are
//! written against named labels and resolved to instruction identities when the body is
//! finished, so forward references read naturally:
//!
//! ```rust
//! use cilpatch::assembly::assembler::BodyAssembler;
//! use cilpatch::assembly::opcode::Opcode;
//! use cilpatch::metadata::typesystem::CorTypes;
//!
//! let cor = CorTypes::new();
//! let mut asm = BodyAssembler::new();
//! let total = asm.local("total", &cor.i4);
//! asm.ldc_i4(0)
//!     .stloc(&total)
//!     .label("again")
//!     .ldloc(&total)
//!     .ldc_i4(1)
//!     .op(Opcode::Add)
//!     .stloc(&total)
//!     .ldloc(&total)
//!     .ldc_i4(10)
//!     .branch_to(Opcode::Blt, "again")
//!     .ldloc(&total)
//!     .ret();
//! let body = asm.finish().unwrap();
//! assert_eq!(body.locals.len(), 1);
//! ```

use std::collections::HashMap;

use crate::assembly::body::{Local, LocalRc, MethodBody};
use crate::assembly::instruction::{Instruction, InstructionRc, InstructionRef, Operand};
use crate::assembly::opcode::Opcode;
use crate::metadata::field::FieldRc;
use crate::metadata::method::MethodRc;
use crate::metadata::typesystem::CilTypeRc;
use crate::Result;

/// Incrementally builds a [`MethodBody`].
#[derive(Default)]
pub struct BodyAssembler {
    instructions: Vec<InstructionRc>,
    locals: Vec<LocalRc>,
    /// Label name to position of the next emitted instruction
    labels: HashMap<String, usize>,
    /// Emitted branches waiting for their label: instruction position, label name
    pending: Vec<(usize, String)>,
    problems: Vec<String>,
    max_stack: u16,
}

impl BodyAssembler {
    /// Start an empty body.
    #[must_use]
    pub fn new() -> BodyAssembler {
        BodyAssembler {
            max_stack: 8,
            ..BodyAssembler::default()
        }
    }

    /// Declare a local slot and keep its handle for loads and stores.
    pub fn local(&mut self, name: &str, ty: &CilTypeRc) -> LocalRc {
        let local = Local::new(name, ty);
        self.locals.push(local.clone());
        local
    }

    /// Declare the operand stack depth to record on the body.
    pub fn max_stack(&mut self, depth: u16) -> &mut Self {
        self.max_stack = depth;
        self
    }

    /// Name the position of the next emitted instruction.
    pub fn label(&mut self, name: &str) -> &mut Self {
        if self
            .labels
            .insert(name.to_string(), self.instructions.len())
            .is_some()
        {
            self.problems.push(format!("label '{name}' defined twice"));
        }
        self
    }

    /// Emit a branch of the given kind to a label, forward or backward.
    pub fn branch_to(&mut self, opcode: Opcode, label: &str) -> &mut Self {
        assert!(opcode.is_branch(), "{opcode} is not a branch");
        self.pending
            .push((self.instructions.len(), label.to_string()));
        self.emit(Instruction::new(opcode))
    }

    /// Emit a prebuilt instruction.
    pub fn emit(&mut self, instruction: InstructionRc) -> &mut Self {
        self.instructions.push(instruction);
        self
    }

    /// Emit an operand-less instruction such as `add`, `ceq` or `dup`.
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.emit(Instruction::new(opcode))
    }

    /// Emit `nop`.
    pub fn nop(&mut self) -> &mut Self {
        self.emit(Instruction::nop())
    }

    /// Emit `ret`.
    pub fn ret(&mut self) -> &mut Self {
        self.emit(Instruction::ret())
    }

    /// Emit the most compact int32 constant load.
    pub fn ldc_i4(&mut self, value: i32) -> &mut Self {
        self.emit(Instruction::ldc_i4(value))
    }

    /// Emit an int64 constant load.
    pub fn ldc_i8(&mut self, value: i64) -> &mut Self {
        self.emit(Instruction::ldc_i8(value))
    }

    /// Emit a float32 constant load.
    pub fn ldc_r4(&mut self, value: f32) -> &mut Self {
        self.emit(Instruction::ldc_r4(value))
    }

    /// Emit a float64 constant load.
    pub fn ldc_r8(&mut self, value: f64) -> &mut Self {
        self.emit(Instruction::ldc_r8(value))
    }

    /// Emit a string literal load.
    pub fn ldstr(&mut self, value: &str) -> &mut Self {
        self.emit(Instruction::ldstr(value))
    }

    /// Emit a null reference load.
    pub fn ldnull(&mut self) -> &mut Self {
        self.emit(Instruction::ldnull())
    }

    /// Emit the most compact argument load.
    pub fn ldarg(&mut self, index: u16) -> &mut Self {
        self.emit(Instruction::ldarg(index))
    }

    /// Emit an argument address load.
    pub fn ldarga(&mut self, index: u16) -> &mut Self {
        self.emit(Instruction::ldarga(index))
    }

    /// Emit an argument store.
    pub fn starg(&mut self, index: u16) -> &mut Self {
        self.emit(Instruction::starg(index))
    }

    /// Emit a local load.
    pub fn ldloc(&mut self, local: &LocalRc) -> &mut Self {
        self.emit(Instruction::ldloc(local))
    }

    /// Emit a local address load.
    pub fn ldloca(&mut self, local: &LocalRc) -> &mut Self {
        self.emit(Instruction::ldloca(local))
    }

    /// Emit a local store.
    pub fn stloc(&mut self, local: &LocalRc) -> &mut Self {
        self.emit(Instruction::stloc(local))
    }

    /// Emit a method call.
    pub fn call(&mut self, method: &MethodRc) -> &mut Self {
        self.emit(Instruction::call(method))
    }

    /// Emit a virtual method call.
    pub fn callvirt(&mut self, method: &MethodRc) -> &mut Self {
        self.emit(Instruction::callvirt(method))
    }

    /// Emit an object allocation through a constructor.
    pub fn newobj(&mut self, constructor: &MethodRc) -> &mut Self {
        self.emit(Instruction::newobj(constructor))
    }

    /// Emit a method pointer load.
    pub fn ldftn(&mut self, method: &MethodRc) -> &mut Self {
        self.emit(Instruction::ldftn(method))
    }

    /// Emit an instance field load.
    pub fn ldfld(&mut self, field: &FieldRc) -> &mut Self {
        self.emit(Instruction::ldfld(field))
    }

    /// Emit an instance field store.
    pub fn stfld(&mut self, field: &FieldRc) -> &mut Self {
        self.emit(Instruction::stfld(field))
    }

    /// Emit a static field load.
    pub fn ldsfld(&mut self, field: &FieldRc) -> &mut Self {
        self.emit(Instruction::ldsfld(field))
    }

    /// Emit a static field store.
    pub fn stsfld(&mut self, field: &FieldRc) -> &mut Self {
        self.emit(Instruction::stsfld(field))
    }

    /// Emit a box of the given value type.
    pub fn box_value(&mut self, ty: &CilTypeRc) -> &mut Self {
        self.emit(Instruction::box_value(ty))
    }

    /// Emit an unbox to the given type.
    pub fn unbox_any(&mut self, ty: &CilTypeRc) -> &mut Self {
        self.emit(Instruction::unbox_any(ty))
    }

    /// Emit a typed load through a pointer.
    pub fn ldobj(&mut self, ty: &CilTypeRc) -> &mut Self {
        self.emit(Instruction::ldobj(ty))
    }

    /// Emit a typed store through a pointer.
    pub fn stobj(&mut self, ty: &CilTypeRc) -> &mut Self {
        self.emit(Instruction::stobj(ty))
    }

    /// Resolve labels and hand back the finished body.
    ///
    /// Fails when a branch names an undefined label, a label points past the last
    /// instruction, or a label was defined twice.
    pub fn finish(self) -> Result<MethodBody> {
        if let Some(problem) = self.problems.into_iter().next() {
            return Err(crate::Error::Error(problem));
        }
        for (at, label) in &self.pending {
            let position = self
                .labels
                .get(label)
                .ok_or_else(|| crate::Error::Error(format!("undefined label '{label}'")))?;
            let target = self.instructions.get(*position).ok_or_else(|| {
                crate::Error::Error(format!("label '{label}' points past the last instruction"))
            })?;
            write_lock!(self.instructions[*at]).operand =
                Operand::Target(InstructionRef::new(target));
        }
        let mut body = MethodBody::new();
        body.instructions = self.instructions;
        body.locals = self.locals;
        body.max_stack = self.max_stack;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_backward_branches_resolve() {
        let mut asm = BodyAssembler::new();
        asm.label("top")
            .ldc_i4(1)
            .branch_to(Opcode::Brtrue, "exit")
            .branch_to(Opcode::Br, "top")
            .label("exit")
            .ret();
        let body = asm.finish().unwrap();

        // brtrue -> ret (position 3), br -> ldc (position 0)
        let brtrue = &body.instructions[1];
        match &read_lock!(brtrue).operand {
            Operand::Target(t) => assert_eq!(body.resolve_target(t), Some(3)),
            other => panic!("expected target, got {other:?}"),
        }
        let back = &body.instructions[2];
        match &read_lock!(back).operand {
            Operand::Target(t) => assert_eq!(body.resolve_target(t), Some(0)),
            other => panic!("expected target, got {other:?}"),
        };
    }

    #[test]
    fn undefined_label_fails() {
        let mut asm = BodyAssembler::new();
        asm.branch_to(Opcode::Br, "nowhere").ret();
        assert!(asm.finish().is_err());
    }

    #[test]
    fn trailing_label_fails() {
        let mut asm = BodyAssembler::new();
        asm.branch_to(Opcode::Br, "end").ret().label("end");
        let err = asm.finish().unwrap_err();
        assert!(err.to_string().contains("past the last instruction"));
    }

    #[test]
    fn duplicate_label_fails() {
        let mut asm = BodyAssembler::new();
        asm.label("here").nop().label("here").ret();
        assert!(asm.finish().is_err());
    }

    #[test]
    fn locals_carry_into_the_body() {
        let cor = crate::metadata::typesystem::CorTypes::new();
        let mut asm = BodyAssembler::new();
        let a = asm.local("a", &cor.i4);
        let b = asm.local("b", &cor.r8);
        asm.ldc_i4(1).stloc(&a).ldc_r8(2.0).stloc(&b).ret();
        let body = asm.finish().unwrap();

        assert_eq!(body.local_index(&a), Some(0));
        assert_eq!(body.local_index(&b), Some(1));
        assert_eq!(body.len(), 5);
    }
}
