//! Structural matching over instructions and bodies.
//!
//! Patches locate their edit sites by shape, never by offset: a sliding window of
//! predicates is walked over the body until every position matches. The predicate
//! helpers here abstract over encoding variants, so `is_const_i4(3)` matches
//! `ldc.i4.3`, `ldc.i4.s 3` and `ldc.i4 3` alike.

use crate::assembly::body::MethodBody;
use crate::assembly::instruction::{Instruction, Operand};
use crate::assembly::opcode::Opcode;
use crate::Result;

/// One predicate position in a scan window.
pub type InstructionPredicate<'a> = &'a dyn Fn(&Instruction) -> bool;

impl Instruction {
    /// `true` when this instruction carries exactly the given opcode.
    #[must_use]
    pub fn is(&self, opcode: Opcode) -> bool {
        self.opcode == opcode
    }

    /// The int32 constant this instruction loads, across all encoding forms.
    #[must_use]
    pub fn ldc_i4_value(&self) -> Option<i32> {
        if let Some(embedded) = self.opcode.ldc_i4_embedded() {
            return Some(embedded);
        }
        match (self.opcode, &self.operand) {
            (Opcode::LdcI4S | Opcode::LdcI4, Operand::Int32(value)) => Some(*value),
            _ => None,
        }
    }

    /// `true` when this instruction loads exactly the given int32 constant.
    #[must_use]
    pub fn is_const_i4(&self, value: i32) -> bool {
        self.ldc_i4_value() == Some(value)
    }

    /// `true` when this instruction loads exactly the given int64 constant.
    #[must_use]
    pub fn is_const_i8(&self, value: i64) -> bool {
        matches!(&self.operand, Operand::Int64(v) if self.opcode == Opcode::LdcI8 && *v == value)
    }

    /// `true` when this instruction loads exactly the given float32 constant.
    #[must_use]
    pub fn is_const_r4(&self, value: f32) -> bool {
        matches!(&self.operand, Operand::Float32(v) if self.opcode == Opcode::LdcR4 && *v == value)
    }

    /// `true` when this instruction loads exactly the given float64 constant.
    #[must_use]
    pub fn is_const_r8(&self, value: f64) -> bool {
        matches!(&self.operand, Operand::Float64(v) if self.opcode == Opcode::LdcR8 && *v == value)
    }

    /// `true` when this instruction loads exactly the given string literal.
    #[must_use]
    pub fn is_const_str(&self, value: &str) -> bool {
        matches!(&self.operand, Operand::String(v) if self.opcode == Opcode::Ldstr && v == value)
    }

    /// `true` for any constant loader: int, float or string.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.opcode.is_ldc_i4()
            || matches!(
                self.opcode,
                Opcode::LdcI8 | Opcode::LdcR4 | Opcode::LdcR8 | Opcode::Ldstr
            )
    }

    /// `true` for every local-load form.
    #[must_use]
    pub fn is_ldloc(&self) -> bool {
        self.opcode.is_ldloc()
    }

    /// `true` for every local-store form.
    #[must_use]
    pub fn is_stloc(&self) -> bool {
        self.opcode.is_stloc()
    }
}

/// First position at or after `start` where the predicate window matches consecutive
/// instructions.
///
/// An empty window matches immediately at `start`.
#[must_use]
pub fn find_window_from(
    body: &MethodBody,
    start: usize,
    predicates: &[InstructionPredicate],
) -> Option<usize> {
    if predicates.is_empty() {
        return (start <= body.len()).then_some(start);
    }
    if body.len() < predicates.len() {
        return None;
    }
    for at in start..=(body.len() - predicates.len()) {
        let hit = predicates
            .iter()
            .enumerate()
            .all(|(offset, predicate)| predicate(&read_lock!(body.instructions[at + offset])));
        if hit {
            return Some(at);
        }
    }
    None
}

/// First position where the predicate window matches consecutive instructions.
#[must_use]
pub fn find_window(body: &MethodBody, predicates: &[InstructionPredicate]) -> Option<usize> {
    find_window_from(body, 0, predicates)
}

/// Like [`find_window`], but a miss is a pattern failure described by `expectation`.
pub fn expect_window(
    body: &MethodBody,
    predicates: &[InstructionPredicate],
    expectation: &str,
) -> Result<usize> {
    find_window(body, predicates).ok_or_else(|| {
        pattern_error!(
            "{} (scanned {} instructions)",
            expectation,
            body.len()
        )
    })
}
