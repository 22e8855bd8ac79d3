//! In-place editing primitives over method bodies.
//!
//! All primitives work positionally on the instruction list while branch operands keep
//! their identity references, so splicing never touches offsets. The one discipline
//! callers must keep: before removing an instruction that is someone's branch target,
//! repoint every referencing operand with [`repoint_branches`], or the references go
//! dead.
//!
//! [`normalize_branches`] is the whole branch normalization pass: with identity-based
//! targets, nothing ever needs re-encoding except widening short-distance forms that an
//! insertion may have pushed out of range.

use tracing::trace;

use crate::assembly::body::MethodBody;
use crate::assembly::instruction::{InstructionRc, InstructionRef, Operand};

/// Insert one instruction at `index`.
///
/// # Panics
///
/// Panics when `index > body.len()`.
pub fn insert_at(body: &mut MethodBody, index: usize, instruction: InstructionRc) {
    body.instructions.insert(index, instruction);
}

/// Splice a sequence in at `index`, preserving its order.
///
/// # Panics
///
/// Panics when `index > body.len()`.
pub fn insert_all_at(body: &mut MethodBody, index: usize, instructions: Vec<InstructionRc>) {
    body.instructions.splice(index..index, instructions);
}

/// Remove and return the instruction at `index`.
///
/// Branches pointing at the removed instruction must have been repointed first; leftover
/// references turn dead and show up in [`MethodBody::resolve_target`] as `None`.
///
/// # Panics
///
/// Panics when `index >= body.len()`.
pub fn remove_at(body: &mut MethodBody, index: usize) -> InstructionRc {
    body.instructions.remove(index)
}

/// Swap the instruction at `index` for `replacement`, returning the old one.
///
/// Same discipline as [`remove_at`]: inbound branches follow the old identity, not the
/// position. To keep them, rewrite the instruction in place instead.
///
/// # Panics
///
/// Panics when `index >= body.len()`.
pub fn replace_at(
    body: &mut MethodBody,
    index: usize,
    replacement: InstructionRc,
) -> InstructionRc {
    std::mem::replace(&mut body.instructions[index], replacement)
}

/// Number of branch and switch operands in `body` referencing `target`.
#[must_use]
pub fn branch_reference_count(body: &MethodBody, target: &InstructionRc) -> usize {
    let mut count = 0;
    for instruction in &body.instructions {
        match &read_lock!(instruction).operand {
            Operand::Target(r) if r.points_to(target) => count += 1,
            Operand::Switch(targets) => {
                count += targets.iter().filter(|r| r.points_to(target)).count();
            }
            _ => {}
        }
    }
    count
}

/// Repoint every branch and switch operand referencing `from` onto `to`.
///
/// Returns the number of operand entries rewritten. Covering every referencing operand in
/// one sweep is what makes removal safe.
pub fn repoint_branches(body: &mut MethodBody, from: &InstructionRc, to: &InstructionRc) -> usize {
    let mut rewritten = 0;
    for instruction in &body.instructions {
        let mut guard = write_lock!(instruction);
        match &mut guard.operand {
            Operand::Target(r) if r.points_to(from) => {
                *r = InstructionRef::new(to);
                rewritten += 1;
            }
            Operand::Switch(targets) => {
                for r in targets.iter_mut() {
                    if r.points_to(from) {
                        *r = InstructionRef::new(to);
                        rewritten += 1;
                    }
                }
            }
            _ => {}
        }
    }
    if rewritten > 0 {
        trace!(rewritten, "repointed branch references");
    }
    rewritten
}

/// Widen every short-distance branch to its long form.
///
/// Operands are untouched; identity targets survive the opcode swap. Returns the number
/// of instructions widened.
pub fn normalize_branches(body: &mut MethodBody) -> usize {
    let mut widened = 0;
    for instruction in &body.instructions {
        let short = read_lock!(instruction).opcode;
        if let Some(long) = short.long_form() {
            write_lock!(instruction).opcode = long;
            widened += 1;
        }
    }
    if widened > 0 {
        trace!(widened, "widened short branches");
    }
    widened
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::instruction::Instruction;
    use crate::assembly::opcode::Opcode;
    use std::sync::Arc;

    fn body_of(instructions: Vec<InstructionRc>) -> MethodBody {
        let mut body = MethodBody::new();
        for instruction in instructions {
            body.push(instruction);
        }
        body
    }

    #[test]
    fn insertion_does_not_disturb_targets() {
        let original_first = Instruction::ldc_i4(1);
        let jump = Instruction::br(&original_first);
        let mut body = body_of(vec![original_first.clone(), jump.clone(), Instruction::ret()]);

        // splice a prologue in front, the way prefix injection does
        insert_all_at(&mut body, 0, vec![Instruction::nop(), Instruction::nop()]);

        assert_eq!(body.index_of(&original_first), Some(2));
        match &read_lock!(jump).operand {
            Operand::Target(r) => assert!(r.points_to(&original_first)),
            other => panic!("expected target, got {other:?}"),
        };
    }

    #[test]
    fn repoint_covers_switch_operands() {
        let old = Instruction::nop();
        let new = Instruction::nop();
        let jump = Instruction::brtrue(&old);
        let table = Instruction::with_operand(
            Opcode::Switch,
            Operand::Switch(vec![InstructionRef::new(&old), InstructionRef::new(&old)]),
        );
        let mut body = body_of(vec![old.clone(), new.clone(), jump, table, Instruction::ret()]);

        assert_eq!(branch_reference_count(&body, &old), 3);
        let rewritten = repoint_branches(&mut body, &old, &new);
        assert_eq!(rewritten, 3);
        assert_eq!(branch_reference_count(&body, &old), 0);
        assert_eq!(branch_reference_count(&body, &new), 3);
    }

    #[test]
    fn removal_after_repoint_leaves_no_dead_references() {
        let old = Instruction::nop();
        let new = Instruction::nop();
        let jump = Instruction::br(&old);
        let mut body = body_of(vec![old.clone(), new, jump.clone(), Instruction::ret()]);

        let new = body.instructions[1].clone();
        repoint_branches(&mut body, &old, &new);
        let removed = remove_at(&mut body, 0);
        drop(removed);

        match &read_lock!(jump).operand {
            Operand::Target(r) => {
                assert!(r.is_valid());
                assert!(body.resolve_target(r).is_some());
            }
            other => panic!("expected target, got {other:?}"),
        };
    }

    #[test]
    fn removal_without_repoint_is_detectable() {
        let old = Instruction::nop();
        let jump = Instruction::br(&old);
        let mut body = body_of(vec![old, jump.clone(), Instruction::ret()]);

        let removed = remove_at(&mut body, 0);
        drop(removed);

        match &read_lock!(jump).operand {
            Operand::Target(r) => {
                assert!(!r.is_valid());
                assert_eq!(body.resolve_target(r), None);
            }
            other => panic!("expected target, got {other:?}"),
        };
    }

    #[test]
    fn normalization_widens_shorts_only() {
        let target = Instruction::ret();
        let short = Instruction::branch(Opcode::BrtrueS, &target);
        let long = Instruction::br(&target);
        let mut body = body_of(vec![short.clone(), long.clone(), target.clone()]);

        assert_eq!(normalize_branches(&mut body), 1);
        assert_eq!(read_lock!(short).opcode, Opcode::Brtrue);
        assert_eq!(read_lock!(long).opcode, Opcode::Br);
        match &read_lock!(short).operand {
            Operand::Target(r) => assert!(r.points_to(&target)),
            other => panic!("expected target, got {other:?}"),
        }

        // second pass is a no-op
        assert_eq!(normalize_branches(&mut body), 0);
    }

    #[test]
    fn replace_returns_old_instruction() {
        let a = Instruction::nop();
        let b = Instruction::ret();
        let mut body = body_of(vec![a.clone()]);
        let old = replace_at(&mut body, 0, b.clone());
        assert!(Arc::ptr_eq(&old, &a));
        assert!(Arc::ptr_eq(&body.instructions[0], &b));
    }
}
