//! CIL instruction graphs and the primitives that edit them.
//!
//! This module carries everything between raw opcodes and whole method bodies: the
//! opcode set, instructions as shared identity-bearing nodes, bodies with their local
//! slots, positional editing primitives, structural scan predicates and a fluent body
//! assembler. Branch operands reference the instruction they target, never an offset;
//! every editing operation in this module preserves that discipline.
//!
//! # Key Types
//! - [`Opcode`] - The instruction set with encoding and branch classification
//! - [`Instruction`] / [`InstructionRc`] - One shared, mutable instruction node
//! - [`InstructionRef`] - Weak identity handle used by branch operands
//! - [`MethodBody`] / [`Local`] - Instruction list plus local variable slots
//! - [`BodyAssembler`] - Fluent emitter with label resolution
//!
//! # Main Functions
//! - [`editor::insert_all_at`] / [`editor::repoint_branches`] - Positional editing
//! - [`editor::normalize_branches`] - Widen short branches after insertion
//! - [`predicate::find_window`] / [`predicate::expect_window`] - Structural scans

pub mod assembler;
pub mod body;
pub mod editor;
pub mod instruction;
pub mod opcode;
pub mod predicate;

pub use assembler::BodyAssembler;
pub use body::{Local, LocalRc, MethodBody};
pub use instruction::{Instruction, InstructionRc, InstructionRef, Operand};
pub use opcode::Opcode;
pub use predicate::InstructionPredicate;
