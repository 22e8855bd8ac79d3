//! # cilpatch Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the cilpatch library. Import this module to get quick access to the essential
//! types for declaring and applying method-body patches.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilpatch operations
pub use crate::Error;

/// The result type used throughout cilpatch
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The patch runner and its outcome summary
pub use crate::patch::{Patcher, RunReport};

/// Patch declarations: sets, targets and versions
pub use crate::patch::{PatchSet, PatchSetBuilder, PatchTarget, PatchVersion};

/// The patch contract and the closure-backed implementation of it
pub use crate::patch::{FnPatch, Patch};

// ================================================================================================
// Patch Application Services
// ================================================================================================

/// Resolution services handed to a running patch
pub use crate::patch::PatchContext;

/// Prefix/postfix injection with parameter binding
pub use crate::patch::PrefixPatch;

/// Support-code declarations and their relocation roles
pub use crate::patch::{MemberTag, SupportDecl};

// ================================================================================================
// Metadata System - Core Types
// ================================================================================================

/// Metadata token types for stable member identity
pub use crate::metadata::token::{Token, TokenKind};

/// Module nodes and their shared handle
pub use crate::metadata::module::{Module, ModuleRc};

/// Methods, their parameters and their flags
pub use crate::metadata::method::{
    ArgSlot, Method, MethodAccessFlags, MethodModifiers, MethodRc, Param,
};

/// Fields and their flags
pub use crate::metadata::field::{Field, FieldAttributes, FieldRc};

// ================================================================================================
// Type System
// ================================================================================================

/// Core type system components
pub use crate::metadata::typesystem::{
    CilFlavor, CilType, CilTypeRc, CilTypeRef, CorTypes, TypeAttributes,
};

// ================================================================================================
// Construction and Loading
// ================================================================================================

/// Fluent builders for in-memory module graphs
pub use crate::metadata::builder::{FieldBuilder, MethodBuilder, ModuleBuilder, TypeBuilder};

/// Module loading abstraction and the in-memory implementation
pub use crate::metadata::loader::{MemoryLoader, ModuleLoader, TargetModule};

// ================================================================================================
// Instruction Graphs and Editing
// ================================================================================================

/// Instructions, bodies and the handles that reference them
pub use crate::assembly::{
    Instruction, InstructionRc, InstructionRef, Local, LocalRc, MethodBody, Opcode, Operand,
};

/// Fluent method body emission with label resolution
pub use crate::assembly::BodyAssembler;

/// Positional editing primitives that keep branch operands intact
pub use crate::assembly::editor::{
    insert_all_at, insert_at, normalize_branches, remove_at, repoint_branches, replace_at,
};

/// Structural scans over instruction windows
pub use crate::assembly::predicate::{expect_window, find_window, find_window_from};

/// The predicate alias window scans are built from
pub use crate::assembly::InstructionPredicate;

// ================================================================================================
// Analysis
// ================================================================================================

/// Assignability queries with boxing awareness
pub use crate::analysis::{assignable_to, Assignability};

// ================================================================================================
// Emulation
// ================================================================================================

/// The CIL evaluator and its runtime values
pub use crate::emulation::{EmulationError, Interpreter, Value};
