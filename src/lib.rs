// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # cilpatch
//!
//! [![Crates.io](https://img.shields.io/crates/v/cilpatch.svg)](https://crates.io/crates/cilpatch)
//! [![Documentation](https://docs.rs/cilpatch/badge.svg)](https://docs.rs/cilpatch)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://www.apache.org/licenses/LICENSE-2.0)
//!
//! An in-memory patch engine for CIL (Common Intermediate Language) method bodies.
//! Built in pure Rust, `cilpatch` rewrites managed methods on a shared instruction
//! graph: structural scans locate patch sites by shape instead of byte offset,
//! positional editors splice instructions without breaking branches, and an
//! injection layer grafts prefix and postfix hooks onto existing bodies the way
//! game-modding frameworks do.
//!
//! ## Features
//!
//! - **🧵 Identity-bearing instruction graph** - Branch operands reference the instruction they target, never an offset, so edits cannot silently retarget a jump
//! - **🔍 Structural scanning** - Sliding-window predicates find patch sites by opcode and operand shape, surviving recompilation of the target
//! - **🪝 Prefix/postfix injection** - Hook methods run before or after an existing body, with argument, receiver, by-ref and return-value binding
//! - **📦 Support-code relocation** - Helper types move wholesale into the target module, with reverse accessors wired back to private target state
//! - **🔢 Versioned patch sets** - A version marker stamped into the target makes patching idempotent and refuses downgrades
//! - **⚙️ Verification by execution** - A small CIL evaluator runs patched bodies in-process so tests can assert behavior, not just structure
//!
//! ## Quick Start
//!
//! Add `cilpatch` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! cilpatch = "0.1"
//! ```
//!
//! ### Using the Prelude
//!
//! For convenient access to the most commonly used types, import the prelude:
//!
//! ```rust
//! use cilpatch::prelude::*;
//!
//! let module = ModuleBuilder::new("Game").build();
//! let player = TypeBuilder::class("Game", "Player").build(&module);
//! let update = MethodBuilder::new("Update")
//!     .implementation(|asm| {
//!         asm.ret();
//!     })?
//!     .build(&module, &player);
//!
//! assert_eq!(update.full_name(), "Game.Player::Update");
//! # Ok::<(), cilpatch::Error>(())
//! ```
//!
//! ### Basic Usage
//!
//! Everything below runs in memory; production code points the loader at assemblies
//! on disk instead of registering built modules by hand.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cilpatch::assembly::{editor, Instruction};
//! use cilpatch::metadata::builder::{MethodBuilder, ModuleBuilder, TypeBuilder};
//! use cilpatch::metadata::loader::MemoryLoader;
//! use cilpatch::patch::{PatchSet, PatchTarget, PatchVersion, Patcher};
//!
//! # fn main() -> cilpatch::Result<()> {
//! // Register a target module and an (empty) support module with the loader.
//! let loader = Arc::new(MemoryLoader::new());
//! let game = ModuleBuilder::new("Game").build();
//! let player = TypeBuilder::class("Game", "Player").build(&game);
//! let _ = MethodBuilder::new("Update")
//!     .implementation(|asm| {
//!         asm.ret();
//!     })?
//!     .build(&game, &player);
//! loader.insert("Game.dll", game);
//! loader.insert("Support.dll", ModuleBuilder::new("Support").build());
//!
//! // A named, versioned group of patches aimed at one module.
//! let set = PatchSet::build("quality-of-life", PatchVersion::new(1, 0))
//!     .module("Game")
//!     .patch_fn(
//!         "pad the update loop",
//!         PatchTarget::method("Game.Player", "Update"),
//!         |_ctx, method| {
//!             let mut guard = method.body.write().expect("body lock");
//!             let body = guard.as_mut().expect("Update has a body");
//!             editor::insert_at(body, 0, Instruction::nop());
//!             Ok(())
//!         },
//!     )
//!     .finish();
//!
//! let mut patcher = Patcher::new(Box::new(loader), "Support.dll");
//! patcher.add_target("Game.dll");
//! patcher.add_set(set, true);
//!
//! let report = patcher.run(|_, _| {})?;
//! assert_eq!(report.applied, ["quality-of-life".to_string()]);
//! # Ok(())
//! # }
//! ```
//!
//! ### Verifying a Patch by Execution
//!
//! Structural assertions show that instructions landed; the [`emulation`] module shows
//! that they behave. See its documentation for evaluating a built method end to end.
//!
//! ## Architecture
//!
//! `cilpatch` is organized into several key modules:
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`metadata`] - The in-memory module graph: types, methods, fields, builders and loaders
//! - [`assembly`] - Instruction graphs, positional editing, structural scans and the body assembler
//! - [`analysis`] - Assignability queries that drive injection code generation
//! - [`patch`] - Patch sets, injection, relocation, versioning and the application pipeline
//! - [`emulation`] - A CIL evaluator for exercising patched bodies in tests
//! - [`Error`] and [`Result`] - Comprehensive error handling
//!
//! ### The Module Graph
//!
//! [`metadata`] holds modules, types, methods and fields as reference-counted nodes;
//! a method body is shared state behind a lock, so a patch made through one handle is
//! visible to every other holder. Builders assemble graphs for tests and support
//! code, and [`metadata::loader::ModuleLoader`] abstracts where modules come from.
//!
//! ### Body Editing
//!
//! [`assembly`] keeps method bodies as lists of shared instruction nodes. Insertion
//! and removal are positional, branch retargeting is explicit, and
//! [`assembly::editor::normalize_branches`] widens short branch forms that can no
//! longer span the distance after an edit.
//!
//! ### The Application Pipeline
//!
//! [`patch`] drives the run: dependency and version checks first, then per-set
//! application with recoverable failures logged and skipped, then a single write
//! pass over the targets that actually changed.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result) with detailed error information:
//!
//! ```rust,no_run
//! use cilpatch::{Error, patch::Patcher};
//!
//! # fn run(patcher: &mut Patcher) {
//! match patcher.run(|_, _| {}) {
//!     Ok(report) => println!("Applied {} sets", report.applied.len()),
//!     Err(Error::PatternNotFound { message, file, line }) => {
//!         eprintln!("No patch site: {} ({}:{})", message, file, line);
//!     }
//!     Err(Error::PatchSetFailed { set, source }) => {
//!         eprintln!("Patch set '{}' failed: {}", set, source);
//!     }
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # }
//! ```
//!
//! ## Testing
//!
//! The test suite builds every fixture in memory, so it runs on any platform without
//! sample binaries:
//!
//! ```bash
//! cargo test
//! ```
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// This module provides a curated selection of the most frequently used types
/// from across the cilpatch library, allowing for convenient glob imports.
///
/// # Example
///
/// ```rust
/// use cilpatch::prelude::*;
///
/// let module = ModuleBuilder::new("Game").build();
/// assert_eq!(module.name, "Game");
/// ```
pub mod prelude;

/// Static analysis over the in-memory type system.
///
/// Assignability queries answer whether a value of one type can flow into a slot of
/// another under the runtime's widening rules, and whether that flow needs a `box`
/// instruction. Injection synthesis consults these verdicts before wiring a target's
/// arguments, receiver or return value into a hook method.
///
/// # Key Types
///
/// - [`analysis::Assignability`] - The three-way verdict: assignable, assignable with boxing, or not
/// - [`analysis::assignable_to`] - The query itself
pub mod analysis;

/// CIL instruction graphs and the primitives that edit them.
///
/// Everything between raw opcodes and whole method bodies lives here: the opcode set,
/// instructions as shared identity-bearing nodes, bodies with their local slots,
/// positional editing, structural scan predicates and a fluent body assembler.
///
/// # Key Types
///
/// - [`assembly::Opcode`] - The instruction set with encoding and branch classification
/// - [`assembly::Instruction`] / [`assembly::InstructionRc`] - One shared, mutable instruction node
/// - [`assembly::InstructionRef`] - Weak identity handle used by branch operands
/// - [`assembly::MethodBody`] - Instruction list plus local variable slots
/// - [`assembly::BodyAssembler`] - Fluent emitter with label resolution
///
/// # Main Functions
///
/// - [`assembly::editor::insert_all_at`] / [`assembly::editor::repoint_branches`] - Positional editing
/// - [`assembly::editor::normalize_branches`] - Widen short branches after insertion
/// - [`assembly::predicate::find_window`] / [`assembly::predicate::expect_window`] - Structural scans
pub mod assembly;

/// Evaluation of method bodies for behavioral verification.
///
/// A structural assertion can show that a patch landed; only execution shows that the
/// patched method still computes the right thing. The evaluator interprets bodies
/// directly off the shared instruction graph, including calls, field access, delegate
/// dispatch and the patch engine's synthesized wiring.
///
/// # Key Types
///
/// - [`emulation::Interpreter`] - The evaluator, holding static field state and execution budgets
/// - [`emulation::Value`] - Runtime values: integers, floats, strings, objects, pointers, delegates
/// - [`emulation::EmulationError`] - Everything that can go wrong mid-execution
pub mod emulation;

/// The in-memory representation of managed modules.
///
/// This module carries the object graph the rest of the crate operates on: modules
/// owning types, types owning methods and fields, methods owning bodies. All nodes
/// are reference-counted and cross-linked by identity, so moving a type between
/// modules or rewriting a body never invalidates a handle someone else holds.
///
/// # Key Components
///
/// ## The Graph
/// - [`metadata::module`] - Module nodes and their type lists
/// - [`metadata::typesystem`] - Types, flavors and the built-in type cache
/// - [`metadata::method`] / [`metadata::field`] - Members with flags, signatures and bodies
/// - [`metadata::token`] - Metadata tokens for stable member identity
///
/// ## Construction and Loading
/// - [`metadata::builder`] - Fluent builders for modules, types, methods and fields
/// - [`metadata::loader`] - The [`metadata::loader::ModuleLoader`] trait plus an in-memory implementation
///
/// # Examples
///
/// ```rust
/// use cilpatch::metadata::builder::{ModuleBuilder, TypeBuilder};
///
/// let module = ModuleBuilder::new("Game").build();
/// let player = TypeBuilder::class("Game", "Player").build(&module);
///
/// assert_eq!(player.full_name(), "Game.Player");
/// assert_eq!(module.types().len(), 1);
/// ```
pub mod metadata;

/// Patch declaration and the application pipeline.
///
/// The outermost layer: patch sets group named patches behind a version, injection
/// synthesizes prefix/postfix wiring, relocation moves support code into the target,
/// and the runner drives the whole thing across loaded modules.
///
/// # Key Types
///
/// - [`patch::Patcher`] - Loads targets, orders sets, applies and writes
/// - [`patch::PatchSet`] / [`patch::PatchSetBuilder`] - A named, versioned group of patches
/// - [`patch::Patch`] - One named edit against one target method
/// - [`patch::PatchTarget`] - Declarative "type + member" addressing
/// - [`patch::PrefixPatch`] - Prefix/postfix injection with parameter binding
/// - [`patch::PatchContext`] - Resolution services handed to a running patch
/// - [`patch::PatchVersion`] - The marker the version guard stamps and checks
pub mod patch;

/// `cilpatch` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
///
/// # Examples
///
/// ```rust,no_run
/// use cilpatch::{patch::Patcher, Result};
///
/// fn patch_everything(patcher: &mut Patcher) -> Result<usize> {
///     let report = patcher.run(|_, _| {})?;
///     Ok(report.applied.len())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `cilpatch` Error type
///
/// The main error type for all operations in this crate. Provides detailed error
/// information for structural scans, member resolution, version conflicts and
/// patch application.
///
/// # Examples
///
/// ```rust
/// use cilpatch::Error;
///
/// let err = Error::UnresolvedMember("Game.Player::Update".to_string());
/// assert!(!err.is_recoverable());
///
/// let err = Error::PatternNotFound {
///     message: "no health check found".to_string(),
///     file: "patches.rs",
///     line: 42,
/// };
/// assert!(err.to_string().contains("no health check"));
/// ```
pub use error::Error;

/// Main entry point for applying patches to loaded modules.
///
/// See [`patch::Patcher`] for target management, set ordering and the run loop.
///
/// # Example
///
/// ```rust
/// use cilpatch::{metadata::loader::MemoryLoader, Patcher};
///
/// let mut patcher = Patcher::new(Box::new(MemoryLoader::new()), "Support.dll");
/// patcher.add_target("Game.dll");
/// ```
pub use patch::Patcher;

/// Declarative building blocks for patch sets.
///
/// These types cover the common declaration surface:
/// - [`PatchSet`] - A named, versioned group of patches
/// - [`PatchTarget`] - "type + member" addressing into the target module
/// - [`PatchVersion`] - The version the guard stamps into patched modules
///
/// # Example
///
/// ```rust
/// use cilpatch::{PatchSet, PatchTarget, PatchVersion};
///
/// let set = PatchSet::build("no-drowning", PatchVersion::new(1, 2))
///     .module("Game")
///     .patch_fn("gills", PatchTarget::method("Game.Player", "Breathe"), |_, _| Ok(()))
///     .finish();
///
/// assert_eq!(set.patches().len(), 1);
/// ```
pub use patch::{PatchSet, PatchTarget, PatchVersion};
