//! The metadata model the patch engine edits.
//!
//! Everything lives in memory as a mutable graph of reference-counted nodes: modules own
//! types, types own fields and methods, and back-references run through weak handles so
//! relocation can re-home members without cycles. Loading and writing binaries happens
//! behind the [`loader::ModuleLoader`] boundary; the engine itself only ever sees this
//! graph.
//!
//! # Key Components
//!
//! - [`module`] - The module: type list, token allocation and core types
//! - [`typesystem`] - Types, flavors and the weak-reference graph discipline
//! - [`method`] / [`field`] - Member definitions with relocatable backrefs
//! - [`token`] - Metadata table row identities used as map keys
//! - [`loader`] - The binary I/O boundary and per-target import machinery
//! - [`builder`] - Fluent graph construction for tests and loaders
//!
//! # Examples
//!
//! ```rust
//! use cilpatch::metadata::builder::{MethodBuilder, TypeBuilder};
//! use cilpatch::metadata::module::Module;
//!
//! let module = Module::new("Game");
//! let main = TypeBuilder::class("Game", "Main").build(&module);
//! let update = MethodBuilder::new("Update").static_().build(&module, &main);
//!
//! assert_eq!(update.full_name(), "Game.Main::Update");
//! assert!(module.find_type("Game.Main").is_some());
//! ```

/// Fluent construction of module graphs
pub mod builder;
/// Field definitions and attribute flags
pub mod field;
/// The binary I/O boundary and per-target import machinery
pub mod loader;
/// Method definitions, parameters and argument slots
pub mod method;
/// The module graph root and token allocation
pub mod module;
/// Metadata table row identities
pub mod token;
/// The mutable type graph
pub mod typesystem;
