//! Static analysis over the in-memory type system.
//!
//! Injection synthesis never trusts a hand-off blindly: before a target's argument,
//! receiver or return value is routed into an injected method, the flow is checked
//! against the runtime's widening rules, and the verdict drives code generation
//! (a [`Assignability::AssignableWithBox`] verdict inserts a `box` instruction).
//!
//! # Architecture
//!
//! - [`assignability`] - type compatibility queries with boxing awareness
//!
//! # Usage
//!
//! ```rust
//! use cilpatch::analysis::{assignable_to, Assignability};
//! use cilpatch::metadata::typesystem::CorTypes;
//!
//! let cor = CorTypes::new();
//! assert_eq!(assignable_to(&cor.i4, &cor.object), Assignability::AssignableWithBox);
//! assert_eq!(assignable_to(&cor.string, &cor.object), Assignability::Assignable);
//! assert_eq!(assignable_to(&cor.i4, &cor.string), Assignability::NotAssignable);
//! ```

pub mod assignability;

// Re-export primary types at module level
pub use assignability::{assignable_to, Assignability};
