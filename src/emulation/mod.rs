//! A small CIL evaluator for exercising rewritten method bodies.
//!
//! Structural assertions show that a rewrite produced the intended instruction shape;
//! they cannot show that the shape behaves. This module executes method bodies straight
//! off the shared instruction graph, so an injected prologue really short-circuits its
//! original body, a relocated helper really reaches its static state, and a wired
//! delegate really dispatches to the method it captured. Branch operands are resolved by
//! instruction identity, exactly as the editing primitives maintain them.
//!
//! The evaluator is deliberately narrow. It understands the opcodes the synthesis and
//! relocation layers emit plus the arithmetic, comparison and branch groups, models
//! objects as typed field maps, and dispatches open delegates created from
//! `ldftn`/`newobj` pairs. It is a verification harness, not a runtime: no garbage
//! collector, no exception handling, no generics instantiation.
//!
//! # Architecture
//!
//! - [`value`] - runtime values, heap instances and addressable slots
//! - [`interpreter`] - the dispatch loop with call-depth and step budgets
//!
//! # Usage
//!
//! ```rust
//! use cilpatch::assembly::Opcode;
//! use cilpatch::emulation::{Interpreter, Value};
//! use cilpatch::metadata::builder::{MethodBuilder, ModuleBuilder, TypeBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let module = ModuleBuilder::new("Calc").build();
//! let math = TypeBuilder::class("Calc", "Math").build(&module);
//! let add = MethodBuilder::new("Add")
//!     .static_()
//!     .param("a", &module.cor.i4)
//!     .param("b", &module.cor.i4)
//!     .returns(&module.cor.i4)
//!     .implementation(|asm| {
//!         asm.ldarg(0).ldarg(1).op(Opcode::Add).ret();
//!     })?
//!     .build(&module, &math);
//!
//! let mut interpreter = Interpreter::new();
//! let result = interpreter.invoke(&add, vec![Value::I32(2), Value::I32(40)])?;
//! assert_eq!(result, Value::I32(42));
//! # Ok(())
//! # }
//! ```

pub mod interpreter;
pub mod value;

// Re-export primary types at module level
pub use interpreter::{EmulationError, Interpreter};
pub use value::{ObjInstance, ObjRef, Slot, Value};
