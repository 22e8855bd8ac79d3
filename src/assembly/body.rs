//! Method bodies: the instruction list and its local variable slots.
//!
//! A body owns its instructions in execution order; locals are appended only, so a
//! [`LocalRc`] handed out once stays valid for the body's lifetime. Lookup helpers
//! resolve identities back to indices, which is how the evaluator and the editing
//! primitives relate branch references to positions.

use std::fmt;
use std::sync::Arc;

use crate::assembly::instruction::{InstructionRc, InstructionRef};
use crate::metadata::typesystem::CilTypeRc;

/// Reference-counted handle to a [`Local`].
pub type LocalRc = Arc<Local>;

/// One local variable slot.
///
/// Injection reuses slots by name: a body that already carries a `__result` local keeps
/// it when a second augmentation method asks for one.
pub struct Local {
    /// Slot name; `None` for unnamed slots in loaded bodies
    pub name: Option<String>,
    /// Declared slot type
    pub ty: CilTypeRc,
}

impl Local {
    /// A named local slot.
    #[must_use]
    pub fn new(name: &str, ty: &CilTypeRc) -> LocalRc {
        Arc::new(Local {
            name: Some(name.to_string()),
            ty: ty.clone(),
        })
    }

    /// An unnamed local slot.
    #[must_use]
    pub fn unnamed(ty: &CilTypeRc) -> LocalRc {
        Arc::new(Local {
            name: None,
            ty: ty.clone(),
        })
    }

    /// The slot name, or the type name in angle brackets while unnamed.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("<{}>", self.ty.name()),
        }
    }
}

impl fmt::Debug for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Local({}: {})", self.display_name(), self.ty.name())
    }
}

/// The instruction body of a method.
pub struct MethodBody {
    /// Instructions in execution order
    pub instructions: Vec<InstructionRc>,
    /// Local variable slots; append-only
    pub locals: Vec<LocalRc>,
    /// Declared operand stack depth; writers recompute this on output
    pub max_stack: u16,
    /// Zero-initialize locals on entry
    pub init_locals: bool,
}

impl MethodBody {
    /// An empty body with zero-initialized locals.
    #[must_use]
    pub fn new() -> MethodBody {
        MethodBody {
            instructions: Vec::new(),
            locals: Vec::new(),
            max_stack: 8,
            init_locals: true,
        }
    }

    /// Append an instruction.
    pub fn push(&mut self, instruction: InstructionRc) {
        self.instructions.push(instruction);
    }

    /// Append a local slot and hand back its handle.
    pub fn add_local(&mut self, local: LocalRc) -> LocalRc {
        self.locals.push(local.clone());
        local
    }

    /// First local slot with the given name.
    #[must_use]
    pub fn find_local(&self, name: &str) -> Option<LocalRc> {
        self.locals
            .iter()
            .find(|l| l.name.as_deref() == Some(name))
            .cloned()
    }

    /// Slot index of a local, by identity.
    #[must_use]
    pub fn local_index(&self, local: &LocalRc) -> Option<usize> {
        self.locals.iter().position(|l| Arc::ptr_eq(l, local))
    }

    /// Position of an instruction, by identity.
    #[must_use]
    pub fn index_of(&self, instruction: &InstructionRc) -> Option<usize> {
        self.instructions
            .iter()
            .position(|i| Arc::ptr_eq(i, instruction))
    }

    /// Position a branch reference resolves to, `None` for dead or foreign targets.
    #[must_use]
    pub fn resolve_target(&self, target: &InstructionRef) -> Option<usize> {
        self.instructions.iter().position(|i| target.points_to(i))
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// `true` while the body has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The first instruction, when present.
    #[must_use]
    pub fn first(&self) -> Option<InstructionRc> {
        self.instructions.first().cloned()
    }

    /// The last instruction, when present.
    #[must_use]
    pub fn last(&self) -> Option<InstructionRc> {
        self.instructions.last().cloned()
    }
}

impl Default for MethodBody {
    fn default() -> Self {
        MethodBody::new()
    }
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MethodBody({} instructions, {} locals)",
            self.instructions.len(),
            self.locals.len()
        )
    }
}
