//! Field definitions.

use std::fmt;
use std::sync::{Arc, RwLock};

use bitflags::bitflags;

use crate::metadata::token::Token;
use crate::metadata::typesystem::{CilTypeRc, CilTypeRef};

/// Reference-counted handle to a [`Field`].
pub type FieldRc = Arc<Field>;

/// Bitmask for `ACCESS` state extraction
pub const FIELD_ACCESS_MASK: u32 = 0x0007;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Field attribute flags
    pub struct FieldAttributes: u32 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this Assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessibly by anyone in the Assembly
        const ASSEMBLY = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessibly by sub-types anywhere, plus anyone in assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessibly by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Field can only be initialized, not written after init
        const INIT_ONLY = 0x0020;
        /// Value is a compile-time constant
        const LITERAL = 0x0040;
        /// Field is special
        const SPECIAL_NAME = 0x0200;
        /// CLI provides 'special' behavior, depending upon the name of the field
        const RTSPECIAL_NAME = 0x0400;
    }
}

/// One field of a type: a name, a type and attribute flags.
///
/// Fields are leaves of the graph; relocation moves them between types by swapping the
/// declaring backref and the member-list entries.
pub struct Field {
    /// Metadata identity within the owning module
    pub token: Token,
    /// Name of the field
    pub name: String,
    /// Declared field type
    pub ty: CilTypeRc,
    /// Attribute flags
    pub flags: FieldAttributes,
    /// Declaring type; relocation re-homes it
    declaring: RwLock<Option<CilTypeRef>>,
}

impl Field {
    /// Create a field definition.
    #[must_use]
    pub fn new(token: Token, name: &str, ty: &CilTypeRc, flags: FieldAttributes) -> FieldRc {
        Arc::new(Field {
            token,
            name: name.to_string(),
            ty: ty.clone(),
            flags,
            declaring: RwLock::new(None),
        })
    }

    /// `true` for fields defined on the type rather than per instance.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldAttributes::STATIC)
    }

    /// The type this field currently belongs to.
    #[must_use]
    pub fn declaring(&self) -> Option<CilTypeRc> {
        read_lock!(self.declaring)
            .as_ref()
            .and_then(CilTypeRef::upgrade)
    }

    /// Re-home this field under a new declaring type. Called by the type when added.
    pub fn set_declaring(&self, declaring: &CilTypeRc) {
        *write_lock!(self.declaring) = Some(CilTypeRef::new(declaring));
    }

    /// `DeclaringType::name`, or just the name while detached.
    #[must_use]
    pub fn full_name(&self) -> String {
        match self.declaring() {
            Some(declaring) => format!("{}::{}", declaring.full_name(), self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({}: {})", self.full_name(), self.ty.name())
    }
}
