//! Method definitions: parameters, attribute flags and the argument-slot view the injection
//! synthesizer binds against.

use std::fmt;
use std::sync::{Arc, RwLock};

use bitflags::bitflags;

use crate::assembly::body::MethodBody;
use crate::metadata::module::Module;
use crate::metadata::token::Token;
use crate::metadata::typesystem::{CilFlavor, CilType, CilTypeRc, CilTypeRef};

/// Reference-counted handle to a [`Method`].
pub type MethodRc = Arc<Method>;

/// Bitmask for `ACCESS` state extraction
pub const METHOD_ACCESS_MASK: u32 = 0x0007;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Method access flags
    pub struct MethodAccessFlags: u32 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this Assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessibly by anyone in the Assembly
        const ASSEM = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessibly by sub-types anywhere, plus anyone in assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessibly by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
    }
}

impl MethodAccessFlags {
    /// Extract access flags from raw method attributes
    #[must_use]
    pub fn from_method_flags(flags: u32) -> Self {
        let access = flags & METHOD_ACCESS_MASK;
        Self::from_bits_truncate(access)
    }

    /// The access level after widening to at least assembly scope.
    ///
    /// Reverse accessors call their target directly from injected code, so the target must
    /// be reachable from anywhere in the patched module. Already-reachable levels are left
    /// untouched.
    #[must_use]
    pub fn widened_to_assembly(self) -> Self {
        match self {
            MethodAccessFlags::PRIVATE | MethodAccessFlags::FAM_AND_ASSEM => {
                MethodAccessFlags::ASSEM
            }
            MethodAccessFlags::FAMILY => MethodAccessFlags::FAM_OR_ASSEM,
            other => other,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Method modifiers and properties
    pub struct MethodModifiers: u32 {
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name+sig, else just by name
        const HIDE_BY_SIG = 0x0080;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// CLI provides 'special' behavior, depending upon the name of the method
        const RTSPECIAL_NAME = 0x1000;
    }
}

/// One declared parameter: an optional name and the declared type, which is a by-ref
/// wrapper for `ref`/`out` parameters.
#[derive(Clone)]
pub struct Param {
    /// Parameter name as compiled, `None` when stripped
    pub name: Option<String>,
    /// Declared type; a [`CilFlavor::ByRef`] wrapper for `ref`/`out`
    pub ty: CilTypeRc,
}

impl Param {
    /// A by-value parameter.
    #[must_use]
    pub fn new(name: &str, ty: &CilTypeRc) -> Param {
        Param {
            name: Some(name.to_string()),
            ty: ty.clone(),
        }
    }

    /// A `ref`/`out` parameter of the given element type.
    #[must_use]
    pub fn by_ref(name: &str, ty: &CilTypeRc) -> Param {
        Param {
            name: Some(name.to_string()),
            ty: CilType::byref(ty),
        }
    }

    /// `true` when the parameter is passed by managed reference.
    #[must_use]
    pub fn is_by_ref(&self) -> bool {
        self.ty.flavor() == CilFlavor::ByRef
    }

    /// The type behind a by-ref wrapper, or the declared type itself.
    #[must_use]
    pub fn element_type(&self) -> &CilTypeRc {
        match self.ty.element() {
            Some(element) if self.is_by_ref() => element,
            _ => &self.ty,
        }
    }
}

/// One slot in a method's call-argument space.
///
/// Instance methods carry their receiver at slot 0 (a by-ref wrapper when the declaring
/// type is a value type); declared parameters follow. Static methods start with declared
/// parameters at slot 0. Positional injection markers index into this space.
#[derive(Clone)]
pub struct ArgSlot {
    /// Zero-based slot index
    pub index: u16,
    /// Parameter name; `None` for the receiver
    pub name: Option<String>,
    /// Effective slot type
    pub ty: CilTypeRc,
    /// `true` for the implicit receiver slot
    pub is_receiver: bool,
}

impl ArgSlot {
    /// `true` when the slot holds a managed reference.
    #[must_use]
    pub fn is_by_ref(&self) -> bool {
        self.ty.flavor() == CilFlavor::ByRef
    }

    /// The type behind a by-ref slot, or the slot type itself.
    #[must_use]
    pub fn element_type(&self) -> &CilTypeRc {
        match self.ty.element() {
            Some(element) if self.is_by_ref() => element,
            _ => &self.ty,
        }
    }
}

/// One method of a type.
///
/// The body is behind a lock because patch application rewrites it in place; access flags
/// are behind a lock because reverse-accessor wiring widens visibility after the fact.
pub struct Method {
    /// Metadata identity within the owning module
    pub token: Token,
    /// Name of the method
    pub name: String,
    /// Access level; widened when the method becomes a reverse-accessor target
    access: RwLock<MethodAccessFlags>,
    /// Modifier flags
    pub modifiers: MethodModifiers,
    /// Declared parameters, excluding the implicit receiver
    pub params: Vec<Param>,
    /// Return type; the void core type for no return
    pub return_type: CilTypeRc,
    /// Declaring type; relocation re-homes it
    declaring: RwLock<Option<CilTypeRef>>,
    /// The instruction body, absent for abstract and runtime-provided methods
    pub body: RwLock<Option<MethodBody>>,
}

impl Method {
    /// Create a method definition without a body.
    #[must_use]
    pub fn new(
        token: Token,
        name: &str,
        access: MethodAccessFlags,
        modifiers: MethodModifiers,
        params: Vec<Param>,
        return_type: &CilTypeRc,
    ) -> MethodRc {
        Arc::new(Method {
            token,
            name: name.to_string(),
            access: RwLock::new(access),
            modifiers,
            params,
            return_type: return_type.clone(),
            declaring: RwLock::new(None),
            body: RwLock::new(None),
        })
    }

    /// `true` for methods defined on the type rather than per instance.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.modifiers.contains(MethodModifiers::STATIC)
    }

    /// `true` when the method returns a value.
    #[must_use]
    pub fn has_return(&self) -> bool {
        self.return_type.flavor() != CilFlavor::Void
    }

    /// `true` when a body is present.
    #[must_use]
    pub fn has_body(&self) -> bool {
        read_lock!(self.body).is_some()
    }

    /// Install a body.
    pub fn set_body(&self, body: MethodBody) {
        *write_lock!(self.body) = Some(body);
    }

    /// Current access level.
    #[must_use]
    pub fn access(&self) -> MethodAccessFlags {
        *read_lock!(self.access)
    }

    /// Widen visibility to at least assembly scope.
    pub fn widen_access(&self) {
        let mut access = write_lock!(self.access);
        *access = access.widened_to_assembly();
    }

    /// The type this method currently belongs to.
    #[must_use]
    pub fn declaring(&self) -> Option<CilTypeRc> {
        read_lock!(self.declaring)
            .as_ref()
            .and_then(CilTypeRef::upgrade)
    }

    /// Re-home this method under a new declaring type. Called by the type when added.
    pub fn set_declaring(&self, declaring: &CilTypeRc) {
        *write_lock!(self.declaring) = Some(CilTypeRef::new(declaring));
    }

    /// The module this method currently belongs to, through its declaring type.
    #[must_use]
    pub fn module(&self) -> Option<Arc<Module>> {
        self.declaring().and_then(|ty| ty.module())
    }

    /// The call-argument space of this method.
    ///
    /// Receiver first for instance methods, wrapped by-ref when the declaring type is a
    /// value type, then declared parameters. Slot indices are what positional injection
    /// markers count.
    #[must_use]
    pub fn arg_slots(&self) -> Vec<ArgSlot> {
        let mut slots = Vec::with_capacity(self.params.len() + 1);
        let mut index: u16 = 0;

        if !self.is_static() {
            if let Some(declaring) = self.declaring() {
                let ty = if declaring.flavor().is_value_type() {
                    CilType::byref(&declaring)
                } else {
                    declaring
                };
                slots.push(ArgSlot {
                    index,
                    name: None,
                    ty,
                    is_receiver: true,
                });
                index += 1;
            }
        }

        for param in &self.params {
            slots.push(ArgSlot {
                index,
                name: param.name.clone(),
                ty: param.ty.clone(),
                is_receiver: false,
            });
            index += 1;
        }
        slots
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

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Method({}, {} params, {})",
            self.full_name(),
            self.params.len(),
            if self.is_static() { "static" } else { "instance" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::typesystem::{CorTypes, TypeAttributes};

    fn new_class(name: &str, flavor: CilFlavor) -> CilTypeRc {
        CilType::new(Token::type_def(1), "Game", name, flavor, TypeAttributes::empty())
    }

    #[test]
    fn access_widening_table() {
        assert_eq!(
            MethodAccessFlags::PRIVATE.widened_to_assembly(),
            MethodAccessFlags::ASSEM
        );
        assert_eq!(
            MethodAccessFlags::FAM_AND_ASSEM.widened_to_assembly(),
            MethodAccessFlags::ASSEM
        );
        assert_eq!(
            MethodAccessFlags::FAMILY.widened_to_assembly(),
            MethodAccessFlags::FAM_OR_ASSEM
        );
        assert_eq!(
            MethodAccessFlags::PUBLIC.widened_to_assembly(),
            MethodAccessFlags::PUBLIC
        );
        assert_eq!(
            MethodAccessFlags::ASSEM.widened_to_assembly(),
            MethodAccessFlags::ASSEM
        );
    }

    #[test]
    fn instance_method_receiver_slot() {
        let cor = CorTypes::new();
        let player = new_class("Player", CilFlavor::Class);
        let take = Method::new(
            Token::method(1),
            "Take",
            MethodAccessFlags::PUBLIC,
            MethodModifiers::empty(),
            vec![Param::new("amount", &cor.i4)],
            &cor.void,
        );
        player.add_method(take.clone());

        let slots = take.arg_slots();
        assert_eq!(slots.len(), 2);
        assert!(slots[0].is_receiver);
        assert!(slots[0].name.is_none());
        assert_eq!(slots[0].ty.name(), "Player");
        assert_eq!(slots[1].name.as_deref(), Some("amount"));
        assert_eq!(slots[1].index, 1);
    }

    #[test]
    fn value_type_receiver_arrives_by_ref() {
        let cor = CorTypes::new();
        let point = new_class("Point", CilFlavor::ValueType);
        let flip = Method::new(
            Token::method(1),
            "Flip",
            MethodAccessFlags::PUBLIC,
            MethodModifiers::empty(),
            Vec::new(),
            &cor.void,
        );
        point.add_method(flip.clone());

        let slots = flip.arg_slots();
        assert_eq!(slots.len(), 1);
        assert!(slots[0].is_by_ref());
        assert_eq!(slots[0].element_type().name(), "Point");
    }

    #[test]
    fn static_method_slots_start_at_declared_params() {
        let cor = CorTypes::new();
        let ticker = new_class("Ticker", CilFlavor::Class);
        let tick = Method::new(
            Token::method(1),
            "Tick",
            MethodAccessFlags::PUBLIC,
            MethodModifiers::STATIC,
            vec![Param::new("delta", &cor.r4), Param::by_ref("count", &cor.i4)],
            &cor.boolean,
        );
        ticker.add_method(tick.clone());

        let slots = tick.arg_slots();
        assert_eq!(slots.len(), 2);
        assert!(!slots[0].is_receiver);
        assert_eq!(slots[0].index, 0);
        assert!(slots[1].is_by_ref());
        assert_eq!(slots[1].element_type().name(), "Int32");
        assert!(tick.has_return());
    }
}
