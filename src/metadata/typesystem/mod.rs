//! The mutable type graph the patch engine edits.
//!
//! Types form a graph: strong [`CilTypeRc`] references own wrapper elements and generic
//! arguments, while base types, enclosing types and interface entries are held through the
//! weak [`CilTypeRef`] handle so relocation can re-home types without reference cycles
//! keeping stale graphs alive. Member lists sit behind `RwLock` because patch application
//! mutates them in place (container creation, member relocation, import-by-need).
//!
//! # Key Components
//!
//! - [`CilType`]: One named type, wrapper type or generic instantiation
//! - [`CilTypeRef`]: Weak handle used wherever the graph could cycle
//! - [`CilFlavor`]: Kind classification driving assignability and boxing
//! - [`CorTypes`]: The well-known core types every module can name
//! - [`TypeAttributes`]: Type-level attribute flags

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use bitflags::bitflags;

use crate::metadata::field::FieldRc;
use crate::metadata::method::MethodRc;
use crate::metadata::module::Module;
use crate::metadata::token::Token;
use crate::patch::version::PatchVersion;

mod flavor;

pub use flavor::CilFlavor;

/// Reference-counted handle to a [`CilType`].
pub type CilTypeRc = Arc<CilType>;

bitflags! {
    /// Type-level attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeAttributes: u32 {
        /// Nested type visible within its assembly
        const NESTED_ASSEMBLY = 0x0000_0005;
        /// Interface contract
        const INTERFACE = 0x0000_0020;
        /// Cannot be instantiated directly
        const ABSTRACT = 0x0000_0080;
        /// Cannot be derived from
        const SEALED = 0x0000_0100;
        /// Name carries special meaning to tooling
        const SPECIAL_NAME = 0x0000_0400;
        /// Static fields initialize lazily before first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

/// A weak reference to a [`CilType`].
///
/// Base types, enclosing types and interface lists use this handle instead of a strong
/// `Arc`: type graphs cycle freely (a nested type's enclosing type lists it back), and
/// strong references in both directions would leak the whole graph. Holders upgrade on
/// access and treat a dead reference as absent.
#[derive(Clone)]
pub struct CilTypeRef {
    weak_ref: Weak<CilType>,
}

impl CilTypeRef {
    /// Create a weak handle from a strong reference.
    #[must_use]
    pub fn new(strong_ref: &CilTypeRc) -> Self {
        CilTypeRef {
            weak_ref: Arc::downgrade(strong_ref),
        }
    }

    /// Attempt to upgrade to a strong reference.
    #[must_use]
    pub fn upgrade(&self) -> Option<CilTypeRc> {
        self.weak_ref.upgrade()
    }

    /// `true` while the referenced type is still alive.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.weak_ref.strong_count() > 0
    }

    /// `true` when this handle points at exactly the given type instance.
    #[must_use]
    pub fn points_to(&self, ty: &CilTypeRc) -> bool {
        self.weak_ref.as_ptr() == Arc::as_ptr(ty)
    }
}

impl fmt::Debug for CilTypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(ty) => write!(f, "CilTypeRef({})", ty.full_name()),
            None => write!(f, "CilTypeRef(<dead>)"),
        }
    }
}

/// One type in the graph: a named definition, a wrapper (by-ref, pointer, array), a generic
/// instantiation or a generic parameter placeholder.
///
/// Named types belong to a [`Module`] and carry a token allocated by it; wrapper types and
/// generic placeholders are anonymous (null token) and owned by whoever references them.
pub struct CilType {
    /// Metadata identity within the owning module; null for anonymous wrapper types
    pub token: Token,
    /// Namespace of the type, empty for nested and anonymous types
    pub namespace: String,
    /// Simple name; behind a lock because importing renames on collision
    name: RwLock<String>,
    /// Kind classification
    flavor: CilFlavor,
    /// Attribute flags
    pub flags: TypeAttributes,
    /// Base type aka 'extends'
    base: RwLock<Option<CilTypeRef>>,
    /// Enclosing type for nested types; relocation re-homes it
    enclosing: RwLock<Option<CilTypeRef>>,
    /// Owning module; import-by-need re-homes it
    module: RwLock<Option<Weak<Module>>>,
    /// Element type for by-ref, pointer and array wrappers
    element: Option<CilTypeRc>,
    /// The open definition behind a generic instantiation
    generic_def: Option<CilTypeRc>,
    /// Concrete arguments of a generic instantiation
    generic_args: Vec<CilTypeRc>,
    /// All interfaces this type implements
    pub interfaces: RwLock<Vec<CilTypeRef>>,
    /// All fields this type has
    pub fields: RwLock<Vec<FieldRc>>,
    /// All methods this type has
    pub methods: RwLock<Vec<MethodRc>>,
    /// All types that are 'contained' in this type
    pub nested_types: RwLock<Vec<CilTypeRc>>,
    /// Version marker record stamped onto injected container types
    version_marker: RwLock<Option<PatchVersion>>,
}

impl CilType {
    /// Create a named type definition.
    #[must_use]
    pub fn new(
        token: Token,
        namespace: &str,
        name: &str,
        flavor: CilFlavor,
        flags: TypeAttributes,
    ) -> CilTypeRc {
        Arc::new(CilType {
            token,
            namespace: namespace.to_string(),
            name: RwLock::new(name.to_string()),
            flavor,
            flags,
            base: RwLock::new(None),
            enclosing: RwLock::new(None),
            module: RwLock::new(None),
            element: None,
            generic_def: None,
            generic_args: Vec::new(),
            interfaces: RwLock::new(Vec::new()),
            fields: RwLock::new(Vec::new()),
            methods: RwLock::new(Vec::new()),
            nested_types: RwLock::new(Vec::new()),
            version_marker: RwLock::new(None),
        })
    }

    fn wrapper(name: String, flavor: CilFlavor, element: &CilTypeRc) -> CilTypeRc {
        Arc::new(CilType {
            token: Token::new(0),
            namespace: String::new(),
            name: RwLock::new(name),
            flavor,
            flags: TypeAttributes::empty(),
            base: RwLock::new(None),
            enclosing: RwLock::new(None),
            module: RwLock::new(None),
            element: Some(element.clone()),
            generic_def: None,
            generic_args: Vec::new(),
            interfaces: RwLock::new(Vec::new()),
            fields: RwLock::new(Vec::new()),
            methods: RwLock::new(Vec::new()),
            nested_types: RwLock::new(Vec::new()),
            version_marker: RwLock::new(None),
        })
    }

    /// A managed reference (`T&`) to `element`.
    #[must_use]
    pub fn byref(element: &CilTypeRc) -> CilTypeRc {
        CilType::wrapper(format!("{}&", element.name()), CilFlavor::ByRef, element)
    }

    /// An unmanaged pointer (`T*`) to `element`.
    #[must_use]
    pub fn pointer(element: &CilTypeRc) -> CilTypeRc {
        CilType::wrapper(format!("{}*", element.name()), CilFlavor::Pointer, element)
    }

    /// A single-dimensional array (`T[]`) of `element`.
    #[must_use]
    pub fn array(element: &CilTypeRc) -> CilTypeRc {
        CilType::wrapper(format!("{}[]", element.name()), CilFlavor::Array, element)
    }

    /// Instantiate a generic definition with concrete arguments.
    #[must_use]
    pub fn generic_instance(definition: &CilTypeRc, args: Vec<CilTypeRc>) -> CilTypeRc {
        Arc::new(CilType {
            token: Token::new(0),
            namespace: definition.namespace.clone(),
            name: RwLock::new(definition.name()),
            flavor: CilFlavor::GenericInstance,
            flags: definition.flags,
            base: RwLock::new(None),
            enclosing: RwLock::new(None),
            module: RwLock::new(None),
            element: None,
            generic_def: Some(definition.clone()),
            generic_args: args,
            interfaces: RwLock::new(Vec::new()),
            fields: RwLock::new(Vec::new()),
            methods: RwLock::new(Vec::new()),
            nested_types: RwLock::new(Vec::new()),
            version_marker: RwLock::new(None),
        })
    }

    /// A generic parameter placeholder at `index` in its declaring type's parameter list.
    #[must_use]
    pub fn generic_parameter(index: u32) -> CilTypeRc {
        Arc::new(CilType {
            token: Token::new(0),
            namespace: String::new(),
            name: RwLock::new(format!("!{index}")),
            flavor: CilFlavor::GenericParameter { index },
            flags: TypeAttributes::empty(),
            base: RwLock::new(None),
            enclosing: RwLock::new(None),
            module: RwLock::new(None),
            element: None,
            generic_def: None,
            generic_args: Vec::new(),
            interfaces: RwLock::new(Vec::new()),
            fields: RwLock::new(Vec::new()),
            methods: RwLock::new(Vec::new()),
            nested_types: RwLock::new(Vec::new()),
            version_marker: RwLock::new(None),
        })
    }

    /// The simple name of this type.
    #[must_use]
    pub fn name(&self) -> String {
        read_lock!(self.name).clone()
    }

    /// Rename this type. Used when importing into a module whose namespace already carries
    /// the name.
    pub fn set_name(&self, name: String) {
        *write_lock!(self.name) = name;
    }

    /// The kind classification of this type.
    #[must_use]
    pub fn flavor(&self) -> CilFlavor {
        self.flavor
    }

    /// Element type of a by-ref, pointer or array wrapper.
    #[must_use]
    pub fn element(&self) -> Option<&CilTypeRc> {
        self.element.as_ref()
    }

    /// The open definition behind a generic instantiation.
    #[must_use]
    pub fn generic_def(&self) -> Option<&CilTypeRc> {
        self.generic_def.as_ref()
    }

    /// Concrete arguments of a generic instantiation.
    #[must_use]
    pub fn generic_args(&self) -> &[CilTypeRc] {
        &self.generic_args
    }

    /// Access the base type of this type, if it exists.
    #[must_use]
    pub fn base(&self) -> Option<CilTypeRc> {
        read_lock!(self.base).as_ref().and_then(CilTypeRef::upgrade)
    }

    /// Declare the base type.
    pub fn set_base(&self, base: &CilTypeRc) {
        *write_lock!(self.base) = Some(CilTypeRef::new(base));
    }

    /// The enclosing type for nested types, if any.
    #[must_use]
    pub fn enclosing(&self) -> Option<CilTypeRc> {
        read_lock!(self.enclosing)
            .as_ref()
            .and_then(CilTypeRef::upgrade)
    }

    /// Re-home this type under a new enclosing type (or to top level with `None`).
    pub fn set_enclosing(&self, enclosing: Option<&CilTypeRc>) {
        *write_lock!(self.enclosing) = enclosing.map(CilTypeRef::new);
    }

    /// The module this type currently belongs to.
    ///
    /// Nested types are never registered with a module directly; they reach it through
    /// their enclosing chain, which relocation keeps current.
    #[must_use]
    pub fn module(&self) -> Option<Arc<Module>> {
        if let Some(module) = read_lock!(self.module).as_ref().and_then(Weak::upgrade) {
            return Some(module);
        }
        self.enclosing().and_then(|enclosing| enclosing.module())
    }

    /// Re-home this type into a module. Called by the module when the type is added.
    pub fn set_module(&self, module: &Arc<Module>) {
        *write_lock!(self.module) = Some(Arc::downgrade(module));
    }

    /// Returns the full name of the entity, including the enclosing chain
    /// (`Namespace.Outer/Inner`).
    #[must_use]
    pub fn full_name(&self) -> String {
        let own = if self.namespace.is_empty() {
            self.name()
        } else {
            format!("{}.{}", self.namespace, self.name())
        };
        match self.enclosing() {
            Some(enclosing) => format!("{}/{}", enclosing.full_name(), own),
            None => own,
        }
    }

    /// Add a method to this type, wiring its declaring backref.
    pub fn add_method(self: &Arc<Self>, method: MethodRc) {
        method.set_declaring(self);
        write_lock!(self.methods).push(method);
    }

    /// Remove a method by identity. Returns it when found.
    pub fn remove_method(&self, method: &MethodRc) -> Option<MethodRc> {
        let mut methods = write_lock!(self.methods);
        let index = methods.iter().position(|m| Arc::ptr_eq(m, method))?;
        Some(methods.remove(index))
    }

    /// Add a field to this type, wiring its declaring backref.
    pub fn add_field(self: &Arc<Self>, field: FieldRc) {
        field.set_declaring(self);
        write_lock!(self.fields).push(field);
    }

    /// Remove a field by identity. Returns it when found.
    pub fn remove_field(&self, field: &FieldRc) -> Option<FieldRc> {
        let mut fields = write_lock!(self.fields);
        let index = fields.iter().position(|f| Arc::ptr_eq(f, field))?;
        Some(fields.remove(index))
    }

    /// Add a nested type, wiring its enclosing backref.
    pub fn add_nested(self: &Arc<Self>, nested: CilTypeRc) {
        nested.set_enclosing(Some(self));
        write_lock!(self.nested_types).push(nested);
    }

    /// Remove a nested type by identity. Returns it when found.
    pub fn remove_nested(&self, nested: &CilTypeRc) -> Option<CilTypeRc> {
        let mut nested_types = write_lock!(self.nested_types);
        let index = nested_types.iter().position(|t| Arc::ptr_eq(t, nested))?;
        Some(nested_types.remove(index))
    }

    /// First method with the given name.
    #[must_use]
    pub fn find_method(&self, name: &str) -> Option<MethodRc> {
        read_lock!(self.methods)
            .iter()
            .find(|m| m.name == name)
            .cloned()
    }

    /// All methods with the given name.
    #[must_use]
    pub fn find_methods(&self, name: &str) -> Vec<MethodRc> {
        read_lock!(self.methods)
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    /// First field with the given name.
    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<FieldRc> {
        read_lock!(self.fields)
            .iter()
            .find(|f| f.name == name)
            .cloned()
    }

    /// Nested type with the given simple name.
    #[must_use]
    pub fn find_nested(&self, name: &str) -> Option<CilTypeRc> {
        read_lock!(self.nested_types)
            .iter()
            .find(|t| t.name() == name)
            .cloned()
    }

    /// The static constructor (`.cctor`), when present.
    #[must_use]
    pub fn static_constructor(&self) -> Option<MethodRc> {
        self.find_method(".cctor")
    }

    /// The version marker stamped onto this type, when present.
    #[must_use]
    pub fn version_marker(&self) -> Option<PatchVersion> {
        *read_lock!(self.version_marker)
    }

    /// Stamp a version marker onto this type.
    pub fn set_version_marker(&self, version: PatchVersion) {
        *write_lock!(self.version_marker) = Some(version);
    }

    /// Structural identity: same kind, same name, same shape.
    ///
    /// Wrapper types compare their elements, generic instantiations compare definition and
    /// arguments pairwise, named types compare namespace and name. This is the comparison
    /// the assignability analyzer calls "identical".
    #[must_use]
    pub fn same_as(&self, other: &CilType) -> bool {
        match (self.flavor, other.flavor) {
            (CilFlavor::ByRef, CilFlavor::ByRef)
            | (CilFlavor::Pointer, CilFlavor::Pointer)
            | (CilFlavor::Array, CilFlavor::Array) => match (&self.element, &other.element) {
                (Some(a), Some(b)) => a.same_as(b),
                _ => false,
            },
            (CilFlavor::GenericInstance, CilFlavor::GenericInstance) => {
                let defs_match = match (&self.generic_def, &other.generic_def) {
                    (Some(a), Some(b)) => a.same_as(b),
                    _ => false,
                };
                defs_match
                    && self.generic_args.len() == other.generic_args.len()
                    && self
                        .generic_args
                        .iter()
                        .zip(other.generic_args.iter())
                        .all(|(a, b)| a.same_as(b))
            }
            (
                CilFlavor::GenericParameter { index: a },
                CilFlavor::GenericParameter { index: b },
            ) => a == b,
            (CilFlavor::Class, CilFlavor::Class)
            | (CilFlavor::ValueType, CilFlavor::ValueType)
            | (CilFlavor::Interface, CilFlavor::Interface) => {
                self.namespace == other.namespace && self.name() == other.name()
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for CilType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())?;
        if self.flavor == CilFlavor::GenericInstance {
            write!(f, "<")?;
            for (i, arg) in self.generic_args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CilType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CilType({:?}, {})", self.flavor, self.full_name())
    }
}

/// The well-known core types a module can always name.
///
/// Instruction synthesis and the assignability analyzer need handles to `object`, `string`,
/// the primitives, the value-type base marker and the native integer used by delegate
/// constructors. Each [`Module`] owns one record; the types are anonymous (not part of the
/// module's type list) and compare structurally.
pub struct CorTypes {
    /// `System.Void`
    pub void: CilTypeRc,
    /// `System.Boolean`
    pub boolean: CilTypeRc,
    /// `System.Char`
    pub char: CilTypeRc,
    /// `System.SByte`
    pub i1: CilTypeRc,
    /// `System.Byte`
    pub u1: CilTypeRc,
    /// `System.Int16`
    pub i2: CilTypeRc,
    /// `System.UInt16`
    pub u2: CilTypeRc,
    /// `System.Int32`
    pub i4: CilTypeRc,
    /// `System.UInt32`
    pub u4: CilTypeRc,
    /// `System.Int64`
    pub i8: CilTypeRc,
    /// `System.UInt64`
    pub u8: CilTypeRc,
    /// `System.Single`
    pub r4: CilTypeRc,
    /// `System.Double`
    pub r8: CilTypeRc,
    /// `System.IntPtr`
    pub int_ptr: CilTypeRc,
    /// `System.UIntPtr`
    pub uint_ptr: CilTypeRc,
    /// `System.Object`
    pub object: CilTypeRc,
    /// `System.String`
    pub string: CilTypeRc,
    /// `System.ValueType`, the base marker user value types box through
    pub value_type: CilTypeRc,
}

impl CorTypes {
    /// Build a fresh record of core types.
    #[must_use]
    pub fn new() -> CorTypes {
        let core = |name: &str, flavor: CilFlavor| {
            CilType::new(Token::new(0), "System", name, flavor, TypeAttributes::empty())
        };
        CorTypes {
            void: core("Void", CilFlavor::Void),
            boolean: core("Boolean", CilFlavor::Boolean),
            char: core("Char", CilFlavor::Char),
            i1: core("SByte", CilFlavor::I1),
            u1: core("Byte", CilFlavor::U1),
            i2: core("Int16", CilFlavor::I2),
            u2: core("UInt16", CilFlavor::U2),
            i4: core("Int32", CilFlavor::I4),
            u4: core("UInt32", CilFlavor::U4),
            i8: core("Int64", CilFlavor::I8),
            u8: core("UInt64", CilFlavor::U8),
            r4: core("Single", CilFlavor::R4),
            r8: core("Double", CilFlavor::R8),
            int_ptr: core("IntPtr", CilFlavor::I),
            uint_ptr: core("UIntPtr", CilFlavor::U),
            object: core("Object", CilFlavor::Object),
            string: core("String", CilFlavor::String),
            value_type: core("ValueType", CilFlavor::Class),
        }
    }

    /// `true` when `ty` is the value-type base marker.
    #[must_use]
    pub fn is_value_type_marker(ty: &CilType) -> bool {
        ty.namespace == "System" && ty.name() == "ValueType"
    }
}

impl Default for CorTypes {
    fn default() -> Self {
        CorTypes::new()
    }
}
