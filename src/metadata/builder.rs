//! Fluent construction of module graphs.
//!
//! Tests, benchmarks and loader implementations assemble graphs through these builders
//! instead of wiring constructors by hand. Each `build` allocates the member's token
//! from the owning module and hooks up the declaring backrefs, so a built graph is
//! indistinguishable from a loaded one.
//!
//! ```rust
//! use cilpatch::metadata::builder::{MethodBuilder, TypeBuilder};
//! use cilpatch::metadata::module::Module;
//!
//! let module = Module::new("Game");
//! let cor = &module.cor;
//! let player = TypeBuilder::class("Game", "Player").build(&module);
//! let hurt = MethodBuilder::new("Hurt")
//!     .param("damage", &cor.i4)
//!     .returns(&cor.boolean)
//!     .implementation(|asm| {
//!         asm.ldc_i4(1).ret();
//!     })
//!     .unwrap()
//!     .build(&module, &player);
//! assert_eq!(hurt.full_name(), "Game.Player::Hurt");
//! ```

use uguid::Guid;

use crate::assembly::assembler::BodyAssembler;
use crate::assembly::body::MethodBody;
use crate::metadata::field::{FieldAttributes, FieldRc};
use crate::metadata::method::{Method, MethodAccessFlags, MethodModifiers, MethodRc, Param};
use crate::metadata::module::{Module, ModuleRc};
use crate::metadata::token::TokenKind;
use crate::metadata::typesystem::{CilFlavor, CilType, CilTypeRc, CilTypeRef, TypeAttributes};
use crate::Result;

/// Builds a [`Module`].
pub struct ModuleBuilder {
    name: String,
    mvid: Option<Guid>,
}

impl ModuleBuilder {
    /// Start a module with the given name.
    #[must_use]
    pub fn new(name: &str) -> ModuleBuilder {
        ModuleBuilder {
            name: name.to_string(),
            mvid: None,
        }
    }

    /// Use an explicit mvid instead of deriving one from the name.
    #[must_use]
    pub fn mvid(mut self, mvid: Guid) -> Self {
        self.mvid = Some(mvid);
        self
    }

    /// Build the empty module.
    #[must_use]
    pub fn build(self) -> ModuleRc {
        match self.mvid {
            Some(mvid) => Module::with_mvid(&self.name, mvid),
            None => Module::new(&self.name),
        }
    }
}

/// Builds a [`CilType`] into a module.
pub struct TypeBuilder {
    namespace: String,
    name: String,
    flavor: CilFlavor,
    flags: TypeAttributes,
    base: Option<CilTypeRc>,
    interfaces: Vec<CilTypeRc>,
    nested_in: Option<CilTypeRc>,
}

impl TypeBuilder {
    fn with_flavor(namespace: &str, name: &str, flavor: CilFlavor, flags: TypeAttributes) -> Self {
        TypeBuilder {
            namespace: namespace.to_string(),
            name: name.to_string(),
            flavor,
            flags,
            base: None,
            interfaces: Vec::new(),
            nested_in: None,
        }
    }

    /// Start a reference type.
    #[must_use]
    pub fn class(namespace: &str, name: &str) -> TypeBuilder {
        TypeBuilder::with_flavor(namespace, name, CilFlavor::Class, TypeAttributes::empty())
    }

    /// Start a value type.
    #[must_use]
    pub fn value_type(namespace: &str, name: &str) -> TypeBuilder {
        TypeBuilder::with_flavor(
            namespace,
            name,
            CilFlavor::ValueType,
            TypeAttributes::SEALED,
        )
    }

    /// Start an interface.
    #[must_use]
    pub fn interface(namespace: &str, name: &str) -> TypeBuilder {
        TypeBuilder::with_flavor(
            namespace,
            name,
            CilFlavor::Interface,
            TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT,
        )
    }

    /// Add attribute flags.
    #[must_use]
    pub fn flags(mut self, flags: TypeAttributes) -> Self {
        self.flags |= flags;
        self
    }

    /// Declare the base type.
    #[must_use]
    pub fn extends(mut self, base: &CilTypeRc) -> Self {
        self.base = Some(base.clone());
        self
    }

    /// Declare an implemented interface.
    #[must_use]
    pub fn implements(mut self, interface: &CilTypeRc) -> Self {
        self.interfaces.push(interface.clone());
        self
    }

    /// Nest the type under `parent` instead of adding it at top level.
    #[must_use]
    pub fn nested_in(mut self, parent: &CilTypeRc) -> Self {
        self.nested_in = Some(parent.clone());
        self
    }

    /// Allocate a token, build the type and register it with the module.
    #[must_use]
    pub fn build(self, module: &ModuleRc) -> CilTypeRc {
        let ty = CilType::new(
            module.alloc_token(TokenKind::TypeDef),
            &self.namespace,
            &self.name,
            self.flavor,
            self.flags,
        );
        if let Some(base) = &self.base {
            ty.set_base(base);
        }
        for interface in &self.interfaces {
            write_lock!(ty.interfaces).push(CilTypeRef::new(interface));
        }
        match &self.nested_in {
            Some(parent) => parent.add_nested(ty.clone()),
            None => module.add_type(ty.clone()),
        }
        ty
    }
}

/// Builds a [`Method`] into a type.
pub struct MethodBuilder {
    name: String,
    access: MethodAccessFlags,
    modifiers: MethodModifiers,
    params: Vec<Param>,
    return_type: Option<CilTypeRc>,
    body: Option<MethodBody>,
}

impl MethodBuilder {
    /// Start a public instance method returning void.
    #[must_use]
    pub fn new(name: &str) -> MethodBuilder {
        MethodBuilder {
            name: name.to_string(),
            access: MethodAccessFlags::PUBLIC,
            modifiers: MethodModifiers::HIDE_BY_SIG,
            params: Vec::new(),
            return_type: None,
            body: None,
        }
    }

    /// Start an instance constructor.
    #[must_use]
    pub fn constructor() -> MethodBuilder {
        MethodBuilder::new(".ctor")
    }

    /// Start a static constructor.
    #[must_use]
    pub fn static_constructor() -> MethodBuilder {
        MethodBuilder::new(".cctor")
            .access(MethodAccessFlags::PRIVATE)
            .static_()
    }

    /// Set the access level.
    #[must_use]
    pub fn access(mut self, access: MethodAccessFlags) -> Self {
        self.access = access;
        self
    }

    /// Add modifier flags.
    #[must_use]
    pub fn modifiers(mut self, modifiers: MethodModifiers) -> Self {
        self.modifiers |= modifiers;
        self
    }

    /// Mark the method static.
    #[must_use]
    pub fn static_(self) -> Self {
        self.modifiers(MethodModifiers::STATIC)
    }

    /// Append a by-value parameter.
    #[must_use]
    pub fn param(mut self, name: &str, ty: &CilTypeRc) -> Self {
        self.params.push(Param::new(name, ty));
        self
    }

    /// Append a `ref`/`out` parameter.
    #[must_use]
    pub fn param_by_ref(mut self, name: &str, ty: &CilTypeRc) -> Self {
        self.params.push(Param::by_ref(name, ty));
        self
    }

    /// Append an unnamed by-value parameter, as name-stripped binaries carry them.
    #[must_use]
    pub fn param_unnamed(mut self, ty: &CilTypeRc) -> Self {
        self.params.push(Param {
            name: None,
            ty: ty.clone(),
        });
        self
    }

    /// Set the return type.
    #[must_use]
    pub fn returns(mut self, ty: &CilTypeRc) -> Self {
        self.return_type = Some(ty.clone());
        self
    }

    /// Attach a prebuilt body.
    #[must_use]
    pub fn body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Assemble the body through a [`BodyAssembler`] closure.
    pub fn implementation(self, build: impl FnOnce(&mut BodyAssembler)) -> Result<Self> {
        let mut asm = BodyAssembler::new();
        build(&mut asm);
        Ok(self.body(asm.finish()?))
    }

    /// Allocate a token, build the method and attach it to `declaring`.
    ///
    /// Runtime-special names (`.ctor`, `.cctor`) get their special-name flags set
    /// automatically.
    #[must_use]
    pub fn build(self, module: &ModuleRc, declaring: &CilTypeRc) -> MethodRc {
        let mut modifiers = self.modifiers;
        if self.name.starts_with('.') {
            modifiers |= MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME;
        }
        let return_type = self.return_type.unwrap_or_else(|| module.cor.void.clone());
        let method = Method::new(
            module.alloc_token(TokenKind::MethodDef),
            &self.name,
            self.access,
            modifiers,
            self.params,
            &return_type,
        );
        if let Some(body) = self.body {
            method.set_body(body);
        }
        declaring.add_method(method.clone());
        method
    }
}

/// Builds a [`Field`](crate::metadata::field::Field) into a type.
pub struct FieldBuilder {
    name: String,
    ty: CilTypeRc,
    flags: FieldAttributes,
}

impl FieldBuilder {
    /// Start a public instance field of the given type.
    #[must_use]
    pub fn new(name: &str, ty: &CilTypeRc) -> FieldBuilder {
        FieldBuilder {
            name: name.to_string(),
            ty: ty.clone(),
            flags: FieldAttributes::PUBLIC,
        }
    }

    /// Replace the attribute flags.
    #[must_use]
    pub fn flags(mut self, flags: FieldAttributes) -> Self {
        self.flags = flags;
        self
    }

    /// Mark the field static.
    #[must_use]
    pub fn static_(mut self) -> Self {
        self.flags |= FieldAttributes::STATIC;
        self
    }

    /// Allocate a token, build the field and attach it to `declaring`.
    #[must_use]
    pub fn build(self, module: &ModuleRc, declaring: &CilTypeRc) -> FieldRc {
        let field = crate::metadata::field::Field::new(
            module.alloc_token(TokenKind::Field),
            &self.name,
            &self.ty,
            self.flags,
        );
        declaring.add_field(field.clone());
        field
    }
}
