//! The module: root of one loaded binary's type graph.
//!
//! A [`Module`] owns its top-level types, hands out metadata tokens for newly created
//! members and carries the [`CorTypes`] record the rest of the engine uses to name core
//! types. Patch application works against two modules at once (the target binary and the
//! engine's own support module), so modules are always handled through the shared
//! [`ModuleRc`] handle and types hold weak backrefs to their owner.
//!
//! # Examples
//!
//! ```rust
//! use cilpatch::metadata::module::Module;
//! use cilpatch::metadata::token::TokenKind;
//! use cilpatch::metadata::typesystem::{CilFlavor, CilType, TypeAttributes};
//!
//! let module = Module::new("Game");
//! let player = CilType::new(
//!     module.alloc_token(TokenKind::TypeDef),
//!     "Game",
//!     "Player",
//!     CilFlavor::Class,
//!     TypeAttributes::empty(),
//! );
//! module.add_type(player);
//!
//! assert!(module.find_type("Game.Player").is_some());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use uguid::Guid;

use crate::metadata::token::{Token, TokenKind};
use crate::metadata::typesystem::{CilTypeRc, CorTypes};
use crate::Result;

/// Reference-counted handle to a [`Module`].
pub type ModuleRc = Arc<Module>;

/// One loaded module: name, identity, core types and the top-level type list.
///
/// Nested types are reached through their enclosing types and do not appear in the
/// top-level list. The type list is behind a lock because import-by-need moves types
/// between modules while patch application is underway.
pub struct Module {
    /// Module name without extension, e.g. `Game`
    pub name: String,
    /// Module version identity; also seeds rename suffixes during import
    pub mvid: Guid,
    /// The well-known core types of this module
    pub cor: CorTypes,
    /// Top-level types
    types: RwLock<Vec<CilTypeRc>>,
    next_module: AtomicU32,
    next_type: AtomicU32,
    next_field: AtomicU32,
    next_method: AtomicU32,
}

impl Module {
    /// Create an empty module with an mvid derived from its name.
    #[must_use]
    pub fn new(name: &str) -> ModuleRc {
        Module::with_mvid(name, derived_mvid(name))
    }

    /// Create an empty module with an explicit mvid.
    #[must_use]
    pub fn with_mvid(name: &str, mvid: Guid) -> ModuleRc {
        Arc::new(Module {
            name: name.to_string(),
            mvid,
            cor: CorTypes::new(),
            types: RwLock::new(Vec::new()),
            next_module: AtomicU32::new(1),
            next_type: AtomicU32::new(1),
            next_field: AtomicU32::new(1),
            next_method: AtomicU32::new(1),
        })
    }

    /// Allocate the next free token of the given kind.
    ///
    /// Rows are handed out sequentially starting at 1 and are never reused, so a token
    /// stays unique within its module for the lifetime of the graph.
    pub fn alloc_token(&self, kind: TokenKind) -> Token {
        let counter = match kind {
            TokenKind::Module => &self.next_module,
            TokenKind::TypeDef => &self.next_type,
            TokenKind::Field => &self.next_field,
            TokenKind::MethodDef => &self.next_method,
        };
        Token::from_parts(kind, counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Add a top-level type, wiring its module backref.
    pub fn add_type(self: &Arc<Self>, ty: CilTypeRc) {
        ty.set_module(self);
        write_lock!(self.types).push(ty);
    }

    /// Remove a top-level type by identity. Returns it when found.
    pub fn remove_type(&self, ty: &CilTypeRc) -> Option<CilTypeRc> {
        let mut types = write_lock!(self.types);
        let index = types.iter().position(|t| Arc::ptr_eq(t, ty))?;
        Some(types.remove(index))
    }

    /// Snapshot of the top-level types.
    #[must_use]
    pub fn types(&self) -> Vec<CilTypeRc> {
        read_lock!(self.types).clone()
    }

    /// Look up a type by path.
    ///
    /// The first segment is the full `Namespace.Name` of a top-level type; further
    /// segments, separated by `/` or `+`, walk nested types by simple name.
    #[must_use]
    pub fn find_type(&self, path: &str) -> Option<CilTypeRc> {
        let mut segments = path.split(['/', '+']);
        let first = segments.next()?;
        let mut current = read_lock!(self.types)
            .iter()
            .find(|t| t.full_name() == first)
            .cloned()?;
        for segment in segments {
            current = current.find_nested(segment)?;
        }
        Some(current)
    }

    /// Look up a type by path, or fail with the path and module name.
    pub fn resolve_type(&self, path: &str) -> Result<CilTypeRc> {
        self.find_type(path)
            .ok_or_else(|| unresolved_error!("type '{}' not found in module '{}'", path, self.name))
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Module({}, {} types, mvid {})",
            self.name,
            read_lock!(self.types).len(),
            self.mvid
        )
    }
}

/// Derive a stable mvid from a module name.
///
/// Fresh in-memory modules have no on-disk identity to read; hashing the name twice with
/// different seeds fills the 16 bytes deterministically, which keeps rename suffixes and
/// test output reproducible.
fn derived_mvid(name: &str) -> Guid {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let fnv = |seed: u64| {
        let mut hash = seed;
        for byte in name.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    };

    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&fnv(FNV_OFFSET).to_le_bytes());
    bytes[8..].copy_from_slice(&fnv(FNV_OFFSET ^ 0x9e37_79b9_7f4a_7c15).to_le_bytes());
    Guid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::typesystem::{CilFlavor, CilType, TypeAttributes};

    fn add_class(module: &ModuleRc, namespace: &str, name: &str) -> CilTypeRc {
        let ty = CilType::new(
            module.alloc_token(TokenKind::TypeDef),
            namespace,
            name,
            CilFlavor::Class,
            TypeAttributes::empty(),
        );
        module.add_type(ty.clone());
        ty
    }

    #[test]
    fn tokens_allocate_per_kind() {
        let module = Module::new("Game");
        assert_eq!(module.alloc_token(TokenKind::TypeDef), Token::type_def(1));
        assert_eq!(module.alloc_token(TokenKind::TypeDef), Token::type_def(2));
        assert_eq!(module.alloc_token(TokenKind::Field), Token::field(1));
        assert_eq!(module.alloc_token(TokenKind::MethodDef), Token::method(1));
        assert_eq!(module.alloc_token(TokenKind::Field), Token::field(2));
    }

    #[test]
    fn find_type_walks_nested_segments() {
        let module = Module::new("Game");
        let outer = add_class(&module, "Game", "Main");
        let inner = CilType::new(
            module.alloc_token(TokenKind::TypeDef),
            "",
            "DrawState",
            CilFlavor::Class,
            TypeAttributes::NESTED_ASSEMBLY,
        );
        outer.add_nested(inner);

        assert!(module.find_type("Game.Main").is_some());
        let nested = module.find_type("Game.Main/DrawState").unwrap();
        assert_eq!(nested.full_name(), "Game.Main/DrawState");
        // '+' works as a nesting separator too
        assert!(module.find_type("Game.Main+DrawState").is_some());
        assert!(module.find_type("Game.Main/Missing").is_none());
    }

    #[test]
    fn nested_types_reach_their_module_through_enclosing() {
        let module = Module::new("Game");
        let outer = add_class(&module, "Game", "Main");
        let inner = CilType::new(
            module.alloc_token(TokenKind::TypeDef),
            "",
            "DrawState",
            CilFlavor::Class,
            TypeAttributes::NESTED_ASSEMBLY,
        );
        outer.add_nested(inner.clone());

        let owner = inner.module().unwrap();
        assert!(Arc::ptr_eq(&owner, &module));
    }

    #[test]
    fn remove_type_is_identity_based() {
        let module = Module::new("Game");
        let a = add_class(&module, "Game", "Player");
        let twin = CilType::new(
            Token::type_def(99),
            "Game",
            "Player",
            CilFlavor::Class,
            TypeAttributes::empty(),
        );

        assert!(module.remove_type(&twin).is_none());
        assert!(module.remove_type(&a).is_some());
        assert!(module.find_type("Game.Player").is_none());
    }

    #[test]
    fn resolve_type_reports_path_and_module() {
        let module = Module::new("Game");
        let err = module.resolve_type("Game.Missing").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Game.Missing"));
        assert!(message.contains("Game"));
    }

    #[test]
    fn derived_mvid_is_stable_per_name() {
        assert_eq!(Module::new("Game").mvid, Module::new("Game").mvid);
        assert_ne!(Module::new("Game").mvid, Module::new("Commands").mvid);
    }
}
