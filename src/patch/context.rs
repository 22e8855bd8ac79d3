//! The editing surface handed to every patch while it runs.
//!
//! A [`PatchContext`] wraps one [`TargetModule`] together with the container types the
//! application pipeline created for the current set and patch. Patches resolve game and
//! helper members through it by path, without caring which module a member currently
//! lives in: lookups try the support module first and fall back to the target, so a
//! helper keeps resolving by its original path right up until relocation re-homes it.
//! Resolution hands back ready-made instructions carrying identity operands, which stay
//! valid across relocation because the member itself moves, not its handle.

use std::sync::Arc;

use crate::assembly::{Instruction, InstructionRc};
use crate::metadata::field::FieldRc;
use crate::metadata::loader::TargetModule;
use crate::metadata::method::MethodRc;
use crate::metadata::module::ModuleRc;
use crate::metadata::typesystem::CilTypeRc;
use crate::Result;

/// Per-patch view of the module under edit.
pub struct PatchContext {
    target: Arc<TargetModule>,
    set_container: CilTypeRc,
    patch_container: CilTypeRc,
}

impl PatchContext {
    /// A context over `target` scoped to one set and patch container.
    #[must_use]
    pub fn new(
        target: Arc<TargetModule>,
        set_container: CilTypeRc,
        patch_container: CilTypeRc,
    ) -> Self {
        PatchContext {
            target,
            set_container,
            patch_container,
        }
    }

    /// The target being patched.
    #[must_use]
    pub fn target(&self) -> &Arc<TargetModule> {
        &self.target
    }

    /// The loaded target module graph.
    pub fn target_module(&self) -> Result<ModuleRc> {
        self.target.module()
    }

    /// The loaded support module copy.
    pub fn support_module(&self) -> Result<ModuleRc> {
        self.target.support()
    }

    /// The container type stamped with the set's version.
    #[must_use]
    pub fn set_container(&self) -> &CilTypeRc {
        &self.set_container
    }

    /// The nested container receiving this patch's relocated statics.
    #[must_use]
    pub fn patch_container(&self) -> &CilTypeRc {
        &self.patch_container
    }

    /// Resolve a type by path, searching the support module before the target.
    pub fn resolve_type(&self, type_path: &str) -> Result<CilTypeRc> {
        if let Ok(support) = self.target.support() {
            if let Ok(ty) = support.resolve_type(type_path) {
                return Ok(ty);
            }
        }
        self.target_module()?.resolve_type(type_path)
    }

    /// Resolve the first method called `name` on the type at `type_path`.
    pub fn resolve_method(&self, type_path: &str, name: &str) -> Result<MethodRc> {
        if let Ok(support) = self.target.support() {
            if let Some(found) = support
                .find_type(type_path)
                .and_then(|ty| ty.find_method(name))
            {
                return Ok(found);
            }
        }
        let ty = self.target_module()?.resolve_type(type_path)?;
        ty.find_method(name)
            .ok_or_else(|| unresolved_error!("no method {} on {}", name, type_path))
    }

    /// Resolve the field called `name` on the type at `type_path`.
    pub fn resolve_field(&self, type_path: &str, name: &str) -> Result<FieldRc> {
        if let Ok(support) = self.target.support() {
            if let Some(found) = support
                .find_type(type_path)
                .and_then(|ty| ty.find_field(name))
            {
                return Ok(found);
            }
        }
        let ty = self.target_module()?.resolve_type(type_path)?;
        ty.find_field(name)
            .ok_or_else(|| unresolved_error!("no field {} on {}", name, type_path))
    }

    /// A `call` instruction for the method at `type_path::name`.
    pub fn call(&self, type_path: &str, name: &str) -> Result<InstructionRc> {
        Ok(Instruction::call(&self.resolve_method(type_path, name)?))
    }

    /// A field load for `type_path::name`, by address when `by_ref` is set.
    ///
    /// The field's own staticness picks the opcode; loading an instance field still
    /// expects the receiver on the stack.
    pub fn load_field(&self, type_path: &str, name: &str, by_ref: bool) -> Result<InstructionRc> {
        let field = self.resolve_field(type_path, name)?;
        Ok(match (field.is_static(), by_ref) {
            (true, false) => Instruction::ldsfld(&field),
            (true, true) => Instruction::ldsflda(&field),
            (false, false) => Instruction::ldfld(&field),
            (false, true) => Instruction::ldflda(&field),
        })
    }

    /// A field store for `type_path::name`.
    pub fn store_field(&self, type_path: &str, name: &str) -> Result<InstructionRc> {
        let field = self.resolve_field(type_path, name)?;
        Ok(if field.is_static() {
            Instruction::stsfld(&field)
        } else {
            Instruction::stfld(&field)
        })
    }

    /// Move the support type at `type_path` into the target module.
    pub fn import_support_type(&self, type_path: &str) -> Result<CilTypeRc> {
        self.target.import_type(type_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{Opcode, Operand};
    use crate::metadata::builder::{FieldBuilder, MethodBuilder, ModuleBuilder, TypeBuilder};
    use crate::metadata::typesystem::TypeAttributes;

    fn context() -> PatchContext {
        let target = ModuleBuilder::new("Game.dll").build();
        let player = TypeBuilder::class("Game", "Player").build(&target);
        MethodBuilder::new("Update").build(&target, &player);
        FieldBuilder::new("health", &target.cor.i4).build(&target, &player);
        FieldBuilder::new("count", &target.cor.i4)
            .static_()
            .build(&target, &player);

        let support = ModuleBuilder::new("Support.dll").build();
        let hooks = TypeBuilder::class("Helpers", "Hooks").build(&support);
        MethodBuilder::new("OnUpdate").static_().build(&support, &hooks);

        let tm = Arc::new(TargetModule::new("Game.dll"));
        tm.attach(target.clone(), support);

        let set_container = TypeBuilder::class("PatchSets", "demo")
            .flags(TypeAttributes::ABSTRACT | TypeAttributes::SEALED)
            .build(&target);
        let patch_container = TypeBuilder::class("", "patch0")
            .nested_in(&set_container)
            .build(&target);
        PatchContext::new(tm, set_container, patch_container)
    }

    #[test]
    fn call_resolves_support_first_then_target() {
        let ctx = context();

        let helper = ctx.call("Helpers.Hooks", "OnUpdate").unwrap();
        let game = ctx.call("Game.Player", "Update").unwrap();
        for call in [&helper, &game] {
            assert_eq!(read_lock!(call).opcode, Opcode::Call);
        }
        match &read_lock!(helper).operand {
            Operand::Method(m) => assert_eq!(m.name, "OnUpdate"),
            other => panic!("expected method operand, got {other:?}"),
        };
    }

    #[test]
    fn unknown_member_is_unresolved() {
        let ctx = context();
        assert!(matches!(
            ctx.call("Game.Player", "Missing").unwrap_err(),
            crate::Error::UnresolvedMember(_)
        ));
        assert!(matches!(
            ctx.resolve_field("Game.Player", "missing").unwrap_err(),
            crate::Error::UnresolvedMember(_)
        ));
    }

    #[test]
    fn field_access_follows_staticness() {
        let ctx = context();

        let load = ctx.load_field("Game.Player", "health", false).unwrap();
        assert_eq!(read_lock!(load).opcode, Opcode::Ldfld);
        let load_ref = ctx.load_field("Game.Player", "health", true).unwrap();
        assert_eq!(read_lock!(load_ref).opcode, Opcode::Ldflda);
        let store = ctx.store_field("Game.Player", "health").unwrap();
        assert_eq!(read_lock!(store).opcode, Opcode::Stfld);

        let load_static = ctx.load_field("Game.Player", "count", false).unwrap();
        assert_eq!(read_lock!(load_static).opcode, Opcode::Ldsfld);
        let load_static_ref = ctx.load_field("Game.Player", "count", true).unwrap();
        assert_eq!(read_lock!(load_static_ref).opcode, Opcode::Ldsflda);
        let store_static = ctx.store_field("Game.Player", "count").unwrap();
        assert_eq!(read_lock!(store_static).opcode, Opcode::Stsfld);
    }

    #[test]
    fn import_goes_through_the_target_memo() {
        let ctx = context();
        let imported = ctx.import_support_type("Helpers.Hooks").unwrap();
        assert_eq!(imported.name(), "Hooks");
        assert!(ctx.support_module().unwrap().find_type("Helpers.Hooks").is_none());
        assert!(ctx.target_module().unwrap().find_type("Helpers.Hooks").is_some());
    }

    #[test]
    fn containers_are_exposed() {
        let ctx = context();
        assert_eq!(ctx.set_container().name(), "demo");
        assert_eq!(ctx.patch_container().name(), "patch0");
        assert_eq!(
            ctx.patch_container().full_name(),
            "PatchSets.demo/patch0"
        );
    }
}
