//! Relocation of support members into the target module.
//!
//! Helper code that patches call lives in the support module, which is never shipped.
//! After a set's patches have run, the static members and nested types of each declared
//! support type move into the container types created inside the target module, so every
//! call and field access the synthesizer emitted keeps resolving after the support module
//! is discarded. Moves happen by identity: the member's handle stays the same, only its
//! declaring type changes, which is exactly why instruction operands survive relocation
//! untouched.
//!
//! Two member tags change the default move:
//!
//! - [`MemberTag::EngineInternal`] members serve the patching machinery itself and stay
//!   behind in the support module.
//! - [`MemberTag::ReverseAccessor`] static delegate fields move, and additionally get
//!   wired in the container's static initializer to call one original target method
//!   directly, visibility-widened if needed. Patched code uses them to reach the
//!   pre-patch behavior.

use tracing::debug;

use crate::assembly::{editor, Instruction, MethodBody};
use crate::metadata::field::FieldRc;
use crate::metadata::method::{Method, MethodAccessFlags, MethodModifiers, MethodRc, Param};
use crate::metadata::module::ModuleRc;
use crate::metadata::token::TokenKind;
use crate::metadata::typesystem::CilTypeRc;
use crate::patch::target::PatchTarget;
use crate::patch::{MemberTag, SupportDecl};
use crate::Result;

/// Move the declared support type's members into `container`.
///
/// The support type itself stays behind as an empty shell. When the type is no longer in
/// the support module at all (a patch imported it wholesale), there is nothing left to
/// move and the call is a no-op.
pub fn relocate_support(
    target_module: &ModuleRc,
    support_module: &ModuleRc,
    decl: &SupportDecl,
    container: &CilTypeRc,
) -> Result<()> {
    let Some(support_ty) = support_module.find_type(decl.type_path()) else {
        debug!(
            support_type = decl.type_path(),
            "support type already imported wholesale, skipping relocation"
        );
        return Ok(());
    };

    let mut moved = 0usize;

    let nested: Vec<CilTypeRc> = read_lock!(support_ty.nested_types).clone();
    for ty in nested {
        if matches!(decl.tag_for(&ty.name()), Some(MemberTag::EngineInternal)) {
            continue;
        }
        if let Some(taken) = support_ty.remove_nested(&ty) {
            container.add_nested(taken);
            moved += 1;
        }
    }

    let fields: Vec<FieldRc> = read_lock!(support_ty.fields).clone();
    for field in fields {
        if !field.is_static() {
            continue;
        }
        match decl.tag_for(&field.name) {
            Some(MemberTag::EngineInternal) => {}
            Some(MemberTag::ReverseAccessor(accessor_target)) => {
                if let Some(taken) = support_ty.remove_field(&field) {
                    container.add_field(taken);
                    moved += 1;
                }
                wire_reverse_accessor(target_module, container, &field, accessor_target)?;
            }
            None => {
                if let Some(taken) = support_ty.remove_field(&field) {
                    container.add_field(taken);
                    moved += 1;
                }
            }
        }
    }

    let methods: Vec<MethodRc> = read_lock!(support_ty.methods).clone();
    for method in methods {
        if !method.is_static() {
            continue;
        }
        if matches!(decl.tag_for(&method.name), Some(MemberTag::EngineInternal)) {
            continue;
        }
        if let Some(taken) = support_ty.remove_method(&method) {
            container.add_method(taken);
            moved += 1;
        }
    }

    debug!(
        support_type = decl.type_path(),
        container = %container.full_name(),
        moved,
        "relocated support members"
    );
    Ok(())
}

/// Point a relocated delegate field at an original target method.
///
/// Emits `ldnull; ldftn target; newobj delegate-ctor; stsfld field` in front of the
/// container's static initializer tail, widening the target's visibility so the call
/// stays verifiable from anywhere in the patched module.
fn wire_reverse_accessor(
    target_module: &ModuleRc,
    container: &CilTypeRc,
    field: &FieldRc,
    accessor_target: &PatchTarget,
) -> Result<()> {
    let methods = accessor_target.resolve(target_module)?;
    if methods.len() != 1 {
        return Err(unresolved_error!(
            "reverse accessor '{}' must resolve exactly one method, found {}",
            accessor_target.label(),
            methods.len()
        ));
    }
    let method = &methods[0];
    method.widen_access();

    let delegate_ctor = delegate_constructor(target_module, &field.ty);
    let initializer = static_initializer(target_module, container);

    let mut guard = write_lock!(initializer.body);
    let body = guard.as_mut().ok_or_else(|| {
        crate::Error::Error(format!(
            "static initializer of '{}' has no body",
            container.full_name()
        ))
    })?;
    let before_tail = body.len().saturating_sub(1);
    editor::insert_all_at(
        body,
        before_tail,
        vec![
            Instruction::ldnull(),
            Instruction::ldftn(method),
            Instruction::newobj(&delegate_ctor),
            Instruction::stsfld(field),
        ],
    );

    debug!(
        field = %field.full_name(),
        target = %method.full_name(),
        "wired reverse accessor"
    );
    Ok(())
}

/// The `(object, native int)` constructor every delegate type carries.
///
/// Loaded delegate types may not have it materialized in the graph; in that case a
/// body-less, runtime-provided one is added.
fn delegate_constructor(module: &ModuleRc, delegate_ty: &CilTypeRc) -> MethodRc {
    if let Some(existing) = delegate_ty.find_method(".ctor") {
        return existing;
    }
    let ctor = Method::new(
        module.alloc_token(TokenKind::MethodDef),
        ".ctor",
        MethodAccessFlags::PUBLIC,
        MethodModifiers::HIDE_BY_SIG
            | MethodModifiers::SPECIAL_NAME
            | MethodModifiers::RTSPECIAL_NAME,
        vec![
            Param::new("object", &module.cor.object),
            Param::new("method", &module.cor.int_ptr),
        ],
        &module.cor.void,
    );
    delegate_ty.add_method(ctor.clone());
    ctor
}

/// The container's static initializer, created with an empty `ret` body when absent.
fn static_initializer(module: &ModuleRc, container: &CilTypeRc) -> MethodRc {
    if let Some(existing) = container.static_constructor() {
        return existing;
    }
    let cctor = Method::new(
        module.alloc_token(TokenKind::MethodDef),
        ".cctor",
        MethodAccessFlags::PRIVATE,
        MethodModifiers::STATIC
            | MethodModifiers::HIDE_BY_SIG
            | MethodModifiers::SPECIAL_NAME
            | MethodModifiers::RTSPECIAL_NAME,
        Vec::new(),
        &module.cor.void,
    );
    let mut body = MethodBody::new();
    body.push(Instruction::ret());
    cctor.set_body(body);
    container.add_method(cctor.clone());
    cctor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{Opcode, Operand};
    use crate::metadata::builder::{FieldBuilder, MethodBuilder, ModuleBuilder, TypeBuilder};
    use crate::metadata::field::FieldAttributes;
    use crate::metadata::typesystem::{CilFlavor, TypeAttributes};
    use std::sync::Arc;

    struct Fixture {
        target: ModuleRc,
        support: ModuleRc,
        container: CilTypeRc,
    }

    fn fixture() -> Fixture {
        let target = ModuleBuilder::new("Game.dll").build();
        let support = ModuleBuilder::new("Support.dll").build();
        let container = TypeBuilder::class("PatchSets", "test-set")
            .flags(TypeAttributes::ABSTRACT | TypeAttributes::SEALED)
            .build(&target);
        Fixture {
            target,
            support,
            container,
        }
    }

    #[test]
    fn static_members_move_into_the_container() {
        let fx = fixture();
        let hooks = TypeBuilder::class("Helpers", "Hooks").build(&fx.support);
        let on_update = MethodBuilder::new("OnUpdate").static_().build(&fx.support, &hooks);
        let _helper = MethodBuilder::new("helper").build(&fx.support, &hooks); // instance
        FieldBuilder::new("counter", &fx.support.cor.i4)
            .static_()
            .build(&fx.support, &hooks);
        TypeBuilder::class("", "Inner").nested_in(&hooks).build(&fx.support);

        let decl = SupportDecl::new("Helpers.Hooks");
        relocate_support(&fx.target, &fx.support, &decl, &fx.container).unwrap();

        // statics and nested types moved, instance members stayed
        assert!(fx.container.find_method("OnUpdate").is_some());
        assert!(fx.container.find_field("counter").is_some());
        assert!(fx.container.find_nested("Inner").is_some());
        assert!(hooks.find_method("OnUpdate").is_none());
        assert!(hooks.find_method("helper").is_some());

        // identity survived the move, so call operands keep resolving
        assert!(Arc::ptr_eq(
            &fx.container.find_method("OnUpdate").unwrap(),
            &on_update
        ));
        assert_eq!(on_update.full_name(), "PatchSets.test-set::OnUpdate");
    }

    #[test]
    fn engine_internal_members_stay_behind() {
        let fx = fixture();
        let hooks = TypeBuilder::class("Helpers", "Hooks").build(&fx.support);
        MethodBuilder::new("OnUpdate").static_().build(&fx.support, &hooks);
        MethodBuilder::new("Bootstrap").static_().build(&fx.support, &hooks);

        let decl = SupportDecl::new("Helpers.Hooks").tag("Bootstrap", MemberTag::EngineInternal);
        relocate_support(&fx.target, &fx.support, &decl, &fx.container).unwrap();

        assert!(fx.container.find_method("OnUpdate").is_some());
        assert!(fx.container.find_method("Bootstrap").is_none());
        assert!(hooks.find_method("Bootstrap").is_some());
    }

    #[test]
    fn missing_support_type_is_a_no_op() {
        let fx = fixture();
        let decl = SupportDecl::new("Helpers.Gone");
        relocate_support(&fx.target, &fx.support, &decl, &fx.container).unwrap();
        assert!(read_lock!(fx.container.methods).is_empty());
    }

    #[test]
    fn reverse_accessor_wires_the_static_initializer() {
        let fx = fixture();
        // original target method, private instance
        let player = TypeBuilder::class("Game", "Player").build(&fx.target);
        let hurt = MethodBuilder::new("Hurt")
            .access(MethodAccessFlags::PRIVATE)
            .param("damage", &fx.target.cor.i4)
            .implementation(|asm| {
                asm.ret();
            })
            .unwrap()
            .build(&fx.target, &player);

        // delegate-typed static field on the support type
        let hurt_delegate = TypeBuilder::class("Helpers", "HurtHandler").build(&fx.support);
        let hooks = TypeBuilder::class("Helpers", "Hooks").build(&fx.support);
        let original = FieldBuilder::new("OriginalHurt", &hurt_delegate)
            .flags(FieldAttributes::ASSEMBLY | FieldAttributes::STATIC)
            .build(&fx.support, &hooks);

        let decl = SupportDecl::new("Helpers.Hooks").tag(
            "OriginalHurt",
            MemberTag::ReverseAccessor(PatchTarget::method("Game.Player", "Hurt")),
        );
        relocate_support(&fx.target, &fx.support, &decl, &fx.container).unwrap();

        // field moved, target visibility widened
        assert!(fx.container.find_field("OriginalHurt").is_some());
        assert_eq!(hurt.access(), MethodAccessFlags::ASSEM);

        // cctor created with the wiring sequence in front of its ret
        let cctor = fx.container.static_constructor().unwrap();
        let body = read_lock!(cctor.body);
        let body = body.as_ref().unwrap();
        let ops: Vec<Opcode> = body
            .instructions
            .iter()
            .map(|i| read_lock!(i).opcode)
            .collect();
        assert_eq!(
            ops,
            vec![
                Opcode::Ldnull,
                Opcode::Ldftn,
                Opcode::Newobj,
                Opcode::Stsfld,
                Opcode::Ret,
            ]
        );
        match &read_lock!(body.instructions[1]).operand {
            Operand::Method(m) => assert!(Arc::ptr_eq(m, &hurt)),
            other => panic!("expected method operand, got {other:?}"),
        }
        match &read_lock!(body.instructions[3]).operand {
            Operand::Field(f) => assert!(Arc::ptr_eq(f, &original)),
            other => panic!("expected field operand, got {other:?}"),
        }
        // the delegate constructor was materialized on the delegate type
        let ctor = hurt_delegate.find_method(".ctor").unwrap();
        assert_eq!(ctor.params.len(), 2);
        assert_eq!(ctor.params[1].ty.flavor(), CilFlavor::I);
    }

    #[test]
    fn second_accessor_reuses_the_initializer() {
        let fx = fixture();
        let player = TypeBuilder::class("Game", "Player").build(&fx.target);
        MethodBuilder::new("Hurt")
            .implementation(|asm| {
                asm.ret();
            })
            .unwrap()
            .build(&fx.target, &player);
        MethodBuilder::new("Heal")
            .implementation(|asm| {
                asm.ret();
            })
            .unwrap()
            .build(&fx.target, &player);

        let handler = TypeBuilder::class("Helpers", "Handler").build(&fx.support);
        let hooks = TypeBuilder::class("Helpers", "Hooks").build(&fx.support);
        FieldBuilder::new("OriginalHurt", &handler)
            .flags(FieldAttributes::ASSEMBLY | FieldAttributes::STATIC)
            .build(&fx.support, &hooks);
        FieldBuilder::new("OriginalHeal", &handler)
            .flags(FieldAttributes::ASSEMBLY | FieldAttributes::STATIC)
            .build(&fx.support, &hooks);

        let decl = SupportDecl::new("Helpers.Hooks")
            .tag(
                "OriginalHurt",
                MemberTag::ReverseAccessor(PatchTarget::method("Game.Player", "Hurt")),
            )
            .tag(
                "OriginalHeal",
                MemberTag::ReverseAccessor(PatchTarget::method("Game.Player", "Heal")),
            );
        relocate_support(&fx.target, &fx.support, &decl, &fx.container).unwrap();

        let cctor = fx.container.static_constructor().unwrap();
        let body = read_lock!(cctor.body);
        let body = body.as_ref().unwrap();
        // two wiring sequences share one initializer, ret stays last
        assert_eq!(body.len(), 9);
        assert_eq!(
            read_lock!(body.instructions[8]).opcode,
            Opcode::Ret
        );
        assert_eq!(read_lock!(fx.container.methods).len(), 1);
    }

    #[test]
    fn ambiguous_accessor_target_is_rejected() {
        let fx = fixture();
        let player = TypeBuilder::class("Game", "Player").build(&fx.target);
        MethodBuilder::new("Hurt")
            .param("damage", &fx.target.cor.i4)
            .build(&fx.target, &player);
        MethodBuilder::new("Hurt")
            .param("damage", &fx.target.cor.i4)
            .param("quiet", &fx.target.cor.boolean)
            .build(&fx.target, &player);

        let handler = TypeBuilder::class("Helpers", "Handler").build(&fx.support);
        let hooks = TypeBuilder::class("Helpers", "Hooks").build(&fx.support);
        FieldBuilder::new("Original", &handler)
            .flags(FieldAttributes::ASSEMBLY | FieldAttributes::STATIC)
            .build(&fx.support, &hooks);

        let decl = SupportDecl::new("Helpers.Hooks").tag(
            "Original",
            MemberTag::ReverseAccessor(PatchTarget::methods("Game.Player", "Hurt")),
        );
        let err = relocate_support(&fx.target, &fx.support, &decl, &fx.container).unwrap_err();
        assert!(matches!(err, crate::Error::UnresolvedMember(_)));
    }
}
