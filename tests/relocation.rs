//! Support relocation scenarios.
//!
//! Patch sets carry their helper code in a separate support module; application moves
//! the declared members into the container type synthesized inside the target, so the
//! patched module stands alone. These tests drive that move through the runner and
//! verify the results in the graph and, for reverse accessors, by executing the wired
//! delegate in the evaluator.

use std::sync::Arc;

use cilpatch::prelude::*;

fn loader_for(game: &ModuleRc, support: &ModuleRc) -> Arc<MemoryLoader> {
    let loader = Arc::new(MemoryLoader::new());
    loader.insert("Game.dll", game.clone());
    loader.insert("Support.dll", support.clone());
    loader
}

fn run_set(game: &ModuleRc, support: &ModuleRc, set: PatchSet) -> RunReport {
    let mut patcher = Patcher::new(Box::new(loader_for(game, support)), "Support.dll");
    patcher.add_target("Game.dll");
    patcher.add_set(set, true);
    patcher.run(|_, _| {}).expect("run succeeds")
}

#[test]
fn reverse_accessor_reaches_a_private_method() {
    let game = ModuleBuilder::new("Game").build();
    let secrets = TypeBuilder::class("Game", "Secrets").build(&game);
    let bonus = MethodBuilder::new("Bonus")
        .static_()
        .access(MethodAccessFlags::PRIVATE)
        .param("base", &game.cor.i4)
        .returns(&game.cor.i4)
        .implementation(|asm| {
            asm.ldarg(0).ldc_i4(10).op(Opcode::Add).ret();
        })
        .expect("assemble Bonus")
        .build(&game, &secrets);

    let support = ModuleBuilder::new("Support").build();
    // delegate shape: body-less Invoke, the runtime provides the dispatch
    let bonus_fn = TypeBuilder::class("Helpers", "BonusFn").build(&support);
    let invoke = MethodBuilder::new("Invoke")
        .param("base", &support.cor.i4)
        .returns(&support.cor.i4)
        .build(&support, &bonus_fn);
    let hooks = TypeBuilder::class("Helpers", "Hooks").build(&support);
    let original = FieldBuilder::new("Original", &bonus_fn)
        .static_()
        .build(&support, &hooks);
    let _ = MethodBuilder::new("CallOriginal")
        .static_()
        .param("base", &support.cor.i4)
        .returns(&support.cor.i4)
        .implementation(|asm| {
            asm.ldsfld(&original).ldarg(0).callvirt(&invoke).ret();
        })
        .expect("assemble CallOriginal")
        .build(&support, &hooks);

    let set = PatchSet::build("open-the-door", PatchVersion::new(1, 0))
        .module("Game")
        .support(SupportDecl::new("Helpers.Hooks").tag(
            "Original",
            MemberTag::ReverseAccessor(PatchTarget::method("Game.Secrets", "Bonus")),
        ))
        .finish();
    run_set(&game, &support, set);

    // the target opened up far enough for cross-type calls inside the module
    assert_eq!(bonus.access(), MethodAccessFlags::ASSEM);

    let container = game
        .find_type("PatchSets.open-the-door")
        .expect("set container");
    let call_original = container
        .find_method("CallOriginal")
        .expect("relocated probe method");
    let initializer = container
        .static_constructor()
        .expect("synthesized static initializer");

    let mut interp = Interpreter::new();
    interp
        .invoke(&initializer, Vec::new())
        .expect("delegate wiring runs");
    let value = interp
        .invoke(&call_original, vec![Value::I32(5)])
        .expect("evaluation");
    assert_eq!(value, Value::I32(15));
}

#[test]
fn engine_internal_members_stay_behind() {
    let game = ModuleBuilder::new("Game").build();
    let support = ModuleBuilder::new("Support").build();
    let hooks = TypeBuilder::class("Helpers", "Hooks").build(&support);
    let _ = FieldBuilder::new("scratch", &support.cor.i4)
        .static_()
        .build(&support, &hooks);
    let _ = FieldBuilder::new("loader_state", &support.cor.object)
        .static_()
        .build(&support, &hooks);
    let _ = MethodBuilder::new("Boot")
        .static_()
        .implementation(|asm| {
            asm.ret();
        })
        .expect("assemble Boot")
        .build(&support, &hooks);

    let set = PatchSet::build("partial-move", PatchVersion::new(1, 0))
        .module("Game")
        .support(
            SupportDecl::new("Helpers.Hooks")
                .tag("loader_state", MemberTag::EngineInternal)
                .tag("Boot", MemberTag::EngineInternal),
        )
        .finish();
    run_set(&game, &support, set);

    let container = game
        .find_type("PatchSets.partial-move")
        .expect("set container");
    assert!(container.find_field("scratch").is_some());
    assert!(container.find_field("loader_state").is_none());
    assert!(container.find_method("Boot").is_none());

    // engine plumbing keeps living in the support module
    assert!(hooks.find_field("loader_state").is_some());
    assert!(hooks.find_method("Boot").is_some());
    assert!(hooks.find_field("scratch").is_none());
}

#[test]
fn support_types_import_wholesale_through_the_context() {
    let game = ModuleBuilder::new("Game").build();
    let player = TypeBuilder::class("Game", "Player").build(&game);
    let _ = MethodBuilder::new("Update")
        .implementation(|asm| {
            asm.ret();
        })
        .expect("assemble Update")
        .build(&game, &player);

    let support = ModuleBuilder::new("Support").build();
    let _ = TypeBuilder::class("Helpers", "Widget").build(&support);

    let set = PatchSet::build("bring-a-widget", PatchVersion::new(1, 0))
        .module("Game")
        .patch_fn(
            "pull in the widget",
            PatchTarget::method("Game.Player", "Update"),
            |ctx, _method| {
                let first = ctx.import_support_type("Helpers.Widget")?;
                let second = ctx.import_support_type("Helpers.Widget")?;
                assert!(Arc::ptr_eq(&first, &second));
                Ok(())
            },
        )
        .finish();
    run_set(&game, &support, set);

    assert!(game.find_type("Helpers.Widget").is_some());
    assert!(support.find_type("Helpers.Widget").is_none());
}

#[test]
fn absent_support_type_leaves_the_container_empty() {
    let game = ModuleBuilder::new("Game").build();
    let support = ModuleBuilder::new("Support").build();

    let set = PatchSet::build("nothing-to-move", PatchVersion::new(1, 0))
        .module("Game")
        .support(SupportDecl::new("Helpers.Nothing"))
        .finish();
    let report = run_set(&game, &support, set);
    assert_eq!(report.applied, vec!["nothing-to-move".to_string()]);

    let container = game
        .find_type("PatchSets.nothing-to-move")
        .expect("set container");
    assert_eq!(container.version_marker(), Some(PatchVersion::new(1, 0)));
}
