//! The assignability analyzer: may a value of one type flow into a slot of another?
//!
//! Injection synthesis asks this question for every bound parameter, and the answer
//! decides more than yes or no: [`Assignability::AssignableWithBox`] means the flow is
//! legal only through a boxing conversion, and the synthesizer must emit a `box`
//! instruction at the hand-off point. Getting that third state wrong produces code that
//! type-checks nowhere and crashes the patched binary at runtime, which is why the rules
//! here follow the runtime's widening model exactly rather than approximating with a
//! boolean.
//!
//! The rules, in evaluation order:
//!
//! 1. `void` never flows anywhere, in either direction.
//! 2. Structurally identical types flow freely.
//! 3. A primitive flows into `object` or anything on its declared base/interface chain,
//!    but only by boxing.
//! 4. `string` flows into `object` and its chain without boxing.
//! 5. Pointers and by-refs flow only into structurally identical wrappers.
//! 6. A user value type flows into `object`, the `System.ValueType` marker or its chain,
//!    always by boxing.
//! 7. A class, interface or array flows into `object`, itself or its chain, never boxing.
//! 8. A generic instantiation substitutes its concrete arguments into the open
//!    definition's chain before walking it; whether boxing applies follows the
//!    definition's value-typeness.
//!
//! Everything else is not assignable.

use crate::metadata::typesystem::{CilFlavor, CilType, CilTypeRc, CilTypeRef, CorTypes};
use strum::Display;

/// Outcome of an assignability query.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignability {
    /// The value cannot flow into the slot
    #[strum(serialize = "not assignable")]
    NotAssignable,
    /// The value flows as-is
    #[strum(serialize = "assignable")]
    Assignable,
    /// The value flows only through a boxing conversion
    #[strum(serialize = "assignable with box")]
    AssignableWithBox,
}

impl Assignability {
    /// `true` unless the flow is rejected outright.
    #[must_use]
    pub fn is_assignable(self) -> bool {
        self != Assignability::NotAssignable
    }

    /// `true` when the flow requires a boxing conversion.
    #[must_use]
    pub fn needs_box(self) -> bool {
        self == Assignability::AssignableWithBox
    }
}

/// May a value of `source` flow into a slot of type `target`?
#[must_use]
pub fn assignable_to(source: &CilTypeRc, target: &CilTypeRc) -> Assignability {
    if source.flavor() == CilFlavor::Void || target.flavor() == CilFlavor::Void {
        return Assignability::NotAssignable;
    }
    if source.same_as(target) {
        return Assignability::Assignable;
    }

    match source.flavor() {
        flavor if flavor.is_primitive() => {
            if target.flavor() == CilFlavor::Object
                || (is_named_target(target) && reaches_via_chain(source, target))
            {
                Assignability::AssignableWithBox
            } else {
                Assignability::NotAssignable
            }
        }
        CilFlavor::String => {
            if target.flavor() == CilFlavor::Object
                || (is_named_target(target) && reaches_via_chain(source, target))
            {
                Assignability::Assignable
            } else {
                Assignability::NotAssignable
            }
        }
        // wrappers match structurally or not at all, and identity was handled above
        CilFlavor::Pointer | CilFlavor::ByRef => Assignability::NotAssignable,
        CilFlavor::ValueType => {
            if target.flavor() == CilFlavor::Object
                || CorTypes::is_value_type_marker(target)
                || (is_named_target(target) && reaches_via_chain(source, target))
            {
                Assignability::AssignableWithBox
            } else {
                Assignability::NotAssignable
            }
        }
        CilFlavor::Class | CilFlavor::Interface | CilFlavor::Array => {
            if target.flavor() == CilFlavor::Object
                || (is_named_target(target) && reaches_via_chain(source, target))
            {
                Assignability::Assignable
            } else {
                Assignability::NotAssignable
            }
        }
        CilFlavor::GenericInstance => {
            let flows = target.flavor() == CilFlavor::Object
                || (is_named_target(target) && reaches_via_chain(source, target));
            if !flows {
                return Assignability::NotAssignable;
            }
            let boxed = source
                .generic_def()
                .is_some_and(|def| def.flavor().is_value_type());
            if boxed {
                Assignability::AssignableWithBox
            } else {
                Assignability::Assignable
            }
        }
        _ => Assignability::NotAssignable,
    }
}

/// Targets worth walking a chain towards: named definitions and instantiations.
fn is_named_target(target: &CilTypeRc) -> bool {
    matches!(
        target.flavor(),
        CilFlavor::Class
            | CilFlavor::ValueType
            | CilFlavor::Interface
            | CilFlavor::GenericInstance
    )
}

/// Does `target` appear anywhere on `source`'s declared base/interface chain?
///
/// A generic instantiation walks its open definition's chain with the concrete
/// arguments substituted in, so `List<int>` reaches `IEnumerable<int>` through the
/// declared `IEnumerable<!0>`.
fn reaches_via_chain(source: &CilTypeRc, target: &CilTypeRc) -> bool {
    let (definition, args): (CilTypeRc, &[CilTypeRc]) = match source.flavor() {
        CilFlavor::GenericInstance => match source.generic_def() {
            Some(def) => (def.clone(), source.generic_args()),
            None => return false,
        },
        _ => (source.clone(), &[]),
    };

    let mut entries: Vec<CilTypeRc> = Vec::new();
    if let Some(base) = definition.base() {
        entries.push(base);
    }
    entries.extend(
        read_lock!(definition.interfaces)
            .iter()
            .filter_map(CilTypeRef::upgrade),
    );

    for entry in entries {
        let entry = if args.is_empty() {
            entry
        } else {
            substitute(&entry, args)
        };
        if entry.same_as(target) || reaches_via_chain(&entry, target) {
            return true;
        }
    }
    false
}

/// Replace generic parameter placeholders with the instantiation's concrete arguments.
fn substitute(ty: &CilTypeRc, args: &[CilTypeRc]) -> CilTypeRc {
    match ty.flavor() {
        CilFlavor::GenericParameter { index } => args
            .get(index as usize)
            .cloned()
            .unwrap_or_else(|| ty.clone()),
        CilFlavor::GenericInstance => match ty.generic_def() {
            Some(def) => CilType::generic_instance(
                def,
                ty.generic_args()
                    .iter()
                    .map(|arg| substitute(arg, args))
                    .collect(),
            ),
            None => ty.clone(),
        },
        _ => ty.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::Token;
    use crate::metadata::typesystem::TypeAttributes;

    fn named(namespace: &str, name: &str, flavor: CilFlavor) -> CilTypeRc {
        CilType::new(
            Token::type_def(1),
            namespace,
            name,
            flavor,
            TypeAttributes::empty(),
        )
    }

    fn implements(ty: &CilTypeRc, interface: &CilTypeRc) {
        write_lock!(ty.interfaces).push(CilTypeRef::new(interface));
    }

    #[test]
    fn void_never_flows() {
        let cor = CorTypes::new();
        assert_eq!(
            assignable_to(&cor.void, &cor.object),
            Assignability::NotAssignable
        );
        assert_eq!(
            assignable_to(&cor.i4, &cor.void),
            Assignability::NotAssignable
        );
        assert_eq!(
            assignable_to(&cor.void, &cor.void),
            Assignability::NotAssignable
        );
    }

    #[test]
    fn identity_is_reflexive_across_flavors() {
        let cor = CorTypes::new();
        for ty in [&cor.i4, &cor.r8, &cor.string, &cor.object, &cor.int_ptr] {
            assert_eq!(assignable_to(ty, ty), Assignability::Assignable);
        }
        let player = named("Game", "Player", CilFlavor::Class);
        let same = named("Game", "Player", CilFlavor::Class);
        assert_eq!(assignable_to(&player, &same), Assignability::Assignable);
    }

    #[test]
    fn primitives_box_into_object_and_chain() {
        let cor = CorTypes::new();
        assert_eq!(
            assignable_to(&cor.i4, &cor.object),
            Assignability::AssignableWithBox
        );
        assert_eq!(
            assignable_to(&cor.boolean, &cor.object),
            Assignability::AssignableWithBox
        );
        // unrelated primitives stay apart
        assert_eq!(assignable_to(&cor.i4, &cor.i8), Assignability::NotAssignable);
        assert_eq!(assignable_to(&cor.i4, &cor.u4), Assignability::NotAssignable);

        // declared interface on the primitive's definition is reachable, boxed
        let comparable = named("System", "IComparable", CilFlavor::Interface);
        let int_def = named("System", "Int32", CilFlavor::I4);
        implements(&int_def, &comparable);
        assert_eq!(
            assignable_to(&int_def, &comparable),
            Assignability::AssignableWithBox
        );
        assert_eq!(
            assignable_to(&cor.i4, &comparable),
            Assignability::NotAssignable
        );
    }

    #[test]
    fn string_flows_without_boxing() {
        let cor = CorTypes::new();
        assert_eq!(
            assignable_to(&cor.string, &cor.object),
            Assignability::Assignable
        );
        assert_eq!(
            assignable_to(&cor.string, &cor.i4),
            Assignability::NotAssignable
        );
    }

    #[test]
    fn byrefs_demand_structural_identity() {
        let cor = CorTypes::new();
        let ref_i4 = CilType::byref(&cor.i4);
        let ref_i4_again = CilType::byref(&cor.i4);
        let ref_i8 = CilType::byref(&cor.i8);

        assert_eq!(
            assignable_to(&ref_i4, &ref_i4_again),
            Assignability::Assignable
        );
        assert_eq!(
            assignable_to(&ref_i4, &ref_i8),
            Assignability::NotAssignable
        );
        assert_eq!(
            assignable_to(&ref_i4, &cor.object),
            Assignability::NotAssignable
        );
        let ptr = CilType::pointer(&cor.u1);
        assert_eq!(
            assignable_to(&ptr, &CilType::pointer(&cor.u1)),
            Assignability::Assignable
        );
        assert_eq!(assignable_to(&ptr, &ref_i4), Assignability::NotAssignable);
    }

    #[test]
    fn value_types_always_box_out() {
        let cor = CorTypes::new();
        let point = named("Game", "Point", CilFlavor::ValueType);
        point.set_base(&cor.value_type);

        assert_eq!(
            assignable_to(&point, &cor.object),
            Assignability::AssignableWithBox
        );
        assert_eq!(
            assignable_to(&point, &cor.value_type),
            Assignability::AssignableWithBox
        );
        let unrelated = named("Game", "Npc", CilFlavor::Class);
        assert_eq!(
            assignable_to(&point, &unrelated),
            Assignability::NotAssignable
        );
    }

    #[test]
    fn classes_flow_up_their_chain() {
        let cor = CorTypes::new();
        let entity = named("Game", "Entity", CilFlavor::Class);
        let drawable = named("Game", "IDrawable", CilFlavor::Interface);
        let player = named("Game", "Player", CilFlavor::Class);
        player.set_base(&entity);
        implements(&player, &drawable);

        assert_eq!(assignable_to(&player, &entity), Assignability::Assignable);
        assert_eq!(assignable_to(&player, &drawable), Assignability::Assignable);
        assert_eq!(assignable_to(&player, &cor.object), Assignability::Assignable);
        // arrow points one way
        assert_eq!(assignable_to(&entity, &player), Assignability::NotAssignable);

        let npc = named("Game", "Npc", CilFlavor::Class);
        npc.set_base(&entity);
        assert_eq!(assignable_to(&player, &npc), Assignability::NotAssignable);
    }

    #[test]
    fn deep_chains_resolve() {
        let a = named("Game", "A", CilFlavor::Class);
        let b = named("Game", "B", CilFlavor::Class);
        let c = named("Game", "C", CilFlavor::Class);
        b.set_base(&a);
        c.set_base(&b);
        assert_eq!(assignable_to(&c, &a), Assignability::Assignable);
    }

    #[test]
    fn arrays_are_reference_shaped() {
        let cor = CorTypes::new();
        let ints = CilType::array(&cor.i4);
        assert_eq!(assignable_to(&ints, &cor.object), Assignability::Assignable);
        assert_eq!(
            assignable_to(&ints, &CilType::array(&cor.i4)),
            Assignability::Assignable
        );
        assert_eq!(
            assignable_to(&ints, &CilType::array(&cor.i8)),
            Assignability::NotAssignable
        );
    }

    #[test]
    fn generic_instantiations_substitute_before_walking() {
        let cor = CorTypes::new();
        let enumerable = named("System.Collections.Generic", "IEnumerable`1", CilFlavor::Interface);
        let list = named("System.Collections.Generic", "List`1", CilFlavor::Class);
        // List<!0> declares IEnumerable<!0>
        let open_iface =
            CilType::generic_instance(&enumerable, vec![CilType::generic_parameter(0)]);
        write_lock!(list.interfaces).push(CilTypeRef::new(&open_iface));

        let list_i4 = CilType::generic_instance(&list, vec![cor.i4.clone()]);
        let iface_i4 = CilType::generic_instance(&enumerable, vec![cor.i4.clone()]);
        let iface_i8 = CilType::generic_instance(&enumerable, vec![cor.i8.clone()]);

        assert_eq!(assignable_to(&list_i4, &iface_i4), Assignability::Assignable);
        assert_eq!(
            assignable_to(&list_i4, &iface_i8),
            Assignability::NotAssignable
        );
        assert_eq!(
            assignable_to(&list_i4, &cor.object),
            Assignability::Assignable
        );

        // keep the open interface alive for the duration of the walk
        drop(open_iface);
    }

    #[test]
    fn value_type_instantiations_box_out() {
        let cor = CorTypes::new();
        let nullable = named("System", "Nullable`1", CilFlavor::ValueType);
        let of_i4 = CilType::generic_instance(&nullable, vec![cor.i4.clone()]);
        assert_eq!(
            assignable_to(&of_i4, &cor.object),
            Assignability::AssignableWithBox
        );
    }

    #[test]
    fn object_source_only_matches_itself() {
        let cor = CorTypes::new();
        let player = named("Game", "Player", CilFlavor::Class);
        assert_eq!(
            assignable_to(&cor.object, &cor.object),
            Assignability::Assignable
        );
        assert_eq!(
            assignable_to(&cor.object, &player),
            Assignability::NotAssignable
        );
        assert_eq!(
            assignable_to(&cor.object, &cor.string),
            Assignability::NotAssignable
        );
    }
}
