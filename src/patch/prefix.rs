//! Prefix/postfix injection around existing method bodies.
//!
//! A [`PrefixPatch`] wraps a target method with calls into static helper methods named
//! `Prefix` and `Postfix` on a declared support type, without disturbing the original
//! body: the prefix is spliced in front, the postfix is appended behind, and every
//! existing return is rerouted through the postfix. Which values the helpers receive is
//! driven entirely by their parameter names:
//!
//! - `__instance` - the receiver of the original call; invalid on static targets
//! - `__state` - a local slot shared between prefix and postfix, typed from the first
//!   declaration that introduces it; must be by-reference in the prefix
//! - `__result` - the value the target will return; in a prefix the value returned when
//!   the original body is skipped, in a postfix the value the body actually computed
//! - `___name` - the field `name` on the target's declaring type
//! - `__N` - the target's argument slot `N`, receiver included for instance methods
//! - any other name - the target parameter with exactly that name
//!
//! Each binding may be declared by value or by reference. By-value bindings copy (and
//! dereference a by-ref slot first); by-reference bindings hand the helper read-write
//! access to the original. Every by-value binding runs through the assignability
//! analyzer and picks up a `box` instruction when the verdict requires one.
//!
//! A prefix returning `bool` can veto the original body: `true` falls through into it,
//! `false` skips straight to the return path, which on a value-returning target hands
//! back whatever the prefix left in `__result`.

use tracing::debug;

use crate::analysis::{assignable_to, Assignability};
use crate::assembly::{editor, Instruction, InstructionRc, InstructionRef, Local, LocalRc, MethodBody, Opcode, Operand};
use crate::metadata::method::{ArgSlot, MethodRc, Param};
use crate::metadata::typesystem::{CilFlavor, CilType};
use crate::patch::context::PatchContext;
use crate::patch::target::PatchTarget;
use crate::patch::{MemberTag, Patch, SupportDecl};
use crate::Result;

/// A patch that brackets its targets with `Prefix`/`Postfix` helper calls.
pub struct PrefixPatch {
    name: String,
    target: PatchTarget,
    support_type: String,
    postfix_optional: bool,
    support: SupportDecl,
}

impl PrefixPatch {
    /// Bracket `target` with the `Prefix`/`Postfix` methods of the support type at
    /// `support_type`.
    #[must_use]
    pub fn new(name: &str, target: PatchTarget, support_type: &str) -> Self {
        PrefixPatch {
            name: name.to_string(),
            target,
            support_type: support_type.to_string(),
            postfix_optional: false,
            support: SupportDecl::new(support_type),
        }
    }

    /// Let early returns in the original body bypass the postfix.
    ///
    /// Only the fall-through tail of the method runs the postfix then; returns from the
    /// middle of the body keep returning directly.
    #[must_use]
    pub fn postfix_optional(mut self) -> Self {
        self.postfix_optional = true;
        self
    }

    /// Tag a member of the support type for relocation.
    #[must_use]
    pub fn tag(mut self, member: &str, tag: MemberTag) -> Self {
        self.support = self.support.tag(member, tag);
        self
    }

    /// The shared `__result` slot, reused across prefix and postfix of one target.
    fn result_local(method: &MethodRc, body: &mut MethodBody) -> Result<LocalRc> {
        if !method.has_return() {
            return Err(incompatible_error!(
                "__result injection is not valid on void target {}",
                method.full_name()
            ));
        }
        if let Some(existing) = body.find_local("__result") {
            return Ok(existing);
        }
        Ok(body.add_local(Local::new("__result", &method.return_type)))
    }
}

impl Patch for PrefixPatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> &PatchTarget {
        &self.target
    }

    fn support(&self) -> Option<&SupportDecl> {
        Some(&self.support)
    }

    fn apply(&self, ctx: &PatchContext, method: &MethodRc) -> Result<()> {
        let support_ty = ctx.resolve_type(&self.support_type)?;
        let prefix = support_ty.find_method("Prefix");
        let postfix = support_ty.find_method("Postfix");
        if prefix.is_none() && postfix.is_none() {
            return Err(incompatible_error!(
                "support type {} declares neither Prefix nor Postfix",
                self.support_type
            ));
        }

        let mut guard = write_lock!(method.body);
        let body = guard.as_mut().ok_or_else(|| {
            crate::Error::Error(format!("target '{}' has no body", method.full_name()))
        })?;

        let mut state_local: Option<LocalRc> = None;
        let mut result_local: Option<LocalRc> = None;

        if let Some(prefix) = &prefix {
            if prefix
                .params
                .iter()
                .any(|p| p.name.as_deref() == Some("__result"))
            {
                result_local = Some(Self::result_local(method, body)?);
            }
            if let Some(param) = prefix
                .params
                .iter()
                .find(|p| p.name.as_deref() == Some("__state"))
            {
                if !param.is_by_ref() {
                    return Err(incompatible_error!(
                        "__state in prefix {} must be a by-reference parameter",
                        prefix.full_name()
                    ));
                }
                state_local =
                    Some(body.add_local(Local::new("__state", param.element_type())));
            }

            let original_first = body.first();
            let original_last = body.last();

            let mut head = bind_arguments(
                method,
                prefix,
                true,
                state_local.as_ref(),
                result_local.as_ref(),
            )?;
            head.push(Instruction::call(prefix));

            if prefix.return_type.flavor() == CilFlavor::Boolean {
                if let Some(result) = &result_local {
                    let first = original_first.ok_or_else(|| {
                        crate::Error::Error(format!(
                            "target '{}' has an empty body",
                            method.full_name()
                        ))
                    })?;
                    // true falls through into the original body; false returns __result
                    head.push(Instruction::brtrue(&first));
                    head.push(Instruction::ldloc(result));
                    head.push(Instruction::ret());
                } else {
                    if method.has_return() {
                        return Err(incompatible_error!(
                            "bool prefix on value-returning target {} needs an out __result parameter",
                            method.full_name()
                        ));
                    }
                    let last = original_last.ok_or_else(|| {
                        crate::Error::Error(format!(
                            "target '{}' has an empty body",
                            method.full_name()
                        ))
                    })?;
                    head.push(Instruction::brfalse(&last));
                }
            } else if prefix.has_return() {
                return Err(incompatible_error!(
                    "prefix {} must return bool or nothing, not {}",
                    prefix.full_name(),
                    prefix.return_type.full_name()
                ));
            }

            debug!(
                target_method = %method.full_name(),
                instructions = head.len(),
                "splicing prefix"
            );
            editor::insert_all_at(body, 0, head);
        }

        if let Some(postfix) = &postfix {
            if result_local.is_none() && method.has_return() {
                result_local = Some(Self::result_local(method, body)?);
            }
            if state_local.is_none() {
                if let Some(param) = postfix
                    .params
                    .iter()
                    .find(|p| p.name.as_deref() == Some("__state"))
                {
                    // no prefix introduced the slot, so the zero-initialized local is
                    // typed from the postfix declaration
                    state_local =
                        Some(body.add_local(Local::new("__state", param.element_type())));
                }
            }

            let mut tail: Vec<InstructionRc> = Vec::new();
            if let Some(result) = &result_local {
                // the original return value is on the stack at every rerouted return
                tail.push(Instruction::stloc(result));
            }
            tail.extend(bind_arguments(
                method,
                postfix,
                false,
                state_local.as_ref(),
                result_local.as_ref(),
            )?);
            tail.push(Instruction::call(postfix));

            if let Some(result) = &result_local {
                if postfix.has_return() {
                    // pass-through postfix: its return value replaces the original's
                    match assignable_to(&postfix.return_type, &method.return_type) {
                        Assignability::NotAssignable => {
                            return Err(incompatible_error!(
                                "postfix return type {} does not fit target return type {}",
                                postfix.return_type.full_name(),
                                method.return_type.full_name()
                            ));
                        }
                        Assignability::AssignableWithBox => {
                            tail.push(Instruction::box_value(&postfix.return_type));
                        }
                        Assignability::Assignable => {}
                    }
                } else {
                    tail.push(Instruction::ldloc(result));
                }
            } else if postfix.has_return() {
                return Err(incompatible_error!(
                    "postfix {} returns {} but target {} is void",
                    postfix.full_name(),
                    postfix.return_type.full_name(),
                    method.full_name()
                ));
            }
            tail.push(Instruction::ret());

            let landing = tail[0].clone();
            let last_index = body.len().saturating_sub(1);
            let mut rerouted = 0usize;
            for (index, instruction) in body.instructions.iter().enumerate() {
                if read_lock!(instruction).opcode != Opcode::Ret {
                    continue;
                }
                if index == last_index {
                    write_lock!(instruction).rewrite(Opcode::Nop, Operand::None);
                } else if !self.postfix_optional {
                    write_lock!(instruction).rewrite(
                        Opcode::Br,
                        Operand::Target(InstructionRef::new(&landing)),
                    );
                    rerouted += 1;
                }
            }
            debug!(
                target_method = %method.full_name(),
                instructions = tail.len(),
                rerouted,
                "appending postfix"
            );
            body.instructions.extend(tail);
        }

        Ok(())
    }
}

/// Emit the loads that feed one injected helper's parameter list.
fn bind_arguments(
    target: &MethodRc,
    injected: &MethodRc,
    in_prefix: bool,
    state: Option<&LocalRc>,
    result: Option<&LocalRc>,
) -> Result<Vec<InstructionRc>> {
    let slots = target.arg_slots();
    let mut out = Vec::new();

    for param in &injected.params {
        let name = param.name.as_deref().unwrap_or("");
        if name == "__instance" {
            if target.is_static() {
                return Err(incompatible_error!(
                    "__instance is not valid for static target {}",
                    target.full_name()
                ));
            }
            let receiver = slots
                .first()
                .filter(|slot| slot.is_receiver)
                .ok_or_else(|| {
                    incompatible_error!("target {} has no receiver slot", target.full_name())
                })?;
            bind_slot(&mut out, receiver, param, "__instance")?;
        } else if name == "__state" {
            let state = state.ok_or_else(|| {
                incompatible_error!("no __state slot available for {}", injected.full_name())
            })?;
            if in_prefix {
                // by-reference was enforced when the slot was created
                out.push(Instruction::ldloca(state));
            } else if param.is_by_ref() {
                let by_ref = CilType::byref(&state.ty);
                if assignable_to(&by_ref, &param.ty) != Assignability::Assignable {
                    return Err(incompatible_error!(
                        "__state of type {} does not fit parameter of type {}",
                        state.ty.full_name(),
                        param.ty.full_name()
                    ));
                }
                out.push(Instruction::ldloca(state));
            } else {
                let assignability = assignable_to(&state.ty, &param.ty);
                if assignability == Assignability::NotAssignable {
                    return Err(incompatible_error!(
                        "__state of type {} does not fit parameter of type {}",
                        state.ty.full_name(),
                        param.ty.full_name()
                    ));
                }
                out.push(Instruction::ldloc(state));
                if assignability == Assignability::AssignableWithBox {
                    out.push(Instruction::box_value(&state.ty));
                }
            }
        } else if name == "__result" {
            let result = result.ok_or_else(|| {
                incompatible_error!("no __result slot available for {}", injected.full_name())
            })?;
            if param.is_by_ref() {
                let by_ref = CilType::byref(&result.ty);
                if assignable_to(&by_ref, &param.ty) != Assignability::Assignable {
                    return Err(incompatible_error!(
                        "__result of type {} does not fit parameter of type {}",
                        result.ty.full_name(),
                        param.ty.full_name()
                    ));
                }
                out.push(Instruction::ldloca(result));
            } else {
                let assignability = assignable_to(&result.ty, &param.ty);
                if assignability == Assignability::NotAssignable {
                    return Err(incompatible_error!(
                        "__result of type {} does not fit parameter of type {}",
                        result.ty.full_name(),
                        param.ty.full_name()
                    ));
                }
                out.push(Instruction::ldloc(result));
                if assignability == Assignability::AssignableWithBox {
                    out.push(Instruction::box_value(&result.ty));
                }
            }
        } else if let Some(member) = name.strip_prefix("___") {
            let declaring = target.declaring().ok_or_else(|| {
                unresolved_error!("target {} has no declaring type", target.full_name())
            })?;
            let field = declaring
                .find_field(member)
                .ok_or_else(|| unresolved_error!("no field {} on {}", member, declaring.full_name()))?;
            if field.is_static() {
                out.push(if param.is_by_ref() {
                    Instruction::ldsflda(&field)
                } else {
                    Instruction::ldsfld(&field)
                });
            } else if !target.is_static() {
                out.push(Instruction::ldarg(0));
                out.push(if param.is_by_ref() {
                    Instruction::ldflda(&field)
                } else {
                    Instruction::ldfld(&field)
                });
            } else {
                return Err(incompatible_error!(
                    "can't bind instance field {} inside static target {}",
                    member,
                    target.full_name()
                ));
            }
        } else {
            let index = match name
                .strip_prefix("__")
                .and_then(|digits| digits.parse::<usize>().ok())
            {
                Some(index) => {
                    if index >= slots.len() {
                        return Err(incompatible_error!(
                            "argument index {} is out of range for {}",
                            index,
                            target.full_name()
                        ));
                    }
                    index
                }
                None => slots
                    .iter()
                    .position(|slot| slot.name.as_deref() == Some(name))
                    .ok_or_else(|| {
                        incompatible_error!(
                            "no parameter matching '{}' on {}",
                            name,
                            target.full_name()
                        )
                    })?,
            };
            let description = format!("parameter '{name}'");
            bind_slot(&mut out, &slots[index], param, &description)?;
        }
    }
    Ok(out)
}

/// Load one argument slot the way the injected parameter wants it.
///
/// By-ref slots pass the reference through to by-ref parameters and dereference for
/// by-value ones; by-value slots hand out an address for by-ref parameters and copy
/// otherwise. Copies box when the analyzer says so.
fn bind_slot(
    out: &mut Vec<InstructionRc>,
    slot: &ArgSlot,
    param: &Param,
    what: &str,
) -> Result<()> {
    if slot.is_by_ref() {
        if param.is_by_ref() {
            if assignable_to(&slot.ty, &param.ty) != Assignability::Assignable {
                return Err(incompatible_error!(
                    "{} of type {} does not fit slot of type {}",
                    what,
                    param.ty.full_name(),
                    slot.ty.full_name()
                ));
            }
            out.push(Instruction::ldarg(slot.index));
        } else {
            let element = slot.element_type();
            let assignability = assignable_to(element, &param.ty);
            if assignability == Assignability::NotAssignable {
                return Err(incompatible_error!(
                    "{} of type {} does not fit slot of type {}",
                    what,
                    param.ty.full_name(),
                    slot.ty.full_name()
                ));
            }
            out.push(Instruction::ldarg(slot.index));
            out.push(Instruction::ldobj(element));
            if assignability == Assignability::AssignableWithBox {
                out.push(Instruction::box_value(element));
            }
        }
    } else if param.is_by_ref() {
        let by_ref = CilType::byref(&slot.ty);
        if assignable_to(&by_ref, &param.ty) != Assignability::Assignable {
            return Err(incompatible_error!(
                "{} of type {} does not fit slot of type {}",
                what,
                param.ty.full_name(),
                slot.ty.full_name()
            ));
        }
        out.push(Instruction::ldarga(slot.index));
    } else {
        let assignability = assignable_to(&slot.ty, &param.ty);
        if assignability == Assignability::NotAssignable {
            return Err(incompatible_error!(
                "{} of type {} does not fit slot of type {}",
                what,
                param.ty.full_name(),
                slot.ty.full_name()
            ));
        }
        out.push(Instruction::ldarg(slot.index));
        if assignability == Assignability::AssignableWithBox {
            out.push(Instruction::box_value(&slot.ty));
        }
    }
    Ok(())
}
