//! Patch set application: version guard, container synthesis and patch sequencing.
//!
//! [`apply_set`] drives one [`PatchSet`] against one loaded target. An application walks a
//! fixed sequence of [`ApplyState`]s, visible in the logs: the guard reads the version
//! marker left by any previous application, a container type is synthesized inside the
//! target module, each patch runs against its resolved target methods with a
//! branch-normalization pass after every edit, support members move into their containers,
//! and the marker is stamped last so only a completed application counts on the next run.
//!
//! A [`Error::VersionConflict`] from the guard is the one recoverable outcome; every other
//! failure comes back wrapped in [`Error::PatchSetFailed`] with the set's name attached,
//! and the caller must discard the target instead of writing it.

use std::sync::Arc;

use strum::Display;
use tracing::{debug, info};

use crate::assembly::editor;
use crate::metadata::loader::TargetModule;
use crate::metadata::module::ModuleRc;
use crate::metadata::token::TokenKind;
use crate::metadata::typesystem::{CilFlavor, CilType, CilTypeRc, TypeAttributes};
use crate::patch::relocate::relocate_support;
use crate::patch::{PatchContext, PatchSet, PatchVersion};
use crate::{Error, Result};

/// Namespace shared by every synthesized set container type.
pub const CONTAINER_NAMESPACE: &str = "PatchSets";

/// Path of the container type a set leaves in its target module.
#[must_use]
pub fn container_path(set_name: &str) -> String {
    format!("{CONTAINER_NAMESPACE}.{set_name}")
}

/// Lifecycle of one set application, in order.
///
/// [`apply_set`] advances through `VersionChecked` to `VersionStamped`; the terminal
/// `Written` and `Skipped` states belong to the runner, which decides whether a target
/// gets serialized.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    /// Nothing has happened yet.
    #[strum(serialize = "not applied")]
    NotApplied,
    /// The guard accepted the version, removing any stale container.
    #[strum(serialize = "version checked")]
    VersionChecked,
    /// The container type exists in the target module.
    #[strum(serialize = "container created")]
    ContainerCreated,
    /// Patches are running in declared order.
    #[strum(serialize = "patches applying")]
    PatchesApplying,
    /// Set-level support members moved into the container.
    #[strum(serialize = "members relocated")]
    MembersRelocated,
    /// The container carries the applied version marker.
    #[strum(serialize = "version stamped")]
    VersionStamped,
    /// The modified target was serialized.
    #[strum(serialize = "written")]
    Written,
    /// The guard rejected the version and the set was left alone.
    #[strum(serialize = "skipped")]
    Skipped,
}

fn advance(state: &mut ApplyState, next: ApplyState, set: &str) {
    debug!(set, from = %state, to = %next, "application advanced");
    *state = next;
}

/// Apply `set` to its loaded target.
///
/// Fatal failures come back as [`Error::PatchSetFailed`]; a version conflict passes
/// through unwrapped so the runner can skip the set and continue.
pub fn apply_set(
    set: &PatchSet,
    target: &Arc<TargetModule>,
    progress: &mut dyn FnMut(usize, &str),
) -> Result<()> {
    apply_inner(set, target, progress).map_err(|err| {
        if err.is_recoverable() {
            err
        } else {
            Error::PatchSetFailed {
                set: set.name().to_string(),
                source: Box::new(err),
            }
        }
    })
}

fn apply_inner(
    set: &PatchSet,
    target: &Arc<TargetModule>,
    progress: &mut dyn FnMut(usize, &str),
) -> Result<()> {
    let module = target.module()?;
    let mut state = ApplyState::NotApplied;

    if let Some(stale) = module.find_type(&container_path(set.name())) {
        // A container without a marker is a crashed earlier application; treat it as 0.0
        // so the new application replaces it.
        let existing = stale
            .version_marker()
            .unwrap_or_else(|| PatchVersion::new(0, 0));
        if existing >= set.version() {
            return Err(Error::VersionConflict {
                set: set.name().to_string(),
                existing,
                applying: set.version(),
            });
        }
        module.remove_type(&stale);
        debug!(set = set.name(), %existing, "replaced container from older application");
    }
    advance(&mut state, ApplyState::VersionChecked, set.name());

    set.run_before()?;

    let set_container = new_container(&module, CONTAINER_NAMESPACE, set.name(), TypeAttributes::empty());
    module.add_type(set_container.clone());
    advance(&mut state, ApplyState::ContainerCreated, set.name());

    advance(&mut state, ApplyState::PatchesApplying, set.name());
    for (index, patch) in set.patches().iter().enumerate() {
        progress(index, patch.name());

        let patch_container =
            new_container(&module, "", patch.name(), TypeAttributes::NESTED_ASSEMBLY);
        set_container.add_nested(patch_container.clone());
        let ctx = PatchContext::new(
            target.clone(),
            set_container.clone(),
            patch_container.clone(),
        );

        let methods = patch.target().resolve(&module)?;
        for method in &methods {
            let owned_here = method
                .module()
                .is_some_and(|owner| Arc::ptr_eq(&owner, &module));
            if !owned_here {
                return Err(Error::ModuleMismatch {
                    method: method.full_name(),
                    expected: module.name.clone(),
                });
            }
            patch.apply(&ctx, method)?;
            if let Some(body) = write_lock!(method.body).as_mut() {
                let widened = editor::normalize_branches(body);
                if widened > 0 {
                    debug!(method = %method.full_name(), widened, "widened short branches");
                }
            }
        }

        if let Some(decl) = patch.support() {
            relocate_support(&module, &target.support()?, decl, &patch_container)?;
        }
        debug!(
            set = set.name(),
            patch = patch.name(),
            methods = methods.len(),
            "patch applied"
        );
    }

    if let Some(decl) = set.support() {
        relocate_support(&module, &target.support()?, decl, &set_container)?;
    }
    advance(&mut state, ApplyState::MembersRelocated, set.name());

    // Stamped last: a crashed application leaves no marker and is retried wholesale.
    set_container.set_version_marker(set.version());
    advance(&mut state, ApplyState::VersionStamped, set.name());
    target.set_modified(true);

    set.run_after()?;
    info!(
        set = set.name(),
        version = %set.version(),
        patches = set.patches().len(),
        "patch set applied"
    );
    Ok(())
}

/// Sealed, non-instantiable host for relocated members.
fn new_container(
    module: &ModuleRc,
    namespace: &str,
    name: &str,
    extra: TypeAttributes,
) -> CilTypeRc {
    let ty = CilType::new(
        module.alloc_token(TokenKind::TypeDef),
        namespace,
        name,
        CilFlavor::Class,
        TypeAttributes::ABSTRACT | TypeAttributes::SEALED | extra,
    );
    ty.set_base(&module.cor.object);
    ty
}
