//! Declarative method-body patching.
//!
//! This module is the crate's center of gravity: everything under [`crate::metadata`]
//! and [`crate::assembly`] exists so that the pipeline here can rewrite managed method
//! bodies safely. A [`PatchSet`] bundles patches under a name and a version, each
//! [`Patch`] names its methods through a [`PatchTarget`] and edits them through a
//! [`PatchContext`], and the [`Patcher`] drives whole sets against loaded modules,
//! honoring version stamps, dependencies and failure isolation.
//!
//! # Architecture
//!
//! - [`version`] - version stamps compared on re-application
//! - [`target`] - late-bound method selection
//! - [`context`] - the per-set editing surface handed to patches
//! - [`prefix`] - synthesized prefix/postfix injection around existing bodies
//! - [`set`] - patch set declaration and its builder
//! - [`apply`] - the per-module application pipeline
//! - [`relocate`] - relocation of support members into the target module
//! - [`runner`] - multi-module orchestration and reporting
//!
//! # Usage
//!
//! ```rust,no_run
//! use cilpatch::metadata::loader::MemoryLoader;
//! use cilpatch::patch::{PatchSet, PatchTarget, PatchVersion, Patcher};
//!
//! let set = PatchSet::build("quick-start", PatchVersion::new(1, 0))
//!     .module("Game")
//!     .patch_fn(
//!         "no-op the update loop",
//!         PatchTarget::method("Game.Player", "Update"),
//!         |_ctx, method| {
//!             let mut body = method.body.write().expect("body lock");
//!             if let Some(body) = body.as_mut() {
//!                 body.instructions.clear();
//!             }
//!             Ok(())
//!         },
//!     )
//!     .finish();
//!
//! let mut patcher = Patcher::new(Box::new(MemoryLoader::new()), "Support.dll");
//! patcher.add_target("Game.dll");
//! patcher.add_set(set, true);
//! let report = patcher.run(|_, _| {})?;
//! assert_eq!(report.applied.len(), 1);
//! # Ok::<(), cilpatch::Error>(())
//! ```

pub mod apply;
pub mod context;
pub mod prefix;
pub mod relocate;
pub mod runner;
pub mod set;
pub mod target;
pub mod version;

// Re-export primary types at module level
pub use context::PatchContext;
pub use prefix::PrefixPatch;
pub use runner::{Patcher, RunReport};
pub use set::{PatchSet, PatchSetBuilder};
pub use target::PatchTarget;
pub use version::PatchVersion;

use crate::metadata::method::MethodRc;
use crate::Result;

/// A single named rewrite of one or more target methods.
///
/// Implementations edit the bodies of the methods their [`PatchTarget`] resolves to,
/// through the editing surface of the [`PatchContext`] they are handed. A patch that
/// relies on compiled helper code declares it via [`Patch::support`]; the pipeline
/// relocates those members into the target module after all patches have run.
pub trait Patch: Send + Sync {
    /// Human-readable name, used in progress reporting and error messages.
    fn name(&self) -> &str;

    /// The methods this patch rewrites.
    fn target(&self) -> &PatchTarget;

    /// Rewrite one resolved target method.
    fn apply(&self, ctx: &PatchContext, method: &MethodRc) -> Result<()>;

    /// Support type whose members must move into the target module, if any.
    fn support(&self) -> Option<&SupportDecl> {
        None
    }
}

/// How a support type member is treated during relocation.
#[derive(Debug)]
pub enum MemberTag {
    /// The member serves the patching machinery itself and is not relocated
    EngineInternal,
    /// A static delegate field wired at target load time to call the tagged method
    ReverseAccessor(PatchTarget),
}

/// A support type and the relocation tags on its members.
#[derive(Debug)]
pub struct SupportDecl {
    type_path: String,
    tags: Vec<(String, MemberTag)>,
}

impl SupportDecl {
    /// Declare the support type at `type_path` with no tagged members.
    #[must_use]
    pub fn new(type_path: &str) -> Self {
        SupportDecl {
            type_path: type_path.to_string(),
            tags: Vec::new(),
        }
    }

    /// Tag the member called `name`.
    #[must_use]
    pub fn tag(mut self, name: &str, tag: MemberTag) -> Self {
        self.tags.push((name.to_string(), tag));
        self
    }

    /// Path of the support type inside the support module.
    #[must_use]
    pub fn type_path(&self) -> &str {
        &self.type_path
    }

    /// All declared tags.
    #[must_use]
    pub fn tags(&self) -> &[(String, MemberTag)] {
        &self.tags
    }

    /// The tag on the member called `name`, if any.
    #[must_use]
    pub fn tag_for(&self, name: &str) -> Option<&MemberTag> {
        self.tags
            .iter()
            .find(|(member, _)| member == name)
            .map(|(_, tag)| tag)
    }
}

type ApplyFn = Box<dyn Fn(&PatchContext, &MethodRc) -> Result<()> + Send + Sync>;

/// A [`Patch`] built from a closure, for rewrites too small to deserve a type.
pub struct FnPatch {
    name: String,
    target: PatchTarget,
    support: Option<SupportDecl>,
    apply: ApplyFn,
}

impl FnPatch {
    /// A closure patch named `name` over `target`.
    #[must_use]
    pub fn new<F>(name: &str, target: PatchTarget, apply: F) -> Self
    where
        F: Fn(&PatchContext, &MethodRc) -> Result<()> + Send + Sync + 'static,
    {
        FnPatch {
            name: name.to_string(),
            target,
            support: None,
            apply: Box::new(apply),
        }
    }

    /// Attach a support declaration.
    #[must_use]
    pub fn with_support(mut self, support: SupportDecl) -> Self {
        self.support = Some(support);
        self
    }
}

impl Patch for FnPatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> &PatchTarget {
        &self.target
    }

    fn apply(&self, ctx: &PatchContext, method: &MethodRc) -> Result<()> {
        (self.apply)(ctx, method)
    }

    fn support(&self) -> Option<&SupportDecl> {
        self.support.as_ref()
    }
}
