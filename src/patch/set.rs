//! Patch set declaration.
//!
//! A [`PatchSet`] is the unit of application: a named, versioned group of patches
//! aimed at one target module, with optional lifecycle hooks around the group and an
//! optional set-level support type whose statics are shared by all member patches.
//! Sets are declared up front through [`PatchSetBuilder`] and stay immutable while
//! the pipeline runs them.

use crate::patch::target::PatchTarget;
use crate::patch::version::PatchVersion;
use crate::patch::{FnPatch, Patch, PatchContext, SupportDecl};
use crate::Result;

type Hook = Box<dyn Fn() -> Result<()> + Send + Sync>;

/// A named, versioned group of patches applied together.
pub struct PatchSet {
    name: String,
    version: PatchVersion,
    description: String,
    module_name: String,
    dependencies: Vec<String>,
    patches: Vec<Box<dyn Patch>>,
    support: Option<SupportDecl>,
    before_apply: Option<Hook>,
    after_apply: Option<Hook>,
}

impl PatchSet {
    /// Start declaring a set called `name` at `version`.
    #[must_use]
    pub fn build(name: &str, version: PatchVersion) -> PatchSetBuilder {
        PatchSetBuilder {
            set: PatchSet {
                name: name.to_string(),
                version,
                description: String::new(),
                module_name: String::new(),
                dependencies: Vec::new(),
                patches: Vec::new(),
                support: None,
                before_apply: None,
                after_apply: None,
            },
        }
    }

    /// The set's name, also the name of its container type.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version stamped onto the container type.
    #[must_use]
    pub fn version(&self) -> PatchVersion {
        self.version
    }

    /// Free-form description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Name of the module this set applies to.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Names of sets that must be enabled alongside this one.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Member patches, in application order.
    #[must_use]
    pub fn patches(&self) -> &[Box<dyn Patch>] {
        &self.patches
    }

    /// Set-level support type, if declared.
    #[must_use]
    pub fn support(&self) -> Option<&SupportDecl> {
        self.support.as_ref()
    }

    /// Run the before-apply hook, when declared.
    pub fn run_before(&self) -> Result<()> {
        match &self.before_apply {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }

    /// Run the after-apply hook, when declared.
    pub fn run_after(&self) -> Result<()> {
        match &self.after_apply {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for PatchSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PatchSet({} v{}, {} patches, module {})",
            self.name,
            self.version,
            self.patches.len(),
            self.module_name
        )
    }
}

/// Builder for [`PatchSet`].
pub struct PatchSetBuilder {
    set: PatchSet,
}

impl PatchSetBuilder {
    /// Free-form description shown in tooling.
    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.set.description = description.to_string();
        self
    }

    /// Name of the module this set applies to.
    #[must_use]
    pub fn module(mut self, module_name: &str) -> Self {
        self.set.module_name = module_name.to_string();
        self
    }

    /// Require the set called `name` to be enabled alongside this one.
    #[must_use]
    pub fn depends_on(mut self, name: &str) -> Self {
        self.set.dependencies.push(name.to_string());
        self
    }

    /// Append a patch; patches apply in declaration order.
    #[must_use]
    pub fn patch(mut self, patch: impl Patch + 'static) -> Self {
        self.set.patches.push(Box::new(patch));
        self
    }

    /// Append a closure patch.
    #[must_use]
    pub fn patch_fn<F>(self, name: &str, target: PatchTarget, apply: F) -> Self
    where
        F: Fn(&PatchContext, &crate::metadata::method::MethodRc) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.patch(FnPatch::new(name, target, apply))
    }

    /// Declare the set-level support type.
    #[must_use]
    pub fn support(mut self, support: SupportDecl) -> Self {
        self.set.support = Some(support);
        self
    }

    /// Hook run before any patch of the set applies.
    #[must_use]
    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.set.before_apply = Some(Box::new(hook));
        self
    }

    /// Hook run after the whole set, relocation included, has applied.
    #[must_use]
    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.set.after_apply = Some(Box::new(hook));
        self
    }

    /// Finish the declaration.
    #[must_use]
    pub fn finish(self) -> PatchSet {
        self.set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn builder_collects_the_declaration() {
        let set = PatchSet::build("no-drowning", PatchVersion::with_build(2, 1, 3))
            .description("breathe underwater")
            .module("Game.dll")
            .depends_on("base-hooks")
            .patch_fn(
                "gill everything",
                PatchTarget::method("Game.Player", "Update"),
                |_, _| Ok(()),
            )
            .finish();

        assert_eq!(set.name(), "no-drowning");
        assert_eq!(set.version(), PatchVersion::with_build(2, 1, 3));
        assert_eq!(set.description(), "breathe underwater");
        assert_eq!(set.module_name(), "Game.dll");
        assert_eq!(set.dependencies(), ["base-hooks".to_string()]);
        assert_eq!(set.patches().len(), 1);
        assert_eq!(set.patches()[0].name(), "gill everything");
    }

    #[test]
    fn hooks_default_to_no_ops() {
        let set = PatchSet::build("bare", PatchVersion::new(1, 0)).finish();
        set.run_before().unwrap();
        set.run_after().unwrap();
    }

    #[test]
    fn hooks_run_when_declared() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (before, after) = (counter.clone(), counter.clone());
        let set = PatchSet::build("hooked", PatchVersion::new(1, 0))
            .before(move || {
                before.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
            .after(move || {
                after.fetch_add(10, Ordering::Relaxed);
                Ok(())
            })
            .finish();

        set.run_before().unwrap();
        set.run_after().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 11);
    }

    #[test]
    fn patches_keep_declaration_order() {
        let set = PatchSet::build("ordered", PatchVersion::new(1, 0))
            .patch_fn("first", PatchTarget::method("A", "M"), |_, _| Ok(()))
            .patch_fn("second", PatchTarget::method("B", "M"), |_, _| Ok(()))
            .patch_fn("third", PatchTarget::method("C", "M"), |_, _| Ok(()))
            .finish();

        let names: Vec<&str> = set.patches().iter().map(|p| p.name()).collect();
        assert_eq!(names, ["first", "second", "third"]);
    }
}
