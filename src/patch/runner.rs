//! Multi-target patch runs.
//!
//! The [`Patcher`] owns one [`ModuleLoader`], the registered target binaries and the
//! declared sets with their enable flags. A run checks dependencies eagerly, loads every
//! target alongside a fresh support module copy, applies each enabled set to its declared
//! target and finally serializes the targets that were actually modified. A fatal set
//! failure aborts the run before anything is written; a version conflict only skips its
//! set and shows up in the [`RunReport`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::metadata::loader::{ModuleLoader, TargetModule};
use crate::patch::apply::{apply_set, ApplyState};
use crate::patch::PatchSet;
use crate::{Error, Result};

/// Outcome of one run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Names of the sets this run applied, in application order.
    pub applied: Vec<String>,
    /// Names of the sets the version guard skipped.
    pub skipped: Vec<String>,
}

/// Drives enabled patch sets across their target modules and writes the results.
pub struct Patcher {
    loader: Box<dyn ModuleLoader>,
    support_path: PathBuf,
    targets: Vec<Arc<TargetModule>>,
    sets: Vec<(PatchSet, bool)>,
}

impl Patcher {
    /// Create a patcher reading binaries through `loader`, with the engine's support
    /// module at `support_path`.
    #[must_use]
    pub fn new(loader: Box<dyn ModuleLoader>, support_path: impl Into<PathBuf>) -> Patcher {
        Patcher {
            loader,
            support_path: support_path.into(),
            targets: Vec::new(),
            sets: Vec::new(),
        }
    }

    /// Register a target binary, writing output to the default `name.patched.ext` path.
    pub fn add_target(&mut self, input: impl Into<PathBuf>) {
        self.targets.push(Arc::new(TargetModule::new(input)));
    }

    /// Register a preconfigured target, for callers that need an explicit output path.
    pub fn add_target_module(&mut self, target: TargetModule) {
        self.targets.push(Arc::new(target));
    }

    /// Register a set and whether this run should apply it.
    pub fn add_set(&mut self, set: PatchSet, enabled: bool) {
        self.sets.push((set, enabled));
    }

    /// Apply every enabled set and write each modified target.
    ///
    /// `progress` receives the index and name of each patch as its set reaches it.
    /// Returns which sets applied and which were skipped; any other failure aborts the
    /// run with nothing written.
    pub fn run(&mut self, mut progress: impl FnMut(usize, &str)) -> Result<RunReport> {
        self.check_dependencies()?;

        for target in &self.targets {
            target.load(self.loader.as_ref(), &self.support_path)?;
        }

        let mut report = RunReport::default();
        for (set, enabled) in &self.sets {
            if !*enabled {
                continue;
            }
            let target = self.target_for(set)?;
            match apply_set(set, target, &mut progress) {
                Ok(()) => report.applied.push(set.name().to_string()),
                Err(err) if err.is_recoverable() => {
                    warn!(
                        set = set.name(),
                        state = %ApplyState::Skipped,
                        reason = %err,
                        "set left alone"
                    );
                    report.skipped.push(set.name().to_string());
                }
                Err(err) => return Err(err),
            }
        }

        for target in &self.targets {
            if target.is_modified() {
                target.write(self.loader.as_ref())?;
                info!(
                    output = %target.output_path().display(),
                    state = %ApplyState::Written,
                    "wrote patched module"
                );
            }
        }
        Ok(report)
    }

    /// Every enabled set's dependencies must be registered and enabled before anything
    /// loads, so a misconfigured run fails without touching the targets.
    fn check_dependencies(&self) -> Result<()> {
        for (set, enabled) in &self.sets {
            if !*enabled {
                continue;
            }
            for dependency in set.dependencies() {
                let satisfied = self
                    .sets
                    .iter()
                    .any(|(other, on)| *on && other.name() == dependency);
                if !satisfied {
                    return Err(Error::PatchSetFailed {
                        set: set.name().to_string(),
                        source: Box::new(Error::Error(format!(
                            "dependency '{dependency}' is missing or disabled"
                        ))),
                    });
                }
            }
        }
        Ok(())
    }

    fn target_for(&self, set: &PatchSet) -> Result<&Arc<TargetModule>> {
        self.targets
            .iter()
            .find(|t| t.module_name().as_deref() == Some(set.module_name()))
            .ok_or_else(|| Error::PatchSetFailed {
                set: set.name().to_string(),
                source: Box::new(Error::Error(format!(
                    "no loaded target module named '{}'",
                    set.module_name()
                ))),
            })
    }
}

impl fmt::Debug for Patcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patcher")
            .field("support_path", &self.support_path)
            .field("targets", &self.targets)
            .field("sets", &self.sets.len())
            .finish_non_exhaustive()
    }
}
