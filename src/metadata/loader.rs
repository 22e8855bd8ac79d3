//! Module access layer: loading, writing and the per-target import machinery.
//!
//! The engine never parses binaries itself; a [`ModuleLoader`] implementation turns paths
//! into [`Module`] graphs and writes them back. [`TargetModule`] pairs one target binary
//! with a fresh copy of the engine's support module and owns the import-by-need memo that
//! moves helper types across the module boundary exactly once.
//!
//! # Key Components
//!
//! - [`ModuleLoader`]: Boundary trait between the engine and binary I/O
//! - [`TargetModule`]: One target binary plus its private support module copy
//! - [`MemoryLoader`]: Map-backed loader used by tests and benchmarks

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::debug;

use crate::metadata::module::{Module, ModuleRc};
use crate::metadata::typesystem::{CilTypeRc, CilTypeRef};
use crate::Result;

/// Loads and writes module graphs at the binary boundary.
///
/// `load` must hand back a freshly built graph the caller owns exclusively; import-by-need
/// moves types out of loaded support modules, so sharing one graph across targets would
/// let imports race each other.
pub trait ModuleLoader: Send + Sync {
    /// Load the module at `path` into a fresh graph.
    fn load(&self, path: &Path) -> Result<ModuleRc>;

    /// Write `module` to `path`.
    fn write(&self, module: &Module, path: &Path) -> Result<()>;
}

/// Shared loaders delegate, so callers can keep a handle on a loader they hand off.
impl<L: ModuleLoader + ?Sized> ModuleLoader for Arc<L> {
    fn load(&self, path: &Path) -> Result<ModuleRc> {
        (**self).load(path)
    }

    fn write(&self, module: &Module, path: &Path) -> Result<()> {
        (**self).write(module, path)
    }
}

/// One target binary under patching.
///
/// Holds the loaded target graph, a private copy of the support module whose types patches
/// pull over, and the modified flag the runner consults before writing output.
pub struct TargetModule {
    input_path: PathBuf,
    output_path: PathBuf,
    module: RwLock<Option<ModuleRc>>,
    support: RwLock<Option<ModuleRc>>,
    /// Import memo, keyed by the type's path in the support module before any rename
    imported: DashMap<String, CilTypeRc>,
    modified: AtomicBool,
}

impl TargetModule {
    /// Target the binary at `input`, writing output next to it as `name.patched.ext`.
    #[must_use]
    pub fn new(input: impl Into<PathBuf>) -> TargetModule {
        let input_path = input.into();
        let output_path = default_output(&input_path);
        TargetModule::with_output(input_path, output_path)
    }

    /// Target the binary at `input` with an explicit output path.
    #[must_use]
    pub fn with_output(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> TargetModule {
        TargetModule {
            input_path: input.into(),
            output_path: output.into(),
            module: RwLock::new(None),
            support: RwLock::new(None),
            imported: DashMap::new(),
            modified: AtomicBool::new(false),
        }
    }

    /// The input path this target reads from.
    #[must_use]
    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    /// The output path this target writes to.
    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Load the target binary and a fresh support module copy through `loader`.
    ///
    /// Resets the import memo and the modified flag, so a runner can reuse the same
    /// target across runs.
    pub fn load(&self, loader: &dyn ModuleLoader, support_path: &Path) -> Result<()> {
        let module = loader.load(&self.input_path)?;
        let support = loader.load(support_path)?;
        debug!(
            target_module = %module.name,
            support_module = %support.name,
            "loaded target"
        );
        self.attach(module, support);
        Ok(())
    }

    /// Attach pre-built graphs directly, bypassing the loader.
    pub fn attach(&self, module: ModuleRc, support: ModuleRc) {
        *write_lock!(self.module) = Some(module);
        *write_lock!(self.support) = Some(support);
        self.imported.clear();
        self.modified.store(false, Ordering::Relaxed);
    }

    /// The loaded target graph.
    pub fn module(&self) -> Result<ModuleRc> {
        read_lock!(self.module)
            .clone()
            .ok_or_else(|| crate::Error::Error(format!(
                "target '{}' has not been loaded",
                self.input_path.display()
            )))
    }

    /// The loaded support module copy.
    pub fn support(&self) -> Result<ModuleRc> {
        read_lock!(self.support)
            .clone()
            .ok_or_else(|| crate::Error::Error(format!(
                "support module for target '{}' has not been loaded",
                self.input_path.display()
            )))
    }

    /// Name of the loaded target module, when loaded.
    #[must_use]
    pub fn module_name(&self) -> Option<String> {
        read_lock!(self.module).as_ref().map(|m| m.name.clone())
    }

    /// `true` once any patch set has successfully applied to this target.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Relaxed)
    }

    /// Mark this target as carrying unwritten edits.
    pub fn set_modified(&self, modified: bool) {
        self.modified.store(modified, Ordering::Relaxed);
    }

    /// Write the (presumably modified) target graph to the output path.
    pub fn write(&self, loader: &dyn ModuleLoader) -> Result<()> {
        let module = self.module()?;
        loader.write(&module, &self.output_path)
    }

    /// Move the support type at `path` into the target module, importing its support-side
    /// base types and interfaces along with it.
    ///
    /// Imports are memoized: asking for the same path twice hands back the same type. A
    /// name collision in the target renames the incoming type with a suffix derived from
    /// the support module's mvid, keeping repeated imports deterministic.
    pub fn import_type(&self, path: &str) -> Result<CilTypeRc> {
        if let Some(done) = self.imported.get(path) {
            return Ok(done.clone());
        }
        let support = self.support()?;
        let target = self.module()?;
        let ty = support.resolve_type(path)?;
        self.import_graph(&support, &target, &ty)?;
        Ok(ty)
    }

    fn import_graph(&self, support: &ModuleRc, target: &ModuleRc, ty: &CilTypeRc) -> Result<()> {
        // Memoize before recursing so a base chain leading back here terminates.
        self.imported.insert(ty.full_name(), ty.clone());

        if let Some(base) = ty.base() {
            self.import_dependency(support, target, &base)?;
        }
        let interfaces: Vec<CilTypeRc> = read_lock!(ty.interfaces)
            .iter()
            .filter_map(CilTypeRef::upgrade)
            .collect();
        for interface in interfaces {
            self.import_dependency(support, target, &interface)?;
        }

        support.remove_type(ty);
        if target.find_type(&ty.full_name()).is_some() {
            let suffix: String = support.mvid.to_string().chars().take(8).collect();
            let renamed = format!("{}_{}", ty.name(), suffix);
            debug!(ty = %ty.full_name(), renamed = %renamed, "renaming imported type on collision");
            ty.set_name(renamed);
        }
        target.add_type(ty.clone());
        Ok(())
    }

    /// Import a base type or interface when it also lives in the support module.
    ///
    /// Nested dependencies travel inside their top-level root, so the root is what moves.
    fn import_dependency(
        &self,
        support: &ModuleRc,
        target: &ModuleRc,
        dependency: &CilTypeRc,
    ) -> Result<()> {
        let mut root = dependency.clone();
        while let Some(enclosing) = root.enclosing() {
            root = enclosing;
        }
        let in_support = root
            .module()
            .is_some_and(|owner| Arc::ptr_eq(&owner, support));
        if in_support && !self.imported.contains_key(&root.full_name()) {
            self.import_graph(support, target, &root)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TargetModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TargetModule({} -> {})",
            self.input_path.display(),
            self.output_path.display()
        )
    }
}

/// `name.ext` becomes `name.patched.ext` alongside the input.
fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("module");
    let file = match input.extension().and_then(|s| s.to_str()) {
        Some(ext) => format!("{stem}.patched.{ext}"),
        None => format!("{stem}.patched"),
    };
    input.with_file_name(file)
}

/// Map-backed loader for graphs built in memory.
///
/// `load` hands back the registered graph as-is; callers that need fresh-copy semantics
/// across repeated runs must re-register. Written modules are recorded by name so tests
/// can assert what a run would have flushed to disk.
#[derive(Default)]
pub struct MemoryLoader {
    modules: DashMap<PathBuf, ModuleRc>,
    written: DashMap<PathBuf, String>,
}

impl MemoryLoader {
    /// Create an empty loader.
    #[must_use]
    pub fn new() -> MemoryLoader {
        MemoryLoader::default()
    }

    /// Register the graph served for `path`.
    pub fn insert(&self, path: impl Into<PathBuf>, module: ModuleRc) {
        self.modules.insert(path.into(), module);
    }

    /// Name of the module written to `path`, when one was written.
    #[must_use]
    pub fn written_to(&self, path: &Path) -> Option<String> {
        self.written.get(path).map(|name| name.clone())
    }
}

impl ModuleLoader for MemoryLoader {
    fn load(&self, path: &Path) -> Result<ModuleRc> {
        self.modules.get(path).map(|m| m.clone()).ok_or_else(|| {
            crate::Error::FileError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no module registered at '{}'", path.display()),
            ))
        })
    }

    fn write(&self, module: &Module, path: &Path) -> Result<()> {
        self.written.insert(path.to_path_buf(), module.name.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::TokenKind;
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

    fn loaded_target() -> (TargetModule, ModuleRc, ModuleRc) {
        let target = Module::new("Game");
        let support = Module::new("Patcher");
        let tm = TargetModule::new("Game.exe");
        tm.attach(target.clone(), support.clone());
        (tm, target, support)
    }

    #[test]
    fn default_output_inserts_patched() {
        assert_eq!(
            default_output(Path::new("/srv/Game.exe")),
            Path::new("/srv/Game.patched.exe")
        );
        assert_eq!(
            default_output(Path::new("Game")),
            Path::new("Game.patched")
        );
    }

    #[test]
    fn import_moves_type_and_memoizes() {
        let (tm, target, support) = loaded_target();
        add_class(&support, "Patches", "Helper");

        let imported = tm.import_type("Patches.Helper").unwrap();
        assert!(support.find_type("Patches.Helper").is_none());
        assert!(target.find_type("Patches.Helper").is_some());

        let again = tm.import_type("Patches.Helper").unwrap();
        assert!(Arc::ptr_eq(&imported, &again));
    }

    #[test]
    fn import_pulls_support_side_base_chain() {
        let (tm, target, support) = loaded_target();
        let base = add_class(&support, "Patches", "HelperBase");
        let derived = add_class(&support, "Patches", "Helper");
        derived.set_base(&base);

        tm.import_type("Patches.Helper").unwrap();
        assert!(target.find_type("Patches.HelperBase").is_some());
        assert!(support.find_type("Patches.HelperBase").is_none());
    }

    #[test]
    fn import_renames_on_collision() {
        let (tm, target, support) = loaded_target();
        add_class(&target, "Patches", "Helper");
        add_class(&support, "Patches", "Helper");

        let imported = tm.import_type("Patches.Helper").unwrap();
        assert_ne!(imported.name(), "Helper");
        assert!(imported.name().starts_with("Helper_"));
        // the original under the old name is untouched
        assert!(target.find_type("Patches.Helper").is_some());
    }

    #[test]
    fn memory_loader_round_trip() {
        let loader = MemoryLoader::new();
        let module = Module::new("Game");
        loader.insert("Game.exe", module.clone());

        let tm = TargetModule::new("Game.exe");
        loader.insert("Patcher.dll", Module::new("Patcher"));
        tm.load(&loader, Path::new("Patcher.dll")).unwrap();
        assert_eq!(tm.module_name().as_deref(), Some("Game"));

        tm.set_modified(true);
        tm.write(&loader).unwrap();
        assert_eq!(
            loader.written_to(Path::new("Game.patched.exe")).as_deref(),
            Some("Game")
        );
        assert!(loader.written_to(Path::new("missing")).is_none());
    }

    #[test]
    fn unregistered_path_is_a_file_error() {
        let loader = MemoryLoader::new();
        let err = loader.load(Path::new("nope.exe")).unwrap_err();
        assert!(matches!(err, crate::Error::FileError(_)));
    }
}
