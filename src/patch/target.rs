//! Selection of the methods a patch rewrites.
//!
//! A [`PatchTarget`] pairs a human-readable label with a selector closure that is
//! run against the loaded target module at apply time. Late resolution keeps patch
//! declarations free of module handles: a set can be described before any file is
//! loaded, and the same declaration works against every module that satisfies it.

use crate::metadata::method::MethodRc;
use crate::metadata::module::Module;
use crate::Result;
use std::fmt;

type Selector = Box<dyn Fn(&Module) -> Result<Vec<MethodRc>> + Send + Sync>;

/// A named recipe for locating methods inside a loaded module.
pub struct PatchTarget {
    label: String,
    selector: Selector,
}

impl PatchTarget {
    /// Target the first method called `name` on the type at `type_path`.
    ///
    /// Nested types are addressed with `/` or `+` separators, `"Game.Outer/Inner"`.
    #[must_use]
    pub fn method(type_path: &str, name: &str) -> Self {
        let (path, method) = (type_path.to_string(), name.to_string());
        PatchTarget {
            label: format!("{type_path}::{name}"),
            selector: Box::new(move |module| {
                let ty = module.resolve_type(&path)?;
                let found = ty
                    .find_method(&method)
                    .ok_or_else(|| unresolved_error!("no method {} on {}", method, path))?;
                Ok(vec![found])
            }),
        }
    }

    /// Target every overload of `name` on the type at `type_path`.
    #[must_use]
    pub fn methods(type_path: &str, name: &str) -> Self {
        let (path, method) = (type_path.to_string(), name.to_string());
        PatchTarget {
            label: format!("{type_path}::{name}"),
            selector: Box::new(move |module| {
                let ty = module.resolve_type(&path)?;
                let found = ty.find_methods(&method);
                if found.is_empty() {
                    return Err(unresolved_error!("no method {} on {}", method, path));
                }
                Ok(found)
            }),
        }
    }

    /// Target the instance constructor of the type at `type_path`.
    #[must_use]
    pub fn constructor(type_path: &str) -> Self {
        PatchTarget::method(type_path, ".ctor")
    }

    /// Target the static constructor of the type at `type_path`.
    #[must_use]
    pub fn static_constructor(type_path: &str) -> Self {
        PatchTarget::method(type_path, ".cctor")
    }

    /// Target whatever `selector` yields, under the given label.
    #[must_use]
    pub fn create<F>(label: &str, selector: F) -> Self
    where
        F: Fn(&Module) -> Result<Vec<MethodRc>> + Send + Sync + 'static,
    {
        PatchTarget {
            label: label.to_string(),
            selector: Box::new(selector),
        }
    }

    /// The label this target was declared under.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the selector against `module`.
    pub fn resolve(&self, module: &Module) -> Result<Vec<MethodRc>> {
        (self.selector)(module)
    }
}

impl fmt::Debug for PatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchTarget")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
