use thiserror::Error;

use crate::patch::PatchVersion;

macro_rules! pattern_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::PatternNotFound {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::PatternNotFound {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! incompatible_error {
    ($msg:expr) => {
        crate::Error::IncompatibleParameter($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::IncompatibleParameter(format!($fmt, $($arg)*))
    };
}

macro_rules! unresolved_error {
    ($msg:expr) => {
        crate::Error::UnresolvedMember($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::UnresolvedMember(format!($fmt, $($arg)*))
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all possible failure modes of structural patching: pattern scans that come
/// up empty, injection parameters that cannot be bound to a target method, member descriptors
/// that resolve to nothing, and version guards that reject a second application. Each variant
/// provides specific context about the failure mode to enable appropriate error handling.
///
/// Every variant except [`Error::VersionConflict`] is fatal for the patch set that raised it:
/// the run aborts and no modified module is written. A version conflict is an expected,
/// recoverable condition; the runner skips the offending set and continues.
///
/// # Examples
///
/// ```rust,no_run
/// use cilpatch::{Error, patch::Patcher};
///
/// # fn run(patcher: &mut Patcher) {
/// match patcher.run(|_, _| {}) {
///     Ok(report) => println!("Applied {} sets", report.applied.len()),
///     Err(Error::PatchSetFailed { set, source }) => {
///         eprintln!("Patch set '{}' failed: {}", set, source);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A structural instruction scan did not match the target method body.
    ///
    /// Raised when a sliding-window predicate scan walks the whole body without finding the
    /// expected opcode/constant shape, meaning the target binary no longer looks the way the
    /// patch expects. The error includes the source location of the failed scan for debugging.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the pattern that was not found
    /// * `file` - Source file in which the scan failed
    /// * `line` - Source line in which the scan failed
    #[error("Pattern not found - {file}:{line}: {message}")]
    PatternNotFound {
        /// The message to be printed for the failed scan
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An injection parameter could not be bound to the target method.
    ///
    /// Covers every way a prefix/postfix parameter list can disagree with its target: a
    /// receiver marker on a static method, an out-of-range positional marker, a type the
    /// analyzer reports as not assignable, or a missing shared-state/result slot.
    #[error("Incompatible parameter - {0}")]
    IncompatibleParameter(String),

    /// A member descriptor did not resolve in either the target or the support module.
    ///
    /// Raised when a type path, method name or field name names something that does not
    /// exist in the module graph being patched.
    #[error("Unresolved member - {0}")]
    UnresolvedMember(String),

    /// The target module already carries this patch set at an equal or newer version.
    ///
    /// The idempotence guard: the set's container type exists and its version marker is not
    /// older than the version being applied. Recoverable; the runner skips the set.
    #[error("Patch set '{set}' already applied at version {existing} (applying {applying})")]
    VersionConflict {
        /// Name of the patch set whose guard rejected the application
        set: String,
        /// The version marker found on the existing container type
        existing: PatchVersion,
        /// The version that was being applied
        applying: PatchVersion,
    },

    /// A patch target resolved to a method outside the declared target module.
    ///
    /// Patch sets declare the module they edit; a target selector handing back a method that
    /// lives elsewhere indicates a wiring mistake, not a patchable situation.
    #[error("Method '{method}' does not belong to target module '{expected}'")]
    ModuleMismatch {
        /// Full name of the offending method
        method: String,
        /// Name of the module the patch set declared
        expected: String,
    },

    /// A patch set failed to apply.
    ///
    /// The single structured failure the orchestrator reports: the set name plus the inner
    /// cause. Everything except a version conflict leaves the orchestrator wrapped in this.
    #[error("Patch set '{set}' failed: {source}")]
    PatchSetFailed {
        /// Name of the patch set that failed
        set: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// File I/O error.
    ///
    /// Wraps standard I/O errors raised by module loader implementations when reading or
    /// writing binaries at the access-layer boundary.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    ///
    /// Used for errors that don't fit into other categories or for wrapping collaborator
    /// errors with additional context.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// The patch set name attached to this error, if it has been wrapped by the orchestrator.
    pub fn patch_set(&self) -> Option<&str> {
        match self {
            Error::PatchSetFailed { set, .. } | Error::VersionConflict { set, .. } => Some(set),
            _ => None,
        }
    }

    /// `true` when the runner may skip the failing set and continue the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::VersionConflict { .. })
    }
}
