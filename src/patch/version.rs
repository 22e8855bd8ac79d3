//! Patch set version numbers.
//!
//! Every applied patch set stamps its version onto the container type it creates
//! inside the target module. On a later run the stamp is compared against the set
//! being applied: an equal or newer stamp means the work is already done and the
//! module is left untouched. Versions carry two mandatory components and up to two
//! optional ones, and ordering treats an absent component as lower than any present
//! one, so `1.2` precedes `1.2.0`.

use std::fmt;

/// A two-to-four component version, ordered component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatchVersion {
    /// Major component
    pub major: u16,
    /// Minor component
    pub minor: u16,
    /// Optional build component
    pub build: Option<u16>,
    /// Optional revision component, meaningful only alongside a build
    pub revision: Option<u16>,
}

impl PatchVersion {
    /// A `major.minor` version.
    #[must_use]
    pub fn new(major: u16, minor: u16) -> Self {
        PatchVersion {
            major,
            minor,
            build: None,
            revision: None,
        }
    }

    /// A `major.minor.build` version.
    #[must_use]
    pub fn with_build(major: u16, minor: u16, build: u16) -> Self {
        PatchVersion {
            major,
            minor,
            build: Some(build),
            revision: None,
        }
    }

    /// A `major.minor.build.revision` version.
    #[must_use]
    pub fn with_revision(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        PatchVersion {
            major,
            minor,
            build: Some(build),
            revision: Some(revision),
        }
    }
}

impl fmt::Display for PatchVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{build}")?;
            if let Some(revision) = self.revision {
                write!(f, ".{revision}")?;
            }
        }
        Ok(())
    }
}
