// src/packages/mod.rs

//! The package data model.
//!
//! A [`Package`] is an immutable value built from RPM metadata, either by
//! querying a package file on disk (`query`) or by parsing repodata XML
//! (`repodata`). Dependency tags are parsed into the [`PackageDep`] sum
//! type. `files` maps packages back to their on-disk paths.

pub mod files;
pub mod query;
pub mod repodata;

use std::collections::BTreeSet;
use std::fmt;

use crate::version::{Evra, Version};

/// One provides/requires/conflicts tag on a package.
///
/// A tag of `xr-foo = 1.2.3v1.0.0` indicates a dependency on `xr-foo` at
/// that version. Boolean dependency expressions such as
/// `(xr-foo = 1.2.3v1.0.0 if xr-bar)` are kept verbatim, mirroring how rpm
/// itself reports them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageDep {
    /// `name flags version`, e.g. `xr-foo = 1.2.3v1.0.0`.
    Simple {
        name: String,
        flags: String,
        version: String,
    },
    /// A bare capability name with no version constraint.
    Name(String),
    /// A boolean or otherwise unsplittable expression, kept verbatim.
    Boolean(String),
}

impl PackageDep {
    /// Parse one dependency tag from rpm query output.
    pub fn parse(tag: &str) -> PackageDep {
        let toks: Vec<&str> = tag.split_whitespace().collect();
        match toks.as_slice() {
            [name, flags, version] => PackageDep::Simple {
                name: (*name).to_string(),
                flags: (*flags).to_string(),
                version: (*version).to_string(),
            },
            [name] => PackageDep::Name((*name).to_string()),
            // Anything else is likely a boolean dependency. Store the whole
            // tag verbatim, which is what rpm reports for these.
            _ => PackageDep::Boolean(tag.trim().to_string()),
        }
    }

    /// The capability name, or the full raw text for boolean expressions.
    pub fn name(&self) -> &str {
        match self {
            PackageDep::Simple { name, .. } => name,
            PackageDep::Name(name) => name,
            PackageDep::Boolean(raw) => raw,
        }
    }

    /// The version operand, if the dependency carries one.
    pub fn version(&self) -> Option<&str> {
        match self {
            PackageDep::Simple { version, .. } => Some(version),
            PackageDep::Name(_) | PackageDep::Boolean(_) => None,
        }
    }
}

impl fmt::Display for PackageDep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageDep::Simple {
                name,
                flags,
                version,
            } => write!(f, "{name} {flags} {version}"),
            PackageDep::Name(name) => write!(f, "{name}"),
            PackageDep::Boolean(raw) => write!(f, "{raw}"),
        }
    }
}

/// A single RPM, with each field corresponding to the matching RPM tag.
///
/// Packages compare and hash by their full field set, so two packages are
/// "the same build" only when every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Package {
    pub name: String,
    pub epoch: String,
    pub version: Version,
    pub release: String,
    pub arch: String,
    pub group: String,
    pub provides: BTreeSet<PackageDep>,
    pub requires: BTreeSet<PackageDep>,
    pub conflicts: BTreeSet<PackageDep>,
}

impl Package {
    /// Combined version fields for this package.
    pub fn evra(&self) -> Evra {
        Evra {
            epoch: self.epoch.clone(),
            version: self.version.clone(),
            release: self.release.clone(),
            arch: self.arch.clone(),
        }
    }

    /// The epoch, version, release string for this package.
    pub fn evr(&self) -> String {
        let epoch = if !self.epoch.is_empty() && self.epoch != "0" {
            format!("{}:", self.epoch)
        } else {
            String::new()
        };
        format!("{}{}-{}", epoch, self.version, self.release)
    }

    /// The filename for this RPM. Epoch isn't included: `N-V-R.A.rpm`.
    pub fn filename(&self) -> String {
        format!(
            "{}-{}-{}.{}.rpm",
            self.name, self.version, self.release, self.arch
        )
    }

    fn provides_name(&self, name: &str) -> bool {
        self.provides.iter().any(|dep| dep.name() == name)
    }

    /// Whether this package comes from outside the distribution.
    pub fn is_third_party(&self) -> bool {
        !self.provides_name("cisco-iosxr")
    }

    /// Whether this is a native distribution package. Per-fix third-party
    /// rebuilds carry the rebuilt marker and don't count.
    pub fn is_native(&self) -> bool {
        self.provides_name("cisco-iosxr") && !self.provides_name("cisco-rebuilt")
    }

    /// Whether a user may install this package directly.
    pub fn is_user_installable(&self) -> bool {
        self.provides_name("cisco-iosxr-user-installable")
    }

    /// Whether this package is supplied by the device owner.
    pub fn is_owner_package(&self) -> bool {
        self.provides_name("cisco-owner-package")
    }

    /// Whether this package is supplied by a partner.
    pub fn is_partner_package(&self) -> bool {
        self.provides_name("cisco-partner-package")
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // N-E:V-R.A, or N-V-R.A when the epoch is empty or zero.
        write!(f, "{}-{}", self.name, self.evra())
    }
}
