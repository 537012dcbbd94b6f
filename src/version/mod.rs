// src/version/mod.rs

//! Version handling for RPM packages in the Golden ISO builder.
//!
//! This module provides the combined version identity of a package (EVRA:
//! epoch, version, release, architecture), the split of a version string
//! into its distribution and package halves, and RPM label comparison with
//! the same tie-break rules as native rpm version comparison.

use std::cmp::Ordering;
use std::fmt;

/// A package version string, splittable into its constituent parts.
///
/// A version of the form `A.B.CvD.E.F` encodes the distribution (XR)
/// version `A.B.C` and the package version `D.E.F`. Versions without the
/// `v` marker have an empty distribution version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(pub String);

impl Version {
    pub fn new(version: impl Into<String>) -> Self {
        Version(version.into())
    }

    fn split(&self) -> (&str, &str) {
        let toks: Vec<&str> = self.0.split('v').collect();
        if toks.len() == 2 {
            (toks[0], toks[1])
        } else {
            ("", &self.0)
        }
    }

    /// The distribution (XR) version half, or "" if the version doesn't
    /// follow the distribution versioning scheme.
    pub fn xr_version(&self) -> &str {
        self.split().0
    }

    /// The package version half.
    pub fn pkg_version(&self) -> &str {
        self.split().1
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Combined "version" fields of a package, usable as a mapping key.
///
/// Two packages with equal EVRA are considered the same build. The derived
/// `Ord` gives deterministic map iteration only; version ordering must go
/// through [`compare_evr`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Evra {
    pub epoch: String,
    pub version: Version,
    pub release: String,
    pub arch: String,
}

impl Evra {
    pub fn new(
        epoch: impl Into<String>,
        version: impl Into<String>,
        release: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Evra {
            epoch: epoch.into(),
            version: Version::new(version),
            release: release.into(),
            arch: arch.into(),
        }
    }

    /// The (epoch, version, release) triple used for label comparison.
    pub fn evr(&self) -> (&str, &str, &str) {
        (&self.epoch, self.version.as_str(), &self.release)
    }
}

impl fmt::Display for Evra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Canonical form: version-release.arch, with the epoch prefixed
        // only when present and non-zero.
        if !self.epoch.is_empty() && self.epoch != "0" {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}-{}.{}", self.version, self.release, self.arch)
    }
}

/// rpmvercmp: compare two version segments with RPM's tie-break rules.
///
/// Strings are walked as alternating numeric and alphabetic subfields;
/// numeric beats alphabetic, numeric subfields compare by value, and a
/// longer dotted sequence is greater when the shared prefix is equal.
/// `~` sorts before everything including end-of-string.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (mut i, mut j) = (0, 0);

    let is_sep = |c: char| !c.is_ascii_alphanumeric() && c != '~';

    loop {
        // Skip separator characters on both sides.
        while i < a.len() && is_sep(a[i]) {
            i += 1;
        }
        while j < b.len() && is_sep(b[j]) {
            j += 1;
        }

        // Tilde sorts lower than everything, including the empty string.
        let a_tilde = i < a.len() && a[i] == '~';
        let b_tilde = j < b.len() && b[j] == '~';
        if a_tilde || b_tilde {
            if a_tilde && b_tilde {
                i += 1;
                j += 1;
                continue;
            }
            return if a_tilde {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }

        if i >= a.len() || j >= b.len() {
            break;
        }

        // Grab the next maximal run of digits or letters from each side.
        let a_numeric = a[i].is_ascii_digit();
        let b_numeric = b[j].is_ascii_digit();
        let seg_a = take_run(&a, &mut i, a_numeric);
        let seg_b = take_run(&b, &mut j, b_numeric);

        // A numeric subfield always beats an alphabetic one.
        if a_numeric != b_numeric {
            return if a_numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if a_numeric {
            compare_numeric(&seg_a, &seg_b)
        } else {
            seg_a.cmp(&seg_b)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    // One (or both) sides exhausted: the longer sequence is greater.
    match (i >= a.len(), j >= b.len()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, _) => Ordering::Greater,
    }
}

fn take_run(chars: &[char], idx: &mut usize, numeric: bool) -> String {
    let start = *idx;
    while *idx < chars.len()
        && chars[*idx].is_ascii_alphanumeric()
        && chars[*idx].is_ascii_digit() == numeric
    {
        *idx += 1;
    }
    chars[start..*idx].iter().collect()
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    match a.len().cmp(&b.len()) {
        Ordering::Equal => a.cmp(b),
        ord => ord,
    }
}

/// Compare two (epoch, version, release) triples.
///
/// Epoch is disregarded entirely when either side's epoch is empty; a
/// missing release is lower than any release.
pub fn compare_evr(a: (&str, &str, &str), b: (&str, &str, &str)) -> Ordering {
    let (mut ea, va, ra) = a;
    let (mut eb, vb, rb) = b;
    if ea.is_empty() || eb.is_empty() {
        ea = "";
        eb = "";
    }
    match rpmvercmp(ea, eb) {
        Ordering::Equal => {}
        ord => return ord,
    }
    match rpmvercmp(va, vb) {
        Ordering::Equal => {}
        ord => return ord,
    }
    rpmvercmp(ra, rb)
}

/// Compare two package versions.
///
/// Returns `Greater` if `ver1` is newer, `Equal` for the same version and
/// `Less` if `ver2` is newer. Architecture takes no part in the ordering.
pub fn compare_versions(ver1: &Evra, ver2: &Evra) -> Ordering {
    compare_evr(ver1.evr(), ver2.evr())
}

/// Get the highest version from a collection of package versions.
pub fn highest_version<'a, I>(versions: I) -> Option<&'a Evra>
where
    I: IntoIterator<Item = &'a Evra>,
{
    let mut iter = versions.into_iter();
    let mut highest = iter.next()?;
    for candidate in iter {
        if compare_versions(candidate, highest) == Ordering::Greater {
            highest = candidate;
        }
    }
    Some(highest)
}
