// tests/common/mod.rs

//! Shared builders for integration tests.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use goldiso::{Package, PackageDep, Version};

/// Build a package with the given provides and requires tags.
pub fn package(
    name: &str,
    version: &str,
    release: &str,
    provides: &[&str],
    requires: &[&str],
) -> Package {
    Package {
        name: name.to_string(),
        epoch: String::new(),
        version: Version::new(version.to_string()),
        release: release.to_string(),
        arch: "x86_64".to_string(),
        group: String::new(),
        provides: provides.iter().map(|tag| PackageDep::parse(tag)).collect(),
        requires: requires.iter().map(|tag| PackageDep::parse(tag)).collect(),
        conflicts: BTreeSet::new(),
    }
}

/// The top-level user-installable package of a regular block.
pub fn block_top(family: &str, version: &str) -> Package {
    package(
        family,
        version,
        "1",
        &[
            &format!("{family}-BLOCK"),
            "cisco-iosxr",
            "cisco-iosxr-user-installable",
        ],
        &[&format!("{family}-PID")],
    )
}

/// An instance package tying a block to one PID, requiring the PID
/// identifier package so both land on the same PID.
pub fn instance_pkg(family: &str, version: &str, pid: &str, identifier: &str) -> Package {
    package(
        &format!("{family}-inst"),
        version,
        "1",
        &[&format!("{family}-PID"), "cisco-iosxr"],
        &[&format!("cisco-pid-{pid}"), identifier],
    )
}

/// A PID identifier package, grouped as a partition package of `family`.
pub fn pid_identifier(family: &str, version: &str, pid: &str, card_type: &str) -> Package {
    package(
        &format!("{family}-ident"),
        version,
        "1",
        &[
            &format!("cisco-pid-{pid}"),
            &format!("cisco-card-type-{card_type}"),
            "cisco-iosxr",
        ],
        &[family],
    )
}

/// Write a placeholder RPM file for the package into `dir`.
pub fn write_rpm(dir: &Path, pkg: &Package) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(pkg.filename());
    fs::write(&path, pkg.to_string()).unwrap();
    path
}
