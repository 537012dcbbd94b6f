// src/packages/query.rs

//! Build [`Package`] values by querying RPM files with the external tool.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::packages::{Package, PackageDep};
use crate::rpmtool::ToolCache;
use crate::version::Version;

const QUERY_FORMAT: &str = "[name: %{NAME}\n][epoch: %{EPOCH}\n][version: %{VERSION}\n]\
     [release: %{RELEASE}\n][arch: %{ARCH}\n]\
     [provides: %{PROVIDENAME} %{PROVIDEFLAGS:depflags} %{PROVIDEVERSION}\n]\
     [requires: %{REQUIRENAME} %{REQUIREFLAGS:depflags} %{REQUIREVERSION}\n]\
     [conflicts: %{CONFLICTNAME} %{CONFLICTFLAGS:depflags} %{CONFLICTVERSION}\n]\
     [group: %{GROUP}\n]";

/// Query one RPM file and build a [`Package`] from the output.
///
/// Fails with [`Error::MissingAttribute`] if any mandatory field is absent
/// from the query output.
pub fn package_from_rpm_file(tools: &ToolCache, rpm_path: &Path) -> Result<Package> {
    let output = tools.query_format(rpm_path, QUERY_FORMAT)?;
    parse_query_output(&output, rpm_path)
}

/// Query a collection of RPM files, in parallel where the executor allows.
///
/// Returns a mapping from each input path to the package it contains.
pub fn packages_from_rpm_files<E: Executor>(
    tools: &ToolCache,
    executor: &E,
    rpm_paths: &[PathBuf],
) -> Result<BTreeMap<PathBuf, Package>> {
    let results = executor.map(rpm_paths.to_vec(), |path| {
        let pkg = package_from_rpm_file(tools, &path);
        (path, pkg)
    });
    let mut mapping = BTreeMap::new();
    for (path, pkg) in results {
        mapping.insert(path, pkg?);
    }
    Ok(mapping)
}

fn parse_query_output(output: &str, rpm_path: &Path) -> Result<Package> {
    let mut name = None;
    let mut epoch = String::new();
    let mut version = None;
    let mut release = None;
    let mut arch = None;
    let mut group = None;
    let mut provides = BTreeSet::new();
    let mut requires = BTreeSet::new();
    let mut conflicts = BTreeSet::new();

    for line in output.lines() {
        let Some((field, value)) = line.split_once(": ") else {
            continue;
        };
        match field {
            "name" => name = Some(value.to_string()),
            // rpm reports "(none)" for an unset epoch.
            "epoch" if value != "(none)" => epoch = value.to_string(),
            "epoch" => {}
            "version" => version = Some(value.to_string()),
            "release" => release = Some(value.to_string()),
            "arch" => arch = Some(value.to_string()),
            "group" => group = Some(value.to_string()),
            "provides" => {
                provides.insert(PackageDep::parse(value));
            }
            "requires" => {
                requires.insert(PackageDep::parse(value));
            }
            "conflicts" => {
                conflicts.insert(PackageDep::parse(value));
            }
            _ => {}
        }
    }

    let missing = |attribute: &'static str| Error::MissingAttribute {
        attribute,
        path: rpm_path.to_path_buf(),
        output: output.to_string(),
    };

    Ok(Package {
        name: name.ok_or_else(|| missing("name"))?,
        epoch,
        version: Version::new(version.ok_or_else(|| missing("version"))?),
        release: release.ok_or_else(|| missing("release"))?,
        arch: arch.ok_or_else(|| missing("arch"))?,
        group: group.ok_or_else(|| missing("group"))?,
        provides,
        requires,
        conflicts,
    })
}
