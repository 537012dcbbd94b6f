// src/picker/mod.rs

//! Choose which version of each block goes into the output image.
//!
//! The base image and the update repositories each contribute candidate
//! versions of every block family. Exactly one version per family may
//! survive into the output; the difference between the input and output
//! sets becomes the list of filesystem actions to apply to the unpacked
//! image.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::blocks::{AnyBlock, BlockMap, GroupedPackages};
use crate::error::{Error, Result};
use crate::isofs::{self, PackageGroup};
use crate::packages::Package;
use crate::version::{highest_version, Evra};

/// User-specified package patterns, split into exact RPM filenames and
/// name regexes.
#[derive(Debug, Default)]
pub struct PackagePatterns {
    filenames: BTreeSet<String>,
    regexes: Vec<Regex>,
}

impl PackagePatterns {
    /// Anything ending in `.rpm` is an exact filename; everything else
    /// must compile as a regular expression over package names.
    pub fn parse(patterns: &[String]) -> Result<Self> {
        let mut split = PackagePatterns::default();
        for pattern in patterns {
            if pattern.ends_with(".rpm") {
                split.filenames.insert(pattern.clone());
            } else {
                let regex = Regex::new(pattern).map_err(|e| Error::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                split.regexes.push(regex);
            }
        }
        Ok(split)
    }

    /// The requested filenames present in the given block.
    fn matching_filenames(&self, block: &AnyBlock) -> BTreeSet<String> {
        block
            .all_pkgs()
            .iter()
            .map(|pkg| pkg.filename())
            .filter(|filename| self.filenames.contains(filename))
            .collect()
    }

    fn matches_name(&self, name: &str) -> bool {
        self.regexes.iter().any(|regex| regex.is_match(name))
    }
}

/// Pick the output version of every block family.
///
/// Families only present in the base image are carried over untouched,
/// every version included. For families with repository candidates the
/// precedence is: an explicit filename match wins; otherwise families
/// already in the base image are upgraded to the highest candidate
/// version; otherwise a brand-new family is only included if a name
/// pattern asks for it.
pub fn pick_installable_pkgs(
    iso_groups: &GroupedPackages,
    repo_groups: &GroupedPackages,
    add_patterns: &[String],
    remove_patterns: &[String],
) -> Result<GroupedPackages> {
    let patterns = PackagePatterns::parse(add_patterns)?;
    let mut output = GroupedPackages {
        blocks: pick_map(&iso_groups.blocks, &repo_groups.blocks, &patterns)?,
        owner_pkgs: pick_map(&iso_groups.owner_pkgs, &repo_groups.owner_pkgs, &patterns)?,
        partner_pkgs: pick_map(
            &iso_groups.partner_pkgs,
            &repo_groups.partner_pkgs,
            &patterns,
        )?,
    };
    remove_families(&mut output, remove_patterns);
    check_duplicates(&output)?;
    Ok(output)
}

fn pick_map(iso: &BlockMap, repo: &BlockMap, patterns: &PackagePatterns) -> Result<BlockMap> {
    let mut output = BlockMap::new();
    let families: BTreeSet<&String> = iso.keys().chain(repo.keys()).collect();
    for family in families {
        let iso_versions = iso.get(family);
        let Some(repo_versions) = repo.get(family) else {
            // No update candidates; the base image versions stand.
            if let Some(versions) = iso_versions {
                output.insert(family.clone(), versions.clone());
            }
            continue;
        };

        // The base image copy wins when both sources carry the same EVRA.
        let mut candidates: BTreeMap<Evra, AnyBlock> = repo_versions.clone();
        if let Some(versions) = iso_versions {
            for (evra, block) in versions {
                candidates.insert(evra.clone(), block.clone());
            }
        }

        let chosen = choose_version(family, &candidates, iso_versions.is_some(), patterns)?;
        if let Some(evra) = chosen {
            info!("Picked version {} of block {}", evra, family);
            if let Some(block) = candidates.remove(&evra) {
                output.entry(family.clone()).or_default().insert(evra, block);
            }
        } else {
            debug!("No version of block {} was picked", family);
        }
    }
    Ok(output)
}

fn choose_version(
    family: &str,
    candidates: &BTreeMap<Evra, AnyBlock>,
    in_base_image: bool,
    patterns: &PackagePatterns,
) -> Result<Option<Evra>> {
    let mut matched: BTreeMap<&Evra, BTreeSet<String>> = BTreeMap::new();
    for (evra, block) in candidates {
        let filenames = patterns.matching_filenames(block);
        if !filenames.is_empty() {
            matched.insert(evra, filenames);
        }
    }

    if matched.len() > 1 {
        return Err(Error::MultipleMatchingBlocks {
            name: family.to_string(),
            versions: matched
                .keys()
                .map(|evra| evra.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            filenames: matched
                .values()
                .flatten()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect::<Vec<_>>()
                .join(", "),
        });
    }
    if let Some((evra, filenames)) = matched.into_iter().next() {
        debug!(
            "Version {} of block {} chosen by filename: {}",
            evra,
            family,
            filenames.into_iter().collect::<Vec<_>>().join(", ")
        );
        return Ok(Some(evra.clone()));
    }

    if in_base_image {
        return Ok(highest_version(candidates.keys()).cloned());
    }

    // A family the base image doesn't have is only pulled in on request.
    if candidates
        .values()
        .any(|block| patterns.matches_name(&block.top_pkg().name))
    {
        return Ok(highest_version(candidates.keys()).cloned());
    }
    Ok(None)
}

/// Drop whole families named by the remove patterns.
///
/// Patterns that match nothing are reported but never fatal, so a remove
/// list can be carried between builds as blocks come and go.
fn remove_families(output: &mut GroupedPackages, remove_patterns: &[String]) {
    let mut unmatched = Vec::new();
    for pattern in remove_patterns {
        if output.remove_family(pattern) {
            debug!("Removing block {} from the output packages", pattern);
        } else {
            unmatched.push(pattern.clone());
        }
    }
    if !unmatched.is_empty() {
        warn!(
            "Some user specified RPMs to be removed have not had any impact \
             on the golden ISO contents: {}",
            unmatched.join(", ")
        );
    }
}

fn check_duplicates(output: &GroupedPackages) -> Result<()> {
    let mut duplicates = Vec::new();
    for map in [&output.blocks, &output.owner_pkgs, &output.partner_pkgs] {
        for (family, versions) in map {
            if versions.len() > 1 {
                duplicates.push(format!(
                    "{}: {}",
                    family,
                    versions
                        .keys()
                        .map(|evra| evra.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
        }
    }
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(Error::DuplicatePackages { duplicates })
    }
}

/// A single change to apply to the unpacked image.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum OutputAction {
    Add { path: PathBuf, group: PackageGroup },
    Remove { filename: String, group: PackageGroup },
}

impl OutputAction {
    pub fn run(&self, iso_dir: &Path) -> Result<()> {
        match self {
            OutputAction::Add { path, group } => isofs::add_rpm(iso_dir, path, *group),
            OutputAction::Remove { filename, group } => {
                let groups = BTreeSet::from([group.group_name().to_string()]);
                isofs::remove_package(iso_dir, filename, &groups)
            }
        }
    }
}

/// Diff the input and output package sets into filesystem actions.
///
/// Every added package must have a known file path.
pub fn determine_output_actions(
    input: &GroupedPackages,
    output: &GroupedPackages,
    pkg_to_path: &BTreeMap<Package, PathBuf>,
) -> Result<Vec<OutputAction>> {
    let mut actions = Vec::new();
    for group in PackageGroup::ALL {
        let in_pkgs = input.get_all_pkgs(group);
        let out_pkgs = output.get_all_pkgs(group);
        for pkg in in_pkgs.difference(&out_pkgs) {
            debug!("Removing {} from group {}", pkg, group.group_name());
            actions.push(OutputAction::Remove {
                filename: pkg.filename(),
                group,
            });
        }
        for pkg in out_pkgs.difference(&in_pkgs) {
            debug!("Adding {} to group {}", pkg, group.group_name());
            let path = pkg_to_path
                .get(pkg)
                .ok_or_else(|| Error::PackageNotFound {
                    package: pkg.to_string(),
                })?;
            actions.push(OutputAction::Add {
                path: path.clone(),
                group,
            });
        }
    }
    Ok(actions)
}
