// src/blocks/grouping.rs

//! Group a flat set of packages into blocks.
//!
//! Packages are consumed in passes: user-installable tops first, then
//! instance packages, partition packages, tie-block members, and finally
//! owner and partner packages. Anything still unconsumed must be third
//! party, otherwise the package set is inconsistent.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::blocks::{
    AnyBlock, Block, GroupedPackages, TieBlock, BLOCK_SUFFIX, PID_SUFFIX, XR_FOUNDATION,
    XR_MANDATORY,
};
use crate::error::{Error, Result};
use crate::packages::Package;

/// Group the given packages into blocks.
pub fn group_packages<I>(pkgs: I) -> Result<GroupedPackages>
where
    I: IntoIterator<Item = Package>,
{
    let mut remaining: BTreeSet<Package> = pkgs.into_iter().collect();
    let mut groups = GroupedPackages::new();

    group_ui_pkgs(&mut groups, &mut remaining)?;
    group_instance_pkgs(&mut groups, &mut remaining)?;
    group_partition_pkgs(&mut groups, &mut remaining)?;
    group_tied_pkgs(&mut groups, &mut remaining);
    group_owner_and_partner_pkgs(&mut groups, &mut remaining);
    check_leftovers(remaining)?;

    Ok(groups)
}

/// Classify a user-installable package into a block kind.
fn classify_ui_pkg(pkg: &Package) -> Result<AnyBlock> {
    let block_tag = format!("{}{}", pkg.name, BLOCK_SUFFIX);
    let pid_tag = format!("{}{}", pkg.name, PID_SUFFIX);
    if super::find_provides(pkg, &block_tag).is_some() {
        if super::find_requires(pkg, &pid_tag).is_some() {
            return Ok(AnyBlock::Regular(Block::new(pkg.name.clone(), pkg.clone())));
        }
        return Ok(AnyBlock::Tie(TieBlock::new(pkg.name.clone(), pkg.clone())));
    }
    if pkg.name == XR_MANDATORY || super::find_provides(pkg, XR_FOUNDATION).is_some() {
        return Ok(AnyBlock::Regular(Block::new(pkg.name.clone(), pkg.clone())));
    }
    Err(Error::UnclassifiablePackage {
        package: pkg.to_string(),
    })
}

fn group_ui_pkgs(groups: &mut GroupedPackages, remaining: &mut BTreeSet<Package>) -> Result<()> {
    let ui_pkgs: Vec<Package> = remaining
        .iter()
        .filter(|pkg| pkg.is_user_installable())
        .cloned()
        .collect();
    for pkg in ui_pkgs {
        groups.add_block(classify_ui_pkg(&pkg)?)?;
        remaining.remove(&pkg);
    }
    Ok(())
}

/// Instance packages provide `<family>-PID` for the family they belong to.
fn group_instance_pkgs(
    groups: &mut GroupedPackages,
    remaining: &mut BTreeSet<Package>,
) -> Result<()> {
    let mut consumed = BTreeSet::new();
    for pkg in remaining.iter() {
        let candidates: BTreeSet<&str> = pkg
            .provides
            .iter()
            .map(|dep| dep.name())
            .filter(|name| name.ends_with(PID_SUFFIX))
            .map(|name| &name[..name.len() - PID_SUFFIX.len()])
            .filter(|family| groups.blocks.contains_key(*family))
            .collect();
        match candidates.len() {
            0 => {}
            1 => {
                let family = candidates.into_iter().next().unwrap_or_default().to_string();
                if groups.add_instance_pkg(&family, pkg) {
                    consumed.insert(pkg.clone());
                } else {
                    debug!(
                        "No block of {} at a matching version for instance package {}",
                        family, pkg
                    );
                }
            }
            _ => {
                return Err(Error::AmbiguousInstance {
                    package: pkg.to_string(),
                    providers: candidates.into_iter().collect::<Vec<_>>().join(", "),
                });
            }
        }
    }
    for pkg in consumed {
        remaining.remove(&pkg);
    }
    Ok(())
}

/// Partition packages require the top-level package of their family.
fn group_partition_pkgs(
    groups: &mut GroupedPackages,
    remaining: &mut BTreeSet<Package>,
) -> Result<()> {
    let mut consumed = BTreeSet::new();
    for pkg in remaining.iter() {
        let candidates: BTreeSet<&str> = pkg
            .requires
            .iter()
            .map(|dep| dep.name())
            .filter(|name| name.starts_with("xr-") && groups.blocks.contains_key(*name))
            .collect();
        match candidates.len() {
            0 => {}
            1 => {
                let family = candidates.into_iter().next().unwrap_or_default().to_string();
                if groups.add_partition_pkg(&family, pkg) {
                    consumed.insert(pkg.clone());
                } else {
                    debug!(
                        "No block of {} at a matching version for partition package {}",
                        family, pkg
                    );
                }
            }
            _ => {
                return Err(Error::AmbiguousPartition {
                    package: pkg.to_string(),
                    requirements: candidates.into_iter().collect::<Vec<_>>().join(", "),
                });
            }
        }
    }
    for pkg in consumed {
        remaining.remove(&pkg);
    }
    Ok(())
}

/// Tie-block members are matched by an exact version requirement in the
/// tie block's top package. A package may belong to several tie blocks.
fn group_tied_pkgs(groups: &mut GroupedPackages, remaining: &mut BTreeSet<Package>) {
    let mut consumed = BTreeSet::new();
    for (family, evra, top_pkg) in groups.tie_ui_pkgs() {
        let requirements: BTreeMap<&str, &str> = top_pkg
            .requires
            .iter()
            .filter_map(|dep| dep.version().map(|version| (dep.name(), version)))
            .collect();
        for pkg in remaining.iter() {
            if requirements.get(pkg.name.as_str()) == Some(&pkg.evr().as_str()) {
                groups.add_tied_pkg(&family, &evra, pkg);
                consumed.insert(pkg.clone());
            }
        }
    }
    for pkg in consumed {
        remaining.remove(&pkg);
    }
}

fn group_owner_and_partner_pkgs(
    groups: &mut GroupedPackages,
    remaining: &mut BTreeSet<Package>,
) {
    let owner: Vec<Package> = remaining
        .iter()
        .filter(|pkg| pkg.is_owner_package())
        .cloned()
        .collect();
    for pkg in owner {
        remaining.remove(&pkg);
        groups.add_owner_pkg(pkg);
    }
    let partner: Vec<Package> = remaining
        .iter()
        .filter(|pkg| pkg.is_partner_package())
        .cloned()
        .collect();
    for pkg in partner {
        remaining.remove(&pkg);
        groups.add_partner_pkg(pkg);
    }
}

/// Leftover native packages mean the package set is inconsistent.
/// Leftover third-party packages are dropped with a warning.
fn check_leftovers(remaining: BTreeSet<Package>) -> Result<()> {
    let (native, third_party): (Vec<Package>, Vec<Package>) =
        remaining.into_iter().partition(|pkg| pkg.is_native());
    if !third_party.is_empty() {
        warn!(
            "Unable to group the following third party packages; ignoring them: {}",
            third_party
                .iter()
                .map(|pkg| pkg.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    if !native.is_empty() {
        return Err(Error::UngroupedPackages {
            packages: native.iter().map(|pkg| pkg.to_string()).collect(),
        });
    }
    Ok(())
}
