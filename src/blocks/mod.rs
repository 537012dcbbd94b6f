// src/blocks/mod.rs

//! Groups of related packages addressed as blocks.
//!
//! A regular [`Block`] is a family of packages that move together at one
//! version: a top-level user-installable package plus hardware-specific
//! instance packages and partition sub-packages. A [`TieBlock`] is a
//! third-party bundle whose members are tied to the top package by exact
//! version requirements. [`GroupedPackages`] is the catalog of all blocks
//! from one source.

pub mod grouping;

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::isofs::PackageGroup;
use crate::packages::{Package, PackageDep};
use crate::version::Evra;

// Significant provides tags and package-name conventions.
pub const CISCO_PID_PREFIX: &str = "cisco-pid-";
pub const CISCO_CARD_TYPE_PREFIX: &str = "cisco-card-type-";
pub const XR_FOUNDATION: &str = "xr-foundation";
pub const XR_MANDATORY: &str = "xr-mandatory";
pub const BLOCK_SUFFIX: &str = "-BLOCK";
pub const PID_SUFFIX: &str = "-PID";
pub const BUGFIX_PREFIX: &str = "cisco-CSC";

pub const LC_CARD_TYPES: [&str; 1] = ["lc-distributed"];
pub const RP_CARD_TYPES: [&str; 3] = ["rp-distributed", "rplc-centralized", "rplc-sff"];

/// Human-readable name for a card type, for user-facing errors.
pub fn card_class_readable(card_type: &str) -> &str {
    match card_type {
        "lc-distributed" => "Line Card (modular)",
        "rp-distributed" => "Route Processor (modular)",
        "rplc-centralized" => "Centralized form factor",
        "rplc-sff" => "Fixed form factor",
        other => other,
    }
}

/// Whether a dependency refers to the given capability name.
///
/// Boolean dependency expressions are matched inside their raw text, e.g.
/// `(cisco-pid-88-LC0-36FH or cisco-pid-88-LC0-36FH-M)`.
fn dep_matches_name(dep: &PackageDep, name: &str) -> bool {
    if dep.name() == name {
        return true;
    }
    match Regex::new(&format!(r"[( ]{}[) ]", regex::escape(name))) {
        Ok(re) => re.is_match(dep.name()),
        Err(_) => false,
    }
}

fn find_dep<'a>(deps: &'a BTreeSet<PackageDep>, name: &str) -> Option<&'a PackageDep> {
    deps.iter().find(|dep| dep_matches_name(dep, name))
}

/// The provides dependency with the given name, if any.
pub fn find_provides<'a>(pkg: &'a Package, name: &str) -> Option<&'a PackageDep> {
    find_dep(&pkg.provides, name)
}

/// The requires dependency with the given name, if any.
pub fn find_requires<'a>(pkg: &'a Package, name: &str) -> Option<&'a PackageDep> {
    find_dep(&pkg.requires, name)
}

/// Provides dependencies whose name starts with `prefix`.
pub fn provides_with_prefix<'a>(
    pkg: &'a Package,
    prefix: &'a str,
) -> impl Iterator<Item = &'a PackageDep> {
    pkg.provides
        .iter()
        .filter(move |dep| dep.name().starts_with(prefix))
}

/// Provides dependencies whose name ends with `suffix`.
pub fn provides_with_suffix<'a>(
    pkg: &'a Package,
    suffix: &'a str,
) -> impl Iterator<Item = &'a PackageDep> {
    pkg.provides
        .iter()
        .filter(move |dep| dep.name().ends_with(suffix))
}

/// Requires dependencies whose name starts with `prefix`.
pub fn requires_with_prefix<'a>(
    pkg: &'a Package,
    prefix: &'a str,
) -> impl Iterator<Item = &'a PackageDep> {
    pkg.requires
        .iter()
        .filter(move |dep| dep.name().starts_with(prefix))
}

/// A regular, partitioned block.
///
/// Invariant: the top package's EVRA is the block's EVRA, and every
/// instance/partition package is reachable from the top package through a
/// requires edge, directly or via an instance package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub evra: Evra,
    pub top_pkg: Package,
    pub instance_pkgs: BTreeSet<Package>,
    pub partition_pkgs: BTreeSet<Package>,
}

impl Block {
    pub fn new(name: impl Into<String>, top_pkg: Package) -> Self {
        Block {
            name: name.into(),
            evra: top_pkg.evra(),
            top_pkg,
            instance_pkgs: BTreeSet::new(),
            partition_pkgs: BTreeSet::new(),
        }
    }

    /// All packages in the block, top package first.
    pub fn all_pkgs(&self) -> Vec<Package> {
        let mut pkgs = vec![self.top_pkg.clone()];
        pkgs.extend(self.instance_pkgs.iter().cloned());
        pkgs.extend(self.partition_pkgs.iter().cloned());
        pkgs
    }

    /// The instance package for the given PID, if the block has one.
    ///
    /// Instance packages carry a requires tag for `cisco-pid-<pid>`; the
    /// PID identifier package itself provides the tag instead.
    fn instance_pkg_on_pid(&self, pid: &str) -> Option<&Package> {
        let tag = format!("{CISCO_PID_PREFIX}{pid}");
        self.instance_pkgs
            .iter()
            .find(|pkg| find_requires(pkg, &tag).is_some() || find_provides(pkg, &tag).is_some())
    }

    /// The partition packages required by the given instance package.
    fn partition_pkgs_for_instance(&self, instance: &Package) -> BTreeSet<Package> {
        let by_name: BTreeMap<&str, &Package> = self
            .partition_pkgs
            .iter()
            .map(|pkg| (pkg.name.as_str(), pkg))
            .collect();
        instance
            .requires
            .iter()
            .filter_map(|req| by_name.get(req.name()).map(|pkg| (*pkg).clone()))
            .collect()
    }

    /// The set of packages installed on the given PID.
    ///
    /// The top-level package goes everywhere; instance and partition
    /// packages are PID-dependent.
    pub fn pkgs_on_pid(&self, pid: &str) -> BTreeSet<Package> {
        let mut pkgs = BTreeSet::from([self.top_pkg.clone()]);
        if let Some(instance) = self.instance_pkg_on_pid(pid) {
            pkgs.extend(self.partition_pkgs_for_instance(instance));
            pkgs.insert(instance.clone());
        }
        pkgs
    }

    /// A copy of the block with the given packages removed.
    pub fn filter_pkgs(&self, pkgs_to_remove: &BTreeSet<Package>) -> Block {
        Block {
            name: self.name.clone(),
            evra: self.evra.clone(),
            top_pkg: self.top_pkg.clone(),
            instance_pkgs: self
                .instance_pkgs
                .difference(pkgs_to_remove)
                .cloned()
                .collect(),
            partition_pkgs: self
                .partition_pkgs
                .difference(pkgs_to_remove)
                .cloned()
                .collect(),
        }
    }
}

/// A third-party tie block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieBlock {
    pub name: String,
    pub evra: Evra,
    pub top_pkg: Package,
    pub tied_pkgs: BTreeSet<Package>,
}

impl TieBlock {
    pub fn new(name: impl Into<String>, top_pkg: Package) -> Self {
        TieBlock {
            name: name.into(),
            evra: top_pkg.evra(),
            top_pkg,
            tied_pkgs: BTreeSet::new(),
        }
    }

    pub fn all_pkgs(&self) -> Vec<Package> {
        let mut pkgs = vec![self.top_pkg.clone()];
        pkgs.extend(self.tied_pkgs.iter().cloned());
        pkgs
    }
}

/// Either kind of block. The variant set is closed: matching is
/// exhaustive wherever block and tie-block behavior differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyBlock {
    Regular(Block),
    Tie(TieBlock),
}

impl AnyBlock {
    pub fn name(&self) -> &str {
        match self {
            AnyBlock::Regular(block) => &block.name,
            AnyBlock::Tie(tie) => &tie.name,
        }
    }

    pub fn evra(&self) -> &Evra {
        match self {
            AnyBlock::Regular(block) => &block.evra,
            AnyBlock::Tie(tie) => &tie.evra,
        }
    }

    pub fn top_pkg(&self) -> &Package {
        match self {
            AnyBlock::Regular(block) => &block.top_pkg,
            AnyBlock::Tie(tie) => &tie.top_pkg,
        }
    }

    pub fn all_pkgs(&self) -> Vec<Package> {
        match self {
            AnyBlock::Regular(block) => block.all_pkgs(),
            AnyBlock::Tie(tie) => tie.all_pkgs(),
        }
    }

    /// The packages this block puts on the given PID. Tie blocks go to
    /// every PID in full.
    pub fn pkgs_on_pid(&self, pid: &str) -> BTreeSet<Package> {
        match self {
            AnyBlock::Regular(block) => block.pkgs_on_pid(pid),
            AnyBlock::Tie(tie) => tie.all_pkgs().into_iter().collect(),
        }
    }
}

/// Pseudo-PID under which owner and partner packages are checked.
pub const OWNER_PARTNER_PSEUDO_PID: &str = "OwnerAndPartnerPackages";

/// Blocks of one source, keyed by family name and then by EVRA.
pub type BlockMap = BTreeMap<String, BTreeMap<Evra, AnyBlock>>;

/// A set of packages grouped into logical blocks, keyed by family name
/// and then by EVRA.
///
/// Owner and partner packages are held as singleton pseudo-blocks so the
/// picking logic can treat every family uniformly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedPackages {
    pub blocks: BlockMap,
    pub owner_pkgs: BlockMap,
    pub partner_pkgs: BlockMap,
}

impl GroupedPackages {
    pub fn new() -> Self {
        GroupedPackages::default()
    }

    fn map_for(&mut self, block: &AnyBlock) -> &mut BlockMap {
        match block {
            AnyBlock::Regular(b) if b.top_pkg.is_owner_package() => &mut self.owner_pkgs,
            AnyBlock::Regular(b) if b.top_pkg.is_partner_package() => &mut self.partner_pkgs,
            _ => &mut self.blocks,
        }
    }

    /// Add a new block. Two blocks of one family at the same EVRA is an
    /// error.
    pub fn add_block(&mut self, block: AnyBlock) -> Result<()> {
        debug!("Adding block of top package {}", block.top_pkg());
        let name = block.name().to_string();
        let evra = block.evra().clone();
        let versions = self.map_for(&block).entry(name).or_default();
        if let Some(existing) = versions.get(&evra) {
            return Err(Error::DuplicateEvra {
                evra: evra.to_string(),
                package1: block.top_pkg().to_string(),
                package2: existing.top_pkg().to_string(),
            });
        }
        versions.insert(evra, block);
        Ok(())
    }

    /// Remove every version of the named family from the catalog.
    pub fn remove_family(&mut self, name: &str) -> bool {
        [
            &mut self.blocks,
            &mut self.owner_pkgs,
            &mut self.partner_pkgs,
        ]
        .into_iter()
        .fold(false, |hit, map| map.remove(name).is_some() || hit)
    }

    /// Iterate over every regular and tie block.
    pub fn all_blocks(&self) -> impl Iterator<Item = &AnyBlock> {
        self.blocks.values().flat_map(|versions| versions.values())
    }

    /// The top packages of all tie blocks, with their family names.
    pub fn tie_ui_pkgs(&self) -> Vec<(String, Evra, Package)> {
        self.all_blocks()
            .filter_map(|block| match block {
                AnyBlock::Tie(tie) => {
                    Some((tie.name.clone(), tie.evra.clone(), tie.top_pkg.clone()))
                }
                AnyBlock::Regular(_) => None,
            })
            .collect()
    }

    fn singleton_pkgs(map: &BlockMap) -> BTreeSet<Package> {
        map.values()
            .flat_map(|versions| versions.values())
            .flat_map(|block| block.all_pkgs())
            .collect()
    }

    /// All packages in the given image group.
    pub fn get_all_pkgs(&self, group: PackageGroup) -> BTreeSet<Package> {
        match group {
            PackageGroup::Main => self
                .all_blocks()
                .flat_map(|block| block.all_pkgs())
                .collect(),
            PackageGroup::Owner => Self::singleton_pkgs(&self.owner_pkgs),
            PackageGroup::Partner => Self::singleton_pkgs(&self.partner_pkgs),
        }
    }

    /// All packages across every image group.
    pub fn all_pkgs_all_groups(&self) -> BTreeSet<Package> {
        PackageGroup::ALL
            .iter()
            .flat_map(|group| self.get_all_pkgs(*group))
            .collect()
    }

    /// Attach an instance package to the named block at the package's
    /// EVRA. Returns false when no block at that version exists; the
    /// caller leaves the package unconsumed.
    pub fn add_instance_pkg(&mut self, block_name: &str, pkg: &Package) -> bool {
        let Some(AnyBlock::Regular(block)) = self
            .blocks
            .get_mut(block_name)
            .and_then(|versions| versions.get_mut(&pkg.evra()))
        else {
            return false;
        };
        debug!("Adding instance package {} to block {}", pkg, block_name);
        block.instance_pkgs.insert(pkg.clone());
        true
    }

    /// Attach a partition package to the named block.
    ///
    /// If no block exists at the package's own EVRA, per-PID third-party
    /// rebuilds are matched by the version of their requires edge on the
    /// top-level package instead.
    pub fn add_partition_pkg(&mut self, block_name: &str, pkg: &Package) -> bool {
        let Some(versions) = self.blocks.get_mut(block_name) else {
            return false;
        };
        if let Some(AnyBlock::Regular(block)) = versions.get_mut(&pkg.evra()) {
            debug!("Adding partition package {} to block {}", pkg, block_name);
            block.partition_pkgs.insert(pkg.clone());
            return true;
        }

        let Some(top_req_version) = pkg
            .requires
            .iter()
            .find(|req| req.name() == block_name)
            .and_then(|req| req.version())
        else {
            return false;
        };
        for block in versions.values_mut() {
            if let AnyBlock::Regular(block) = block {
                if top_req_version == block.evra.version.as_str() {
                    debug!("Adding partition package {} to block {}", pkg, block_name);
                    block.partition_pkgs.insert(pkg.clone());
                    return true;
                }
            }
        }
        false
    }

    /// Attach a tied package to the tie block at the given version.
    pub fn add_tied_pkg(&mut self, block_name: &str, evra: &Evra, pkg: &Package) {
        if let Some(AnyBlock::Tie(tie)) = self
            .blocks
            .get_mut(block_name)
            .and_then(|versions| versions.get_mut(evra))
        {
            debug!("Adding tied package {} to tie block {}", pkg, block_name);
            tie.tied_pkgs.insert(pkg.clone());
        }
    }

    /// Add an owner package as a singleton pseudo-block.
    pub fn add_owner_pkg(&mut self, pkg: Package) {
        debug!("Adding owner package {}", pkg);
        self.owner_pkgs
            .entry(pkg.name.clone())
            .or_default()
            .insert(pkg.evra(), AnyBlock::Regular(Block::new(pkg.name.clone(), pkg)));
    }

    /// Add a partner package as a singleton pseudo-block.
    pub fn add_partner_pkg(&mut self, pkg: Package) {
        debug!("Adding partner package {}", pkg);
        self.partner_pkgs
            .entry(pkg.name.clone())
            .or_default()
            .insert(pkg.evra(), AnyBlock::Regular(Block::new(pkg.name.clone(), pkg)));
    }

    /// The PIDs the main package set supports.
    pub fn supported_pids(&self) -> Result<BTreeSet<String>> {
        let identifiers = pid_identifier_packages(&self.get_all_pkgs(PackageGroup::Main))?;
        Ok(identifiers.into_iter().map(|id| id.pid).collect())
    }

    /// Map every supported PID to the packages installed on it.
    ///
    /// Owner and partner packages are grouped under a pseudo-PID together
    /// with the lowest-named route-processor PID's package set, since they
    /// install alongside the main set on an RP.
    pub fn pkgs_per_pid(&self) -> Result<BTreeMap<String, BTreeSet<Package>>> {
        let mut pid_to_pkgs: BTreeMap<String, BTreeSet<Package>> = BTreeMap::new();
        let mut chosen_rp: Option<String> = None;

        for identifier in pid_identifier_packages(&self.get_all_pkgs(PackageGroup::Main))? {
            let mut pkgs = BTreeSet::from([identifier.pkg.clone()]);
            for block in self.all_blocks() {
                pkgs.extend(block.pkgs_on_pid(&identifier.pid));
            }
            if RP_CARD_TYPES.contains(&identifier.card_type.as_str())
                && chosen_rp
                    .as_deref()
                    .is_none_or(|current| identifier.pid.as_str() < current)
            {
                chosen_rp = Some(identifier.pid.clone());
            }
            pid_to_pkgs.insert(identifier.pid, pkgs);
        }

        let owner_pkgs = Self::singleton_pkgs(&self.owner_pkgs);
        let partner_pkgs = Self::singleton_pkgs(&self.partner_pkgs);
        if !owner_pkgs.is_empty() || !partner_pkgs.is_empty() {
            let Some(rp) = &chosen_rp else {
                return Err(Error::NoPidIdentifiers {
                    reason: "no RP card type was found".to_string(),
                });
            };
            let mut pkgs = pid_to_pkgs[rp].clone();
            pkgs.extend(owner_pkgs);
            pkgs.extend(partner_pkgs);
            pid_to_pkgs.insert(OWNER_PARTNER_PSEUDO_PID.to_string(), pkgs);
        }

        if pid_to_pkgs.is_empty() {
            return Err(Error::NoPidIdentifiers {
                reason: "no PID identifier packages were found".to_string(),
            });
        }

        // Every package must land on at least one PID. This should never
        // fire given the filtering pass runs first.
        let grouped: BTreeSet<&Package> = pid_to_pkgs.values().flatten().collect();
        let ungrouped: Vec<String> = self
            .all_pkgs_all_groups()
            .iter()
            .filter(|pkg| !grouped.contains(pkg))
            .map(|pkg| pkg.to_string())
            .collect();
        if !ungrouped.is_empty() {
            return Err(Error::NoPidIdentifiers {
                reason: format!(
                    "the following packages are not on any PID: {}",
                    ungrouped.join(", ")
                ),
            });
        }

        Ok(pid_to_pkgs)
    }

    /// Drop every package not claimed by one of the given PIDs.
    ///
    /// Tie-block, owner and partner packages go to all PIDs and are never
    /// filtered.
    pub fn filter_to_supported_pids(&mut self, pids_to_support: &[String]) {
        assert!(!pids_to_support.is_empty());

        let mut pkgs_to_keep: BTreeSet<Package> = BTreeSet::new();
        for block in self.all_blocks() {
            for pid in pids_to_support {
                pkgs_to_keep.extend(block.pkgs_on_pid(pid));
            }
        }
        let pkgs_to_remove: BTreeSet<Package> = self
            .all_pkgs_all_groups()
            .difference(&pkgs_to_keep)
            .cloned()
            .collect();
        debug!("Packages marked for removal: {} packages", pkgs_to_remove.len());

        for versions in self.blocks.values_mut() {
            for block in versions.values_mut() {
                if let AnyBlock::Regular(regular) = block {
                    if regular
                        .all_pkgs()
                        .iter()
                        .any(|pkg| pkgs_to_remove.contains(pkg))
                    {
                        debug!("Filtering block {}", regular.name);
                        *regular = regular.filter_pkgs(&pkgs_to_remove);
                    }
                }
            }
        }
    }
}

/// A package that identifies one hardware PID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidIdentifier {
    pub pid: String,
    pub pkg: Package,
    pub card_type: String,
}

/// The subset of packages that are PID identifiers.
///
/// A package providing `cisco-pid-*` for more than one PID, or declaring
/// more than one card type, is an error.
pub fn pid_identifier_packages(
    pkgs: &BTreeSet<Package>,
) -> Result<Vec<PidIdentifier>> {
    let mut identifiers = Vec::new();
    for pkg in pkgs {
        let pid_deps: Vec<&PackageDep> = provides_with_prefix(pkg, CISCO_PID_PREFIX).collect();
        match pid_deps.as_slice() {
            [] => {}
            [provider] => {
                let card_types: BTreeSet<&str> =
                    provides_with_prefix(pkg, CISCO_CARD_TYPE_PREFIX)
                        .map(|dep| &dep.name()[CISCO_CARD_TYPE_PREFIX.len()..])
                        .collect();
                if card_types.len() != 1 {
                    return Err(Error::MultipleCardTypes {
                        package: pkg.to_string(),
                        card_types: card_types.into_iter().collect::<Vec<_>>().join(", "),
                    });
                }
                identifiers.push(PidIdentifier {
                    pid: provider.name()[CISCO_PID_PREFIX.len()..].to_string(),
                    pkg: pkg.clone(),
                    card_type: card_types.into_iter().next().unwrap_or_default().to_string(),
                });
            }
            multiple => {
                return Err(Error::AmbiguousPidProvider {
                    package: pkg.to_string(),
                    providers: multiple
                        .iter()
                        .map(|dep| dep.name().to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
        }
    }
    Ok(identifiers)
}

/// Check a restricted PID list covers the required card classes.
///
/// A distributed system needs both a route-processor-class and a
/// line-card-class PID, or neither.
pub fn validate_pid_classes(
    pid_card_types: &BTreeMap<String, String>,
    requested: &[String],
) -> Result<()> {
    let selected_types: BTreeSet<&str> = requested
        .iter()
        .filter_map(|pid| pid_card_types.get(pid).map(String::as_str))
        .collect();

    let has_lc = selected_types
        .iter()
        .any(|t| LC_CARD_TYPES.contains(t));
    let has_rp = selected_types
        .iter()
        .any(|t| RP_CARD_TYPES.contains(t));
    let has_distributed_rp = selected_types.contains("rp-distributed");

    if has_distributed_rp && !has_lc {
        return Err(Error::BadPidClasses {
            missing_class: card_class_readable("lc-distributed").to_string(),
        });
    }
    if has_lc && !has_rp {
        return Err(Error::BadPidClasses {
            missing_class: card_class_readable("rp-distributed").to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::testutil::make_package;

    fn pid_identifier(pid: &str, card_type: &str) -> Package {
        make_package(
            &format!("xr-{pid}"),
            "7.5.1v1.0.0",
            "1",
            &[
                &format!("{CISCO_PID_PREFIX}{pid}"),
                &format!("{CISCO_CARD_TYPE_PREFIX}{card_type}"),
                "cisco-iosxr",
            ],
            &[],
        )
    }

    fn block_with_instance(pid: &str) -> Block {
        let top = make_package(
            "xr-bgp",
            "7.5.1v1.0.0",
            "1",
            &["xr-bgp-BLOCK", "cisco-iosxr", "cisco-iosxr-user-installable"],
            &["xr-bgp-PID"],
        );
        let instance = make_package(
            "xr-bgp-instance",
            "7.5.1v1.0.0",
            "1",
            &["xr-bgp-PID", "cisco-iosxr"],
            &[&format!("{CISCO_PID_PREFIX}{pid}"), "xr-bgp-part"],
        );
        let partition = make_package(
            "xr-bgp-part",
            "7.5.1v1.0.0",
            "1",
            &["cisco-iosxr"],
            &["xr-bgp"],
        );
        let mut block = Block::new("xr-bgp", top);
        block.instance_pkgs.insert(instance);
        block.partition_pkgs.insert(partition);
        block
    }

    #[test]
    fn test_dep_matches_boolean_expression() {
        let dep = PackageDep::parse("(cisco-pid-88-LC0-36FH or cisco-pid-88-LC0-36FH-M)");
        assert!(dep_matches_name(&dep, "cisco-pid-88-LC0-36FH"));
        assert!(dep_matches_name(&dep, "cisco-pid-88-LC0-36FH-M"));
        assert!(!dep_matches_name(&dep, "cisco-pid-88-RP0"));
    }

    #[test]
    fn test_pkgs_on_pid_includes_instance_and_partitions() {
        let block = block_with_instance("8800-LC-36FH");
        let pkgs = block.pkgs_on_pid("8800-LC-36FH");
        let names: BTreeSet<&str> = pkgs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            BTreeSet::from(["xr-bgp", "xr-bgp-instance", "xr-bgp-part"])
        );
    }

    #[test]
    fn test_pkgs_on_other_pid_is_top_only() {
        let block = block_with_instance("8800-LC-36FH");
        let pkgs = block.pkgs_on_pid("8800-RP");
        assert_eq!(pkgs.len(), 1);
        assert!(pkgs.iter().any(|p| p.name == "xr-bgp"));
    }

    #[test]
    fn test_duplicate_evra_is_an_error() {
        let mut groups = GroupedPackages::new();
        let block = block_with_instance("8800-LC-36FH");
        groups.add_block(AnyBlock::Regular(block.clone())).unwrap();
        let err = groups.add_block(AnyBlock::Regular(block)).unwrap_err();
        assert!(matches!(err, Error::DuplicateEvra { .. }));
    }

    #[test]
    fn test_owner_packages_route_to_owner_map() {
        let mut groups = GroupedPackages::new();
        let owner = make_package("owner-app", "1.0", "1", &["cisco-owner-package"], &[]);
        groups
            .add_block(AnyBlock::Regular(Block::new("owner-app", owner)))
            .unwrap();
        assert!(groups.blocks.is_empty());
        assert_eq!(groups.owner_pkgs.len(), 1);
        assert_eq!(groups.get_all_pkgs(PackageGroup::Owner).len(), 1);
    }

    #[test]
    fn test_remove_family_drops_every_version() {
        let mut groups = GroupedPackages::new();
        groups
            .add_block(AnyBlock::Regular(block_with_instance("8800-LC-36FH")))
            .unwrap();
        let newer = make_package(
            "xr-bgp",
            "7.5.1v1.1.0",
            "1",
            &["xr-bgp-BLOCK", "cisco-iosxr", "cisco-iosxr-user-installable"],
            &["xr-bgp-PID"],
        );
        groups
            .add_block(AnyBlock::Regular(Block::new("xr-bgp", newer)))
            .unwrap();
        groups.add_owner_pkg(make_package(
            "owner-app",
            "1.0",
            "1",
            &["cisco-owner-package"],
            &[],
        ));

        assert!(groups.remove_family("xr-bgp"));
        assert!(groups.blocks.is_empty());
        assert!(groups.remove_family("owner-app"));
        assert!(groups.get_all_pkgs(PackageGroup::Owner).is_empty());
        assert!(!groups.remove_family("xr-gone"));
    }

    #[test]
    fn test_supported_pids() {
        let mut groups = GroupedPackages::new();
        let mut block = block_with_instance("8800-LC-36FH");
        block
            .partition_pkgs
            .insert(pid_identifier("8800-RP", "rp-distributed"));
        block
            .partition_pkgs
            .insert(pid_identifier("8800-LC-36FH", "lc-distributed"));
        groups.add_block(AnyBlock::Regular(block)).unwrap();

        assert_eq!(
            groups.supported_pids().unwrap(),
            BTreeSet::from(["8800-LC-36FH".to_string(), "8800-RP".to_string()])
        );
    }

    #[test]
    fn test_pid_identifier_packages() {
        let pkgs = BTreeSet::from([
            pid_identifier("8800-RP", "rp-distributed"),
            pid_identifier("8800-LC-36FH", "lc-distributed"),
            make_package("xr-bgp", "1.0", "1", &["cisco-iosxr"], &[]),
        ]);
        let mut identifiers = pid_identifier_packages(&pkgs).unwrap();
        identifiers.sort_by(|a, b| a.pid.cmp(&b.pid));
        assert_eq!(identifiers.len(), 2);
        assert_eq!(identifiers[0].pid, "8800-LC-36FH");
        assert_eq!(identifiers[0].card_type, "lc-distributed");
        assert_eq!(identifiers[1].pid, "8800-RP");
    }

    #[test]
    fn test_multiple_pid_providers_is_an_error() {
        let pkg = make_package(
            "xr-twopid",
            "1.0",
            "1",
            &[
                &format!("{CISCO_PID_PREFIX}A"),
                &format!("{CISCO_PID_PREFIX}B"),
            ],
            &[],
        );
        let err = pid_identifier_packages(&BTreeSet::from([pkg])).unwrap_err();
        assert!(matches!(err, Error::AmbiguousPidProvider { .. }));
    }

    #[test]
    fn test_multiple_card_types_is_an_error() {
        let pkg = make_package(
            "xr-twocard",
            "1.0",
            "1",
            &[
                &format!("{CISCO_PID_PREFIX}A"),
                &format!("{CISCO_CARD_TYPE_PREFIX}rp-distributed"),
                &format!("{CISCO_CARD_TYPE_PREFIX}lc-distributed"),
            ],
            &[],
        );
        let err = pid_identifier_packages(&BTreeSet::from([pkg])).unwrap_err();
        assert!(matches!(err, Error::MultipleCardTypes { .. }));
    }

    #[test]
    fn test_validate_pid_classes_distributed_rp_needs_lc() {
        let card_types = BTreeMap::from([
            ("8800-RP".to_string(), "rp-distributed".to_string()),
            ("8800-LC-36FH".to_string(), "lc-distributed".to_string()),
        ]);
        let err =
            validate_pid_classes(&card_types, &["8800-RP".to_string()]).unwrap_err();
        match err {
            Error::BadPidClasses { missing_class } => {
                assert_eq!(missing_class, "Line Card (modular)");
            }
            other => panic!("unexpected error: {other}"),
        }

        validate_pid_classes(
            &card_types,
            &["8800-RP".to_string(), "8800-LC-36FH".to_string()],
        )
        .unwrap();
    }

    #[test]
    fn test_validate_pid_classes_centralized_stands_alone() {
        let card_types =
            BTreeMap::from([("NCS-57B1".to_string(), "rplc-centralized".to_string())]);
        validate_pid_classes(&card_types, &["NCS-57B1".to_string()]).unwrap();
    }

    #[test]
    fn test_filter_to_supported_pids_drops_unclaimed_instances() {
        let mut groups = GroupedPackages::new();
        let mut block = block_with_instance("8800-LC-36FH");
        let other_instance = make_package(
            "xr-bgp-other",
            "7.5.1v1.0.0",
            "1",
            &["xr-bgp-PID", "cisco-iosxr"],
            &[&format!("{CISCO_PID_PREFIX}8800-LC-48FH")],
        );
        block.instance_pkgs.insert(other_instance.clone());
        groups.add_block(AnyBlock::Regular(block)).unwrap();

        groups.filter_to_supported_pids(&["8800-LC-36FH".to_string()]);

        let remaining = groups.get_all_pkgs(PackageGroup::Main);
        assert!(!remaining.contains(&other_instance));
        assert!(remaining.iter().any(|p| p.name == "xr-bgp-instance"));
        assert!(remaining.iter().any(|p| p.name == "xr-bgp"));
    }

    #[test]
    fn test_pkgs_per_pid_includes_owner_pseudo_pid() {
        let mut groups = GroupedPackages::new();
        let mut block = block_with_instance("8800-LC-36FH");
        let rp_identifier = pid_identifier("8800-RP", "rp-distributed");
        let lc_identifier = pid_identifier("8800-LC-36FH", "lc-distributed");
        block.partition_pkgs.insert(rp_identifier.clone());
        groups.add_block(AnyBlock::Regular(block)).unwrap();
        // Identifier packages live inside the main set as instance-like
        // members; simplest is separate singleton blocks here.
        groups
            .add_block(AnyBlock::Regular(Block::new(
                rp_identifier.name.clone(),
                rp_identifier,
            )))
            .unwrap();
        groups
            .add_block(AnyBlock::Regular(Block::new(
                lc_identifier.name.clone(),
                lc_identifier,
            )))
            .unwrap();
        groups.add_owner_pkg(make_package(
            "owner-app",
            "1.0",
            "1",
            &["cisco-owner-package"],
            &[],
        ));

        let per_pid = groups.pkgs_per_pid().unwrap();
        assert!(per_pid.contains_key("8800-RP"));
        assert!(per_pid.contains_key("8800-LC-36FH"));
        let pseudo = &per_pid[OWNER_PARTNER_PSEUDO_PID];
        assert!(pseudo.iter().any(|p| p.name == "owner-app"));
        assert!(pseudo.iter().any(|p| p.name == "xr-8800-RP"));
    }
}
