// src/isofs/mod.rs

//! Operations on the unpacked image's group directory layout.
//!
//! Packages live under `groups/group.<name>/packages`, with declared
//! attributes alongside in `groups/group.<name>/attributes/<attr>.attr.json`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// An attribute that may be associated with a package group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupAttribute {
    pub name: &'static str,
    pub essential: bool,
    pub message: &'static str,
    pub value: Option<String>,
}

#[derive(Serialize)]
struct GroupAttributeJson<'a> {
    name: &'a str,
    r#type: &'a str,
    value: Option<&'a str>,
    message: &'a str,
}

impl GroupAttribute {
    const fn new(name: &'static str, essential: bool, message: &'static str) -> Self {
        GroupAttribute {
            name,
            essential,
            message,
            value: None,
        }
    }

    /// The JSON stored in this attribute's `.attr.json` file.
    pub fn to_json(&self) -> Result<String> {
        let json = GroupAttributeJson {
            name: self.name,
            r#type: if self.essential {
                "essential"
            } else {
                "informational"
            },
            value: self.value.as_deref(),
            message: self.message,
        };
        serde_json::to_string(&json).map_err(|e| Error::Image(e.to_string()))
    }
}

const ATTR_INSTALL: GroupAttribute = GroupAttribute::new(
    "install",
    true,
    "This software can only be installed on versions of IOS XR that support \
     installing software",
);
const ATTR_BMC: GroupAttribute = GroupAttribute::new("bmc", false, "");
const ATTR_OWNER_PKGS: GroupAttribute = GroupAttribute::new("owner_packages", false, "");
const ATTR_PARTNER_PKGS: GroupAttribute = GroupAttribute::new("partner_packages", false, "");

/// Group attribute names that mark a group as user-installable.
pub const INSTALLABLE_GROUP_ATTRS: [&str; 3] = ["install", "owner_packages", "partner_packages"];

/// The groups into which packages are placed in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PackageGroup {
    /// The main install set. The only group whose packages must carry a
    /// valid signature chain.
    Main,
    /// Packages supplied by the device owner.
    Owner,
    /// Packages supplied by a partner.
    Partner,
}

impl PackageGroup {
    pub const ALL: [PackageGroup; 3] =
        [PackageGroup::Main, PackageGroup::Owner, PackageGroup::Partner];

    pub fn group_name(self) -> &'static str {
        match self {
            PackageGroup::Main => "main",
            PackageGroup::Owner => "owner",
            PackageGroup::Partner => "partner",
        }
    }

    /// Whether packages in this group are signature-checked.
    pub fn verify_signatures(self) -> bool {
        matches!(self, PackageGroup::Main)
    }

    fn attributes(self) -> Vec<GroupAttribute> {
        let mut attrs = match self {
            PackageGroup::Main => vec![ATTR_INSTALL, ATTR_BMC],
            PackageGroup::Owner => vec![ATTR_OWNER_PKGS],
            PackageGroup::Partner => vec![ATTR_PARTNER_PKGS],
        };
        attrs.push(GroupAttribute {
            name: "name",
            essential: false,
            message: "",
            value: Some(self.group_name().to_string()),
        });
        attrs
    }
}

/// Path to a group's package directory within the unpacked image.
pub fn group_package_dir(iso_dir: &Path, group: &str) -> PathBuf {
    iso_dir.join(format!("groups/group.{group}/packages"))
}

fn group_attr_dir(iso_dir: &Path, group: &str) -> PathBuf {
    iso_dir.join(format!("groups/group.{group}/attributes"))
}

/// All RPM files in the named group, in path order.
pub fn group_rpms(iso_dir: &Path, group: &str) -> Vec<PathBuf> {
    let dir = group_package_dir(iso_dir, group);
    if !dir.exists() {
        return Vec::new();
    }
    let mut rpms: Vec<PathBuf> = WalkDir::new(&dir)
        .into_iter()
        .flatten()
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "rpm")
        })
        .map(|entry| entry.into_path())
        .collect();
    rpms.sort();
    rpms
}

/// Ensure the group directory exists, creating its attribute files if
/// absent.
fn ensure_group_exists(iso_dir: &Path, group: PackageGroup) -> Result<()> {
    fs::create_dir_all(group_package_dir(iso_dir, group.group_name()))?;
    let attr_dir = group_attr_dir(iso_dir, group.group_name());
    fs::create_dir_all(&attr_dir)?;
    for attr in group.attributes() {
        let attr_file = attr_dir.join(format!("{}.attr.json", attr.name));
        fs::write(&attr_file, attr.to_json()?)?;
    }
    Ok(())
}

/// Copy an RPM into the named group of the unpacked image.
pub fn add_rpm(iso_dir: &Path, rpm_path: &Path, group: PackageGroup) -> Result<()> {
    if !iso_dir.exists() {
        return Err(Error::Image(format!(
            "The ISO has not been unpacked correctly to {}",
            iso_dir.display()
        )));
    }
    ensure_group_exists(iso_dir, group)?;
    let filename = rpm_path
        .file_name()
        .ok_or_else(|| Error::Image(format!("Not a file: {}", rpm_path.display())))?;
    let dest = group_package_dir(iso_dir, group.group_name()).join(filename);
    debug!(
        "Adding {} to {} in the unpacked ISO",
        rpm_path.display(),
        dest.display()
    );
    fs::copy(rpm_path, &dest)?;
    Ok(())
}

/// Delete packages matching the given name pattern from the installable
/// groups.
///
/// Only files under `groups/group.<name>/packages` are candidates, so
/// top-level image files can never be deleted by a stray pattern.
pub fn remove_package(
    iso_dir: &Path,
    pattern: &str,
    installable_groups: &BTreeSet<String>,
) -> Result<()> {
    for group in installable_groups {
        let search = group_package_dir(iso_dir, group).join(pattern);
        let matches = glob::glob(&search.display().to_string())
            .map_err(|e| Error::Image(e.to_string()))?;
        for item in matches.flatten() {
            debug!("Removing {} from the unpacked ISO", item.display());
            fs::remove_file(&item)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_rpm_creates_group_and_attributes() {
        let tmp = tempfile::tempdir().unwrap();
        let rpm = tmp.path().join("xr-foo-1.0-1.x86_64.rpm");
        fs::write(&rpm, b"rpm data").unwrap();
        let iso_dir = tmp.path().join("iso");
        fs::create_dir_all(&iso_dir).unwrap();

        add_rpm(&iso_dir, &rpm, PackageGroup::Main).unwrap();

        assert!(iso_dir
            .join("groups/group.main/packages/xr-foo-1.0-1.x86_64.rpm")
            .exists());
        let attr = iso_dir.join("groups/group.main/attributes/install.attr.json");
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(attr).unwrap()).unwrap();
        assert_eq!(json["type"], "essential");
        let name_attr = iso_dir.join("groups/group.main/attributes/name.attr.json");
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(name_attr).unwrap()).unwrap();
        assert_eq!(json["value"], "main");
    }

    #[test]
    fn test_remove_package_only_touches_group_packages() {
        let tmp = tempfile::tempdir().unwrap();
        let iso_dir = tmp.path().join("iso");
        let pkg_dir = group_package_dir(&iso_dir, "main");
        fs::create_dir_all(&pkg_dir).unwrap();
        fs::write(pkg_dir.join("xr-foo-1.0-1.x86_64.rpm"), b"a").unwrap();
        // A top-level file with a matching name must survive.
        fs::write(iso_dir.join("xr-foo-1.0-1.x86_64.rpm"), b"b").unwrap();

        let groups: BTreeSet<String> = ["main".to_string()].into();
        remove_package(&iso_dir, "xr-foo-*", &groups).unwrap();

        assert!(!pkg_dir.join("xr-foo-1.0-1.x86_64.rpm").exists());
        assert!(iso_dir.join("xr-foo-1.0-1.x86_64.rpm").exists());
    }

    #[test]
    fn test_group_rpms_lists_only_rpm_files() {
        let tmp = tempfile::tempdir().unwrap();
        let iso_dir = tmp.path().join("iso");
        let pkg_dir = group_package_dir(&iso_dir, "main");
        fs::create_dir_all(&pkg_dir).unwrap();
        fs::write(pkg_dir.join("b.rpm"), b"b").unwrap();
        fs::write(pkg_dir.join("a.rpm"), b"a").unwrap();
        fs::write(pkg_dir.join("notes.txt"), b"x").unwrap();

        let rpms = group_rpms(&iso_dir, "main");
        let names: Vec<_> = rpms
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.rpm", "b.rpm"]);
    }

    #[test]
    fn test_verify_signatures_only_for_main() {
        assert!(PackageGroup::Main.verify_signatures());
        assert!(!PackageGroup::Owner.verify_signatures());
        assert!(!PackageGroup::Partner.verify_signatures());
    }
}
