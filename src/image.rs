// src/image.rs

//! Seam to the external image container tooling.
//!
//! The ISO container format is owned by a separate tool which can report
//! its capabilities, query the image metadata, and unpack or repack the
//! image tree. Everything behind [`ImageOps`] is that tool's concern;
//! this crate only consumes the JSON it emits.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::isofs::INSTALLABLE_GROUP_ATTRS;

/// Metadata returned by the tool's query-content operation.
#[derive(Debug, Clone, Deserialize)]
pub struct IsoContent {
    pub mdata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub groups: Vec<GroupMdata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupMdata {
    pub name: String,
    #[serde(default)]
    pub attrs: Vec<GroupAttrMdata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupAttrMdata {
    pub name: String,
}

impl IsoContent {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Image(e.to_string()))
    }

    /// Names of the groups carrying the given attribute.
    pub fn groups_with_attr(&self, attribute: &str) -> Vec<String> {
        self.groups
            .iter()
            .filter(|group| group.attrs.iter().any(|attr| attr.name == attribute))
            .map(|group| group.name.clone())
            .collect()
    }

    /// Groups whose packages form part of the install set.
    pub fn installable_groups(&self) -> BTreeSet<String> {
        INSTALLABLE_GROUP_ATTRS
            .iter()
            .flat_map(|attr| self.groups_with_attr(attr))
            .collect()
    }

    fn mdata_str(&self, key: &str) -> Option<&str> {
        self.mdata.get(key).and_then(|value| value.as_str())
    }

    /// The distribution version of the image.
    pub fn xr_version(&self) -> Result<String> {
        self.mdata_str("xr-version")
            .map(str::to_string)
            .ok_or(Error::NoIsoVersion)
    }

    pub fn platform_family(&self) -> Result<String> {
        self.mdata_str("platform-family")
            .map(str::to_string)
            .ok_or_else(|| Error::Image("no platform-family in ISO metadata".to_string()))
    }

    pub fn architecture(&self) -> Option<String> {
        self.mdata_str("architecture").map(str::to_string)
    }
}

/// Operations the image container tool must provide.
pub trait ImageOps {
    /// Whether the image is signed with the development key rather than
    /// the release key.
    fn is_dev_signed(&self) -> bool;

    fn query_content(&self) -> Result<IsoContent>;

    /// Packages the image declares as required, per group.
    fn required_pkgs(&self) -> Result<BTreeMap<String, Vec<String>>>;

    fn unpack_iso(&self, iso_dir: &Path) -> Result<()>;

    fn pack_iso(&self, iso_dir: &Path, iso_name: &str) -> Result<()>;
}

/// Command-backed implementation of [`ImageOps`].
#[derive(Debug)]
pub struct Image {
    tool: PathBuf,
    iso: PathBuf,
    capabilities: BTreeMap<String, String>,
}

impl Image {
    /// Probe the tool's capabilities for the given ISO.
    ///
    /// A tool reporting capability version "0" predates the operations
    /// this build needs and is rejected up front.
    pub fn new(tool: PathBuf, iso: PathBuf) -> Result<Self> {
        let output = run_tool(&tool, &["--capabilities", "-i"], Some(iso.as_path()))?;
        let capabilities: BTreeMap<String, String> =
            serde_json::from_str(&output).map_err(|e| {
                Error::Image(format!("failed to decode capabilities JSON: {e}"))
            })?;
        let version = capabilities.get("version").cloned().unwrap_or_default();
        if version.is_empty() || version == "0" {
            return Err(Error::Image(
                "the ISO's image tooling is a legacy version without the \
                 capabilities required by this build"
                    .to_string(),
            ));
        }
        debug!("Image tool capabilities: {:?}", capabilities);
        Ok(Image {
            tool,
            iso,
            capabilities,
        })
    }

    fn supports(&self, operation: &str) -> bool {
        self.capabilities.contains_key(operation)
    }

    fn call(&self, operation: &str, args: &[&str], with_iso: bool) -> Result<String> {
        if !self.supports(operation) {
            return Err(Error::Image(format!(
                "the image tooling does not support the '{operation}' operation"
            )));
        }
        let mut full_args = vec![operation];
        full_args.extend_from_slice(args);
        if with_iso {
            full_args.push("-i");
        }
        run_tool(&self.tool, &full_args, with_iso.then_some(self.iso.as_path()))
    }
}

fn run_tool(tool: &Path, args: &[&str], iso: Option<&Path>) -> Result<String> {
    let mut cmd = Command::new(tool);
    cmd.args(args);
    if let Some(iso) = iso {
        cmd.arg(iso);
    }
    debug!("Running image tool: {:?}", cmd);
    let output = cmd.output()?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Image(format!(
            "image tool command {:?} failed:\n{}\n{}",
            args.first().copied().unwrap_or_default(),
            stdout,
            stderr
        )));
    }
    Ok(stdout)
}

impl ImageOps for Image {
    fn is_dev_signed(&self) -> bool {
        self.capabilities
            .get("signing-key")
            .is_some_and(|key| key == "dev")
    }

    fn query_content(&self) -> Result<IsoContent> {
        let output = self.call("query-content", &[], true)?;
        IsoContent::parse(&output)
    }

    fn required_pkgs(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let output = self.call("get-required-pkgs", &[], true)?;
        serde_json::from_str(&output).map_err(|e| Error::Image(e.to_string()))
    }

    fn unpack_iso(&self, iso_dir: &Path) -> Result<()> {
        debug!("Unpacking ISO into {}", iso_dir.display());
        let dir = iso_dir.display().to_string();
        self.call("unpack-iso", &["--iso-directory", &dir], true)?;
        Ok(())
    }

    fn pack_iso(&self, iso_dir: &Path, iso_name: &str) -> Result<()> {
        debug!("Packing ISO from {}", iso_dir.display());
        let dir = iso_dir.display().to_string();
        self.call(
            "pack-iso",
            &["--iso-name", iso_name, "--iso-directory", &dir],
            false,
        )?;
        Ok(())
    }
}
