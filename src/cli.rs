// src/cli.rs
//! Command-line interface for the golden ISO builder.
//!
//! Arguments can also be supplied through a YAML configuration file;
//! values given on the command line always win over the file.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Parser, Debug, Clone)]
#[command(name = "goldiso")]
#[command(version)]
#[command(about = "Build a golden ISO from a base image and update repositories", long_about = None)]
pub struct Args {
    /// Path to the base ISO image
    #[arg(short, long)]
    pub iso: PathBuf,

    /// Repositories of update RPMs: .rpm files, tarballs or directories
    #[arg(short, long, num_args = 1..)]
    pub repo: Vec<String>,

    /// Packages to include: exact RPM filenames or name patterns
    #[arg(short, long, num_args = 1..)]
    pub pkglist: Vec<String>,

    /// Block names to exclude from the output image
    #[arg(long, num_args = 1..)]
    pub remove_packages: Vec<String>,

    /// Restrict the output image to the given hardware PIDs
    #[arg(long, num_args = 1..)]
    pub only_support_pids: Vec<String>,

    /// Skip the per-PID dependency check
    #[arg(long)]
    pub skip_dep_check: bool,

    /// Show unfiltered dependency check output
    #[arg(long)]
    pub verbose_dep_check: bool,

    /// Directory to build the golden ISO into
    #[arg(long, default_value = "output_gisobuild")]
    pub out_dir: PathBuf,

    /// Existing directory to copy the built artefacts into
    #[arg(long)]
    pub copy_dir: Option<PathBuf>,

    /// Remove previous contents of the output directory
    #[arg(long)]
    pub clean: bool,

    /// Label appended to the output ISO name
    #[arg(short, long)]
    pub label: Option<String>,

    /// Path to the image container tool; found on PATH if not given
    #[arg(long)]
    pub image_tool: Option<PathBuf>,

    /// YAML file supplying any of the list or flag options
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Options that may be supplied through the YAML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    repo: Vec<String>,
    pkglist: Vec<String>,
    remove_packages: Vec<String>,
    only_support_pids: Vec<String>,
    skip_dep_check: bool,
    verbose_dep_check: bool,
    label: Option<String>,
    image_tool: Option<PathBuf>,
}

/// Split comma-separated list entries into individual items.
///
/// Lists can be given space separated (multiple argument values) or as a
/// single comma-separated string.
fn split_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .flat_map(|item| item.split(','))
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl Args {
    /// Merge in the config file, if one was given, and normalize list
    /// arguments.
    pub fn resolve(mut self) -> Result<Self> {
        if let Some(path) = &self.config {
            let contents = fs::read_to_string(path).map_err(|e| Error::Config {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            let config: ConfigFile =
                serde_yaml::from_str(&contents).map_err(|e| Error::Config {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;

            if self.repo.is_empty() {
                self.repo = config.repo;
            }
            if self.pkglist.is_empty() {
                self.pkglist = config.pkglist;
            }
            if self.remove_packages.is_empty() {
                self.remove_packages = config.remove_packages;
            }
            if self.only_support_pids.is_empty() {
                self.only_support_pids = config.only_support_pids;
            }
            self.skip_dep_check |= config.skip_dep_check;
            self.verbose_dep_check |= config.verbose_dep_check;
            if self.label.is_none() {
                self.label = config.label;
            }
            if self.image_tool.is_none() {
                self.image_tool = config.image_tool;
            }
        }

        self.repo = split_list(&self.repo);
        self.pkglist = split_list(&self.pkglist);
        self.remove_packages = split_list(&self.remove_packages);
        self.only_support_pids = split_list(&self.only_support_pids);
        Ok(self)
    }
}
