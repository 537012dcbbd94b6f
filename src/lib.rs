// src/lib.rs

//! Golden ISO builder for IOS XR network operating system images.
//!
//! A golden ISO is a base image repacked with a chosen set of package
//! updates: packages are grouped into logical blocks, one version of
//! each block is picked from the base image and the update
//! repositories, the result is verified per hardware PID, and the image
//! tree is updated and repacked.
//!
//! # Architecture
//!
//! - Packages: one data model from two sources (RPM file queries and
//!   repodata XML)
//! - Blocks: families of packages that move together at one version
//! - Picker: one surviving version per family, plus the add/remove
//!   delta against the base image
//! - Checks: per-PID install simulation and signature provenance

pub mod blocks;
pub mod checks;
pub mod cli;
pub mod coordinate;
mod error;
pub mod executor;
pub mod image;
pub mod isofs;
pub mod packages;
pub mod picker;
pub mod repos;
pub mod rpmtool;
pub mod version;

pub use blocks::{AnyBlock, Block, GroupedPackages, TieBlock};
pub use error::{Error, Result};
pub use executor::{Executor, Parallel, Serial};
pub use isofs::PackageGroup;
pub use packages::{Package, PackageDep};
pub use rpmtool::ToolCache;
pub use version::{compare_versions, Evra, Version};
