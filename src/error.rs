// src/error.rs

//! Crate-wide error types for the Golden ISO builder.
//!
//! Fatal errors abort the whole build; verification failures are collected
//! and raised once as [`Error::CheckFailures`] so a user sees every problem
//! in a single run.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the Golden ISO builder.
#[derive(Error, Debug)]
pub enum Error {
    /// An RPM query did not return a mandatory attribute.
    #[error(
        "The RPM query on {path} did not return information for the \
         '{attribute}' attribute. Query output:\n  {output}"
    )]
    MissingAttribute {
        attribute: &'static str,
        path: PathBuf,
        output: String,
    },

    /// The same package was found in multiple locations with differing
    /// content.
    #[error("These RPMs for {package} are not identical: {}", paths_list(.paths))]
    DifferentPackage {
        package: String,
        paths: Vec<PathBuf>,
    },

    /// A package could not be found in any search directory.
    #[error("The package {package} cannot be found")]
    PackageNotFound { package: String },

    /// Collation of all errors hit while mapping packages to file paths.
    #[error("{report}")]
    PackageFiles { report: String },

    /// Two top-level packages claim the same family at the same EVRA.
    #[error(
        "Multiple instances of RPM {evra} have been specified. Check the \
         contents of {package1} and {package2} to remove duplications."
    )]
    DuplicateEvra {
        evra: String,
        package1: String,
        package2: String,
    },

    /// A package claims to be an instance package for more than one family.
    #[error(
        "Package {package} appears to be an instance package for multiple \
         blocks via these providers: {providers}"
    )]
    AmbiguousInstance { package: String, providers: String },

    /// A package claims to be a partition package for more than one family.
    #[error(
        "Package {package} appears to be a partition package for multiple \
         blocks via these requirements: {requirements}"
    )]
    AmbiguousPartition {
        package: String,
        requirements: String,
    },

    /// A package identifies more than one hardware PID.
    #[error(
        "Package {package} appears to be a PID identifier package for more \
         than one PID via these providers: {providers}"
    )]
    AmbiguousPidProvider { package: String, providers: String },

    /// A PID identifier package declares multiple card types.
    #[error("Package {package} appears to have multiple card types: {card_types}")]
    MultipleCardTypes {
        package: String,
        card_types: String,
    },

    /// A user-installable package that fits no known classification.
    #[error("Don't know how to classify the user-installable package {package}")]
    UnclassifiablePackage { package: String },

    /// Native packages left over after grouping.
    #[error("Unable to group the following packages into blocks:\n{}", indented_list(.packages))]
    UngroupedPackages { packages: Vec<String> },

    /// An add-pattern filename matched packages in several versions of one
    /// family.
    #[error(
        "Block {name} has multiple versions ({versions}) containing packages \
         that match against the specified files to include: {filenames}"
    )]
    MultipleMatchingBlocks {
        name: String,
        versions: String,
        filenames: String,
    },

    /// An add-pattern that is not a filename and won't compile as a
    /// regular expression.
    #[error("The package pattern '{pattern}' is not a valid regular expression: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A family still resolves to more than one version after picking.
    /// Structurally unreachable given the selection rule; kept as a safety
    /// assertion.
    #[error("Duplicate blocks in output packages:\n{}", indented_list(.duplicates))]
    DuplicatePackages { duplicates: Vec<String> },

    /// The restricted PID list is missing a required card class.
    #[error(
        "The requested PID list is invalid: no PID of class '{missing_class}' \
         was included. A distributed system needs both a Route Processor \
         class and a Line Card class PID, or neither."
    )]
    BadPidClasses { missing_class: String },

    /// The package set contains no PID identifier packages at all.
    #[error("Unable to group the packages by PID: {reason}")]
    NoPidIdentifiers { reason: String },

    /// Aggregate of every dependency and signature failure found by the
    /// verification pass.
    #[error(
        "There are failures from checking dependencies and signatures of \
         chosen packages."
    )]
    CheckFailures,

    /// An external rpm invocation failed.
    #[error("{context}: command '{command}' failed with output:\n{output}")]
    RpmCommand {
        context: String,
        command: String,
        output: String,
    },

    /// Repository packages that don't match the base image.
    #[error("{report}")]
    InvalidPackages { report: String },

    /// The user asked to remove a package the image declares required.
    #[error(
        "The following packages were requested to be removed, but they are \
         required: {packages}"
    )]
    RequiredPackageRemoval { packages: String },

    /// Output directory already has contents and --clean wasn't given.
    #[error(
        "The specified output dir is not empty: {0}. Use the --clean option \
         to overwrite it."
    )]
    OutputDirNotEmpty(String),

    /// The GISO label contains characters outside [A-Za-z0-9_].
    #[error(
        "The label ({0}) should consist of only letters and numbers and \
         underscores"
    )]
    InvalidLabel(String),

    /// A repository argument that is neither an RPM, a tarball nor a
    /// directory.
    #[error(
        "The RPM specified ({0}) is not in an expected form. Must be either \
         a .rpm, .tar, .tgz file or a directory containing those file types"
    )]
    RpmWrongFormat(String),

    /// A repository argument that doesn't exist on disk.
    #[error("The RPM specified ({0}) could not be found")]
    RpmDoesNotExist(String),

    /// The input ISO path doesn't exist.
    #[error("The specified ISO file does not exist: {0}")]
    IsoNotFound(String),

    /// The ISO metadata has no version number.
    #[error("Could not determine version from ISO metadata")]
    NoIsoVersion,

    /// Errors from the external image container tooling.
    #[error("Image operation failed: {0}")]
    Image(String),

    /// Malformed repodata XML.
    #[error("Failed to parse repodata XML: {0}")]
    Xml(String),

    /// Repodata XML missing a mandatory tag or attribute.
    #[error("Unable to find the mandatory attribute '{0}' in RPM XML data")]
    XmlMissingAttr(String),

    /// Config file problems.
    #[error("Failed to load config file {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn paths_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn indented_list(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("  {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}
