// src/rpmtool/mod.rs

//! Wrappers for running the external `rpm` tool.
//!
//! All invocations go through a [`ToolCache`], which resolves the needed
//! binaries once per build run and is passed explicitly to any component
//! that shells out.

use std::path::{Path, PathBuf};
use std::process::Command;

use nix::unistd::Uid;
use tracing::debug;

use crate::error::{Error, Result};

/// Resolved paths to the external tools used during a build.
///
/// Constructed once per run. `unshare` is optional and only used when
/// install simulation needs to chroot without root privileges.
#[derive(Debug, Clone)]
pub struct ToolCache {
    rpm: PathBuf,
    unshare: Option<PathBuf>,
    euid_is_root: bool,
}

impl ToolCache {
    /// Locate the external tools on PATH.
    pub fn new() -> Result<Self> {
        let rpm = which::which("rpm").map_err(|e| Error::RpmCommand {
            context: "Unable to find the rpm tool".to_string(),
            command: "rpm".to_string(),
            output: e.to_string(),
        })?;
        let unshare = which::which("unshare").ok();
        Ok(ToolCache {
            rpm,
            unshare,
            euid_is_root: Uid::effective().is_root(),
        })
    }

    /// Build the command for an rpm invocation.
    ///
    /// If the `--root` option is present and we aren't running as root, run
    /// in a new user namespace with the current user mapped to the
    /// superuser. This lets rpm call chroot() without the capability.
    fn rpm_command(&self, args: &[String]) -> Command {
        let needs_namespace = args.iter().any(|a| a == "--root") && !self.euid_is_root;
        match (&self.unshare, needs_namespace) {
            (Some(unshare), true) => {
                let mut cmd = Command::new(unshare);
                cmd.arg("-r").arg(&self.rpm).args(args);
                cmd
            }
            _ => {
                let mut cmd = Command::new(&self.rpm);
                cmd.args(args);
                cmd
            }
        }
    }

    fn run_rpm(&self, args: Vec<String>, context: &str) -> Result<String> {
        let mut cmd = self.rpm_command(&args);
        let rendered = format!("{} {}", self.rpm.display(), args.join(" "));
        let output = cmd.output().map_err(|e| Error::RpmCommand {
            context: context.to_string(),
            command: rendered.clone(),
            output: e.to_string(),
        })?;
        // rpm reports depcheck failures on stdout and most other errors on
        // stderr, so fold the two streams together for diagnostics.
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(Error::RpmCommand {
                context: context.to_string(),
                command: rendered,
                output: combined,
            });
        }
        Ok(combined)
    }

    /// Run a query with the given format string on one package file.
    pub fn query_format(&self, pkg_path: &Path, fmt: &str) -> Result<String> {
        debug!("Querying package: {}", pkg_path.display());
        self.run_rpm(
            vec![
                "--nosignature".to_string(),
                "-qp".to_string(),
                pkg_path.display().to_string(),
                "--qf".to_string(),
                fmt.to_string(),
            ],
            &format!("Query of RPM {} failed", pkg_path.display()),
        )
    }

    /// Import a GPG key file into the given RPM database.
    pub fn import_key(&self, db_dir: &Path, key_file: &Path) -> Result<String> {
        debug!("Importing key file {} to rpm database", key_file.display());
        self.run_rpm(
            vec![
                "--dbpath".to_string(),
                db_dir.display().to_string(),
                "--import".to_string(),
                key_file.display().to_string(),
            ],
            &format!(
                "Failed to import key '{}' to RPM database",
                key_file.display()
            ),
        )
    }

    /// Check the signatures of one package against the keys in `db_dir`.
    pub fn check_signature(&self, db_dir: &Path, pkg_path: &Path) -> Result<String> {
        self.run_rpm(
            vec![
                "--dbpath".to_string(),
                db_dir.display().to_string(),
                "-Kv".to_string(),
                pkg_path.display().to_string(),
            ],
            &format!("Error when checking signatures for {}", pkg_path.display()),
        )
    }

    /// Check whether the given collection of RPMs would install together.
    pub fn check_install(&self, db_dir: &Path, pkgs: &[PathBuf]) -> Result<String> {
        debug!("Checking installability of {} packages", pkgs.len());
        let mut args = vec![
            "--nosignature".to_string(),
            "--install".to_string(),
            "--test".to_string(),
            // No install scripts or trigger scriptlets run for a test
            // transaction.
            "--noscripts".to_string(),
            "--notriggers".to_string(),
            // The host arch, OS and free disk space are irrelevant to a
            // dependency check against a scratch database.
            "--ignorearch".to_string(),
            "--ignoreos".to_string(),
            "--ignoresize".to_string(),
            "--justdb".to_string(),
            "--dbpath".to_string(),
            "/".to_string(),
            // A root directory is needed because hosts where /sbin is a
            // symlink otherwise produce spurious conflicts. The scratch
            // database directory doubles as the root.
            "--root".to_string(),
            db_dir.display().to_string(),
        ];
        args.extend(pkgs.iter().map(|p| p.display().to_string()));
        self.run_rpm(args, "Error checking if the packages are installable")
    }
}
