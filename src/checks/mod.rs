// src/checks/mod.rs

//! Dependency and signature verification of the chosen packages.
//!
//! Each PID carries a different package set, so dependency checking runs
//! one simulated install per PID in a scratch RPM database. Signature
//! checking verifies each signature-checked package against the key the
//! base image was signed with. All failures are collected and logged
//! before a single [`Error::CheckFailures`] is raised.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::blocks::GroupedPackages;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::isofs::PackageGroup;
use crate::packages::Package;
use crate::rpmtool::ToolCache;

// Keys the signed packages must verify against.
const GPG_DEV: &str = "\
-----BEGIN PGP PUBLIC KEY BLOCK-----
Version: GnuPG v2.0.22 (GNU/Linux)

mQENBFzCrMkBCADqjBV/61Pobd/kegvq6Ot/YUHBkZSPYMmb//sqCzmU0/hjTsJ1
Ik7FpC6631eqirlM7REAv7K/8JP7BdYw0atY25QsVzy8EMLZENIt1PPwqvv5LhJF
MR2yaoi9F9T5DS82PsCvGt/KiCkkhupV6Z7t5Ef5mwoJYuiwusoGaOfumX05CYf4
Qz2g4GBaFTB/RKv6PhQzEQlYuZFAu0iJ8DE+6tLHUSN6OhViOqsviCvlC8+OYmj9
knhmKC6+wj/z2p8lx9G8ELuTID6Dn18nbo+/JhA+xWgKR026r7Qw9zJNATS06dji
/h/NnvmffuSqEP99pHJdR4QTMyTLhBXYsm4tABEBAAG0MWNpc2NvIChJT1MtWFIt
U1ctUlBNLmRldikgPHRhYy1zdXBwb3J0QGNpc2NvLmNvbT6JATkEEwECACMFAlzC
rMkCGwMHCwkIBwMCAQYVCAIJCgsEFgIDAQIeAQIXgAAKCRB0cngRXAaXa17UB/9T
wXrSm/GY+Ek0SDb+wcWU7CTxcIf3IenVYquZJ5Qzlf+pvFIlQslLOtRJJe1BqLXw
f+3dSI+WI98tbE53rZvu/qu3duzgEShweI3mFpbqmYBZ6Jrc7TaMc+GhTJFLiAGe
bJorb9R6iROs5Ma76FhbVM+g6FTNgK6Xhonte2+LvJpbJnLP9I5DNixJjpYfdtn7
52n3B/VazOrsrG5j764cL1FDiQrBaPra/HLpHXRztQzxFFEd7UMZfGmXWyEftaqK
kfWqeHxDv/H8N9TskZIYpDo04Wusxjfd2UDfpUHPUVBCMIrKoyJf0Nu2OtBVht2H
7HSrjKpS0I64PS7BVV2TuQENBFzCrMkBCADDneuFjQ9rttFB4/hR7WOWhTCuyJlU
QSoxq4r0UhKfBqoAq/3sHymvTncwsMPv7y5SF8DhhwVqMIEYN/zLFIax41FrjN3D
SNa+UT1AMhpWeQHgQVtNBfwDohn34ZcznpiwWupmnVWXmCPR5WUd4AScONPm3zbF
WMmHo88LI2+LgFCZTGoZPR6RGP6mrBkEnLvwnjwE64wFksmNHl55FcZOG7IGYE7F
ThrV0Pn2EFBPNzpisBfHtrGzqsVcjkTnoH2vrfZUp2CIeRP1SX/vXxczpXQa0ugW
JTzrQTs+sguk+In0RHAeTgasR1zOlFJlJUf/8jDHWIC/aZWfqfKcdCXJABEBAAGJ
AR8EGAECAAkFAlzCrMkCGwwACgkQdHJ4EVwGl2udrQf7BNyKjbubaEYn/QS6PcWc
t844PwI9ar+Ury/6ugf3wYnWYy0P/pcjWn1HHoHrpvE7vGjDHCW5EUAmDIrRJnVL
7NIuk6wTRDM6b5G4hsLCt1nBBxi8vlqJ3JCGysNqnfXl00MLxJW9cuDhAMNNUahw
rOjdQH01BqPii2NIds72xifjRCZzV/TDwp1Hut22lh03KmSsYbX9Uo207Dm/WHyP
hiWL2zMnx8wy91mCkgiRqJc2TIy+Oly1awJDh0mQd/gRoBhmunnQGZYWb4YhYNDy
5cCrYDN7W7Aqq+kvb4Te5US+xUKDGbgdaI51ihO21PcySUOjge7aR8funvQDZq/i
SA==
=yFbB
-----END PGP PUBLIC KEY BLOCK-----
";

const GPG_REL: &str = "\
-----BEGIN PGP PUBLIC KEY BLOCK-----
Version: GnuPG v2.0.22 (GNU/Linux)

mQENBFhoRoABCADKHEzVeogKYIt/oCafsqqHnHAIWZwGuviNYkxwjUyiveWS7co+
lGh1YcdW/8qh4ObKNxXFHCPJoHTNVl9rpjqA4SxdipxtEx4uWtI1A0Ba7Wz5JUqC
p4oSph82uXgzOg+/4Oz/PtapK6xPOVhDhpEcetb0PRVOsHk5Zm4duIVcNjyDeJ60
8GVEMYDAdTz8jaxtjxhXygasyz3waAXThRX5+geNM8zeQsRRXUtlSKT+12eyrLaQ
+K2+uFKvvuwMA89Wh91GJYTvPJLwuCr3x2j+RmVqEJ+TahzKVCpRiZyWO7TnjUks
dA3dyFbldvdThKXduvHxZajYlerCeqopVj9fABEBAAG0MWNpc2NvIChJT1MtWFIt
U1ctUlBNLnJlbCkgPHRhYy1zdXBwb3J0QGNpc2NvLmNvbT6JASIEEwEIABYFAlho
RoAJENoLWkaDS8b1AhsDAhkBAABc/Af9FoSisiwWYCcifhee6s7VQ6fhrmXg23fh
iqd8Ldlh0Tjktt5Kx/HPwug9RRYyFgwaOsbR71/rDiSQvqyhoQSdKWOR7ko3O+ZL
HXAcrcCbC8dYDcZwT7YGZJR0No4c7b2rfizf08E+/qJAKRQ7AlBTPDGaZn1PkRXa
POgCctMKQu4fIK1mEvk9qw2Aj8pDifVfr/6aqGZSFEVJzdpHL4mR7YeUcSB24y4A
Oe8s7hdV6N2Xw24Oprp4VS5Ozmz+pIEQ6FNXfQiLgD1YePbUrp4JvXljU7RmSoqM
EeFf9478GDE0PsxBzUj37MXPBi4LGDdnB/U1fsW6H0K+faMuYP+Alg==
=jdOr
-----END PGP PUBLIC KEY BLOCK-----
";

const SIGNATURE_MARKER: &str = "RSA/SHA256 Signature";

fn log_break() -> String {
    "-".repeat(80)
}

#[derive(Debug)]
struct DependencyFailure {
    pid: String,
    output: String,
}

#[derive(Debug)]
struct SignatureFailure {
    packages: Vec<String>,
}

fn scratch_db() -> Result<tempfile::TempDir> {
    Ok(tempfile::Builder::new().prefix("rpm_checks_db_").tempdir()?)
}

fn paths_for(
    pkgs: &BTreeSet<Package>,
    pkg_to_file: &BTreeMap<Package, PathBuf>,
) -> Result<Vec<PathBuf>> {
    let paths: BTreeSet<PathBuf> = pkgs
        .iter()
        .map(|pkg| {
            pkg_to_file
                .get(pkg)
                .cloned()
                .ok_or_else(|| Error::PackageNotFound {
                    package: pkg.to_string(),
                })
        })
        .collect::<Result<_>>()?;
    Ok(paths.into_iter().collect())
}

/// Simulate installing the given package set in a scratch database.
fn verify_dependencies(
    tools: &ToolCache,
    pid: &str,
    paths: &[PathBuf],
) -> Result<Option<DependencyFailure>> {
    debug!("Checking dependencies for PID {}", pid);
    let db = scratch_db()?;
    match tools.check_install(db.path(), paths) {
        Ok(_) => Ok(None),
        Err(Error::RpmCommand { output, .. }) => Ok(Some(DependencyFailure {
            pid: pid.to_string(),
            output,
        })),
        Err(e) => Err(e),
    }
}

/// Whether the package at `path` fails signature verification.
///
/// The rpm command only checks that signatures present in the file match
/// the imported keys, so an unsigned package still exits successfully.
/// The expected signature type must appear in the output as well.
fn has_invalid_signature(tools: &ToolCache, db_dir: &Path, path: &Path) -> bool {
    debug!("Verifying signature for {}", path.display());
    match tools.check_signature(db_dir, path) {
        Ok(output) => !output.contains(SIGNATURE_MARKER),
        Err(_) => true,
    }
}

fn verify_signatures<E: Executor>(
    tools: &ToolCache,
    executor: &E,
    pkgs: &BTreeSet<Package>,
    pkg_to_file: &BTreeMap<Package, PathBuf>,
    dev_signed: bool,
) -> Result<Option<SignatureFailure>> {
    let (key_filename, key) = if dev_signed {
        ("dev.gpg", GPG_DEV)
    } else {
        ("rel.gpg", GPG_REL)
    };

    let db = scratch_db()?;
    let key_file = db.path().join(key_filename);
    fs::write(&key_file, key)?;
    tools.import_key(db.path(), &key_file)?;

    let mut items = Vec::new();
    for pkg in pkgs {
        let path = pkg_to_file
            .get(pkg)
            .cloned()
            .ok_or_else(|| Error::PackageNotFound {
                package: pkg.to_string(),
            })?;
        items.push((pkg.to_string(), path));
    }

    let db_dir = db.path().to_path_buf();
    let failures: Vec<String> = executor
        .map(items, |(name, path)| {
            has_invalid_signature(tools, &db_dir, &path).then_some(name)
        })
        .into_iter()
        .flatten()
        .collect();

    if failures.is_empty() {
        Ok(None)
    } else {
        Ok(Some(SignatureFailure { packages: failures }))
    }
}

/// Format a dependency failure, suppressing Cisco library noise.
///
/// Missing dependency errors from rpm look like:
///   xr-foo >= 1.2.3v1.0.0-1 is needed by xr-bar
/// Cisco(lib*) entries are usually redundant with those, so they are
/// dropped unless they are the only missing-dependency lines left.
fn fmt_depcheck_failure(failure: &DependencyFailure, verbose: bool) -> Vec<String> {
    let msgs: Vec<String> = failure.output.lines().map(str::to_string).collect();
    let out_msgs = if verbose {
        msgs.clone()
    } else {
        let filtered: Vec<String> = msgs
            .iter()
            .filter(|msg| {
                !(msg.trim_start().starts_with("Cisco(lib") && msg.contains("is needed by"))
            })
            .cloned()
            .collect();
        // rpm adds a header line, so emptiness of the filtered list isn't
        // a reliable signal that everything useful was dropped.
        let mut out_msgs = if filtered.len() != msgs.len()
            && !filtered.iter().any(|msg| msg.contains("is needed by"))
        {
            msgs.clone()
        } else {
            filtered
        };
        if out_msgs.len() != msgs.len() {
            out_msgs.push(format!(
                "{} dependency check errors omitted; use the --verbose-dep-check \
                 option to see all errors.",
                msgs.len() - out_msgs.len()
            ));
        }
        out_msgs
    };

    let mut lines = vec![format!(
        "Dependency check failures on PID {}. RPM output:",
        failure.pid
    )];
    lines.extend(out_msgs);
    lines.push(log_break());
    lines
}

fn fmt_signature_failure(failure: &SignatureFailure) -> Vec<String> {
    let mut lines = vec![
        "Signature verification failures:".to_string(),
        "  The following packages are not signed with the same key as the \
         base ISO or are not signed at all:"
            .to_string(),
    ];
    for package in &failure.packages {
        lines.push(format!("    {package}"));
    }
    lines.push(log_break());
    lines
}

/// Check dependencies and signatures of the chosen packages.
///
/// Dependency checks verify that the package set on each PID forms an
/// installable whole. Signature checks verify that every package in a
/// signature-checked group carries the key the base image was signed
/// with.
pub fn run<E: Executor>(
    pkgs: &GroupedPackages,
    pkg_to_file: &BTreeMap<Package, PathBuf>,
    verbose_depcheck: bool,
    dev_signed: bool,
    tools: &ToolCache,
    executor: &E,
) -> Result<()> {
    let mut msgs: Vec<String> = Vec::new();

    let pid_to_pkgs = pkgs.pkgs_per_pid()?;
    let mut items = Vec::new();
    for (pid, pid_pkgs) in &pid_to_pkgs {
        items.push((pid.clone(), paths_for(pid_pkgs, pkg_to_file)?));
    }
    let results = executor.map(items, |(pid, paths)| {
        verify_dependencies(tools, &pid, &paths)
    });
    for result in results {
        if let Some(failure) = result? {
            msgs.extend(fmt_depcheck_failure(&failure, verbose_depcheck));
        }
    }

    let signed_pkgs: BTreeSet<Package> = PackageGroup::ALL
        .iter()
        .filter(|group| group.verify_signatures())
        .flat_map(|group| pkgs.get_all_pkgs(*group))
        .collect();
    if let Some(failure) =
        verify_signatures(tools, executor, &signed_pkgs, pkg_to_file, dev_signed)?
    {
        msgs.extend(fmt_signature_failure(&failure));
    }

    if msgs.is_empty() {
        return Ok(());
    }
    for msg in &msgs {
        error!("{msg}");
    }
    Err(Error::CheckFailures)
}
