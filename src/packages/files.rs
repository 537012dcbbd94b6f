// src/packages/files.rs

//! Map packages to their file paths on disk.
//!
//! Packages may be present in several search directories at once. Copies
//! must be byte-identical; third-party packages are exempt because they
//! are rebuilt per fix and legitimately differ.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::packages::Package;

/// Map each package to the file path it is found at.
///
/// `dirs` are searched recursively. A package found in several places must
/// be byte-identical everywhere; the first match in directory order wins.
/// All lookup failures are collected into one [`Error::PackageFiles`]
/// report so the user sees every problem at once.
pub fn packages_to_file_paths(
    pkgs: &[Package],
    dirs: &[PathBuf],
) -> Result<BTreeMap<Package, PathBuf>> {
    let all_dirs = collect_dirs(dirs);
    debug!(
        "Searching for packages in directories: {}",
        all_dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut pkg_to_paths: BTreeMap<&Package, Vec<PathBuf>> = BTreeMap::new();
    for pkg in pkgs {
        pkg_to_paths.insert(pkg, find_package(pkg, &all_dirs));
    }

    let mut not_found = Vec::new();
    let mut differing = Vec::new();
    for (pkg, paths) in &pkg_to_paths {
        match paths.len() {
            0 => not_found.push((*pkg).clone()),
            1 => {}
            _ => {
                if let Err(e) = check_identical(pkg, paths) {
                    differing.push(e.to_string());
                }
            }
        }
    }

    if !not_found.is_empty() || !differing.is_empty() {
        let mut lines = Vec::new();
        if !not_found.is_empty() {
            lines.push("The following packages cannot be found:".to_string());
            for pkg in &not_found {
                lines.push(format!("  {pkg}"));
            }
        }
        if !differing.is_empty() {
            lines.push(
                "Packages have been found in multiple locations with different hashes:"
                    .to_string(),
            );
            lines.extend(differing);
        }
        return Err(Error::PackageFiles {
            report: lines.join("\n"),
        });
    }

    Ok(pkg_to_paths
        .into_iter()
        .map(|(pkg, mut paths)| (pkg.clone(), paths.remove(0)))
        .collect())
}

/// All directories under the given roots, in traversal order.
fn collect_dirs(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut all_dirs = Vec::new();
    for dir in dirs {
        for entry in WalkDir::new(dir).into_iter().flatten() {
            if entry.file_type().is_dir() && !all_dirs.contains(&entry.path().to_path_buf()) {
                all_dirs.push(entry.path().to_path_buf());
            }
        }
    }
    all_dirs
}

fn find_package(pkg: &Package, dirs: &[PathBuf]) -> Vec<PathBuf> {
    let filename = pkg.filename();
    let found: Vec<PathBuf> = dirs
        .iter()
        .map(|dir| dir.join(&filename))
        .filter(|path| path.exists())
        .collect();
    if found.is_empty() {
        debug!("Package {} not found at any locations", filename);
    } else {
        debug!(
            "Package {} found at file paths: {}",
            filename,
            found
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    found
}

/// Check all copies of a package are bit-for-bit identical.
fn check_identical(pkg: &Package, paths: &[PathBuf]) -> Result<()> {
    let mut hashes = Vec::new();
    for path in paths {
        let digest = sha256_file(path)?;
        debug!("Hash for {} is {}", path.display(), digest);
        if !hashes.contains(&digest) {
            hashes.push(digest);
        }
    }

    if hashes.len() > 1 {
        let err = Error::DifferentPackage {
            package: pkg.to_string(),
            paths: paths.to_vec(),
        };
        if pkg.is_third_party() {
            // Third-party packages are rebuilt for every fix that supplies
            // them and don't keep a stable hash. Log it and carry on.
            error!("Third party package error being ignored: {err}");
            Ok(())
        } else {
            Err(err)
        }
    } else {
        Ok(())
    }
}

fn sha256_file(path: &Path) -> Result<String> {
    let contents = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::testutil::make_package;

    fn write_rpm(dir: &Path, pkg: &Package, contents: &[u8]) -> PathBuf {
        let path = dir.join(pkg.filename());
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_identical_copies_resolve_to_first_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir_a = tmp.path().join("a");
        let dir_b = tmp.path().join("b");
        fs::create_dir_all(&dir_a).unwrap();
        fs::create_dir_all(&dir_b).unwrap();

        let pkg = make_package("xr-foo", "1.0", "1", &["cisco-iosxr"], &[]);
        let path_a = write_rpm(&dir_a, &pkg, b"identical");
        write_rpm(&dir_b, &pkg, b"identical");

        let mapping =
            packages_to_file_paths(&[pkg.clone()], &[dir_a, dir_b]).unwrap();
        assert_eq!(mapping[&pkg], path_a);
    }

    #[test]
    fn test_differing_native_copies_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir_a = tmp.path().join("a");
        let dir_b = tmp.path().join("b");
        fs::create_dir_all(&dir_a).unwrap();
        fs::create_dir_all(&dir_b).unwrap();

        let pkg = make_package("xr-foo", "1.0", "1", &["cisco-iosxr"], &[]);
        write_rpm(&dir_a, &pkg, b"one");
        write_rpm(&dir_b, &pkg, b"two");

        let err = packages_to_file_paths(&[pkg], &[dir_a, dir_b]).unwrap_err();
        assert!(err.to_string().contains("different hashes"));
    }

    #[test]
    fn test_differing_third_party_copies_tolerated() {
        let tmp = tempfile::tempdir().unwrap();
        let dir_a = tmp.path().join("a");
        let dir_b = tmp.path().join("b");
        fs::create_dir_all(&dir_a).unwrap();
        fs::create_dir_all(&dir_b).unwrap();

        let pkg = make_package("zlib", "1.2.11", "1", &[], &[]);
        let path_a = write_rpm(&dir_a, &pkg, b"one");
        write_rpm(&dir_b, &pkg, b"two");

        let mapping = packages_to_file_paths(&[pkg.clone()], &[dir_a, dir_b]).unwrap();
        assert_eq!(mapping[&pkg], path_a);
    }

    #[test]
    fn test_missing_package_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let pkg = make_package("xr-gone", "1.0", "1", &[], &[]);
        let err =
            packages_to_file_paths(&[pkg], &[tmp.path().to_path_buf()]).unwrap_err();
        assert!(err.to_string().contains("cannot be found"));
        assert!(err.to_string().contains("xr-gone"));
    }

    #[test]
    fn test_search_is_recursive() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("outer/inner");
        fs::create_dir_all(&nested).unwrap();

        let pkg = make_package("xr-deep", "1.0", "1", &[], &[]);
        let path = write_rpm(&nested, &pkg, b"data");

        let mapping =
            packages_to_file_paths(&[pkg.clone()], &[tmp.path().to_path_buf()]).unwrap();
        assert_eq!(mapping[&pkg], path);
    }
}
