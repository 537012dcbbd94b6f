// src/repos.rs

//! Expand repository arguments into packages and RPM files.
//!
//! A repository argument may be a single `.rpm` file, a tarball
//! containing RPMs, or a directory searched recursively. A directory
//! carrying a `repodata` index is read through the index rather than
//! searched for loose files. Tarballs found inside directories are
//! unpacked too, into the build's temporary directory.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::packages::{repodata, Package};

/// The contents of the update repositories.
///
/// Loose RPM files are queried individually later; packages from
/// repodata-indexed repositories come ready-made from the index, with
/// the repository directories kept for file path resolution.
#[derive(Debug, Default)]
pub struct RepoContents {
    pub rpm_files: Vec<PathBuf>,
    pub indexed_pkgs: Vec<Package>,
    pub indexed_dirs: Vec<PathBuf>,
}

/// Expand the given repository inputs.
///
/// Unpacked archive contents live under `tmp_dir` and stay valid for as
/// long as it does.
pub fn collect(inputs: &[PathBuf], tmp_dir: &Path) -> Result<RepoContents> {
    let mut contents = RepoContents::default();
    let mut unpack_count = 0usize;
    for input in inputs {
        if !input.exists() {
            return Err(Error::RpmDoesNotExist(input.display().to_string()));
        }
        if is_rpm(input) {
            contents.rpm_files.push(input.clone());
        } else if is_tarball(input) {
            collect_from_tarball(input, tmp_dir, &mut contents, &mut unpack_count)?;
        } else if input.is_dir() {
            collect_from_dir(input, tmp_dir, &mut contents, &mut unpack_count)?;
        } else {
            return Err(Error::RpmWrongFormat(input.display().to_string()));
        }
    }
    debug!(
        "Repository inputs expanded to {} RPM files and {} indexed packages",
        contents.rpm_files.len(),
        contents.indexed_pkgs.len()
    );
    Ok(contents)
}

fn is_rpm(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == "rpm")
}

fn is_tarball(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    path.is_file()
        && (name.ends_with(".tgz") || name.ends_with(".tar.gz") || name.ends_with(".tar"))
}

fn collect_from_tarball(
    tarball: &Path,
    tmp_dir: &Path,
    contents: &mut RepoContents,
    unpack_count: &mut usize,
) -> Result<()> {
    let dest = tmp_dir.join(format!("unpacked_repo_{unpack_count}"));
    *unpack_count += 1;
    fs::create_dir_all(&dest)?;
    debug!("Unpacking {} into {}", tarball.display(), dest.display());

    let file = fs::File::open(tarball)?;
    let name = tarball.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if name.ends_with(".tar") {
        tar::Archive::new(file).unpack(&dest)?;
    } else {
        tar::Archive::new(GzDecoder::new(file)).unpack(&dest)?;
    }
    collect_from_dir(&dest, tmp_dir, contents, unpack_count)
}

fn collect_from_dir(
    dir: &Path,
    tmp_dir: &Path,
    contents: &mut RepoContents,
    unpack_count: &mut usize,
) -> Result<()> {
    let mut nested_tarballs = Vec::new();
    let mut walker = WalkDir::new(dir).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| Error::RpmDoesNotExist(e.to_string()))?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            // A repository with a repodata index is read through the
            // index; its subtree isn't searched for loose files.
            if let Some(primary) = primary_xml(&path.join("repodata")) {
                collect_from_index(path, &primary, contents)?;
                walker.skip_current_dir();
            }
            continue;
        }
        if is_rpm(path) {
            contents.rpm_files.push(path.to_path_buf());
        } else if is_tarball(path) {
            nested_tarballs.push(path.to_path_buf());
        }
    }
    for tarball in nested_tarballs {
        collect_from_tarball(&tarball, tmp_dir, contents, unpack_count)?;
    }
    Ok(())
}

/// The primary metadata file of a repodata index, if one exists.
fn primary_xml(repodata_dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(repodata_dir).ok()?;
    let mut primaries: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with("primary.xml") || n.ends_with("primary.xml.gz"))
        })
        .collect();
    primaries.sort();
    primaries.into_iter().next()
}

fn collect_from_index(
    repo_dir: &Path,
    primary: &Path,
    contents: &mut RepoContents,
) -> Result<()> {
    debug!(
        "Reading the repodata index of {} from {}",
        repo_dir.display(),
        primary.display()
    );
    let xml = read_primary(primary)?;
    let group = repo_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("repo");
    contents
        .indexed_pkgs
        .extend(repodata::packages_from_repodata(&xml, group)?);
    contents.indexed_dirs.push(repo_dir.to_path_buf());
    Ok(())
}

fn read_primary(path: &Path) -> Result<String> {
    if path.extension().is_some_and(|ext| ext == "gz") {
        let mut xml = String::new();
        GzDecoder::new(fs::File::open(path)?).read_to_string(&mut xml)?;
        Ok(xml)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const PRIMARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
  <package type="rpm">
    <name>xr-bgp</name>
    <arch>x86_64</arch>
    <version epoch="" version="7.5.1v1.0.0" rel="1"/>
  </package>
</metadata>
"#;

    fn make_tarball(path: &Path, entries: &[(&str, &[u8])], gzipped: bool) {
        let file = fs::File::create(path).unwrap();
        if gzipped {
            let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
            append_entries(&mut builder, entries);
            builder.into_inner().unwrap().finish().unwrap();
        } else {
            let mut builder = tar::Builder::new(file);
            append_entries(&mut builder, entries);
            builder.into_inner().unwrap();
        }
    }

    fn append_entries<W: std::io::Write>(
        builder: &mut tar::Builder<W>,
        entries: &[(&str, &[u8])],
    ) {
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
    }

    #[test]
    fn test_single_rpm_file() {
        let tmp = tempfile::tempdir().unwrap();
        let rpm = tmp.path().join("xr-foo-1.0-1.x86_64.rpm");
        fs::write(&rpm, b"rpm").unwrap();

        let contents = collect(&[rpm.clone()], tmp.path()).unwrap();
        assert_eq!(contents.rpm_files, vec![rpm]);
        assert!(contents.indexed_pkgs.is_empty());
    }

    #[test]
    fn test_directory_is_searched_recursively() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("repo/nested");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("a.rpm"), b"a").unwrap();
        fs::write(tmp.path().join("repo/b.rpm"), b"b").unwrap();
        fs::write(tmp.path().join("repo/notes.txt"), b"x").unwrap();

        let contents = collect(&[tmp.path().join("repo")], tmp.path()).unwrap();
        assert_eq!(contents.rpm_files.len(), 2);
        assert!(contents
            .rpm_files
            .iter()
            .all(|p| p.extension().unwrap() == "rpm"));
    }

    #[test]
    fn test_tgz_archive_is_unpacked() {
        let tmp = tempfile::tempdir().unwrap();
        let tarball = tmp.path().join("repo.tgz");
        make_tarball(&tarball, &[("inner/xr-foo-1.0-1.x86_64.rpm", b"rpm")], true);

        let contents = collect(&[tarball], tmp.path()).unwrap();
        assert_eq!(contents.rpm_files.len(), 1);
        assert!(contents.rpm_files[0].ends_with("inner/xr-foo-1.0-1.x86_64.rpm"));
        assert!(contents.rpm_files[0].exists());
    }

    #[test]
    fn test_plain_tar_archive_is_unpacked() {
        let tmp = tempfile::tempdir().unwrap();
        let tarball = tmp.path().join("repo.tar");
        make_tarball(&tarball, &[("xr-foo-1.0-1.x86_64.rpm", b"rpm")], false);

        let contents = collect(&[tarball], tmp.path()).unwrap();
        assert_eq!(contents.rpm_files.len(), 1);
    }

    #[test]
    fn test_tarball_inside_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        fs::create_dir_all(&repo).unwrap();
        make_tarball(
            &repo.join("extra.tar.gz"),
            &[("xr-bar-1.0-1.x86_64.rpm", b"rpm")],
            true,
        );
        fs::write(repo.join("direct.rpm"), b"rpm").unwrap();

        let contents = collect(&[repo], tmp.path()).unwrap();
        assert_eq!(contents.rpm_files.len(), 2);
    }

    #[test]
    fn test_repodata_index_is_authoritative() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("fixes");
        fs::create_dir_all(repo.join("repodata")).unwrap();
        fs::write(repo.join("repodata/abc123-primary.xml"), PRIMARY).unwrap();
        // Loose RPMs inside an indexed repository are not collected; the
        // index describes the repository's contents.
        fs::write(repo.join("xr-bgp-7.5.1v1.0.0-1.x86_64.rpm"), b"rpm").unwrap();

        let contents = collect(&[repo.clone()], tmp.path()).unwrap();
        assert!(contents.rpm_files.is_empty());
        assert_eq!(contents.indexed_pkgs.len(), 1);
        assert_eq!(contents.indexed_pkgs[0].name, "xr-bgp");
        assert_eq!(contents.indexed_pkgs[0].group, "fixes");
        assert_eq!(contents.indexed_dirs, vec![repo]);
    }

    #[test]
    fn test_gzipped_primary_index() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("fixes");
        fs::create_dir_all(repo.join("repodata")).unwrap();
        let gz = fs::File::create(repo.join("repodata/abc123-primary.xml.gz")).unwrap();
        let mut encoder = GzEncoder::new(gz, Compression::default());
        encoder.write_all(PRIMARY.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let contents = collect(&[repo], tmp.path()).unwrap();
        assert_eq!(contents.indexed_pkgs.len(), 1);
        assert_eq!(contents.indexed_pkgs[0].name, "xr-bgp");
    }

    #[test]
    fn test_loose_rpms_beside_an_indexed_repo_are_collected() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("repos");
        let indexed = root.join("fixes");
        fs::create_dir_all(indexed.join("repodata")).unwrap();
        fs::write(indexed.join("repodata/primary.xml"), PRIMARY).unwrap();
        fs::write(root.join("xr-extra-1.0-1.x86_64.rpm"), b"rpm").unwrap();

        let contents = collect(&[root], tmp.path()).unwrap();
        assert_eq!(contents.rpm_files.len(), 1);
        assert!(contents.rpm_files[0].ends_with("xr-extra-1.0-1.x86_64.rpm"));
        assert_eq!(contents.indexed_pkgs.len(), 1);
    }

    #[test]
    fn test_nonexistent_input() {
        let tmp = tempfile::tempdir().unwrap();
        let err = collect(&[tmp.path().join("missing.rpm")], tmp.path()).unwrap_err();
        assert!(matches!(err, Error::RpmDoesNotExist(_)));
    }

    #[test]
    fn test_wrong_format_input() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("notes.txt");
        fs::write(&file, b"x").unwrap();
        let err = collect(&[file], tmp.path()).unwrap_err();
        assert!(matches!(err, Error::RpmWrongFormat(_)));
    }
}
