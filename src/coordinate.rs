// src/coordinate.rs

//! Coordinate the whole golden ISO build.
//!
//! The flow: preliminary argument checks, unpack the base image, read
//! its packages and the repository packages, group both sets into
//! blocks, pick the output version of every block, verify the result
//! per PID, apply the add/remove actions to the unpacked tree, refresh
//! the metadata and repack.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::blocks::{self, GroupedPackages, BUGFIX_PREFIX};
use crate::cli::Args;
use crate::error::{Error, Result};
use crate::executor::{Executor, Parallel};
use crate::image::{Image, ImageOps, IsoContent};
use crate::isofs::{self, PackageGroup};
use crate::packages::{query, files, Package};
use crate::picker;
use crate::repos;
use crate::rpmtool::ToolCache;

/// Name of the log directory inside the output directory.
pub const LOG_DIR_NAME: &str = "logs";
/// Name of the build log file.
pub const LOG_FILE_NAME: &str = "gisobuild.log";

/// Image container tool used when none is given on the command line.
const IMAGE_TOOL: &str = "isotool";

/// Build the golden ISO; returns the path to the built image.
pub fn run(args: &Args) -> Result<PathBuf> {
    prelim_checks(args)?;
    let tmp = tempfile::Builder::new().prefix("giso_build_").tempdir()?;
    build(args, tmp.path())
}

/// Checks that can fail before any real work starts.
fn prelim_checks(args: &Args) -> Result<()> {
    if let Some(label) = &args.label {
        let valid = Regex::new(r"^[\w_]+$").map_or(false, |re| re.is_match(label));
        if !valid {
            return Err(Error::InvalidLabel(label.clone()));
        }
    }
    if !args.iso.exists() {
        return Err(Error::IsoNotFound(args.iso.display().to_string()));
    }
    if let Some(copy_dir) = &args.copy_dir {
        if !copy_dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("the copy directory {} does not exist", copy_dir.display()),
            )));
        }
    }
    Ok(())
}

/// Ensure the output directory is empty, or clean it if requested.
///
/// The log directory is exempt so logs from a previous run survive.
pub fn prepare_output_dir(out_dir: &Path, clean: bool) -> Result<()> {
    fs::create_dir_all(out_dir)?;
    let mut leftovers = Vec::new();
    for entry in fs::read_dir(out_dir)? {
        let entry = entry?;
        if entry.file_name() != LOG_DIR_NAME {
            leftovers.push(entry.path());
        }
    }
    if leftovers.is_empty() {
        return Ok(());
    }
    if !clean {
        return Err(Error::OutputDirNotEmpty(out_dir.display().to_string()));
    }
    for item in leftovers {
        debug!("Cleaning {} from the output directory", item.display());
        if item.is_dir() {
            fs::remove_dir_all(&item)?;
        } else {
            fs::remove_file(&item)?;
        }
    }
    Ok(())
}

fn build(args: &Args, tmp_dir: &Path) -> Result<PathBuf> {
    let tools = ToolCache::new()?;
    let executor = Parallel;

    let tool = match &args.image_tool {
        Some(path) => path.clone(),
        None => which::which(IMAGE_TOOL).map_err(|e| {
            Error::Image(format!("cannot find the '{IMAGE_TOOL}' tool: {e}"))
        })?,
    };
    let image = Image::new(tool, args.iso.clone())?;

    check_required_removals(&image, &args.remove_packages)?;

    let content = image.query_content()?;
    let iso_version = content.xr_version()?;
    info!("Building golden ISO from a version {} base image", iso_version);

    let giso_dir = args.out_dir.join("giso");
    image.unpack_iso(&giso_dir)?;

    let install_pkgs = coordinate_pkgs(
        args,
        &content,
        &giso_dir,
        tmp_dir,
        &iso_version,
        image.is_dev_signed(),
        &tools,
        &executor,
    )?;

    if let Some(label) = &args.label {
        write_label(&giso_dir, label)?;
    }
    write_mdata(&content, &install_pkgs, &giso_dir)?;

    let iso_name = output_iso_name(&content, args.label.as_deref())?;
    image.pack_iso(&giso_dir, &iso_name)?;
    let iso_file = giso_dir.join(&iso_name);
    if !iso_file.exists() {
        return Err(Error::Image(
            "the image tooling did not produce the output ISO".to_string(),
        ));
    }
    info!("Output to {}", iso_file.display());

    if let Some(copy_dir) = &args.copy_dir {
        debug!("Copying the golden ISO to {}", copy_dir.display());
        fs::copy(&iso_file, copy_dir.join(&iso_name))?;
    }
    Ok(iso_file)
}

/// Refuse to remove packages the image declares required.
///
/// Only names that are actually required fail; a mistyped name is caught
/// later by the unmatched remove-pattern warning instead.
fn check_required_removals(image: &impl ImageOps, remove_packages: &[String]) -> Result<()> {
    if remove_packages.is_empty() {
        return Ok(());
    }
    let required: BTreeSet<String> = image
        .required_pkgs()?
        .into_values()
        .flatten()
        .collect();
    let clashes: Vec<&String> = remove_packages
        .iter()
        .filter(|name| required.contains(*name))
        .collect();
    if clashes.is_empty() {
        Ok(())
    } else {
        Err(Error::RequiredPackageRemoval {
            packages: clashes
                .into_iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

/// Pick, verify and apply the install package set. Returns the packages
/// in the final image.
#[allow(clippy::too_many_arguments)]
fn coordinate_pkgs<E: Executor>(
    args: &Args,
    content: &IsoContent,
    giso_dir: &Path,
    tmp_dir: &Path,
    iso_version: &str,
    dev_signed: bool,
    tools: &ToolCache,
    executor: &E,
) -> Result<BTreeSet<Package>> {
    debug!("Getting input ISO packages");
    let install_groups = content.installable_groups();
    let mut iso_dirs = Vec::new();
    let mut iso_rpms = Vec::new();
    for group in &install_groups {
        let dir = isofs::group_package_dir(giso_dir, group);
        if dir.exists() {
            iso_dirs.push(dir);
        }
        iso_rpms.extend(isofs::group_rpms(giso_dir, group));
    }
    let iso_pkg_map = query::packages_from_rpm_files(tools, executor, &iso_rpms)?;
    let iso_pkgs: Vec<Package> = iso_pkg_map.into_values().collect();
    for pkg in &iso_pkgs {
        debug!("Input ISO package: {}", pkg);
    }

    debug!("Getting repo packages");
    let repo_inputs: Vec<PathBuf> = args.repo.iter().map(PathBuf::from).collect();
    let repo_contents = repos::collect(&repo_inputs, tmp_dir)?;
    let repo_pkg_map =
        query::packages_from_rpm_files(tools, executor, &repo_contents.rpm_files)?;
    let repo_dirs: Vec<PathBuf> = repo_contents
        .rpm_files
        .iter()
        .filter_map(|path| path.parent().map(Path::to_path_buf))
        .chain(repo_contents.indexed_dirs.iter().cloned())
        .collect();
    let repo_pkgs: Vec<Package> = repo_pkg_map
        .into_values()
        .chain(repo_contents.indexed_pkgs)
        .collect();
    for pkg in &repo_pkgs {
        debug!("Repo package: {}", pkg);
    }

    let iso_archs: BTreeSet<&str> = iso_pkgs.iter().map(|pkg| pkg.arch.as_str()).collect();
    check_invalid_pkgs(&repo_pkgs, iso_version, &iso_archs)?;

    debug!("Grouping ISO and repo packages into blocks");
    let iso_blocks = blocks::grouping::group_packages(iso_pkgs.iter().cloned())?;
    // Third-party packages already in the image are candidates for repo
    // blocks too, since a rebuilt fix may tie to them.
    let repo_pool: BTreeSet<Package> = repo_pkgs
        .iter()
        .cloned()
        .chain(iso_pkgs.iter().filter(|pkg| !pkg.is_native()).cloned())
        .collect();
    let repo_blocks = blocks::grouping::group_packages(repo_pool)?;

    debug!("Picking packages to go into the golden ISO");
    let mut giso_blocks = picker::pick_installable_pkgs(
        &iso_blocks,
        &repo_blocks,
        &args.pkglist,
        &args.remove_packages,
    )?;
    if !args.only_support_pids.is_empty() {
        restrict_pids(&mut giso_blocks, &args.only_support_pids)?;
    }
    let supported_pids = giso_blocks.supported_pids()?;
    info!(
        "The golden ISO supports the following PIDs: {}",
        supported_pids.into_iter().collect::<Vec<_>>().join(", ")
    );
    for pkg in giso_blocks.all_pkgs_all_groups() {
        debug!("Package picked to go in the golden ISO: {}", pkg);
    }

    let all_pkgs: Vec<Package> = iso_pkgs
        .iter()
        .chain(repo_pkgs.iter())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let search_dirs: Vec<PathBuf> = iso_dirs.into_iter().chain(repo_dirs).collect();
    let pkg_to_file = files::packages_to_file_paths(&all_pkgs, &search_dirs)?;

    if args.skip_dep_check {
        warn!("Skipping dependency and signature checks");
    } else {
        debug!("Performing dependency and signature checks");
        crate::checks::run(
            &giso_blocks,
            &pkg_to_file,
            args.verbose_dep_check,
            dev_signed,
            tools,
            executor,
        )?;
    }

    for action in picker::determine_output_actions(&iso_blocks, &giso_blocks, &pkg_to_file)? {
        action.run(giso_dir)?;
    }

    Ok(giso_blocks.all_pkgs_all_groups())
}

/// Restrict the output to the requested hardware PIDs.
fn restrict_pids(giso_blocks: &mut GroupedPackages, requested: &[String]) -> Result<()> {
    let identifiers =
        blocks::pid_identifier_packages(&giso_blocks.get_all_pkgs(PackageGroup::Main))?;
    let card_types: BTreeMap<String, String> = identifiers
        .into_iter()
        .map(|id| (id.pid, id.card_type))
        .collect();

    let (known, unknown): (Vec<String>, Vec<String>) = requested
        .iter()
        .cloned()
        .partition(|pid| card_types.contains_key(pid));
    if !unknown.is_empty() {
        warn!(
            "The following requested PIDs are not supported by the image \
             and have no effect: {}",
            unknown.join(", ")
        );
    }
    if known.is_empty() {
        return Err(Error::NoPidIdentifiers {
            reason: "none of the requested PIDs are supported by the image".to_string(),
        });
    }
    blocks::validate_pid_classes(&card_types, &known)?;
    giso_blocks.filter_to_supported_pids(&known);
    Ok(())
}

/// Repository packages must match the base image's version and
/// architectures. All violations are reported at once.
fn check_invalid_pkgs(
    pkgs: &[Package],
    iso_version: &str,
    iso_archs: &BTreeSet<&str>,
) -> Result<()> {
    let mut wrong_version = Vec::new();
    let mut wrong_arch = Vec::new();
    for pkg in pkgs {
        if pkg.is_native() && pkg.version.xr_version() != iso_version {
            wrong_version.push(pkg.to_string());
        }
        if !iso_archs.contains(pkg.arch.as_str()) {
            wrong_arch.push(pkg.to_string());
        }
    }
    if wrong_version.is_empty() && wrong_arch.is_empty() {
        return Ok(());
    }

    let mut lines = Vec::new();
    if !wrong_version.is_empty() {
        lines.push(format!(
            "The following packages do not match the ISO version ({iso_version}):"
        ));
        wrong_version.sort();
        lines.extend(wrong_version.iter().map(|pkg| format!("  {pkg}")));
    }
    if !wrong_arch.is_empty() {
        lines.push(format!(
            "The following packages do not match the ISO architectures ({}):",
            iso_archs
                .iter()
                .copied()
                .collect::<Vec<_>>()
                .join(", ")
        ));
        wrong_arch.sort();
        lines.extend(wrong_arch.iter().map(|pkg| format!("  {pkg}")));
    }
    Err(Error::InvalidPackages {
        report: lines.join("\n"),
    })
}

fn write_label(giso_dir: &Path, label: &str) -> Result<()> {
    let misc_dir = giso_dir.join("misc");
    fs::create_dir_all(&misc_dir)?;
    fs::write(misc_dir.join("label"), label)?;
    Ok(())
}

/// Refresh the image metadata with build info and the bugfixes present
/// in the final package set.
fn updated_mdata(
    content: &IsoContent,
    install_pkgs: &BTreeSet<Package>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut mdata = content.mdata.clone();
    mdata.insert(
        "giso-build-time".to_string(),
        serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
    );
    mdata.insert(
        "giso-builder".to_string(),
        serde_json::Value::String(format!(
            "{} {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )),
    );

    let mut bugfixes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pkg in install_pkgs {
        for provide in &pkg.provides {
            if provide.name().starts_with(BUGFIX_PREFIX) {
                bugfixes
                    .entry(provide.name().to_string())
                    .or_default()
                    .push(pkg.to_string());
            }
        }
    }
    for pkgs in bugfixes.values_mut() {
        pkgs.sort();
    }
    mdata.insert(
        "bugfixes".to_string(),
        serde_json::to_value(&bugfixes).unwrap_or_default(),
    );
    mdata
}

fn write_mdata(
    content: &IsoContent,
    install_pkgs: &BTreeSet<Package>,
    giso_dir: &Path,
) -> Result<()> {
    let mdata = updated_mdata(content, install_pkgs);
    debug!("Updating ISO metadata");
    let mdata_dir = giso_dir.join("mdata");
    fs::create_dir_all(&mdata_dir)?;
    let json = serde_json::to_string(&serde_json::Value::Object(mdata))
        .map_err(|e| Error::Image(e.to_string()))?;
    fs::write(mdata_dir.join("mdata.json"), json)?;
    Ok(())
}

/// The output name is
/// `<platform>-golden[-<arch>][-<version>][-<label>].iso`.
fn output_iso_name(content: &IsoContent, label: Option<&str>) -> Result<String> {
    let mut name = format!("{}-golden", content.platform_family()?);
    if let Some(arch) = content.architecture() {
        name.push_str(&format!("-{arch}"));
    }
    if let Ok(version) = content.xr_version() {
        name.push_str(&format!("-{version}"));
    }
    if let Some(label) = label {
        name.push_str(&format!("-{label}"));
    }
    name.push_str(".iso");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::testutil::make_package;

    fn content(json: &str) -> IsoContent {
        IsoContent::parse(json).unwrap()
    }

    const SAMPLE_CONTENT: &str = r#"{
        "mdata": {
            "platform-family": "8000",
            "architecture": "x86_64",
            "xr-version": "7.5.1"
        },
        "groups": [{"name": "main", "attrs": [{"name": "install"}]}]
    }"#;

    #[test]
    fn test_output_iso_name() {
        let content = content(SAMPLE_CONTENT);
        assert_eq!(
            output_iso_name(&content, None).unwrap(),
            "8000-golden-x86_64-7.5.1.iso"
        );
        assert_eq!(
            output_iso_name(&content, Some("nightly_3")).unwrap(),
            "8000-golden-x86_64-7.5.1-nightly_3.iso"
        );
    }

    #[test]
    fn test_output_iso_name_without_arch() {
        let content = content(
            r#"{"mdata": {"platform-family": "8000", "xr-version": "7.5.1"}, "groups": []}"#,
        );
        assert_eq!(
            output_iso_name(&content, None).unwrap(),
            "8000-golden-7.5.1.iso"
        );
    }

    struct StubImage {
        required: BTreeMap<String, Vec<String>>,
    }

    impl ImageOps for StubImage {
        fn is_dev_signed(&self) -> bool {
            false
        }

        fn query_content(&self) -> Result<IsoContent> {
            IsoContent::parse(SAMPLE_CONTENT)
        }

        fn required_pkgs(&self) -> Result<BTreeMap<String, Vec<String>>> {
            Ok(self.required.clone())
        }

        fn unpack_iso(&self, _iso_dir: &Path) -> Result<()> {
            Ok(())
        }

        fn pack_iso(&self, _iso_dir: &Path, _iso_name: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_required_package_cannot_be_removed() {
        let image = StubImage {
            required: BTreeMap::from([(
                "main".to_string(),
                vec!["xr-mandatory".to_string()],
            )]),
        };

        check_required_removals(&image, &["xr-telnet".to_string()]).unwrap();

        let err = check_required_removals(
            &image,
            &["xr-telnet".to_string(), "xr-mandatory".to_string()],
        )
        .unwrap_err();
        match err {
            Error::RequiredPackageRemoval { packages } => {
                assert_eq!(packages, "xr-mandatory");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_label_rejected() {
        use clap::Parser;
        let args = crate::cli::Args::parse_from([
            "goldiso", "--iso", "/dev/null", "--label", "bad label!",
        ]);
        assert!(matches!(
            prelim_checks(&args),
            Err(Error::InvalidLabel(_))
        ));
    }

    #[test]
    fn test_prepare_output_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let out_dir = tmp.path().join("out");

        // Fresh directory, and a log-only directory, are both fine.
        prepare_output_dir(&out_dir, false).unwrap();
        fs::create_dir_all(out_dir.join(LOG_DIR_NAME)).unwrap();
        prepare_output_dir(&out_dir, false).unwrap();

        fs::write(out_dir.join("stale.iso"), b"old").unwrap();
        assert!(matches!(
            prepare_output_dir(&out_dir, false),
            Err(Error::OutputDirNotEmpty(_))
        ));

        prepare_output_dir(&out_dir, true).unwrap();
        assert!(!out_dir.join("stale.iso").exists());
        assert!(out_dir.join(LOG_DIR_NAME).exists());
    }

    #[test]
    fn test_check_invalid_pkgs() {
        let archs = BTreeSet::from(["x86_64"]);
        let good = make_package("xr-bgp", "7.5.1v1.0.0", "1", &["cisco-iosxr"], &[]);
        check_invalid_pkgs(&[good.clone()], "7.5.1", &archs).unwrap();

        let wrong_version =
            make_package("xr-old", "7.3.1v1.0.0", "1", &["cisco-iosxr"], &[]);
        let mut wrong_arch = make_package("zlib", "1.2", "1", &[], &[]);
        wrong_arch.arch = "aarch64".to_string();

        let err = check_invalid_pkgs(
            &[good, wrong_version, wrong_arch],
            "7.5.1",
            &archs,
        )
        .unwrap_err();
        let report = err.to_string();
        assert!(report.contains("xr-old"));
        assert!(report.contains("zlib"));
        assert!(report.contains("7.5.1"));
    }

    #[test]
    fn test_third_party_version_is_not_checked() {
        let archs = BTreeSet::from(["x86_64"]);
        let third_party = make_package("zlib", "1.2.11", "1", &[], &[]);
        check_invalid_pkgs(&[third_party], "7.5.1", &archs).unwrap();
    }

    #[test]
    fn test_updated_mdata_collects_bugfixes() {
        let content = content(SAMPLE_CONTENT);
        let fix = make_package(
            "xr-bgp",
            "7.5.1v1.0.1",
            "1",
            &["cisco-iosxr", "cisco-CSCab12345"],
            &[],
        );
        let mdata = updated_mdata(&content, &BTreeSet::from([fix.clone()]));

        assert!(mdata.contains_key("giso-build-time"));
        let bugfixes = &mdata["bugfixes"];
        assert_eq!(
            bugfixes["cisco-CSCab12345"][0],
            serde_json::Value::String(fix.to_string())
        );
    }
}
