// src/packages/repodata.rs

//! Build [`Package`] values from repository metadata (primary XML).
//!
//! Same package shape as the file query source, different origin: the
//! fields come from the repodata index rather than from the RPM headers.

use std::collections::BTreeSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};
use crate::packages::{Package, PackageDep};
use crate::version::Version;

/// Parse repodata primary XML into packages, tagging each with `group`.
///
/// Only `<package type="rpm">` entries are considered.
pub fn packages_from_repodata(xml: &str, group: &str) -> Result<Vec<Package>> {
    let mut reader = Reader::from_str(xml);

    let mut packages = Vec::new();
    let mut current: Option<PartialPackage> = None;
    let mut dep_kind: Option<DepKind> = None;
    let mut text_tag: Option<TextTag> = None;

    loop {
        match reader.read_event().map_err(|e| Error::Xml(e.to_string()))? {
            Event::Start(e) => match local_name(&e) {
                "package" if attr(&e, "type")?.as_deref() == Some("rpm") => {
                    current = Some(PartialPackage::default());
                }
                "name" if current.is_some() && dep_kind.is_none() => {
                    text_tag = Some(TextTag::Name);
                }
                "arch" if current.is_some() && dep_kind.is_none() => {
                    text_tag = Some(TextTag::Arch);
                }
                "provides" if current.is_some() => dep_kind = Some(DepKind::Provides),
                "requires" if current.is_some() => dep_kind = Some(DepKind::Requires),
                "conflicts" if current.is_some() => dep_kind = Some(DepKind::Conflicts),
                _ => {}
            },
            Event::Empty(e) => match local_name(&e) {
                "version" if dep_kind.is_none() => {
                    if let Some(pkg) = current.as_mut() {
                        pkg.epoch = attr(&e, "epoch")?.unwrap_or_default();
                        pkg.version = attr(&e, "version")?.unwrap_or_default();
                        pkg.release = attr(&e, "rel")?.unwrap_or_default();
                    }
                }
                "entry" => {
                    if let (Some(pkg), Some(kind)) = (current.as_mut(), dep_kind) {
                        pkg.deps_mut(kind).insert(parse_entry(&e)?);
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if let (Some(pkg), Some(tag)) = (current.as_mut(), text_tag) {
                    let text = t.unescape().map_err(|e| Error::Xml(e.to_string()))?;
                    match tag {
                        TextTag::Name => pkg.name = text.into_owned(),
                        TextTag::Arch => pkg.arch = text.into_owned(),
                    }
                }
            }
            Event::End(e) => match local_name_end(e.name().as_ref()) {
                "package" => {
                    if let Some(pkg) = current.take() {
                        packages.push(pkg.build(group)?);
                    }
                }
                "name" | "arch" => text_tag = None,
                "provides" | "requires" | "conflicts" => dep_kind = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(packages)
}

#[derive(Debug, Clone, Copy)]
enum DepKind {
    Provides,
    Requires,
    Conflicts,
}

#[derive(Debug, Clone, Copy)]
enum TextTag {
    Name,
    Arch,
}

#[derive(Debug, Default)]
struct PartialPackage {
    name: String,
    arch: String,
    epoch: String,
    version: String,
    release: String,
    provides: BTreeSet<PackageDep>,
    requires: BTreeSet<PackageDep>,
    conflicts: BTreeSet<PackageDep>,
}

impl PartialPackage {
    fn deps_mut(&mut self, kind: DepKind) -> &mut BTreeSet<PackageDep> {
        match kind {
            DepKind::Provides => &mut self.provides,
            DepKind::Requires => &mut self.requires,
            DepKind::Conflicts => &mut self.conflicts,
        }
    }

    fn build(self, group: &str) -> Result<Package> {
        if self.name.is_empty() {
            return Err(Error::XmlMissingAttr("name".to_string()));
        }
        Ok(Package {
            name: self.name,
            epoch: self.epoch,
            version: Version::new(self.version),
            release: self.release,
            arch: self.arch,
            group: group.to_string(),
            provides: self.provides,
            requires: self.requires,
            conflicts: self.conflicts,
        })
    }
}

fn local_name<'a>(e: &'a BytesStart<'_>) -> &'a str {
    local_name_end(e.name().into_inner())
}

fn local_name_end(name: &[u8]) -> &str {
    let name = std::str::from_utf8(name).unwrap_or("");
    name.rsplit(':').next().unwrap_or(name)
}

fn attr(e: &BytesStart<'_>, key: &str) -> Result<Option<String>> {
    for attribute in e.attributes() {
        let attribute = attribute.map_err(|e| Error::Xml(e.to_string()))?;
        if local_name_end(attribute.key.as_ref()) == key {
            let value = attribute
                .unescape_value()
                .map_err(|e| Error::Xml(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parse_entry(e: &BytesStart<'_>) -> Result<PackageDep> {
    let name = attr(e, "name")?.ok_or_else(|| Error::XmlMissingAttr("name".to_string()))?;
    let flags = attr(e, "flags")?.unwrap_or_default();
    let version = attr(e, "version")?.unwrap_or_default();
    if flags.is_empty() || version.is_empty() {
        Ok(PackageDep::Name(name))
    } else {
        Ok(PackageDep::Simple {
            name,
            flags,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
  <package type="rpm">
    <name>xr-bgp</name>
    <arch>x86_64</arch>
    <version epoch="" version="7.5.1v1.0.0" rel="1"/>
    <format>
      <rpm:provides>
        <rpm:entry name="xr-bgp" flags="=" version="7.5.1v1.0.0"/>
        <rpm:entry name="cisco-iosxr"/>
      </rpm:provides>
      <rpm:requires>
        <rpm:entry name="xr-bgp-PID"/>
      </rpm:requires>
    </format>
  </package>
  <package type="srpm">
    <name>xr-bgp-src</name>
  </package>
</metadata>
"#;

    #[test]
    fn test_parse_repodata() {
        let pkgs = packages_from_repodata(SAMPLE, "main").unwrap();
        assert_eq!(pkgs.len(), 1);
        let pkg = &pkgs[0];
        assert_eq!(pkg.name, "xr-bgp");
        assert_eq!(pkg.arch, "x86_64");
        assert_eq!(pkg.version.as_str(), "7.5.1v1.0.0");
        assert_eq!(pkg.release, "1");
        assert_eq!(pkg.group, "main");
        assert!(pkg.provides.contains(&PackageDep::Simple {
            name: "xr-bgp".to_string(),
            flags: "=".to_string(),
            version: "7.5.1v1.0.0".to_string(),
        }));
        assert!(pkg
            .requires
            .contains(&PackageDep::Name("xr-bgp-PID".to_string())));
    }

    #[test]
    fn test_non_rpm_packages_are_skipped() {
        let pkgs = packages_from_repodata(SAMPLE, "").unwrap();
        assert!(pkgs.iter().all(|p| p.name != "xr-bgp-src"));
    }

    #[test]
    fn test_entry_without_name_is_an_error() {
        let xml = r#"<package type="rpm"><name>a</name><format>
            <provides><entry flags="=" version="1"/></provides>
            </format></package>"#;
        assert!(packages_from_repodata(xml, "").is_err());
    }
}
