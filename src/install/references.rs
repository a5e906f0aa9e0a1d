// src/install/references.rs

//! Reference manifests
//!
//! A reference manifest lists the packages a project needs:
//!
//! ```xml
//! <packages>
//!   <package id="Widgets" version="1.0.0" targetFramework="net45" />
//!   <package id="Build.Tools" version="2.1.0" developmentDependency="true" />
//! </packages>
//! ```

use crate::error::{Error, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use semver::Version;
use std::fmt;
use std::path::Path;

/// One entry of a reference manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReference {
    pub id: String,
    pub version: Option<Version>,
    pub target_framework: Option<String>,
    pub is_development_dependency: bool,
}

impl PackageReference {
    pub fn new(id: impl Into<String>, version: Option<Version>) -> Self {
        Self {
            id: id.into(),
            version,
            target_framework: None,
            is_development_dependency: false,
        }
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} {}", self.id, version),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Parse a version, padding `1` and `1.2` out to three components
pub fn parse_version(text: &str) -> Option<Version> {
    let text = text.trim();
    if let Ok(version) = Version::parse(text) {
        return Some(version);
    }

    let (core, rest) = match text.find(['-', '+']) {
        Some(index) => text.split_at(index),
        None => (text, ""),
    };
    let padded = match core.split('.').count() {
        1 => format!("{}.0.0{}", core, rest),
        2 => format!("{}.0{}", core, rest),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

pub fn read_references(path: &Path) -> Result<Vec<PackageReference>> {
    let content = std::fs::read_to_string(path)?;
    parse_references(&content)
}

pub fn parse_references(content: &str) -> Result<Vec<PackageReference>> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut references = Vec::new();
    let mut seen_root = false;
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                depth += 1;
                handle_element(&element, depth, &mut seen_root, &mut references)?;
            }
            Event::Empty(element) => {
                handle_element(&element, depth + 1, &mut seen_root, &mut references)?;
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(Error::InvalidManifest(
            "reference manifest has no <packages> root".to_string(),
        ));
    }
    Ok(references)
}

fn handle_element(
    element: &BytesStart,
    depth: usize,
    seen_root: &mut bool,
    references: &mut Vec<PackageReference>,
) -> Result<()> {
    let name = element.name();
    match (depth, name.as_ref()) {
        (1, b"packages") => *seen_root = true,
        (1, other) => {
            return Err(Error::InvalidManifest(format!(
                "unexpected root element <{}>",
                String::from_utf8_lossy(other)
            )));
        }
        (2, b"package") => references.push(parse_reference(element)?),
        _ => {}
    }
    Ok(())
}

fn parse_reference(element: &BytesStart) -> Result<PackageReference> {
    let mut id = None;
    let mut version = None;
    let mut target_framework = None;
    let mut is_development_dependency = false;

    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| Error::InvalidManifest(e.to_string()))?;
        let value = attribute.unescape_value()?.into_owned();
        match attribute.key.as_ref() {
            b"id" => id = Some(value),
            b"version" => version = Some(value),
            b"targetFramework" => target_framework = Some(value).filter(|v| !v.is_empty()),
            b"developmentDependency" => is_development_dependency = value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }

    let id = id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| Error::InvalidManifest("package entry without an id".to_string()))?;

    let version = match version.filter(|v| !v.trim().is_empty()) {
        Some(text) => Some(parse_version(&text).ok_or_else(|| {
            Error::InvalidManifest(format!("'{}' has an invalid version '{}'", id, text))
        })?),
        None => None,
    };

    Ok(PackageReference {
        id,
        version,
        target_framework,
        is_development_dependency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_references() {
        let references = parse_references(
            r#"<?xml version="1.0" encoding="utf-8"?>
            <packages>
              <package id="Widgets" version="1.0.0" targetFramework="net45" />
              <package id="Tools" version="2.1" developmentDependency="true"></package>
              <package id="Loose" />
            </packages>"#,
        )
        .unwrap();

        assert_eq!(references.len(), 3);
        assert_eq!(references[0].id, "Widgets");
        assert_eq!(references[0].version, Some(Version::new(1, 0, 0)));
        assert_eq!(references[0].target_framework.as_deref(), Some("net45"));
        assert_eq!(references[1].version, Some(Version::new(2, 1, 0)));
        assert!(references[1].is_development_dependency);
        assert_eq!(references[2].version, None);
    }

    #[test]
    fn test_invalid_entries() {
        assert!(matches!(
            parse_references(r#"<packages><package version="1.0.0" /></packages>"#),
            Err(Error::InvalidManifest(_))
        ));
        assert!(matches!(
            parse_references(r#"<packages><package id="A" version="one" /></packages>"#),
            Err(Error::InvalidManifest(_))
        ));
        assert!(matches!(
            parse_references(r#"<project />"#),
            Err(Error::InvalidManifest(_))
        ));
        assert!(parse_references("").is_err());
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("1"), Some(Version::new(1, 0, 0)));
        assert_eq!(parse_version("1.2"), Some(Version::new(1, 2, 0)));
        assert_eq!(parse_version("1.2-beta"), Version::parse("1.2.0-beta").ok());
        assert_eq!(parse_version("1.2.3.4"), None);
    }
}
