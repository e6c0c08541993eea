//! Package manifest model
//!
//! A manifest document is one YAML file describing a package. Documents in
//! the wild are inconsistent: fields appear under alternate names, versions
//! are sometimes bare YAML numbers, and whole files can be malformed.
//! Resolution is therefore lenient: scalars are stringified, and a document
//! missing any required field is simply not a record.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// Installer metadata taken from a manifest's first installer entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerInfo {
    /// Installer technology (exe, msi, msix, ...)
    pub installer_type: Option<String>,

    /// Installer download size in bytes
    pub installer_size: Option<u64>,

    /// Direct download URL
    pub download_url: Option<String>,

    /// SHA-256 of the installer payload
    pub sha256: Option<String>,

    /// Windows Installer product code
    pub product_code: Option<String>,
}

/// One resolved package description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// Unique package identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Dotted version string of arbitrary arity
    pub version: String,

    /// One-line description
    pub short_description: String,

    /// Publishing vendor
    pub publisher: String,

    /// Free-form tags, in manifest order
    #[serde(default)]
    pub tags: Vec<String>,

    pub description: Option<String>,
    pub moniker: Option<String>,
    pub package_url: Option<String>,
    pub publisher_url: Option<String>,
    pub support_url: Option<String>,
    pub license: Option<String>,
    pub license_url: Option<String>,
    pub copyright: Option<String>,
    pub copyright_url: Option<String>,
    pub release_date: Option<String>,
    pub installer: Option<InstallerInfo>,
}

impl ManifestRecord {
    /// Resolve a parsed YAML document into a record.
    ///
    /// Returns `None` when any of the five required fields (identifier,
    /// version, name, short description, publisher) is missing or empty
    /// under all of its accepted names.
    pub fn from_yaml(doc: &Value) -> Option<Self> {
        let id = field(doc, &["PackageIdentifier", "Id"])?;
        let version = field(doc, &["PackageVersion", "Version"])?;
        let name = field(doc, &["PackageName", "Name", "Moniker"])?;
        let short_description = field(doc, &["ShortDescription", "Description"])?;
        let publisher = field(doc, &["Publisher", "Author"])?;

        let installer = doc
            .get("Installers")
            .and_then(Value::as_sequence)
            .and_then(|seq| seq.first())
            .map(|first| InstallerInfo {
                installer_type: field(first, &["InstallerType"])
                    .or_else(|| field(doc, &["InstallerType"])),
                installer_size: field_u64(first, "InstallerSize")
                    .or_else(|| field_u64(doc, "PackageSize")),
                download_url: field(first, &["InstallerUrl"]),
                sha256: field(first, &["InstallerSha256"]),
                product_code: field(first, &["ProductCode"]),
            });

        Some(Self {
            id,
            name,
            version,
            short_description,
            publisher,
            tags: tags(doc),
            description: field(doc, &["Description"]),
            moniker: field(doc, &["Moniker"]),
            package_url: field(doc, &["PackageUrl", "Homepage"]),
            publisher_url: field(doc, &["PublisherUrl"]),
            support_url: field(doc, &["SupportUrl", "PublisherSupportUrl"]),
            license: field(doc, &["License"]),
            license_url: field(doc, &["LicenseUrl"]),
            copyright: field(doc, &["Copyright"]),
            copyright_url: field(doc, &["CopyrightUrl"]),
            release_date: field(doc, &["ReleaseDate"]),
            installer,
        })
    }
}

/// Resolve the first non-empty scalar among the accepted field names
fn field(doc: &Value, names: &[&str]) -> Option<String> {
    for name in names {
        if let Some(s) = doc.get(name).and_then(scalar_string) {
            return Some(s);
        }
    }
    None
}

/// Resolve a numeric field, tolerating quoted numbers
fn field_u64(doc: &Value, name: &str) -> Option<u64> {
    match doc.get(name)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Stringify a scalar value the way loose manifest data requires:
/// unquoted versions parse as YAML numbers, some flags as booleans.
fn scalar_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn tags(doc: &Value) -> Vec<String> {
    doc.get("Tags")
        .and_then(Value::as_sequence)
        .map(|seq| seq.iter().filter_map(scalar_string).collect())
        .unwrap_or_default()
}
