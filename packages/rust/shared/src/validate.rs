//! Required-field validation for incoming records.
//!
//! Each record type declares the names of the fields that must be
//! non-blank and exposes them by direct field access.

use crate::error::{BuildLedgerError, Result};
use crate::types::Build;

/// A record with a fixed set of required text fields.
pub trait Validate {
    /// Field names that must not be blank, in reporting order.
    const REQUIRED: &'static [&'static str];

    /// Value of a required field, or `None` for names not in [`Self::REQUIRED`].
    fn required_field(&self, name: &str) -> Option<&str>;
}

impl Validate for Build {
    const REQUIRED: &'static [&'static str] = &[
        "Hostname",
        "Architecture",
        "SourceURL",
        "BinaryURL",
        "Version",
        "Language",
        "Name",
        "Branch",
    ];

    fn required_field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "Hostname" => &self.hostname,
            "Architecture" => &self.architecture,
            "SourceURL" => &self.source_url,
            "BinaryURL" => &self.binary_url,
            "Version" => &self.version,
            "Language" => &self.language,
            "Name" => &self.name,
            "Branch" => &self.branch,
            _ => return None,
        };
        Some(value.as_str())
    }
}

/// Names of required fields that are empty.
pub fn blank_fields<T: Validate>(record: &T) -> Vec<&'static str> {
    T::REQUIRED
        .iter()
        .copied()
        .filter(|name| record.required_field(name).is_none_or(str::is_empty))
        .collect()
}

/// Fail with a validation error listing every blank required field.
pub fn validate<T: Validate>(record: &T) -> Result<()> {
    let blank = blank_fields(record);
    if blank.is_empty() {
        return Ok(());
    }

    let message = blank
        .iter()
        .map(|name| format!("{name} cannot be blank"))
        .collect::<Vec<_>>()
        .join(", ");
    Err(BuildLedgerError::validation(message))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn valid_build() -> Build {
        Build {
            hostname: "localhost".into(),
            architecture: "amd64".into(),
            toolchain_version: None,
            source_url: "https://github.com/example/svc/commit/abc".into(),
            binary_url: "http://s3.example.com/abc".into(),
            version: "20130627091746".into(),
            language: "Go".into(),
            name: "com.example.svc".into(),
            branch: "master".into(),
            timestamp: 1_372_346_773,
            coverage: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            merge_base_dates: BTreeMap::new(),
        }
    }

    #[test]
    fn valid_build_passes() {
        assert!(blank_fields(&valid_build()).is_empty());
        assert!(validate(&valid_build()).is_ok());
    }

    #[test]
    fn missing_hostname_is_reported() {
        let mut build = valid_build();
        build.hostname.clear();

        assert_eq!(blank_fields(&build), vec!["Hostname"]);
        let err = validate(&build).unwrap_err();
        assert_eq!(err.to_string(), "validation error: Hostname cannot be blank");
    }

    #[test]
    fn toolchain_version_is_optional() {
        let mut build = valid_build();
        build.toolchain_version = Some(String::new());
        assert!(validate(&build).is_ok());
    }

    #[test]
    fn all_blank_fields_listed_in_order() {
        let mut build = valid_build();
        build.name.clear();
        build.architecture.clear();

        assert_eq!(blank_fields(&build), vec!["Architecture", "Name"]);
    }
}
