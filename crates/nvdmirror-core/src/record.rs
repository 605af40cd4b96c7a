//! The CVE record envelope type.
//!
//! Upstream delivers vulnerabilities as envelope documents of the shape
//! `{"cve": {...}}`. The inner object's schema is opaque to the mirror bot;
//! only `id`, `published`, and `lastModified` are interpreted. Records are
//! mutated by full replacement only; there is no partial patching.
//!
//! # Canonical serialization
//!
//! The canonical byte form of a record is the pretty-printed (2-space) JSON
//! of the inner object. Mirror files store exactly this form, and content
//! digests are SHA-256 over it, so a digest computed from the index and a
//! digest computed from a mirror file are directly comparable.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// One vulnerability record, stored as its upstream envelope document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CveRecord {
    doc: Value,
}

impl CveRecord {
    /// Wrap an envelope document (`{"cve": {...}}`).
    pub fn new(doc: Value) -> Self {
        Self { doc }
    }

    /// Wrap a bare inner object by constructing the envelope around it.
    pub fn from_inner(inner: Value) -> Self {
        Self {
            doc: serde_json::json!({ "cve": inner }),
        }
    }

    /// The full envelope document.
    pub fn document(&self) -> &Value {
        &self.doc
    }

    /// The inner record object (the `cve` member of the envelope).
    pub fn inner(&self) -> Result<&Value> {
        self.doc.get("cve").ok_or(Error::InvalidRecord {
            field: "cve",
            reason: "envelope has no 'cve' member".to_string(),
        })
    }

    /// The record identifier, e.g. `CVE-2024-12345`.
    pub fn id(&self) -> Result<&str> {
        self.inner()?
            .get("id")
            .and_then(Value::as_str)
            .ok_or(Error::InvalidRecord {
                field: "id",
                reason: "missing or not a string".to_string(),
            })
    }

    /// The 4-digit year segment embedded in the identifier.
    pub fn year(&self) -> Result<i32> {
        let id = self.id()?;
        let mut parts = id.split('-');
        let year = parts.nth(1).unwrap_or_default();
        year.parse().map_err(|_| Error::InvalidRecord {
            field: "id",
            reason: format!("no 4-digit year segment in '{id}'"),
        })
    }

    /// The `published` timestamp.
    pub fn published(&self) -> Result<DateTime<Utc>> {
        self.timestamp_field("published")
    }

    /// The `lastModified` timestamp.
    pub fn last_modified(&self) -> Result<DateTime<Utc>> {
        self.timestamp_field("lastModified")
    }

    fn timestamp_field(&self, field: &'static str) -> Result<DateTime<Utc>> {
        let raw = self
            .inner()?
            .get(field)
            .and_then(Value::as_str)
            .ok_or(Error::InvalidRecord {
                field,
                reason: "missing or not a string".to_string(),
            })?;
        parse_nvd_timestamp(raw)
    }

    /// Validate the record invariants: a usable identifier with a year
    /// segment, and `lastModified >= published`.
    pub fn validate(&self) -> Result<()> {
        self.year()?;
        let published = self.published()?;
        let modified = self.last_modified()?;
        if modified < published {
            return Err(Error::InvalidRecord {
                field: "lastModified",
                reason: format!("{modified} is before published {published}"),
            });
        }
        Ok(())
    }

    /// Canonical serialized form of the inner object: pretty-printed JSON
    /// with 2-space indentation. This is exactly what mirror files contain.
    pub fn canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self.inner()?)?)
    }

    /// SHA-256 hex digest of the canonical serialized form.
    pub fn digest(&self) -> Result<String> {
        Ok(hex::encode(Sha256::digest(self.canonical_json()?)))
    }
}

/// Parse an upstream timestamp string.
///
/// Upstream timestamps sometimes carry a UTC offset and sometimes don't
/// (`2024-01-15T10:30:00.000`); offset-less values are interpreted as UTC.
pub fn parse_nvd_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| Error::InvalidTimestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EMPTY_OBJECT_DIGEST;
    use serde_json::json;

    fn sample() -> CveRecord {
        CveRecord::new(json!({
            "cve": {
                "id": "CVE-2024-12345",
                "published": "2024-01-10T08:00:00.000",
                "lastModified": "2024-01-15T10:30:00.000",
                "descriptions": [{"lang": "en", "value": "sample entry"}],
            }
        }))
    }

    #[test]
    fn test_id_and_year() {
        let record = sample();
        assert_eq!(record.id().unwrap(), "CVE-2024-12345");
        assert_eq!(record.year().unwrap(), 2024);
    }

    #[test]
    fn test_missing_id() {
        let record = CveRecord::new(json!({"cve": {}}));
        assert!(matches!(
            record.id(),
            Err(Error::InvalidRecord { field: "id", .. })
        ));
    }

    #[test]
    fn test_missing_envelope() {
        let record = CveRecord::new(json!({"vuln": {}}));
        assert!(record.inner().is_err());
    }

    #[test]
    fn test_timestamps_without_offset_are_utc() {
        let record = sample();
        let modified = record.last_modified().unwrap();
        assert_eq!(modified.to_rfc3339(), "2024-01-15T10:30:00+00:00");
    }

    #[test]
    fn test_timestamps_with_offset() {
        let record = CveRecord::new(json!({
            "cve": {
                "id": "CVE-2020-0001",
                "published": "2020-02-01T00:00:00.000+00:00",
                "lastModified": "2020-03-01T12:00:00.000+00:00",
            }
        }));
        assert_eq!(
            record.published().unwrap().to_rfc3339(),
            "2020-02-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_validate_accepts_ordered_timestamps() {
        sample().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_modified_before_published() {
        let record = CveRecord::new(json!({
            "cve": {
                "id": "CVE-2024-1",
                "published": "2024-06-01T00:00:00.000",
                "lastModified": "2024-01-01T00:00:00.000",
            }
        }));
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_digest_is_stable() {
        let a = sample().digest().unwrap();
        let b = sample().digest().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_digest_changes_with_content() {
        let mut other = sample();
        other.doc["cve"]["lastModified"] = json!("2024-02-01T00:00:00.000");
        assert_ne!(sample().digest().unwrap(), other.digest().unwrap());
    }

    #[test]
    fn test_empty_object_digest_constant() {
        // The sentinel used for absent mirror files is the digest of "{}".
        let digest = hex::encode(Sha256::digest("{}"));
        assert_eq!(digest, EMPTY_OBJECT_DIGEST);
    }

    #[test]
    fn test_from_inner_round_trip() {
        let record = CveRecord::from_inner(json!({"id": "CVE-1999-0001"}));
        assert_eq!(record.id().unwrap(), "CVE-1999-0001");
    }

    #[test]
    fn test_serde_transparent() {
        let parsed: CveRecord =
            serde_json::from_str(r#"{"cve": {"id": "CVE-2021-44228"}}"#).unwrap();
        assert_eq!(parsed.id().unwrap(), "CVE-2021-44228");
        let back = serde_json::to_value(&parsed).unwrap();
        assert_eq!(back["cve"]["id"], "CVE-2021-44228");
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_nvd_timestamp("yesterday").is_err());
    }
}
