//! Mirror-tree path mapping.
//!
//! The mirror repository stores one JSON file per record, bucketed so no
//! directory grows unbounded:
//!
//! ```text
//! CVE-2024/CVE-2024-123xx/CVE-2024-12345.json
//! ```
//!
//! The bucket name masks the last two digits of the numeric segment with
//! `xx`, grouping up to 100 records per directory.

use std::path::{Path, PathBuf};

/// Directory bucket for a record identifier, relative to `prefix`.
pub fn bucket_for_id(id: &str, prefix: &Path) -> PathBuf {
    let mut parts = id.splitn(3, '-');
    let _label = parts.next().unwrap_or_default();
    let year = parts.next().unwrap_or_default();
    let num = parts.next().unwrap_or_default();

    let masked = if num.len() > 2 {
        format!("{}xx", &num[..num.len() - 2])
    } else {
        "xx".to_string()
    };

    prefix.join(format!("CVE-{year}")).join(format!("CVE-{year}-{masked}"))
}

/// Full path of a record's mirror file, relative to `prefix`.
pub fn record_json_path(id: &str, prefix: &Path) -> PathBuf {
    bucket_for_id(id, prefix).join(format!("{id}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_masks_last_two_digits() {
        let bucket = bucket_for_id("CVE-2024-12345", Path::new("."));
        assert_eq!(bucket, PathBuf::from("./CVE-2024/CVE-2024-123xx"));
    }

    #[test]
    fn test_record_json_path() {
        let path = record_json_path("CVE-1999-0001", Path::new("/repo"));
        assert_eq!(
            path,
            PathBuf::from("/repo/CVE-1999/CVE-1999-00xx/CVE-1999-0001.json")
        );
    }

    #[test]
    fn test_short_numeric_segment() {
        let bucket = bucket_for_id("CVE-2024-7", Path::new("."));
        assert_eq!(bucket, PathBuf::from("./CVE-2024/CVE-2024-xx"));
    }
}
