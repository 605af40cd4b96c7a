//! Compressed bulk-feed archives.
//!
//! Each feed is a gzip-compressed JSON envelope plus a plain-text `.meta`
//! sidecar carrying the feed's last-modified watermark, raw and compressed
//! sizes, and the SHA-256 digest of the uncompressed envelope. Consumers
//! poll the tiny sidecar and only download the archive when the digest
//! moves; digesting the uncompressed form keeps the value stable across
//! gzip implementations.

use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use nvdmirror_core::{epoch, parse_nvd_timestamp};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// The produced files and summary facts of one feed.
#[derive(Debug, Clone)]
pub struct FeedArtifacts {
    pub name: String,
    pub archive_path: PathBuf,
    pub meta_path: PathBuf,
    pub record_count: usize,
    pub last_modified: DateTime<Utc>,
    /// Digest of the uncompressed envelope, as written to the sidecar.
    pub sha256: String,
}

impl FeedArtifacts {
    /// Both files, archive first, in upload order.
    pub fn paths(&self) -> [&Path; 2] {
        [&self.archive_path, &self.meta_path]
    }
}

/// Builds feed archives into a staging directory.
pub struct FeedPackager {
    stage: PathBuf,
    source: String,
    level: u32,
}

impl FeedPackager {
    pub fn new(stage: impl Into<PathBuf>, source: impl Into<String>, level: u32) -> Self {
        Self {
            stage: stage.into(),
            source: source.into(),
            level,
        }
    }

    /// Build the `{name}.json.gz` archive and `{name}.meta` sidecar for a
    /// slice of inner record objects.
    ///
    /// Items are sorted by identifier so the archive bytes are reproducible
    /// for identical content. An empty slice still produces a valid feed
    /// whose watermark is the epoch.
    pub fn create_feed(
        &self,
        name: &str,
        mut items: Vec<Value>,
        timestamp: DateTime<Utc>,
    ) -> Result<FeedArtifacts> {
        items.sort_by(|a, b| item_id(a).cmp(item_id(b)));
        let last_modified = items
            .iter()
            .filter_map(item_last_modified)
            .max()
            .unwrap_or_else(epoch);

        let record_count = items.len();
        let envelope = json!({
            "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "cve_count": record_count,
            "feed_name": name,
            "source": self.source,
            "cve_items": items,
        });
        let raw = serde_json::to_string_pretty(&envelope)?;

        let sha256 = hex::encode(Sha256::digest(raw.as_bytes()));
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder.write_all(raw.as_bytes())?;
        let compressed = encoder.finish()?;

        fs::create_dir_all(&self.stage)?;
        let archive_path = self.stage.join(format!("{name}.json.gz"));
        fs::write(&archive_path, &compressed)?;

        let meta = format!(
            "lastModifiedDate:{}\nsize:{}\ngzSize:{}\nsha256:{}\n",
            last_modified.to_rfc3339_opts(SecondsFormat::Secs, false),
            raw.len(),
            compressed.len(),
            sha256,
        );
        let meta_path = self.stage.join(format!("{name}.meta"));
        fs::write(&meta_path, meta)?;

        info!(
            feed = name,
            records = record_count,
            gz_bytes = compressed.len(),
            "packaged feed"
        );
        Ok(FeedArtifacts {
            name: name.to_string(),
            archive_path,
            meta_path,
            record_count,
            last_modified,
            sha256,
        })
    }
}

fn item_id(item: &Value) -> &str {
    item.get("id").and_then(Value::as_str).unwrap_or_default()
}

fn item_last_modified(item: &Value) -> Option<DateTime<Utc>> {
    let raw = item.get("lastModified").and_then(Value::as_str)?;
    parse_nvd_timestamp(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn item(id: &str, modified: &str) -> Value {
        json!({
            "id": id,
            "published": "2024-01-01T00:00:00.000",
            "lastModified": modified,
        })
    }

    fn ts() -> DateTime<Utc> {
        "2024-06-01T12:00:00Z".parse().unwrap()
    }

    fn unpack(artifacts: &FeedArtifacts) -> Value {
        let compressed = fs::read(&artifacts.archive_path).unwrap();
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut raw = String::new();
        decoder.read_to_string(&mut raw).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_envelope_shape_and_sorting() {
        let dir = TempDir::new().unwrap();
        let packager = FeedPackager::new(dir.path(), "test-mirror", 9);
        let items = vec![
            item("CVE-2024-0200", "2024-02-01T00:00:00.000"),
            item("CVE-2024-0100", "2024-03-01T00:00:00.000"),
        ];

        let artifacts = packager.create_feed("CVE-2024", items, ts()).unwrap();
        let envelope = unpack(&artifacts);

        assert_eq!(envelope["feed_name"], "CVE-2024");
        assert_eq!(envelope["source"], "test-mirror");
        assert_eq!(envelope["cve_count"], 2);
        assert_eq!(envelope["timestamp"], "2024-06-01T12:00:00.000Z");
        assert_eq!(envelope["cve_items"][0]["id"], "CVE-2024-0100");
        assert_eq!(envelope["cve_items"][1]["id"], "CVE-2024-0200");
    }

    #[test]
    fn test_meta_sidecar_matches_decompressed_archive() {
        let dir = TempDir::new().unwrap();
        let packager = FeedPackager::new(dir.path(), "test-mirror", 6);
        let items = vec![item("CVE-2024-0001", "2024-02-01T00:00:00.000")];

        let artifacts = packager.create_feed("CVE-modified", items, ts()).unwrap();
        let meta = fs::read_to_string(&artifacts.meta_path).unwrap();
        let compressed = fs::read(&artifacts.archive_path).unwrap();

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw).unwrap();

        let lines: Vec<&str> = meta.lines().collect();
        assert_eq!(lines[0], "lastModifiedDate:2024-02-01T00:00:00+00:00");
        assert_eq!(lines[1], format!("size:{}", raw.len()));
        assert_eq!(lines[2], format!("gzSize:{}", compressed.len()));
        assert_eq!(
            lines[3],
            format!("sha256:{}", hex::encode(Sha256::digest(&raw)))
        );
        assert_eq!(artifacts.sha256, hex::encode(Sha256::digest(&raw)));
    }

    #[test]
    fn test_watermark_is_max_last_modified() {
        let dir = TempDir::new().unwrap();
        let packager = FeedPackager::new(dir.path(), "test-mirror", 9);
        let items = vec![
            item("CVE-2024-0001", "2024-02-01T00:00:00.000"),
            item("CVE-2024-0002", "2024-05-20T00:00:00.000"),
            item("CVE-2024-0003", "2024-03-01T00:00:00.000"),
        ];

        let artifacts = packager.create_feed("CVE-2024", items, ts()).unwrap();
        assert_eq!(
            artifacts.last_modified.to_rfc3339(),
            "2024-05-20T00:00:00+00:00"
        );
        assert_eq!(artifacts.record_count, 3);
    }

    #[test]
    fn test_empty_feed_is_valid_with_epoch_watermark() {
        let dir = TempDir::new().unwrap();
        let packager = FeedPackager::new(dir.path(), "test-mirror", 9);

        let artifacts = packager.create_feed("CVE-1999", Vec::new(), ts()).unwrap();
        assert_eq!(artifacts.record_count, 0);
        assert_eq!(artifacts.last_modified, epoch());

        let envelope = unpack(&artifacts);
        assert_eq!(envelope["cve_count"], 0);
        assert_eq!(envelope["cve_items"].as_array().unwrap().len(), 0);

        let meta = fs::read_to_string(&artifacts.meta_path).unwrap();
        assert!(meta.starts_with("lastModifiedDate:1970-01-01T00:00:00+00:00\n"));
    }
}
