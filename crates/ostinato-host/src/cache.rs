//! Plugin cache: the scanner's JSON index of known plugins.
//!
//! The engine never scans plugins itself; it reads the cache the external
//! scanner maintains and addresses plugins by their array position, which
//! becomes the device chain's `host_slot_index`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Ok,
    #[default]
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginCacheEntry {
    pub path: String,
    pub plugin_id_string: String,
    pub plugin_uid16: String,
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub category: String,
    pub has_editor: bool,
    pub is_instrument: bool,
    pub num_input_channels: i32,
    pub num_output_channels: i32,
    pub param_count: i32,
    pub scan_status: ScanStatus,
    pub error: String,
    pub scan_time_ms: i64,
    pub next_retry_at_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginCache {
    pub schema_version: i32,
    pub generated_at_ms: i64,
    pub entries: Vec<PluginCacheEntry>,
}

impl PluginCache {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::PluginCache {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| Error::PluginCache {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// A missing cache is an empty cache; the engine can still run with
    /// direct host slots.
    pub fn read_or_empty(path: &Path) -> Self {
        match Self::read(path) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(error = %e, "plugin cache unavailable, using empty cache");
                Self::default()
            }
        }
    }

    /// Atomic write: sibling temp file, then rename over the target.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let fail = |reason: String| Error::PluginCache {
            path: path.to_path_buf(),
            reason,
        };
        let text = serde_json::to_string_pretty(self).map_err(|e| fail(e.to_string()))?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);
        std::fs::write(&tmp, text).map_err(|e| fail(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| fail(e.to_string()))?;
        Ok(())
    }

    /// Host slot index for a plugin path: its array position, provided the
    /// scan succeeded. Entries that failed or timed out never resolve.
    pub fn resolve_host_slot(&self, plugin_path: &str) -> Option<u32> {
        self.entries
            .iter()
            .position(|entry| entry.scan_status == ScanStatus::Ok && entry.path == plugin_path)
            .map(|index| index as u32)
    }

    /// First scanned-ok instrument, the default for a fresh track.
    pub fn first_instrument_slot(&self) -> Option<u32> {
        self.entries
            .iter()
            .position(|entry| entry.scan_status == ScanStatus::Ok && entry.is_instrument)
            .map(|index| index as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cache() -> PluginCache {
        PluginCache {
            schema_version: 1,
            generated_at_ms: 1_700_000_000_000,
            entries: vec![
                PluginCacheEntry {
                    path: "/plugins/broken.vst3".into(),
                    name: "Broken".into(),
                    scan_status: ScanStatus::Failed,
                    error: "crashed during scan".into(),
                    ..Default::default()
                },
                PluginCacheEntry {
                    path: "/plugins/synth.vst3".into(),
                    name: "Synth".into(),
                    vendor: "Example".into(),
                    is_instrument: true,
                    num_output_channels: 2,
                    param_count: 42,
                    scan_status: ScanStatus::Ok,
                    ..Default::default()
                },
                PluginCacheEntry {
                    path: "/plugins/verb.vst3".into(),
                    name: "Verb".into(),
                    num_input_channels: 2,
                    num_output_channels: 2,
                    scan_status: ScanStatus::Ok,
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin_cache.json");
        let cache = sample_cache();
        cache.write_atomic(&path).unwrap();
        let back = PluginCache::read(&path).unwrap();
        assert_eq!(back.entries.len(), 3);
        assert_eq!(back.entries[1].name, "Synth");
        assert_eq!(back.entries[1].scan_status, ScanStatus::Ok);
    }

    #[test]
    fn resolves_by_array_position() {
        let cache = sample_cache();
        assert_eq!(cache.resolve_host_slot("/plugins/synth.vst3"), Some(1));
        assert_eq!(cache.resolve_host_slot("/plugins/verb.vst3"), Some(2));
        assert_eq!(cache.resolve_host_slot("/plugins/unknown.vst3"), None);
    }

    #[test]
    fn failed_entries_never_resolve() {
        let cache = sample_cache();
        assert_eq!(cache.resolve_host_slot("/plugins/broken.vst3"), None);
    }

    #[test]
    fn first_instrument_skips_effects() {
        let cache = sample_cache();
        assert_eq!(cache.first_instrument_slot(), Some(1));
    }

    #[test]
    fn missing_cache_reads_as_empty() {
        let cache = PluginCache::read_or_empty(Path::new("/nonexistent/cache.json"));
        assert!(cache.entries.is_empty());
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let json = r#"{
            "schema_version": 1,
            "generated_at_ms": 0,
            "entries": [{"path": "/p.vst3", "scan_status": "ok", "future_field": 12}]
        }"#;
        let cache: PluginCache = serde_json::from_str(json).unwrap();
        assert_eq!(cache.entries.len(), 1);
        assert_eq!(cache.entries[0].scan_status, ScanStatus::Ok);
    }
}
