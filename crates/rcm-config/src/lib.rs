//! rcm-config
//!
//! Layered YAML configuration loading, canonicalization, and hashing,
//! plus the typed [`IngestConfig`] the orchestrator and pipeline read
//! from. Config files are merged in order (later overrides earlier),
//! canonicalized to a stable JSON byte string, and hashed so every
//! ingestion run can be traced back to the exact config it ran with.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

impl LoadedConfig {
    /// Deserialize the merged, canonical config into the typed shape
    /// this crate's consumers actually read.
    pub fn typed(&self) -> Result<IngestConfig> {
        serde_json::from_value(self.config_json.clone()).context("config does not match IngestConfig shape")
    }
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// The full config surface for one ingestion daemon instance (ambient
/// + pipeline knobs). Every field has a sane default so a minimal or
/// even empty config file still boots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub database_url: String,
    pub source: SourceConfig,
    pub queue: QueueConfig,
    pub parser: ParserConfig,
    pub verification: VerificationConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/rcm".to_string(),
            source: SourceConfig::default(),
            queue: QueueConfig::default(),
            parser: ParserConfig::default(),
            verification: VerificationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// `localfs.readyDir` (spec §6).
    pub inbox_dir: String,
    pub poll_interval_ms: u64,
    pub ack_enabled: bool,
    /// `stageToDisk`: when true, completed files are moved into
    /// `archive_ok_dir`/`archive_fail_dir` (spec §6).
    pub stage_to_disk: bool,
    pub archive_ok_dir: String,
    pub archive_fail_dir: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            inbox_dir: "./inbox".to_string(),
            poll_interval_ms: 2000,
            ack_enabled: true,
            stage_to_disk: false,
            archive_ok_dir: "./archive/ok".to_string(),
            archive_fail_dir: "./archive/fail".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub worker_count: usize,
    pub resume_clearance_factor: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            worker_count: 4,
            resume_clearance_factor: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub max_attachment_bytes: usize,
    pub strict_validation: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_attachment_bytes: 5 * 1024 * 1024,
            strict_validation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub enabled: bool,
    pub max_allowed_mismatches: i64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_allowed_mismatches: 0,
        }
    }
}

/// Load config layers from existing paths only, in order, falling back
/// to built-in defaults when none exist.
pub fn load_ingest_config(paths: &[&str]) -> Result<(IngestConfig, String)> {
    let existing: Vec<&str> = paths.iter().copied().filter(|p| Path::new(p).exists()).collect();
    if existing.is_empty() {
        let defaults = IngestConfig::default();
        let canonical = canonicalize_json(&serde_json::to_value(&defaults)?);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        return Ok((defaults, hex::encode(hasher.finalize())));
    }
    let loaded = load_layered_yaml(&existing)?;
    let typed = loaded.typed()?;
    Ok((typed, loaded.config_hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn merges_layers_with_override() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        let overlay = dir.path().join("overlay.yaml");
        write!(
            fs::File::create(&base).unwrap(),
            "database_url: postgres://base/db\nqueue:\n  capacity: 32\n"
        )
        .unwrap();
        write!(
            fs::File::create(&overlay).unwrap(),
            "queue:\n  capacity: 128\n"
        )
        .unwrap();

        let base_str = base.to_str().unwrap();
        let overlay_str = overlay.to_str().unwrap();
        let loaded = load_layered_yaml(&[base_str, overlay_str]).unwrap();
        let typed = loaded.typed().unwrap();
        assert_eq!(typed.database_url, "postgres://base/db");
        assert_eq!(typed.queue.capacity, 128);
    }

    #[test]
    fn hash_is_stable_under_key_reordering() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        write!(fs::File::create(&a).unwrap(), "database_url: x\nqueue:\n  capacity: 1\n").unwrap();
        write!(fs::File::create(&b).unwrap(), "queue:\n  capacity: 1\ndatabase_url: x\n").unwrap();

        let h1 = load_layered_yaml(&[a.to_str().unwrap()]).unwrap().config_hash;
        let h2 = load_layered_yaml(&[b.to_str().unwrap()]).unwrap().config_hash;
        assert_eq!(h1, h2);
    }

    #[test]
    fn defaults_used_when_no_files_exist() {
        let (cfg, hash) = load_ingest_config(&["/no/such/file.yaml"]).unwrap();
        assert_eq!(cfg.queue.worker_count, 4);
        assert!(!hash.is_empty());
    }
}
