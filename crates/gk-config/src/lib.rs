//! Configuration loading.
//!
//! Layered YAML files are deep-merged in order (later files win), then
//! canonicalized (sorted keys, compact JSON) and SHA-256 hashed so a run
//! can prove exactly which configuration it executed under. The merged
//! document deserializes into typed [`Settings`], after which recognized
//! environment variables are applied on top.

mod settings;

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

use gk_schemas::{canonical_json, sha256_hex};

pub use settings::{BrokerSettings, EnvTier, Settings};

/// A merged configuration document plus its canonical form and hash.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Load and deep-merge YAML files in order; later files override earlier
/// ones. Missing files are an error; pass only paths that should exist.
pub fn load_layered_yaml<P: AsRef<Path>>(paths: &[P]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let p = p.as_ref();
        let raw = fs::read_to_string(p).with_context(|| format!("read config: {}", p.display()))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&raw).with_context(|| format!("parse yaml: {}", p.display()))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonical_json(&merged).context("canonicalize config")?;
    let hash = sha256_hex(canonical.as_bytes());

    Ok(LoadedConfig {
        config_json: merged,
        canonical_json: canonical,
        config_hash: hash,
    })
}

/// Deep-merge: objects merge recursively; arrays are replaced; scalars
/// overwritten.
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
