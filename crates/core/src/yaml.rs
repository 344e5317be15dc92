//! Manifest loading and rendering (YAML streams, JSON lists).

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::{json_type_name, Json, Object, Resource, ResourceList};

/// Size guards for untrusted manifest input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLimits {
    pub max_bytes: usize,
    pub max_nodes: usize,
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self { max_bytes: 1_000_000, max_nodes: 100_000 }
    }
}

impl LoadLimits {
    /// Defaults overridden by `KFORM_MAX_YAML_BYTES` / `KFORM_MAX_YAML_NODES`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_bytes: env_usize("KFORM_MAX_YAML_BYTES").unwrap_or(d.max_bytes),
            max_nodes: env_usize("KFORM_MAX_YAML_NODES").unwrap_or(d.max_nodes),
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|s| s.parse::<usize>().ok())
}

fn json_node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for vv in map.values() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr.iter() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

/// Validate one document and push it (or, for `kind: List`, its items).
fn push_document(out: &mut Vec<Resource>, doc: Json, n: usize) -> Result<()> {
    let obj = match doc {
        Json::Object(obj) => obj,
        other => return Err(anyhow!("document {}: expected a mapping, got {}", n, json_type_name(&other))),
    };
    let resource = check_identity(obj, n)?;
    if resource.kind() == "List" {
        let items = match resource.object().get("items") {
            Some(Json::Array(items)) => items.clone(),
            Some(Json::Null) | None => Vec::new(),
            Some(other) => return Err(anyhow!("document {}: List items must be a sequence, got {}", n, json_type_name(other))),
        };
        for item in items {
            match item {
                Json::Object(obj) => out.push(check_identity(obj, n)?),
                other => return Err(anyhow!("document {}: List item must be a mapping, got {}", n, json_type_name(&other))),
            }
        }
        return Ok(());
    }
    out.push(resource);
    Ok(())
}

fn check_identity(obj: Object, n: usize) -> Result<Resource> {
    if obj.get("apiVersion").and_then(|v| v.as_str()).map_or(true, str::is_empty) {
        return Err(anyhow!("document {}: missing apiVersion", n));
    }
    if obj.get("kind").and_then(|v| v.as_str()).map_or(true, str::is_empty) {
        return Err(anyhow!("document {}: missing kind", n));
    }
    Ok(Resource::from_object(obj))
}

impl ResourceList {
    /// Parse a multi-document YAML stream with limits from the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_yaml_with_limits(yaml, LoadLimits::from_env())
    }

    pub fn from_yaml_with_limits(yaml: &str, limits: LoadLimits) -> Result<Self> {
        if yaml.len() > limits.max_bytes {
            return Err(anyhow!("YAML payload too large (>{} bytes)", limits.max_bytes));
        }
        let mut resources = Vec::new();
        for (i, de) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
            let n = i + 1;
            let val = serde_yaml::Value::deserialize(de).with_context(|| format!("parsing YAML document {}", n))?;
            if val.is_null() {
                continue;
            }
            let json = serde_json::to_value(val).with_context(|| format!("converting YAML document {} to JSON", n))?;
            if json_node_budget_exceeded(&json, limits.max_nodes) {
                return Err(anyhow!("YAML document {} too complex (>{} nodes)", n, limits.max_nodes));
            }
            push_document(&mut resources, json, n)?;
        }
        debug!(count = resources.len(), "loaded manifests");
        Ok(Self::new(resources))
    }

    /// Parse a JSON object, a `List`, or an array of objects.
    pub fn from_json(json: &str) -> Result<Self> {
        let limits = LoadLimits::from_env();
        if json.len() > limits.max_bytes {
            return Err(anyhow!("JSON payload too large (>{} bytes)", limits.max_bytes));
        }
        let val: Json = serde_json::from_str(json).context("parsing JSON")?;
        if json_node_budget_exceeded(&val, limits.max_nodes) {
            return Err(anyhow!("JSON document too complex (>{} nodes)", limits.max_nodes));
        }
        let mut resources = Vec::new();
        match val {
            Json::Array(docs) => {
                for (i, doc) in docs.into_iter().enumerate() {
                    push_document(&mut resources, doc, i + 1)?;
                }
            }
            doc => push_document(&mut resources, doc, 1)?,
        }
        Ok(Self::new(resources))
    }

    /// Render as a YAML stream, one document per resource.
    pub fn to_yaml(&self) -> Result<String> {
        let mut out = String::new();
        for (i, r) in self.iter().enumerate() {
            if i > 0 {
                out.push_str("---\n");
            }
            out.push_str(&serde_yaml::to_string(r).with_context(|| format!("rendering {}", r))?);
        }
        Ok(out)
    }

    /// Render as a pretty-printed `v1/List`.
    pub fn to_json_pretty(&self) -> Result<String> {
        let list = serde_json::json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": self.resources(),
        });
        serde_json::to_string_pretty(&list).context("rendering JSON")
    }
}
