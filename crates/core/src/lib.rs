//! kform core: dynamic resources, resource lists and the transform pipeline.

#![forbid(unsafe_code)]

use std::fmt;

use anyhow::{anyhow, Result};
use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

mod list;
mod yaml;

pub use list::{ListError, ResourceClient, ResourceList, RestMapper, RestMapping, DEFAULT_FIELD_MANAGER};
pub use yaml::LoadLimits;

pub type Json = serde_json::Value;
pub type Object = serde_json::Map<String, Json>;

/// Label or annotation pairs as read off a resource.
pub type Pairs = SmallVec<[(String, String); 8]>;

/// A single transformation step over a dynamic resource.
///
/// Steps are stateless: they must not keep the resource around after returning.
pub type Transformer = Box<dyn Fn(&mut Resource) -> Result<(), TransformError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransformError {
    /// The typed shape cannot stand in for a resource (it does not encode to an object).
    #[error("typed shape {target} cannot represent {resource}: it encodes to {found}, not an object")]
    ConversionTarget { target: &'static str, resource: String, found: &'static str },
    #[error("failed to convert {resource} into {target}")]
    Decode {
        resource: String,
        target: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to convert {target} back into {resource}")]
    Encode {
        resource: String,
        target: &'static str,
        #[source]
        source: serde_json::Error,
    },
    /// Error returned by caller mutation logic, passed through as is.
    #[error(transparent)]
    Mutation(#[from] anyhow::Error),
}

/// Schema-less Kubernetes object.
///
/// Identity (group, version, kind) is read off `apiVersion` and `kind` without
/// knowing anything else about the shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource {
    object: Object,
}

impl Resource {
    pub fn from_object(object: Object) -> Self {
        Self { object }
    }

    pub fn try_from_value(value: Json) -> Result<Self> {
        match value {
            Json::Object(object) => Ok(Self { object }),
            other => Err(anyhow!("expected a JSON object for a resource, got {}", json_type_name(&other))),
        }
    }

    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn object_mut(&mut self) -> &mut Object {
        &mut self.object
    }

    pub fn into_object(self) -> Object {
        self.object
    }

    pub fn to_value(&self) -> Json {
        Json::Object(self.object.clone())
    }

    /// Replace the whole content. Nothing of the previous content is kept.
    pub fn set_object(&mut self, object: Object) {
        self.object = object;
    }

    pub fn api_version(&self) -> &str {
        self.object.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn kind(&self) -> &str {
        self.object.get("kind").and_then(|v| v.as_str()).unwrap_or("")
    }

    /// `(group, version)` of `apiVersion`; the core group is the empty string.
    pub fn group_version(&self) -> (&str, &str) {
        split_api_version(self.api_version())
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = self.group_version();
        GroupVersionKind::gvk(group, version, self.kind())
    }

    /// Exact match on all of group, version and kind.
    pub fn is_gvk(&self, gvk: &GroupVersionKind) -> bool {
        let (group, version) = self.group_version();
        group == gvk.group && version == gvk.version && self.kind() == gvk.kind
    }

    fn metadata(&self) -> Option<&Object> {
        self.object.get("metadata").and_then(|m| m.as_object())
    }

    fn metadata_mut(&mut self) -> Result<&mut Object> {
        let meta = self.object.entry("metadata").or_insert_with(|| Json::Object(Object::new()));
        meta.as_object_mut().ok_or_else(|| anyhow!("metadata is not a mapping"))
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata().and_then(|m| m.get("name")).and_then(|v| v.as_str())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().and_then(|m| m.get("namespace")).and_then(|v| v.as_str())
    }

    pub fn set_namespace(&mut self, namespace: &str) -> Result<()> {
        self.metadata_mut()?.insert("namespace".into(), Json::String(namespace.to_string()));
        Ok(())
    }

    pub fn labels(&self) -> Pairs {
        self.string_map("labels")
    }

    pub fn annotations(&self) -> Pairs {
        self.string_map("annotations")
    }

    pub fn insert_label(&mut self, key: &str, value: &str) -> Result<()> {
        self.insert_string("labels", key, value)
    }

    pub fn insert_annotation(&mut self, key: &str, value: &str) -> Result<()> {
        self.insert_string("annotations", key, value)
    }

    fn string_map(&self, field: &str) -> Pairs {
        let mut out = Pairs::new();
        if let Some(map) = self.metadata().and_then(|m| m.get(field)).and_then(|v| v.as_object()) {
            for (k, v) in map.iter() {
                if let Some(s) = v.as_str() {
                    out.push((k.clone(), s.to_string()));
                }
            }
        }
        out
    }

    fn insert_string(&mut self, field: &str, key: &str, value: &str) -> Result<()> {
        let meta = self.metadata_mut()?;
        let map = meta.entry(field).or_insert_with(|| Json::Object(Object::new()));
        if map.is_null() {
            *map = Json::Object(Object::new());
        }
        let map = map.as_object_mut().ok_or_else(|| anyhow!("metadata.{} is not a mapping", field))?;
        map.insert(key.to_string(), Json::String(value.to_string()));
        Ok(())
    }

    /// Identity for diagnostics, e.g. `apps/v1/Deployment default/web`.
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (group, version) = self.group_version();
        if group.is_empty() {
            write!(f, "{}/{}", version, self.kind())?;
        } else {
            write!(f, "{}/{}/{}", group, version, self.kind())?;
        }
        match (self.namespace(), self.name()) {
            (Some(ns), Some(name)) => write!(f, " {}/{}", ns, name),
            (None, Some(name)) => write!(f, " {}", name),
            _ => write!(f, " <unnamed>"),
        }
    }
}

impl TryFrom<Json> for Resource {
    type Error = anyhow::Error;

    fn try_from(value: Json) -> Result<Self> {
        Self::try_from_value(value)
    }
}

pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    }
}

/// `group/version/Kind`, or `version/Kind` for the core group.
pub fn gvk_key(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}/{}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }
}

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk("", version, kind)),
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk(group, version, kind)),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

pub fn json_type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}

pub mod prelude {
    pub use super::{Json, Object, Resource, ResourceList, TransformError, Transformer};
}
