//! Resource lists and the all-or-nothing transform pipeline.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use kube::core::{ApiResource, GroupVersionKind};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{Resource, TransformError, Transformer};

pub const DEFAULT_FIELD_MANAGER: &str = "kform";

/// Remote store a list is read from and written back to.
///
/// Implementations own all I/O; a list only hands resources over.
pub trait ResourceClient: Send + Sync {
    fn apply(&self, resource: &Resource, field_manager: &str) -> anyhow::Result<()>;
    fn delete(&self, resource: &Resource) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestMapping {
    pub resource: ApiResource,
    pub namespaced: bool,
}

/// Maps a kind to its REST endpoint and scope.
pub trait RestMapper: Send + Sync {
    fn mapping(&self, gvk: &GroupVersionKind) -> Option<RestMapping>;
}

#[derive(Debug, Error)]
pub enum ListError {
    #[error("no client attached to resource list")]
    NoClient,
    #[error("client failed for {resource}")]
    Client {
        resource: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Ordered resources plus the collaborators they travel with.
#[derive(Clone)]
pub struct ResourceList {
    resources: Vec<Resource>,
    field_manager: String,
    client: Option<Arc<dyn ResourceClient>>,
    mapper: Option<Arc<dyn RestMapper>>,
}

impl Default for ResourceList {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for ResourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceList")
            .field("resources", &self.resources)
            .field("field_manager", &self.field_manager)
            .field("client", &self.client.is_some())
            .field("mapper", &self.mapper.is_some())
            .finish()
    }
}

impl ResourceList {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self { resources, field_manager: DEFAULT_FIELD_MANAGER.to_string(), client: None, mapper: None }
    }

    pub fn with_client(mut self, client: Arc<dyn ResourceClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn RestMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn with_field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    pub fn len(&self) -> usize { self.resources.len() }
    pub fn is_empty(&self) -> bool { self.resources.is_empty() }
    pub fn resources(&self) -> &[Resource] { &self.resources }
    pub fn iter(&self) -> std::slice::Iter<'_, Resource> { self.resources.iter() }
    pub fn into_resources(self) -> Vec<Resource> { self.resources }
    pub fn field_manager(&self) -> &str { &self.field_manager }
    pub fn client(&self) -> Option<&Arc<dyn ResourceClient>> { self.client.as_ref() }
    pub fn mapper(&self) -> Option<&Arc<dyn RestMapper>> { self.mapper.as_ref() }

    /// Same collaborators, different resources.
    fn rewrap(&self, resources: Vec<Resource>) -> Self {
        Self {
            resources,
            field_manager: self.field_manager.clone(),
            client: self.client.clone(),
            mapper: self.mapper.clone(),
        }
    }

    /// Run every transformer, in order, over a private copy of every resource.
    ///
    /// The first failing step aborts the whole call; no partially transformed
    /// list is ever returned and `self` is never touched.
    pub fn transform(&self, transformers: &[Transformer]) -> Result<ResourceList, TransformError> {
        let t0 = Instant::now();
        counter!("transform_runs", 1u64);
        let mut resources = Vec::with_capacity(self.len());
        for (index, original) in self.resources.iter().enumerate() {
            let mut resource = original.clone();
            for (step, transform) in transformers.iter().enumerate() {
                if let Err(e) = transform(&mut resource) {
                    counter!("transform_err", 1u64);
                    histogram!("transform_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                    warn!(resource = %original, index, step, error = %e, "transform aborted");
                    return Err(e);
                }
            }
            resources.push(resource);
        }
        counter!("transform_resources", resources.len() as u64);
        histogram!("transform_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(resources = resources.len(), steps = transformers.len(), "transform complete");
        Ok(self.rewrap(resources))
    }

    /// Copy of the resources matching `predicate`, collaborators carried over.
    pub fn filter<P>(&self, mut predicate: P) -> ResourceList
    where
        P: FnMut(&Resource) -> bool,
    {
        let kept = self.resources.iter().filter(|r| predicate(r)).cloned().collect();
        self.rewrap(kept)
    }

    /// `None` without a mapper or for kinds the mapper does not know.
    pub fn is_namespaced(&self, resource: &Resource) -> Option<bool> {
        let mapper = self.mapper.as_ref()?;
        mapper.mapping(&resource.gvk()).map(|m| m.namespaced)
    }

    /// Hand every resource to the client, in order, under this list's field manager.
    pub fn apply(&self) -> Result<(), ListError> {
        let client = self.client.as_ref().ok_or(ListError::NoClient)?;
        for r in self.resources.iter() {
            client
                .apply(r, &self.field_manager)
                .map_err(|source| ListError::Client { resource: r.describe(), source })?;
            debug!(resource = %r, field_manager = %self.field_manager, "applied");
        }
        Ok(())
    }

    /// Delete every resource through the client, in reverse order.
    pub fn delete(&self) -> Result<(), ListError> {
        let client = self.client.as_ref().ok_or(ListError::NoClient)?;
        for r in self.resources.iter().rev() {
            client.delete(r).map_err(|source| ListError::Client { resource: r.describe(), source })?;
            debug!(resource = %r, "deleted");
        }
        Ok(())
    }
}

impl From<Vec<Resource>> for ResourceList {
    fn from(resources: Vec<Resource>) -> Self {
        Self::new(resources)
    }
}

impl<'a> IntoIterator for &'a ResourceList {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::Json;

    fn res(kind: &str, name: &str) -> Resource {
        Resource::try_from_value(json!({
            "apiVersion": "v1",
            "kind": kind,
            "metadata": { "name": name },
            "data": { "x": "0" }
        }))
        .unwrap()
    }

    fn set_x(value: &'static str) -> Transformer {
        Box::new(move |r: &mut Resource| {
            r.object_mut().insert("data".into(), json!({ "x": value }));
            Ok(())
        })
    }

    fn data_x(r: &Resource) -> Option<&str> {
        r.object().get("data").and_then(|d| d.get("x")).and_then(Json::as_str)
    }

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl ResourceClient for RecordingClient {
        fn apply(&self, resource: &Resource, field_manager: &str) -> anyhow::Result<()> {
            if resource.name() == self.fail_on {
                return Err(anyhow!("server said no"));
            }
            self.calls.lock().unwrap().push(format!("apply {} as {}", resource.name().unwrap_or(""), field_manager));
            Ok(())
        }

        fn delete(&self, resource: &Resource) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("delete {}", resource.name().unwrap_or("")));
            Ok(())
        }
    }

    struct NoMappings;

    impl RestMapper for NoMappings {
        fn mapping(&self, _gvk: &GroupVersionKind) -> Option<RestMapping> {
            None
        }
    }

    #[test]
    fn transform_preserves_order_and_copies() {
        let list = ResourceList::new(vec![res("ConfigMap", "a"), res("ConfigMap", "b"), res("ConfigMap", "c")]);
        let noop: Transformer = Box::new(|_r: &mut Resource| Ok(()));
        let out = list.transform(&[noop]).unwrap();
        let names: Vec<_> = out.iter().map(|r| r.name().unwrap()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        for (before, after) in list.iter().zip(out.iter()) {
            assert_eq!(before, after);
            assert!(!std::ptr::eq(before, after));
        }
    }

    #[test]
    fn transform_never_touches_the_receiver() {
        let list = ResourceList::new(vec![res("ConfigMap", "a")]);
        let out = list.transform(&[set_x("1")]).unwrap();
        assert_eq!(data_x(&out.resources()[0]), Some("1"));
        assert_eq!(data_x(&list.resources()[0]), Some("0"));
    }

    #[test]
    fn steps_apply_in_supplied_order() {
        let list = ResourceList::new(vec![res("ConfigMap", "a")]);
        let out = list.transform(&[set_x("1"), set_x("2")]).unwrap();
        assert_eq!(data_x(&out.resources()[0]), Some("2"));
        let out = list.transform(&[set_x("2"), set_x("1")]).unwrap();
        assert_eq!(data_x(&out.resources()[0]), Some("1"));
    }

    #[test]
    fn first_failure_aborts_everything() {
        let list = ResourceList::new(vec![res("ConfigMap", "a"), res("ConfigMap", "b"), res("ConfigMap", "c")]);
        let before = list.resources().to_vec();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_step = Arc::clone(&seen);
        let fail_on_b: Transformer = Box::new(move |r: &mut Resource| -> Result<(), TransformError> {
            let name = r.name().unwrap_or("").to_string();
            seen_in_step.lock().unwrap().push(name.clone());
            if name == "b" {
                return Err(anyhow!("refusing {}", name).into());
            }
            Ok(())
        });
        let err = list.transform(&[set_x("9"), fail_on_b, set_x("10")]).unwrap_err();
        assert!(matches!(err, TransformError::Mutation(_)));
        assert_eq!(err.to_string(), "refusing b");
        // "c" is never visited once "b" failed
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(list.resources(), before.as_slice());
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn transform_with_no_steps_copies_everything() {
        let list = ResourceList::new(vec![res("ConfigMap", "a"), res("Secret", "b")]);
        let out = list.transform(&[]).unwrap();
        assert_eq!(out.resources(), list.resources());
        let empty = ResourceList::default().transform(&[set_x("1")]).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn collaborators_survive_transform() {
        let client: Arc<dyn ResourceClient> = Arc::new(RecordingClient::default());
        let mapper: Arc<dyn RestMapper> = Arc::new(NoMappings);
        let list = ResourceList::new(vec![res("ConfigMap", "a")])
            .with_client(Arc::clone(&client))
            .with_mapper(Arc::clone(&mapper))
            .with_field_manager("ci");
        let out = list.transform(&[set_x("1")]).unwrap();
        assert!(Arc::ptr_eq(out.client().unwrap(), &client));
        assert!(Arc::ptr_eq(out.mapper().unwrap(), &mapper));
        assert_eq!(out.field_manager(), "ci");
        let filtered = out.filter(|r| r.name() == Some("zzz"));
        assert!(filtered.is_empty());
        assert!(filtered.client().is_some());
        assert_eq!(filtered.field_manager(), "ci");
    }

    #[test]
    fn filter_keeps_matching_resources_in_order() {
        let list = ResourceList::new(vec![res("ConfigMap", "a"), res("Secret", "b"), res("ConfigMap", "c")]);
        let cms = list.filter(|r| r.kind() == "ConfigMap");
        let names: Vec<_> = cms.iter().map(|r| r.name().unwrap()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn is_namespaced_needs_a_mapper() {
        let list = ResourceList::new(vec![res("ConfigMap", "a")]);
        assert_eq!(list.is_namespaced(&list.resources()[0]), None);
        let list = list.with_mapper(Arc::new(NoMappings));
        assert_eq!(list.is_namespaced(&list.resources()[0]), None);
    }

    #[test]
    fn apply_and_delete_go_through_the_client() {
        let client = Arc::new(RecordingClient::default());
        let list = ResourceList::new(vec![res("ConfigMap", "a"), res("ConfigMap", "b")])
            .with_client(client.clone())
            .with_field_manager("ops");
        list.apply().unwrap();
        list.delete().unwrap();
        assert_eq!(
            *client.calls.lock().unwrap(),
            vec!["apply a as ops", "apply b as ops", "delete b", "delete a"]
        );
    }

    #[test]
    fn apply_without_client_fails() {
        let list = ResourceList::new(vec![res("ConfigMap", "a")]);
        assert!(matches!(list.apply(), Err(ListError::NoClient)));
        assert!(matches!(list.delete(), Err(ListError::NoClient)));
    }

    #[test]
    fn apply_stops_at_first_client_error() {
        let client = Arc::new(RecordingClient { fail_on: Some("a"), ..Default::default() });
        let list = ResourceList::new(vec![res("ConfigMap", "a"), res("ConfigMap", "b")]).with_client(client.clone());
        let err = list.apply().unwrap_err();
        assert_eq!(err.to_string(), "client failed for v1/ConfigMap a");
        assert!(client.calls.lock().unwrap().is_empty());
    }
}
