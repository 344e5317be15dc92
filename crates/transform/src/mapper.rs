//! REST mapper backed by the static kind table.

use std::sync::Arc;

use kform_core::{gvk_key, RestMapper, RestMapping};
use kube::core::{ApiResource, GroupVersionKind};
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::builtin_kinds;

static SHARED: Lazy<Arc<BuiltinMapper>> = Lazy::new(|| Arc::new(BuiltinMapper::default()));

/// Offline mapper: knows the built-in kinds plus whatever is registered.
#[derive(Debug, Clone)]
pub struct BuiltinMapper {
    by_gvk: FxHashMap<String, RestMapping>,
}

impl Default for BuiltinMapper {
    fn default() -> Self {
        let mut me = Self::empty();
        for k in builtin_kinds() {
            me.register(k.api_resource(), k.namespaced);
        }
        me
    }
}

impl BuiltinMapper {
    pub fn empty() -> Self {
        Self { by_gvk: FxHashMap::default() }
    }

    /// Process-wide instance covering the built-in kinds only.
    pub fn shared() -> Arc<BuiltinMapper> {
        Arc::clone(&SHARED)
    }

    /// Add (or replace) a mapping, e.g. for a CRD.
    pub fn register(&mut self, resource: ApiResource, namespaced: bool) {
        let key = gvk_key(&GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind));
        self.by_gvk.insert(key, RestMapping { resource, namespaced });
    }

    pub fn len(&self) -> usize { self.by_gvk.len() }
    pub fn is_empty(&self) -> bool { self.by_gvk.is_empty() }
}

impl RestMapper for BuiltinMapper {
    fn mapping(&self, gvk: &GroupVersionKind) -> Option<RestMapping> {
        self.by_gvk.get(&gvk_key(gvk)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knows_builtin_scopes() {
        let m = BuiltinMapper::shared();
        let pod = m.mapping(&GroupVersionKind::gvk("", "v1", "Pod")).unwrap();
        assert!(pod.namespaced);
        assert_eq!(pod.resource.plural, "pods");
        let crb = m.mapping(&GroupVersionKind::gvk("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding")).unwrap();
        assert!(!crb.namespaced);
        assert!(m.mapping(&GroupVersionKind::gvk("apps", "v1beta1", "Deployment")).is_none());
    }

    #[test]
    fn register_adds_custom_kinds() {
        let mut m = BuiltinMapper::empty();
        assert!(m.is_empty());
        m.register(
            ApiResource {
                group: "cert-manager.io".into(),
                version: "v1".into(),
                api_version: "cert-manager.io/v1".into(),
                kind: "ClusterIssuer".into(),
                plural: "clusterissuers".into(),
            },
            false,
        );
        let got = m.mapping(&GroupVersionKind::gvk("cert-manager.io", "v1", "ClusterIssuer")).unwrap();
        assert!(!got.namespaced);
        assert_eq!(m.len(), 1);
    }
}
