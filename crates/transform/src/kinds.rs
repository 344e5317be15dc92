//! Named, kind-filtered constructors for the built-in Kubernetes kinds.
//!
//! The table below is the only place a kind is listed; each row yields a
//! constructor (`pod`, `deployment`, ...) and an entry in [`builtin_kinds`].

use k8s_openapi::api::{
    apps::v1 as appsv1, autoscaling::v2 as autoscalingv2, batch::v1 as batchv1, core::v1 as corev1,
    networking::v1 as networkingv1, policy::v1 as policyv1, rbac::v1 as rbacv1,
};
use kform_core::Transformer;
use kube::core::{ApiResource, GroupVersionKind};
use kube::discovery::Scope;

use crate::gvk_of;

/// Identity, endpoint and scope of a kind with a named constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindInfo {
    pub gvk: GroupVersionKind,
    pub plural: &'static str,
    pub namespaced: bool,
}

impl KindInfo {
    fn of<K: k8s_openapi::Resource>(scope: Scope) -> Self {
        Self { gvk: gvk_of::<K>(), plural: K::URL_PATH_SEGMENT, namespaced: matches!(scope, Scope::Namespaced) }
    }

    pub fn api_version(&self) -> String {
        if self.gvk.group.is_empty() {
            self.gvk.version.clone()
        } else {
            format!("{}/{}", self.gvk.group, self.gvk.version)
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.gvk.group.clone(),
            version: self.gvk.version.clone(),
            api_version: self.api_version(),
            kind: self.gvk.kind.clone(),
            plural: self.plural.to_string(),
        }
    }
}

macro_rules! kinds {
    ($( $(#[$doc:meta])* $name:ident => $ty:ty, $scope:ident; )*) => {
        $(
            $(#[$doc])*
            pub fn $name<F>(f: F) -> Transformer
            where
                F: Fn(&mut $ty) -> anyhow::Result<()> + Send + Sync + 'static,
            {
                crate::kind::<$ty, F>(f)
            }
        )*

        /// Every kind with a named constructor, in table order.
        pub fn builtin_kinds() -> Vec<KindInfo> {
            vec![$( KindInfo::of::<$ty>(Scope::$scope) ),*]
        }
    };
}

kinds! {
    /// Applies `f` to `v1` Pods.
    pod => corev1::Pod, Namespaced;
    /// Applies `f` to `v1` Services.
    service => corev1::Service, Namespaced;
    /// Applies `f` to `v1` Namespaces.
    namespace => corev1::Namespace, Cluster;
    config_map => corev1::ConfigMap, Namespaced;
    secret => corev1::Secret, Namespaced;
    service_account => corev1::ServiceAccount, Namespaced;
    persistent_volume_claim => corev1::PersistentVolumeClaim, Namespaced;
    /// Applies `f` to `apps/v1` Deployments.
    deployment => appsv1::Deployment, Namespaced;
    /// Applies `f` to `apps/v1` StatefulSets.
    stateful_set => appsv1::StatefulSet, Namespaced;
    /// Applies `f` to `apps/v1` DaemonSets.
    daemon_set => appsv1::DaemonSet, Namespaced;
    replica_set => appsv1::ReplicaSet, Namespaced;
    job => batchv1::Job, Namespaced;
    cron_job => batchv1::CronJob, Namespaced;
    /// Applies `f` to `networking.k8s.io/v1` Ingresses.
    ingress => networkingv1::Ingress, Namespaced;
    network_policy => networkingv1::NetworkPolicy, Namespaced;
    role => rbacv1::Role, Namespaced;
    role_binding => rbacv1::RoleBinding, Namespaced;
    cluster_role => rbacv1::ClusterRole, Cluster;
    cluster_role_binding => rbacv1::ClusterRoleBinding, Cluster;
    horizontal_pod_autoscaler => autoscalingv2::HorizontalPodAutoscaler, Namespaced;
    pod_disruption_budget => policyv1::PodDisruptionBudget, Namespaced;
}
