//! Ready-made steps: namespace, labels, annotations, images and replicas.
//!
//! Metadata steps edit the dynamic resource directly and keep every field.
//! Image and replica steps go through the typed bridges, but only for the
//! resources they actually target: those come back in their `k8s-openapi`
//! shape, everything else is left byte-for-byte alone.

use std::sync::Arc;

use anyhow::bail;
use k8s_openapi::api::core::v1::PodSpec;
use kform_core::{Json, Object, Pairs, Resource, RestMapper, TransformError, Transformer};
use tracing::debug;

use crate::{cron_job, daemon_set, deployment, job, pod, replica_set, stateful_set};

/// Set `metadata.namespace`, skipping kinds the mapper reports as cluster-scoped.
///
/// Kinds the mapper does not know are treated as namespaced.
pub fn set_namespace(namespace: impl Into<String>, mapper: Option<Arc<dyn RestMapper>>) -> Transformer {
    let namespace = namespace.into();
    Box::new(move |resource: &mut Resource| -> Result<(), TransformError> {
        if let Some(m) = mapper.as_ref().and_then(|m| m.mapping(&resource.gvk())) {
            if !m.namespaced {
                debug!(resource = %resource, "cluster-scoped; namespace left alone");
                return Ok(());
            }
        }
        resource.set_namespace(&namespace)?;
        Ok(())
    })
}

pub fn add_labels<I>(pairs: I) -> Transformer
where
    I: IntoIterator<Item = (String, String)>,
{
    let pairs: Pairs = pairs.into_iter().collect();
    Box::new(move |resource: &mut Resource| -> Result<(), TransformError> {
        for (k, v) in pairs.iter() {
            resource.insert_label(k, v)?;
        }
        Ok(())
    })
}

pub fn add_annotations<I>(pairs: I) -> Transformer
where
    I: IntoIterator<Item = (String, String)>,
{
    let pairs: Pairs = pairs.into_iter().collect();
    Box::new(move |resource: &mut Resource| -> Result<(), TransformError> {
        for (k, v) in pairs.iter() {
            resource.insert_annotation(k, v)?;
        }
        Ok(())
    })
}

/// Image name without tag or digest: `registry:5000/app:1.2@sha256:..` -> `registry:5000/app`.
pub fn image_name(reference: &str) -> &str {
    let no_digest = reference.split('@').next().unwrap_or(reference);
    match no_digest.rfind(':') {
        Some(colon) if !no_digest[colon..].contains('/') => &no_digest[..colon],
        _ => no_digest,
    }
}

/// Run `step` only on resources `targeted` accepts.
fn only_if<P>(targeted: P, step: Transformer) -> Transformer
where
    P: Fn(&Resource) -> bool + Send + Sync + 'static,
{
    Box::new(move |resource: &mut Resource| {
        if !targeted(resource) {
            return Ok(());
        }
        step(resource)
    })
}

/// Whether any `containers`/`initContainers` entry below `map` runs image `name`.
fn references_image(map: &Object, name: &str) -> bool {
    map.iter().any(|(key, child)| {
        let hit = (key == "containers" || key == "initContainers")
            && child.as_array().is_some_and(|cs| {
                cs.iter().any(|c| c.get("image").and_then(Json::as_str).is_some_and(|i| image_name(i) == name))
            });
        hit || match child {
            Json::Object(m) => references_image(m, name),
            Json::Array(items) => items.iter().filter_map(Json::as_object).any(|m| references_image(m, name)),
            _ => false,
        }
    })
}

#[derive(Debug)]
struct ImageRule {
    name: String,
    new_ref: String,
}

impl ImageRule {
    fn rewrite(&self, spec: &mut PodSpec) {
        let init = spec.init_containers.iter_mut().flatten();
        for c in spec.containers.iter_mut().chain(init) {
            if let Some(image) = c.image.as_mut() {
                if image_name(image) == self.name {
                    *image = self.new_ref.clone();
                }
            }
        }
    }
}

/// Point every container whose image is `name` (any tag or digest) at `new_ref`.
///
/// One step per workload kind with a pod template.
pub fn set_image(name: &str, new_ref: &str) -> Vec<Transformer> {
    let rule = Arc::new(ImageRule { name: name.to_string(), new_ref: new_ref.to_string() });
    let steps = vec![
        pod({
            let rule = Arc::clone(&rule);
            move |p| {
                if let Some(spec) = p.spec.as_mut() { rule.rewrite(spec); }
                Ok(())
            }
        }),
        deployment({
            let rule = Arc::clone(&rule);
            move |d| {
                if let Some(spec) = d.spec.as_mut().and_then(|s| s.template.spec.as_mut()) { rule.rewrite(spec); }
                Ok(())
            }
        }),
        stateful_set({
            let rule = Arc::clone(&rule);
            move |s| {
                if let Some(spec) = s.spec.as_mut().and_then(|s| s.template.spec.as_mut()) { rule.rewrite(spec); }
                Ok(())
            }
        }),
        daemon_set({
            let rule = Arc::clone(&rule);
            move |d| {
                if let Some(spec) = d.spec.as_mut().and_then(|s| s.template.spec.as_mut()) { rule.rewrite(spec); }
                Ok(())
            }
        }),
        replica_set({
            let rule = Arc::clone(&rule);
            move |r| {
                let tpl = r.spec.as_mut().and_then(|s| s.template.as_mut());
                if let Some(spec) = tpl.and_then(|t| t.spec.as_mut()) { rule.rewrite(spec); }
                Ok(())
            }
        }),
        job({
            let rule = Arc::clone(&rule);
            move |j| {
                if let Some(spec) = j.spec.as_mut().and_then(|s| s.template.spec.as_mut()) { rule.rewrite(spec); }
                Ok(())
            }
        }),
        cron_job(move |c| {
            let job = c.spec.as_mut().and_then(|s| s.job_template.spec.as_mut());
            if let Some(spec) = job.and_then(|j| j.template.spec.as_mut()) { rule.rewrite(spec); }
            Ok(())
        }),
    ];
    let name = Arc::new(name.to_string());
    steps
        .into_iter()
        .map(|step| {
            let name = Arc::clone(&name);
            only_if(move |r: &Resource| references_image(r.object(), &name), step)
        })
        .collect()
}

/// Scale the Deployment, StatefulSet or ReplicaSet called `name`.
pub fn set_replicas(name: &str, count: i32) -> Vec<Transformer> {
    let name = Arc::new(name.to_string());
    let steps = vec![
        deployment({
            let name = Arc::clone(&name);
            move |d| match d.spec.as_mut() {
                Some(spec) => {
                    spec.replicas = Some(count);
                    Ok(())
                }
                None => bail!("deployment {} has no spec to scale", name),
            }
        }),
        stateful_set({
            let name = Arc::clone(&name);
            move |s| match s.spec.as_mut() {
                Some(spec) => {
                    spec.replicas = Some(count);
                    Ok(())
                }
                None => bail!("statefulset {} has no spec to scale", name),
            }
        }),
        replica_set({
            let name = Arc::clone(&name);
            move |r| match r.spec.as_mut() {
                Some(spec) => {
                    spec.replicas = Some(count);
                    Ok(())
                }
                None => bail!("replicaset {} has no spec to scale", name),
            }
        }),
    ];
    steps
        .into_iter()
        .map(|step| {
            let name = Arc::clone(&name);
            only_if(move |r: &Resource| r.name() == Some(name.as_str()), step)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuiltinMapper;
    use kform_core::{Json, ResourceList};
    use serde_json::json;

    fn res(v: Json) -> Resource {
        Resource::try_from_value(v).unwrap()
    }

    fn deploy(name: &str, image: &str) -> Resource {
        res(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": name },
            "spec": {
                "replicas": 1,
                "selector": { "matchLabels": { "app": name } },
                "template": {
                    "metadata": { "labels": { "app": name } },
                    "spec": {
                        "initContainers": [{ "name": "init", "image": image }],
                        "containers": [{ "name": "main", "image": image }, { "name": "side", "image": "envoy:1.30" }]
                    }
                }
            }
        }))
    }

    #[test]
    fn image_name_strips_tag_and_digest() {
        assert_eq!(image_name("nginx"), "nginx");
        assert_eq!(image_name("nginx:1.25"), "nginx");
        assert_eq!(image_name("nginx@sha256:abc"), "nginx");
        assert_eq!(image_name("registry:5000/team/app:2"), "registry:5000/team/app");
        assert_eq!(image_name("registry:5000/team/app"), "registry:5000/team/app");
    }

    #[test]
    fn namespace_skips_cluster_scoped_kinds() {
        let list = ResourceList::new(vec![
            res(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "prod"}})),
            res(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "c"}})),
            res(json!({"apiVersion": "example.com/v1", "kind": "Widget", "metadata": {"name": "w"}})),
        ]);
        let mapper: Arc<dyn RestMapper> = BuiltinMapper::shared();
        let out = list.transform(&[set_namespace("prod", Some(mapper))]).unwrap();
        let ns: Vec<_> = out.iter().map(|r| r.namespace()).collect();
        assert_eq!(ns, vec![None, Some("prod"), Some("prod")]);
    }

    #[test]
    fn namespace_without_mapper_touches_everything() {
        let list = ResourceList::new(vec![res(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "x"}}))]);
        let out = list.transform(&[set_namespace("y", None)]).unwrap();
        assert_eq!(out.resources()[0].namespace(), Some("y"));
    }

    #[test]
    fn labels_and_annotations_keep_unknown_fields() {
        let list = ResourceList::new(vec![res(json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": {"name": "c", "labels": {"keep": "me"}},
            "x-extra": true
        }))]);
        let out = list
            .transform(&[
                add_labels([("app".to_string(), "web".to_string())]),
                add_annotations([("note".to_string(), "hi".to_string())]),
            ])
            .unwrap();
        let r = &out.resources()[0];
        assert_eq!(r.labels().len(), 2);
        assert_eq!(r.annotations()[0], ("note".to_string(), "hi".to_string()));
        assert_eq!(r.object()["x-extra"], json!(true));
    }

    #[test]
    fn set_image_rewrites_matching_containers_only() {
        let list = ResourceList::new(vec![deploy("web", "nginx:1.25")]);
        let out = list.transform(&set_image("nginx", "nginx:1.27")).unwrap();
        let spec = &out.resources()[0].object()["spec"]["template"]["spec"];
        assert_eq!(spec["containers"][0]["image"], "nginx:1.27");
        assert_eq!(spec["containers"][1]["image"], "envoy:1.30");
        assert_eq!(spec["initContainers"][0]["image"], "nginx:1.27");
    }

    #[test]
    fn set_image_reaches_cron_jobs() {
        let cj = res(json!({
            "apiVersion": "batch/v1",
            "kind": "CronJob",
            "metadata": { "name": "nightly" },
            "spec": {
                "schedule": "0 3 * * *",
                "jobTemplate": { "spec": { "template": { "spec": {
                    "restartPolicy": "Never",
                    "containers": [{ "name": "run", "image": "busybox:1.36" }]
                } } } }
            }
        }));
        let out = ResourceList::new(vec![cj]).transform(&set_image("busybox", "busybox:1.37")).unwrap();
        let c = &out.resources()[0].object()["spec"]["jobTemplate"]["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(c["image"], "busybox:1.37");
    }

    #[test]
    fn set_replicas_targets_by_name() {
        let list = ResourceList::new(vec![deploy("web", "nginx"), deploy("api", "nginx")]);
        let out = list.transform(&set_replicas("api", 5)).unwrap();
        assert_eq!(out.resources()[0].object()["spec"]["replicas"], json!(1));
        assert_eq!(out.resources()[1].object()["spec"]["replicas"], json!(5));
    }

    #[test]
    fn untargeted_workloads_keep_every_field() {
        let mut keep = deploy("web", "envoy:1.30");
        keep.object_mut()["metadata"]["creationTimestamp"] = Json::Null;
        keep.object_mut().insert("x-extra".into(), json!(true));
        let target = deploy("api", "nginx:1.25");
        let list = ResourceList::new(vec![keep.clone(), target]);

        let mut steps = set_image("nginx", "nginx:1.27");
        steps.extend(set_replicas("api", 2));
        let out = list.transform(&steps).unwrap();

        assert_eq!(out.resources()[0], keep);
        let api = out.resources()[1].object();
        assert_eq!(api["spec"]["replicas"], json!(2));
        assert_eq!(api["spec"]["template"]["spec"]["containers"][0]["image"], "nginx:1.27");
    }

    #[test]
    fn untargeted_workloads_are_never_decoded() {
        // would fail to decode: containers must be a list
        let broken = res(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "legacy" },
            "spec": { "template": { "spec": { "containers": "busybox" } } }
        }));
        let list = ResourceList::new(vec![broken.clone(), deploy("web", "nginx")]);
        let mut steps = set_image("nginx", "nginx:1.27");
        steps.extend(set_replicas("web", 3));
        let out = list.transform(&steps).unwrap();
        assert_eq!(out.resources()[0], broken);
        assert_eq!(out.resources()[1].object()["spec"]["replicas"], json!(3));
    }

    #[test]
    fn set_replicas_fails_on_specless_workloads() {
        let bare = res(json!({"apiVersion": "apps/v1", "kind": "StatefulSet", "metadata": {"name": "db"}}));
        let list = ResourceList::new(vec![bare]);
        let err = list.transform(&set_replicas("db", 3)).unwrap_err();
        assert_eq!(err.to_string(), "statefulset db has no spec to scale");
    }
}
