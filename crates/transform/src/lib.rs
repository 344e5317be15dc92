//! kform transform: typed bridges over dynamic resources.
//!
//! A bridge decodes a [`Resource`] into a statically-shaped value, hands it to
//! caller logic, encodes it back and overwrites the resource. Guarded bridges
//! only fire for one exact group/version/kind and pass everything else through,
//! so a single pipeline can carry steps for many unrelated kinds.

#![forbid(unsafe_code)]

use kform_core::{json_type_name, Json, Resource, TransformError, Transformer};
use kube::core::GroupVersionKind;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub mod builtin;
mod kinds;
mod mapper;
mod quantity;

pub use kinds::*;
pub use mapper::BuiltinMapper;

/// Bridge every resource through the typed shape `T`.
///
/// On success the resource is replaced by the encoded `T`: fields `T` does not
/// model are gone afterwards. On any error the resource is left as it was.
pub fn object<T, F>(f: F) -> Transformer
where
    T: Serialize + DeserializeOwned + 'static,
    F: Fn(&mut T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Box::new(move |resource: &mut Resource| bridge::<T, F>(resource, &f))
}

fn bridge<T, F>(resource: &mut Resource, f: &F) -> Result<(), TransformError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(&mut T) -> anyhow::Result<()>,
{
    let target = std::any::type_name::<T>();
    let mut typed: T = decode(resource.to_value())
        .map_err(|source| TransformError::Decode { resource: resource.describe(), target, source })?;

    f(&mut typed)?;

    let encoded = serde_json::to_value(&typed)
        .map_err(|source| TransformError::Encode { resource: resource.describe(), target, source })?;
    match encoded {
        Json::Object(object) => {
            resource.set_object(object);
            Ok(())
        }
        other => Err(TransformError::ConversionTarget {
            target,
            resource: resource.describe(),
            found: json_type_name(&other),
        }),
    }
}

/// Decode as-is first; numeric quantities get a second chance as strings.
fn decode<T: DeserializeOwned>(raw: Json) -> Result<T, serde_json::Error> {
    let first = match T::deserialize(&raw) {
        Ok(typed) => return Ok(typed),
        Err(e) => e,
    };
    let mut lenient = raw;
    if !quantity::stringify_numbers(&mut lenient) {
        return Err(first);
    }
    serde_json::from_value(lenient)
}

/// Bridge through `T`, but only for resources whose identity is exactly `gvk`.
pub fn for_gvk<T, F>(gvk: GroupVersionKind, f: F) -> Transformer
where
    T: Serialize + DeserializeOwned + 'static,
    F: Fn(&mut T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    let inner = object::<T, F>(f);
    Box::new(move |resource: &mut Resource| {
        if !resource.is_gvk(&gvk) {
            return Ok(());
        }
        inner(resource)
    })
}

pub fn gvk_of<K: k8s_openapi::Resource>() -> GroupVersionKind {
    GroupVersionKind::gvk(K::GROUP, K::VERSION, K::KIND)
}

/// Guarded bridge for any `k8s-openapi` kind; identity comes from the type.
pub fn kind<K, F>(f: F) -> Transformer
where
    K: k8s_openapi::Resource + Serialize + DeserializeOwned + 'static,
    F: Fn(&mut K) -> anyhow::Result<()> + Send + Sync + 'static,
{
    for_gvk::<K, F>(gvk_of::<K>(), f)
}
