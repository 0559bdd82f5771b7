//! Write helpers shared by the controllers

use std::fmt::Debug;

use kube::api::{DeleteParams, Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::controller::Context;
use crate::controller::error::{Result, with_timeout};
use crate::resources::FIELD_MANAGER;

/// Apply a namespaced object using server-side apply
pub async fn apply_resource<K>(ctx: &Context, ns: &str, resource: &K) -> Result<()>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Serialize
        + DeserializeOwned
        + Clone
        + Debug,
    <K as Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(ctx.client.clone(), ns);
    let name = resource.name_any();
    let params = PatchParams::apply(FIELD_MANAGER).force();

    with_timeout(
        ctx.config.api_timeout,
        "apply object",
        api.patch(&name, &params, &Patch::Apply(resource)),
    )
    .await?;
    debug!("Applied {}: {}", K::kind(&Default::default()), name);
    Ok(())
}

/// Delete a namespaced object, returning false if it was already gone
pub async fn delete_resource<K>(ctx: &Context, ns: &str, name: &str) -> Result<bool>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + DeserializeOwned + Clone + Debug,
    <K as Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(ctx.client.clone(), ns);
    match with_timeout(
        ctx.config.api_timeout,
        "delete object",
        api.delete(name, &DeleteParams::background()),
    )
    .await
    {
        Ok(_) => {
            debug!("Deleted {}: {}", K::kind(&Default::default()), name);
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Check if the finalizer is present
pub fn has_finalizer<K: Resource>(object: &K, finalizer: &str) -> bool {
    object.finalizers().iter().any(|f| f == finalizer)
}

/// Add or remove a finalizer with a merge patch conditioned on the object's
/// resourceVersion
async fn set_finalizers<K>(ctx: &Context, object: &K, finalizers: Vec<String>) -> Result<()>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + DeserializeOwned + Clone + Debug,
    <K as Resource>::DynamicType: Default,
{
    let ns = object.namespace().unwrap_or_default();
    let api: Api<K> = Api::namespaced(ctx.client.clone(), &ns);
    let patch = serde_json::json!({
        "metadata": {
            "resourceVersion": object.resource_version(),
            "finalizers": finalizers,
        }
    });
    with_timeout(
        ctx.config.api_timeout,
        "patch finalizers",
        api.patch(
            &object.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        ),
    )
    .await?;
    Ok(())
}

pub async fn add_finalizer<K>(ctx: &Context, object: &K, finalizer: &str) -> Result<()>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + DeserializeOwned + Clone + Debug,
    <K as Resource>::DynamicType: Default,
{
    let mut finalizers = object.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    set_finalizers(ctx, object, finalizers).await
}

pub async fn remove_finalizer<K>(ctx: &Context, object: &K, finalizer: &str) -> Result<()>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + DeserializeOwned + Clone + Debug,
    <K as Resource>::DynamicType: Default,
{
    if !has_finalizer(object, finalizer) {
        return Ok(());
    }
    let finalizers = object
        .finalizers()
        .iter()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect();
    set_finalizers(ctx, object, finalizers).await
}
