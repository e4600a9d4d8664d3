/*
Copyright 2024 The Kubernetes Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Reads and writes against the Kubernetes API, behind traits so the graph and
//! status logic can run against mocks.

use async_trait::async_trait;
use futures::{future, StreamExt};
use gateway_api::apis::standard::{gatewayclasses::GatewayClass, gateways::Gateway};
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, Patch, PatchParams},
    runtime::{
        reflector::{self, store::Writer, Store},
        watcher, WatchStreamExt,
    },
    Client,
};
use tracing::*;

#[cfg(test)]
use mockall::automock;

use crate::utils::is_not_found;
use crate::{Error, Result};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait GatewayStore: Send + Sync {
    /// Reads a Gateway from the API server. `None` when it no longer exists.
    async fn get_gateway(&self, namespace: &str, name: &str) -> Result<Option<Gateway>>;

    async fn list_gateways(&self) -> Result<Vec<Gateway>>;

    async fn get_gateway_class(&self, name: &str) -> Result<Option<GatewayClass>>;

    async fn list_gateway_classes(&self) -> Result<Vec<GatewayClass>>;

    /// Applies a JSON merge patch to the status subresource of a Gateway.
    async fn patch_gateway_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
}

/// Gateways and GatewayClasses mirrored from watches, so listing them costs
/// no API round trip. Empty until the watches have delivered their first list.
#[derive(Clone)]
pub struct ListCache {
    gateways: Store<Gateway>,
    gateway_classes: Store<GatewayClass>,
}

/// Write halves of a [`ListCache`], fed by [`CacheWriters::run`].
pub struct CacheWriters {
    gateways: Writer<Gateway>,
    gateway_classes: Writer<GatewayClass>,
}

/// Creates an empty [`ListCache`] together with the writers that fill it.
pub fn list_cache() -> (ListCache, CacheWriters) {
    let (gateways, gateways_writer) = reflector::store();
    let (gateway_classes, gateway_classes_writer) = reflector::store();
    (
        ListCache {
            gateways,
            gateway_classes,
        },
        CacheWriters {
            gateways: gateways_writer,
            gateway_classes: gateway_classes_writer,
        },
    )
}

impl ListCache {

    pub fn gateways(&self) -> Vec<Gateway> {
        self.gateways.state().iter().map(|gw| gw.as_ref().clone()).collect()
    }

    pub fn gateway_classes(&self) -> Vec<GatewayClass> {
        self.gateway_classes
            .state()
            .iter()
            .map(|gwc| gwc.as_ref().clone())
            .collect()
    }
}

impl CacheWriters {
    /// Watches Gateways and GatewayClasses cluster-wide until the process exits.
    pub async fn run(self, client: Client) -> Result<()> {
        info!("starting Gateway and GatewayClass list caches");
        let gateways = reflector::reflector(
            self.gateways,
            watcher(Api::<Gateway>::all(client.clone()), watcher::Config::default()),
        )
        .default_backoff()
        .touched_objects()
        .for_each(|event| {
            if let Err(err) = event {
                warn!("gateway cache watch failed, will retry: {}", err);
            }
            future::ready(())
        });
        let gateway_classes = reflector::reflector(
            self.gateway_classes,
            watcher(Api::<GatewayClass>::all(client), watcher::Config::default()),
        )
        .default_backoff()
        .touched_objects()
        .for_each(|event| {
            if let Err(err) = event {
                warn!("gatewayclass cache watch failed, will retry: {}", err);
            }
            future::ready(())
        });

        futures::join!(gateways, gateway_classes);
        Ok(())
    }
}

/// Store backed by a live Kubernetes client. Lists are served from a
/// [`ListCache`], single reads and writes go to the API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    cache: ListCache,
}

impl KubeStore {
    pub fn new(client: Client, cache: ListCache) -> Self {
        Self { client, cache }
    }
}

#[async_trait]
impl GatewayStore for KubeStore {
    async fn get_gateway(&self, namespace: &str, name: &str) -> Result<Option<Gateway>> {
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(gw) => Ok(Some(gw)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(Error::KubeError(err)),
        }
    }

    async fn list_gateways(&self) -> Result<Vec<Gateway>> {
        Ok(self.cache.gateways())
    }

    async fn get_gateway_class(&self, name: &str) -> Result<Option<GatewayClass>> {
        let api: Api<GatewayClass> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(gwc) => Ok(Some(gwc)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(Error::KubeError(err)),
        }
    }

    async fn list_gateway_classes(&self) -> Result<Vec<GatewayClass>> {
        Ok(self.cache.gateway_classes())
    }

    async fn patch_gateway_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    }
}

#[async_trait]
impl SecretStore for KubeStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(Error::KubeError(err)),
        }
    }
}
