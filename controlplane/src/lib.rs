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

use std::sync::Arc;

use thiserror::Error;

pub use gateway_controller::controller as gateway_controller;
pub use gateway_controller::sync_gateway;
pub use gatewayclass_controller::controller as gatewayclass_controller;
pub use namespace_controller::controller as namespace_controller;
pub use secret_controller::controller as secret_controller;

pub mod config;
pub mod consts;
pub mod graph;
pub mod index;
pub mod model;
pub mod naming;
pub mod network;
pub mod publisher;
pub mod status;
pub mod status_patcher;
pub mod store;
pub mod tls;
pub mod validation;

mod gateway_controller;
mod gatewayclass_controller;
mod gatewayclass_utils;
mod namespace_controller;
mod secret_controller;
mod traits;
mod utils;

use graph::{GraphRegistry, GraphSettings};
use network::NamespaceNetworkCache;
use status_patcher::StatusPatcher;
use store::{GatewayStore, SecretStore};

// Context for our reconcilers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: kube::Client,
    pub state: State,
}

/// Everything the reconcilers share apart from the Kubernetes client.
#[derive(Clone)]
pub struct State {
    /// Controller name GatewayClasses must carry for us to own them.
    pub controller_name: String,
    pub gateways: Arc<dyn GatewayStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub networks: Arc<NamespaceNetworkCache>,
    /// Built graphs. Publishing and withdrawing models goes through here.
    pub graphs: Arc<GraphRegistry>,
    pub settings: GraphSettings,
}

impl State {
    pub fn status_patcher(&self) -> StatusPatcher {
        StatusPatcher::new(self.gateways.clone(), self.controller_name.clone())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[source] kube::Error),
    #[error("invalid configuration: `{0}`")]
    InvalidConfigError(String),
    #[error("error querying Gateway API CRDs: `{0}`; are the CRDs installed?")]
    CRDNotFoundError(#[source] kube::Error),
    #[error("status patch for `{key}` abandoned after {attempts} attempts")]
    PatchRetriesExhausted { key: String, attempts: usize },
    #[error("finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NamespacedName {
    pub name: String,
    pub namespace: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
