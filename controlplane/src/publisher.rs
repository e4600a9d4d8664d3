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

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::*;

#[cfg(test)]
use mockall::automock;

use crate::model::VirtualServiceNode;
use crate::status::Realization;
use crate::Result;

/// Hands built virtual services to whatever realizes them on the load balancer.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ModelPublisher: Send + Sync {
    /// Publishes the latest node for a Gateway key and reports how far its
    /// realization has progressed.
    async fn publish(&self, key: &str, node: &VirtualServiceNode) -> Result<Realization>;

    /// Withdraws whatever was published for a Gateway key. Withdrawing an
    /// unknown key is not an error.
    async fn withdraw(&self, key: &str) -> Result<()>;
}

/// In-memory model cache. Realization happens asynchronously downstream, so
/// every publish reports `Pending`.
pub struct ModelCache {
    models: Arc<RwLock<HashMap<String, VirtualServiceNode>>>,
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelCache {
    pub fn new() -> Self {
        Self {
            models: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, key: &str) -> Option<VirtualServiceNode> {
        self.models.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.models.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.models.read().await.is_empty()
    }
}

#[async_trait]
impl ModelPublisher for ModelCache {
    async fn publish(&self, key: &str, node: &VirtualServiceNode) -> Result<Realization> {
        let mut models = self.models.write().await;
        match models.insert(key.to_string(), node.clone()) {
            Some(previous) if previous.checksum == node.checksum => {
                debug!("key: {}, msg: model unchanged, checksum {}", key, node.checksum);
            }
            _ => info!(
                "key: {}, msg: published model for virtual service {}",
                key, node.name
            ),
        }
        Ok(Realization::Pending)
    }

    async fn withdraw(&self, key: &str) -> Result<()> {
        if self.models.write().await.remove(key).is_some() {
            info!("key: {}, msg: withdrew model", key);
        }
        Ok(())
    }
}
