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
use std::sync::RwLock;

/// Namespace to VIP network placement.
///
/// Namespaces without an override resolve to the cluster-wide default list the
/// cache was created with.
pub struct NamespaceNetworkCache {
    networks: RwLock<HashMap<String, String>>,
    defaults: Vec<String>,
}

impl NamespaceNetworkCache {
    pub fn new(defaults: Vec<String>) -> Self {
        Self {
            networks: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    pub fn get(&self, namespace: &str) -> Vec<String> {
        let networks = self.networks.read().unwrap_or_else(|e| e.into_inner());
        match networks.get(namespace) {
            Some(network) => vec![network.clone()],
            None => self.defaults.clone(),
        }
    }

    pub fn put(&self, namespace: &str, network: &str) {
        let mut networks = self.networks.write().unwrap_or_else(|e| e.into_inner());
        networks.insert(namespace.to_string(), network.to_string());
    }

    pub fn delete(&self, namespace: &str) {
        let mut networks = self.networks.write().unwrap_or_else(|e| e.into_inner());
        networks.remove(namespace);
    }

    /// Swaps every override for `overrides`, dropping namespaces not listed.
    pub fn replace(&self, overrides: HashMap<String, String>) {
        let mut networks = self.networks.write().unwrap_or_else(|e| e.into_inner());
        *networks = overrides;
    }
}
