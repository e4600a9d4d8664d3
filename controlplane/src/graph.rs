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

//! Virtual service graph of a Gateway and the registry holding one graph per
//! Gateway.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::*;

use crate::consts::{DEFAULT_L7_APP_PROFILE, DEFAULT_TCP_NW_PROFILE};
use crate::index::EncodedKeyIndex;
use crate::model::{
    GatewayIntent, PortProtocol, TlsCertNode, TlsMaterial, VipNode, VirtualServiceNode,
};
use crate::naming;
use crate::network::NamespaceNetworkCache;
use crate::publisher::ModelPublisher;
use crate::status::Realization;
use crate::store::SecretStore;
use crate::tls::{self, CertificateChange};
use crate::{NamespacedName, Result};

/// Appliance-side placement shared by every virtual service this controller builds.
#[derive(Clone, Debug)]
pub struct GraphSettings {
    pub cluster_name: String,
    pub tenant: String,
    pub service_engine_group: String,
    pub vrf_context: String,
}

// One entry per listener, in listener order.
pub fn build_port_protocols(intent: &GatewayIntent) -> Vec<PortProtocol> {
    intent
        .listeners
        .iter()
        .map(|listener| PortProtocol {
            port: listener.port,
            protocol: listener.protocol.clone(),
            enable_ssl: listener.terminates_tls(),
        })
        .collect()
}

pub fn build_vsvip(
    intent: &GatewayIntent,
    vs_name: &str,
    vip_networks: Vec<String>,
    settings: &GraphSettings,
) -> VipNode {
    // Whether more than one address is acceptable is decided by validation.
    let ip_address = match intent.addresses.as_slice() {
        [address] => Some(address.value.clone()),
        _ => None,
    };
    VipNode {
        name: naming::vsvip_name(vs_name),
        tenant: settings.tenant.clone(),
        vrf_context: settings.vrf_context.clone(),
        vip_networks,
        ip_address,
    }
}

/// Assembles the parent virtual service of a Gateway, checksum included.
pub fn build_virtual_service(
    intent: &GatewayIntent,
    tls_cert_refs: Vec<TlsCertNode>,
    vip_networks: Vec<String>,
    settings: &GraphSettings,
) -> VirtualServiceNode {
    let name = naming::gateway_parent_name(&settings.cluster_name, &intent.namespace, &intent.name);
    let vsvip = build_vsvip(intent, &name, vip_networks, settings);
    let mut node = VirtualServiceNode {
        name,
        tenant: settings.tenant.clone(),
        service_engine_group: settings.service_engine_group.clone(),
        application_profile: DEFAULT_L7_APP_PROFILE.to_string(),
        network_profile: DEFAULT_TCP_NW_PROFILE.to_string(),
        vrf_context: settings.vrf_context.clone(),
        evh_parent: true,
        gateway: intent.key(),
        port_protocols: build_port_protocols(intent),
        tls_cert_refs,
        vsvip,
        checksum: 0,
    };
    node.checksum = node.compute_checksum();
    node
}

/// The last built graph of one Gateway.
#[derive(Debug)]
pub struct GatewayGraph {
    pub intent: GatewayIntent,
    pub node: VirtualServiceNode,
    index: EncodedKeyIndex,
    /// Checksum of the node the publisher last accepted.
    published: Option<u64>,
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub node: VirtualServiceNode,
    /// What the publisher reported, `None` when the node equals the one
    /// last published and nothing was sent.
    pub published: Option<Realization>,
}

impl BuildOutcome {
    pub fn changed(&self) -> bool {
        self.published.is_some()
    }
}

type GraphEntry = Arc<Mutex<Option<GatewayGraph>>>;

/// Graphs keyed by `namespace/name` of their Gateway.
///
/// Each Gateway has its own lock, held for the whole of a build or a TLS
/// update including the hand-off to the publisher, so a Gateway event and a
/// Secret event for the same Gateway never interleave and the published model
/// always matches the graph. Different Gateways proceed in parallel.
pub struct GraphRegistry {
    graphs: RwLock<HashMap<String, GraphEntry>>,
    publisher: Arc<dyn ModelPublisher>,
}

impl GraphRegistry {
    pub fn new(publisher: Arc<dyn ModelPublisher>) -> Self {
        Self {
            graphs: RwLock::new(HashMap::new()),
            publisher,
        }
    }

    async fn entry(&self, key: &str) -> GraphEntry {
        if let Some(entry) = self.graphs.read().await.get(key) {
            return entry.clone();
        }
        self.graphs
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Rebuilds the graph of a Gateway from scratch, resolving every
    /// certificate, and publishes it unless the publisher already has it.
    ///
    /// A failed publish keeps the new graph but leaves it marked unpublished,
    /// so the next build retries.
    pub async fn build(
        &self,
        intent: &GatewayIntent,
        secrets: &dyn SecretStore,
        networks: &NamespaceNetworkCache,
        settings: &GraphSettings,
    ) -> Result<BuildOutcome> {
        let key = intent.key();
        let entry = self.entry(&key).await;
        let mut guard = entry.lock().await;

        let (tls_nodes, index) = tls::build_tls_nodes(intent, secrets, settings).await;
        let node = build_virtual_service(
            intent,
            tls_nodes,
            networks.get(&intent.namespace),
            settings,
        );
        info!(
            "key: {}, msg: checksum for virtual service {} is {}",
            key, node.name, node.checksum
        );

        let published = guard.as_ref().and_then(|previous| previous.published);
        let graph = guard.insert(GatewayGraph {
            intent: intent.clone(),
            node: node.clone(),
            index,
            published,
        });
        if published == Some(node.checksum) {
            return Ok(BuildOutcome {
                node,
                published: None,
            });
        }

        let realization = self.publisher.publish(&key, &node).await?;
        graph.published = Some(node.checksum);
        Ok(BuildOutcome {
            node,
            published: Some(realization),
        })
    }

    /// Merges a created or updated TLS secret into every graph referencing it.
    /// Returns the nodes that changed and were published.
    pub async fn apply_certificate_upsert(
        &self,
        secret: &NamespacedName,
        material: &TlsMaterial,
        settings: &GraphSettings,
    ) -> Vec<BuildOutcome> {
        self.apply_certificate_change(CertificateChange::Upsert { secret, material }, settings)
            .await
    }

    /// Drops a deleted TLS secret from every graph referencing it. Returns the
    /// nodes that changed and were published.
    pub async fn apply_certificate_removal(
        &self,
        secret: &NamespacedName,
        settings: &GraphSettings,
    ) -> Vec<BuildOutcome> {
        self.apply_certificate_change(CertificateChange::Removal { secret }, settings)
            .await
    }

    async fn apply_certificate_change(
        &self,
        change: CertificateChange<'_>,
        settings: &GraphSettings,
    ) -> Vec<BuildOutcome> {
        let entries: Vec<GraphEntry> = self.graphs.read().await.values().cloned().collect();
        let mut updated = vec![];

        for entry in entries {
            let mut guard = entry.lock().await;
            let Some(graph) = guard.as_mut() else {
                continue;
            };
            let secret = change.secret();
            if !graph.intent.references_secret(secret) {
                continue;
            }
            let key = graph.intent.key();

            let current = &graph.node.tls_cert_refs;
            let tls_cert_refs = match change {
                CertificateChange::Upsert { secret, material } => tls::apply_certificate_upsert(
                    current,
                    &graph.intent,
                    secret,
                    material,
                    &mut graph.index,
                    settings,
                ),
                CertificateChange::Removal { secret } => tls::apply_certificate_removal(
                    current,
                    &graph.intent,
                    secret,
                    &mut graph.index,
                    settings,
                ),
            };

            let mut node = graph.node.clone();
            node.tls_cert_refs = tls_cert_refs;
            node.checksum = node.compute_checksum();
            if graph.published == Some(node.checksum) {
                debug!(
                    "key: {}, msg: secret {} did not change virtual service {}",
                    key, secret, node.name
                );
                continue;
            }
            info!(
                "key: {}, msg: updated cert_refs in parent virtual service {}",
                key, node.name
            );
            graph.node = node.clone();

            match self.publisher.publish(&key, &node).await {
                Ok(realization) => {
                    graph.published = Some(node.checksum);
                    updated.push(BuildOutcome {
                        node,
                        published: Some(realization),
                    });
                }
                Err(err) => warn!(
                    "key: {}, msg: failed to publish virtual service {}: {}",
                    key, node.name, err
                ),
            }
        }
        updated
    }

    /// Intent the current graph of a Gateway was built from.
    pub async fn intent(&self, key: &str) -> Option<GatewayIntent> {
        let entry = self.graphs.read().await.get(key).cloned()?;
        let graph = entry.lock().await;
        graph.as_ref().map(|g| g.intent.clone())
    }

    pub async fn get(&self, key: &str) -> Option<VirtualServiceNode> {
        let entry = self.graphs.read().await.get(key).cloned()?;
        let graph = entry.lock().await;
        graph.as_ref().map(|g| g.node.clone())
    }

    /// Forgets the graph of a Gateway and withdraws its published model,
    /// returning the last built node.
    pub async fn remove(&self, key: &str) -> Result<Option<VirtualServiceNode>> {
        let Some(entry) = self.graphs.write().await.remove(key) else {
            self.publisher.withdraw(key).await?;
            return Ok(None);
        };
        let mut graph = entry.lock().await;
        self.publisher.withdraw(key).await?;
        Ok(graph.take().map(|g| g.node))
    }
}
