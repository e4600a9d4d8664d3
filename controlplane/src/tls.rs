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

//! TLS key/cert nodes of a gateway virtual service.
//!
//! A full build resolves every certificate reference of the Gateway. Secret
//! events are merged incrementally: the certificate list is walked in the same
//! order as a full build, entries that are still referenced keep the node they
//! had, and only the changed secret is materialized. Unrelated entries never
//! move relative to each other, which keeps the virtual service checksum stable.

use tracing::*;

use crate::consts::CERT_TYPE_VS;
use crate::graph::GraphSettings;
use crate::index::EncodedKeyIndex;
use crate::model::{GatewayIntent, TlsCertNode, TlsMaterial};
use crate::naming;
use crate::store::SecretStore;
use crate::NamespacedName;

/// A single certificate secret that was created, updated or deleted.
#[derive(Clone, Copy, Debug)]
pub enum CertificateChange<'a> {
    Upsert {
        secret: &'a NamespacedName,
        material: &'a TlsMaterial,
    },
    Removal {
        secret: &'a NamespacedName,
    },
}

impl<'a> CertificateChange<'a> {
    pub fn secret(&self) -> &'a NamespacedName {
        match *self {
            CertificateChange::Upsert { secret, .. } => secret,
            CertificateChange::Removal { secret } => secret,
        }
    }
}

pub fn tls_node(
    settings: &GraphSettings,
    hostname: &str,
    cert_name: &str,
    material: &TlsMaterial,
) -> TlsCertNode {
    TlsCertNode {
        name: naming::tls_key_cert_name(&settings.cluster_name, hostname, cert_name),
        tenant: settings.tenant.clone(),
        cert_type: CERT_TYPE_VS.to_string(),
        key: material.key.clone(),
        cert: material.cert.clone(),
    }
}

/// Resolves every certificate reference of the Gateway, in listener order.
///
/// References whose secret is missing or unreadable are skipped; the next event
/// for that secret adds them back.
pub async fn build_tls_nodes(
    intent: &GatewayIntent,
    secrets: &dyn SecretStore,
    settings: &GraphSettings,
) -> (Vec<TlsCertNode>, EncodedKeyIndex) {
    let key = intent.key();
    let mut nodes = vec![];
    let mut index = EncodedKeyIndex::default();

    for (listener, cert_ref) in intent.certificate_refs() {
        let secret = match secrets.get_secret(&cert_ref.namespace, &cert_ref.name).await {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                warn!(
                    "key: {}, msg: secret {}/{} not found, skipping certificate",
                    key, cert_ref.namespace, cert_ref.name
                );
                continue;
            }
            Err(err) => {
                warn!(
                    "key: {}, msg: failed to read secret {}/{}: {}",
                    key, cert_ref.namespace, cert_ref.name, err
                );
                continue;
            }
        };
        let Some(material) = TlsMaterial::from_secret(&secret) else {
            warn!(
                "key: {}, msg: secret {}/{} has no tls.crt/tls.key data",
                key, cert_ref.namespace, cert_ref.name
            );
            continue;
        };

        let node = tls_node(settings, listener.hostname_or_default(), &cert_ref.name, &material);
        index.record(&node.name, nodes.len());
        nodes.push(node);
    }

    (nodes, index)
}

/// Merges a created or updated certificate secret into `current`.
///
/// Entries already present keep their node (the changed secret's nodes get the
/// fresh material in place); references to the changed secret that are missing
/// are appended at their walk position.
pub fn apply_certificate_upsert(
    current: &[TlsCertNode],
    intent: &GatewayIntent,
    secret: &NamespacedName,
    material: &TlsMaterial,
    index: &mut EncodedKeyIndex,
    settings: &GraphSettings,
) -> Vec<TlsCertNode> {
    reconcile_tls_nodes(
        current,
        intent,
        CertificateChange::Upsert { secret, material },
        index,
        settings,
    )
}

/// Drops every entry that references a deleted certificate secret from `current`.
pub fn apply_certificate_removal(
    current: &[TlsCertNode],
    intent: &GatewayIntent,
    secret: &NamespacedName,
    index: &mut EncodedKeyIndex,
    settings: &GraphSettings,
) -> Vec<TlsCertNode> {
    reconcile_tls_nodes(
        current,
        intent,
        CertificateChange::Removal { secret },
        index,
        settings,
    )
}

// Shared walk of the upsert and removal paths. `index` must describe `current`
// on entry; on return it describes the returned list.
fn reconcile_tls_nodes(
    current: &[TlsCertNode],
    intent: &GatewayIntent,
    change: CertificateChange<'_>,
    index: &mut EncodedKeyIndex,
    settings: &GraphSettings,
) -> Vec<TlsCertNode> {
    let mut nodes = vec![];

    for (listener, cert_ref) in intent.certificate_refs() {
        let hostname = listener.hostname_or_default();
        let encoded = naming::tls_key_cert_name(&settings.cluster_name, hostname, &cert_ref.name);
        let changed = cert_ref.refers_to(change.secret());

        let existing = index.take_first(&encoded).and_then(|pos| current.get(pos));
        match (existing, change) {
            (Some(_), CertificateChange::Removal { .. }) if changed => {}
            (Some(node), CertificateChange::Upsert { material, .. }) if changed => {
                nodes.push(TlsCertNode {
                    key: material.key.clone(),
                    cert: material.cert.clone(),
                    ..node.clone()
                });
            }
            (Some(node), _) => nodes.push(node.clone()),
            (None, CertificateChange::Upsert { material, .. }) if changed => {
                nodes.push(tls_node(settings, hostname, &cert_ref.name, material));
            }
            (None, _) => {}
        }
    }

    debug!(
        "key: {}, msg: reconciled TLS certificates for secret {}, {} -> {} entries",
        intent.key(),
        change.secret(),
        current.len(),
        nodes.len()
    );
    *index = EncodedKeyIndex::from_nodes(&nodes);
    nodes
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use kube::core::ObjectMeta;

    use super::*;
    use crate::model::{CertificateRef, ListenerSpec, TlsSpec};
    use crate::store::MockSecretStore;

    fn settings() -> GraphSettings {
        GraphSettings {
            cluster_name: "c1".to_string(),
            tenant: "admin".to_string(),
            service_engine_group: "Default-Group".to_string(),
            vrf_context: "global".to_string(),
        }
    }

    fn listener(name: &str, hostname: &str, certs: &[&str]) -> ListenerSpec {
        ListenerSpec {
            name: name.to_string(),
            port: 443,
            protocol: "HTTPS".to_string(),
            hostname: Some(hostname.to_string()),
            tls: Some(TlsSpec {
                mode: Some("Terminate".to_string()),
                certificate_refs: certs
                    .iter()
                    .map(|c| CertificateRef {
                        namespace: "default".to_string(),
                        name: c.to_string(),
                        kind: None,
                        group: None,
                    })
                    .collect(),
            }),
        }
    }

    fn intent(listeners: Vec<ListenerSpec>) -> GatewayIntent {
        GatewayIntent {
            namespace: "default".to_string(),
            name: "gw".to_string(),
            gateway_class_name: "lb".to_string(),
            listeners,
            addresses: vec![],
            generation: Some(1),
        }
    }

    fn material(tag: &str) -> TlsMaterial {
        TlsMaterial {
            cert: format!("cert-{tag}").into_bytes(),
            key: format!("key-{tag}").into_bytes(),
        }
    }

    fn secret(name: &str) -> Secret {
        let mut data = BTreeMap::new();
        data.insert("tls.crt".to_string(), ByteString(format!("cert-{name}").into_bytes()));
        data.insert("tls.key".to_string(), ByteString(format!("key-{name}").into_bytes()));
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    fn names(nodes: &[TlsCertNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    fn full_build(intent: &GatewayIntent, available: &[&str]) -> (Vec<TlsCertNode>, EncodedKeyIndex) {
        let nodes: Vec<TlsCertNode> = intent
            .certificate_refs()
            .filter(|(_, r)| available.iter().any(|a| *a == r.name))
            .map(|(l, r)| tls_node(&settings(), l.hostname_or_default(), &r.name, &material(&r.name)))
            .collect();
        let index = EncodedKeyIndex::from_nodes(&nodes);
        (nodes, index)
    }

    #[tokio::test]
    async fn full_build_skips_missing_secrets() {
        let intent = intent(vec![
            listener("a", "a.example.com", &["cert-a", "missing"]),
            listener("b", "b.example.com", &["cert-b"]),
        ]);
        let mut secrets = MockSecretStore::new();
        secrets
            .expect_get_secret()
            .returning(|_, name| match name {
                "missing" => Ok(None),
                other => Ok(Some(secret(other))),
            });

        let (nodes, index) = build_tls_nodes(&intent, &secrets, &settings()).await;
        assert_eq!(
            names(&nodes),
            vec!["c1--a.example.com-cert-a", "c1--b.example.com-cert-b"]
        );
        assert_eq!(nodes[0].cert, b"cert-cert-a".to_vec());
        assert_eq!(index, EncodedKeyIndex::from_nodes(&nodes));
    }

    #[test]
    fn upsert_appends_new_reference_without_reordering() {
        let intent = intent(vec![
            listener("a", "a.example.com", &["cert-a", "late"]),
            listener("b", "b.example.com", &["cert-b"]),
        ]);
        let (current, mut index) = full_build(&intent, &["cert-a", "cert-b"]);
        let secret = NamespacedName::new("default", "late");

        let nodes = apply_certificate_upsert(
            &current,
            &intent,
            &secret,
            &material("late"),
            &mut index,
            &settings(),
        );
        assert_eq!(
            names(&nodes),
            vec![
                "c1--a.example.com-cert-a",
                "c1--a.example.com-late",
                "c1--b.example.com-cert-b"
            ]
        );
        assert_eq!(index, EncodedKeyIndex::from_nodes(&nodes));
    }

    #[test]
    fn upsert_refreshes_material_in_place() {
        let intent = intent(vec![listener("a", "a.example.com", &["cert-a", "cert-b"])]);
        let (current, mut index) = full_build(&intent, &["cert-a", "cert-b"]);
        let secret = NamespacedName::new("default", "cert-a");

        let nodes = apply_certificate_upsert(
            &current,
            &intent,
            &secret,
            &material("rotated"),
            &mut index,
            &settings(),
        );
        assert_eq!(names(&nodes), names(&current));
        assert_eq!(nodes[0].cert, b"cert-rotated".to_vec());
        assert_eq!(nodes[1], current[1]);
    }

    #[test]
    fn removal_drops_only_matching_entries() {
        let intent = intent(vec![
            listener("a", "a.example.com", &["cert-a", "gone"]),
            listener("b", "b.example.com", &["gone", "cert-b"]),
        ]);
        let (current, mut index) = full_build(&intent, &["cert-a", "gone", "cert-b"]);
        let secret = NamespacedName::new("default", "gone");

        let nodes = apply_certificate_removal(&current, &intent, &secret, &mut index, &settings());
        assert_eq!(
            names(&nodes),
            vec!["c1--a.example.com-cert-a", "c1--b.example.com-cert-b"]
        );
        assert!(!index.contains("c1--a.example.com-gone"));
        assert!(!index.contains("c1--b.example.com-gone"));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn duplicated_keys_consume_one_position_per_reference() {
        // Two listeners with the same hostname and certificate share an encoded key.
        let intent = intent(vec![
            listener("a", "shared.example.com", &["cert"]),
            listener("b", "other.example.com", &["cert-b"]),
            listener("c", "shared.example.com", &["cert"]),
        ]);
        let (current, mut index) = full_build(&intent, &["cert", "cert-b"]);
        assert_eq!(
            index.positions("c1--shared.example.com-cert").map(|p| p.len()),
            Some(2)
        );

        let unrelated = NamespacedName::new("default", "unrelated");
        let nodes = apply_certificate_removal(&current, &intent, &unrelated, &mut index, &settings());
        assert_eq!(nodes, current);
        assert_eq!(
            index.positions("c1--shared.example.com-cert").map(|p| p.len()),
            Some(2)
        );

        let cert = NamespacedName::new("default", "cert");
        let nodes = apply_certificate_removal(&nodes, &intent, &cert, &mut index, &settings());
        assert_eq!(names(&nodes), vec!["c1--other.example.com-cert-b"]);
        assert!(!index.contains("c1--shared.example.com-cert"));
        assert_eq!(index.positions("c1--other.example.com-cert-b").map(|p| p.len()), Some(1));
    }

    #[test]
    fn references_removed_from_the_gateway_are_dropped() {
        let before = intent(vec![
            listener("a", "a.example.com", &["cert-a"]),
            listener("b", "b.example.com", &["cert-b"]),
        ]);
        let (current, mut index) = full_build(&before, &["cert-a", "cert-b"]);
        let after = intent(vec![listener("b", "b.example.com", &["cert-b"])]);

        let secret = NamespacedName::new("default", "cert-c");
        let nodes = apply_certificate_upsert(
            &current,
            &after,
            &secret,
            &material("c"),
            &mut index,
            &settings(),
        );
        assert_eq!(names(&nodes), vec!["c1--b.example.com-cert-b"]);
        assert_eq!(index.len(), 1);
    }
}
