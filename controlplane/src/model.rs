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

//! Snapshots of Gateway intent and the virtual service graph derived from it.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use gateway_api::apis::standard::gateways::Gateway;
use k8s_openapi::api::core::v1::Secret;
use serde::Serialize;

use crate::consts::{TLS_SECRET_CERT_KEY, TLS_SECRET_KEY_KEY};
use crate::{Error, NamespacedName, Result};

/// Read-only snapshot of a Gateway taken when an event is processed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayIntent {
    pub namespace: String,
    pub name: String,
    pub gateway_class_name: String,
    pub listeners: Vec<ListenerSpec>,
    pub addresses: Vec<StaticAddress>,
    pub generation: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticAddress {
    pub address_type: Option<String>,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerSpec {
    pub name: String,
    pub port: i32,
    pub protocol: String,
    pub hostname: Option<String>,
    pub tls: Option<TlsSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsSpec {
    pub mode: Option<String>,
    pub certificate_refs: Vec<CertificateRef>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateRef {
    /// Already defaulted to the Gateway's namespace when the reference omits it.
    pub namespace: String,
    pub name: String,
    pub kind: Option<String>,
    pub group: Option<String>,
}

impl CertificateRef {
    pub fn refers_to(&self, secret: &NamespacedName) -> bool {
        self.namespace == secret.namespace && self.name == secret.name
    }
}

impl ListenerSpec {
    pub fn hostname_or_default(&self) -> &str {
        self.hostname.as_deref().unwrap_or_default()
    }

    /// A listener terminates TLS when it declares at least one certificate reference.
    pub fn terminates_tls(&self) -> bool {
        self.tls
            .as_ref()
            .is_some_and(|tls| !tls.certificate_refs.is_empty())
    }
}

impl GatewayIntent {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Every (listener, certificate reference) pair in declaration order.
    pub fn certificate_refs(&self) -> impl Iterator<Item = (&ListenerSpec, &CertificateRef)> {
        self.listeners.iter().flat_map(|listener| {
            listener
                .tls
                .iter()
                .flat_map(|tls| tls.certificate_refs.iter())
                .map(move |cert_ref| (listener, cert_ref))
        })
    }

    pub fn references_secret(&self, secret: &NamespacedName) -> bool {
        self.certificate_refs()
            .any(|(_, cert_ref)| cert_ref.refers_to(secret))
    }

    /// Returns a copy of this intent that keeps only the listeners at the given positions.
    pub fn retain_listeners(&self, keep: &[bool]) -> GatewayIntent {
        let listeners = self
            .listeners
            .iter()
            .zip(keep.iter().chain(std::iter::repeat(&false)))
            .filter(|(_, keep)| **keep)
            .map(|(listener, _)| listener.clone())
            .collect();
        GatewayIntent {
            listeners,
            ..self.clone()
        }
    }
}

impl TryFrom<&Gateway> for GatewayIntent {
    type Error = Error;

    fn try_from(gateway: &Gateway) -> Result<Self> {
        let name = gateway
            .metadata
            .name
            .clone()
            .ok_or(Error::InvalidConfigError("invalid name".to_string()))?;
        let namespace = gateway
            .metadata
            .namespace
            .clone()
            .ok_or(Error::InvalidConfigError("invalid namespace".to_string()))?;

        let mut listeners = vec![];
        for listener in &gateway.spec.listeners {
            let tls = match &listener.tls {
                Some(tls) => Some(TlsSpec {
                    mode: tls.mode.as_ref().and_then(enum_str),
                    certificate_refs: tls
                        .certificate_refs
                        .iter()
                        .flatten()
                        .map(|cert_ref| CertificateRef {
                            namespace: cert_ref
                                .namespace
                                .clone()
                                .filter(|ns| !ns.is_empty())
                                .unwrap_or_else(|| namespace.clone()),
                            name: cert_ref.name.clone(),
                            kind: cert_ref.kind.clone(),
                            group: cert_ref.group.clone(),
                        })
                        .collect(),
                }),
                None => None,
            };
            listeners.push(ListenerSpec {
                name: listener.name.clone(),
                port: listener.port,
                protocol: listener.protocol.clone(),
                hostname: listener.hostname.clone(),
                tls,
            });
        }

        let addresses = gateway
            .spec
            .addresses
            .iter()
            .flatten()
            .map(|addr| StaticAddress {
                address_type: addr.r#type.clone(),
                value: addr.value.clone(),
            })
            .collect();

        Ok(GatewayIntent {
            namespace,
            name,
            gateway_class_name: gateway.spec.gateway_class_name.clone(),
            listeners,
            addresses,
            generation: gateway.metadata.generation,
        })
    }
}

// Generated Gateway API enums serialize to their wire names.
fn enum_str<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Some(s),
        _ => None,
    }
}

/// Certificate and key bytes copied out of a TLS secret.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl TlsMaterial {
    /// Returns `None` unless the secret carries both `tls.crt` and `tls.key`.
    pub fn from_secret(secret: &Secret) -> Option<TlsMaterial> {
        let data = secret.data.as_ref()?;
        let cert = data.get(TLS_SECRET_CERT_KEY)?;
        let key = data.get(TLS_SECRET_KEY_KEY)?;
        Some(TlsMaterial {
            cert: cert.0.clone(),
            key: key.0.clone(),
        })
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert_len", &self.cert.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortProtocol {
    pub port: i32,
    pub protocol: String,
    pub enable_ssl: bool,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TlsCertNode {
    pub name: String,
    pub tenant: String,
    pub cert_type: String,
    pub key: Vec<u8>,
    pub cert: Vec<u8>,
}

impl fmt::Debug for TlsCertNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCertNode")
            .field("name", &self.name)
            .field("tenant", &self.tenant)
            .field("cert_type", &self.cert_type)
            .field("key", &"<redacted>")
            .field("cert_len", &self.cert.len())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VipNode {
    pub name: String,
    pub tenant: String,
    pub vrf_context: String,
    pub vip_networks: Vec<String>,
    pub ip_address: Option<String>,
}

/// The single load balancer virtual service derived from a Gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VirtualServiceNode {
    pub name: String,
    pub tenant: String,
    pub service_engine_group: String,
    pub application_profile: String,
    pub network_profile: String,
    pub vrf_context: String,
    pub evh_parent: bool,
    /// `namespace/name` of the owning Gateway.
    pub gateway: String,
    pub port_protocols: Vec<PortProtocol>,
    pub tls_cert_refs: Vec<TlsCertNode>,
    pub vsvip: VipNode,
    pub checksum: u64,
}

impl VirtualServiceNode {
    /// Hash of every field except the checksum itself. List order is significant.
    pub fn compute_checksum(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.name.hash(&mut hasher);
        self.tenant.hash(&mut hasher);
        self.service_engine_group.hash(&mut hasher);
        self.application_profile.hash(&mut hasher);
        self.network_profile.hash(&mut hasher);
        self.vrf_context.hash(&mut hasher);
        self.evh_parent.hash(&mut hasher);
        self.gateway.hash(&mut hasher);
        self.port_protocols.hash(&mut hasher);
        self.tls_cert_refs.hash(&mut hasher);
        self.vsvip.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(yaml: &str) -> Gateway {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn converts_gateway_with_defaulted_cert_namespace() {
        let gw = gateway(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: gw
  namespace: apps
  generation: 3
spec:
  gatewayClassName: lb
  addresses:
  - type: IPAddress
    value: 10.0.0.1
  listeners:
  - name: https
    port: 443
    protocol: HTTPS
    hostname: foo.example.com
    tls:
      mode: Terminate
      certificateRefs:
      - name: foo-cert
      - name: shared-cert
        namespace: certs
"#,
        );
        let intent = GatewayIntent::try_from(&gw).unwrap();
        assert_eq!(intent.key(), "apps/gw");
        assert_eq!(intent.generation, Some(3));
        assert_eq!(intent.addresses.len(), 1);

        let tls = intent.listeners[0].tls.as_ref().unwrap();
        assert_eq!(tls.mode.as_deref(), Some("Terminate"));
        assert_eq!(tls.certificate_refs[0].namespace, "apps");
        assert_eq!(tls.certificate_refs[1].namespace, "certs");
        assert!(intent.references_secret(&NamespacedName::new("certs", "shared-cert")));
        assert!(!intent.references_secret(&NamespacedName::new("apps", "shared-cert")));
    }

    #[test]
    fn retain_listeners_keeps_order() {
        let gw = gateway(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: gw
  namespace: apps
spec:
  gatewayClassName: lb
  listeners:
  - {name: a, port: 80, protocol: HTTP}
  - {name: b, port: 81, protocol: UDP}
  - {name: c, port: 82, protocol: HTTP}
"#,
        );
        let intent = GatewayIntent::try_from(&gw).unwrap();
        let kept = intent.retain_listeners(&[true, false, true]);
        let names: Vec<_> = kept.listeners.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn tls_node_debug_hides_key() {
        let node = TlsCertNode {
            name: "n".to_string(),
            tenant: "admin".to_string(),
            cert_type: "t".to_string(),
            key: b"super-secret".to_vec(),
            cert: b"cert".to_vec(),
        };
        assert!(!format!("{node:?}").contains("super-secret"));
    }
}
