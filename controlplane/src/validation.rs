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

//! Admission checks on Gateway intent. Problems found here are reported as
//! status conditions, never as errors.

use std::sync::OnceLock;

use gateway_api::apis::standard::gatewayclasses::GatewayClass;
use regex::Regex;
use tracing::*;

use crate::consts::ADDRESS_TYPE_IP;
use crate::model::{CertificateRef, GatewayIntent, ListenerSpec, TlsMaterial};
use crate::store::SecretStore;

// RFC 1123 hostname with an optional leading wildcard label.
fn hostname_re() -> &'static Regex {
    static HOSTNAME_RE: OnceLock<Regex> = OnceLock::new();
    HOSTNAME_RE.get_or_init(|| {
        Regex::new(r"^(\*\.)?[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .expect("hostname pattern is valid")
    })
}

const SUPPORTED_PROTOCOLS: [&str; 2] = ["HTTP", "HTTPS"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayIssue {
    NoListeners,
    MultipleAddresses,
    UnsupportedAddress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerIssue {
    UnsupportedProtocol,
    InvalidHostname,
    InvalidTls,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Whether the Gateway's class is controlled by us.
    pub owned: bool,
    pub gateway: Option<GatewayIssue>,
    /// One entry per listener, in listener order.
    pub listeners: Vec<Option<ListenerIssue>>,
}

impl ValidationOutcome {
    pub fn invalid_listener_count(&self) -> usize {
        self.listeners.iter().filter(|l| l.is_some()).count()
    }

    pub fn valid_listener_mask(&self) -> Vec<bool> {
        self.listeners.iter().map(|l| l.is_none()).collect()
    }

    /// A virtual service is built when the Gateway is owned, structurally valid
    /// and has at least one valid listener.
    pub fn is_programmable(&self) -> bool {
        self.owned && self.gateway.is_none() && self.listeners.iter().any(|l| l.is_none())
    }
}

pub fn is_owned(gateway_class: Option<&GatewayClass>, controller_name: &str) -> bool {
    gateway_class.is_some_and(|gwc| gwc.spec.controller_name == controller_name)
}

pub fn is_valid_hostname(hostname: Option<&str>) -> bool {
    match hostname {
        Some(hostname) => hostname_re().is_match(hostname),
        None => false,
    }
}

pub fn validate_gateway(intent: &GatewayIntent) -> Option<GatewayIssue> {
    if intent.listeners.is_empty() {
        return Some(GatewayIssue::NoListeners);
    }
    if intent.addresses.len() > 1 {
        return Some(GatewayIssue::MultipleAddresses);
    }
    let unsupported = intent.addresses.iter().any(|addr| {
        addr.address_type
            .as_deref()
            .is_some_and(|t| t != ADDRESS_TYPE_IP)
    });
    if unsupported {
        return Some(GatewayIssue::UnsupportedAddress);
    }
    None
}

/// Checks a single listener. `resolved` reports whether a certificate
/// reference points at a usable TLS secret.
pub fn validate_listener(
    listener: &ListenerSpec,
    resolved: impl Fn(&CertificateRef) -> bool,
) -> Option<ListenerIssue> {
    if !SUPPORTED_PROTOCOLS.contains(&listener.protocol.as_str()) {
        return Some(ListenerIssue::UnsupportedProtocol);
    }
    if !is_valid_hostname(listener.hostname.as_deref()) {
        return Some(ListenerIssue::InvalidHostname);
    }

    match &listener.tls {
        None if listener.protocol == "HTTPS" => Some(ListenerIssue::InvalidTls),
        None => None,
        Some(tls) => {
            // An absent mode defaults to Terminate.
            let terminate = tls.mode.as_deref().map_or(true, |mode| mode == "Terminate");
            let refs_ok = !tls.certificate_refs.is_empty()
                && tls.certificate_refs.iter().all(|cert_ref| {
                    cert_ref.kind.as_deref().map_or(true, |k| k == "Secret")
                        && cert_ref.group.as_deref().map_or(true, str::is_empty)
                        && resolved(cert_ref)
                });
            if terminate && refs_ok {
                None
            } else {
                Some(ListenerIssue::InvalidTls)
            }
        }
    }
}

/// Validates a Gateway, looking up every referenced TLS secret.
pub async fn validate(
    intent: &GatewayIntent,
    owned: bool,
    secrets: &dyn SecretStore,
) -> ValidationOutcome {
    let mut resolved = vec![];
    for (_, cert_ref) in intent.certificate_refs() {
        let usable = match secrets.get_secret(&cert_ref.namespace, &cert_ref.name).await {
            Ok(Some(secret)) => TlsMaterial::from_secret(&secret).is_some(),
            Ok(None) => false,
            Err(err) => {
                warn!(
                    "key: {}, msg: failed to read secret {}/{}: {}",
                    intent.key(),
                    cert_ref.namespace,
                    cert_ref.name,
                    err
                );
                false
            }
        };
        if usable {
            resolved.push(cert_ref.clone());
        }
    }

    let listeners = intent
        .listeners
        .iter()
        .map(|listener| validate_listener(listener, |cert_ref| resolved.contains(cert_ref)))
        .collect();

    ValidationOutcome {
        owned,
        gateway: validate_gateway(intent),
        listeners,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StaticAddress, TlsSpec};

    fn listener(protocol: &str, hostname: Option<&str>) -> ListenerSpec {
        ListenerSpec {
            name: "l".to_string(),
            port: 80,
            protocol: protocol.to_string(),
            hostname: hostname.map(str::to_string),
            tls: None,
        }
    }

    fn with_tls(mut listener: ListenerSpec, mode: Option<&str>, certs: &[&str]) -> ListenerSpec {
        listener.tls = Some(TlsSpec {
            mode: mode.map(str::to_string),
            certificate_refs: certs
                .iter()
                .map(|c| CertificateRef {
                    namespace: "default".to_string(),
                    name: c.to_string(),
                    kind: Some("Secret".to_string()),
                    group: Some(String::new()),
                })
                .collect(),
        });
        listener
    }

    #[test]
    fn hostnames() {
        assert!(is_valid_hostname(Some("foo.example.com")));
        assert!(is_valid_hostname(Some("*.example.com")));
        assert!(!is_valid_hostname(Some("*")));
        assert!(!is_valid_hostname(Some("Foo.example.com")));
        assert!(!is_valid_hostname(Some("foo.*.com")));
        assert!(!is_valid_hostname(None));
    }

    #[test]
    fn listener_checks_run_in_order() {
        let all = |_: &CertificateRef| true;
        assert_eq!(
            validate_listener(&listener("UDP", Some("*")), all),
            Some(ListenerIssue::UnsupportedProtocol)
        );
        assert_eq!(
            validate_listener(&listener("HTTP", Some("*")), all),
            Some(ListenerIssue::InvalidHostname)
        );
        assert_eq!(validate_listener(&listener("HTTP", Some("*.example.com")), all), None);
        assert_eq!(
            validate_listener(&listener("HTTPS", Some("foo.example.com")), all),
            Some(ListenerIssue::InvalidTls)
        );
    }

    #[test]
    fn tls_mode_and_references() {
        let https = listener("HTTPS", Some("foo.example.com"));
        let all = |_: &CertificateRef| true;
        let none = |_: &CertificateRef| false;

        assert_eq!(validate_listener(&with_tls(https.clone(), None, &["c"]), all), None);
        assert_eq!(
            validate_listener(&with_tls(https.clone(), Some("Terminate"), &["c"]), all),
            None
        );
        assert_eq!(
            validate_listener(&with_tls(https.clone(), Some("Passthrough"), &["c"]), all),
            Some(ListenerIssue::InvalidTls)
        );
        assert_eq!(
            validate_listener(&with_tls(https.clone(), Some("Terminate"), &[]), all),
            Some(ListenerIssue::InvalidTls)
        );
        assert_eq!(
            validate_listener(&with_tls(https, Some("Terminate"), &["c"]), none),
            Some(ListenerIssue::InvalidTls)
        );
    }

    #[test]
    fn gateway_checks() {
        let mut intent = GatewayIntent {
            namespace: "default".to_string(),
            name: "gw".to_string(),
            gateway_class_name: "lb".to_string(),
            listeners: vec![],
            addresses: vec![],
            generation: Some(1),
        };
        assert_eq!(validate_gateway(&intent), Some(GatewayIssue::NoListeners));

        intent.listeners.push(listener("HTTP", Some("foo.example.com")));
        assert_eq!(validate_gateway(&intent), None);

        intent.addresses.push(StaticAddress {
            address_type: Some("Hostname".to_string()),
            value: "lb.example.com".to_string(),
        });
        assert_eq!(validate_gateway(&intent), Some(GatewayIssue::UnsupportedAddress));

        intent.addresses.push(StaticAddress {
            address_type: None,
            value: "10.0.0.2".to_string(),
        });
        assert_eq!(validate_gateway(&intent), Some(GatewayIssue::MultipleAddresses));
    }

    #[test]
    fn programmable_needs_one_valid_listener() {
        let outcome = ValidationOutcome {
            owned: true,
            gateway: None,
            listeners: vec![Some(ListenerIssue::InvalidHostname), None],
        };
        assert!(outcome.is_programmable());
        assert_eq!(outcome.invalid_listener_count(), 1);
        assert_eq!(outcome.valid_listener_mask(), vec![false, true]);

        let outcome = ValidationOutcome {
            listeners: vec![Some(ListenerIssue::InvalidHostname)],
            ..outcome
        };
        assert!(!outcome.is_programmable());
    }
}
