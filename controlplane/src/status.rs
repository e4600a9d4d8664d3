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

#![allow(clippy::field_reassign_with_default)]

//! Computes the status a Gateway should report from its validation outcome and
//! the realization state of its virtual service.

use chrono::Utc;
use gateway_api::apis::standard::{
    constants::{
        GatewayConditionReason, GatewayConditionType, ListenerConditionReason,
        ListenerConditionType,
    },
    gateways::{
        GatewayStatus, GatewayStatusAddresses, GatewayStatusListeners,
        GatewayStatusListenersSupportedKinds,
    },
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

use crate::consts::{ADDRESS_TYPE_IP, GATEWAY_API_GROUP};
use crate::model::GatewayIntent;
use crate::utils::{find_condition, set_condition};
use crate::validation::{GatewayIssue, ListenerIssue, ValidationOutcome};

pub const MSG_NO_LISTENERS: &str = "No listeners found";
pub const MSG_MULTIPLE_ADDRESSES: &str = "More than one address is not supported";
pub const MSG_UNSUPPORTED_ADDRESS: &str = "Only addresses of type IPAddress are supported";
pub const MSG_GATEWAY_VALID: &str = "Gateway configuration is valid";
pub const MSG_VS_PROGRAMMED: &str = "Virtual service configured/updated";
pub const MSG_VS_PENDING: &str = "Waiting for virtual service to be programmed";
pub const MSG_VS_DELETED: &str = "Virtual service has been deleted";
pub const MSG_LISTENER_VALID: &str = "Listener is valid";
pub const MSG_INVALID_HOSTNAME: &str = "Hostname not found or Hostname has invalid configuration";
pub const MSG_UNSUPPORTED_PROTOCOL: &str = "Unsupported protocol";
pub const MSG_INVALID_TLS: &str = "TLS mode or reference not valid";
pub const MSG_REFS_RESOLVED: &str = "All references resolved";

const STATUS_TRUE: &str = "True";
const STATUS_FALSE: &str = "False";
const STATUS_UNKNOWN: &str = "Unknown";

/// Where the virtual service for a Gateway stands in the external load balancer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Realization {
    Pending,
    Programmed { address: Option<String> },
    Failed(String),
    Deleted,
}

/// Conditions, listener statuses and addresses to report for one Gateway.
#[derive(Clone, Debug)]
pub struct ConditionSet {
    pub conditions: Vec<metav1::Condition>,
    pub listeners: Vec<GatewayStatusListeners>,
    pub addresses: Vec<GatewayStatusAddresses>,
}

impl ConditionSet {
    pub fn into_gateway_status(self) -> GatewayStatus {
        let mut status = GatewayStatus::default();
        status.conditions = Some(self.conditions);
        status.listeners = Some(self.listeners);
        status.addresses = Some(self.addresses);
        status
    }
}

fn condition(
    type_: String,
    status: &str,
    reason: String,
    message: &str,
    generation: Option<i64>,
) -> metav1::Condition {
    metav1::Condition {
        type_,
        status: status.to_string(),
        reason,
        observed_generation: generation,
        last_transition_time: metav1::Time(Utc::now()),
        message: message.to_string(),
    }
}

fn gateway_message(issue: GatewayIssue) -> &'static str {
    match issue {
        GatewayIssue::NoListeners => MSG_NO_LISTENERS,
        GatewayIssue::MultipleAddresses => MSG_MULTIPLE_ADDRESSES,
        GatewayIssue::UnsupportedAddress => MSG_UNSUPPORTED_ADDRESS,
    }
}

fn listener_rejection(issue: ListenerIssue) -> (String, &'static str) {
    match issue {
        ListenerIssue::UnsupportedProtocol => (
            ListenerConditionReason::UnsupportedProtocol.to_string(),
            MSG_UNSUPPORTED_PROTOCOL,
        ),
        ListenerIssue::InvalidHostname => (
            GatewayConditionReason::ListenersNotValid.to_string(),
            MSG_INVALID_HOSTNAME,
        ),
        ListenerIssue::InvalidTls => (
            ListenerConditionReason::InvalidCertificateRef.to_string(),
            MSG_INVALID_TLS,
        ),
    }
}

fn gateway_accepted(outcome: &ValidationOutcome, generation: Option<i64>) -> metav1::Condition {
    let type_ = GatewayConditionType::Accepted.to_string();
    if let Some(issue) = outcome.gateway {
        let reason = match issue {
            GatewayIssue::UnsupportedAddress => GatewayConditionReason::UnsupportedAddress,
            _ => GatewayConditionReason::Invalid,
        };
        return condition(
            type_,
            STATUS_FALSE,
            reason.to_string(),
            gateway_message(issue),
            generation,
        );
    }

    let invalid = outcome.invalid_listener_count();
    if invalid > 0 {
        return condition(
            type_,
            STATUS_FALSE,
            GatewayConditionReason::ListenersNotValid.to_string(),
            &format!("Gateway contains {} invalid listener(s)", invalid),
            generation,
        );
    }

    condition(
        type_,
        STATUS_TRUE,
        GatewayConditionReason::Accepted.to_string(),
        MSG_GATEWAY_VALID,
        generation,
    )
}

fn gateway_programmed(
    outcome: &ValidationOutcome,
    realization: &Realization,
    generation: Option<i64>,
) -> metav1::Condition {
    let type_ = GatewayConditionType::Programmed.to_string();
    if let Some(issue) = outcome.gateway {
        return condition(
            type_,
            STATUS_FALSE,
            GatewayConditionReason::Invalid.to_string(),
            gateway_message(issue),
            generation,
        );
    }
    if !outcome.is_programmable() {
        return condition(
            type_,
            STATUS_FALSE,
            GatewayConditionReason::Invalid.to_string(),
            &format!(
                "Gateway contains {} invalid listener(s)",
                outcome.invalid_listener_count()
            ),
            generation,
        );
    }

    match realization {
        Realization::Programmed { .. } => condition(
            type_,
            STATUS_TRUE,
            GatewayConditionReason::Programmed.to_string(),
            MSG_VS_PROGRAMMED,
            generation,
        ),
        Realization::Pending => condition(
            type_,
            STATUS_UNKNOWN,
            GatewayConditionReason::Pending.to_string(),
            MSG_VS_PENDING,
            generation,
        ),
        Realization::Deleted => condition(
            type_,
            STATUS_UNKNOWN,
            GatewayConditionReason::Pending.to_string(),
            MSG_VS_DELETED,
            generation,
        ),
        Realization::Failed(message) => condition(
            type_,
            STATUS_FALSE,
            GatewayConditionReason::AddressNotAssigned.to_string(),
            message,
            generation,
        ),
    }
}

fn listener_conditions(
    issue: Option<ListenerIssue>,
    gateway_issue: Option<GatewayIssue>,
    realization: &Realization,
    generation: Option<i64>,
) -> Vec<metav1::Condition> {
    let accepted_type = ListenerConditionType::Accepted.to_string();
    let resolved_type = ListenerConditionType::ResolvedRefs.to_string();
    let programmed_type = ListenerConditionType::Programmed.to_string();

    let resolved = if issue == Some(ListenerIssue::InvalidTls) {
        condition(
            resolved_type,
            STATUS_FALSE,
            ListenerConditionReason::InvalidCertificateRef.to_string(),
            MSG_INVALID_TLS,
            generation,
        )
    } else {
        condition(
            resolved_type,
            STATUS_TRUE,
            ListenerConditionReason::ResolvedRefs.to_string(),
            MSG_REFS_RESOLVED,
            generation,
        )
    };

    if let Some(issue) = issue {
        let (reason, message) = listener_rejection(issue);
        return vec![
            condition(accepted_type, STATUS_FALSE, reason, message, generation),
            resolved,
            condition(
                programmed_type,
                STATUS_FALSE,
                ListenerConditionReason::Invalid.to_string(),
                message,
                generation,
            ),
        ];
    }

    let accepted = condition(
        accepted_type,
        STATUS_TRUE,
        ListenerConditionReason::Accepted.to_string(),
        MSG_LISTENER_VALID,
        generation,
    );

    let programmed = match (gateway_issue, realization) {
        (Some(gateway_issue), _) => condition(
            programmed_type,
            STATUS_FALSE,
            ListenerConditionReason::Invalid.to_string(),
            gateway_message(gateway_issue),
            generation,
        ),
        (None, Realization::Programmed { .. }) => condition(
            programmed_type,
            STATUS_TRUE,
            ListenerConditionReason::Programmed.to_string(),
            MSG_VS_PROGRAMMED,
            generation,
        ),
        (None, Realization::Pending) => condition(
            programmed_type,
            STATUS_UNKNOWN,
            ListenerConditionReason::Pending.to_string(),
            MSG_VS_PENDING,
            generation,
        ),
        (None, Realization::Deleted) => condition(
            programmed_type,
            STATUS_UNKNOWN,
            ListenerConditionReason::Pending.to_string(),
            MSG_VS_DELETED,
            generation,
        ),
        (None, Realization::Failed(message)) => condition(
            programmed_type,
            STATUS_FALSE,
            ListenerConditionReason::Invalid.to_string(),
            message,
            generation,
        ),
    };

    vec![accepted, resolved, programmed]
}

fn supported_kinds() -> Vec<GatewayStatusListenersSupportedKinds> {
    vec![GatewayStatusListenersSupportedKinds {
        group: Some(GATEWAY_API_GROUP.to_string()),
        kind: "HTTPRoute".to_string(),
    }]
}

/// Computes the status a Gateway should carry. Returns `None` when the Gateway
/// is not ours to report on.
///
/// Conditions whose status did not change keep the transition time found in
/// `previous`. Listener entries follow listener order and carry over attached
/// route counts by name.
pub fn compute_status(
    intent: &GatewayIntent,
    outcome: &ValidationOutcome,
    realization: &Realization,
    previous: Option<&GatewayStatus>,
) -> Option<ConditionSet> {
    if !outcome.owned {
        return None;
    }
    let generation = intent.generation;

    let mut gateway_status = previous.cloned().unwrap_or_default();
    set_condition(&mut gateway_status, gateway_accepted(outcome, generation));
    set_condition(
        &mut gateway_status,
        gateway_programmed(outcome, realization, generation),
    );

    let previous_listeners = previous
        .and_then(|status| status.listeners.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut listeners = vec![];
    for (listener, issue) in intent.listeners.iter().zip(outcome.listeners.iter()) {
        let mut listener_status = previous_listeners
            .iter()
            .find(|l| l.name == listener.name)
            .cloned()
            .unwrap_or_else(|| GatewayStatusListeners {
                name: listener.name.clone(),
                attached_routes: 0,
                supported_kinds: vec![],
                conditions: vec![],
            });
        listener_status.supported_kinds = supported_kinds();
        for cond in listener_conditions(*issue, outcome.gateway, realization, generation) {
            set_condition(&mut listener_status, cond);
        }
        listeners.push(listener_status);
    }

    let previous_addresses = gateway_status.addresses.clone().unwrap_or_default();
    let addresses = match realization {
        Realization::Programmed {
            address: Some(address),
        } if outcome.is_programmable() => vec![GatewayStatusAddresses {
            r#type: Some(ADDRESS_TYPE_IP.to_string()),
            value: address.clone(),
        }],
        Realization::Deleted => vec![],
        _ if !outcome.is_programmable() => vec![],
        _ => previous_addresses,
    };

    Some(ConditionSet {
        conditions: gateway_status.conditions.unwrap_or_default(),
        listeners,
        addresses,
    })
}

/// Reads back the realization a previously written status reports. Used when
/// the virtual service did not change and nothing new was published.
pub fn realization_from_status(previous: Option<&GatewayStatus>) -> Realization {
    let Some(status) = previous else {
        return Realization::Pending;
    };
    let programmed = status
        .conditions
        .as_deref()
        .and_then(|conditions| {
            find_condition(conditions, &GatewayConditionType::Programmed.to_string())
        })
        .is_some_and(|c| c.status == STATUS_TRUE);
    let address = status
        .addresses
        .as_ref()
        .and_then(|addrs| addrs.first())
        .map(|addr| addr.value.clone())
        .filter(|value| !value.is_empty());
    if programmed {
        Realization::Programmed { address }
    } else {
        Realization::Pending
    }
}

/// Status to report once the virtual service has been realized with `address`.
/// Programmed becomes True on the Gateway and on every listener already
/// reported as accepted.
pub fn programmed_status(
    stored: Option<&GatewayStatus>,
    address: &str,
    generation: Option<i64>,
) -> GatewayStatus {
    let mut status = stored.cloned().unwrap_or_default();
    status.addresses = Some(vec![GatewayStatusAddresses {
        r#type: Some(ADDRESS_TYPE_IP.to_string()),
        value: address.to_string(),
    }]);
    set_condition(
        &mut status,
        condition(
            GatewayConditionType::Programmed.to_string(),
            STATUS_TRUE,
            GatewayConditionReason::Programmed.to_string(),
            MSG_VS_PROGRAMMED,
            generation,
        ),
    );
    for listener in status.listeners.iter_mut().flatten() {
        let accepted = listener.conditions.iter().any(|c| {
            c.type_ == ListenerConditionType::Accepted.to_string() && c.status == STATUS_TRUE
        });
        if accepted {
            set_condition(
                listener,
                condition(
                    ListenerConditionType::Programmed.to_string(),
                    STATUS_TRUE,
                    ListenerConditionReason::Programmed.to_string(),
                    MSG_VS_PROGRAMMED,
                    generation,
                ),
            );
        }
    }
    status
}

/// Status to report after the virtual service for a Gateway was deleted.
/// Returns `None` when no address was ever reported, leaving the status alone.
pub fn deleted_status(
    stored: Option<&GatewayStatus>,
    generation: Option<i64>,
) -> Option<GatewayStatus> {
    let stored = stored?;
    let has_address = stored
        .addresses
        .as_ref()
        .and_then(|addrs| addrs.first())
        .is_some_and(|addr| !addr.value.is_empty());
    if !has_address {
        return None;
    }

    let mut status = stored.clone();
    status.addresses = Some(vec![]);
    set_condition(
        &mut status,
        condition(
            GatewayConditionType::Programmed.to_string(),
            STATUS_UNKNOWN,
            GatewayConditionReason::Pending.to_string(),
            MSG_VS_DELETED,
            generation,
        ),
    );
    for listener in status.listeners.iter_mut().flatten() {
        set_condition(
            listener,
            condition(
                ListenerConditionType::Programmed.to_string(),
                STATUS_UNKNOWN,
                ListenerConditionReason::Pending.to_string(),
                MSG_VS_DELETED,
                generation,
            ),
        );
    }
    Some(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ListenerSpec;

    fn intent(listeners: &[&str]) -> GatewayIntent {
        GatewayIntent {
            namespace: "default".to_string(),
            name: "gw".to_string(),
            gateway_class_name: "lb".to_string(),
            listeners: listeners
                .iter()
                .map(|name| ListenerSpec {
                    name: name.to_string(),
                    port: 80,
                    protocol: "HTTP".to_string(),
                    hostname: Some("foo.example.com".to_string()),
                    tls: None,
                })
                .collect(),
            addresses: vec![],
            generation: Some(2),
        }
    }

    fn outcome(
        gateway: Option<GatewayIssue>,
        listeners: Vec<Option<ListenerIssue>>,
    ) -> ValidationOutcome {
        ValidationOutcome {
            owned: true,
            gateway,
            listeners,
        }
    }

    fn cond<'a>(conditions: &'a [metav1::Condition], type_: &str) -> &'a metav1::Condition {
        find_condition(conditions, type_).unwrap()
    }

    #[test]
    fn not_owned_yields_nothing() {
        let mut o = outcome(None, vec![None]);
        o.owned = false;
        assert!(compute_status(&intent(&["a"]), &o, &Realization::Pending, None).is_none());
    }

    #[test]
    fn no_listeners() {
        let set = compute_status(
            &intent(&[]),
            &outcome(Some(GatewayIssue::NoListeners), vec![]),
            &Realization::Pending,
            None,
        )
        .unwrap();
        let accepted = cond(&set.conditions, "Accepted");
        assert_eq!(accepted.status, "False");
        assert_eq!(accepted.reason, "Invalid");
        assert_eq!(accepted.message, "No listeners found");
        assert_eq!(accepted.observed_generation, Some(2));
        assert_eq!(cond(&set.conditions, "Programmed").status, "False");
        assert!(set.listeners.is_empty());
    }

    #[test]
    fn multiple_addresses() {
        let set = compute_status(
            &intent(&["a"]),
            &outcome(Some(GatewayIssue::MultipleAddresses), vec![None]),
            &Realization::Pending,
            None,
        )
        .unwrap();
        let accepted = cond(&set.conditions, "Accepted");
        assert_eq!(accepted.status, "False");
        assert_eq!(accepted.message, "More than one address is not supported");
        let programmed = cond(&set.listeners[0].conditions, "Programmed");
        assert_eq!(programmed.status, "False");
    }

    #[test]
    fn one_invalid_hostname_of_two() {
        let set = compute_status(
            &intent(&["a", "b"]),
            &outcome(None, vec![Some(ListenerIssue::InvalidHostname), None]),
            &Realization::Pending,
            None,
        )
        .unwrap();

        let accepted = cond(&set.conditions, "Accepted");
        assert_eq!(accepted.status, "False");
        assert_eq!(accepted.reason, "ListenersNotValid");
        assert_eq!(accepted.message, "Gateway contains 1 invalid listener(s)");

        assert_eq!(set.listeners.len(), 2);
        assert_eq!(set.listeners[0].name, "a");
        let bad = cond(&set.listeners[0].conditions, "Accepted");
        assert_eq!(bad.status, "False");
        assert_eq!(bad.reason, "ListenersNotValid");
        assert_eq!(
            bad.message,
            "Hostname not found or Hostname has invalid configuration"
        );
        let good = cond(&set.listeners[1].conditions, "Accepted");
        assert_eq!(good.status, "True");
        assert_eq!(good.message, "Listener is valid");
        assert_eq!(set.listeners[1].supported_kinds[0].kind, "HTTPRoute");
    }

    #[test]
    fn unsupported_protocol_and_bad_tls() {
        let set = compute_status(
            &intent(&["udp", "tls"]),
            &outcome(
                None,
                vec![
                    Some(ListenerIssue::UnsupportedProtocol),
                    Some(ListenerIssue::InvalidTls),
                ],
            ),
            &Realization::Pending,
            None,
        )
        .unwrap();
        let udp = cond(&set.listeners[0].conditions, "Accepted");
        assert_eq!(udp.reason, "UnsupportedProtocol");
        assert_eq!(udp.message, "Unsupported protocol");

        let tls = cond(&set.listeners[1].conditions, "Accepted");
        assert_eq!(tls.reason, "InvalidCertificateRef");
        assert_eq!(tls.message, "TLS mode or reference not valid");
        assert_eq!(cond(&set.listeners[1].conditions, "ResolvedRefs").status, "False");

        assert_eq!(
            cond(&set.conditions, "Accepted").message,
            "Gateway contains 2 invalid listener(s)"
        );
        assert_eq!(cond(&set.conditions, "Programmed").status, "False");
    }

    #[test]
    fn valid_gateway_follows_realization() {
        let i = intent(&["a"]);
        let o = outcome(None, vec![None]);

        let pending = compute_status(&i, &o, &Realization::Pending, None).unwrap();
        let accepted = cond(&pending.conditions, "Accepted");
        assert_eq!(accepted.status, "True");
        assert_eq!(accepted.message, "Gateway configuration is valid");
        assert_eq!(cond(&pending.conditions, "Programmed").status, "Unknown");
        assert!(pending.addresses.is_empty());

        let programmed = compute_status(
            &i,
            &o,
            &Realization::Programmed {
                address: Some("10.0.0.9".to_string()),
            },
            None,
        )
        .unwrap();
        let cond_programmed = cond(&programmed.conditions, "Programmed");
        assert_eq!(cond_programmed.status, "True");
        assert_eq!(cond_programmed.message, "Virtual service configured/updated");
        assert_eq!(programmed.addresses[0].value, "10.0.0.9");
        assert_eq!(
            cond(&programmed.listeners[0].conditions, "Programmed").status,
            "True"
        );

        let failed =
            compute_status(&i, &o, &Realization::Failed("no IP".to_string()), None).unwrap();
        let cond_failed = cond(&failed.conditions, "Programmed");
        assert_eq!(cond_failed.status, "False");
        assert_eq!(cond_failed.reason, "AddressNotAssigned");
        assert_eq!(cond_failed.message, "no IP");
    }

    #[test]
    fn transition_time_kept_when_status_unchanged() {
        let i = intent(&["a"]);
        let o = outcome(None, vec![None]);
        let first = compute_status(&i, &o, &Realization::Pending, None)
            .unwrap()
            .into_gateway_status();
        let before = cond(first.conditions.as_ref().unwrap(), "Accepted")
            .last_transition_time
            .clone();

        let second = compute_status(&i, &o, &Realization::Pending, Some(&first)).unwrap();
        assert_eq!(cond(&second.conditions, "Accepted").last_transition_time, before);
    }

    #[test]
    fn programmed_then_deleted() {
        let i = intent(&["a"]);
        let o = outcome(None, vec![None]);
        let pending = compute_status(&i, &o, &Realization::Pending, None)
            .unwrap()
            .into_gateway_status();

        assert!(deleted_status(Some(&pending), Some(2)).is_none());

        let programmed = programmed_status(Some(&pending), "10.0.0.9", Some(2));
        assert_eq!(programmed.addresses.as_ref().unwrap()[0].value, "10.0.0.9");
        let listener = &programmed.listeners.as_ref().unwrap()[0];
        assert_eq!(cond(&listener.conditions, "Programmed").status, "True");

        let deleted = deleted_status(Some(&programmed), Some(2)).unwrap();
        assert!(deleted.addresses.as_ref().unwrap().is_empty());
        let gw_programmed = cond(deleted.conditions.as_ref().unwrap(), "Programmed");
        assert_eq!(gw_programmed.status, "Unknown");
        assert_eq!(gw_programmed.reason, "Pending");
        assert_eq!(gw_programmed.message, "Virtual service has been deleted");
        assert_eq!(
            realization_from_status(Some(&programmed)),
            Realization::Programmed {
                address: Some("10.0.0.9".to_string())
            }
        );
        assert_eq!(realization_from_status(Some(&deleted)), Realization::Pending);
        // Accepted is left as it was.
        assert_eq!(cond(deleted.conditions.as_ref().unwrap(), "Accepted").status, "True");
    }
}
