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

//! Writes Gateway status back to the API server.
//!
//! Every write is a merge patch carrying the resource version it was computed
//! against. A conflict or any other failure re-reads the Gateway and retries,
//! up to [`MAX_STATUS_PATCH_ATTEMPTS`] attempts in total. A failed re-read uses
//! up an attempt without writing.

use std::collections::HashSet;
use std::sync::Arc;

use gateway_api::apis::standard::gateways::{Gateway, GatewayStatus};
use serde_json::{json, Value};
use tracing::*;

use crate::consts::MAX_STATUS_PATCH_ATTEMPTS;
use crate::status::{deleted_status, programmed_status};
use crate::store::GatewayStore;
use crate::{Error, Result};

/// Compares two statuses, ignoring condition transition times. A missing list
/// and an empty one are treated alike.
pub fn is_status_equal(stored: Option<&GatewayStatus>, desired: &GatewayStatus) -> Result<bool> {
    let stored = match stored {
        Some(status) => serde_json::to_value(status)?,
        None => Value::Null,
    };
    let desired = serde_json::to_value(desired)?;
    Ok(normalize(stored) == normalize(desired))
}

fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, value)| key != "lastTransitionTime" && !is_empty(value))
                .map(|(key, value)| (key, normalize(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn status_patch(gateway: &Gateway, desired: &GatewayStatus) -> Value {
    let status = json!({
        "conditions": desired.conditions.clone().unwrap_or_default(),
        "listeners": desired.listeners.clone().unwrap_or_default(),
        "addresses": desired.addresses.clone().unwrap_or_default(),
    });
    match &gateway.metadata.resource_version {
        Some(resource_version) => json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        }),
        None => json!({ "status": status }),
    }
}

pub struct StatusPatcher {
    gateways: Arc<dyn GatewayStore>,
    controller_name: String,
}

impl StatusPatcher {
    pub fn new(gateways: Arc<dyn GatewayStore>, controller_name: String) -> Self {
        Self {
            gateways,
            controller_name,
        }
    }

    /// Writes `desired` onto the Gateway unless it already carries an equal
    /// status. Returns whether a write happened.
    ///
    /// A Gateway that disappears between attempts is skipped without error.
    pub async fn reconcile(
        &self,
        key: &str,
        stored: &Gateway,
        desired: &GatewayStatus,
    ) -> Result<bool> {
        let namespace = stored.metadata.namespace.clone().unwrap_or_default();
        let name = stored.metadata.name.clone().unwrap_or_default();

        // `None` means the last write failed and the Gateway must be re-read
        // before the next one.
        let mut current = Some(stored.clone());
        for attempt in 1..=MAX_STATUS_PATCH_ATTEMPTS {
            let gateway = match current.take() {
                Some(gateway) => gateway,
                None => match self.gateways.get_gateway(&namespace, &name).await {
                    Ok(Some(fresh)) => fresh,
                    Ok(None) => {
                        warn!("key: {}, msg: gateway not found, skipping status update", key);
                        return Ok(false);
                    }
                    Err(err) => {
                        warn!(
                            "key: {}, msg: failed to re-read gateway, attempt {}: {}",
                            key, attempt, err
                        );
                        continue;
                    }
                },
            };

            if is_status_equal(gateway.status.as_ref(), desired)? {
                debug!("key: {}, msg: gateway status unchanged, skipping update", key);
                return Ok(false);
            }

            let patch = status_patch(&gateway, desired);
            match self
                .gateways
                .patch_gateway_status(&namespace, &name, &patch)
                .await
            {
                Ok(()) => {
                    info!("key: {}, msg: updated gateway status", key);
                    return Ok(true);
                }
                Err(err) => warn!(
                    "key: {}, msg: there was an error in updating the gateway status, attempt {}: {}",
                    key, attempt, err
                ),
            }
        }

        error!(
            "key: {}, msg: gateway status update abandoned after {} attempts",
            key, MAX_STATUS_PATCH_ATTEMPTS
        );
        Err(Error::PatchRetriesExhausted {
            key: key.to_string(),
            attempts: MAX_STATUS_PATCH_ATTEMPTS,
        })
    }

    /// Clears the address of a Gateway whose virtual service was deleted and
    /// marks it as pending again. Gateways that never got an address are left
    /// untouched.
    pub async fn reset_on_delete(&self, key: &str, gateway: &Gateway) -> Result<bool> {
        match deleted_status(gateway.status.as_ref(), gateway.metadata.generation) {
            Some(desired) => self.reconcile(key, gateway, &desired).await,
            None => {
                debug!("key: {}, msg: gateway has no address, nothing to reset", key);
                Ok(false)
            }
        }
    }

    /// Reports realized addresses for every Gateway of a class this controller
    /// owns. `realized` pairs a `namespace/name` Gateway key with its VIP.
    /// Failures on one Gateway are logged and do not stop the others. Returns
    /// the number of Gateways written.
    pub async fn bulk_update(&self, key: &str, realized: &[(String, String)]) -> Result<usize> {
        let owned_classes: HashSet<String> = self
            .gateways
            .list_gateway_classes()
            .await?
            .into_iter()
            .filter(|gwc| gwc.spec.controller_name == self.controller_name)
            .filter_map(|gwc| gwc.metadata.name)
            .collect();

        let mut written = 0;
        for gateway in self.gateways.list_gateways().await? {
            if !owned_classes.contains(&gateway.spec.gateway_class_name) {
                continue;
            }
            let gateway_key = format!(
                "{}/{}",
                gateway.metadata.namespace.as_deref().unwrap_or_default(),
                gateway.metadata.name.as_deref().unwrap_or_default()
            );
            let Some((_, address)) = realized.iter().find(|(k, _)| *k == gateway_key) else {
                continue;
            };

            let desired = programmed_status(
                gateway.status.as_ref(),
                address,
                gateway.metadata.generation,
            );
            match self.reconcile(&gateway_key, &gateway, &desired).await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(err) => warn!(
                    "key: {}, msg: bulk status update failed for {}: {}",
                    key, gateway_key, err
                ),
            }
        }
        Ok(written)
    }
}
