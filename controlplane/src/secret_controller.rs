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

//! Watches TLS secrets and folds their changes into the virtual service graphs
//! of the Gateways that reference them.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::{consts::TLS_SECRET_FIELD_SELECTOR, *};
use model::{GatewayIntent, TlsMaterial};
use status::Realization;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, ListParams},
    runtime::watcher::{self, watcher, Event},
    ResourceExt,
};
use tracing::*;

pub async fn controller(ctx: Context) -> Result<()> {
    let secrets = Api::<Secret>::all(ctx.client.clone());
    secrets
        .list(&ListParams::default().fields(TLS_SECRET_FIELD_SELECTOR).limit(1))
        .await
        .map_err(Error::KubeError)?;

    let mut events = watcher(
        secrets,
        watcher::Config::default().fields(TLS_SECRET_FIELD_SELECTOR),
    )
    .boxed();
    info!("watching TLS secrets");

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => handle_event(&ctx.state, event).await,
            Err(err) => {
                warn!("secret watch failed, will retry: {}", err);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
    Ok(())
}

async fn handle_event(state: &State, event: Event<Secret>) {
    match event {
        Event::Applied(secret) => on_secret_change(state, &secret, false, true).await,
        Event::Deleted(secret) => on_secret_change(state, &secret, true, true).await,
        // A relist replays every secret. Only graphs whose content actually
        // changed get their status refreshed.
        Event::Restarted(secrets) => {
            debug!("secret watch (re)started with {} secrets", secrets.len());
            for secret in &secrets {
                on_secret_change(state, secret, false, false).await;
            }
        }
    }
}

async fn on_secret_change(state: &State, secret: &Secret, deleted: bool, refresh_all: bool) {
    let Some(namespace) = secret.namespace() else {
        return;
    };
    let key = NamespacedName::new(namespace, secret.name_any());

    let material = if deleted {
        None
    } else {
        TlsMaterial::from_secret(secret)
    };
    let updated = match &material {
        Some(material) => {
            state
                .graphs
                .apply_certificate_upsert(&key, material, &state.settings)
                .await
        }
        None => {
            state
                .graphs
                .apply_certificate_removal(&key, &state.settings)
                .await
        }
    };
    let published: HashMap<String, Realization> = updated
        .into_iter()
        .filter_map(|outcome| Some((outcome.node.gateway, outcome.published?)))
        .collect();

    let result = if refresh_all {
        refresh_referencing_gateways(state, &key, published).await
    } else {
        refresh_gateways(state, published).await
    };
    if let Err(err) = result {
        warn!("secret {}: failed to refresh gateway status: {}", key, err);
    }
}

/// Re-validates every owned Gateway referencing the secret. A secret showing
/// up or going away can flip listener validity, not only certificate content.
async fn refresh_referencing_gateways(
    state: &State,
    secret: &NamespacedName,
    mut published: HashMap<String, Realization>,
) -> Result<()> {
    let owned_classes: HashSet<String> = state
        .gateways
        .list_gateway_classes()
        .await?
        .into_iter()
        .filter(|gwc| gwc.spec.controller_name == state.controller_name)
        .filter_map(|gwc| gwc.metadata.name)
        .collect();
    if owned_classes.is_empty() {
        return Ok(());
    }

    for gateway in state.gateways.list_gateways().await? {
        if !owned_classes.contains(&gateway.spec.gateway_class_name)
            || gateway.metadata.deletion_timestamp.is_some()
        {
            continue;
        }
        let Ok(intent) = GatewayIntent::try_from(&gateway) else {
            continue;
        };
        if !intent.references_secret(secret) {
            continue;
        }
        let realization = published.remove(&intent.key());
        if let Err(err) = gateway_controller::sync_gateway(&gateway, state, realization).await {
            warn!("key: {}, msg: failed to sync gateway: {}", intent.key(), err);
        }
    }
    Ok(())
}

async fn refresh_gateways(state: &State, published: HashMap<String, Realization>) -> Result<()> {
    for (key, realization) in published {
        let Some((namespace, name)) = key.split_once('/') else {
            continue;
        };
        let Some(gateway) = state.gateways.get_gateway(namespace, name).await? else {
            continue;
        };
        if let Err(err) = gateway_controller::sync_gateway(&gateway, state, Some(realization)).await
        {
            warn!("key: {}, msg: failed to sync gateway: {}", key, err);
        }
    }
    Ok(())
}
