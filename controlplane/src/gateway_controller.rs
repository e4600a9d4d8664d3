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

use std::{
    ops::Sub,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{consts::GATEWAY_FINALIZER, *};
use model::GatewayIntent;
use status::{compute_status, realization_from_status, Realization};

use futures::StreamExt;
use gateway_api::apis::standard::gateways::Gateway;
use kube::{
    api::{Api, ListParams},
    runtime::{
        controller::Action,
        finalizer::{finalizer, Event as Finalizer},
        watcher::Config,
        Controller,
    },
    ResourceExt,
};
use tracing::*;

pub async fn reconcile(gateway: Arc<Gateway>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();

    let name = gateway
        .metadata
        .name
        .clone()
        .ok_or(Error::InvalidConfigError("invalid name".to_string()))?;
    let ns = gateway
        .metadata
        .namespace
        .clone()
        .ok_or(Error::InvalidConfigError("invalid namespace".to_string()))?;

    let gateway_class = ctx
        .state
        .gateways
        .get_gateway_class(&gateway.spec.gateway_class_name)
        .await?;
    let owned = validation::is_owned(gateway_class.as_ref(), &ctx.state.controller_name);
    let has_finalizer = gateway.finalizers().iter().any(|f| f == GATEWAY_FINALIZER);

    // Gateways of other controllers are never touched. Ours keep the finalizer
    // until cleanup ran, even if their class changed hands since.
    if !owned && !has_finalizer {
        debug!("gateway {}/{} is not managed by this controller", ns, name);
        return Ok(Action::await_change());
    }

    if let Some(gwc) = gateway_class.as_ref().filter(|_| owned) {
        if gateway.metadata.deletion_timestamp.is_none() && !gatewayclass_utils::is_accepted(gwc) {
            debug!("GatewayClass {:?} not yet accepted", gwc.name_any());
            return Ok(Action::requeue(Duration::from_secs(5)));
        }
    }

    let gateway_api: Api<Gateway> = Api::namespaced(ctx.client.clone(), &ns);
    let event_ctx = ctx.clone();
    let action = finalizer(&gateway_api, GATEWAY_FINALIZER, gateway, |event| async move {
        match event {
            Finalizer::Apply(gw) => apply(gw, event_ctx, owned).await,
            Finalizer::Cleanup(gw) => cleanup(gw, event_ctx).await,
        }
    })
    .await
    .map_err(|err| Error::FinalizerError(Box::new(err)))?;

    let duration = Instant::now().sub(start);
    info!("finished reconciling in {:?} ms", duration.as_millis());
    Ok(action)
}

async fn apply(gateway: Arc<Gateway>, ctx: Arc<Context>, owned: bool) -> Result<Action> {
    if !owned {
        // The class moved to another controller: leave graph and status as they are.
        debug!(
            "gateway {} changed class, leaving it untouched",
            gateway.name_any()
        );
        return Ok(Action::await_change());
    }
    sync_gateway(&gateway, &ctx.state, None).await?;
    Ok(Action::requeue(Duration::from_secs(60)))
}

async fn cleanup(gateway: Arc<Gateway>, ctx: Arc<Context>) -> Result<Action> {
    let key = format!(
        "{}/{}",
        gateway.namespace().unwrap_or_default(),
        gateway.name_any()
    );
    if let Some(node) = ctx.state.graphs.remove(&key).await? {
        info!("key: {}, msg: removed virtual service {}", key, node.name);
    }

    // The Gateway is going away; a failed status reset must not hold up deletion.
    if let Err(err) = ctx.state.status_patcher().reset_on_delete(&key, &gateway).await {
        warn!("key: {}, msg: could not reset gateway status: {}", key, err);
    }
    Ok(Action::await_change())
}

/// Validates an owned Gateway, brings its graph and published model up to
/// date and writes the resulting status.
///
/// `published` carries the realization returned when the model was already
/// republished by an incremental certificate update. It is only trusted when
/// the graph was built from the same set of valid listeners.
pub async fn sync_gateway(
    gateway: &Gateway,
    state: &State,
    published: Option<Realization>,
) -> Result<()> {
    let intent = GatewayIntent::try_from(gateway)?;
    let key = intent.key();
    let outcome = validation::validate(&intent, true, state.secrets.as_ref()).await;

    let realization = if outcome.is_programmable() {
        let retained = intent.retain_listeners(&outcome.valid_listener_mask());
        let graph_current = state.graphs.intent(&key).await.as_ref() == Some(&retained);
        match published {
            Some(realization) if graph_current => realization,
            _ => build(&retained, gateway, state).await?,
        }
    } else {
        if let Some(node) = state.graphs.remove(&key).await? {
            info!(
                "key: {}, msg: no valid listeners left, removed virtual service {}",
                key, node.name
            );
        }
        Realization::Pending
    };

    let Some(conditions) = compute_status(&intent, &outcome, &realization, gateway.status.as_ref())
    else {
        return Ok(());
    };
    state
        .status_patcher()
        .reconcile(&key, gateway, &conditions.into_gateway_status())
        .await?;
    Ok(())
}

async fn build(intent: &GatewayIntent, gateway: &Gateway, state: &State) -> Result<Realization> {
    let built = state
        .graphs
        .build(
            intent,
            state.secrets.as_ref(),
            &state.networks,
            &state.settings,
        )
        .await?;
    match built.published {
        Some(realization) => Ok(realization),
        None => {
            debug!(
                "key: {}, msg: virtual service unchanged, not publishing",
                intent.key()
            );
            Ok(realization_from_status(gateway.status.as_ref()))
        }
    }
}

pub async fn controller(ctx: Context) -> Result<()> {
    let gateway = Api::<Gateway>::all(ctx.client.clone());
    gateway
        .list(&ListParams::default().limit(1))
        .await
        .map_err(Error::CRDNotFoundError)?;

    Controller::new(gateway, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(ctx))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

fn error_policy(_: Arc<Gateway>, error: &Error, _: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    Action::requeue(Duration::from_secs(5))
}
