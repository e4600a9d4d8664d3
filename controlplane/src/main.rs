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

use std::sync::Arc;

use clap::Parser;
use controlplane::{
    config::Config,
    graph::GraphRegistry,
    network::NamespaceNetworkCache,
    publisher::ModelCache,
    store::{list_cache, KubeStore},
    *,
};

use kube::Client;
use tokio::try_join;
use tracing::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::parse();
    info!(
        "starting controller {} for cluster {}",
        config.controller_name, config.cluster_name
    );

    let client = Client::try_default().await?;
    let (cache, cache_writers) = list_cache();
    let store = Arc::new(KubeStore::new(client.clone(), cache));
    let ctx = Context {
        client: client.clone(),
        state: State {
            controller_name: config.controller_name.clone(),
            gateways: store.clone(),
            secrets: store,
            networks: Arc::new(NamespaceNetworkCache::new(config.vip_networks.clone())),
            graphs: Arc::new(GraphRegistry::new(Arc::new(ModelCache::new()))),
            settings: config.graph_settings(),
        },
    };

    if let Err(error) = try_join!(
        cache_writers.run(client),
        gateway_controller(ctx.clone()),
        gatewayclass_controller(ctx.clone()),
        secret_controller(ctx.clone()),
        namespace_controller(ctx),
    ) {
        error!("failed to start controllers: {error:?}");
        std::process::exit(1);
    }
    Ok(())
}
