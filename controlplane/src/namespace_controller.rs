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

use std::time::Duration;

use crate::{consts::VIP_NETWORK_ANNOTATION, network::NamespaceNetworkCache, *};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::Api,
    runtime::watcher::{self, watcher, Event},
    ResourceExt,
};
use tracing::*;

/// Keeps the namespace network placement cache in line with the VIP network
/// annotation on Namespaces. Graphs pick the change up on their next build.
pub async fn controller(ctx: Context) -> Result<()> {
    let namespaces = Api::<Namespace>::all(ctx.client.clone());
    let mut events = watcher(namespaces, watcher::Config::default()).boxed();

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => apply_event(&ctx.state.networks, event),
            Err(err) => {
                warn!("namespace watch failed, will retry: {}", err);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
    Ok(())
}

fn apply_event(networks: &NamespaceNetworkCache, event: Event<Namespace>) {
    match event {
        Event::Applied(ns) => {
            let name = ns.name_any();
            match placement(&ns) {
                Some(network) => {
                    if networks.get(&name) != vec![network.clone()] {
                        info!("namespace {} placed on VIP network {}", name, network);
                    }
                    networks.put(&name, &network);
                }
                None => networks.delete(&name),
            }
        }
        Event::Deleted(ns) => {
            debug!("namespace {} deleted, dropping network placement", ns.name_any());
            networks.delete(&ns.name_any());
        }
        // A relist is the complete picture: anything missing from it is gone.
        Event::Restarted(namespaces) => {
            debug!("namespace watch (re)started with {} namespaces", namespaces.len());
            networks.replace(
                namespaces
                    .iter()
                    .filter_map(|ns| placement(ns).map(|network| (ns.name_any(), network)))
                    .collect(),
            );
        }
    }
}

fn placement(ns: &Namespace) -> Option<String> {
    ns.annotations()
        .get(VIP_NETWORK_ANNOTATION)
        .filter(|network| !network.is_empty())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace(name: &str, network: Option<&str>) -> Namespace {
        let mut ns = Namespace::default();
        ns.metadata.name = Some(name.to_string());
        if let Some(network) = network {
            ns.annotations_mut()
                .insert(VIP_NETWORK_ANNOTATION.to_string(), network.to_string());
        }
        ns
    }

    #[test]
    fn annotation_drives_placement() {
        let networks = NamespaceNetworkCache::new(vec!["default-net".to_string()]);

        apply_event(&networks, Event::Applied(namespace("apps", Some("apps-net"))));
        assert_eq!(networks.get("apps"), vec!["apps-net"]);

        apply_event(&networks, Event::Applied(namespace("apps", Some(""))));
        assert_eq!(networks.get("apps"), vec!["default-net"]);

        apply_event(&networks, Event::Applied(namespace("apps", Some("apps-net"))));
        apply_event(&networks, Event::Deleted(namespace("apps", Some("apps-net"))));
        assert_eq!(networks.get("apps"), vec!["default-net"]);
    }

    #[test]
    fn relist_forgets_namespaces_deleted_during_watch_gap() {
        let networks = NamespaceNetworkCache::new(vec!["default-net".to_string()]);
        apply_event(&networks, Event::Applied(namespace("gone", Some("gone-net"))));
        apply_event(&networks, Event::Applied(namespace("kept", Some("kept-net"))));

        apply_event(
            &networks,
            Event::Restarted(vec![
                namespace("kept", Some("kept-net")),
                namespace("plain", None),
            ]),
        );
        assert_eq!(networks.get("gone"), vec!["default-net"]);
        assert_eq!(networks.get("kept"), vec!["kept-net"]);
        assert_eq!(networks.get("plain"), vec!["default-net"]);
    }
}
