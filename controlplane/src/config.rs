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

use clap::Parser;

use crate::consts::GATEWAY_CLASS_CONTROLLER_NAME;
use crate::graph::GraphSettings;

#[derive(Debug, Parser, Clone)]
#[clap(about = "Programs load balancer virtual services from Gateway API Gateways")]
pub struct Config {
    /// controllerName a GatewayClass must carry for its Gateways to be managed.
    #[clap(long, env = "GATEWAY_CONTROLLER_NAME", default_value = GATEWAY_CLASS_CONTROLLER_NAME)]
    pub controller_name: String,
    /// Cluster name used as the prefix of every generated object name.
    #[clap(long, env = "CLUSTER_NAME", default_value = "cluster")]
    pub cluster_name: String,
    #[clap(long, env = "TENANT", default_value = "admin")]
    pub tenant: String,
    #[clap(long, env = "SEG_NAME", default_value = "Default-Group")]
    pub service_engine_group: String,
    #[clap(long, env = "VRF_CONTEXT", default_value = "global")]
    pub vrf_context: String,
    /// Cluster-wide VIP networks used for namespaces without an override.
    #[clap(long, env = "VIP_NETWORK_LIST", value_delimiter = ',')]
    pub vip_networks: Vec<String>,
}

impl Config {
    pub fn graph_settings(&self) -> GraphSettings {
        GraphSettings {
            cluster_name: self.cluster_name.clone(),
            tenant: self.tenant.clone(),
            service_engine_group: self.service_engine_group.clone(),
            vrf_context: self.vrf_context.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults_and_network_list() {
        let config = Config::parse_from([
            "controller",
            "--cluster-name",
            "east",
            "--vip-networks",
            "vip-net-a,vip-net-b",
        ]);
        assert_eq!(config.controller_name, GATEWAY_CLASS_CONTROLLER_NAME);
        assert_eq!(config.vip_networks, vec!["vip-net-a", "vip-net-b"]);

        let settings = config.graph_settings();
        assert_eq!(settings.cluster_name, "east");
        assert_eq!(settings.tenant, "admin");
        assert_eq!(settings.service_engine_group, "Default-Group");
    }
}
