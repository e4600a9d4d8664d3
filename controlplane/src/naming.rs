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

// Names of generated load balancer objects. All names carry the cluster name so
// several clusters can share one appliance tenant.

pub fn gateway_parent_name(cluster: &str, namespace: &str, name: &str) -> String {
    format!("{cluster}--{namespace}-{name}-EVH")
}

pub fn vsvip_name(vs_name: &str) -> String {
    format!("{vs_name}-vsvip")
}

// The encoded key of a TLS node. It identifies the node independently of its
// position in the virtual service's certificate list.
pub fn tls_key_cert_name(cluster: &str, hostname: &str, cert_name: &str) -> String {
    format!("{cluster}--{hostname}-{cert_name}")
}
