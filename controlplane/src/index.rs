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

use std::collections::{BTreeMap, VecDeque};

use crate::model::TlsCertNode;

/// Positions each encoded TLS key occupies in a virtual service's certificate list.
///
/// A key shared by several references (same hostname and certificate name on
/// different listeners) holds one position per occurrence, in list order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncodedKeyIndex {
    positions: BTreeMap<String, VecDeque<usize>>,
}

impl EncodedKeyIndex {
    pub fn from_nodes(nodes: &[TlsCertNode]) -> Self {
        let mut index = Self::default();
        for (pos, node) in nodes.iter().enumerate() {
            index.record(&node.name, pos);
        }
        index
    }

    pub fn record(&mut self, key: &str, position: usize) {
        self.positions
            .entry(key.to_string())
            .or_default()
            .push_back(position);
    }

    /// Consumes the first recorded position of `key`, dropping the key once empty.
    pub fn take_first(&mut self, key: &str) -> Option<usize> {
        let positions = self.positions.get_mut(key)?;
        let first = positions.pop_front();
        if positions.is_empty() {
            self.positions.remove(key);
        }
        first
    }

    pub fn positions(&self, key: &str) -> Option<&VecDeque<usize>> {
        self.positions.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
