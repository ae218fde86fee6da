//! Which nodes implement which endpoints.

use std::collections::{BTreeSet, HashMap};

use courier_protocol::{EndpointName, NodeId};

/// Endpoint → nodes with at least one implementor.
///
/// Buckets are never empty: an endpoint whose last node leaves is removed.
#[derive(Debug, Default)]
pub(crate) struct Directory {
    buckets: HashMap<EndpointName, BTreeSet<NodeId>>,
}

impl Directory {
    /// Adds `node` to `endpoint`. Returns `true` if it is the first.
    pub(crate) fn add(&mut self, endpoint: &EndpointName, node: NodeId) -> bool {
        let bucket = self.buckets.entry(endpoint.clone()).or_default();
        let first = bucket.is_empty();
        bucket.insert(node);
        first
    }

    /// Removes `node` from `endpoint`. Returns `true` if the endpoint is
    /// now gone from the directory.
    pub(crate) fn remove(&mut self, endpoint: &EndpointName, node: NodeId) -> bool {
        let Some(bucket) = self.buckets.get_mut(endpoint) else {
            return false;
        };
        if !bucket.remove(&node) {
            return false;
        }
        if bucket.is_empty() {
            self.buckets.remove(endpoint);
            return true;
        }
        false
    }

    /// Removes `node` everywhere. Returns the endpoints that vanished.
    pub(crate) fn purge(&mut self, node: NodeId) -> Vec<EndpointName> {
        let mut gone = Vec::new();
        self.buckets.retain(|endpoint, bucket| {
            bucket.remove(&node);
            if bucket.is_empty() {
                gone.push(endpoint.clone());
                false
            } else {
                true
            }
        });
        gone.sort();
        gone
    }

    pub(crate) fn nodes(&self, endpoint: &EndpointName) -> Vec<NodeId> {
        self.buckets
            .get(endpoint)
            .map(|bucket| bucket.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn endpoints(&self) -> Vec<EndpointName> {
        let mut names: Vec<EndpointName> = self.buckets.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn references(&self, node: NodeId) -> bool {
        self.buckets.values().any(|bucket| bucket.contains(&node))
    }
}
