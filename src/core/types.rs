use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespaced workload identifier (`namespace/name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    /// Kubernetes namespace
    pub namespace: String,
    /// Workload name (deployment, statefulset, daemonset)
    pub name: String,
}

impl ServiceKey {
    /// Creates a new service key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// True when neither part is known
    pub fn is_unknown(&self) -> bool {
        self.namespace.is_empty() && self.name.is_empty()
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Directed call edge between two workloads
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    /// Calling workload
    pub src: ServiceKey,
    /// Called workload
    pub dst: ServiceKey,
}

impl EdgeKey {
    /// Creates a new edge key
    pub fn new(src: ServiceKey, dst: ServiceKey) -> Self {
        Self { src, dst }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}
