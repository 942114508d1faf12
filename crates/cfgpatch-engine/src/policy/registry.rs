//! Name → policy table used to resolve schema documents

use indexmap::IndexMap;
use std::sync::Arc;

use super::UpdatePolicy;
use super::builtin;

/// Table of known update policies, in registration order
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: IndexMap<String, Arc<UpdatePolicy>>,
}

impl PolicyRegistry {
    /// Create a registry without any policy
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in catalogue
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for policy in builtin::catalogue() {
            registry.register(policy);
        }
        registry
    }

    /// Add a policy, replacing any previous policy with the same name
    pub fn register(&mut self, policy: UpdatePolicy) -> Arc<UpdatePolicy> {
        let policy = Arc::new(policy);
        self.policies
            .insert(policy.name().to_string(), Arc::clone(&policy));
        policy
    }

    /// Look up a policy by name
    pub fn get(&self, name: &str) -> Option<Arc<UpdatePolicy>> {
        self.policies.get(name).cloned()
    }

    /// Policies in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<UpdatePolicy>> {
        self.policies.values()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
