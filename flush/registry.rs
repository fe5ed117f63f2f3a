// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The tenant registry: the top-level keyed container of tenant instances.

pub use crate::tenant::TenantInstance;
use std::sync::Arc;

/// Owns every tenant instance the ingester currently knows about.
///
/// Grounded on the same "outer map, inner per-entity lock" shape as
/// [`crate::tenant::TenantInstance`]'s own stream map: lookups take a
/// shared lock, and instance creation is the only path that briefly takes
/// it exclusively.
pub struct TenantRegistry {
    instances: base::RwLock<base::FastHashMap<String, Arc<TenantInstance>>>,
}

impl Default for TenantRegistry {
    fn default() -> Self {
        TenantRegistry {
            instances: base::RwLock::new(base::FastHashMap::default()),
        }
    }
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_instance_by_id(&self, user_id: &str) -> Option<Arc<TenantInstance>> {
        self.instances.read().get(user_id).cloned()
    }

    pub fn get_or_create_instance(&self, user_id: &str) -> Arc<TenantInstance> {
        if let Some(i) = self.get_instance_by_id(user_id) {
            return i;
        }
        let mut instances = self.instances.write();
        instances
            .entry(user_id.to_owned())
            .or_insert_with(|| Arc::new(TenantInstance::new(user_id.to_owned())))
            .clone()
    }

    pub fn get_instances(&self) -> Vec<Arc<TenantInstance>> {
        self.instances.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_instance_is_none() {
        let r = TenantRegistry::new();
        assert!(r.get_instance_by_id("nobody").is_none());
    }

    #[test]
    fn get_or_create_returns_same_instance() {
        let r = TenantRegistry::new();
        let a = r.get_or_create_instance("u");
        let b = r.get_instance_by_id("u").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(r.get_instances().len(), 1);
    }
}
