//! # Service Registry
//!
//! Maps service names to the provider backing them, together with the reverse
//! index from provider identity to the names it backs. Both maps are updated
//! in the same call, so removing a provider never needs to scan every entry.

use std::collections::BTreeSet;
use std::collections::HashMap;

use crate::service::Provider;
use crate::service::ProviderKey;

#[derive(Default)]
pub(crate) struct Registry {
    services: HashMap<String, Provider>,
    owners: HashMap<ProviderKey, BTreeSet<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under `name`, returning whatever it displaced.
    pub fn insert(&mut self, name: impl Into<String>, provider: Provider) -> Option<Provider> {
        let name = name.into();
        let key = provider.key();
        let displaced = self.services.insert(name.clone(), provider);

        if let Some(old) = &displaced {
            self.unindex(&old.key(), &name);
        }
        self.owners.entry(key).or_default().insert(name);

        displaced
    }

    pub fn get(&self, name: &str) -> Option<Provider> {
        self.services.get(name).cloned()
    }

    /// Removes every name backed by `key`, returning the names in order.
    pub fn remove_provider(&mut self, key: &ProviderKey) -> Vec<String> {
        let Some(names) = self.owners.remove(key) else {
            return Vec::new();
        };
        for name in &names {
            self.services.remove(name);
        }
        names.into_iter().collect()
    }

    /// Names currently backed by `key`.
    pub fn owned_by(&self, key: &ProviderKey) -> Vec<String> {
        self.owners
            .get(key)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    fn unindex(&mut self, key: &ProviderKey, name: &str) {
        if let Some(names) = self.owners.get_mut(key) {
            names.remove(name);
            if names.is_empty() {
                self.owners.remove(key);
            }
        }
    }
}
