use std::collections::BTreeMap;

use ahash::RandomState;
use hashbrown::HashMap;

/// One named map declared by a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum MapDefinition {
    /// Exact key → label. An unmatched key fails the lookup.
    Enumeration(BTreeMap<u64, String>),
    /// Ordered `(mask, label)` pairs, rendered as `|`-joined flags.
    Bits(Vec<(u64, String)>),
}

impl MapDefinition {
    pub fn lookup(&self, key: u64) -> Option<String> {
        match self {
            MapDefinition::Enumeration(entries) => entries.get(&key).cloned(),
            MapDefinition::Bits(entries) => lookup_bits(entries, key),
        }
    }
}

fn lookup_bits(entries: &[(u64, String)], key: u64) -> Option<String> {
    // An exact entry (including an explicit zero) wins over flag decomposition.
    if let Some((_, label)) = entries.iter().find(|(mask, _)| *mask == key) {
        return Some(label.clone());
    }

    let mut labels: Vec<&str> = Vec::new();
    let mut residual = key;
    for (mask, label) in entries {
        if *mask != 0 && key & mask == *mask {
            labels.push(label);
            residual &= !mask;
        }
    }

    if labels.is_empty() {
        return None;
    }

    let mut out = labels.join("|");
    if residual != 0 {
        out.push_str(&format!("|0x{:x}", residual));
    }
    Some(out)
}

/// Named lookup tables owned by a provider.
#[derive(Debug, Clone, Default)]
pub struct ValueMaps {
    maps: HashMap<String, MapDefinition, RandomState>,
}

impl ValueMaps {
    pub fn new() -> Self {
        ValueMaps::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, map: MapDefinition) {
        self.maps.insert(name.into(), map);
    }

    pub fn get(&self, name: &str) -> Option<&MapDefinition> {
        self.maps.get(name)
    }

    /// Resolve `key` through the map called `name`.
    ///
    /// Returns `None` when the map does not exist or has no entry for the key.
    pub fn lookup(&self, name: &str, key: u64) -> Option<String> {
        self.maps.get(name).and_then(|m| m.lookup(key))
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}
