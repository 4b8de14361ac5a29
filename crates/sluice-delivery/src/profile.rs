//! Target profiles.
//!
//! A profile set names a base profile and the profiles it expands to. A
//! resource config scoped to a target profile only takes part in
//! configurations built for a profile set containing that profile.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSet {
    base: String,
    #[serde(default)]
    profiles: Vec<String>,
}

impl ProfileSet {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            profiles: Vec::new(),
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        let profile = profile.into();
        if !self.contains(&profile) {
            self.profiles.push(profile);
        }
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn contains(&self, profile: &str) -> bool {
        self.base == profile || self.profiles.iter().any(|p| p == profile)
    }

    /// How many of the comma separated `targets` this set contains, or `None`
    /// if the set does not match them at all. Absent and `*` targets match
    /// every set with weight `0`.
    pub fn match_weight(&self, targets: Option<&str>) -> Option<usize> {
        let targets = match targets.map(str::trim) {
            None | Some("") | Some("*") => return Some(0),
            Some(t) => t,
        };
        let hits = targets
            .split(',')
            .map(str::trim)
            .filter(|t| self.contains(t))
            .count();
        (hits > 0).then_some(hits)
    }
}

impl Default for ProfileSet {
    fn default() -> Self {
        Self::new(DEFAULT_PROFILE)
    }
}

/// Registered profile sets, keyed by base profile.
#[derive(Debug, Default)]
pub struct ProfileStore {
    sets: RwLock<HashMap<String, ProfileSet>>,
}

impl ProfileStore {
    pub fn add(&self, set: ProfileSet) {
        self.sets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(set.base.clone(), set);
    }

    /// The registered set for `base`, or a set holding only `base`.
    pub fn get(&self, base: &str) -> ProfileSet {
        self.sets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(base)
            .cloned()
            .unwrap_or_else(|| ProfileSet::new(base))
    }
}
