//! The closed set of backup categories and a fixed-size map keyed by it.
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// One independently tracked class of wallet state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupCategory {
    Settings,
    Widgets,
    Metadata,
    LdkActivity,
    Blocktank,
    SlashtagsContacts,
    /// Lightning channel state. Written straight from the node's own backup
    /// stream, never debounced.
    LdkChannelState,
}

impl BackupCategory {
    pub const COUNT: usize = 7;

    pub const ALL: [BackupCategory; Self::COUNT] = [
        BackupCategory::Settings,
        BackupCategory::Widgets,
        BackupCategory::Metadata,
        BackupCategory::LdkActivity,
        BackupCategory::Blocktank,
        BackupCategory::SlashtagsContacts,
        BackupCategory::LdkChannelState,
    ];

    /// Position in [`ALL`](Self::ALL).
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Stable name used in store keys and persisted rows.
    pub const fn as_str(self) -> &'static str {
        match self {
            BackupCategory::Settings => "settings",
            BackupCategory::Widgets => "widgets",
            BackupCategory::Metadata => "metadata",
            BackupCategory::LdkActivity => "ldk_activity",
            BackupCategory::Blocktank => "blocktank",
            BackupCategory::SlashtagsContacts => "slashtags_contacts",
            BackupCategory::LdkChannelState => "ldk_channel_state",
        }
    }

    /// Whether local mutations go through the debounce scheduler.
    pub const fn is_debounced(self) -> bool {
        !matches!(self, BackupCategory::LdkChannelState)
    }
}

impl std::fmt::Display for BackupCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackupCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown backup category: {s}"))
    }
}

/// One `T` per category, stored inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMap<T>([T; BackupCategory::COUNT]);

impl<T> CategoryMap<T> {
    pub fn from_fn(mut f: impl FnMut(BackupCategory) -> T) -> Self {
        Self(std::array::from_fn(|i| f(BackupCategory::ALL[i])))
    }

    pub fn iter(&self) -> impl Iterator<Item = (BackupCategory, &T)> {
        BackupCategory::ALL.into_iter().zip(self.0.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (BackupCategory, &mut T)> {
        BackupCategory::ALL.into_iter().zip(self.0.iter_mut())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }
}

impl<T: Default> Default for CategoryMap<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T> Index<BackupCategory> for CategoryMap<T> {
    type Output = T;

    fn index(&self, category: BackupCategory) -> &T {
        &self.0[category.index()]
    }
}

impl<T> IndexMut<BackupCategory> for CategoryMap<T> {
    fn index_mut(&mut self, category: BackupCategory) -> &mut T {
        &mut self.0[category.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_all_order() {
        for (i, category) in BackupCategory::ALL.into_iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }

    #[test]
    fn names_roundtrip() {
        for category in BackupCategory::ALL {
            assert_eq!(category.as_str().parse::<BackupCategory>(), Ok(category));
        }
        assert!("wallet".parse::<BackupCategory>().is_err());
    }

    #[test]
    fn only_channel_state_skips_debounce() {
        let undebounced: Vec<_> = BackupCategory::ALL
            .into_iter()
            .filter(|c| !c.is_debounced())
            .collect();
        assert_eq!(undebounced, vec![BackupCategory::LdkChannelState]);
    }

    #[test]
    fn category_map_indexing() {
        let mut map: CategoryMap<u32> = CategoryMap::default();
        map[BackupCategory::Blocktank] = 5;
        map[BackupCategory::Settings] += 1;
        assert_eq!(map[BackupCategory::Blocktank], 5);
        assert_eq!(map.values().sum::<u32>(), 6);
        let (first, value) = map.iter().next().unwrap();
        assert_eq!((first, *value), (BackupCategory::Settings, 1));
    }

    #[test]
    fn serde_snake_case() {
        let json = serde_json::to_string(&BackupCategory::SlashtagsContacts).unwrap();
        assert_eq!(json, "\"slashtags_contacts\"");
    }
}
