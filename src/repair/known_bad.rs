//! Armor ids whose helm coverage flags are always wrong in the tbc/wrath
//! metadata, regardless of what the classic variant says.

use std::collections::HashSet;

/// Built-in table of always-cleared item ids.
pub const KNOWN_BAD_HELM_IDS: [u64; 29] = [
    15372, 16043, 33278, 34703, 35604, 37347, 37295, 38591, 36385, 46190, 48209, 49042, 49699,
    50790, 44383, 52549, 10018, 53792, 54831, 55061, 39959, 37834, 61029, 61033, 60138, 23327,
    55053, 46976, 14908,
];

/// Immutable set of item ids that skip the reference comparison and are
/// always cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownBadIds(HashSet<u64>);

impl KnownBadIds {
    pub fn new(ids: impl IntoIterator<Item = u64>) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn contains(&self, id: u64) -> bool {
        self.0.contains(&id)
    }
}

impl Default for KnownBadIds {
    fn default() -> Self {
        Self::new(KNOWN_BAD_HELM_IDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_has_no_duplicates() {
        assert_eq!(KnownBadIds::default().0.len(), KNOWN_BAD_HELM_IDS.len());
    }

    #[test]
    fn membership() {
        let ids = KnownBadIds::default();
        assert!(ids.contains(15372));
        assert!(ids.contains(14908));
        assert!(!ids.contains(15373));
        assert!(!KnownBadIds::new([]).contains(15372));
    }
}
