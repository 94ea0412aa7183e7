use std::collections::BTreeMap;

use loadcheck_config::ConfigError;
use rand::Rng;

/// Every action a session can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    CreateBucket,
    CreateVersionedBucket,
    DeleteBucket,
    ArchiveNewKey,
    ArchiveNewVersion,
    ArchiveOverwrite,
    RetrieveLatest,
    RetrieveVersion,
    DeleteKey,
    DeleteVersion,
}

impl ActionKind {
    /// The action name as it appears in test-plan distributions.
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::CreateBucket => "create-bucket",
            ActionKind::CreateVersionedBucket => "create-versioned-bucket",
            ActionKind::DeleteBucket => "delete-bucket",
            ActionKind::ArchiveNewKey => "archive-new-key",
            ActionKind::ArchiveNewVersion => "archive-new-version",
            ActionKind::ArchiveOverwrite => "archive-overwrite",
            ActionKind::RetrieveLatest => "retrieve-latest",
            ActionKind::RetrieveVersion => "retrieve-version",
            ActionKind::DeleteKey => "delete-key",
            ActionKind::DeleteVersion => "delete-version",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "create-bucket" => ActionKind::CreateBucket,
            "create-versioned-bucket" => ActionKind::CreateVersionedBucket,
            "delete-bucket" => ActionKind::DeleteBucket,
            "archive-new-key" => ActionKind::ArchiveNewKey,
            "archive-new-version" => ActionKind::ArchiveNewVersion,
            "archive-overwrite" => ActionKind::ArchiveOverwrite,
            "retrieve-latest" => ActionKind::RetrieveLatest,
            "retrieve-version" => ActionKind::RetrieveVersion,
            "delete-key" => ActionKind::DeleteKey,
            "delete-version" => ActionKind::DeleteVersion,
            _ => return None,
        })
    }
}

/// A 100-slot lookup table materializing a weighted action distribution.
///
/// Each action occupies as many slots as its percentage, so picking a
/// uniform slot in `0..100` samples the distribution exactly.
#[derive(Debug, Clone)]
pub struct FrequencyTable {
    slots: Vec<ActionKind>,
}

impl FrequencyTable {
    pub fn build(distribution: &BTreeMap<String, u32>) -> Result<Self, ConfigError> {
        let sum: u32 = distribution.values().sum();
        if sum != 100 {
            return Err(ConfigError::DistributionSum(sum));
        }
        let mut slots = Vec::with_capacity(100);
        for (name, weight) in distribution {
            let kind = ActionKind::from_name(name)
                .ok_or_else(|| ConfigError::UnknownAction(name.clone()))?;
            for _ in 0..*weight {
                slots.push(kind);
            }
        }
        Ok(FrequencyTable { slots })
    }

    pub fn pick<R: Rng>(&self, rng: &mut R) -> ActionKind {
        self.slots[rng.gen_range(0..self.slots.len())]
    }

    /// Number of table slots held by `kind`, equal to its percentage.
    pub fn weight_of(&self, kind: ActionKind) -> usize {
        self.slots.iter().filter(|k| **k == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn dist(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_table_has_one_slot_per_percent() {
        let table =
            FrequencyTable::build(&dist(&[("archive-new-key", 70), ("retrieve-latest", 30)]))
                .unwrap();
        assert_eq!(table.weight_of(ActionKind::ArchiveNewKey), 70);
        assert_eq!(table.weight_of(ActionKind::RetrieveLatest), 30);
        assert_eq!(table.weight_of(ActionKind::DeleteBucket), 0);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let err = FrequencyTable::build(&dist(&[("archive-new-key", 50), ("defragment", 50)]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAction(name) if name == "defragment"));
    }

    #[test]
    fn test_bad_sum_rejected() {
        let err = FrequencyTable::build(&dist(&[("archive-new-key", 99)])).unwrap_err();
        assert!(matches!(err, ConfigError::DistributionSum(99)));
    }

    #[test]
    fn test_pick_is_deterministic_for_a_seed() {
        let table =
            FrequencyTable::build(&dist(&[("archive-new-key", 50), ("delete-key", 50)])).unwrap();
        let mut a = ChaCha8Rng::seed_from_u64(7);
        let mut b = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..20 {
            assert_eq!(table.pick(&mut a), table.pick(&mut b));
        }
    }

    #[test]
    fn test_names_roundtrip() {
        for kind in [
            ActionKind::CreateBucket,
            ActionKind::CreateVersionedBucket,
            ActionKind::DeleteBucket,
            ActionKind::ArchiveNewKey,
            ActionKind::ArchiveNewVersion,
            ActionKind::ArchiveOverwrite,
            ActionKind::RetrieveLatest,
            ActionKind::RetrieveVersion,
            ActionKind::DeleteKey,
            ActionKind::DeleteVersion,
        ] {
            assert_eq!(ActionKind::from_name(kind.name()), Some(kind));
        }
    }
}
