use super::Tag;

/// Per-set LRU state: one age counter per way.
///
/// Counters grow on every lookup of the set and are reset when the way is
/// hit or filled, so the oldest way has the largest counter.
#[derive(Debug, Clone)]
pub struct LruSetData {
    recency: Box<[u32]>,
    last_hit: usize,
}

impl LruSetData {
    pub fn new(n_ways: usize) -> Self {
        LruSetData {
            recency: vec![0; n_ways].into_boxed_slice(),
            last_hit: 0,
        }
    }

    pub(super) fn find(&mut self, tags: &[Option<Tag>], tag: Tag) -> bool {
        // last hit way first, it is the common case for streams of
        // accesses to the same line
        let hit_way = if tags[self.last_hit] == Some(tag) {
            Some(self.last_hit)
        } else {
            tags.iter().position(|&t| t == Some(tag))
        };

        for age in self.recency.iter_mut() {
            *age = age.saturating_add(1);
        }

        match hit_way {
            Some(way) => {
                self.recency[way] = 0;
                self.last_hit = way;
                true
            }
            None => false,
        }
    }

    /// Way with the strictly largest age, lowest index on ties.
    pub(super) fn victim(&self) -> usize {
        let mut max_way = 0;
        for (way, &age) in self.recency.iter().enumerate() {
            if age > self.recency[max_way] {
                max_way = way;
            }
        }
        max_way
    }

    pub(super) fn install(&mut self, way: usize) {
        self.recency[way] = 0;
        self.last_hit = way;
    }

    pub(super) fn free(&mut self, way: usize) {
        self.recency[way] = u32::MAX;
    }

    pub(super) fn recency(&self, way: usize) -> Option<u32> {
        self.recency.get(way).copied()
    }
}

#[cfg(test)]
mod tests {
    use crate::replace::{ReplacementPolicy, ReplacementSet};

    fn access(set: &mut ReplacementSet, rng: &mut fastrand::Rng, tag: u64) -> Option<u64> {
        if set.find(tag) {
            None
        } else {
            set.replace(tag, rng)
        }
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut rng = fastrand::Rng::with_seed(0);
        let mut set = ReplacementSet::new(4, ReplacementPolicy::Lru);
        for tag in [1, 2, 3, 4] {
            assert_eq!(access(&mut set, &mut rng, tag), None);
        }
        // touch 1 so that 2 becomes the oldest
        assert_eq!(access(&mut set, &mut rng, 1), None);
        assert_eq!(access(&mut set, &mut rng, 5), Some(2));
        assert_eq!(access(&mut set, &mut rng, 6), Some(3));
        assert_eq!(access(&mut set, &mut rng, 1), None);
        assert_eq!(access(&mut set, &mut rng, 7), Some(4));
    }

    #[test]
    fn victim_has_largest_counter() {
        let mut rng = fastrand::Rng::with_seed(0);
        let mut set = ReplacementSet::new(8, ReplacementPolicy::Lru);
        let pattern = [3u64, 9, 3, 12, 40, 9, 1, 7, 15, 22, 3, 30, 1, 50, 60, 9, 70, 3];
        for &tag in pattern.iter().cycle().take(200) {
            if set.find(tag) {
                continue;
            }
            if set.free_slot().is_none() {
                // find() already aged the set for this lookup
                let ages: Vec<u32> = (0..8).map(|w| set.recency(w).unwrap()).collect();
                let max = *ages.iter().max().unwrap();
                let expected_way = ages.iter().position(|&a| a == max).unwrap();
                let expected: Vec<u64> = set.resident().collect();
                let evicted = set.replace(tag, &mut rng).unwrap();
                assert_eq!(evicted, expected[expected_way]);
            } else {
                set.replace(tag, &mut rng);
            }
        }
    }

    #[test]
    fn ties_break_to_lowest_way() {
        let mut rng = fastrand::Rng::with_seed(0);
        let mut set = ReplacementSet::new(2, ReplacementPolicy::Lru);
        set.replace(1, &mut rng);
        set.replace(2, &mut rng);
        // both ways were filled without a lookup in between: equal ages
        assert_eq!(set.recency(0), set.recency(1));
        assert_eq!(set.replace(3, &mut rng), Some(1));
    }

    #[test]
    fn every_lookup_ages_every_way() {
        let mut rng = fastrand::Rng::with_seed(0);
        let mut set = ReplacementSet::new(4, ReplacementPolicy::Lru);
        for tag in [1, 2, 3, 4] {
            set.replace(tag, &mut rng);
        }
        assert!(set.find(1));
        assert_eq!(
            (0..4).map(|w| set.recency(w).unwrap()).collect::<Vec<_>>(),
            vec![0, 1, 1, 1]
        );
        assert!(!set.find(99));
        assert_eq!(
            (0..4).map(|w| set.recency(w).unwrap()).collect::<Vec<_>>(),
            vec![1, 2, 2, 2]
        );
        // every way ages on a hit, the hit way restarts at zero
        assert!(set.find(4));
        assert_eq!(
            (0..4).map(|w| set.recency(w).unwrap()).collect::<Vec<_>>(),
            vec![2, 3, 3, 0]
        );
    }

    #[test]
    fn freed_way_is_next_victim() {
        let mut rng = fastrand::Rng::with_seed(0);
        let mut set = ReplacementSet::new(2, ReplacementPolicy::Lru);
        set.replace(1, &mut rng);
        set.replace(2, &mut rng);
        assert!(set.free(2));
        assert_eq!(set.recency(1), Some(u32::MAX));
        assert_eq!(set.replace(3, &mut rng), None);
        assert!(set.contains(1));
        assert!(set.contains(3));
    }
}
