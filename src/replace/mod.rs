pub mod lru;
pub mod nmru;

use std::{fmt, str::FromStr};

use serde::Deserialize;

use crate::error::ConfigError;

use self::{lru::LruSetData, nmru::NmruSetData};

pub type Tag = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementPolicy {
    #[default]
    Lru,
    Nmru,
}

impl FromStr for ReplacementPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(ReplacementPolicy::Lru),
            "nmru" => Ok(ReplacementPolicy::Nmru),
            _ => Err(ConfigError::Policy(s.to_string())),
        }
    }
}

impl fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacementPolicy::Lru => f.write_str("lru"),
            ReplacementPolicy::Nmru => f.write_str("nmru"),
        }
    }
}

#[derive(Debug, Clone)]
enum SetData {
    Lru(LruSetData),
    Nmru(NmruSetData),
}

/// One associative set: `associativity` tag slots plus the per-policy state.
#[derive(Debug, Clone)]
pub struct ReplacementSet {
    tags: Box<[Option<Tag>]>,
    data: SetData,
}

impl ReplacementSet {
    pub fn new(n_ways: usize, policy: ReplacementPolicy) -> Self {
        assert!(n_ways >= 1);
        let data = match policy {
            ReplacementPolicy::Lru => SetData::Lru(LruSetData::new(n_ways)),
            ReplacementPolicy::Nmru => SetData::Nmru(NmruSetData::new(n_ways)),
        };
        ReplacementSet {
            tags: vec![None; n_ways].into_boxed_slice(),
            data,
        }
    }

    #[inline]
    pub fn associativity(&self) -> usize {
        self.tags.len()
    }

    /// Looks `tag` up and updates the recency state.
    ///
    /// For LRU every call ages every slot by one, hit or miss; the hit slot
    /// is then reset to zero.
    pub fn find(&mut self, tag: Tag) -> bool {
        match &mut self.data {
            SetData::Lru(lru) => lru.find(&self.tags, tag),
            SetData::Nmru(nmru) => nmru.find(&self.tags, tag),
        }
    }

    /// Membership test that leaves the replacement state untouched.
    #[inline]
    pub fn contains(&self, tag: Tag) -> bool {
        self.way_of(tag).is_some()
    }

    #[inline]
    fn way_of(&self, tag: Tag) -> Option<usize> {
        self.tags.iter().position(|&t| t == Some(tag))
    }

    #[inline]
    pub fn free_slot(&self) -> Option<usize> {
        self.tags.iter().position(Option::is_none)
    }

    /// Installs `tag`, returning the tag it displaced (`None` when a free slot
    /// was used).
    pub fn replace(&mut self, tag: Tag, rng: &mut fastrand::Rng) -> Option<Tag> {
        debug_assert!(!self.contains(tag), "tag {tag:#x} is already resident");
        let way = match self.free_slot() {
            Some(way) => way,
            None => match &self.data {
                SetData::Lru(lru) => lru.victim(),
                SetData::Nmru(nmru) => nmru.victim(rng, self.tags.len()),
            },
        };
        match &mut self.data {
            SetData::Lru(lru) => lru.install(way),
            SetData::Nmru(nmru) => nmru.install(way),
        }
        std::mem::replace(&mut self.tags[way], Some(tag))
    }

    /// Drops `tag` if resident. Returns whether anything was dropped.
    pub fn free(&mut self, tag: Tag) -> bool {
        let Some(way) = self.way_of(tag) else {
            return false;
        };
        self.tags[way] = None;
        match &mut self.data {
            SetData::Lru(lru) => lru.free(way),
            SetData::Nmru(nmru) => nmru.free(way),
        }
        true
    }

    pub fn resident(&self) -> impl Iterator<Item = Tag> + '_ {
        self.tags.iter().filter_map(|&t| t)
    }

    /// Recency counter of a way, LRU sets only.
    pub fn recency(&self, way: usize) -> Option<u32> {
        match &self.data {
            SetData::Lru(lru) => lru.recency(way),
            SetData::Nmru(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_policy() {
        assert_eq!("LRU".parse::<ReplacementPolicy>().unwrap(), ReplacementPolicy::Lru);
        assert_eq!("nmru".parse::<ReplacementPolicy>().unwrap(), ReplacementPolicy::Nmru);
        assert!(matches!(
            "plru".parse::<ReplacementPolicy>(),
            Err(ConfigError::Policy(_))
        ));
    }

    #[test]
    fn inserted_tag_is_found_next() {
        let mut rng = fastrand::Rng::with_seed(1);
        for policy in [ReplacementPolicy::Lru, ReplacementPolicy::Nmru] {
            let mut set = ReplacementSet::new(4, policy);
            for tag in 0..32u64 {
                if !set.find(tag) {
                    set.replace(tag, &mut rng);
                }
                let before: Vec<_> = set.resident().collect();
                assert!(set.find(tag), "{policy}: tag {tag} not found after insert");
                assert_eq!(set.resident().collect::<Vec<_>>(), before);
                assert!(set.resident().count() <= 4);
            }
        }
    }

    #[test]
    fn free_then_reuse_slot() {
        let mut rng = fastrand::Rng::with_seed(1);
        let mut set = ReplacementSet::new(2, ReplacementPolicy::Lru);
        assert_eq!(set.replace(10, &mut rng), None);
        assert_eq!(set.replace(11, &mut rng), None);
        assert_eq!(set.free_slot(), None);
        assert!(set.free(10));
        assert!(!set.free(10));
        assert_eq!(set.free_slot(), Some(0));
        assert_eq!(set.replace(12, &mut rng), None);
        assert!(set.contains(12));
        assert!(set.contains(11));
    }

    #[test]
    fn tag_zero_is_a_real_tag() {
        let mut rng = fastrand::Rng::with_seed(1);
        let mut set = ReplacementSet::new(2, ReplacementPolicy::Lru);
        assert!(!set.find(0));
        set.replace(0, &mut rng);
        assert!(set.find(0));
    }
}
