use super::Tag;

/// Not-most-recently-used: evict a random way other than the last one used.
#[derive(Debug, Clone)]
pub struct NmruSetData {
    mru_way: usize,
}

impl NmruSetData {
    pub fn new(_n_ways: usize) -> Self {
        NmruSetData { mru_way: 0 }
    }

    pub(super) fn find(&mut self, tags: &[Option<Tag>], tag: Tag) -> bool {
        match tags.iter().position(|&t| t == Some(tag)) {
            Some(way) => {
                self.mru_way = way;
                true
            }
            None => false,
        }
    }

    pub(super) fn victim(&self, rng: &mut fastrand::Rng, n_ways: usize) -> usize {
        if n_ways == 1 {
            return 0;
        }
        let mut victim_way = rng.usize(0..(n_ways - 1));
        if victim_way >= self.mru_way {
            victim_way += 1;
        }
        victim_way
    }

    pub(super) fn install(&mut self, way: usize) {
        self.mru_way = way;
    }

    pub(super) fn free(&mut self, _way: usize) {}
}
