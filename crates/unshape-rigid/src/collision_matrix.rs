//! Pair bookkeeping across steps: which bodies touched, and when overlaps began or ended.

/// Symmetric boolean matrix over body indices, stored as a lower triangle.
#[derive(Debug, Clone, Default)]
pub struct ArrayCollisionMatrix {
    n: usize,
    bits: Vec<bool>,
}

impl ArrayCollisionMatrix {
    pub fn new(n: usize) -> Self {
        let mut m = Self::default();
        m.set_num_objects(n);
        m
    }

    fn slot(i: usize, j: usize) -> usize {
        let (hi, lo) = if i > j { (i, j) } else { (j, i) };
        hi * (hi + 1) / 2 + lo
    }

    pub fn get(&self, i: usize, j: usize) -> bool {
        self.bits.get(Self::slot(i, j)).copied().unwrap_or(false)
    }

    pub fn set(&mut self, i: usize, j: usize, value: bool) {
        if let Some(b) = self.bits.get_mut(Self::slot(i, j)) {
            *b = value;
        }
    }

    /// Clears every entry.
    pub fn reset(&mut self) {
        self.bits.fill(false);
    }

    /// Resizes for `n` objects. Entries between surviving indices are kept.
    pub fn set_num_objects(&mut self, n: usize) {
        self.n = n;
        self.bits.resize(n * (n + 1) / 2, false);
    }

    pub fn num_objects(&self) -> usize {
        self.n
    }

    /// Drops row and column `k`, shifting later indices down by one.
    pub fn remove_index(&mut self, k: usize) {
        if k >= self.n {
            return;
        }
        let old = std::mem::take(self);
        self.set_num_objects(old.n - 1);
        let shift = |i: usize| if i >= k { i + 1 } else { i };
        for i in 0..self.n {
            for j in 0..=i {
                let v = old.get(shift(i), shift(j));
                self.set(i, j, v);
            }
        }
    }
}

/// Tracks which id pairs overlap this step versus the last.
#[derive(Debug, Clone, Default)]
pub struct OverlapKeeper {
    current: Vec<u64>,
    previous: Vec<u64>,
}

fn pair_key(i: u32, j: u32) -> u64 {
    let (lo, hi) = if i < j { (i, j) } else { (j, i) };
    (u64::from(hi) << 32) | u64::from(lo)
}

fn unpack(key: u64) -> (u32, u32) {
    ((key & 0xffff_ffff) as u32, (key >> 32) as u32)
}

impl OverlapKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an overlap for this step.
    pub fn set(&mut self, i: u32, j: u32) {
        let key = pair_key(i, j);
        if let Err(pos) = self.current.binary_search(&key) {
            self.current.insert(pos, key);
        }
    }

    pub fn contains(&self, i: u32, j: u32) -> bool {
        self.current.binary_search(&pair_key(i, j)).is_ok()
    }

    /// Starts a new step: current becomes previous.
    pub fn tick(&mut self) {
        std::mem::swap(&mut self.current, &mut self.previous);
        self.current.clear();
    }

    /// Pairs that started (`additions`) or stopped (`removals`) overlapping.
    /// Each pair is reported with the smaller id first.
    pub fn diff(&self, additions: &mut Vec<(u32, u32)>, removals: &mut Vec<(u32, u32)>) {
        additions.clear();
        removals.clear();
        sorted_difference(&self.current, &self.previous, additions);
        sorted_difference(&self.previous, &self.current, removals);
    }

    /// Forgets every pair involving `id`.
    pub fn remove_id(&mut self, id: u32) {
        let keep = |k: &u64| {
            let (a, b) = unpack(*k);
            a != id && b != id
        };
        self.current.retain(keep);
        self.previous.retain(keep);
    }
}

/// Keys in `a` but not in `b`; both sorted.
fn sorted_difference(a: &[u64], b: &[u64], out: &mut Vec<(u32, u32)>) {
    let mut j = 0;
    for &key in a {
        while j < b.len() && b[j] < key {
            j += 1;
        }
        if j >= b.len() || b[j] != key {
            out.push(unpack(key));
        }
    }
}
