use crate::model::branching_process::{Params, Progeny, ProgenyProb};
use std::collections::HashMap;

/// Memo key for one probability evaluation. Parameters are keyed by their
/// exact bit patterns, so numerically identical inputs always hit the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
  p_bits: u64,
  q_bits: u64,
  clones: usize,
  mutants: usize,
}

impl CacheKey {
  fn new(params: Params, progeny: Progeny) -> Self {
    Self {
      p_bits: params.p().to_bits(),
      q_bits: params.q().to_bits(),
      clones: progeny.clones(),
      mutants: progeny.mutants(),
    }
  }
}

/// Write-once memo table for progeny probabilities. The recursion in
/// `progeny_prob` is exponential without it. Entries are pure functions of
/// their key and are never invalidated.
#[derive(Clone, Debug, Default)]
pub struct ProbCache {
  entries: HashMap<CacheKey, ProgenyProb>,
}

impl ProbCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, params: Params, progeny: Progeny) -> Option<ProgenyProb> {
    self.entries.get(&CacheKey::new(params, progeny)).copied()
  }

  pub fn insert(&mut self, params: Params, progeny: Progeny, prob: ProgenyProb) {
    self.entries.insert(CacheKey::new(params, progeny), prob);
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
