use crate::make_error;
use crate::model::memo::ProbCache;
use eyre::Report;
use getset::CopyGetters;
use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Branching probability `p` and mutation probability `q`, both in the unit
/// interval. Under `p`, a node splits into two offspring rather than
/// terminating as a clone leaf; under `q`, a given offspring branch founds a
/// mutant clade rather than continuing the clone.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct Params {
  p: f64,
  q: f64,
}

impl Params {
  pub fn new(p: f64, q: f64) -> Result<Self, Report> {
    if !(0.0..=1.0).contains(&p) || !(0.0..=1.0).contains(&q) {
      return make_error!("p and q must be in the unit interval, got p={p} and q={q}");
    }
    Ok(Self { p, q })
  }
}

/// Outcome of one collapsed genealogy node: the founder's clonal line
/// terminates in `clones` leaves of the founder type and sheds `mutants`
/// mutant clades.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct Progeny {
  clones: usize,
  mutants: usize,
}

impl Progeny {
  pub fn new(clones: usize, mutants: usize) -> Result<Self, Report> {
    if clones + mutants == 0 {
      return make_error!("progeny counts must sum to at least one");
    }
    Ok(Self { clones, mutants })
  }
}

/// Probability of a progeny outcome, with partial derivatives wrt `p` and `q`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgenyProb {
  pub value: f64,
  pub dp: f64,
  pub dq: f64,
}

/// Joint probability of observing `progeny` below one founder under `params`,
/// and its gradient, by dynamic programming over the recursive decomposition
/// of the process: either one mutant clade is peeled off the founder's two
/// branches (factor `2pq(1-q)`), or both branches remain clonal (factor
/// `p(1-q)^2`) and the two subtrees split the remaining counts between them.
///
/// The decomposition is specific to the collapsed process; the base cases and
/// the splitting rule must stay exactly as written.
pub fn progeny_prob(params: Params, progeny: Progeny, cache: &mut ProbCache) -> ProgenyProb {
  if let Some(cached) = cache.get(params, progeny) {
    return cached;
  }
  let (p, q) = (params.p, params.q);
  let (c, m) = (progeny.clones, progeny.mutants);
  let result = if c == 0 && m <= 1 {
    // the process cannot stop with nothing, and a lone unresolved mutant
    // clade is not a terminal state
    ProgenyProb::default()
  } else if c == 1 && m == 0 {
    ProgenyProb {
      value: 1.0 - p,
      dp: -1.0,
      dq: 0.0,
    }
  } else if c == 0 && m == 2 {
    ProgenyProb {
      value: p * q * q,
      dp: q * q,
      dq: 2.0 * p * q,
    }
  } else {
    let mut value = 0.0;
    let mut dp = 0.0;
    let mut dq = 0.0;
    if m >= 1 {
      let peeled = progeny_prob(
        params,
        Progeny {
          clones: c,
          mutants: m - 1,
        },
        cache,
      );
      value += 2.0 * p * q * (1.0 - q) * peeled.value;
      dp += 2.0 * q * (1.0 - q) * peeled.value + 2.0 * p * q * (1.0 - q) * peeled.dp;
      dq += (2.0 * p - 4.0 * p * q) * peeled.value + 2.0 * p * q * (1.0 - q) * peeled.dq;
    }
    for cx in 0..=c {
      for mx in 0..=m {
        if (cx == 0 && mx == 0) || (cx == c && mx == m) {
          continue;
        }
        let left = progeny_prob(
          params,
          Progeny {
            clones: cx,
            mutants: mx,
          },
          cache,
        );
        let right = progeny_prob(
          params,
          Progeny {
            clones: c - cx,
            mutants: m - mx,
          },
          cache,
        );
        value += p * (1.0 - q) * (1.0 - q) * left.value * right.value;
        dp += (1.0 - q) * (1.0 - q) * left.value * right.value
          + p * (1.0 - q) * (1.0 - q) * (left.dp * right.value + left.value * right.dp);
        dq += -2.0 * p * (1.0 - q) * left.value * right.value
          + p * (1.0 - q) * (1.0 - q) * (left.dq * right.value + left.value * right.dq);
      }
    }
    ProgenyProb { value, dp, dq }
  };
  cache.insert(params, progeny, result);
  result
}

/// Stochastic rollout of the process below one founder. Each pending clonal
/// node either branches (probability `p`, each branch independently mutant
/// with probability `q`) or terminates as a clone leaf; mutant clades
/// terminate immediately in this view.
pub fn simulate_progeny<R: Rng>(params: Params, rng: &mut R) -> Progeny {
  if params.p >= 0.5 {
    warn!("p >= 0.5 is not subcritical, tree simulations are not guaranteed to terminate");
  }
  let mut clones = 0;
  let mut mutants = 0;
  let mut pending: usize = 1;
  while pending > 0 {
    pending -= 1;
    if rng.gen::<f64>() < params.p {
      let new_mutants = (0..2).filter(|_| rng.gen::<f64>() < params.q).count();
      mutants += new_mutants;
      pending += 2 - new_mutants;
    } else {
      clones += 1;
    }
  }
  Progeny { clones, mutants }
}

/// Generating function of the offspring distribution, `(1-p) + p x^2`.
pub fn offspring_pgf(params: Params, x: f64) -> f64 {
  1.0 - params.p + params.p * x * x
}

/// Survival function of the extinction time of the uncollapsed process: the
/// probability that the lineage is still alive after `generations`
/// generations, from the iterated generating function.
pub fn extinction_survival(params: Params, generations: usize) -> f64 {
  let mut x = 0.0;
  for _ in 0..generations {
    x = offspring_pgf(params, x);
  }
  1.0 - x
}
