use crate::likelihood::{Likelihood, LogLikelihood};
use crate::model::branching_process::Params;
use crate::model::memo::ProbCache;
use crate::optimize::fit::{fit, FitOptions, FitResult};
use crate::tree::collapsed_tree::CollapsedTree;
use crate::{make_error, make_report};
use eyre::Report;
use itertools::Itertools;
use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How per-tree likelihoods combine into a forest likelihood.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
  /// Trees are independent realizations of the process: log-likelihoods add.
  #[default]
  Independent,
  /// Trees are alternative reconstructions of one observation: the forest
  /// likelihood is the mean of the per-tree likelihoods, so correlated
  /// reconstructions are marginalized instead of double-counted.
  Mixture,
}

/// A set of collapsed trees sharing one parameter pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollapsedForest {
  params: Option<Params>,
  n_trees: usize,
  trees: Vec<CollapsedTree>,
  aggregation: Aggregation,
}

/// Per-tree summary used to rank alternative genealogies under one fitted
/// parameter pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeScore {
  pub index: usize,
  pub total_frequency: usize,
  pub alleles: usize,
  pub log_likelihood: f64,
}

impl CollapsedForest {
  /// Forest of `n_trees` trees to be filled in by `simulate`.
  pub fn from_params(params: Params, n_trees: usize) -> Result<Self, Report> {
    if n_trees < 1 {
      return make_error!("a forest must contain at least one tree, got n_trees={n_trees}");
    }
    Ok(Self {
      params: Some(params),
      n_trees,
      trees: vec![],
      aggregation: Aggregation::default(),
    })
  }

  /// Forest of observed trees, to be fitted.
  pub fn from_trees(trees: Vec<CollapsedTree>) -> Result<Self, Report> {
    if trees.is_empty() {
      return make_error!("a forest must contain at least one tree");
    }
    Ok(Self {
      params: None,
      n_trees: trees.len(),
      trees,
      aggregation: Aggregation::default(),
    })
  }

  pub fn params(&self) -> Option<Params> {
    self.params
  }

  pub fn n_trees(&self) -> usize {
    self.n_trees
  }

  pub fn trees(&self) -> &[CollapsedTree] {
    &self.trees
  }

  pub fn aggregation(&self) -> Aggregation {
    self.aggregation
  }

  pub fn set_aggregation(&mut self, aggregation: Aggregation) {
    self.aggregation = aggregation;
  }

  /// Replace the forest with `n_trees` independently simulated trees.
  pub fn simulate<R: Rng>(&mut self, rng: &mut R) -> Result<(), Report> {
    let params = self
      .params
      .ok_or_else(|| make_report!("p and q must be set before simulation"))?;
    let mut trees = Vec::with_capacity(self.n_trees);
    for _ in 0..self.n_trees {
      let mut tree = CollapsedTree::from_params(params);
      tree.simulate(rng)?;
      trees.push(tree);
    }
    self.trees = trees;
    Ok(())
  }

  /// Forest log-likelihood under an explicit aggregation mode.
  pub fn log_likelihood_with(
    &self,
    params: Params,
    cache: &mut ProbCache,
    aggregation: Aggregation,
  ) -> Result<LogLikelihood, Report> {
    if self.trees.is_empty() {
      return make_error!("forest data must be set to compute a likelihood");
    }
    let mut terms = Vec::with_capacity(self.trees.len());
    for tree in &self.trees {
      terms.push(tree.log_likelihood(params, cache)?);
    }
    match aggregation {
      Aggregation::Independent => Ok(terms.iter().fold(LogLikelihood::default(), |acc, term| acc + term)),
      Aggregation::Mixture => Ok(log_mean_exp(&terms)),
    }
  }

  /// Fit `(p, q)` by maximum likelihood over the forest's aggregate
  /// likelihood; same contract as the single-tree fit.
  pub fn fit<R: Rng>(&mut self, options: &FitOptions, cache: &mut ProbCache, rng: &mut R) -> Result<FitResult, Report> {
    let result = fit(&*self, options, cache, rng)?;
    if !result.success {
      warn!("maximum likelihood fit did not converge: {}", result.message);
    } else if self.params.is_none() {
      self.params = Some(result.params);
    }
    Ok(result)
  }

  /// Score every tree at `params` and rank by descending log-likelihood.
  pub fn score_trees(&self, params: Params, cache: &mut ProbCache) -> Result<Vec<TreeScore>, Report> {
    let mut scores = Vec::with_capacity(self.trees.len());
    for (index, collapsed) in self.trees.iter().enumerate() {
      let tree = collapsed
        .tree()
        .ok_or_else(|| make_report!("tree {index} has no tree data to score"))?;
      let ll = collapsed.log_likelihood(params, cache)?;
      scores.push(TreeScore {
        index,
        total_frequency: tree.total_frequency(),
        alleles: tree.len(),
        log_likelihood: ll.value,
      });
    }
    scores.sort_by(|a, b| {
      b.log_likelihood
        .total_cmp(&a.log_likelihood)
        .then(a.index.cmp(&b.index))
    });
    Ok(scores)
  }
}

impl Likelihood for CollapsedForest {
  fn log_likelihood(&self, params: Params, cache: &mut ProbCache) -> Result<LogLikelihood, Report> {
    self.log_likelihood_with(params, cache, self.aggregation)
  }
}

/// Numerically stable log-mean-exp over per-tree likelihoods; the gradient
/// is the likelihood-weighted mean of the per-tree gradients.
fn log_mean_exp(terms: &[LogLikelihood]) -> LogLikelihood {
  let max = terms.iter().map(|term| term.value).fold(f64::NEG_INFINITY, f64::max);
  if !max.is_finite() {
    // every tree has zero likelihood
    return LogLikelihood {
      value: f64::NEG_INFINITY,
      dp: 0.0,
      dq: 0.0,
    };
  }
  let weights = terms.iter().map(|term| (term.value - max).exp()).collect_vec();
  let sum: f64 = weights.iter().sum();
  LogLikelihood {
    value: max + (sum / terms.len() as f64).ln(),
    dp: terms.iter().zip(&weights).map(|(term, w)| w * term.dp).sum::<f64>() / sum,
    dq: terms.iter().zip(&weights).map(|(term, w)| w * term.dq).sum::<f64>() / sum,
  }
}
