use crate::likelihood::{Likelihood, LogLikelihood};
use crate::make_report;
use crate::model::branching_process::{progeny_prob, simulate_progeny, Params, Progeny};
use crate::model::memo::ProbCache;
use crate::optimize::fit::{fit, FitOptions, FitResult};
use crate::tree::collapse::collapse_zero_edges;
use crate::tree::phylo_tree::{NodeId, PhyloTree};
use eyre::{Report, WrapErr};
use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A genealogy with all zero-length edges merged away, scored under the
/// collapsed branching process: every node contributes the probability of
/// its `(frequency, number of children)` outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollapsedTree {
  params: Option<Params>,
  tree: Option<PhyloTree>,
}

impl CollapsedTree {
  /// Wrap an annotated genealogy, collapsing it on construction.
  pub fn from_tree(tree: &PhyloTree) -> Self {
    Self {
      params: None,
      tree: Some(collapse_zero_edges(tree)),
    }
  }

  /// Parameters only; the tree is filled in by `simulate`.
  pub fn from_params(params: Params) -> Self {
    Self {
      params: Some(params),
      tree: None,
    }
  }

  pub fn params(&self) -> Option<Params> {
    self.params
  }

  pub fn tree(&self) -> Option<&PhyloTree> {
    self.tree.as_ref()
  }

  /// Replace the wrapped genealogy with one simulated under the current
  /// parameters.
  pub fn simulate<R: Rng>(&mut self, rng: &mut R) -> Result<(), Report> {
    let params = self
      .params
      .ok_or_else(|| make_report!("p and q must be set before simulation"))?;
    self.tree = Some(simulate_collapsed_tree(params, rng));
    Ok(())
  }

  /// Fit `(p, q)` by maximum likelihood. Non-convergence is a warning, not
  /// an error; the fitted values are adopted only when no parameters were
  /// set beforehand and the optimization succeeded.
  pub fn fit<R: Rng>(&mut self, options: &FitOptions, cache: &mut ProbCache, rng: &mut R) -> Result<FitResult, Report> {
    let result = fit(&*self, options, cache, rng)?;
    if !result.success {
      warn!("maximum likelihood fit did not converge: {}", result.message);
    } else if self.params.is_none() {
      self.params = Some(result.params);
    }
    Ok(result)
  }
}

impl Likelihood for CollapsedTree {
  fn log_likelihood(&self, params: Params, cache: &mut ProbCache) -> Result<LogLikelihood, Report> {
    let tree = self
      .tree
      .as_ref()
      .ok_or_else(|| make_report!("tree data must be set to compute a likelihood"))?;
    let mut total = LogLikelihood::default();
    for (index, id) in tree.preorder().into_iter().enumerate() {
      let node = tree.node(id);
      let progeny = Progeny::new(node.frequency, node.children.len())
        .wrap_err_with(|| format!("when scoring node '{}'", node.name))?;
      let prob = progeny_prob(params, progeny, cache);
      if index == 0 && progeny.clones() == 0 && progeny.mutants() == 1 && prob.value == 0.0 {
        warn!("unifurcation from the root is impossible under the model, omitting the root node from the likelihood");
        continue;
      }
      total += LogLikelihood {
        value: prob.value.ln(),
        dp: prob.dp / prob.value,
        dq: prob.dq / prob.value,
      };
    }
    Ok(total)
  }
}

/// Build a collapsed tree top-down with an explicit work stack: each task
/// draws a progeny outcome for one founder and attaches one child subtree
/// per mutant clade. Simulated nodes carry no sequences and unit branch
/// lengths.
pub fn simulate_collapsed_tree<R: Rng>(params: Params, rng: &mut R) -> PhyloTree {
  let progeny = simulate_progeny(params, rng);
  let mut tree = PhyloTree::with_root("", "", progeny.clones());
  let mut stack: Vec<(NodeId, usize)> = vec![(tree.root(), progeny.mutants())];
  while let Some((parent, mutants)) = stack.pop() {
    for _ in 0..mutants {
      let child_progeny = simulate_progeny(params, rng);
      let child = tree.add_child(parent, "", "", child_progeny.clones(), 1.0);
      stack.push((child, child_progeny.mutants()));
    }
  }
  tree
}
