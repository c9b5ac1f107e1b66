use crate::likelihood::Likelihood;
use crate::model::branching_process::Params;
use crate::model::memo::ProbCache;
use crate::optimize::minimize::{minimize_bounded, FitBounds};
use eyre::Report;
use rand::Rng;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Settings for the maximum likelihood fit.
#[derive(Clone, Copy, Debug, PartialEq, SmartDefault, Serialize, Deserialize)]
pub struct FitOptions {
  pub bounds: FitBounds,
  #[default(1000)]
  pub max_iters: u64,
  #[default(1e-10)]
  pub cost_tolerance: f64,
}

/// Outcome of one maximum likelihood fit.
#[must_use]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
  pub success: bool,
  pub params: Params,
  pub cost: f64,
  pub iterations: u64,
  pub message: String,
}

/// Maximum likelihood estimate of `(p, q)` for anything implementing
/// `Likelihood`: minimize the negative log-likelihood with its analytic
/// gradient over the box constraints, starting from a random interior point
/// drawn from the injected generator.
pub fn fit<L, R>(likelihood: &L, options: &FitOptions, cache: &mut ProbCache, rng: &mut R) -> Result<FitResult, Report>
where
  L: Likelihood + ?Sized,
  R: Rng,
{
  options.bounds.validate()?;
  let init = random_initial_params(&options.bounds, rng)?;

  // surface missing data and malformed trees eagerly, before the solver runs
  likelihood.log_likelihood(init, cache)?;

  let outcome = minimize_bounded(
    likelihood,
    cache,
    options.bounds,
    init,
    options.max_iters,
    options.cost_tolerance,
  )?;
  Ok(FitResult {
    success: outcome.converged,
    params: outcome.params,
    cost: outcome.cost,
    iterations: outcome.iterations,
    message: outcome.message,
  })
}

fn random_initial_params<R: Rng>(bounds: &FitBounds, rng: &mut R) -> Result<Params, Report> {
  let p = rng.gen_range(bounds.p.0..bounds.p.1);
  let q = rng.gen_range(bounds.q.0..bounds.q.1);
  Params::new(p, q)
}
