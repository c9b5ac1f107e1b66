use crate::likelihood::Likelihood;
use crate::make_error;
use crate::model::branching_process::Params;
use crate::model::memo::ProbCache;
use argmin::core::observers::{ObserverMode, SlogLogger};
use argmin::core::{CostFunction, Error, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use eyre::{eyre, Report};
use log::log_enabled;
use log::Level::Trace;
use ndarray::{array, Array1};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Box constraints for the fit, `(lower, upper)` per parameter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitBounds {
  pub p: (f64, f64),
  pub q: (f64, f64),
}

impl Default for FitBounds {
  fn default() -> Self {
    Self {
      p: (0.01, 0.99),
      q: (0.001, 0.999),
    }
  }
}

fn expit(x: f64) -> f64 {
  1.0 / (1.0 + (-x).exp())
}

fn logit(y: f64) -> f64 {
  (y / (1.0 - y)).ln()
}

impl FitBounds {
  pub fn validate(&self) -> Result<(), Report> {
    for (lower, upper) in [self.p, self.q] {
      if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) || lower >= upper {
        return make_error!("fit bounds must satisfy 0 <= lower < upper <= 1, got ({lower}, {upper})");
      }
    }
    Ok(())
  }

  /// Map an unconstrained point into the box via a scaled logistic
  /// transform; every point the solver visits stays strictly inside.
  pub(crate) fn to_params(&self, x: &Array1<f64>) -> Result<Params, Report> {
    let p = self.p.0 + (self.p.1 - self.p.0) * expit(x[0]);
    let q = self.q.0 + (self.q.1 - self.q.0) * expit(x[1]);
    Params::new(p, q)
  }

  pub(crate) fn to_unconstrained(&self, params: Params) -> Array1<f64> {
    array![
      logit((params.p() - self.p.0) / (self.p.1 - self.p.0)),
      logit((params.q() - self.q.0) / (self.q.1 - self.q.0)),
    ]
  }

  /// Diagonal Jacobian of the box transform at `x`.
  fn jacobian(&self, x: &Array1<f64>) -> [f64; 2] {
    let sp = expit(x[0]);
    let sq = expit(x[1]);
    [
      (self.p.1 - self.p.0) * sp * (1.0 - sp),
      (self.q.1 - self.q.0) * sq * (1.0 - sq),
    ]
  }
}

/// Negated log-likelihood over the unconstrained search space. The memo
/// cache is injected by the caller; the lock adapts it to the solver's
/// shared-reference calling convention.
struct NegativeLogLikelihood<'a, L: Likelihood + ?Sized> {
  likelihood: &'a L,
  bounds: FitBounds,
  cache: Mutex<&'a mut ProbCache>,
}

impl<L: Likelihood + ?Sized> NegativeLogLikelihood<'_, L> {
  fn evaluate(&self, x: &Array1<f64>) -> Result<(f64, Array1<f64>), Error> {
    let params = self.bounds.to_params(x).map_err(Error::msg)?;
    let ll = {
      let mut guard = self.cache.lock();
      self
        .likelihood
        .log_likelihood(params, &mut **guard)
        .map_err(Error::msg)?
    };
    let jacobian = self.bounds.jacobian(x);
    Ok((-ll.value, array![-ll.dp * jacobian[0], -ll.dq * jacobian[1]]))
  }
}

impl<L: Likelihood + ?Sized> CostFunction for NegativeLogLikelihood<'_, L> {
  type Param = Array1<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> Result<Self::Output, Error> {
    Ok(self.evaluate(x)?.0)
  }
}

impl<L: Likelihood + ?Sized> Gradient for NegativeLogLikelihood<'_, L> {
  type Param = Array1<f64>;
  type Gradient = Array1<f64>;

  fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient, Error> {
    Ok(self.evaluate(x)?.1)
  }
}

pub(crate) struct MinimizeOutcome {
  pub params: Params,
  pub cost: f64,
  pub iterations: u64,
  pub converged: bool,
  pub message: String,
}

/// Minimize the negative log-likelihood over the box with L-BFGS behind the
/// logistic reparameterization. Solver failures are reported as a
/// non-converged outcome rather than an error.
pub(crate) fn minimize_bounded<L: Likelihood + ?Sized>(
  likelihood: &L,
  cache: &mut ProbCache,
  bounds: FitBounds,
  init: Params,
  max_iters: u64,
  cost_tolerance: f64,
) -> Result<MinimizeOutcome, Report> {
  let x0 = bounds.to_unconstrained(init);
  let problem = NegativeLogLikelihood {
    likelihood,
    bounds,
    cache: Mutex::new(cache),
  };
  let linesearch = MoreThuenteLineSearch::new();
  let solver = LBFGS::new(linesearch, 7)
    .with_tolerance_cost(cost_tolerance)
    .map_err(|err| eyre!("{err}"))?;

  let mut executor = Executor::new(problem, solver).configure(|state| state.param(x0).max_iters(max_iters));
  if log_enabled!(Trace) {
    executor = executor.add_observer(SlogLogger::term_noblock(), ObserverMode::NewBest);
  }

  match executor.run() {
    Ok(result) => {
      let state = result.state();
      let best = state
        .get_best_param()
        .ok_or_else(|| eyre!("optimizer terminated without best parameters"))?;
      let params = bounds.to_params(best)?;
      let cost = state.get_best_cost();
      let iterations = state.get_iter();
      let message = state
        .get_termination_reason()
        .map_or_else(|| "terminated without a reason".to_owned(), |reason| format!("{reason:?}"));
      Ok(MinimizeOutcome {
        params,
        cost,
        iterations,
        converged: cost.is_finite() && iterations < max_iters,
        message,
      })
    }
    Err(err) => Ok(MinimizeOutcome {
      params: init,
      cost: f64::INFINITY,
      iterations: 0,
      converged: false,
      message: format!("{err}"),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;

  #[test]
  fn test_bounds_transform_round_trips() {
    let bounds = FitBounds::default();
    let params = Params::new(0.37, 0.62).unwrap();
    let x = bounds.to_unconstrained(params);
    let restored = bounds.to_params(&x).unwrap();
    assert_abs_diff_eq!(restored.p(), params.p(), epsilon = 1e-12);
    assert_abs_diff_eq!(restored.q(), params.q(), epsilon = 1e-12);
  }

  #[test]
  fn test_transformed_points_stay_inside_the_box() {
    let bounds = FitBounds::default();
    for x in [-50.0, -1.0, 0.0, 1.0, 50.0] {
      let params = bounds.to_params(&array![x, -x]).unwrap();
      assert!((bounds.p.0..=bounds.p.1).contains(&params.p()));
      assert!((bounds.q.0..=bounds.q.1).contains(&params.q()));
    }
  }

  #[test]
  fn test_bounds_validation_rejects_inverted_or_escaping_boxes() {
    let inverted = FitBounds {
      p: (0.9, 0.1),
      ..FitBounds::default()
    };
    assert!(inverted.validate().is_err());
    let escaping = FitBounds {
      q: (0.0, 1.5),
      ..FitBounds::default()
    };
    assert!(escaping.validate().is_err());
    assert!(FitBounds::default().validate().is_ok());
  }
}
