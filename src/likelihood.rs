use crate::model::branching_process::Params;
use crate::model::memo::ProbCache;
use auto_ops::impl_op_ex;
use eyre::Report;
use ndarray::{array, Array1};
use serde::{Deserialize, Serialize};

/// Log-likelihood value together with its gradient wrt `(p, q)`.
#[must_use]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogLikelihood {
  pub value: f64,
  pub dp: f64,
  pub dq: f64,
}

impl LogLikelihood {
  pub fn gradient(&self) -> Array1<f64> {
    array![self.dp, self.dq]
  }
}

impl_op_ex!(+|a: &LogLikelihood, b: &LogLikelihood| -> LogLikelihood {
  LogLikelihood {
    value: a.value + b.value,
    dp: a.dp + b.dp,
    dq: a.dq + b.dq,
  }
});

impl_op_ex!(+= |a: &mut LogLikelihood, b: &LogLikelihood| {
  a.value += b.value;
  a.dp += b.dp;
  a.dq += b.dq;
});

/// Shared scoring interface of collapsed trees and forests: one parameter
/// pair in, log-likelihood and analytic gradient out. The fit driver
/// operates on this interface alone.
pub trait Likelihood {
  fn log_likelihood(&self, params: Params, cache: &mut ProbCache) -> Result<LogLikelihood, Report>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn test_log_likelihoods_add_componentwise() {
    let a = LogLikelihood {
      value: -1.0,
      dp: 0.5,
      dq: -0.25,
    };
    let b = LogLikelihood {
      value: -2.0,
      dp: 1.5,
      dq: 0.75,
    };
    let mut sum = a;
    sum += b;
    assert_eq!(sum, a + b);
    assert_eq!(
      sum,
      LogLikelihood {
        value: -3.0,
        dp: 2.0,
        dq: 0.5
      }
    );
  }

  #[test]
  fn test_gradient_is_a_two_vector() {
    let ll = LogLikelihood {
      value: 0.0,
      dp: 3.0,
      dq: 4.0,
    };
    assert_eq!(ll.gradient(), array![3.0, 4.0]);
  }
}
