use log::debug;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use super::{GradientTransform, count_flips, sign};
use crate::{
    OptimErr, Result,
    dtype::{self, AccumDtype},
    tree::{self, ParamTree},
};

/// The state carried between BOP steps: one gradient EMA per parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BopState {
    pub ema: ParamTree,
}

/// The BOP update rule.
///
/// Tracks an exponential moving average of the gradients and, whenever its
/// magnitude clears the `tau` threshold, proposes driving the parameter onto
/// the binary target `sign(-ema)`. The emitted update is `sign(-ema) - w`,
/// so the caller's additive apply step lands the weight on the target; below
/// the threshold the update is zero and the weight is left alone.
#[derive(Debug, Clone)]
pub struct Bop {
    tau: f32,
    gamma: f32,
    accumulator_dtype: AccumDtype,
}

impl Bop {
    /// Creates a new `Bop` transform.
    ///
    /// # Arguments
    /// * `tau` - The threshold compared against the EMA magnitude.
    /// * `gamma` - The decay rate of the gradient EMA.
    /// * `accumulator_dtype` - The precision of the carried EMA, the native
    ///   `f32` when unset.
    ///
    /// # Returns
    /// A new `Bop` instance.
    pub fn new(tau: f32, gamma: f32, accumulator_dtype: Option<AccumDtype>) -> Self {
        let accumulator_dtype = AccumDtype::canonicalize(accumulator_dtype);
        debug!(tau = tau, gamma = gamma; "created bop transform");

        Self {
            tau,
            gamma,
            accumulator_dtype,
        }
    }
}

impl Default for Bop {
    fn default() -> Self {
        Self::new(1e-4, 1e-3, None)
    }
}

impl GradientTransform for Bop {
    type State = BopState;

    fn init(&self, params: &ParamTree) -> BopState {
        let zeros = tree::map(params, |w| ArrayD::zeros(w.raw_dim()));

        BopState {
            ema: dtype::cast_tree(zeros, self.accumulator_dtype),
        }
    }

    fn update(
        &self,
        grads: &ParamTree,
        state: &BopState,
        params: Option<&ParamTree>,
    ) -> Result<(ParamTree, BopState)> {
        let params = params.ok_or(OptimErr::MissingParams)?;
        let (tau, gamma) = (self.tau, self.gamma);

        // A literal EMA, weights summing to 1: new_m = (1 - gamma)*m + gamma*g.
        let new_ema = tree::zip2(("gradients", "ema"), grads, &state.ema, |g, m| {
            (1.0 - gamma) * m + gamma * g
        })?;

        let updates = tree::zip2(("ema", "params"), &new_ema, params, |m, w| {
            if m.abs() > tau { sign(-m) - w } else { 0.0 }
        })?;

        if log::log_enabled!(log::Level::Debug) {
            debug!(flips = count_flips(&updates); "bop step");
        }

        let ema = dtype::cast_tree(new_ema, self.accumulator_dtype);
        Ok((updates, BopState { ema }))
    }
}
