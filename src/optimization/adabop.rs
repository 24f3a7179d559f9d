use log::debug;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use super::{GradientTransform, count_flips, sign};
use crate::{
    OptimErr, Result,
    dtype::{self, AccumDtype},
    tree::{self, ParamTree},
};

/// The state carried between AdaBOP steps: a gradient EMA and a running
/// variance estimate per parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdabopState {
    pub ema: ParamTree,
    pub ema_var: ParamTree,
}

/// The AdaBOP update rule.
///
/// Like [`Bop`](super::Bop), but the decision boundary is scaled per
/// parameter by the locally estimated standard deviation of the gradient:
/// the sign flips only when `|ema| > tau * sqrt(ema_var)`. The variance
/// estimate is an EMA of the squared deviation of the raw gradient from the
/// mean estimate updated in the same step.
#[derive(Debug, Clone)]
pub struct Adabop {
    tau: f32,
    gamma1: f32,
    gamma2: f32,
    std_prior: f32,
    accumulator_dtype: AccumDtype,
}

impl Adabop {
    /// Creates a new `Adabop` transform.
    ///
    /// # Arguments
    /// * `tau` - The threshold scale applied to the local standard deviation.
    /// * `gamma1` - The decay rate of the gradient EMA.
    /// * `gamma2` - The decay rate of the variance EMA.
    /// * `std_prior` - The initial variance estimate.
    /// * `accumulator_dtype` - The precision of the carried accumulators,
    ///   the native `f32` when unset.
    ///
    /// # Returns
    /// A new `Adabop` instance.
    pub fn new(
        tau: f32,
        gamma1: f32,
        gamma2: f32,
        std_prior: f32,
        accumulator_dtype: Option<AccumDtype>,
    ) -> Self {
        let accumulator_dtype = AccumDtype::canonicalize(accumulator_dtype);
        debug!(
            tau = tau,
            gamma1 = gamma1,
            gamma2 = gamma2,
            std_prior = std_prior;
            "created adabop transform"
        );

        Self {
            tau,
            gamma1,
            gamma2,
            std_prior,
            accumulator_dtype,
        }
    }
}

impl Default for Adabop {
    fn default() -> Self {
        Self::new(1e-4, 1e-3, 1e-3, 0.0, None)
    }
}

impl GradientTransform for Adabop {
    type State = AdabopState;

    fn init(&self, params: &ParamTree) -> AdabopState {
        let std_prior = self.std_prior;
        let zeros = tree::map(params, |w| ArrayD::zeros(w.raw_dim()));
        let priors = tree::map(params, |w| ArrayD::from_elem(w.raw_dim(), std_prior));

        AdabopState {
            ema: dtype::cast_tree(zeros, self.accumulator_dtype),
            ema_var: dtype::cast_tree(priors, self.accumulator_dtype),
        }
    }

    fn update(
        &self,
        grads: &ParamTree,
        state: &AdabopState,
        params: Option<&ParamTree>,
    ) -> Result<(ParamTree, AdabopState)> {
        let params = params.ok_or(OptimErr::MissingParams)?;
        let (tau, gamma1, gamma2) = (self.tau, self.gamma1, self.gamma2);

        let new_ema = tree::zip2(("gradients", "ema"), grads, &state.ema, |g, m| {
            (1.0 - gamma1) * m + gamma1 * g
        })?;

        // The deviation is taken against the mean updated in this same step,
        // not the previous one.
        let new_ema_var = tree::zip3(
            ("gradients", "ema", "ema_var"),
            grads,
            &new_ema,
            &state.ema_var,
            |g, m, v| (1.0 - gamma2) * v + gamma2 * (g - m).powi(2),
        )?;

        let updates = tree::zip3(
            ("ema", "ema_var", "params"),
            &new_ema,
            &new_ema_var,
            params,
            |m, v, w| {
                if m.abs() > tau * v.sqrt() {
                    sign(-m) - w
                } else {
                    0.0
                }
            },
        )?;

        if log::log_enabled!(log::Level::Debug) {
            debug!(flips = count_flips(&updates); "adabop step");
        }

        let ema = dtype::cast_tree(new_ema, self.accumulator_dtype);
        let ema_var = dtype::cast_tree(new_ema_var, self.accumulator_dtype);
        Ok((updates, AdabopState { ema, ema_var }))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;

    fn tree_of(entries: &[(&str, &[f32])]) -> ParamTree {
        entries
            .iter()
            .map(|(name, vals)| (name.to_string(), arr1(vals).into_dyn()))
            .collect()
    }

    #[test]
    fn test_init_sets_the_variance_prior() {
        let adabop = Adabop::new(1e-4, 1e-3, 1e-3, 2.0, None);
        let params = tree_of(&[("w", &[0.0])]);
        let state = adabop.init(&params);

        assert_eq!(state.ema, tree_of(&[("w", &[0.0])]));
        assert_eq!(state.ema_var, tree_of(&[("w", &[2.0])]));
    }

    #[test]
    fn test_variance_uses_the_post_update_mean() {
        // With gamma1 = 0.5, gamma2 = 0.25 and a constant unit gradient, all
        // intermediates are dyadic, so the recurrence is exact in f32.
        //
        // step 1: m = 0.5,  v = 0.25 * (1 - 0.5)^2            = 0.0625
        // step 2: m = 0.75, v = 0.75 * 0.0625 + 0.25 * 0.25^2 = 0.0625
        //
        // A stale-mean variant would give v = 0.25 * (1 - 0)^2 = 0.25 on the
        // first step instead.
        let adabop = Adabop::new(1e6, 0.5, 0.25, 0.0, None);
        let params = tree_of(&[("w", &[0.0])]);
        let grads = tree_of(&[("w", &[1.0])]);
        let mut state = adabop.init(&params);

        (_, state) = adabop.update(&grads, &state, Some(&params)).unwrap();
        assert_eq!(state.ema, tree_of(&[("w", &[0.5])]));
        assert_eq!(state.ema_var, tree_of(&[("w", &[0.0625])]));

        (_, state) = adabop.update(&grads, &state, Some(&params)).unwrap();
        assert_eq!(state.ema, tree_of(&[("w", &[0.75])]));
        assert_eq!(state.ema_var, tree_of(&[("w", &[0.0625])]));
    }

    #[test]
    fn test_variance_decays_under_a_constant_gradient() {
        // The residual is detrended: as the mean converges onto the constant
        // gradient, the squared deviation vanishes and the variance decays.
        let adabop = Adabop::new(1e6, 0.2, 0.2, 1.0, None);
        let params = tree_of(&[("w", &[0.0])]);
        let grads = tree_of(&[("w", &[1.0])]);
        let mut state = adabop.init(&params);

        let mut prev_var = f32::MAX;
        for _ in 0..100 {
            (_, state) = adabop.update(&grads, &state, Some(&params)).unwrap();
            let var = state.ema_var["w"][0];
            assert!(var < prev_var);
            prev_var = var;
        }

        assert!(prev_var < 1e-3);
    }

    #[test]
    fn test_large_variance_suppresses_flips() {
        let adabop = Adabop::new(0.1, 1.0, 1e-3, 1e6, None);
        let params = tree_of(&[("w", &[0.5])]);
        let grads = tree_of(&[("w", &[1.0])]);
        let state = adabop.init(&params);

        let (updates, new_state) = adabop.update(&grads, &state, Some(&params)).unwrap();

        // |ema| = 1 but the threshold is 0.1 * sqrt(~1e6) = ~100.
        assert_eq!(new_state.ema, tree_of(&[("w", &[1.0])]));
        assert_eq!(updates["w"][0], 0.0);
    }

    #[test]
    fn test_zero_variance_makes_any_signal_flip() {
        // gamma1 = 1.0 puts the mean exactly on the gradient, so the squared
        // deviation is zero and the threshold collapses to zero.
        let adabop = Adabop::new(0.1, 1.0, 1.0, 0.0, None);
        let params = tree_of(&[("w", &[0.5])]);
        let grads = tree_of(&[("w", &[1.0])]);
        let state = adabop.init(&params);

        let (updates, new_state) = adabop.update(&grads, &state, Some(&params)).unwrap();

        assert_eq!(new_state.ema_var, tree_of(&[("w", &[0.0])]));
        assert_eq!(updates["w"][0], -1.5);
    }

    #[test]
    fn test_missing_params_is_an_error() {
        let adabop = Adabop::default();
        let grads = tree_of(&[("w", &[1.0])]);
        let state = adabop.init(&grads);

        let err = adabop.update(&grads, &state, None).unwrap_err();
        assert_eq!(err, OptimErr::MissingParams);
    }

    #[test]
    fn test_update_is_pure() {
        let adabop = Adabop::new(1e-4, 0.3, 0.2, 0.5, None);
        let params = tree_of(&[("w", &[0.1, -0.9])]);
        let grads = tree_of(&[("w", &[0.7, -0.2])]);
        let state = adabop.init(&params);

        let (updates1, state1) = adabop.update(&grads, &state, Some(&params)).unwrap();
        let (updates2, state2) = adabop.update(&grads, &state, Some(&params)).unwrap();

        assert_eq!(updates1, updates2);
        assert_eq!(state1, state2);
    }

    #[test]
    fn test_state_serde_round_trip() {
        let adabop = Adabop::new(1e-4, 0.5, 0.25, 1.5, None);
        let params = tree_of(&[("w", &[0.5, -0.5]), ("b", &[0.0])]);
        let grads = tree_of(&[("w", &[0.3, -0.1]), ("b", &[0.2])]);

        let state = adabop.init(&params);
        let (_, state) = adabop.update(&grads, &state, Some(&params)).unwrap();

        let json = serde_json::to_string(&state).unwrap();
        let restored: AdabopState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }
}
