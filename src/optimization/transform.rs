use crate::{Result, tree::ParamTree};

/// A stateful gradient transformation.
///
/// This is the pair of operations an external training loop composes with:
/// `init` allocates the per-parameter statistics once at training start, and
/// `update` turns a gradient tree into an update tree while producing the
/// next state. The transform itself holds only configuration fixed at
/// construction, so `update` is a pure function of its three inputs and the
/// caller is free to checkpoint, restore or fork the threaded state value.
pub trait GradientTransform {
    /// The per-parameter statistics carried between steps.
    type State;

    /// Allocates the initial state for a parameter tree.
    ///
    /// # Arguments
    /// * `params` - The parameters whose structure the state mirrors.
    ///
    /// # Returns
    /// A state tree shape-matched to `params`.
    fn init(&self, params: &ParamTree) -> Self::State;

    /// Performs one transformation step.
    ///
    /// # Arguments
    /// * `grads` - The raw gradients for this step.
    /// * `state` - The state produced by `init` or by the previous step.
    /// * `params` - The current parameter values, for rules that need them.
    ///
    /// # Returns
    /// The update tree to add onto the parameters, and the next state. On
    /// error the borrowed `state` is untouched and remains valid.
    fn update(
        &self,
        grads: &ParamTree,
        state: &Self::State,
        params: Option<&ParamTree>,
    ) -> Result<(ParamTree, Self::State)>;
}
