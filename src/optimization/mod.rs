mod adabop;
mod bop;
mod transform;

pub use adabop::{Adabop, AdabopState};
pub use bop::{Bop, BopState};
pub use transform::GradientTransform;

use crate::tree::ParamTree;

/// Sign with the zero-at-zero convention.
///
/// `f32::signum` maps `0.0` to `1.0`, which is not what a ternary target in
/// `{-1, 0, +1}` wants.
pub(crate) fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Counts the elements of an update tree that propose a sign flip.
pub(crate) fn count_flips(updates: &ParamTree) -> usize {
    updates
        .values()
        .map(|leaf| leaf.iter().filter(|&&u| u != 0.0).count())
        .sum()
}
