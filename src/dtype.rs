use half::{bf16, f16};

use crate::tree::ParamTree;

/// The numeric precision of the accumulators carried between steps.
///
/// Reduced precisions round the carried values through the corresponding
/// half type each step; storage stays `f32` so the whole crate works on a
/// single tensor type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccumDtype {
    /// The native precision, no rounding.
    #[default]
    F32,
    /// IEEE binary16.
    F16,
    /// bfloat16.
    Bf16,
}

impl AccumDtype {
    /// Resolves an optional precision request into a concrete dtype.
    ///
    /// This happens once at construction time so `update` never branches on
    /// configuration beyond the final cast.
    ///
    /// # Arguments
    /// * `dtype` - The requested precision, if any.
    ///
    /// # Returns
    /// The requested dtype, or the native `F32` when unset.
    pub fn canonicalize(dtype: Option<AccumDtype>) -> AccumDtype {
        dtype.unwrap_or_default()
    }

    /// Rounds a single value to this precision.
    pub fn round(self, x: f32) -> f32 {
        match self {
            AccumDtype::F32 => x,
            AccumDtype::F16 => f16::from_f32(x).to_f32(),
            AccumDtype::Bf16 => bf16::from_f32(x).to_f32(),
        }
    }
}

/// Rounds every element of `tree` to the precision of `dtype`.
///
/// # Arguments
/// * `tree` - The state tree to cast, consumed so the `F32` path is free.
/// * `dtype` - The target precision.
///
/// # Returns
/// The tree with every element representable in `dtype`.
pub fn cast_tree(tree: ParamTree, dtype: AccumDtype) -> ParamTree {
    match dtype {
        AccumDtype::F32 => tree,
        _ => tree
            .into_iter()
            .map(|(name, leaf)| (name, leaf.mapv_into(|x| dtype.round(x))))
            .collect(),
    }
}
