use std::collections::BTreeMap;

use ndarray::{ArrayD, Zip};
use rayon::prelude::*;

use crate::{OptimErr, Result};

/// A named collection of tensors.
///
/// Gradients, parameters and optimizer state all share this shape: the same
/// key set and the same per-key tensor dimensions at all times. The zip
/// utilities below check that invariant before producing any output, so a
/// failed step leaves the caller's trees untouched.
pub type ParamTree = BTreeMap<String, ArrayD<f32>>;

/// Builds a same-structure tree by mapping each leaf tensor.
///
/// # Arguments
/// * `tree` - The tree whose structure is mirrored.
/// * `f` - The function applied to each leaf.
///
/// # Returns
/// A new tree with the same key set.
pub fn map<F>(tree: &ParamTree, f: F) -> ParamTree
where
    F: Fn(&ArrayD<f32>) -> ArrayD<f32> + Sync,
{
    tree.par_iter()
        .map(|(name, leaf)| (name.clone(), f(leaf)))
        .collect()
}

/// Applies `f` elementwise across two same-structure trees.
///
/// Each element is handled independently of every other, so the per-leaf
/// work is fanned out across the rayon pool.
///
/// # Arguments
/// * `names` - The `(a, b)` tree names used in error reports.
/// * `a`, `b` - The trees to traverse.
/// * `f` - The scalar function applied to each element pair.
///
/// # Returns
/// The mapped tree, or an error if the trees disagree on keys or shapes.
pub fn zip2<F>(
    names: (&'static str, &'static str),
    a: &ParamTree,
    b: &ParamTree,
    f: F,
) -> Result<ParamTree>
where
    F: Fn(f32, f32) -> f32 + Sync,
{
    check_extra_keys(names.0, names.1, a, b)?;

    a.par_iter()
        .map(|(key, ta)| {
            let tb = matching_leaf(key, ta, b, names.0, names.1)?;
            let out = Zip::from(ta).and(tb).map_collect(|&x, &y| f(x, y));
            Ok((key.clone(), out))
        })
        .collect()
}

/// Applies `f` elementwise across three same-structure trees.
///
/// # Arguments
/// * `names` - The `(a, b, c)` tree names used in error reports.
/// * `a`, `b`, `c` - The trees to traverse.
/// * `f` - The scalar function applied to each element triple.
///
/// # Returns
/// The mapped tree, or an error if the trees disagree on keys or shapes.
pub fn zip3<F>(
    names: (&'static str, &'static str, &'static str),
    a: &ParamTree,
    b: &ParamTree,
    c: &ParamTree,
    f: F,
) -> Result<ParamTree>
where
    F: Fn(f32, f32, f32) -> f32 + Sync,
{
    check_extra_keys(names.0, names.1, a, b)?;
    check_extra_keys(names.0, names.2, a, c)?;

    a.par_iter()
        .map(|(key, ta)| {
            let tb = matching_leaf(key, ta, b, names.0, names.1)?;
            let tc = matching_leaf(key, ta, c, names.0, names.2)?;
            let out = Zip::from(ta)
                .and(tb)
                .and(tc)
                .map_collect(|&x, &y, &z| f(x, y, z));
            Ok((key.clone(), out))
        })
        .collect()
}

/// Applies an update tree onto the parameters, `w_new = w + u`.
///
/// For elements where a sign rule fired the update is `target - w`, so this
/// addition lands the weight exactly on the `{-1, 0, +1}` target; a zero
/// update leaves the weight unchanged.
///
/// # Arguments
/// * `params` - The current parameter values.
/// * `updates` - The update tree produced by a transform.
///
/// # Returns
/// The updated parameters, or an error on a structure mismatch.
pub fn apply_updates(params: &ParamTree, updates: &ParamTree) -> Result<ParamTree> {
    zip2(("params", "updates"), params, updates, |w, u| w + u)
}

/// Errors if `b` holds a key that `a` doesn't. Keys of `a` missing in `b`
/// are caught by the per-leaf lookup instead.
fn check_extra_keys(
    a_name: &'static str,
    b_name: &'static str,
    a: &ParamTree,
    b: &ParamTree,
) -> Result<()> {
    if let Some(key) = b.keys().find(|k| !a.contains_key(*k)) {
        return Err(OptimErr::KeyMismatch {
            a: a_name,
            b: b_name,
            key: key.clone(),
        });
    }

    Ok(())
}

/// Looks up `key` in `tree` and checks its shape against `expected`.
fn matching_leaf<'t>(
    key: &String,
    expected: &ArrayD<f32>,
    tree: &'t ParamTree,
    a_name: &'static str,
    b_name: &'static str,
) -> Result<&'t ArrayD<f32>> {
    let leaf = tree.get(key).ok_or_else(|| OptimErr::KeyMismatch {
        a: a_name,
        b: b_name,
        key: key.clone(),
    })?;

    if leaf.shape() != expected.shape() {
        return Err(OptimErr::ShapeMismatch {
            key: key.clone(),
            got: leaf.shape().to_vec(),
            expected: expected.shape().to_vec(),
        });
    }

    Ok(leaf)
}
