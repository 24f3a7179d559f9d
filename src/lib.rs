pub mod dtype;
pub mod error;
pub mod optimization;
pub mod tree;

pub use dtype::AccumDtype;
pub use error::{OptimErr, Result};
pub use optimization::{Adabop, AdabopState, Bop, BopState, GradientTransform};
pub use tree::{ParamTree, apply_updates};
