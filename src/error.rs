use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, OptimErr>;

/// The optimizer crate's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimErr {
    /// `update` was called without the current parameter values, which the
    /// sign-flip rules cannot work without.
    MissingParams,
    /// Two trees that must share a key set disagree on some key.
    KeyMismatch {
        a: &'static str,
        b: &'static str,
        key: String,
    },
    /// Two tensors under the same key disagree on their shape.
    ShapeMismatch {
        key: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
}

impl Display for OptimErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptimErr::MissingParams => {
                "The update rule needs the current parameters but none were provided".to_string()
            }
            OptimErr::KeyMismatch { a, b, key } => {
                format!("There's a key mismatch between {a} and {b}: '{key}' is not in both trees")
            }
            OptimErr::ShapeMismatch { key, got, expected } => {
                format!("There's a shape mismatch for '{key}', got {got:?} and expected {expected:?}")
            }
        };

        write!(f, "{s}")
    }
}

impl Error for OptimErr {}
