use std::fmt;

/// Errors during state-unit deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The unit is missing a required top-level field.
    MissingField { field: String },
    /// A state or block inside the unit is malformed.
    UnitError { unit: String, message: String },
    /// The unit structure is not a recognizable state graph.
    InvalidGraph(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::MissingField { field } => {
                write!(f, "unit missing required field: '{}'", field)
            }
            GraphError::UnitError { unit, message } => {
                write!(f, "unit '{}': {}", unit, message)
            }
            GraphError::InvalidGraph(msg) => {
                write!(f, "invalid state graph: {}", msg)
            }
        }
    }
}

impl std::error::Error for GraphError {}
