use flowgen_graph::GraphError;

/// All fatal errors the compiler can surface.
///
/// Heuristic fallbacks (unresolved paths, ambiguous transitions,
/// unresolvable variable references) are deliberately *not* errors; they
/// are logged and absorbed so that a partially specified unit still
/// compiles to a usable artifact.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// No load strategy produced a state unit. Carries every path that
    /// was attempted.
    #[error("unable to load state unit '{unit}' (tried: {})", attempted.join(", "))]
    Load { unit: String, attempted: Vec<String> },

    /// A required field or structural contract is violated before
    /// emission (missing sub-state, duplicate store_as, missing status).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The named template does not exist, or its source is malformed.
    #[error("template error: {0}")]
    Template(String),

    /// The project root could not be located from the starting path.
    #[error("no project root found above '{start}' (looked for {marker})")]
    NoProjectRoot { start: String, marker: String },

    /// A unit parsed but its graph content is malformed.
    #[error("unit '{unit}': {source}")]
    Graph {
        unit: String,
        #[source]
        source: GraphError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
