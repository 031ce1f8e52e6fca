//! Error types for flowrun

use thiserror::Error;

/// flowrun error types
#[derive(Error, Debug)]
pub enum FlowrunError {
    /// Tokenizer hit end of input inside a quoted region
    #[error("unterminated string literal")]
    UnterminatedLiteral,

    /// A `run:` line in a project file could not be tokenized
    #[error("parse '{flow}' step {index}: {source}")]
    InvalidRunLine {
        flow: String,
        index: usize,
        #[source]
        source: Box<FlowrunError>,
    },

    /// A step entry with neither or both of `run`/`echo`
    #[error("parse '{flow}' step {index}: invalid type")]
    InvalidStep { flow: String, index: usize },

    /// YAML parsing errors
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// YAML size exceeded limit
    #[error("Project YAML exceeds 1MB limit (size: {0} bytes)")]
    YamlSizeExceeded(usize),

    /// JSON errors (toolbox file, HTTP payloads)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run step with an empty argument vector
    #[error("execute run step: no arguments provided")]
    NoArguments,

    /// `$name` with no matching toolbox entry
    #[error("execute run step: no tool found for substitution ${name}")]
    ToolSubstitution { name: String },

    /// Tool registration could not locate the program
    #[error("add tool '{name}': could not find on PATH")]
    ToolNotFound { name: String },

    /// The program could not be launched
    #[error("execute run step: failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program exited unsuccessfully
    #[error("execute run step: '{program}' {status}")]
    ExitStatus {
        program: String,
        status: std::process::ExitStatus,
    },

    /// The program ran past the configured step deadline
    #[error("execute run step: '{program}' timed out after {timeout} seconds")]
    StepTimeout { program: String, timeout: u64 },

    /// A step failure attributed to its flow and position
    #[error("execute flow '{flow}': step {index} failed: {source}")]
    StepFailed {
        flow: String,
        index: usize,
        #[source]
        source: Box<FlowrunError>,
    },

    /// The step executor factory produced nothing for a step
    #[error("execute flow '{flow}': step {index} is unknown and cannot be processed")]
    UnknownStep { flow: String, index: usize },

    /// The flow cannot start because its working directory is unavailable
    #[error("execute flow '{flow}': cannot determine working directory: {source}")]
    WorkingDirectory {
        flow: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Settings could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Timer/scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Generic error
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias using FlowrunError
pub type Result<T> = std::result::Result<T, FlowrunError>;
