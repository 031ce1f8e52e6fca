//! Core data models for flowrun

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// Input validation limits
pub const MAX_YAML_SIZE: usize = 1_048_576; // 1 MB
pub const MAX_FLOW_NAME_LEN: usize = 64;

/// Sigil that marks the first argument of a run step as a toolbox name
pub const TOOL_SIGIL: char = '$';

/// A tool registered in the toolbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub path: String,
}

/// One unit of flow work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Invoke an external program
    Run {
        /// The command line as written in the project file
        line: String,
        /// Tokenized arguments; `args[0]` is the program
        args: Vec<String>,
    },
    /// Print a message
    Echo { message: String },
}

impl Step {
    /// Build a run step from an already tokenized argument vector
    pub fn run<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        Step::Run {
            line: args.join(" "),
            args,
        }
    }

    pub fn echo(message: impl Into<String>) -> Self {
        Step::Echo {
            message: message.into(),
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Run { .. } => "run",
            Step::Echo { .. } => "echo",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Run { line, .. } => write!(f, "{}", line),
            Step::Echo { message } => write!(f, "{}", message),
        }
    }
}

/// A named, ordered sequence of steps executed in one working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    pub name: String,
    pub directory: PathBuf,
    pub steps: Vec<Step>,
}

/// A loaded project file
#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    /// Absolute path to the project file
    pub path: PathBuf,
    pub flows: BTreeMap<String, Flow>,
}

impl Definition {
    pub fn flow(&self, name: &str) -> Option<&Flow> {
        self.flows.get(name)
    }
}

/// Raw step entry as it appears in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
}

/// Raw project file as it appears in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub flows: BTreeMap<String, Vec<StepDef>>,
}
