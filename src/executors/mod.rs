//! Step executors
//!
//! [`dispatch`] maps each [`Step`] variant to the executor that runs it. The
//! match is exhaustive, so adding a step variant without an executor fails to
//! compile here.

pub mod echo;
pub mod run;

use crate::error::Result;
use crate::models::Step;
use crate::observer::ExecutionObserver;
use crate::toolbox::Toolbox;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use echo::EchoExecutor;
pub use run::RunExecutor;

/// Everything a step needs from the flow run that owns it
pub struct ExecParams<'a> {
    /// Environment snapshot taken when the flow started
    pub env: &'a [(OsString, OsString)],
    /// Working directory of the flow
    pub directory: &'a Path,
    /// Receives output lines as they are produced
    pub observer: &'a mut dyn ExecutionObserver,
    /// Snapshot used for `$name` substitution
    pub toolbox: &'a Toolbox,
    /// Deadline for a single external program, if any
    pub step_timeout: Option<Duration>,
}

/// Executor trait for the different step kinds
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run the step, routing output through `params.observer`
    async fn execute(&self, params: &mut ExecParams<'_>) -> Result<()>;
}

/// Builds the executor for a step; `None` marks a step that cannot be processed
pub type StepExecutorFactory = Arc<dyn Fn(&Step) -> Option<Box<dyn StepExecutor>> + Send + Sync>;

/// Resolve a step to its executor
pub fn dispatch(step: &Step) -> Box<dyn StepExecutor> {
    match step {
        Step::Run { args, .. } => Box::new(RunExecutor::new(args.clone())),
        Step::Echo { message } => Box::new(EchoExecutor::new(message.clone())),
    }
}

/// Factory that dispatches every step variant
pub fn default_factory() -> StepExecutorFactory {
    Arc::new(|step| Some(dispatch(step)))
}

/// Split captured text into output lines.
///
/// Trailing line breaks are dropped from the whole text, then each line loses
/// its trailing `\r`.
pub(crate) fn split_output_lines(text: &str) -> impl Iterator<Item = &str> {
    text.trim_end_matches(['\r', '\n'])
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
}
