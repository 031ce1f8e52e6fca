//! Echo step executor

use crate::error::Result;
use crate::executors::{split_output_lines, ExecParams, StepExecutor};
use async_trait::async_trait;

/// Emits a fixed message as output lines; never fails
#[derive(Debug, Clone)]
pub struct EchoExecutor {
    message: String,
}

impl EchoExecutor {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl StepExecutor for EchoExecutor {
    async fn execute(&self, params: &mut ExecParams<'_>) -> Result<()> {
        for line in split_output_lines(&self.message) {
            params.observer.step_output(line);
        }
        Ok(())
    }
}
