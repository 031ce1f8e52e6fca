//! Sequential flow executor
//!
//! Runs the steps of a flow strictly in order and stops at the first failure.
//! A failed step is an ordinary outcome reported through the observer and the
//! returned `bool`; only conditions that prevent the run from starting at all
//! are returned as errors.

use crate::error::{FlowrunError, Result};
use crate::executors::{default_factory, ExecParams, StepExecutorFactory};
use crate::models::Flow;
use crate::observer::ExecutionObserver;
use crate::toolbox::Toolbox;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Runs flows against a toolbox snapshot
#[derive(Clone)]
pub struct FlowExecutor {
    toolbox: Arc<Toolbox>,
    factory: StepExecutorFactory,
    step_timeout: Option<Duration>,
}

impl FlowExecutor {
    /// Create an executor that dispatches every step variant
    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self {
            toolbox,
            factory: default_factory(),
            step_timeout: None,
        }
    }

    /// Replace the step executor factory
    pub fn with_factory(mut self, factory: StepExecutorFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Kill any external program that runs longer than `timeout`
    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn toolbox(&self) -> &Arc<Toolbox> {
        &self.toolbox
    }

    /// Execute a flow, reporting progress to `observer`.
    ///
    /// Returns `Ok(true)` if every step passed and `Ok(false)` if a step
    /// failed; remaining steps are not attempted after a failure.
    ///
    /// # Errors
    ///
    /// * `FlowrunError::WorkingDirectory` - If the flow's directory is relative
    ///   and the current directory cannot be determined. No observer callback
    ///   is made in that case.
    pub async fn run_flow(&self, flow: &Flow, observer: &mut dyn ExecutionObserver) -> Result<bool> {
        let env: Vec<(OsString, OsString)> = std::env::vars_os().collect();
        let directory = resolve_directory(flow)?;

        info!(
            "Starting flow '{}' ({} steps) in {:?}",
            flow.name,
            flow.steps.len(),
            directory
        );

        observer.flow_entered(flow);

        let mut success = true;

        for (index, step) in flow.steps.iter().enumerate() {
            observer.step_entered(step);

            let result = match (self.factory)(step) {
                Some(executor) => {
                    let mut params = ExecParams {
                        env: &env,
                        directory: &directory,
                        observer: &mut *observer,
                        toolbox: &self.toolbox,
                        step_timeout: self.step_timeout,
                    };
                    executor
                        .execute(&mut params)
                        .await
                        .map_err(|e| FlowrunError::StepFailed {
                            flow: flow.name.clone(),
                            index,
                            source: Box::new(e),
                        })
                }
                None => Err(FlowrunError::UnknownStep {
                    flow: flow.name.clone(),
                    index,
                }),
            };

            match result {
                Ok(()) => observer.step_passed(),
                Err(e) => {
                    error!("{}", e);
                    observer.step_failed(&e);
                    success = false;
                    break;
                }
            }
        }

        if success {
            info!("Flow '{}' passed", flow.name);
            observer.flow_passed();
        } else {
            error!("Flow '{}' failed", flow.name);
            observer.flow_failed();
        }

        Ok(success)
    }
}

/// Absolute working directory for a flow
fn resolve_directory(flow: &Flow) -> Result<PathBuf> {
    if flow.directory.is_absolute() {
        return Ok(flow.directory.clone());
    }

    let cwd = std::env::current_dir().map_err(|source| FlowrunError::WorkingDirectory {
        flow: flow.name.clone(),
        source,
    })?;
    Ok(cwd.join(&flow.directory))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::{dispatch, StepExecutor};
    use crate::models::Step;
    use crate::observer::{NoopObserver, ObserverEvent, RecordingObserver};

    fn flow(steps: Vec<Step>) -> Flow {
        Flow {
            name: "build".to_string(),
            directory: std::env::temp_dir(),
            steps,
        }
    }

    #[tokio::test]
    async fn test_all_pass_event_order() {
        let executor = FlowExecutor::new(Arc::new(Toolbox::new()));
        let mut recorder = RecordingObserver::new();

        let success = executor
            .run_flow(&flow(vec![Step::echo("a"), Step::echo("b")]), &mut recorder)
            .await
            .unwrap();

        assert!(success);
        assert_eq!(
            recorder.events(),
            vec![
                ObserverEvent::FlowEntered("build".to_string()),
                ObserverEvent::StepEntered("a".to_string()),
                ObserverEvent::StepOutput("a".to_string()),
                ObserverEvent::StepPassed,
                ObserverEvent::StepEntered("b".to_string()),
                ObserverEvent::StepOutput("b".to_string()),
                ObserverEvent::StepPassed,
                ObserverEvent::FlowPassed,
            ]
        );
    }

    #[tokio::test]
    async fn test_fail_fast() {
        let executor = FlowExecutor::new(Arc::new(Toolbox::new()));
        let mut recorder = RecordingObserver::new();

        let success = executor
            .run_flow(
                &flow(vec![
                    Step::echo("a"),
                    Step::run(["$missing"]),
                    Step::echo("b"),
                ]),
                &mut recorder,
            )
            .await
            .unwrap();

        assert!(!success);
        let events = recorder.events();
        assert_eq!(
            events,
            vec![
                ObserverEvent::FlowEntered("build".to_string()),
                ObserverEvent::StepEntered("a".to_string()),
                ObserverEvent::StepOutput("a".to_string()),
                ObserverEvent::StepPassed,
                ObserverEvent::StepEntered("$missing".to_string()),
                ObserverEvent::StepFailed(
                    "execute flow 'build': step 1 failed: execute run step: no tool found for substitution $missing"
                        .to_string()
                ),
                ObserverEvent::FlowFailed,
            ]
        );
        assert!(!events.contains(&ObserverEvent::StepEntered("b".to_string())));
    }

    #[tokio::test]
    async fn test_unknown_step() {
        let factory: StepExecutorFactory = Arc::new(|step: &Step| match step {
            Step::Echo { .. } => Some(dispatch(step)),
            Step::Run { .. } => None,
        });
        let executor = FlowExecutor::new(Arc::new(Toolbox::new())).with_factory(factory);
        let mut recorder = RecordingObserver::new();

        let success = executor
            .run_flow(
                &flow(vec![Step::echo("a"), Step::run(["ls"])]),
                &mut recorder,
            )
            .await
            .unwrap();

        assert!(!success);
        assert!(recorder.events().contains(&ObserverEvent::StepFailed(
            "execute flow 'build': step 1 is unknown and cannot be processed".to_string()
        )));
    }

    #[tokio::test]
    async fn test_empty_flow_passes() {
        let executor = FlowExecutor::new(Arc::new(Toolbox::new()));
        let mut recorder = RecordingObserver::new();

        let success = executor.run_flow(&flow(vec![]), &mut recorder).await.unwrap();
        assert!(success);
        assert_eq!(
            recorder.events(),
            vec![
                ObserverEvent::FlowEntered("build".to_string()),
                ObserverEvent::FlowPassed,
            ]
        );
    }

    struct ParamsCheck {
        expected_dir: PathBuf,
    }

    #[async_trait::async_trait]
    impl StepExecutor for ParamsCheck {
        async fn execute(&self, params: &mut ExecParams<'_>) -> Result<()> {
            assert_eq!(params.directory, self.expected_dir.as_path());
            assert!(params.toolbox.resolve("checker").is_some());
            assert_eq!(params.step_timeout, Some(Duration::from_secs(5)));
            assert!(!params.env.is_empty());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_params_passed_to_executor() {
        let mut toolbox = Toolbox::new();
        toolbox.add_manual("checker", "/bin/true");
        let expected_dir = std::env::temp_dir();

        let factory: StepExecutorFactory = {
            let expected_dir = expected_dir.clone();
            Arc::new(move |_step: &Step| {
                Some(Box::new(ParamsCheck {
                    expected_dir: expected_dir.clone(),
                }) as Box<dyn StepExecutor>)
            })
        };

        let executor = FlowExecutor::new(Arc::new(toolbox))
            .with_factory(factory)
            .with_step_timeout(Some(Duration::from_secs(5)));

        let success = executor
            .run_flow(&flow(vec![Step::echo("x")]), &mut NoopObserver)
            .await
            .unwrap();
        assert!(success);
    }

    #[test]
    fn test_resolve_relative_directory() {
        let relative = Flow {
            name: "rel".to_string(),
            directory: PathBuf::from("sub"),
            steps: vec![],
        };
        let resolved = resolve_directory(&relative).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("sub"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_steps_share_directory() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let executor = FlowExecutor::new(Arc::new(Toolbox::new()));
        let mut recorder = RecordingObserver::new();

        let flow = Flow {
            name: "files".to_string(),
            directory: temp_dir.path().to_path_buf(),
            steps: vec![
                Step::run(["/bin/sh", "-c", "echo data > out.txt"]),
                Step::run(["/bin/cat", "out.txt"]),
            ],
        };

        let success = executor.run_flow(&flow, &mut recorder).await.unwrap();
        assert!(success);
        assert!(recorder
            .events()
            .contains(&ObserverEvent::StepOutput("data".to_string())));
    }
}
