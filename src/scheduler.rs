//! Time-based flow scheduler
//!
//! Holds a set of `(flow, schedule)` entries and, once started, wakes at the
//! start of every minute to trigger each flow whose schedule matches the local
//! time. Every triggered run is a detached tokio task with its own observer;
//! runs are never serialized against each other.
//!
//! # Example
//!
//! ```no_run
//! use flowrun::executor::FlowExecutor;
//! use flowrun::models::{Flow, Step};
//! use flowrun::schedule::Schedule;
//! use flowrun::scheduler::{tracing_observers, FlowScheduler};
//! use flowrun::toolbox::Toolbox;
//! use std::sync::Arc;
//!
//! # async fn example() -> flowrun::error::Result<()> {
//! let executor = Arc::new(FlowExecutor::new(Arc::new(Toolbox::new())));
//! let scheduler = FlowScheduler::new(executor, tracing_observers());
//!
//! let flow = Flow {
//!     name: "nightly".to_string(),
//!     directory: "/srv/app".into(),
//!     steps: vec![Step::echo("backing up")],
//! };
//! // Every day at 02:00
//! scheduler
//!     .schedule_flow("app", flow, Schedule::from_parts(0, 2, -1)?)
//!     .await;
//! scheduler.start().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{FlowrunError, Result};
use crate::executor::FlowExecutor;
use crate::models::Flow;
use crate::observer::{ExecutionObserver, TracingObserver};
use crate::schedule::Schedule;
use chrono::{Datelike, Local, Timelike};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Fires at second 0 of every minute (sec min hour day month dayofweek)
const TICK_EXPRESSION: &str = "0 * * * * *";

/// Builds a fresh observer for each run from the project label and flow
pub type ObserverFactory =
    Arc<dyn Fn(&str, &Flow) -> Box<dyn ExecutionObserver> + Send + Sync>;

/// Observer factory that logs runs through `tracing`
pub fn tracing_observers() -> ObserverFactory {
    Arc::new(|project: &str, _flow: &Flow| {
        Box::new(TracingObserver::new(project)) as Box<dyn ExecutionObserver>
    })
}

/// A registered schedule entry
#[derive(Debug, Clone)]
pub struct ScheduledFlow {
    pub id: Uuid,
    /// Label of the project the flow came from
    pub project: String,
    pub flow: Flow,
    pub schedule: Schedule,
}

/// Whether the minute timer is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed,
}

struct Shared {
    executor: Arc<FlowExecutor>,
    observers: ObserverFactory,
    entries: RwLock<Vec<ScheduledFlow>>,
}

impl Shared {
    fn run_flow(&self, project: &str, flow: Flow) -> JoinHandle<bool> {
        let executor = self.executor.clone();
        let mut observer = (self.observers)(project, &flow);

        tokio::spawn(async move {
            match executor.run_flow(&flow, &mut *observer).await {
                Ok(true) => true,
                Ok(false) => {
                    warn!("Triggered flow '{}' failed", flow.name);
                    false
                }
                Err(e) => {
                    error!("Triggered flow '{}' could not start: {}", flow.name, e);
                    false
                }
            }
        })
    }

    async fn tick<T: Datelike + Timelike>(&self, now: &T) -> Vec<JoinHandle<bool>> {
        // Snapshot so registration never blocks on, or is seen half-done by, a tick
        let entries = self.entries.read().await.clone();

        entries
            .into_iter()
            .filter(|entry| entry.schedule.matches(now))
            .map(|entry| {
                info!(
                    "Schedule {} matched, triggering flow '{}'",
                    entry.schedule, entry.flow.name
                );
                self.run_flow(&entry.project, entry.flow)
            })
            .collect()
    }
}

/// Minute/hour/weekday scheduler for flows
pub struct FlowScheduler {
    shared: Arc<Shared>,
    timer: Mutex<Option<JobScheduler>>,
}

impl FlowScheduler {
    /// Create an idle scheduler
    pub fn new(executor: Arc<FlowExecutor>, observers: ObserverFactory) -> Self {
        Self {
            shared: Arc::new(Shared {
                executor,
                observers,
                entries: RwLock::new(Vec::new()),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Register a flow to be triggered whenever `schedule` matches
    pub async fn schedule_flow(
        &self,
        project: impl Into<String>,
        flow: Flow,
        schedule: Schedule,
    ) -> Uuid {
        let entry = ScheduledFlow {
            id: Uuid::new_v4(),
            project: project.into(),
            flow,
            schedule,
        };
        let id = entry.id;

        info!(
            "Scheduling flow '{}' ({}) as {}",
            entry.flow.name, entry.schedule, id
        );
        self.shared.entries.write().await.push(entry);

        id
    }

    /// Remove a schedule entry, reporting whether it existed
    pub async fn unschedule(&self, id: Uuid) -> bool {
        let mut entries = self.shared.entries.write().await;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;

        if removed {
            info!("Removed schedule {}", id);
        }
        removed
    }

    /// Snapshot of the registered entries
    pub async fn schedules(&self) -> Vec<ScheduledFlow> {
        self.shared.entries.read().await.clone()
    }

    /// Trigger a detached run of `flow` with a fresh observer.
    ///
    /// The returned handle resolves to the run's outcome; dropping it does not
    /// cancel the run.
    pub fn run_flow(&self, project: &str, flow: Flow) -> JoinHandle<bool> {
        debug!("Triggering flow '{}' from project '{}'", flow.name, project);
        self.shared.run_flow(project, flow)
    }

    /// Trigger every entry whose schedule matches `now`
    pub async fn tick<T: Datelike + Timelike>(&self, now: &T) -> Vec<JoinHandle<bool>> {
        self.shared.tick(now).await
    }

    pub async fn state(&self) -> SchedulerState {
        if self.timer.lock().await.is_some() {
            SchedulerState::Armed
        } else {
            SchedulerState::Idle
        }
    }

    /// Start the minute timer.
    ///
    /// # Errors
    ///
    /// * `FlowrunError::Scheduler` - If already started or the timer fails
    pub async fn start(&self) -> Result<()> {
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            return Err(FlowrunError::Scheduler(
                "Scheduler is already running".to_string(),
            ));
        }

        info!("Starting flow scheduler");

        let jobs = JobScheduler::new()
            .await
            .map_err(|e| FlowrunError::Scheduler(format!("Failed to create job scheduler: {}", e)))?;

        let shared = self.shared.clone();
        let job = Job::new_async(TICK_EXPRESSION, move |_uuid, _lock| {
            let shared = shared.clone();
            Box::pin(async move {
                let now = Local::now();
                let triggered = shared.tick(&now).await;
                debug!("Tick at {} triggered {} flows", now, triggered.len());
            })
        })
        .map_err(|e| FlowrunError::Scheduler(format!("Failed to create tick job: {}", e)))?;

        jobs.add(job)
            .await
            .map_err(|e| FlowrunError::Scheduler(format!("Failed to add tick job: {}", e)))?;

        jobs.start()
            .await
            .map_err(|e| FlowrunError::Scheduler(format!("Failed to start scheduler: {}", e)))?;

        *timer = Some(jobs);
        info!("Flow scheduler started");

        Ok(())
    }

    /// Stop the minute timer. Runs already in flight continue.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(mut jobs) = self.timer.lock().await.take() else {
            return Ok(());
        };

        info!("Shutting down flow scheduler");
        jobs.shutdown()
            .await
            .map_err(|e| FlowrunError::Scheduler(format!("Failed to shutdown scheduler: {}", e)))?;
        info!("Flow scheduler shutdown complete");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Step;
    use crate::observer::{ObserverEvent, RecordingObserver};
    use crate::toolbox::Toolbox;
    use chrono::NaiveDate;
    use std::sync::Mutex as StdMutex;

    /// Observer factory that keeps a handle to every observer it creates
    fn recording_observers() -> (ObserverFactory, Arc<StdMutex<Vec<RecordingObserver>>>) {
        let created = Arc::new(StdMutex::new(Vec::new()));
        let factory: ObserverFactory = {
            let created = created.clone();
            Arc::new(move |_project: &str, _flow: &Flow| {
                let recorder = RecordingObserver::new();
                created.lock().unwrap().push(recorder.clone());
                Box::new(recorder) as Box<dyn ExecutionObserver>
            })
        };
        (factory, created)
    }

    fn scheduler() -> (FlowScheduler, Arc<StdMutex<Vec<RecordingObserver>>>) {
        let executor = Arc::new(FlowExecutor::new(Arc::new(Toolbox::new())));
        let (factory, created) = recording_observers();
        (FlowScheduler::new(executor, factory), created)
    }

    fn flow(name: &str) -> Flow {
        Flow {
            name: name.to_string(),
            directory: std::env::temp_dir(),
            steps: vec![Step::echo("one"), Step::echo("two")],
        }
    }

    fn monday_at(hour: u32, minute: u32) -> chrono::NaiveDateTime {
        // 2024-01-01 is a Monday
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_schedule_and_unschedule() {
        let (scheduler, _) = scheduler();
        let id = scheduler
            .schedule_flow("demo", flow("a"), Schedule::default())
            .await;
        scheduler
            .schedule_flow("demo", flow("b"), Schedule::default())
            .await;

        assert_eq!(scheduler.schedules().await.len(), 2);
        assert!(scheduler.unschedule(id).await);
        assert!(!scheduler.unschedule(id).await);

        let remaining = scheduler.schedules().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].flow.name, "b");
    }

    #[tokio::test]
    async fn test_tick_triggers_matching_flows() {
        let (scheduler, created) = scheduler();
        scheduler
            .schedule_flow("demo", flow("nine"), Schedule::from_parts(-1, 9, -1).unwrap())
            .await;
        scheduler
            .schedule_flow("demo", flow("ten"), Schedule::from_parts(-1, 10, -1).unwrap())
            .await;

        let handles = scheduler.tick(&monday_at(9, 42)).await;
        assert_eq!(handles.len(), 1);
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let recorders = created.lock().unwrap().clone();
        assert_eq!(recorders.len(), 1);
        assert_eq!(
            recorders[0].events()[0],
            ObserverEvent::FlowEntered("nine".to_string())
        );
    }

    #[tokio::test]
    async fn test_tick_without_match() {
        let (scheduler, _) = scheduler();
        scheduler
            .schedule_flow(
                "demo",
                flow("weekly"),
                Schedule::from_parts(0, 0, 1).unwrap(),
            )
            .await;

        assert!(scheduler.tick(&monday_at(0, 1)).await.is_empty());
        assert_eq!(scheduler.tick(&monday_at(0, 0)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_independent() {
        let (scheduler, created) = scheduler();
        let flow = flow("shared");
        scheduler
            .schedule_flow("demo", flow.clone(), Schedule::default())
            .await;

        let manual = scheduler.run_flow("demo", flow.clone());
        let mut handles = scheduler.tick(&monday_at(12, 0)).await;
        handles.push(manual);

        let results = futures::future::join_all(handles).await;
        assert!(results.into_iter().all(|r| r.unwrap()));

        let expected = vec![
            ObserverEvent::FlowEntered("shared".to_string()),
            ObserverEvent::StepEntered("one".to_string()),
            ObserverEvent::StepOutput("one".to_string()),
            ObserverEvent::StepPassed,
            ObserverEvent::StepEntered("two".to_string()),
            ObserverEvent::StepOutput("two".to_string()),
            ObserverEvent::StepPassed,
            ObserverEvent::FlowPassed,
        ];
        let recorders = created.lock().unwrap().clone();
        assert_eq!(recorders.len(), 2);
        for recorder in recorders {
            assert_eq!(recorder.events(), expected);
        }
    }

    #[tokio::test]
    async fn test_failed_run_reports_false() {
        let (scheduler, _) = scheduler();
        let failing = Flow {
            name: "broken".to_string(),
            directory: std::env::temp_dir(),
            steps: vec![Step::run(["$missing"])],
        };
        assert!(!scheduler.run_flow("demo", failing).await.unwrap());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (scheduler, _) = scheduler();
        assert_eq!(scheduler.state().await, SchedulerState::Idle);

        scheduler.start().await.unwrap();
        assert_eq!(scheduler.state().await, SchedulerState::Armed);
        assert!(matches!(
            scheduler.start().await,
            Err(FlowrunError::Scheduler(_))
        ));

        scheduler.shutdown().await.unwrap();
        assert_eq!(scheduler.state().await, SchedulerState::Idle);
        // A second shutdown is a no-op
        scheduler.shutdown().await.unwrap();
    }
}
