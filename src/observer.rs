//! Observer protocol for flow execution progress
//!
//! The flow executor reports every milestone of a run to an
//! [`ExecutionObserver`]. For each run the call order is:
//!
//! 1. exactly one `flow_entered`
//! 2. for each executed step: one `step_entered`, zero or more `step_output`,
//!    then exactly one of `step_passed` / `step_failed`
//! 3. exactly one of `flow_passed` / `flow_failed`
//!
//! Callbacks run synchronously on the task executing the flow. A slow observer
//! stalls its own flow but no other run.

use crate::error::FlowrunError;
use crate::metrics::FlowMetrics;
use crate::models::{Flow, Step};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Receiver of flow execution milestones
pub trait ExecutionObserver: Send {
    fn flow_entered(&mut self, flow: &Flow);
    fn step_entered(&mut self, step: &Step);
    fn step_output(&mut self, line: &str);
    fn step_passed(&mut self);
    fn step_failed(&mut self, error: &FlowrunError);
    fn flow_passed(&mut self);
    fn flow_failed(&mut self);
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {
    fn flow_entered(&mut self, _flow: &Flow) {}
    fn step_entered(&mut self, _step: &Step) {}
    fn step_output(&mut self, _line: &str) {}
    fn step_passed(&mut self) {}
    fn step_failed(&mut self, _error: &FlowrunError) {}
    fn flow_passed(&mut self) {}
    fn flow_failed(&mut self) {}
}

/// One observer callback as a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    FlowEntered(String),
    StepEntered(String),
    StepOutput(String),
    StepPassed,
    StepFailed(String),
    FlowPassed,
    FlowFailed,
}

/// Observer that records every callback in order.
///
/// Clones share the same event log, so a handle kept by the caller sees the
/// events recorded by the copy handed to the executor.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<ObserverEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<ObserverEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, event: ObserverEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

impl ExecutionObserver for RecordingObserver {
    fn flow_entered(&mut self, flow: &Flow) {
        self.push(ObserverEvent::FlowEntered(flow.name.clone()));
    }

    fn step_entered(&mut self, step: &Step) {
        self.push(ObserverEvent::StepEntered(step.to_string()));
    }

    fn step_output(&mut self, line: &str) {
        self.push(ObserverEvent::StepOutput(line.to_string()));
    }

    fn step_passed(&mut self) {
        self.push(ObserverEvent::StepPassed);
    }

    fn step_failed(&mut self, error: &FlowrunError) {
        self.push(ObserverEvent::StepFailed(error.to_string()));
    }

    fn flow_passed(&mut self) {
        self.push(ObserverEvent::FlowPassed);
    }

    fn flow_failed(&mut self) {
        self.push(ObserverEvent::FlowFailed);
    }
}

/// Observer that emits structured `tracing` events, used by the daemon
#[derive(Debug, Clone)]
pub struct TracingObserver {
    project: String,
    flow: String,
    step_index: Option<usize>,
}

impl TracingObserver {
    /// Create an observer that tags every event with `project`
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            flow: String::new(),
            step_index: None,
        }
    }

    fn step(&self) -> usize {
        self.step_index.unwrap_or_default()
    }
}

impl ExecutionObserver for TracingObserver {
    fn flow_entered(&mut self, flow: &Flow) {
        self.flow = flow.name.clone();
        self.step_index = None;
        info!(project = %self.project, flow = %self.flow, "Flow entered");
    }

    fn step_entered(&mut self, step: &Step) {
        let index = self.step_index.map_or(0, |i| i + 1);
        self.step_index = Some(index);
        info!(
            project = %self.project,
            flow = %self.flow,
            step = index,
            step_text = %step,
            "Step entered"
        );
    }

    fn step_output(&mut self, line: &str) {
        debug!(project = %self.project, flow = %self.flow, step = self.step(), "> {}", line);
    }

    fn step_passed(&mut self) {
        info!(project = %self.project, flow = %self.flow, step = self.step(), "Step passed");
    }

    fn step_failed(&mut self, error: &FlowrunError) {
        warn!(
            project = %self.project,
            flow = %self.flow,
            step = self.step(),
            error = %error,
            "Step failed"
        );
    }

    fn flow_passed(&mut self) {
        info!(project = %self.project, flow = %self.flow, "Flow passed");
    }

    fn flow_failed(&mut self) {
        warn!(project = %self.project, flow = %self.flow, step = self.step(), "Flow failed");
    }
}

const RULE_WIDTH: usize = 60;
const RULE_CHAR: char = '─';

/// Observer that renders a run for a terminal, used by `flowrun run`.
///
/// Output looks like:
///
/// ```text
/// ── demo / build ─────────────────────────────────────────────
/// Compiling...
/// ─────────────────────────────────────────── PASSED in 1.2s ──
/// ```
pub struct ConsoleObserver<W: Write + Send> {
    out: W,
    project: String,
    width: usize,
    flow_start: Option<Instant>,
}

impl<W: Write + Send> ConsoleObserver<W> {
    pub fn new(project: impl Into<String>, out: W) -> Self {
        Self {
            out,
            project: project.into(),
            width: RULE_WIDTH,
            flow_start: None,
        }
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn rule(&mut self, header: Option<&str>, footer: Option<&str>) {
        let header = header
            .map(|h| format!("{c}{c} {h} ", c = RULE_CHAR))
            .unwrap_or_default();
        let footer = footer
            .map(|f| format!(" {f} {c}{c}", c = RULE_CHAR))
            .unwrap_or_default();
        let used = header.chars().count() + footer.chars().count();
        let fill: String = std::iter::repeat(RULE_CHAR)
            .take(self.width.saturating_sub(used))
            .collect();
        let _ = writeln!(self.out, "{}{}{}", header, fill, footer);
    }

    fn elapsed(&self) -> Duration {
        let elapsed = self.flow_start.map(|s| s.elapsed()).unwrap_or_default();
        Duration::from_millis(elapsed.as_millis() as u64)
    }
}

impl<W: Write + Send> ExecutionObserver for ConsoleObserver<W> {
    fn flow_entered(&mut self, flow: &Flow) {
        let title = if self.project.is_empty() {
            flow.name.clone()
        } else {
            format!("{} / {}", self.project, flow.name)
        };
        self.rule(Some(&title), None);
        self.flow_start = Some(Instant::now());
    }

    fn step_entered(&mut self, _step: &Step) {}

    fn step_output(&mut self, line: &str) {
        let _ = writeln!(self.out, "{}", line);
    }

    fn step_passed(&mut self) {}

    fn step_failed(&mut self, error: &FlowrunError) {
        let _ = writeln!(self.out, "{}", error);
    }

    fn flow_passed(&mut self) {
        let status = format!("PASSED in {:?}", self.elapsed());
        self.rule(None, Some(&status));
        let _ = self.out.flush();
    }

    fn flow_failed(&mut self) {
        let status = format!("FAILED after {:?}", self.elapsed());
        self.rule(None, Some(&status));
        let _ = self.out.flush();
    }
}

/// Decorator that records run outcomes into [`FlowMetrics`] and forwards
/// every callback to the wrapped observer
pub struct MetricsObserver {
    inner: Box<dyn ExecutionObserver>,
    metrics: Arc<FlowMetrics>,
    flow: String,
    flow_start: Instant,
}

impl MetricsObserver {
    pub fn new(inner: Box<dyn ExecutionObserver>, metrics: Arc<FlowMetrics>) -> Self {
        Self {
            inner,
            metrics,
            flow: String::new(),
            flow_start: Instant::now(),
        }
    }

    fn finish(&self, status: &str) {
        self.metrics
            .flow_finished(&self.flow, status, self.flow_start.elapsed().as_secs_f64());
    }
}

impl ExecutionObserver for MetricsObserver {
    fn flow_entered(&mut self, flow: &Flow) {
        self.flow = flow.name.clone();
        self.flow_start = Instant::now();
        self.metrics.flow_started();
        self.inner.flow_entered(flow);
    }

    fn step_entered(&mut self, step: &Step) {
        self.inner.step_entered(step);
    }

    fn step_output(&mut self, line: &str) {
        self.inner.step_output(line);
    }

    fn step_passed(&mut self) {
        self.metrics.record_step(&self.flow, "passed");
        self.inner.step_passed();
    }

    fn step_failed(&mut self, error: &FlowrunError) {
        self.metrics.record_step(&self.flow, "failed");
        self.inner.step_failed(error);
    }

    fn flow_passed(&mut self) {
        self.finish("passed");
        self.inner.flow_passed();
    }

    fn flow_failed(&mut self) {
        self.finish("failed");
        self.inner.flow_failed();
    }
}
