//! The shell that owns one top-level composite and drives its lifecycle.

use crate::app::{AppError, ControlCommand, ControlReply};
use crate::config::ParameterSet;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::graph::{Composite, GraphSnapshot};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Domain code that knows how to build the graph.
pub trait Application: Send {
    fn name(&self) -> &str {
        "application"
    }

    /// Build the top-level composite from `params`. Called once per
    /// `define`/`reinit`.
    fn define(&mut self, ctx: &ExecutionContext, params: &ParameterSet) -> Result<Composite>;
}

impl<F> Application for F
where
    F: FnMut(&ExecutionContext, &ParameterSet) -> Result<Composite> + Send,
{
    fn define(&mut self, ctx: &ExecutionContext, params: &ParameterSet) -> Result<Composite> {
        self(ctx, params)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    /// No composite exists.
    Undefined,
    /// Built but not preprocessed.
    Defined,
    /// Preprocessed; `run` may be called.
    Ready,
    /// A pause request stopped the last `run`.
    Paused,
}

/// Shared pause flag, settable from any thread.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle {
    paused: Arc<AtomicBool>,
}

impl PauseHandle {
    /// Ask the running application to stop after the current iteration.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.paused.store(false, Ordering::Release);
    }
}

pub struct ApplicationHolder<A> {
    app: A,
    ctx: ExecutionContext,
    params: ParameterSet,
    composite: Option<Composite>,
    state: AppState,
    pause: PauseHandle,
    iterations: u64,
}

impl<A: Application> ApplicationHolder<A> {
    pub fn new(app: A, ctx: ExecutionContext) -> Self {
        Self {
            app,
            ctx,
            params: ParameterSet::new(),
            composite: None,
            state: AppState::Undefined,
            pause: PauseHandle::default(),
            iterations: 0,
        }
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn composite(&self) -> Option<&Composite> {
        self.composite.as_ref()
    }

    /// Iterations run since the last `init`.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    fn require_state(&self, command: &'static str, allowed: &[AppState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(AppError::InvalidState {
                command,
                state: self.state,
            }
            .into())
        }
    }

    /// Build the top-level composite.
    pub fn define(&mut self, params: ParameterSet) -> Result<()> {
        self.require_state("define", &[AppState::Undefined])?;
        let composite = self.app.define(&self.ctx, &params)?;
        tracing::info!(
            application = %self.app.name(),
            composite = %composite.name(),
            blocks = composite.len(),
            "application defined"
        );
        self.params = params;
        self.composite = Some(composite);
        self.state = AppState::Defined;
        Ok(())
    }

    /// Preprocess the composite: open connections and prepare steps.
    pub fn init(&mut self) -> Result<()> {
        self.require_state("init", &[AppState::Defined])?;
        if let Some(composite) = self.composite.as_mut() {
            composite.preprocess(&self.ctx)?;
        }
        self.iterations = 0;
        self.pause.clear();
        self.state = AppState::Ready;
        Ok(())
    }

    /// Run up to `iterations` passes. Stops early, in state `Paused`, when
    /// a pause is requested. Returns the number of passes completed.
    pub fn run(&mut self, iterations: u64) -> Result<u64> {
        self.require_state("run", &[AppState::Ready])?;
        let Some(composite) = self.composite.as_mut() else {
            return Ok(0);
        };
        let mut completed = 0;
        while completed < iterations {
            if self.pause.is_paused() {
                tracing::info!(completed, requested = iterations, "run paused");
                self.state = AppState::Paused;
                break;
            }
            composite.process()?;
            completed += 1;
            self.iterations += 1;
        }
        Ok(completed)
    }

    /// Best-effort pause; a running `run` stops before its next pass.
    pub fn pause(&mut self) {
        self.pause.pause();
        if self.state == AppState::Ready {
            self.state = AppState::Paused;
        }
    }

    pub fn resume(&mut self) -> Result<()> {
        self.require_state("resume", &[AppState::Paused, AppState::Ready])?;
        self.pause.clear();
        self.state = AppState::Ready;
        Ok(())
    }

    /// Postprocess and release the composite. Calling it with nothing
    /// defined is a no-op.
    pub fn quit(&mut self) -> Result<()> {
        let started = matches!(self.state, AppState::Ready | AppState::Paused);
        let composite = self.composite.take();
        self.state = AppState::Undefined;
        self.pause.clear();
        if let (true, Some(mut composite)) = (started, composite) {
            composite.postprocess()?;
            tracing::info!(
                composite = %composite.name(),
                iterations = self.iterations,
                "application finished"
            );
        }
        Ok(())
    }

    /// Tear down and rebuild with new parameters, ready to run.
    pub fn reinit(&mut self, params: ParameterSet) -> Result<()> {
        self.quit()?;
        self.define(params)?;
        self.init()
    }

    /// Rebuild with the parameters of the last `define`.
    pub fn restart(&mut self) -> Result<()> {
        let params = self.params.clone();
        self.reinit(params)
    }

    pub fn dump(&self) -> Option<GraphSnapshot> {
        self.composite.as_ref().map(Composite::dump)
    }

    /// Execute one controller command.
    pub fn handle(&mut self, command: ControlCommand) -> ControlReply {
        tracing::debug!(?command, "control command");
        let outcome = match command {
            ControlCommand::Define(params) => self.define(params).map(|_| ControlReply::Done),
            ControlCommand::Init => self.init().map(|_| ControlReply::Done),
            ControlCommand::Run(n) => self.run(n).map(|completed| ControlReply::Ran {
                completed,
                paused: self.state == AppState::Paused,
            }),
            ControlCommand::Pause => {
                self.pause();
                Ok(ControlReply::Done)
            }
            ControlCommand::Resume => self.resume().map(|_| ControlReply::Done),
            ControlCommand::Quit => self.quit().map(|_| ControlReply::Done),
            ControlCommand::Reinit(params) => self.reinit(params).map(|_| ControlReply::Done),
            ControlCommand::Dump => Ok(match self.dump() {
                Some(snapshot) => ControlReply::Dump(Box::new(snapshot)),
                None => ControlReply::Done,
            }),
            ControlCommand::Snapshot => Ok(ControlReply::Unsupported("snapshot")),
            ControlCommand::Recover => Ok(ControlReply::Unsupported("recover")),
        };
        outcome.unwrap_or_else(|e| {
            tracing::warn!("control command failed: {}", e);
            ControlReply::Failed {
                class: e.class(),
                message: e.to_string(),
            }
        })
    }
}

impl<A> Drop for ApplicationHolder<A> {
    fn drop(&mut self) {
        if let Some(mut composite) = self.composite.take() {
            if matches!(self.state, AppState::Ready | AppState::Paused) {
                if let Err(e) = composite.postprocess() {
                    tracing::warn!("postprocess on drop failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::error::{ErrorClass, StepGraphError};
    use crate::graph::Step;
    use crate::transport::MemoryChannel;
    use crate::work::holders::{RecordLog, Recorder, Scale, VectorSource};
    use crate::work::{SlotSpec, WorkContext, WorkHolder, WorkState};

    fn pipeline(log: RecordLog) -> impl Application {
        move |ctx: &ExecutionContext, params: &ParameterSet| -> Result<Composite> {
            let factor = params.require_float("factor")?;
            let mut graph = Composite::new("app");
            let a = graph.add_block(Step::from_prototype("a", VectorSource::new(vec![1.0, 2.0])?))?;
            let b = graph.add_block(Step::from_prototype("b", Scale::new(2, factor)?))?;
            let c = graph.add_block(Step::from_prototype("c", Recorder::new(2, log.clone())?))?;
            graph.connect(a, 0, b, 0, Connection::new("a-b", Box::new(MemoryChannel::new(ctx, "a-b"))))?;
            graph.connect(b, 0, c, 0, Connection::new("b-c", Box::new(MemoryChannel::new(ctx, "b-c"))))?;
            Ok(graph)
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let log = RecordLog::new();
        let mut holder = ApplicationHolder::new(pipeline(log.clone()), ExecutionContext::local());

        holder.define(ParameterSet::new().with("factor", 3.0)).unwrap();
        assert_eq!(holder.state(), AppState::Defined);
        holder.init().unwrap();
        assert_eq!(holder.run(4).unwrap(), 4);
        holder.quit().unwrap();

        assert_eq!(holder.state(), AppState::Undefined);
        assert_eq!(log.values(), vec![vec![3.0, 6.0]; 4]);
        assert!(holder.composite().is_none());
    }

    #[test]
    fn test_missing_parameter_fails_define() {
        let mut holder = ApplicationHolder::new(pipeline(RecordLog::new()), ExecutionContext::local());
        let err = holder.define(ParameterSet::new()).unwrap_err();
        assert!(matches!(err, StepGraphError::App(AppError::MissingParameter(_))));
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert_eq!(holder.state(), AppState::Undefined);
    }

    #[test]
    fn test_run_requires_init() {
        let mut holder = ApplicationHolder::new(pipeline(RecordLog::new()), ExecutionContext::local());
        holder.define(ParameterSet::new().with("factor", 1.0)).unwrap();
        assert!(matches!(
            holder.run(1),
            Err(StepGraphError::App(AppError::InvalidState { command: "run", .. }))
        ));
    }

    #[test]
    fn test_pause_and_resume() {
        let log = RecordLog::new();
        let mut holder = ApplicationHolder::new(pipeline(log.clone()), ExecutionContext::local());
        holder.define(ParameterSet::new().with("factor", 1.0)).unwrap();
        holder.init().unwrap();

        holder.pause_handle().pause();
        assert_eq!(holder.run(5).unwrap(), 0);
        assert_eq!(holder.state(), AppState::Paused);

        holder.resume().unwrap();
        assert_eq!(holder.run(2).unwrap(), 2);
        assert_eq!(holder.iterations(), 2);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_reinit_rebuilds() {
        let log = RecordLog::new();
        let mut holder = ApplicationHolder::new(pipeline(log.clone()), ExecutionContext::local());
        holder.define(ParameterSet::new().with("factor", 1.0)).unwrap();
        holder.init().unwrap();
        holder.run(1).unwrap();

        holder.reinit(ParameterSet::new().with("factor", 10.0)).unwrap();
        assert_eq!(holder.state(), AppState::Ready);
        holder.run(1).unwrap();
        assert_eq!(log.values(), vec![vec![1.0, 2.0], vec![10.0, 20.0]]);
    }

    #[derive(Clone)]
    struct Gated(Arc<AtomicBool>);

    impl WorkHolder for Gated {
        fn type_name(&self) -> &str {
            "gated"
        }
        fn inputs(&self) -> &[SlotSpec] {
            &[]
        }
        fn outputs(&self) -> &[SlotSpec] {
            &[]
        }
        fn preprocess(&mut self, _ctx: &mut WorkContext<'_>) -> anyhow::Result<()> {
            anyhow::ensure!(self.0.load(Ordering::SeqCst), "device not ready");
            Ok(())
        }
        fn process(&mut self, _ctx: &mut WorkContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_init_can_be_retried_or_quit() {
        let log = RecordLog::new();
        let ready = Arc::new(AtomicBool::new(false));
        let gate = ready.clone();
        let app = move |ctx: &ExecutionContext, params: &ParameterSet| -> Result<Composite> {
            let mut graph = pipeline(log.clone()).define(ctx, params)?;
            graph.add_block(Step::from_prototype("gate", Gated(gate.clone())))?;
            Ok(graph)
        };
        let mut holder = ApplicationHolder::new(app, ExecutionContext::local());
        holder.define(ParameterSet::new().with("factor", 1.0)).unwrap();

        let err = holder.init().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Computation);
        assert_eq!(holder.state(), AppState::Defined);
        assert_eq!(holder.composite().unwrap().find_step("a").unwrap().state(), WorkState::Uninitialized);

        ready.store(true, Ordering::SeqCst);
        holder.init().unwrap();
        assert_eq!(holder.run(1).unwrap(), 1);
        holder.quit().unwrap();

        ready.store(false, Ordering::SeqCst);
        holder.define(ParameterSet::new().with("factor", 1.0)).unwrap();
        assert!(holder.init().is_err());
        holder.quit().unwrap();
        assert_eq!(holder.state(), AppState::Undefined);
    }

    #[test]
    fn test_snapshot_is_unsupported() {
        let mut holder = ApplicationHolder::new(pipeline(RecordLog::new()), ExecutionContext::local());
        assert!(matches!(
            holder.handle(ControlCommand::Snapshot),
            ControlReply::Unsupported("snapshot")
        ));
        assert!(matches!(
            holder.handle(ControlCommand::Recover),
            ControlReply::Unsupported("recover")
        ));
        assert!(matches!(
            holder.handle(ControlCommand::Run(1)),
            ControlReply::Failed { class: ErrorClass::Configuration, .. }
        ));
    }
}
