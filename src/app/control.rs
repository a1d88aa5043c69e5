//! Thread boundary between an external controller and the application.
//!
//! The controller holds a [`ControlBridge`]; the application thread owns the
//! command receiver and reply sender and runs [`serve`]. Commands are handled
//! strictly in order, one reply per command.

use crate::app::{AppError, Application, ApplicationHolder, PauseHandle};
use crate::config::ParameterSet;
use crate::error::{ErrorClass, Result};
use crate::graph::GraphSnapshot;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::time::Duration;

/// Lifecycle commands issued by a controller.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    Define(ParameterSet),
    Init,
    /// Run this many iterations.
    Run(u64),
    Pause,
    Resume,
    Quit,
    Reinit(ParameterSet),
    Dump,
    /// Checkpointing is not provided by the core.
    Snapshot,
    Recover,
}

#[derive(Debug, Clone)]
pub enum ControlReply {
    Done,
    Ran { completed: u64, paused: bool },
    Dump(Box<GraphSnapshot>),
    Failed { class: ErrorClass, message: String },
    Unsupported(&'static str),
}

/// Channel capacity for commands (controller → application).
const CMD_CHANNEL_CAPACITY: usize = 64;
/// Channel capacity for replies (application → controller).
const REPLY_CHANNEL_CAPACITY: usize = 64;

/// Controller-side handle.
pub struct ControlBridge {
    pub cmd_tx: Sender<ControlCommand>,
    pub reply_rx: Receiver<ControlReply>,
    pause: PauseHandle,
}

impl ControlBridge {
    /// Create a bridge: `(bridge_for_controller, cmd_rx, reply_tx)`.
    ///
    /// The application thread owns `cmd_rx` and `reply_tx`. `pause` lets
    /// [`ControlBridge::pause`] interrupt a run that is in progress.
    pub fn new(pause: PauseHandle) -> (Self, Receiver<ControlCommand>, Sender<ControlReply>) {
        let (cmd_tx, cmd_rx) = bounded(CMD_CHANNEL_CAPACITY);
        let (reply_tx, reply_rx) = bounded(REPLY_CHANNEL_CAPACITY);
        (
            Self {
                cmd_tx,
                reply_rx,
                pause,
            },
            cmd_rx,
            reply_tx,
        )
    }

    pub fn send_command(&self, cmd: ControlCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    /// Wait for the next reply.
    pub fn recv_reply(&self) -> std::result::Result<ControlReply, AppError> {
        self.reply_rx.recv().map_err(|_| AppError::ControlClosed)
    }

    pub fn recv_reply_timeout(&self, timeout: Duration) -> Option<ControlReply> {
        self.reply_rx.recv_timeout(timeout).ok()
    }

    /// Send `cmd` and wait for its reply.
    pub fn request(&self, cmd: ControlCommand) -> std::result::Result<ControlReply, AppError> {
        self.cmd_tx.send(cmd).map_err(|_| AppError::ControlClosed)?;
        self.recv_reply()
    }

    pub fn define(&self, params: ParameterSet) -> std::result::Result<ControlReply, AppError> {
        self.request(ControlCommand::Define(params))
    }

    pub fn init(&self) -> std::result::Result<ControlReply, AppError> {
        self.request(ControlCommand::Init)
    }

    /// Queue a run without waiting; collect the result with `recv_reply`.
    pub fn start_run(&self, iterations: u64) -> bool {
        self.send_command(ControlCommand::Run(iterations))
    }

    pub fn run(&self, iterations: u64) -> std::result::Result<ControlReply, AppError> {
        self.request(ControlCommand::Run(iterations))
    }

    /// Stop a run in progress before its next pass. The reply to the
    /// interrupted run arrives first, then the reply to the pause itself.
    pub fn pause(&self) -> bool {
        self.pause.pause();
        self.send_command(ControlCommand::Pause)
    }

    pub fn resume(&self) -> std::result::Result<ControlReply, AppError> {
        self.request(ControlCommand::Resume)
    }

    pub fn dump(&self) -> std::result::Result<ControlReply, AppError> {
        self.request(ControlCommand::Dump)
    }

    pub fn quit(&self) -> std::result::Result<ControlReply, AppError> {
        self.request(ControlCommand::Quit)
    }
}

/// Handle commands until `Quit` is processed or the controller goes away.
/// A vanished controller quits the application. Returns the holder so its
/// final state can be inspected.
pub fn serve<A: Application>(
    mut holder: ApplicationHolder<A>,
    commands: Receiver<ControlCommand>,
    replies: Sender<ControlReply>,
) -> Result<ApplicationHolder<A>> {
    tracing::info!("control loop started");
    while let Ok(command) = commands.recv() {
        let quit = matches!(command, ControlCommand::Quit);
        let reply = holder.handle(command);
        if replies.send(reply).is_err() {
            tracing::warn!("controller dropped its reply channel");
            break;
        }
        if quit {
            tracing::info!("control loop finished");
            return Ok(holder);
        }
    }
    holder.quit()?;
    tracing::info!("controller gone, application quit");
    Ok(holder)
}
