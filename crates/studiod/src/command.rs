//! Queued units of session work
//!
//! A command moves PREPARE -> PENDING (enqueued) -> WAITING* -> DONE. The
//! queue drives it by calling [`Command::run`] once per tick while it is the
//! head. Bodies report back with [`Progress`]; the command owns the state
//! bookkeeping so a body can never leave it in an impossible state.

use std::fmt;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// Built but not yet enqueued
    Prepare,
    /// Enqueued, never run
    Pending,
    /// Ran at least once and is waiting for an external condition
    Waiting,
    /// Finished
    Done,
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandState::Prepare => write!(f, "prepare"),
            CommandState::Pending => write!(f, "pending"),
            CommandState::Waiting => write!(f, "waiting"),
            CommandState::Done => write!(f, "done"),
        }
    }
}

/// Outcome of one run of a command body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Completed; the queue moves on in the same tick
    Done,
    /// Yield to the driver and run again on a later tick
    Waiting,
    /// Fatal; the whole queue is abandoned
    Failed,
}

/// What a body sees when it is run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// `Pending` on the first run, `Waiting` on every later one
    pub state: CommandState,
    /// Cancellation was requested while this command was in flight
    pub cancelled: bool,
}

impl Step {
    pub fn is_first(&self) -> bool {
        self.state == CommandState::Pending
    }
}

/// The per-operation part of a command.
///
/// `C` is the context every command of a queue operates on.
pub trait CommandBody<C> {
    fn name(&self) -> &'static str;

    fn run(&mut self, cx: &mut C, step: Step) -> Progress;

    /// Called once when the command leaves the queue, whichever way.
    fn on_destroy(&mut self) {}
}

/// Command body backed by a closure
struct Inline<F> {
    name: &'static str,
    body: F,
}

impl<C, F> CommandBody<C> for Inline<F>
where
    F: FnMut(&mut C, Step) -> Progress,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&mut self, cx: &mut C, step: Step) -> Progress {
        (self.body)(cx, step)
    }
}

pub struct Command<C> {
    state: CommandState,
    cancel: bool,
    body: Box<dyn CommandBody<C>>,
}

impl<C> Command<C> {
    pub fn new(body: impl CommandBody<C> + 'static) -> Self {
        Self {
            state: CommandState::Prepare,
            cancel: false,
            body: Box::new(body),
        }
    }

    /// Single-step command built from a closure.
    pub fn inline<F>(name: &'static str, body: F) -> Self
    where
        F: FnMut(&mut C, Step) -> Progress + 'static,
        C: 'static,
    {
        Self::new(Inline { name, body })
    }

    pub fn name(&self) -> &'static str {
        self.body.name()
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
    }

    pub(crate) fn mark_pending(&mut self) {
        debug_assert_eq!(self.state, CommandState::Prepare);
        self.state = CommandState::Pending;
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancel = true;
    }

    /// Run the body once.
    ///
    /// Returns false when the command failed. A cancelled command that
    /// still wants to wait is failed here, so cancellation always ends
    /// the in-flight command on its next tick.
    pub(crate) fn run(&mut self, cx: &mut C) -> bool {
        debug_assert!(
            matches!(self.state, CommandState::Pending | CommandState::Waiting),
            "command '{}' run in state {}",
            self.name(),
            self.state
        );

        let step = Step {
            state: self.state,
            cancelled: self.cancel,
        };

        match self.body.run(cx, step) {
            Progress::Done => {
                self.state = CommandState::Done;
                true
            }
            Progress::Waiting if self.cancel => {
                warn!("'{}' command cancelled while waiting", self.name());
                self.state = CommandState::Done;
                false
            }
            Progress::Waiting => {
                self.state = CommandState::Waiting;
                true
            }
            Progress::Failed => {
                self.state = CommandState::Done;
                false
            }
        }
    }

    pub(crate) fn destroy(mut self) {
        debug!("'{}' command destroyed in state {}", self.name(), self.state);
        self.body.on_destroy();
    }
}

impl<C> fmt::Debug for Command<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name())
            .field("state", &self.state)
            .field("cancel", &self.cancel)
            .finish()
    }
}
