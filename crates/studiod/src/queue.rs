//! FIFO of commands driven one step per tick
//!
//! Only the head ever runs. A head that finishes is popped and the next one
//! runs in the same call, a waiting head stalls the queue, and a failure
//! throws away every queued command.

use std::collections::VecDeque;

use tracing::{debug, error, warn};

use crate::command::{Command, CommandState};
use crate::error::CommandError;

pub struct CommandQueue<C> {
    commands: VecDeque<Command<C>>,
    cancel: bool,
}

impl<C> Default for CommandQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CommandQueue<C> {
    pub fn new() -> Self {
        Self {
            commands: VecDeque::new(),
            cancel: false,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
    }

    /// Names and states, head first.
    pub fn snapshot(&self) -> Vec<(&'static str, CommandState)> {
        self.commands.iter().map(|c| (c.name(), c.state())).collect()
    }

    /// Append a command. Nothing runs until the next [`run`](Self::run).
    pub fn add_command(&mut self, mut command: Command<C>) -> Result<(), CommandError> {
        if self.cancel {
            warn!(
                "rejecting '{}' command, queue is being cancelled",
                command.name()
            );
            command.destroy();
            return Err(CommandError::QueueCancelled);
        }

        command.mark_pending();
        debug!("queued '{}' command", command.name());
        self.commands.push_back(command);
        Ok(())
    }

    /// Remove the most recently added command, which must not have run yet.
    /// Unwinds a chain whose later enqueue failed.
    pub fn drop_command(&mut self) {
        match self.commands.back() {
            Some(tail) if tail.state() == CommandState::Pending => {
                if let Some(tail) = self.commands.pop_back() {
                    debug!("dropping '{}' command", tail.name());
                    tail.destroy();
                }
            }
            Some(tail) => {
                error!(
                    "not dropping '{}' command in state {}",
                    tail.name(),
                    tail.state()
                );
            }
            None => {
                error!("drop_command on empty queue");
            }
        }
    }

    /// Run the head, then every following head that finishes in one go.
    ///
    /// Returns false when a command failed; the queue is empty afterwards.
    pub fn run(&mut self, cx: &mut C) -> bool {
        while let Some(head) = self.commands.front_mut() {
            if !head.run(cx) {
                error!("'{}' command failed", head.name());
                self.clear();
                return false;
            }

            if head.state() == CommandState::Waiting {
                return true;
            }

            if let Some(done) = self.commands.pop_front() {
                debug!("'{}' command finished", done.name());
                done.destroy();
            }
        }

        self.cancel = false;
        true
    }

    /// Abandon queued work.
    ///
    /// A waiting head keeps its slot and is told about the cancellation on
    /// its next run; everything behind it goes now. Otherwise the queue is
    /// cleared.
    pub fn cancel(&mut self) {
        let head_waiting = match self.commands.front() {
            None => return,
            Some(head) => head.state() == CommandState::Waiting,
        };

        if !head_waiting {
            self.clear();
            return;
        }

        while self.commands.len() > 1 {
            if let Some(cmd) = self.commands.pop_back() {
                cmd.destroy();
            }
        }

        if let Some(head) = self.commands.front_mut() {
            warn!("cancelling '{}' command", head.name());
            head.mark_cancelled();
        }
        self.cancel = true;
    }

    pub fn clear(&mut self) {
        while let Some(cmd) = self.commands.pop_front() {
            cmd.destroy();
        }
        self.cancel = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandBody, Progress, Step};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Context recording which commands ran.
    #[derive(Default)]
    struct Log {
        runs: Vec<&'static str>,
    }

    fn finishing(name: &'static str) -> Command<Log> {
        Command::inline(name, move |log: &mut Log, _| {
            log.runs.push(name);
            Progress::Done
        })
    }

    fn waiting(name: &'static str) -> Command<Log> {
        Command::inline(name, move |log: &mut Log, _| {
            log.runs.push(name);
            Progress::Waiting
        })
    }

    fn failing(name: &'static str) -> Command<Log> {
        Command::inline(name, move |log: &mut Log, _| {
            log.runs.push(name);
            Progress::Failed
        })
    }

    struct Tracked {
        destroyed: Rc<RefCell<Vec<&'static str>>>,
        name: &'static str,
    }

    impl CommandBody<Log> for Tracked {
        fn name(&self) -> &'static str {
            self.name
        }

        fn run(&mut self, log: &mut Log, _step: Step) -> Progress {
            log.runs.push(self.name);
            Progress::Waiting
        }

        fn on_destroy(&mut self) {
            self.destroyed.borrow_mut().push(self.name);
        }
    }

    #[test]
    fn test_add_does_not_run() {
        let mut queue = CommandQueue::new();
        queue.add_command(finishing("a")).unwrap();
        assert_eq!(queue.snapshot(), vec![("a", CommandState::Pending)]);
    }

    #[test]
    fn test_done_heads_cascade_in_one_run() {
        let mut queue = CommandQueue::new();
        let mut log = Log::default();
        queue.add_command(finishing("a")).unwrap();
        queue.add_command(finishing("b")).unwrap();
        queue.add_command(waiting("c")).unwrap();
        queue.add_command(finishing("d")).unwrap();

        assert!(queue.run(&mut log));
        assert_eq!(log.runs, vec!["a", "b", "c"]);
        assert_eq!(
            queue.snapshot(),
            vec![("c", CommandState::Waiting), ("d", CommandState::Pending)]
        );
    }

    #[test]
    fn test_failure_empties_queue() {
        let mut queue = CommandQueue::new();
        let mut log = Log::default();
        queue.add_command(finishing("a")).unwrap();
        queue.add_command(failing("b")).unwrap();
        queue.add_command(finishing("c")).unwrap();

        assert!(!queue.run(&mut log));
        assert!(queue.is_empty());
        assert_eq!(log.runs, vec!["a", "b"]);
    }

    #[test]
    fn test_run_on_empty_queue_succeeds() {
        let mut queue: CommandQueue<Log> = CommandQueue::new();
        assert!(queue.run(&mut Log::default()));
    }

    #[test]
    fn test_drop_command_removes_pending_tail_only() {
        let mut queue = CommandQueue::new();
        let mut log = Log::default();
        queue.add_command(waiting("a")).unwrap();
        queue.run(&mut log);

        // Waiting tail stays
        queue.drop_command();
        assert_eq!(queue.len(), 1);

        queue.add_command(finishing("b")).unwrap();
        queue.drop_command();
        assert_eq!(queue.snapshot(), vec![("a", CommandState::Waiting)]);
    }

    #[test]
    fn test_cancel_pending_queue_clears() {
        let mut queue = CommandQueue::new();
        queue.add_command(finishing("a")).unwrap();
        queue.add_command(finishing("b")).unwrap();

        queue.cancel();
        assert!(queue.is_empty());
        assert!(!queue.is_cancelled());
    }

    #[test]
    fn test_cancel_waiting_head_keeps_only_head() {
        let destroyed = Rc::new(RefCell::new(Vec::new()));
        let mut queue = CommandQueue::new();
        let mut log = Log::default();
        queue
            .add_command(Command::new(Tracked {
                destroyed: destroyed.clone(),
                name: "head",
            }))
            .unwrap();
        queue
            .add_command(Command::new(Tracked {
                destroyed: destroyed.clone(),
                name: "behind",
            }))
            .unwrap();
        queue.run(&mut log);

        queue.cancel();
        assert!(queue.is_cancelled());
        assert_eq!(queue.len(), 1);
        assert_eq!(*destroyed.borrow(), vec!["behind"]);

        assert!(matches!(
            queue.add_command(finishing("late")),
            Err(CommandError::QueueCancelled)
        ));

        // Head still waits, so the cancellation fails it
        assert!(!queue.run(&mut log));
        assert!(queue.is_empty());
        assert!(!queue.is_cancelled());
        assert_eq!(*destroyed.borrow(), vec!["behind", "head"]);

        queue.add_command(finishing("after")).unwrap();
    }

    #[test]
    fn test_cancelled_head_that_finishes_resets_flag() {
        let mut queue = CommandQueue::new();
        let mut log = Log::default();
        queue
            .add_command(Command::inline("polite", |_: &mut Log, step: Step| {
                if step.cancelled {
                    Progress::Done
                } else {
                    Progress::Waiting
                }
            }))
            .unwrap();
        queue.run(&mut log);
        queue.cancel();

        assert!(queue.run(&mut log));
        assert!(queue.is_empty());
        assert!(!queue.is_cancelled());
    }

    #[test]
    fn test_cancel_on_empty_queue_is_noop() {
        let mut queue: CommandQueue<Log> = CommandQueue::new();
        queue.cancel();
        assert!(!queue.is_cancelled());
    }

    #[test]
    fn test_clear_runs_destructors() {
        let destroyed = Rc::new(RefCell::new(Vec::new()));
        let mut queue = CommandQueue::new();
        for name in ["x", "y"] {
            queue
                .add_command(Command::new(Tracked {
                    destroyed: destroyed.clone(),
                    name,
                }))
                .unwrap();
        }
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(*destroyed.borrow(), vec!["x", "y"]);
    }
}
