use tracing::{debug, error, info};

use super::StudioQueue;
use crate::clock::{expired, Deadline};
use crate::command::{Command, CommandBody, Progress, Step};
use crate::environment::Signal;
use crate::error::CommandError;
use crate::notify::{Urgency, CHECK_LOG_HINT};
use crate::studio::Studio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopPhase {
    /// Clients of our apps must leave the server first
    WaitClientsGone,
    /// Then every child process must exit
    WaitChildrenGone,
    /// Stop requested, waiting for the server to confirm
    WaitServerStopped,
}

struct StopStudio {
    phase: StopPhase,
    deadline: Option<Deadline>,
    /// The stop request errored; poll the server directly
    request_failed: bool,
}

impl StopStudio {
    fn server_stopped(&mut self, studio: &mut Studio) -> Result<bool, ()> {
        match studio.env.consume_change(Signal::ServerStarted) {
            Some(started) => Ok(!started),
            None if self.request_failed => match studio.server.is_started() {
                Ok(true) => Ok(false),
                Ok(false) => {
                    studio.env.reset_stealth(Signal::ServerStarted);
                    Ok(true)
                }
                Err(e) => {
                    error!("Failed to query audio server state: {}", e);
                    Err(())
                }
            },
            None => Ok(false),
        }
    }
}

impl CommandBody<Studio> for StopStudio {
    fn name(&self) -> &'static str {
        "stop studio"
    }

    fn run(&mut self, studio: &mut Studio, step: Step) -> Progress {
        if step.is_first() {
            if !studio.is_started() {
                info!("Ignoring stop request because studio is already stopped.");
                return Progress::Done;
            }

            studio.server_graph.dump();
            studio.studio_graph.dump();

            studio.stop_all_apps();
            self.phase = StopPhase::WaitClientsGone;
        }

        if self.phase == StopPhase::WaitClientsGone {
            let clients = studio.managed_client_count();
            if clients != 0 {
                debug!("{} clients started by our apps are visible", clients);
                return Progress::Waiting;
            }
            self.phase = StopPhase::WaitChildrenGone;
        }

        if self.phase == StopPhase::WaitChildrenGone {
            let children = studio.running_app_count();
            if children != 0 {
                debug!("{} app processes still running", children);
                return Progress::Waiting;
            }

            info!("Stopping audio server...");
            self.phase = StopPhase::WaitServerStopped;
            self.deadline = Deadline::after(studio.clock.as_ref(), studio.stop_timeout);
            if let Err(e) = studio.server.stop_server() {
                // Stop requests are known to fail even when the stop goes through
                error!("Stopping audio server failed: {}. Waiting for the stop anyway...", e);
                self.request_failed = true;
            }
        }

        match self.server_stopped(studio) {
            Err(()) => {
                studio.notify(Urgency::High, "Studio stop failed", CHECK_LOG_HINT);
                return Progress::Failed;
            }
            Ok(false) if expired(self.deadline, studio.clock.as_ref()) => {
                error!("Wait for audio server stop timed out.");
                studio.notify(
                    Urgency::High,
                    "Studio stop failed",
                    "The audio server did not stop in time.",
                );
                return Progress::Failed;
            }
            Ok(false) => return Progress::Waiting,
            Ok(true) => {}
        }

        info!("Wait for audio server stop complete.");
        studio.on_server_stopped();
        studio.studio_graph.dump();
        Progress::Done
    }
}

/// Queue a studio stop.
pub fn stop_studio(queue: &mut StudioQueue) -> Result<(), CommandError> {
    queue.add_command(Command::new(StopStudio {
        phase: StopPhase::WaitClientsGone,
        deadline: None,
        request_failed: false,
    }))
}
