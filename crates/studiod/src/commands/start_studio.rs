use tracing::{error, info, warn};

use super::StudioQueue;
use crate::clock::{expired, Deadline};
use crate::command::{Command, CommandBody, Progress, Step};
use crate::environment::Signal;
use crate::error::CommandError;
use crate::notify::{Urgency, CHECK_LOG_HINT};
use crate::studio::Studio;

struct StartStudio {
    deadline: Option<Deadline>,
}

impl CommandBody<Studio> for StartStudio {
    fn name(&self) -> &'static str {
        "start studio"
    }

    fn run(&mut self, studio: &mut Studio, step: Step) -> Progress {
        if step.is_first() {
            if studio.is_started() {
                info!("Ignoring start request because studio is already started.");
                return Progress::Done;
            }

            let running = studio.running_app_count();
            if running != 0 {
                error!(
                    "Cannot start studio while {} of its apps are still running",
                    running
                );
                studio.notify(
                    Urgency::High,
                    "Cannot start studio",
                    "Apps from a previous run are still running. Stop them and try again.",
                );
                return Progress::Failed;
            }

            info!("Starting audio server...");
            if let Err(e) = studio.server.start_server() {
                error!("Failed to start audio server: {}", e);
                studio.notify(Urgency::High, "Studio start failed", CHECK_LOG_HINT);
                return Progress::Failed;
            }

            self.deadline = Deadline::after(studio.clock.as_ref(), studio.start_timeout);
            if self.deadline.is_none() {
                warn!("Clock unavailable, audio server start will not time out");
            }
        }

        match studio.env.consume_change(Signal::ServerStarted) {
            Some(true) => {
                info!("Wait for audio server start complete.");
                studio.on_server_started();
                Progress::Done
            }
            Some(false) => {
                error!("Audio server stopped while waiting for it to start");
                studio.notify(Urgency::High, "Studio start failed", CHECK_LOG_HINT);
                Progress::Failed
            }
            None if expired(self.deadline, studio.clock.as_ref()) => {
                error!("Wait for audio server start timed out.");
                studio.notify(
                    Urgency::High,
                    "Studio start failed",
                    "The audio server did not start in time.",
                );
                Progress::Failed
            }
            None => Progress::Waiting,
        }
    }
}

/// Queue a studio start.
pub fn start_studio(queue: &mut StudioQueue) -> Result<(), CommandError> {
    queue.add_command(Command::new(StartStudio { deadline: None }))
}
