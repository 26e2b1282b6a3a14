use tracing::{error, info};

use super::{stop_studio, unwind, StudioQueue};
use crate::command::{Command, Progress};
use crate::error::CommandError;
use crate::studio::Studio;

/// Queue the stop-then-clear pair that empties the session.
///
/// The stop is skipped when the studio is stopped and nothing is queued
/// ahead that could start it.
pub fn unload_studio(queue: &mut StudioQueue, studio: &Studio) -> Result<(), CommandError> {
    let before = queue.len();

    if studio.is_started() || !queue.is_empty() {
        stop_studio(queue)?;
    }

    let clear = Command::inline("clear studio", |studio: &mut Studio, _| {
        if studio.is_started() {
            error!("Cannot unload a started studio");
            return Progress::Failed;
        }
        if studio.is_loaded() {
            info!("Unloading studio '{}'", studio.name());
        }
        studio.clear();
        Progress::Done
    });

    if let Err(e) = queue.add_command(clear) {
        unwind(queue, before);
        return Err(e);
    }
    Ok(())
}
