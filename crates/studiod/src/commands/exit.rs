use tracing::info;

use super::{unload_studio, unwind, StudioQueue};
use crate::command::{Command, Progress};
use crate::error::CommandError;
use crate::studio::Studio;

/// Queue the unload of the session followed by the exit marker.
///
/// The marker fails on purpose so that nothing queued behind it runs.
pub fn exit(queue: &mut StudioQueue, studio: &Studio) -> Result<(), CommandError> {
    let before = queue.len();
    unload_studio(queue, studio)?;

    let marker = Command::inline("exit", |studio: &mut Studio, _| {
        info!("Studio unloaded, exiting");
        studio.exit_requested = true;
        Progress::Failed
    });

    if let Err(e) = queue.add_command(marker) {
        unwind(queue, before);
        return Err(e);
    }
    Ok(())
}
