use tracing::{info, warn};

use super::{unload_studio, unwind, StudioQueue};
use crate::command::{Command, Progress};
use crate::error::CommandError;
use crate::studio::{generate_name, Studio};

/// Queue the unload of the current session and an empty studio in its
/// place. An empty `name` gets a generated one.
pub fn new_studio(queue: &mut StudioQueue, studio: &Studio, name: &str) -> Result<(), CommandError> {
    let before = queue.len();
    unload_studio(queue, studio)?;

    let name = name.to_string();
    let create = Command::inline("new studio", move |studio: &mut Studio, _| {
        if let Err(e) = studio.server.reset_all_params() {
            warn!("Failed to reset audio server parameters: {}", e);
        }

        studio.name = if name.is_empty() {
            generate_name()
        } else {
            name.clone()
        };
        studio.filename = None;
        info!("New studio '{}'", studio.name);
        studio.announce();
        Progress::Done
    });

    if let Err(e) = queue.add_command(create) {
        unwind(queue, before);
        return Err(e);
    }
    Ok(())
}
