use tracing::{error, info};

use super::StudioQueue;
use crate::command::{Command, Progress};
use crate::error::CommandError;
use crate::events::StudioEvent;
use crate::studio::Studio;

/// Queue a rename. The file on disk follows on the next save.
pub fn rename_studio(queue: &mut StudioQueue, name: &str) -> Result<(), CommandError> {
    if name.is_empty() {
        return Err(CommandError::InvalidArgument(
            "studio name is empty".to_string(),
        ));
    }

    let name = name.to_string();
    queue.add_command(Command::inline("rename studio", move |studio: &mut Studio, _| {
        if !studio.is_loaded() {
            error!("Cannot rename, no studio is loaded");
            return Progress::Failed;
        }

        info!("Renaming studio '{}' to '{}'", studio.name, name);
        studio.name = name.clone();
        studio.modified = true;
        studio.publish(StudioEvent::StudioRenamed { name: name.clone() });
        Progress::Done
    }))
}
