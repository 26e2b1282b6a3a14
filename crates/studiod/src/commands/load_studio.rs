use std::path::PathBuf;

use tracing::{error, info};

use super::{start_studio, unload_studio, unwind, StudioQueue};
use crate::command::{Command, CommandBody, Progress, Step};
use crate::error::CommandError;
use crate::notify::{Urgency, CHECK_LOG_HINT};
use crate::studio::Studio;

struct LoadStudio {
    name: String,
    path: PathBuf,
}

impl CommandBody<Studio> for LoadStudio {
    fn name(&self) -> &'static str {
        "load studio"
    }

    fn run(&mut self, studio: &mut Studio, _step: Step) -> Progress {
        info!("Loading studio '{}' from {}", self.name, self.path.display());

        if let Err(e) = studio.server.reset_all_params() {
            error!("Failed to reset audio server parameters: {}", e);
            studio.notify(Urgency::High, "Studio load failed", CHECK_LOG_HINT);
            return Progress::Failed;
        }

        let doc = match studio.codec.read_studio(&self.path) {
            Ok(doc) => doc,
            Err(e) => {
                error!("{}", e);
                studio.notify(Urgency::High, "Studio load failed", CHECK_LOG_HINT);
                return Progress::Failed;
            }
        };

        if let Err(e) = studio.apply_document(&doc) {
            error!("Failed to restore studio '{}': {}", self.name, e);
            studio.clear();
            studio.notify(Urgency::High, "Studio load failed", CHECK_LOG_HINT);
            return Progress::Failed;
        }

        studio.name = self.name.clone();
        studio.filename = Some(self.path.clone());
        studio.persisted = true;
        studio.modified = false;
        studio.automatic = false;
        studio.announce();
        info!("Studio '{}' loaded", self.name);
        Progress::Done
    }
}

/// Queue the unload of the current session, the load of `name` and,
/// with `autostart`, a start.
pub fn load_studio(
    queue: &mut StudioQueue,
    studio: &Studio,
    name: &str,
    autostart: bool,
) -> Result<(), CommandError> {
    if name.is_empty() {
        return Err(CommandError::InvalidArgument(
            "studio name is empty".to_string(),
        ));
    }

    let (path, _) = studio.compose_path(name);
    match path.try_exists() {
        Ok(true) => {}
        Ok(false) => return Err(CommandError::StudioNotFound(name.to_string())),
        Err(e) => return Err(CommandError::storage(path, e)),
    }

    let before = queue.len();
    unload_studio(queue, studio)?;

    let result = queue
        .add_command(Command::new(LoadStudio {
            name: name.to_string(),
            path,
        }))
        .and_then(|()| if autostart { start_studio(queue) } else { Ok(()) });

    if let Err(e) = result {
        unwind(queue, before);
        return Err(e);
    }
    Ok(())
}
