use std::path::PathBuf;

use tracing::{debug, error, info};

use super::{unwind, StudioQueue};
use crate::codec::ProjectRef;
use crate::command::{Command, CommandBody, Progress, Step};
use crate::error::CommandError;
use crate::events::StudioEvent;
use crate::notify::{Urgency, CHECK_LOG_HINT};
use crate::studio::Studio;

struct UnloadProject {
    room: String,
}

impl CommandBody<Studio> for UnloadProject {
    fn name(&self) -> &'static str {
        "unload project"
    }

    fn run(&mut self, studio: &mut Studio, step: Step) -> Progress {
        let Some(index) = studio.room_index(&self.room) else {
            error!("Cannot unload project of unknown room '{}'", self.room);
            studio.notify(Urgency::High, "Project unload failed", CHECK_LOG_HINT);
            return Progress::Failed;
        };

        if step.is_first() {
            info!("Unloading project of room '{}'", self.room);
            studio.rooms[index].supervisor_mut().stop();
        }

        let room = &mut studio.rooms[index];
        if room.has_running_apps() {
            debug!("room '{}' still has running apps", self.room);
            return Progress::Waiting;
        }

        for app in room.supervisor().apps() {
            studio.server_graph.remove_app_clients(app.uuid());
        }
        let had_project = room.project().is_some();
        room.unload_project();

        if had_project {
            studio.publish(StudioEvent::ProjectUnloaded {
                room: self.room.clone(),
            });
            studio.modified = true;
        }
        Progress::Done
    }
}

/// Queue the unload of a room's project.
pub fn unload_project(queue: &mut StudioQueue, room: &str) -> Result<(), CommandError> {
    if room.is_empty() {
        return Err(CommandError::InvalidArgument("room name is empty".to_string()));
    }
    queue.add_command(Command::new(UnloadProject {
        room: room.to_string(),
    }))
}

struct LoadProject {
    room: String,
    dir: PathBuf,
}

impl CommandBody<Studio> for LoadProject {
    fn name(&self) -> &'static str {
        "load project"
    }

    fn run(&mut self, studio: &mut Studio, _step: Step) -> Progress {
        let Some(index) = studio.room_index(&self.room) else {
            error!("Cannot load project into unknown room '{}'", self.room);
            studio.notify(Urgency::High, "Project load failed", CHECK_LOG_HINT);
            return Progress::Failed;
        };

        info!("Loading project from {} into room '{}'", self.dir.display(), self.room);
        let doc = match studio.codec.read_project(&self.dir) {
            Ok(doc) => doc,
            Err(e) => {
                error!("{}", e);
                studio.notify(Urgency::High, "Project load failed", CHECK_LOG_HINT);
                return Progress::Failed;
            }
        };

        let started = studio.is_started();
        let room = &mut studio.rooms[index];
        if let Err(e) = room.apply_project(&doc) {
            error!("Failed to restore project '{}': {}", doc.name, e);
            room.unload_project();
            studio.notify(Urgency::High, "Project load failed", CHECK_LOG_HINT);
            return Progress::Failed;
        }

        room.set_project(ProjectRef {
            name: doc.name.clone(),
            dir: self.dir.clone(),
        });
        if started {
            room.supervisor_mut().autorun(studio.launcher.as_mut());
        }

        studio.publish(StudioEvent::ProjectLoaded {
            room: self.room.clone(),
            name: doc.name,
        });
        studio.notify(Urgency::Low, "Project loaded", "Project loaded successfully.");
        studio.modified = true;
        Progress::Done
    }
}

/// Queue the unload of the room's current project and the load of the
/// project stored in `dir`.
pub fn load_project(
    queue: &mut StudioQueue,
    studio: &Studio,
    room: &str,
    dir: impl Into<PathBuf>,
) -> Result<(), CommandError> {
    let dir = dir.into();
    if studio.room_by_name(room).is_none() {
        return Err(CommandError::UnknownRoom(room.to_string()));
    }
    if dir.as_os_str().is_empty() {
        return Err(CommandError::InvalidArgument(
            "project directory is empty".to_string(),
        ));
    }

    let before = queue.len();
    unload_project(queue, room)?;

    if let Err(e) = queue.add_command(Command::new(LoadProject {
        room: room.to_string(),
        dir,
    })) {
        unwind(queue, before);
        return Err(e);
    }
    Ok(())
}

struct SaveProject {
    room: String,
    dir: Option<PathBuf>,
    name: Option<String>,
}

impl SaveProject {
    fn save(&self, studio: &mut Studio) -> Result<ProjectRef, String> {
        let index = studio
            .room_index(&self.room)
            .ok_or_else(|| format!("unknown room '{}'", self.room))?;
        let room = &mut studio.rooms[index];

        let current = room.project().cloned();
        let dir = self
            .dir
            .clone()
            .or_else(|| current.as_ref().map(|p| p.dir.clone()))
            .ok_or_else(|| "project directory not set".to_string())?;
        let name = self
            .name
            .clone()
            .or_else(|| current.as_ref().map(|p| p.name.clone()))
            .ok_or_else(|| "project name not set".to_string())?;

        room.supervisor_mut().save(|ok| {
            if !ok {
                debug!("not every project app acknowledged the save request");
            }
        });

        let doc = room.project_document(&name);
        studio
            .codec
            .write_project(&dir, &doc)
            .map_err(|e| e.to_string())?;

        let project = ProjectRef { name, dir };
        studio.rooms[index].set_project(project.clone());
        Ok(project)
    }
}

impl CommandBody<Studio> for SaveProject {
    fn name(&self) -> &'static str {
        "save project"
    }

    fn run(&mut self, studio: &mut Studio, _step: Step) -> Progress {
        match self.save(studio) {
            Ok(project) => {
                info!(
                    "Project '{}' of room '{}' saved to {}",
                    project.name,
                    self.room,
                    project.dir.display()
                );
                studio.notify(Urgency::Low, "Project saved", "Project saved successfully.");
            }
            Err(e) => {
                error!("Failed to save project of room '{}': {}", self.room, e);
                studio.notify(Urgency::High, "Project save failed", CHECK_LOG_HINT);
            }
        }
        Progress::Done
    }
}

/// Queue a project save. The first save of a room needs both `dir` and
/// `name`; later ones reuse whatever was last saved or loaded.
pub fn save_project(
    queue: &mut StudioQueue,
    studio: &Studio,
    room: &str,
    dir: Option<PathBuf>,
    name: Option<&str>,
) -> Result<(), CommandError> {
    let Some(target) = studio.room_by_name(room) else {
        return Err(CommandError::UnknownRoom(room.to_string()));
    };
    if target.project().is_none() && (dir.is_none() || name.is_none()) {
        return Err(CommandError::InvalidArgument(
            "first project save needs a directory and a name".to_string(),
        ));
    }

    queue.add_command(Command::new(SaveProject {
        room: room.to_string(),
        dir,
        name: name.map(str::to_string),
    }))
}
