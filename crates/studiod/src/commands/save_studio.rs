use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::{error, info, warn};

use super::StudioQueue;
use crate::command::{Command, CommandBody, Progress, Step};
use crate::error::CommandError;
use crate::events::StudioEvent;
use crate::notify::{Urgency, CHECK_LOG_HINT};
use crate::studio::Studio;

/// Where a save writes and what it moves out of the way first
#[derive(Debug, Clone, PartialEq, Eq)]
struct SavePaths {
    target: PathBuf,
    /// The old file is renamed here before writing
    backup: Option<PathBuf>,
    /// The file that becomes the backup
    previous: Option<PathBuf>,
}

impl SavePaths {
    /// Three cases: first save (nothing to back up), re-save under the
    /// same name, and save-as where the old file is backed up under the
    /// new name.
    fn resolve(studio: &Studio, name: &str) -> Self {
        let (target, backup) = studio.compose_path(name);
        match studio.filename() {
            None => Self {
                target,
                backup: None,
                previous: None,
            },
            Some(old) if old == target => Self {
                previous: Some(target.clone()),
                target,
                backup: Some(backup),
            },
            Some(old) => Self {
                previous: Some(old.to_path_buf()),
                target,
                backup: Some(backup),
            },
        }
    }

    /// Move the previous file to the backup path. Returns whether a
    /// backup was made.
    fn back_up(&self) -> io::Result<bool> {
        match (&self.previous, &self.backup) {
            (Some(previous), Some(backup)) if previous.exists() => {
                fs::rename(previous, backup)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn restore_backup(&self) {
        if let (Some(previous), Some(backup)) = (&self.previous, &self.backup) {
            if let Err(e) = fs::rename(backup, previous) {
                warn!(
                    "Failed to move backup {} back to {}: {}",
                    backup.display(),
                    previous.display(),
                    e
                );
            }
        }
    }
}

struct SaveStudio {
    new_name: Option<String>,
}

impl SaveStudio {
    fn fail(studio: &mut Studio) -> Progress {
        studio.notify(Urgency::High, "Studio save failed", CHECK_LOG_HINT);
        Progress::Failed
    }
}

impl CommandBody<Studio> for SaveStudio {
    fn name(&self) -> &'static str {
        "save studio"
    }

    fn run(&mut self, studio: &mut Studio, _step: Step) -> Progress {
        if !studio.is_started() {
            error!("Cannot save a stopped studio");
            return Self::fail(studio);
        }

        let name = self
            .new_name
            .clone()
            .unwrap_or_else(|| studio.name().to_string());
        let paths = SavePaths::resolve(studio, &name);

        info!("Saving studio '{}' to {}", name, paths.target.display());

        if let Err(e) = fs::create_dir_all(&studio.studios_dir) {
            error!(
                "Failed to create studios directory {}: {}",
                studio.studios_dir.display(),
                e
            );
            return Self::fail(studio);
        }

        let backed_up = match paths.back_up() {
            Ok(backed_up) => backed_up,
            Err(e) => {
                error!("Failed to back up {}: {}", paths.target.display(), e);
                return Self::fail(studio);
            }
        };

        studio.supervisor.save(|ok| {
            if !ok {
                warn!("Not every app acknowledged the save request");
            }
        });

        let mut doc = studio.document();
        doc.name = name.clone();
        if let Err(e) = studio.codec.write_studio(&paths.target, &doc) {
            error!("{}", e);
            if backed_up {
                paths.restore_backup();
            }
            return Self::fail(studio);
        }

        let renamed = studio.name != name;
        studio.filename = Some(paths.target);
        studio.name = name.clone();
        studio.persisted = true;
        studio.automatic = false;
        studio.modified = false;
        if renamed {
            studio.publish(StudioEvent::StudioRenamed { name });
        }
        info!("Studio saved");
        Progress::Done
    }
}

/// Queue a save under the current name.
pub fn save_studio(queue: &mut StudioQueue) -> Result<(), CommandError> {
    queue.add_command(Command::new(SaveStudio { new_name: None }))
}

/// Queue a save under a new name, renaming the studio once it succeeds.
pub fn save_studio_as(queue: &mut StudioQueue, name: &str) -> Result<(), CommandError> {
    if name.is_empty() {
        return Err(CommandError::InvalidArgument(
            "studio name is empty".to_string(),
        ));
    }
    queue.add_command(Command::new(SaveStudio {
        new_name: Some(name.to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::{CodecError, ProjectDocument, StudioCodec, StudioDocument};
    use crate::command::CommandState;
    use crate::events::LogEventSink;
    use crate::notify::LogNotifier;
    use crate::server::DummyServer;
    use crate::studio::{Backends, StudioSettings};
    use crate::supervisor::ProcessLauncher;

    struct FailingCodec;

    impl FailingCodec {
        fn error(path: &Path) -> CodecError {
            CodecError::Io {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            }
        }
    }

    impl StudioCodec for FailingCodec {
        fn extension(&self) -> &'static str {
            "json"
        }

        fn write_studio(&self, path: &Path, _doc: &StudioDocument) -> Result<(), CodecError> {
            Err(Self::error(path))
        }

        fn read_studio(&self, path: &Path) -> Result<StudioDocument, CodecError> {
            Err(Self::error(path))
        }

        fn write_project(&self, dir: &Path, _doc: &ProjectDocument) -> Result<(), CodecError> {
            Err(Self::error(dir))
        }

        fn read_project(&self, dir: &Path) -> Result<ProjectDocument, CodecError> {
            Err(Self::error(dir))
        }
    }

    fn failing_studio(dir: &Path) -> Studio {
        let settings = StudioSettings {
            studios_dir: dir.to_path_buf(),
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            templates: studioconf::default_templates(),
        };
        let backends = Backends {
            server: Box::new(DummyServer::new()),
            launcher: Box::new(ProcessLauncher::new("sh", "xterm -e")),
            codec: Box::new(FailingCodec),
            notifier: Box::new(LogNotifier),
            events: Box::new(LogEventSink),
            clock: Box::new(ManualClock::new()),
        };
        let mut studio = Studio::new(settings, backends);
        studio.name = "foo".to_string();
        studio.server_running = true;
        studio
    }

    fn first_step() -> Step {
        Step {
            state: CommandState::Pending,
            cancelled: false,
        }
    }

    #[test]
    fn test_failed_save_keeps_stale_backup_in_place() {
        let dir = TempDir::new().unwrap();
        let mut studio = failing_studio(dir.path());
        let (target, backup) = studio.compose_path("foo");
        fs::write(&backup, "stale").unwrap();
        studio.filename = Some(target.clone());

        let mut save = SaveStudio { new_name: None };
        assert_eq!(save.run(&mut studio, first_step()), Progress::Failed);

        assert!(!target.exists());
        assert_eq!(fs::read_to_string(&backup).unwrap(), "stale");
    }

    #[test]
    fn test_failed_save_restores_previous_file() {
        let dir = TempDir::new().unwrap();
        let mut studio = failing_studio(dir.path());
        let (target, backup) = studio.compose_path("foo");
        fs::write(&target, "saved").unwrap();
        studio.filename = Some(target.clone());

        let mut save = SaveStudio { new_name: None };
        assert_eq!(save.run(&mut studio, first_step()), Progress::Failed);

        assert_eq!(fs::read_to_string(&target).unwrap(), "saved");
        assert!(!backup.exists());
    }
}
