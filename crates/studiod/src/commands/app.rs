use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::StudioQueue;
use crate::command::{Command, CommandBody, Progress, Step};
use crate::error::CommandError;
use crate::notify::{Urgency, CHECK_LOG_HINT};
use crate::studio::{AppTarget, Studio};
use crate::supervisor::{default_app_name, AppLevel, AppSupervisor, Launcher, SupervisorError};

/// Arguments of a new app
#[derive(Debug, Clone)]
pub struct NewAppRequest {
    pub target: AppTarget,
    pub commandline: String,
    /// Defaults to the program's file name
    pub name: Option<String>,
    pub terminal: bool,
    pub level: AppLevel,
}

fn check_target(studio: &Studio, target: &AppTarget) -> Result<(), CommandError> {
    match target {
        AppTarget::Studio => Ok(()),
        AppTarget::Room(name) if studio.room_by_name(name).is_some() => Ok(()),
        AppTarget::Room(name) => Err(CommandError::UnknownRoom(name.clone())),
    }
}

/// Register the app and, on a running studio, start it. A failed start
/// forgets the app again.
fn add_app(
    supervisor: &mut AppSupervisor,
    launcher: &mut dyn Launcher,
    request: &NewAppRequest,
    start: bool,
) -> Result<(), SupervisorError> {
    let base = request
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| default_app_name(&request.commandline));
    let name = supervisor.unique_name(&base);

    let id = supervisor.add(
        &name,
        None,
        &request.commandline,
        request.terminal,
        request.level,
        false,
    )?;

    if start {
        if let Err(e) = supervisor.start_app(id, launcher) {
            if let Err(e) = supervisor.remove_app(id) {
                warn!("failed to forget app '{}': {}", name, e);
            }
            return Err(e);
        }
    }

    info!("{}: app '{}' added", supervisor.name(), name);
    Ok(())
}

/// Queue a new app for the studio or a room. It starts right away when the
/// studio is running.
pub fn new_app(
    queue: &mut StudioQueue,
    studio: &Studio,
    request: NewAppRequest,
) -> Result<(), CommandError> {
    if request.commandline.trim().is_empty() {
        return Err(CommandError::InvalidArgument("commandline is empty".to_string()));
    }
    check_target(studio, &request.target)?;

    queue.add_command(Command::inline("new app", move |studio: &mut Studio, _| {
        let start = studio.is_started();
        let result = studio.with_supervisor(&request.target, |supervisor, launcher| {
            add_app(supervisor, launcher, &request, start)
        });

        match result {
            Some(Ok(())) => {
                studio.modified = true;
                Progress::Done
            }
            Some(Err(e)) => {
                error!("{}", e);
                studio.notify(Urgency::High, "Failed to add app", CHECK_LOG_HINT);
                Progress::Failed
            }
            None => {
                error!("Cannot add app to unknown target {:?}", request.target);
                Progress::Failed
            }
        }
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Start,
    Stop,
    Kill,
}

/// Apply `action` to app `id`. Returns the app's uuid and whether the
/// caller has to wait for the process to go away.
fn apply_action(
    supervisor: &mut AppSupervisor,
    launcher: &mut dyn Launcher,
    id: u64,
    action: AppAction,
) -> Result<(Uuid, bool), SupervisorError> {
    let app = supervisor
        .find_by_id(id)
        .ok_or(SupervisorError::NotFound(id))?;
    let uuid = app.uuid();

    match (action, app.is_running()) {
        (AppAction::Start, true) => Err(SupervisorError::Running(app.name().to_string())),
        (AppAction::Start, false) => {
            supervisor.start_app(id, launcher)?;
            Ok((uuid, false))
        }
        (AppAction::Stop | AppAction::Kill, false) => Ok((uuid, false)),
        (AppAction::Stop, true) => {
            supervisor.stop_app(id)?;
            Ok((uuid, true))
        }
        (AppAction::Kill, true) => {
            supervisor.kill_app(id)?;
            Ok((uuid, true))
        }
    }
}

struct ChangeAppState {
    target: AppTarget,
    id: u64,
    action: AppAction,
    /// Set once the app was signalled and we wait for it to go
    uuid: Option<Uuid>,
}

impl ChangeAppState {
    fn first_run(&mut self, studio: &mut Studio) -> Progress {
        let (id, action) = (self.id, self.action);
        if action == AppAction::Start && !studio.is_started() {
            error!("Cannot start app {} while the studio is stopped", id);
            studio.notify(Urgency::High, "App start failed", "Start the studio first.");
            return Progress::Failed;
        }

        let result = studio.with_supervisor(&self.target, |supervisor, launcher| {
            apply_action(supervisor, launcher, id, action)
        });

        match result {
            Some(Ok((uuid, wait))) => {
                studio.modified = true;
                if !wait {
                    return Progress::Done;
                }
                self.uuid = Some(uuid);
                Progress::Waiting
            }
            Some(Err(e)) => {
                error!("{}", e);
                studio.notify(Urgency::High, "App state change failed", CHECK_LOG_HINT);
                Progress::Failed
            }
            None => {
                error!("Unknown app target {:?}", self.target);
                Progress::Failed
            }
        }
    }
}

impl CommandBody<Studio> for ChangeAppState {
    fn name(&self) -> &'static str {
        "change app state"
    }

    fn run(&mut self, studio: &mut Studio, step: Step) -> Progress {
        if step.is_first() {
            if let progress @ (Progress::Done | Progress::Failed) = self.first_run(studio) {
                return progress;
            }
        }

        let Some(uuid) = self.uuid else {
            return Progress::Done;
        };

        let id = self.id;
        let running = studio
            .with_supervisor(&self.target, |supervisor, _| {
                supervisor.find_by_id(id).is_some_and(|app| app.is_running())
            })
            .unwrap_or(false);
        if running {
            debug!("waiting for app {} to exit", id);
            return Progress::Waiting;
        }
        if studio.server_graph.app_has_clients(uuid) {
            debug!("waiting for clients of app {} to disappear", id);
            return Progress::Waiting;
        }
        Progress::Done
    }
}

/// Queue a start, stop or kill of an app.
pub fn change_app_state(
    queue: &mut StudioQueue,
    studio: &Studio,
    target: AppTarget,
    id: u64,
    action: AppAction,
) -> Result<(), CommandError> {
    check_target(studio, &target)?;
    queue.add_command(Command::new(ChangeAppState {
        target,
        id,
        action,
        uuid: None,
    }))
}

/// Queue the removal of a stopped app and its clients.
pub fn remove_app(
    queue: &mut StudioQueue,
    studio: &Studio,
    target: AppTarget,
    id: u64,
) -> Result<(), CommandError> {
    check_target(studio, &target)?;
    queue.add_command(Command::inline("remove app", move |studio: &mut Studio, _| {
        let removed = studio.with_supervisor(&target, |supervisor, _| supervisor.remove_app(id));
        let app = match removed {
            Some(Ok(app)) => app,
            Some(Err(e)) => {
                error!("{}", e);
                studio.notify(Urgency::High, "Failed to remove app", CHECK_LOG_HINT);
                return Progress::Failed;
            }
            None => {
                error!("Unknown app target {:?}", target);
                return Progress::Failed;
            }
        };

        studio.server_graph.remove_app_clients(app.uuid());
        if let Some(graph) = studio.graph_for(&target) {
            graph.remove_app_clients(app.uuid());
        }
        info!("App '{}' removed", app.name());
        studio.modified = true;
        Progress::Done
    }))
}
