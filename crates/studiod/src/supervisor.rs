//! Supervised application processes
//!
//! A supervisor owns the apps of the studio or of one room. Starting an app
//! goes through a [`Launcher`], so the daemon can run real processes while
//! tests substitute scripted ones. Exits are picked up by [`AppSupervisor::reap`],
//! which the driver calls once per tick.

use std::fmt;
use std::io;
use std::process::{Child, Command, Stdio};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How an app takes part in session saves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AppLevel {
    /// No save support; only started and stopped
    #[default]
    #[serde(rename = "0")]
    Zero,
    /// Saves its own state on SIGUSR1
    #[serde(rename = "1")]
    One,
}

impl fmt::Display for AppLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppLevel::Zero => write!(f, "0"),
            AppLevel::One => write!(f, "1"),
        }
    }
}

impl FromStr for AppLevel {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "0" => Ok(AppLevel::Zero),
            "1" => Ok(AppLevel::One),
            other => Err(SupervisorError::InvalidLevel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppSignal {
    Terminate,
    Kill,
    Save,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to launch app '{name}': {source}")]
    Launch { name: String, source: io::Error },

    #[error("Failed to signal app '{name}': {source}")]
    Signal { name: String, source: io::Error },

    #[error("Failed to poll app '{name}': {source}")]
    Wait { name: String, source: io::Error },

    #[error("App {0} not found")]
    NotFound(u64),

    #[error("App name '{0}' is already taken")]
    NameTaken(String),

    #[error("App '{0}' is running")]
    Running(String),

    #[error("App '{0}' is not running")]
    NotRunning(String),

    #[error("Invalid app level '{0}'")]
    InvalidLevel(String),
}

/// Handle to a launched process
pub trait AppProcess {
    fn pid(&self) -> u32;

    fn signal(&mut self, signal: AppSignal) -> io::Result<()>;

    /// Exit status once the process is gone, without blocking.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;
}

/// What the launcher needs to know to start an app
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub name: &'a str,
    pub commandline: &'a str,
    pub terminal: bool,
}

pub trait Launcher {
    fn launch(&mut self, request: LaunchRequest<'_>) -> io::Result<Box<dyn AppProcess>>;
}

/// Spawns apps through the configured shell
pub struct ProcessLauncher {
    shell: String,
    terminal: String,
}

impl ProcessLauncher {
    pub fn new(shell: impl Into<String>, terminal: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            terminal: terminal.into(),
        }
    }

    fn script(&self, request: LaunchRequest<'_>) -> String {
        if request.terminal {
            format!("exec {} {}", self.terminal, request.commandline)
        } else {
            format!("exec {}", request.commandline)
        }
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&mut self, request: LaunchRequest<'_>) -> io::Result<Box<dyn AppProcess>> {
        let script = self.script(request);
        debug!("launching '{}': {} -c {:?}", request.name, self.shell, script);

        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(&script)
            .stdin(Stdio::null())
            .spawn()?;

        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

impl AppProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn signal(&mut self, signal: AppSignal) -> io::Result<()> {
        let signo = match signal {
            AppSignal::Terminate => libc::SIGTERM,
            AppSignal::Kill => libc::SIGKILL,
            AppSignal::Save => libc::SIGUSR1,
        };
        let pid = libc::pid_t::try_from(self.child.id())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

        // SAFETY: kill(2) has no memory safety requirements
        let ret = unsafe { libc::kill(pid, signo) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| status.code().unwrap_or(-1)))
    }
}

pub struct App {
    id: u64,
    uuid: Uuid,
    name: String,
    commandline: String,
    terminal: bool,
    level: AppLevel,
    /// Start when the studio starts
    autorun: bool,
    process: Option<Box<dyn AppProcess>>,
}

impl App {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn commandline(&self) -> &str {
        &self.commandline
    }

    pub fn terminal(&self) -> bool {
        self.terminal
    }

    pub fn level(&self) -> AppLevel {
        self.level
    }

    pub fn autorun(&self) -> bool {
        self.autorun
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.pid())
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("commandline", &self.commandline)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Persisted form of an app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSnapshot {
    pub uuid: Uuid,
    pub name: String,
    pub commandline: String,
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub level: AppLevel,
    /// Was running when saved
    #[serde(default)]
    pub autorun: bool,
}

/// An app whose process went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitedApp {
    pub id: u64,
    pub uuid: Uuid,
    pub name: String,
    pub code: Option<i32>,
}

pub struct AppSupervisor {
    name: String,
    apps: Vec<App>,
    next_id: u64,
}

impl AppSupervisor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            apps: Vec::new(),
            next_id: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Register an app. Names are unique within a supervisor.
    pub fn add(
        &mut self,
        name: &str,
        uuid: Option<Uuid>,
        commandline: &str,
        terminal: bool,
        level: AppLevel,
        autorun: bool,
    ) -> Result<u64, SupervisorError> {
        if self.find_by_name(name).is_some() {
            return Err(SupervisorError::NameTaken(name.to_string()));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.apps.push(App {
            id,
            uuid: uuid.unwrap_or_else(Uuid::new_v4),
            name: name.to_string(),
            commandline: commandline.to_string(),
            terminal,
            level,
            autorun,
            process: None,
        });
        debug!("{}: added app '{}' ({})", self.name, name, id);
        Ok(id)
    }

    /// `base`, or `base-2`, `base-3`... whichever is free first.
    pub fn unique_name(&self, base: &str) -> String {
        if self.find_by_name(base).is_none() {
            return base.to_string();
        }
        (2u32..)
            .map(|n| format!("{}-{}", base, n))
            .find(|candidate| self.find_by_name(candidate).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    pub fn find_by_id(&self, id: u64) -> Option<&App> {
        self.apps.iter().find(|a| a.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&App> {
        self.apps.iter().find(|a| a.name == name)
    }

    pub fn find_by_uuid(&self, uuid: Uuid) -> Option<&App> {
        self.apps.iter().find(|a| a.uuid == uuid)
    }

    pub fn find_by_pid(&self, pid: u32) -> Option<&App> {
        self.apps.iter().find(|a| a.pid() == Some(pid))
    }

    fn app_mut(&mut self, id: u64) -> Result<&mut App, SupervisorError> {
        self.apps
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(SupervisorError::NotFound(id))
    }

    pub fn apps(&self) -> impl Iterator<Item = &App> {
        self.apps.iter()
    }

    pub fn has_apps(&self) -> bool {
        !self.apps.is_empty()
    }

    pub fn running_app_count(&self) -> usize {
        self.apps.iter().filter(|a| a.is_running()).count()
    }

    pub fn start_app(&mut self, id: u64, launcher: &mut dyn Launcher) -> Result<(), SupervisorError> {
        let supervisor = self.name.clone();
        let app = self.app_mut(id)?;
        if app.is_running() {
            return Err(SupervisorError::Running(app.name.clone()));
        }

        let process = launcher
            .launch(LaunchRequest {
                name: &app.name,
                commandline: &app.commandline,
                terminal: app.terminal,
            })
            .map_err(|source| SupervisorError::Launch {
                name: app.name.clone(),
                source,
            })?;

        info!(
            "{}: started app '{}' with pid {}",
            supervisor,
            app.name,
            process.pid()
        );
        app.process = Some(process);
        app.autorun = true;
        Ok(())
    }

    fn signal_app(&mut self, id: u64, signal: AppSignal) -> Result<(), SupervisorError> {
        let app = self.app_mut(id)?;
        let Some(process) = app.process.as_mut() else {
            return Err(SupervisorError::NotRunning(app.name.clone()));
        };
        process
            .signal(signal)
            .map_err(|source| SupervisorError::Signal {
                name: app.name.clone(),
                source,
            })
    }

    /// Ask a running app to terminate. It stays running until reaped.
    pub fn stop_app(&mut self, id: u64) -> Result<(), SupervisorError> {
        self.signal_app(id, AppSignal::Terminate)?;
        let app = self.app_mut(id)?;
        app.autorun = false;
        info!("asked app '{}' to terminate", app.name);
        Ok(())
    }

    pub fn kill_app(&mut self, id: u64) -> Result<(), SupervisorError> {
        self.signal_app(id, AppSignal::Kill)?;
        let app = self.app_mut(id)?;
        app.autorun = false;
        info!("killed app '{}'", app.name);
        Ok(())
    }

    /// Forget a stopped app.
    pub fn remove_app(&mut self, id: u64) -> Result<App, SupervisorError> {
        let pos = self
            .apps
            .iter()
            .position(|a| a.id == id)
            .ok_or(SupervisorError::NotFound(id))?;
        if self.apps[pos].is_running() {
            return Err(SupervisorError::Running(self.apps[pos].name.clone()));
        }
        Ok(self.apps.remove(pos))
    }

    /// Terminate every running app, remembering that it ran so the next
    /// start brings it back.
    pub fn stop(&mut self) {
        for app in &mut self.apps {
            let Some(process) = app.process.as_mut() else {
                continue;
            };
            info!("{}: terminating app '{}'", self.name, app.name);
            if let Err(e) = process.signal(AppSignal::Terminate) {
                warn!("failed to terminate app '{}': {}", app.name, e);
            }
        }
    }

    /// Drop every app. Processes still alive are killed.
    pub fn clear(&mut self) {
        for app in &mut self.apps {
            if let Some(process) = app.process.as_mut() {
                warn!("{}: killing app '{}' on clear", self.name, app.name);
                if let Err(e) = process.signal(AppSignal::Kill) {
                    warn!("failed to kill app '{}': {}", app.name, e);
                }
            }
        }
        self.apps.clear();
    }

    /// Start every app marked for autorun that is not running.
    pub fn autorun(&mut self, launcher: &mut dyn Launcher) {
        let ids: Vec<u64> = self
            .apps
            .iter()
            .filter(|a| a.autorun && !a.is_running())
            .map(|a| a.id)
            .collect();

        for id in ids {
            if let Err(e) = self.start_app(id, launcher) {
                warn!("{}: autorun failed: {}", self.name, e);
            }
        }
    }

    /// Collect apps whose process has exited.
    pub fn reap(&mut self) -> Vec<ExitedApp> {
        let mut exited = Vec::new();
        for app in &mut self.apps {
            let Some(process) = app.process.as_mut() else {
                continue;
            };
            match process.try_wait() {
                Ok(None) => {}
                Ok(Some(code)) => {
                    info!("{}: app '{}' exited with {}", self.name, app.name, code);
                    app.process = None;
                    exited.push(ExitedApp {
                        id: app.id,
                        uuid: app.uuid,
                        name: app.name.clone(),
                        code: Some(code),
                    });
                }
                Err(e) => {
                    warn!("{}: lost track of app '{}': {}", self.name, app.name, e);
                    app.process = None;
                    exited.push(ExitedApp {
                        id: app.id,
                        uuid: app.uuid,
                        name: app.name.clone(),
                        code: None,
                    });
                }
            }
        }
        exited
    }

    /// Ask level 1 apps to save, then report completion.
    ///
    /// Level 1 apps save asynchronously on SIGUSR1, so completion means
    /// every signal was delivered.
    pub fn save<F>(&mut self, done: F)
    where
        F: FnOnce(bool),
    {
        let mut ok = true;
        for app in &mut self.apps {
            if app.level != AppLevel::One {
                continue;
            }
            let Some(process) = app.process.as_mut() else {
                continue;
            };
            if let Err(e) = process.signal(AppSignal::Save) {
                warn!("failed to ask app '{}' to save: {}", app.name, e);
                ok = false;
            }
        }
        done(ok);
    }

    pub fn snapshot(&self) -> Vec<AppSnapshot> {
        self.apps
            .iter()
            .map(|app| AppSnapshot {
                uuid: app.uuid,
                name: app.name.clone(),
                commandline: app.commandline.clone(),
                terminal: app.terminal,
                level: app.level,
                autorun: app.is_running() || app.autorun,
            })
            .collect()
    }

    pub fn restore(&mut self, apps: &[AppSnapshot]) -> Result<(), SupervisorError> {
        for app in apps {
            self.add(
                &app.name,
                Some(app.uuid),
                &app.commandline,
                app.terminal,
                app.level,
                app.autorun,
            )?;
        }
        Ok(())
    }
}

/// Default app name for a command line: the executable's basename.
pub fn default_app_name(commandline: &str) -> String {
    let program = commandline.split_whitespace().next().unwrap_or("");
    let base = program.rsplit('/').next().unwrap_or(program);
    if base.is_empty() {
        "app".to_string()
    } else {
        base.to_string()
    }
}
