//! StudioDaemon - the cooperative driver
//!
//! Owns the studio and its command queue. Every tick feeds server events
//! into the environment store and the graphs, reaps exited apps, runs the
//! queue, and with nothing queued reacts to server changes nobody asked for.
//! Requests are methods here; they validate, enqueue and return at once.

use std::fs;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::command::CommandState;
use crate::commands::{self, AppAction, NewAppRequest, StudioQueue};
use crate::environment::Signal;
use crate::error::CommandError;
use crate::events::StudioEvent;
use crate::graph::{Client, Graph};
use crate::notify::{Urgency, CHECK_LOG_HINT};
use crate::room::{LINK_CLIENT_KEY, ROOM_TEMPLATE_KEY};
use crate::server::ServerEvent;
use crate::studio::{unescape_filename, AppTarget, Studio};

/// A studio file in the studios directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioEntry {
    pub name: String,
    pub modified: DateTime<Local>,
}

pub struct StudioDaemon {
    studio: Studio,
    queue: StudioQueue,
}

impl StudioDaemon {
    pub fn new(studio: Studio) -> Self {
        Self {
            studio,
            queue: StudioQueue::new(),
        }
    }

    pub fn studio(&self) -> &Studio {
        &self.studio
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queued command names and states, head first.
    pub fn pending(&self) -> Vec<(&'static str, CommandState)> {
        self.queue.snapshot()
    }

    pub fn exit_requested(&self) -> bool {
        self.studio.exit_requested()
    }

    /// One driver iteration. Returns false when a queued command failed.
    pub fn tick(&mut self) -> bool {
        for event in self.studio.server.take_events() {
            self.on_server_event(event);
        }

        self.studio.reap_apps();

        let ok = self.queue.run(&mut self.studio);
        if !ok && !self.studio.exit_requested() {
            self.studio
                .notify(Urgency::High, "Studio command failed", CHECK_LOG_HINT);
        }

        if self.queue.is_empty() {
            self.handle_unsolicited();
        }
        ok
    }

    /// Drive [`tick`](Self::tick) until an exit completes.
    ///
    /// `shutdown` is called for every signal to wait for. The first one
    /// queues the exit; if the queue then drains without reaching the exit
    /// marker, or a second signal arrives, the loop exits regardless.
    pub async fn run<S, F>(&mut self, period: Duration, mut shutdown: S)
    where
        S: FnMut() -> F,
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut signal = Box::pin(shutdown());
        let mut shutting_down = false;

        while !self.studio.exit_requested() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                    if shutting_down && self.queue.is_empty() && !self.studio.exit_requested() {
                        error!("Exit did not complete, exiting anyway");
                        self.force_exit();
                    }
                }
                _ = &mut signal => {
                    if shutting_down {
                        warn!("Second shutdown request, exiting now");
                        self.force_exit();
                    } else {
                        shutting_down = true;
                        self.request_exit();
                    }
                    signal.set(shutdown());
                }
            }
        }
        info!("Driver loop finished");
    }

    /// Abandon queued work and leave the driver loop.
    fn force_exit(&mut self) {
        self.queue.clear();
        self.studio.exit_requested = true;
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        debug!("server event: {:?}", event);
        match event {
            ServerEvent::Appeared => self.studio.env.set(Signal::ServerPresent),
            ServerEvent::Disappeared => self.studio.env.reset(Signal::ServerPresent),
            ServerEvent::Started => self.studio.env.set(Signal::ServerStarted),
            ServerEvent::Stopped => self.studio.env.reset(Signal::ServerStarted),
            ServerEvent::ClientAppeared { name, pid } => self.on_client_appeared(&name, pid),
            ServerEvent::ClientDisappeared { name } => self.on_client_disappeared(&name),
        }
    }

    fn on_client_appeared(&mut self, name: &str, pid: Option<u32>) {
        let owner = pid.and_then(|pid| self.studio.find_app_by_pid(pid));
        let app = owner.as_ref().map(|(_, uuid)| *uuid);
        debug!("client '{}' appeared (pid {:?}, app {:?})", name, pid, app);

        show_or_add(&mut self.studio.server_graph, name, pid, app);

        let target = owner.map(|(target, _)| target).unwrap_or(AppTarget::Studio);
        if let Some(graph) = self.studio.graph_for(&target) {
            show_or_add(graph, name, pid, app);
        }
    }

    fn on_client_disappeared(&mut self, name: &str) {
        debug!("client '{}' disappeared", name);
        if let Some(uuid) = self.studio.server_graph.find_client_by_name(name).map(|c| c.uuid) {
            self.studio.server_graph.remove_client(uuid);
        }

        forget_client(&mut self.studio.studio_graph, name);
        for room in &mut self.studio.rooms {
            forget_client(room.graph_mut(), name);
        }
    }

    /// Server changes that happened while no command was waiting for them.
    fn handle_unsolicited(&mut self) {
        match self.studio.env.consume_change(Signal::ServerStarted) {
            Some(true) if !self.studio.is_started() => {
                info!("Audio server started externally");
                self.studio.on_server_started();
            }
            Some(false) if self.studio.is_started() => {
                error!("Audio server stopped unexpectedly");
                self.studio.publish(StudioEvent::StudioCrashed);
                self.studio.notify(
                    Urgency::High,
                    "Studio crashed",
                    "The audio server stopped unexpectedly. Save your work and restart the studio.",
                );
                self.studio.on_server_stopped();
            }
            _ => {}
        }

        match self.studio.env.consume_change(Signal::ServerPresent) {
            Some(true) => info!("Audio server control service appeared"),
            Some(false) => warn!("Audio server control service disappeared"),
            None => {}
        }
    }

    pub fn new_studio(&mut self, name: &str) -> Result<(), CommandError> {
        commands::new_studio(&mut self.queue, &self.studio, name)
    }

    pub fn load_studio(&mut self, name: &str, autostart: bool) -> Result<(), CommandError> {
        commands::load_studio(&mut self.queue, &self.studio, name, autostart)
    }

    pub fn unload_studio(&mut self) -> Result<(), CommandError> {
        commands::unload_studio(&mut self.queue, &self.studio)
    }

    pub fn start_studio(&mut self) -> Result<(), CommandError> {
        commands::start_studio(&mut self.queue)
    }

    pub fn stop_studio(&mut self) -> Result<(), CommandError> {
        commands::stop_studio(&mut self.queue)
    }

    pub fn save_studio(&mut self) -> Result<(), CommandError> {
        commands::save_studio(&mut self.queue)
    }

    pub fn save_studio_as(&mut self, name: &str) -> Result<(), CommandError> {
        commands::save_studio_as(&mut self.queue, name)
    }

    pub fn rename_studio(&mut self, name: &str) -> Result<(), CommandError> {
        commands::rename_studio(&mut self.queue, name)
    }

    pub fn create_room(&mut self, name: &str, template: &str) -> Result<(), CommandError> {
        commands::create_room(&mut self.queue, &self.studio, name, template)
    }

    pub fn delete_room(&mut self, name: &str) -> Result<(), CommandError> {
        commands::delete_room(&mut self.queue, name)
    }

    pub fn load_project(&mut self, room: &str, dir: impl Into<PathBuf>) -> Result<(), CommandError> {
        commands::load_project(&mut self.queue, &self.studio, room, dir)
    }

    pub fn unload_project(&mut self, room: &str) -> Result<(), CommandError> {
        commands::unload_project(&mut self.queue, room)
    }

    pub fn save_project(
        &mut self,
        room: &str,
        dir: Option<PathBuf>,
        name: Option<&str>,
    ) -> Result<(), CommandError> {
        commands::save_project(&mut self.queue, &self.studio, room, dir, name)
    }

    pub fn new_app(&mut self, request: NewAppRequest) -> Result<(), CommandError> {
        commands::new_app(&mut self.queue, &self.studio, request)
    }

    pub fn change_app_state(
        &mut self,
        target: AppTarget,
        id: u64,
        action: AppAction,
    ) -> Result<(), CommandError> {
        commands::change_app_state(&mut self.queue, &self.studio, target, id, action)
    }

    pub fn remove_app(&mut self, target: AppTarget, id: u64) -> Result<(), CommandError> {
        commands::remove_app(&mut self.queue, &self.studio, target, id)
    }

    /// Queue the exit. If the queue refuses new work, exit right away.
    pub fn request_exit(&mut self) {
        if let Err(e) = commands::exit(&mut self.queue, &self.studio) {
            warn!("Cannot queue exit ({}), exiting now", e);
            self.studio.exit_requested = true;
        }
    }

    pub fn cancel(&mut self) {
        self.queue.cancel();
    }

    /// Studios saved in the studios directory, by name.
    pub fn list_studios(&self) -> Result<Vec<StudioEntry>, CommandError> {
        let dir = self.studio.studios_dir();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CommandError::storage(dir, e)),
        };

        let extension = self.studio.codec_extension();
        let mut studios = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CommandError::storage(dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let metadata = entry
                .metadata()
                .map_err(|e| CommandError::storage(&path, e))?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .map_err(|e| CommandError::storage(&path, e))?;
            studios.push(StudioEntry {
                name: unescape_filename(stem),
                modified: DateTime::<Local>::from(modified),
            });
        }

        studios.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(studios)
    }

    /// Delete a saved studio file. The loaded studio is not touched.
    pub fn delete_studio(&self, name: &str) -> Result<(), CommandError> {
        let (path, _) = self.studio.compose_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted studio '{}' ({})", name, path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CommandError::StudioNotFound(name.to_string()))
            }
            Err(e) => Err(CommandError::storage(path, e)),
        }
    }
}

/// Room plumbing clients are never mirrored from the server.
fn is_room_link(client: &Client) -> bool {
    client.dict.contains_key(LINK_CLIENT_KEY) || client.dict.contains_key(ROOM_TEMPLATE_KEY)
}

/// Show a hidden client of that name, or add it.
fn show_or_add(graph: &mut Graph, name: &str, pid: Option<u32>, app: Option<Uuid>) {
    let existing = graph
        .clients()
        .find(|c| c.name == name && !is_room_link(c))
        .map(|c| c.uuid);
    let uuid = existing.unwrap_or_else(|| graph.add_client(name));

    if let Some(client) = graph.client_mut(uuid) {
        client.pid = pid;
        if app.is_some() {
            client.app = app;
        }
    }
    graph.show_client(uuid);
}

/// Hide the client in a graph that is saved, drop it from one that is not.
fn forget_client(graph: &mut Graph, name: &str) {
    let Some(uuid) = graph
        .clients()
        .find(|c| c.name == name && !is_room_link(c))
        .map(|c| c.uuid)
    else {
        return;
    };

    if graph.is_persist() {
        graph.hide_client(uuid);
    } else {
        graph.remove_client(uuid);
    }
}
