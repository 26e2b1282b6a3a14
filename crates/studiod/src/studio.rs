//! The studio: everything one session owns
//!
//! Commands receive `&mut Studio` and mutate it directly. The studio never
//! runs commands itself; it only offers the building blocks they share.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use studioconf::{StudioConfig, TemplatesConfig};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, MonotonicClock};
use crate::codec::{
    CodecError, JsonCodec, RoomSnapshot, StudioCodec, StudioDocument, DOCUMENT_VERSION,
};
use crate::environment::EnvironmentStore;
use crate::events::{EventSink, LogEventSink, StudioEvent};
use crate::graph::{Graph, GraphError};
use crate::notify::{LogNotifier, Notifier, Urgency};
use crate::room::{Room, RoomError, RoomTemplate, TemplatePort};
use crate::server::{DummyServer, ServerParams, ServerProxy};
use crate::supervisor::{AppSupervisor, Launcher, ProcessLauncher, SupervisorError};

/// Characters that cannot appear verbatim in a studio file name
const ESCAPED_CHARS: &[char] = &['/', '<', '>', '&', '"', '\'', '%'];

#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Which supervisor an app belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppTarget {
    Studio,
    Room(String),
}

/// Static settings, taken from the daemon configuration
#[derive(Debug, Clone)]
pub struct StudioSettings {
    pub studios_dir: PathBuf,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    pub templates: TemplatesConfig,
}

impl StudioSettings {
    pub fn from_config(config: &StudioConfig) -> Self {
        Self {
            studios_dir: config.paths.studios_dir.clone(),
            start_timeout: config.server.start_timeout(),
            stop_timeout: config.server.stop_timeout(),
            templates: config.templates.clone(),
        }
    }
}

/// The studio's collaborators
pub struct Backends {
    pub server: Box<dyn ServerProxy>,
    pub launcher: Box<dyn Launcher>,
    pub codec: Box<dyn StudioCodec>,
    pub notifier: Box<dyn Notifier>,
    pub events: Box<dyn EventSink>,
    pub clock: Box<dyn Clock>,
}

impl Backends {
    /// In-process server, real processes, JSON files, log output.
    pub fn standalone(config: &StudioConfig) -> Self {
        Self {
            server: Box::new(DummyServer::new()),
            launcher: Box::new(ProcessLauncher::new(
                config.apps.shell.clone(),
                config.apps.terminal.clone(),
            )),
            codec: Box::new(JsonCodec),
            notifier: Box::new(LogNotifier),
            events: Box::new(LogEventSink),
            clock: Box::new(MonotonicClock::new()),
        }
    }
}

pub struct Studio {
    pub(crate) name: String,
    /// Where the studio was last saved or loaded from
    pub(crate) filename: Option<PathBuf>,
    pub(crate) persisted: bool,
    pub(crate) modified: bool,
    /// Created on its own because the server started without a studio
    pub(crate) automatic: bool,
    /// Published to control-surface listeners
    pub(crate) announced: bool,
    pub(crate) server_running: bool,
    pub(crate) server_conf: ServerParams,
    pub(crate) env: EnvironmentStore,
    /// What the audio server shows
    pub(crate) server_graph: Graph,
    pub(crate) studio_graph: Graph,
    pub(crate) rooms: Vec<Room>,
    pub(crate) templates: BTreeMap<String, RoomTemplate>,
    pub(crate) supervisor: AppSupervisor,
    pub(crate) server: Box<dyn ServerProxy>,
    pub(crate) launcher: Box<dyn Launcher>,
    pub(crate) codec: Box<dyn StudioCodec>,
    pub(crate) notifier: Box<dyn Notifier>,
    pub(crate) events: Box<dyn EventSink>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) studios_dir: PathBuf,
    pub(crate) start_timeout: Duration,
    pub(crate) stop_timeout: Duration,
    pub(crate) exit_requested: bool,
}

impl Studio {
    pub fn new(settings: StudioSettings, backends: Backends) -> Self {
        let templates = settings
            .templates
            .iter()
            .map(|(name, config)| (name.clone(), RoomTemplate::from_config(name, config)))
            .collect();

        Self {
            name: String::new(),
            filename: None,
            persisted: false,
            modified: false,
            automatic: false,
            announced: false,
            server_running: false,
            server_conf: ServerParams::new(),
            env: EnvironmentStore::new(),
            server_graph: Graph::new("server"),
            studio_graph: Graph::new("studio"),
            rooms: Vec::new(),
            templates,
            supervisor: AppSupervisor::new("studio"),
            server: backends.server,
            launcher: backends.launcher,
            codec: backends.codec,
            notifier: backends.notifier,
            events: backends.events,
            clock: backends.clock,
            studios_dir: settings.studios_dir,
            start_timeout: settings.start_timeout,
            stop_timeout: settings.stop_timeout,
            exit_requested: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn is_started(&self) -> bool {
        self.server_running
    }

    pub fn is_loaded(&self) -> bool {
        self.announced
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_automatic(&self) -> bool {
        self.automatic
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn server_conf(&self) -> &ServerParams {
        &self.server_conf
    }

    pub fn env(&self) -> &EnvironmentStore {
        &self.env
    }

    pub fn server_graph(&self) -> &Graph {
        &self.server_graph
    }

    pub fn studio_graph(&self) -> &Graph {
        &self.studio_graph
    }

    pub fn supervisor(&self) -> &AppSupervisor {
        &self.supervisor
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.iter()
    }

    pub fn room_by_name(&self, name: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.name() == name)
    }

    pub(crate) fn room_index(&self, name: &str) -> Option<usize> {
        self.rooms.iter().position(|r| r.name() == name)
    }

    pub(crate) fn room_index_by_uuid(&self, uuid: Uuid) -> Option<usize> {
        self.rooms.iter().position(|r| r.uuid() == uuid)
    }

    pub fn template_names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn studios_dir(&self) -> &Path {
        &self.studios_dir
    }

    pub(crate) fn codec_extension(&self) -> &'static str {
        self.codec.extension()
    }

    /// File for a studio name and the backup it is moved to on re-save.
    pub fn compose_path(&self, name: &str) -> (PathBuf, PathBuf) {
        let stem = escape_filename(name);
        let ext = self.codec.extension();
        (
            self.studios_dir.join(format!("{}.{}", stem, ext)),
            self.studios_dir.join(format!("{}.{}.bak", stem, ext)),
        )
    }

    pub(crate) fn notify(&mut self, urgency: Urgency, title: &str, message: &str) {
        self.notifier.notify(urgency, title, message);
    }

    pub(crate) fn publish(&mut self, event: StudioEvent) {
        self.events.publish(event);
    }

    pub(crate) fn announce(&mut self) {
        if self.announced {
            return;
        }
        info!("studio '{}' announced", self.name);
        self.announced = true;
        let name = self.name.clone();
        self.publish(StudioEvent::StudioAppeared { name });
    }

    pub(crate) fn unannounce(&mut self) {
        if !self.announced {
            return;
        }
        self.announced = false;
        self.publish(StudioEvent::StudioDisappeared);
    }

    /// The server came up, asked for or not.
    pub(crate) fn on_server_started(&mut self) {
        if !self.is_loaded() {
            self.name = generate_name();
            self.automatic = true;
            info!("no studio loaded, created automatic studio '{}'", self.name);
            self.announce();
        }

        match self.server.parameters() {
            Ok(params) => {
                debug!("fetched {} server parameters", params.len());
                self.server_conf = params;
            }
            Err(e) => warn!("failed to fetch server parameters: {}", e),
        }

        self.server_running = true;

        for room in &mut self.rooms {
            if let Err(e) = room.wire(self.server.as_mut(), &mut self.studio_graph) {
                error!("failed to wire room '{}': {}", room.name(), e);
            }
        }

        self.supervisor.autorun(self.launcher.as_mut());
        for room in &mut self.rooms {
            room.supervisor_mut().autorun(self.launcher.as_mut());
        }

        self.publish(StudioEvent::StudioStarted);
    }

    /// The server went down, asked for or not.
    pub(crate) fn on_server_stopped(&mut self) {
        self.server_running = false;

        for room in &mut self.rooms {
            room.unwire(self.server.as_mut());
            room.graph_mut().hide_all();
        }
        self.server_graph.hide_all();
        self.studio_graph.hide_all();

        self.publish(StudioEvent::StudioStopped);

        if self.automatic {
            info!("clearing automatic studio '{}'", self.name);
            self.clear();
        }
    }

    /// Drop everything the studio holds and withdraw it from listeners.
    pub(crate) fn clear(&mut self) {
        for mut room in std::mem::take(&mut self.rooms) {
            room.unwire(self.server.as_mut());
            self.events.publish(StudioEvent::RoomDisappeared {
                uuid: room.uuid(),
                name: room.name().to_string(),
            });
            room.destroy(&mut self.studio_graph);
        }

        self.server_graph.clear();
        self.studio_graph.clear();
        self.supervisor.clear();
        self.server_conf.clear();

        self.filename = None;
        self.persisted = false;
        self.modified = false;
        self.automatic = false;
        self.unannounce();
        self.name.clear();
    }

    pub fn running_app_count(&self) -> usize {
        self.supervisor.running_app_count()
            + self
                .rooms
                .iter()
                .map(|r| r.supervisor().running_app_count())
                .sum::<usize>()
    }

    /// Clients started by our apps that the server still shows.
    pub fn managed_client_count(&self) -> usize {
        self.server_graph.visible_app_client_count()
    }

    /// Terminate the apps of the studio and of every room.
    pub(crate) fn stop_all_apps(&mut self) {
        self.supervisor.stop();
        for room in &mut self.rooms {
            room.supervisor_mut().stop();
        }
    }

    /// Run `f` on the supervisor an app target names. `None` when the
    /// room does not exist.
    pub(crate) fn with_supervisor<R>(
        &mut self,
        target: &AppTarget,
        f: impl FnOnce(&mut AppSupervisor, &mut dyn Launcher) -> R,
    ) -> Option<R> {
        match target {
            AppTarget::Studio => Some(f(&mut self.supervisor, self.launcher.as_mut())),
            AppTarget::Room(name) => {
                let room = self.rooms.iter_mut().find(|r| r.name() == name)?;
                Some(f(room.supervisor_mut(), self.launcher.as_mut()))
            }
        }
    }

    /// Graph holding the clients of a target's apps.
    pub(crate) fn graph_for(&mut self, target: &AppTarget) -> Option<&mut Graph> {
        match target {
            AppTarget::Studio => Some(&mut self.studio_graph),
            AppTarget::Room(name) => self
                .rooms
                .iter_mut()
                .find(|r| r.name() == name)
                .map(|r| r.graph_mut()),
        }
    }

    /// Find the app owning a process, wherever it lives.
    pub(crate) fn find_app_by_pid(&self, pid: u32) -> Option<(AppTarget, Uuid)> {
        if let Some(app) = self.supervisor.find_by_pid(pid) {
            return Some((AppTarget::Studio, app.uuid()));
        }
        self.rooms.iter().find_map(|room| {
            room.supervisor()
                .find_by_pid(pid)
                .map(|app| (AppTarget::Room(room.name().to_string()), app.uuid()))
        })
    }

    /// Collect exited child processes of every supervisor.
    pub(crate) fn reap_apps(&mut self) {
        let mut exited = self.supervisor.reap();
        for room in &mut self.rooms {
            exited.extend(room.supervisor_mut().reap());
        }
        for app in exited {
            match app.code {
                Some(0) => debug!("app '{}' finished", app.name),
                Some(code) => warn!("app '{}' exited with status {}", app.name, code),
                None => warn!("app '{}' vanished", app.name),
            }
        }
    }

    pub fn document(&self) -> StudioDocument {
        StudioDocument {
            version: DOCUMENT_VERSION,
            name: self.name.clone(),
            saved_at: chrono::Utc::now(),
            server_params: self.server_conf.clone(),
            server_graph: self.server_graph.snapshot(),
            studio_graph: self.studio_graph.snapshot(),
            rooms: self
                .rooms
                .iter()
                .filter(|r| r.graph().is_persist())
                .map(Room::snapshot)
                .collect(),
            apps: self.supervisor.snapshot(),
        }
    }

    /// Rebuild the studio from a document. The caller clears the studio
    /// when this fails half-way.
    pub(crate) fn apply_document(&mut self, doc: &StudioDocument) -> Result<(), StudioError> {
        self.server_graph.restore(&doc.server_graph)?;
        self.studio_graph.restore(&doc.studio_graph)?;

        self.server_conf = doc.server_params.clone();
        for (path, value) in &doc.server_params {
            if let Err(e) = self.server.set_param(path, value) {
                warn!("failed to restore server parameter {}: {}", path, e);
            }
        }

        for snapshot in &doc.rooms {
            let template = match self.templates.get(&snapshot.template) {
                Some(template) => template.clone(),
                None => {
                    warn!(
                        "room '{}' uses unknown template '{}', keeping its ports as saved",
                        snapshot.name, snapshot.template
                    );
                    saved_template(&self.studio_graph, snapshot)
                }
            };

            let mut room = Room::create(
                Some(snapshot.uuid),
                &snapshot.name,
                &template,
                &mut self.studio_graph,
            )?;

            if let Some(project) = &snapshot.project {
                match self.codec.read_project(&project.dir) {
                    Ok(project_doc) => {
                        room.apply_project(&project_doc)?;
                        room.set_project(project.clone());
                    }
                    Err(e) => warn!(
                        "room '{}': failed to load project '{}': {}",
                        snapshot.name, project.name, e
                    ),
                }
            }

            self.events.publish(StudioEvent::RoomAppeared {
                uuid: room.uuid(),
                name: room.name().to_string(),
            });
            self.rooms.push(room);
        }

        self.supervisor.restore(&doc.apps)?;
        Ok(())
    }
}

/// Template rebuilt from the link ports a room left in the studio graph.
fn saved_template(studio_graph: &Graph, snapshot: &RoomSnapshot) -> RoomTemplate {
    let ports = studio_graph
        .client_ports(snapshot.uuid)
        .into_iter()
        .filter_map(|uuid| studio_graph.port(uuid))
        .map(|port| TemplatePort {
            name: port.name.clone(),
            port_type: port.port_type,
            direction: port.direction,
        })
        .collect();
    RoomTemplate::new(snapshot.template.clone(), ports)
}

/// Name for a studio nobody named.
pub fn generate_name() -> String {
    chrono::Local::now()
        .format("Studio %Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Percent-escape characters that would break a file name.
pub fn escape_filename(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if ESCAPED_CHARS.contains(&c) {
            escaped.push_str(&format!("%{:02X}", c as u32));
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Reverse [`escape_filename`]. Malformed sequences are kept verbatim.
pub fn unescape_filename(escaped: &str) -> String {
    let mut name = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('%') {
        name.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        match tail.get(..2).and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
            Some(byte) => {
                name.push(char::from(byte));
                rest = &tail[2..];
            }
            None => {
                name.push('%');
                rest = tail;
            }
        }
    }
    name.push_str(rest);
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_filename() {
        assert_eq!(escape_filename("plain name"), "plain name");
        assert_eq!(escape_filename("a/b"), "a%2Fb");
        assert_eq!(escape_filename("<&>\"'%"), "%3C%26%3E%22%27%25");
    }

    #[test]
    fn test_unescape_reverses_escape() {
        for name in ["a/b", "100% <live>", "rock'n'roll", "plain"] {
            assert_eq!(unescape_filename(&escape_filename(name)), name);
        }
        assert_eq!(unescape_filename("50%"), "50%");
        assert_eq!(unescape_filename("%zz"), "%zz");
    }

    #[test]
    fn test_generated_name_has_prefix() {
        assert!(generate_name().starts_with("Studio "));
        assert!(!generate_name().contains('/'));
    }
}
