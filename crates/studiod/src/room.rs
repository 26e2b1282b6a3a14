//! Rooms: named sub-sessions linked into the studio graph
//!
//! A room shows up in the studio graph as one client whose ports are the
//! room's links. Inside the room graph the same ports (same uuids) belong to
//! a link client with every direction inverted: what the studio sends into
//! the room comes out of the link client for the room's apps.

use std::collections::HashMap;

use studioconf::RoomTemplateConfig;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{CodecError, ProjectDocument, ProjectRef, RoomSnapshot, DOCUMENT_VERSION};
use crate::graph::{Graph, GraphError, PortDirection, PortType};
use crate::server::{LinkPort, ProxyError, ServerProxy};
use crate::supervisor::{AppSupervisor, SupervisorError};

/// Dictionary key marking a room's link client
pub const LINK_CLIENT_KEY: &str = "studiod:room-link";

/// Dictionary key on the studio graph client naming the room template
pub const ROOM_TEMPLATE_KEY: &str = "studiod:room-template";

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Room '{0}' has no project")]
    NoProject(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePort {
    pub name: String,
    pub port_type: PortType,
    /// Direction on the studio side
    pub direction: PortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomTemplate {
    name: String,
    ports: Vec<TemplatePort>,
}

impl RoomTemplate {
    pub fn new(name: impl Into<String>, ports: Vec<TemplatePort>) -> Self {
        Self {
            name: name.into(),
            ports,
        }
    }

    pub fn from_config(name: &str, config: &RoomTemplateConfig) -> Self {
        let mut ports = Vec::new();
        let groups = [
            ("audio_in", PortType::Audio, PortDirection::Input, config.audio_inputs),
            ("audio_out", PortType::Audio, PortDirection::Output, config.audio_outputs),
            ("midi_in", PortType::Midi, PortDirection::Input, config.midi_inputs),
            ("midi_out", PortType::Midi, PortDirection::Output, config.midi_outputs),
        ];
        for (prefix, port_type, direction, count) in groups {
            for i in 1..=count {
                ports.push(TemplatePort {
                    name: format!("{}_{}", prefix, i),
                    port_type,
                    direction,
                });
            }
        }
        Self::new(name, ports)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ports(&self) -> &[TemplatePort] {
        &self.ports
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomPort {
    pub uuid: Uuid,
    pub name: String,
    pub port_type: PortType,
    /// Direction on the studio side
    pub direction: PortDirection,
}

pub struct Room {
    uuid: Uuid,
    name: String,
    template: String,
    graph: Graph,
    supervisor: AppSupervisor,
    ports: Vec<RoomPort>,
    /// Links exist on the server
    live: bool,
    project: Option<ProjectRef>,
}

impl Room {
    /// Build a room and its studio graph client.
    ///
    /// When the studio graph already holds the room's client (a loaded
    /// studio), the client and any ports with matching names are reused.
    pub fn create(
        uuid: Option<Uuid>,
        name: &str,
        template: &RoomTemplate,
        studio_graph: &mut Graph,
    ) -> Result<Room, RoomError> {
        let existing = match uuid {
            Some(uuid) => studio_graph.client(uuid).map(|c| c.uuid),
            None => studio_graph.find_client_by_name(name).map(|c| c.uuid),
        };
        let uuid = existing.or(uuid).unwrap_or_else(Uuid::new_v4);

        if existing.is_none() {
            studio_graph.add_client_with_uuid(uuid, name)?;
        }

        match Self::build(uuid, name, template, studio_graph) {
            Ok(room) => {
                info!("room '{}' created from template '{}'", name, template.name);
                Ok(room)
            }
            Err(e) => {
                if existing.is_none() {
                    studio_graph.remove_client(uuid);
                }
                Err(e)
            }
        }
    }

    fn build(
        uuid: Uuid,
        name: &str,
        template: &RoomTemplate,
        studio_graph: &mut Graph,
    ) -> Result<Room, RoomError> {
        if let Some(client) = studio_graph.client_mut(uuid) {
            client
                .dict
                .insert(ROOM_TEMPLATE_KEY.to_string(), template.name.clone());
        }

        let mut graph = Graph::new(name);
        graph.add_client_with_uuid(uuid, name)?;
        if let Some(client) = graph.client_mut(uuid) {
            client.dict.insert(LINK_CLIENT_KEY.to_string(), "true".to_string());
        }

        let mut ports = Vec::with_capacity(template.ports.len());
        for tp in &template.ports {
            let port_uuid = match studio_graph.find_port_by_name(uuid, &tp.name) {
                Some(port) => port.uuid,
                None => studio_graph.add_port(uuid, tp.name.clone(), tp.port_type, tp.direction)?,
            };
            graph.add_port_with_uuid(
                port_uuid,
                uuid,
                tp.name.clone(),
                tp.port_type,
                tp.direction.inverted(),
            )?;
            ports.push(RoomPort {
                uuid: port_uuid,
                name: tp.name.clone(),
                port_type: tp.port_type,
                direction: tp.direction,
            });
        }

        Ok(Room {
            uuid,
            name: name.to_string(),
            template: template.name.clone(),
            graph,
            supervisor: AppSupervisor::new(name),
            ports,
            live: false,
            project: None,
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn supervisor(&self) -> &AppSupervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut AppSupervisor {
        &mut self.supervisor
    }

    pub fn ports(&self) -> &[RoomPort] {
        &self.ports
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn project(&self) -> Option<&ProjectRef> {
        self.project.as_ref()
    }

    pub fn set_project(&mut self, project: ProjectRef) {
        self.project = Some(project);
    }

    fn link_port(&self, port: &RoomPort) -> LinkPort {
        LinkPort {
            room: self.name.clone(),
            name: port.name.clone(),
            port_type: port.port_type,
            direction: port.direction,
        }
    }

    /// Create the room's links on the running server.
    pub fn wire(
        &mut self,
        proxy: &mut dyn ServerProxy,
        studio_graph: &mut Graph,
    ) -> Result<(), RoomError> {
        if self.live {
            return Ok(());
        }

        for (i, port) in self.ports.iter().enumerate() {
            if let Err(e) = proxy.create_link(&self.link_port(port)) {
                for created in &self.ports[..i] {
                    if let Err(e) = proxy.destroy_link(&self.link_port(created)) {
                        warn!("failed to undo link '{}': {}", created.name, e);
                    }
                }
                return Err(e.into());
            }
        }

        self.live = true;
        studio_graph.show_client(self.uuid);
        self.graph.show_client(self.uuid);
        debug!("room '{}' wired with {} links", self.name, self.ports.len());
        Ok(())
    }

    /// Drop the room's links from the server, keeping the ports.
    pub fn unwire(&mut self, proxy: &mut dyn ServerProxy) {
        if !self.live {
            return;
        }
        for port in &self.ports {
            if let Err(e) = proxy.destroy_link(&self.link_port(port)) {
                warn!("failed to destroy link '{}': {}", port.name, e);
            }
        }
        self.live = false;
    }

    /// Remove every link port, one at a time, from the server and both
    /// graphs. The link client leaves the room graph with its last port.
    pub fn teardown_links(&mut self, proxy: &mut dyn ServerProxy, studio_graph: &mut Graph) {
        while let Some(port) = self.ports.pop() {
            if self.live {
                if let Err(e) = proxy.destroy_link(&self.link_port(&port)) {
                    warn!("failed to destroy link '{}': {}", port.name, e);
                }
            }
            studio_graph.remove_port(port.uuid);
            self.graph.remove_port(port.uuid);
        }
        self.live = false;
        self.graph.remove_client(self.uuid);
    }

    /// Start shutting the room down: stop saving it and stop its apps.
    /// Clients the server does not show are dropped now, since nothing
    /// would ever report them gone.
    pub fn initiate_stop(&mut self) {
        self.graph.set_persist(false);
        let dropped = self.graph.remove_hidden_clients();
        if dropped != 0 {
            debug!("room '{}': dropped {} absent clients", self.name, dropped);
        }
        self.supervisor.stop();
    }

    pub fn has_running_apps(&self) -> bool {
        self.supervisor.running_app_count() != 0
    }

    pub fn graph_is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// The room's client in the studio graph has no ports left.
    pub fn studio_presence_is_empty(&self, studio_graph: &Graph) -> bool {
        !studio_graph.client_has_ports(self.uuid)
    }

    /// Final teardown once the room is empty.
    pub fn destroy(mut self, studio_graph: &mut Graph) {
        studio_graph.remove_client(self.uuid);
        self.supervisor.clear();
        debug!("room '{}' destroyed", self.name);
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            uuid: self.uuid,
            name: self.name.clone(),
            template: self.template.clone(),
            project: self.project.clone(),
        }
    }

    pub fn project_document(&self, name: &str) -> ProjectDocument {
        ProjectDocument {
            version: DOCUMENT_VERSION,
            name: name.to_string(),
            saved_at: chrono::Utc::now(),
            graph: self.graph.snapshot(),
            apps: self.supervisor.snapshot(),
        }
    }

    /// Merge a project into the room. Link ports of the saved room are
    /// matched to this room's by name.
    pub fn apply_project(&mut self, doc: &ProjectDocument) -> Result<(), RoomError> {
        let mut remap: HashMap<Uuid, Uuid> = HashMap::new();

        for client in &doc.graph.clients {
            if client.dict.contains_key(LINK_CLIENT_KEY) {
                for port in &client.ports {
                    match self.ports.iter().find(|p| p.name == port.name) {
                        Some(ours) => {
                            remap.insert(port.uuid, ours.uuid);
                        }
                        None => warn!(
                            "project '{}' uses link '{}' missing from room '{}'",
                            doc.name, port.name, self.name
                        ),
                    }
                }
                continue;
            }

            self.graph.add_client_with_uuid(client.uuid, client.name.clone())?;
            if let Some(added) = self.graph.client_mut(client.uuid) {
                added.dict = client.dict.clone();
                added.app = client.app;
                added.hidden = true;
            }
            for port in &client.ports {
                self.graph.add_port_with_uuid(
                    port.uuid,
                    client.uuid,
                    port.name.clone(),
                    port.port_type,
                    port.direction,
                )?;
                if let Some(added) = self.graph.port_mut(port.uuid) {
                    added.dict = port.dict.clone();
                    added.hidden = true;
                }
            }
        }

        for connection in &doc.graph.connections {
            let source = remap.get(&connection.source).copied().unwrap_or(connection.source);
            let dest = remap.get(&connection.dest).copied().unwrap_or(connection.dest);
            match self.graph.connect_with_uuid(connection.uuid, source, dest) {
                Ok(()) => {
                    if let Some(added) = self.graph.connection_mut(connection.uuid) {
                        added.dict = connection.dict.clone();
                    }
                }
                Err(e) => warn!("skipping project connection: {}", e),
            }
        }

        self.supervisor.restore(&doc.apps)?;
        Ok(())
    }

    /// Drop the project's apps and clients, keeping the links.
    pub fn unload_project(&mut self) {
        self.supervisor.clear();
        let doomed: Vec<Uuid> = self
            .graph
            .clients()
            .filter(|c| c.uuid != self.uuid)
            .map(|c| c.uuid)
            .collect();
        for uuid in doomed {
            self.graph.remove_client(uuid);
        }
        self.project = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::DummyServer;
    use crate::supervisor::AppLevel;

    fn stereo() -> RoomTemplate {
        RoomTemplate::from_config(
            "Stereo",
            &RoomTemplateConfig {
                audio_inputs: 2,
                audio_outputs: 2,
                midi_inputs: 0,
                midi_outputs: 0,
            },
        )
    }

    #[test]
    fn test_template_from_config() {
        let template = stereo();
        let names: Vec<_> = template.ports().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["audio_in_1", "audio_in_2", "audio_out_1", "audio_out_2"]);
    }

    #[test]
    fn test_create_mirrors_ports_inverted() {
        let mut studio = Graph::new("studio");
        let room = Room::create(None, "Drums", &stereo(), &mut studio).unwrap();

        let client = studio.client(room.uuid()).unwrap();
        assert_eq!(client.name, "Drums");
        assert_eq!(studio.client_ports(room.uuid()).len(), 4);

        for port in room.ports() {
            let outside = studio.port(port.uuid).unwrap();
            let inside = room.graph().port(port.uuid).unwrap();
            assert_eq!(outside.direction, port.direction);
            assert_eq!(inside.direction, port.direction.inverted());
        }
    }

    #[test]
    fn test_create_reuses_loaded_client() {
        let mut studio = Graph::new("studio");
        let first = Room::create(None, "Drums", &stereo(), &mut studio).unwrap();
        let uuid = first.uuid();
        let port_uuids: Vec<_> = first.ports().iter().map(|p| p.uuid).collect();

        let again = Room::create(Some(uuid), "Drums", &stereo(), &mut studio).unwrap();
        assert_eq!(again.uuid(), uuid);
        assert_eq!(studio.client_count(), 1);
        let reused: Vec<_> = again.ports().iter().map(|p| p.uuid).collect();
        assert_eq!(reused, port_uuids);
    }

    #[test]
    fn test_wire_and_teardown() {
        let mut studio = Graph::new("studio");
        let mut server = DummyServer::new();
        server.start_server().unwrap();
        let mut room = Room::create(None, "Drums", &stereo(), &mut studio).unwrap();

        room.wire(&mut server, &mut studio).unwrap();
        assert!(room.is_live());
        assert_eq!(server.links().count(), 4);

        assert!(!room.studio_presence_is_empty(&studio));
        room.initiate_stop();
        room.teardown_links(&mut server, &mut studio);
        assert_eq!(server.links().count(), 0);
        assert!(room.studio_presence_is_empty(&studio));
        assert!(room.graph_is_empty());
        assert!(!room.graph().is_persist());

        room.destroy(&mut studio);
        assert!(studio.is_empty());
    }

    #[test]
    fn test_wire_fails_on_stopped_server() {
        let mut studio = Graph::new("studio");
        let mut server = DummyServer::new();
        let mut room = Room::create(None, "Drums", &stereo(), &mut studio).unwrap();
        assert!(matches!(
            room.wire(&mut server, &mut studio),
            Err(RoomError::Proxy(_))
        ));
        assert!(!room.is_live());
    }

    #[test]
    fn test_project_moves_between_rooms() {
        let mut studio = Graph::new("studio");
        let mut source = Room::create(None, "A", &stereo(), &mut studio).unwrap();
        let synth = source.graph_mut().add_client("synth");
        let synth_out = source
            .graph_mut()
            .add_port(synth, "out", PortType::Audio, PortDirection::Output)
            .unwrap();
        // audio_out_1 is an output on the studio side, so an input inside
        let link = source
            .ports()
            .iter()
            .find(|p| p.name == "audio_out_1")
            .unwrap()
            .uuid;
        source.graph_mut().connect(synth_out, link).unwrap();
        source
            .supervisor_mut()
            .add("synth", None, "synth", false, AppLevel::Zero, true)
            .unwrap();
        let doc = source.project_document("song");

        let mut target = Room::create(None, "B", &stereo(), &mut studio).unwrap();
        target.apply_project(&doc).unwrap();
        let target_link = target
            .ports()
            .iter()
            .find(|p| p.name == "audio_out_1")
            .unwrap()
            .uuid;

        assert!(target.graph().find_connection(synth_out, target_link).is_some());
        assert!(target.supervisor().find_by_name("synth").is_some());

        target.unload_project();
        assert_eq!(target.graph().client_count(), 1);
        assert!(!target.supervisor().has_apps());
        assert!(target.project().is_none());
    }
}
