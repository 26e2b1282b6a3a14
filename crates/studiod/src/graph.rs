//! Client/port/connection store
//!
//! Ports are nodes and connections are edges of a petgraph StableGraph, so
//! removing a port drops its connections with it. Clients own ports and are
//! kept alongside, in insertion order. Every entity carries a key/value
//! dictionary and a hidden flag: hidden entities are remembered (they are
//! persisted with the studio) but are not currently present on the server.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

pub type Dict = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Audio,
    Midi,
}

/// Direction as seen from the owning client
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    /// Data flows into the client (playback)
    Input,
    /// Data flows out of the client (capture)
    Output,
}

impl PortDirection {
    pub fn inverted(self) -> Self {
        match self {
            PortDirection::Input => PortDirection::Output,
            PortDirection::Output => PortDirection::Input,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub uuid: Uuid,
    pub name: String,
    pub dict: Dict,
    pub hidden: bool,
    /// Process the client belongs to, when the server reported one
    pub pid: Option<u32>,
    /// App that started the client
    pub app: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    pub uuid: Uuid,
    pub client: Uuid,
    pub name: String,
    pub port_type: PortType,
    pub direction: PortDirection,
    pub dict: Dict,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub uuid: Uuid,
    pub dict: Dict,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("client not found: {0}")]
    ClientNotFound(Uuid),
    #[error("port not found: {0}")]
    PortNotFound(Uuid),
    #[error("connection not found: {0}")]
    ConnectionNotFound(Uuid),
    #[error("duplicate uuid: {0}")]
    Duplicate(Uuid),
    #[error("cannot connect {from} to {to}: {reason}")]
    BadConnection {
        from: Uuid,
        to: Uuid,
        reason: &'static str,
    },
}

/// Serializable form of a client and its ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSnapshot {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dict: Dict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<Uuid>,
    pub ports: Vec<PortSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub uuid: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub port_type: PortType,
    pub direction: PortDirection,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dict: Dict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub uuid: Uuid,
    pub source: Uuid,
    pub dest: Uuid,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dict: Dict,
}

/// Serializable snapshot of the entire graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dict: Dict,
    pub clients: Vec<ClientSnapshot>,
    pub connections: Vec<ConnectionSnapshot>,
}

pub struct Graph {
    name: String,
    inner: StableGraph<Port, Connection>,
    clients: Vec<Client>,
    port_index: HashMap<Uuid, NodeIndex>,
    dict: Dict,
    persist: bool,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: StableGraph::new(),
            clients: Vec::new(),
            port_index: HashMap::new(),
            dict: Dict::new(),
            persist: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dict(&self) -> &Dict {
        &self.dict
    }

    pub fn dict_mut(&mut self) -> &mut Dict {
        &mut self.dict
    }

    /// Whether the graph is saved with its owner.
    pub fn is_persist(&self) -> bool {
        self.persist
    }

    pub fn set_persist(&mut self, persist: bool) {
        self.persist = persist;
    }

    pub fn add_client(&mut self, name: impl Into<String>) -> Uuid {
        let uuid = Uuid::new_v4();
        self.clients.push(Client {
            uuid,
            name: name.into(),
            dict: Dict::new(),
            hidden: false,
            pid: None,
            app: None,
        });
        uuid
    }

    /// Add a client with a known uuid, as when restoring or mirroring.
    pub fn add_client_with_uuid(
        &mut self,
        uuid: Uuid,
        name: impl Into<String>,
    ) -> Result<(), GraphError> {
        if self.client(uuid).is_some() {
            return Err(GraphError::Duplicate(uuid));
        }
        self.clients.push(Client {
            uuid,
            name: name.into(),
            dict: Dict::new(),
            hidden: false,
            pid: None,
            app: None,
        });
        Ok(())
    }

    /// Remove a client together with its ports and their connections.
    pub fn remove_client(&mut self, uuid: Uuid) -> bool {
        let Some(pos) = self.clients.iter().position(|c| c.uuid == uuid) else {
            return false;
        };
        for port in self.client_ports(uuid) {
            self.remove_port(port);
        }
        self.clients.remove(pos);
        true
    }

    pub fn client(&self, uuid: Uuid) -> Option<&Client> {
        self.clients.iter().find(|c| c.uuid == uuid)
    }

    pub fn client_mut(&mut self, uuid: Uuid) -> Option<&mut Client> {
        self.clients.iter_mut().find(|c| c.uuid == uuid)
    }

    pub fn find_client_by_name(&self, name: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.name == name)
    }

    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.iter()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn add_port(
        &mut self,
        client: Uuid,
        name: impl Into<String>,
        port_type: PortType,
        direction: PortDirection,
    ) -> Result<Uuid, GraphError> {
        let uuid = Uuid::new_v4();
        self.add_port_with_uuid(uuid, client, name, port_type, direction)?;
        Ok(uuid)
    }

    pub fn add_port_with_uuid(
        &mut self,
        uuid: Uuid,
        client: Uuid,
        name: impl Into<String>,
        port_type: PortType,
        direction: PortDirection,
    ) -> Result<(), GraphError> {
        if self.client(client).is_none() {
            return Err(GraphError::ClientNotFound(client));
        }
        if self.port_index.contains_key(&uuid) {
            return Err(GraphError::Duplicate(uuid));
        }

        let index = self.inner.add_node(Port {
            uuid,
            client,
            name: name.into(),
            port_type,
            direction,
            dict: Dict::new(),
            hidden: false,
        });
        self.port_index.insert(uuid, index);
        Ok(())
    }

    /// Remove a port and every connection touching it.
    pub fn remove_port(&mut self, uuid: Uuid) -> bool {
        let Some(index) = self.port_index.remove(&uuid) else {
            return false;
        };
        self.inner.remove_node(index).is_some()
    }

    pub fn port(&self, uuid: Uuid) -> Option<&Port> {
        let index = self.port_index.get(&uuid)?;
        self.inner.node_weight(*index)
    }

    pub fn port_mut(&mut self, uuid: Uuid) -> Option<&mut Port> {
        let index = self.port_index.get(&uuid)?;
        self.inner.node_weight_mut(*index)
    }

    pub fn find_port_by_name(&self, client: Uuid, name: &str) -> Option<&Port> {
        self.ports().find(|p| p.client == client && p.name == name)
    }

    /// Ports of a client, in creation order.
    pub fn client_ports(&self, client: Uuid) -> Vec<Uuid> {
        self.ports()
            .filter(|p| p.client == client)
            .map(|p| p.uuid)
            .collect()
    }

    pub fn client_has_ports(&self, client: Uuid) -> bool {
        self.ports().any(|p| p.client == client)
    }

    pub fn port_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Connect an output port to an input port of the same type.
    pub fn connect(&mut self, source: Uuid, dest: Uuid) -> Result<Uuid, GraphError> {
        let uuid = Uuid::new_v4();
        self.connect_with_uuid(uuid, source, dest)?;
        Ok(uuid)
    }

    pub fn connect_with_uuid(
        &mut self,
        uuid: Uuid,
        source: Uuid,
        dest: Uuid,
    ) -> Result<(), GraphError> {
        let source_idx = *self
            .port_index
            .get(&source)
            .ok_or(GraphError::PortNotFound(source))?;
        let dest_idx = *self
            .port_index
            .get(&dest)
            .ok_or(GraphError::PortNotFound(dest))?;

        self.validate_connection(source_idx, dest_idx)
            .map_err(|reason| GraphError::BadConnection {
                from: source,
                to: dest,
                reason,
            })?;

        if self.find_edge_by_uuid(uuid).is_some() {
            return Err(GraphError::Duplicate(uuid));
        }

        self.inner.add_edge(
            source_idx,
            dest_idx,
            Connection {
                uuid,
                dict: Dict::new(),
                hidden: false,
            },
        );
        Ok(())
    }

    pub fn disconnect(&mut self, uuid: Uuid) -> Result<(), GraphError> {
        let edge = self
            .find_edge_by_uuid(uuid)
            .ok_or(GraphError::ConnectionNotFound(uuid))?;
        self.inner.remove_edge(edge);
        Ok(())
    }

    /// Connection between two ports, if any.
    pub fn find_connection(&self, source: Uuid, dest: Uuid) -> Option<Uuid> {
        let source_idx = self.port_index.get(&source)?;
        let dest_idx = self.port_index.get(&dest)?;
        let edge = self.inner.find_edge(*source_idx, *dest_idx)?;
        self.inner.edge_weight(edge).map(|c| c.uuid)
    }

    pub fn connection_mut(&mut self, uuid: Uuid) -> Option<&mut Connection> {
        let edge = self.find_edge_by_uuid(uuid)?;
        self.inner.edge_weight_mut(edge)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.edge_count()
    }

    pub fn has_visible_connections(&self) -> bool {
        self.inner
            .edge_indices()
            .filter_map(|idx| self.inner.edge_weight(idx))
            .any(|c| !c.hidden)
    }

    /// No clients and no ports.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty() && self.inner.node_count() == 0
    }

    pub fn visible_client_count(&self) -> usize {
        self.clients.iter().filter(|c| !c.hidden).count()
    }

    /// Clients started by one of our apps that the server still shows.
    pub fn visible_app_client_count(&self) -> usize {
        self.clients
            .iter()
            .filter(|c| !c.hidden && c.app.is_some())
            .count()
    }

    pub fn app_has_clients(&self, app: Uuid) -> bool {
        self.clients
            .iter()
            .any(|c| !c.hidden && c.app == Some(app))
    }

    /// Remove every client started by `app`. Returns how many went.
    pub fn remove_app_clients(&mut self, app: Uuid) -> usize {
        let doomed: Vec<Uuid> = self
            .clients
            .iter()
            .filter(|c| c.app == Some(app))
            .map(|c| c.uuid)
            .collect();
        for uuid in &doomed {
            self.remove_client(*uuid);
        }
        doomed.len()
    }

    /// Mark everything as no longer present on the server.
    pub fn hide_all(&mut self) {
        for client in &mut self.clients {
            client.hidden = true;
        }
        for port in self.inner.node_weights_mut() {
            port.hidden = true;
        }
        for connection in self.inner.edge_weights_mut() {
            connection.hidden = true;
        }
    }

    pub fn show_client(&mut self, uuid: Uuid) {
        if let Some(client) = self.client_mut(uuid) {
            client.hidden = false;
        }
        for port in self.inner.node_weights_mut() {
            if port.client == uuid {
                port.hidden = false;
            }
        }
    }

    pub fn hide_client(&mut self, uuid: Uuid) {
        if let Some(client) = self.client_mut(uuid) {
            client.hidden = true;
        }
        for port in self.inner.node_weights_mut() {
            if port.client == uuid {
                port.hidden = true;
            }
        }
    }

    /// Forget clients the server no longer shows.
    pub fn remove_hidden_clients(&mut self) -> usize {
        let hidden: Vec<Uuid> = self
            .clients
            .iter()
            .filter(|c| c.hidden)
            .map(|c| c.uuid)
            .collect();
        for uuid in &hidden {
            self.remove_client(*uuid);
        }
        hidden.len()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.clients.clear();
        self.port_index.clear();
        self.dict.clear();
    }

    /// Log the whole graph at debug level.
    pub fn dump(&self) {
        debug!("{}", self);
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let clients = self
            .clients
            .iter()
            .map(|client| ClientSnapshot {
                uuid: client.uuid,
                name: client.name.clone(),
                dict: client.dict.clone(),
                app: client.app,
                ports: self
                    .client_ports(client.uuid)
                    .into_iter()
                    .filter_map(|uuid| self.port(uuid))
                    .map(|port| PortSnapshot {
                        uuid: port.uuid,
                        name: port.name.clone(),
                        port_type: port.port_type,
                        direction: port.direction,
                        dict: port.dict.clone(),
                    })
                    .collect(),
            })
            .collect();

        let connections = self
            .inner
            .edge_references()
            .filter_map(|e| {
                let source = self.inner.node_weight(e.source())?;
                let dest = self.inner.node_weight(e.target())?;
                let connection = e.weight();
                Some(ConnectionSnapshot {
                    uuid: connection.uuid,
                    source: source.uuid,
                    dest: dest.uuid,
                    dict: connection.dict.clone(),
                })
            })
            .collect();

        GraphSnapshot {
            dict: self.dict.clone(),
            clients,
            connections,
        }
    }

    /// Replace the contents with a snapshot. Restored entities start hidden
    /// until the server reports them.
    pub fn restore(&mut self, snapshot: &GraphSnapshot) -> Result<(), GraphError> {
        self.clear();
        self.dict = snapshot.dict.clone();

        for client in &snapshot.clients {
            self.add_client_with_uuid(client.uuid, client.name.clone())?;
            if let Some(restored) = self.client_mut(client.uuid) {
                restored.dict = client.dict.clone();
                restored.app = client.app;
            }
            for port in &client.ports {
                self.add_port_with_uuid(
                    port.uuid,
                    client.uuid,
                    port.name.clone(),
                    port.port_type,
                    port.direction,
                )?;
                if let Some(restored) = self.port_mut(port.uuid) {
                    restored.dict = port.dict.clone();
                }
            }
        }

        for connection in &snapshot.connections {
            self.connect_with_uuid(connection.uuid, connection.source, connection.dest)?;
            if let Some(restored) = self.connection_mut(connection.uuid) {
                restored.dict = connection.dict.clone();
            }
        }

        self.hide_all();
        Ok(())
    }

    fn ports(&self) -> impl Iterator<Item = &Port> {
        self.inner
            .node_indices()
            .filter_map(|idx| self.inner.node_weight(idx))
    }

    fn find_edge_by_uuid(&self, uuid: Uuid) -> Option<EdgeIndex> {
        self.inner
            .edge_references()
            .find(|e| e.weight().uuid == uuid)
            .map(|e| e.id())
    }

    fn validate_connection(
        &self,
        source: NodeIndex,
        dest: NodeIndex,
    ) -> Result<(), &'static str> {
        let (Some(source), Some(dest)) =
            (self.inner.node_weight(source), self.inner.node_weight(dest))
        else {
            return Err("port vanished");
        };

        if source.direction != PortDirection::Output {
            return Err("source is not an output");
        }
        if dest.direction != PortDirection::Input {
            return Err("destination is not an input");
        }
        if source.port_type != dest.port_type {
            return Err("port type mismatch");
        }
        Ok(())
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph '{}' (persist: {})", self.name, self.persist)?;
        for client in &self.clients {
            let hidden = if client.hidden { " [hidden]" } else { "" };
            writeln!(f, "  client '{}' {}{}", client.name, client.uuid, hidden)?;
            for port in self.ports().filter(|p| p.client == client.uuid) {
                let hidden = if port.hidden { " [hidden]" } else { "" };
                writeln!(
                    f,
                    "    {:?} {:?} port '{}' {}{}",
                    port.port_type, port.direction, port.name, port.uuid, hidden
                )?;
            }
        }
        for edge in self.inner.edge_references() {
            let (Some(source), Some(dest)) = (
                self.inner.node_weight(edge.source()),
                self.inner.node_weight(edge.target()),
            ) else {
                continue;
            };
            writeln!(f, "  connection '{}' -> '{}'", source.name, dest.name)?;
        }
        Ok(())
    }
}
