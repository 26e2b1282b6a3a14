//! Audio server control proxy
//!
//! Requests are synchronous, but their effect is reported later through
//! [`ServerProxy::take_events`]; the driver turns those events into
//! environment signals that waiting commands consume.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::graph::{PortDirection, PortType};

/// Server configuration, parameter path to value
pub type ServerParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The control service became reachable
    Appeared,
    /// The control service went away
    Disappeared,
    Started,
    Stopped,
    ClientAppeared { name: String, pid: Option<u32> },
    ClientDisappeared { name: String },
}

/// A port the server exposes for a room link
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkPort {
    pub room: String,
    pub name: String,
    pub port_type: PortType,
    pub direction: PortDirection,
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Audio server control service is not available")]
    Unavailable,

    #[error("Audio server request {request} failed: {message}")]
    Request {
        request: &'static str,
        message: String,
    },
}

pub trait ServerProxy {
    fn start_server(&mut self) -> Result<(), ProxyError>;

    fn stop_server(&mut self) -> Result<(), ProxyError>;

    fn is_started(&mut self) -> Result<bool, ProxyError>;

    fn parameters(&mut self) -> Result<ServerParams, ProxyError>;

    fn get_param(&mut self, path: &str) -> Result<Option<String>, ProxyError>;

    fn set_param(&mut self, path: &str, value: &str) -> Result<(), ProxyError>;

    fn reset_all_params(&mut self) -> Result<(), ProxyError>;

    fn create_link(&mut self, port: &LinkPort) -> Result<(), ProxyError>;

    fn destroy_link(&mut self, port: &LinkPort) -> Result<(), ProxyError>;

    /// Events observed since the last call, oldest first.
    fn take_events(&mut self) -> Vec<ServerEvent>;
}

/// In-process server stand-in.
///
/// Starts and stops complete instantly but are only reported on the next
/// [`take_events`](ServerProxy::take_events), like a real server answering
/// over IPC.
pub struct DummyServer {
    started: bool,
    params: ServerParams,
    links: BTreeSet<LinkPort>,
    events: VecDeque<ServerEvent>,
}

impl DummyServer {
    pub fn new() -> Self {
        let mut events = VecDeque::new();
        events.push_back(ServerEvent::Appeared);
        Self {
            started: false,
            params: default_params(),
            links: BTreeSet::new(),
            events,
        }
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkPort> {
        self.links.iter()
    }
}

impl Default for DummyServer {
    fn default() -> Self {
        Self::new()
    }
}

fn default_params() -> ServerParams {
    [
        ("engine/realtime", "true"),
        ("driver/rate", "48000"),
        ("driver/period", "1024"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl ServerProxy for DummyServer {
    fn start_server(&mut self) -> Result<(), ProxyError> {
        if self.started {
            return Err(ProxyError::Request {
                request: "start",
                message: "server is already started".to_string(),
            });
        }
        info!("dummy server starting");
        self.started = true;
        self.events.push_back(ServerEvent::Started);
        Ok(())
    }

    fn stop_server(&mut self) -> Result<(), ProxyError> {
        if !self.started {
            return Err(ProxyError::Request {
                request: "stop",
                message: "server is not started".to_string(),
            });
        }
        info!("dummy server stopping");
        self.started = false;
        self.links.clear();
        self.events.push_back(ServerEvent::Stopped);
        Ok(())
    }

    fn is_started(&mut self) -> Result<bool, ProxyError> {
        Ok(self.started)
    }

    fn parameters(&mut self) -> Result<ServerParams, ProxyError> {
        Ok(self.params.clone())
    }

    fn get_param(&mut self, path: &str) -> Result<Option<String>, ProxyError> {
        Ok(self.params.get(path).cloned())
    }

    fn set_param(&mut self, path: &str, value: &str) -> Result<(), ProxyError> {
        debug!("dummy server param {} = {}", path, value);
        self.params.insert(path.to_string(), value.to_string());
        Ok(())
    }

    fn reset_all_params(&mut self) -> Result<(), ProxyError> {
        self.params = default_params();
        Ok(())
    }

    fn create_link(&mut self, port: &LinkPort) -> Result<(), ProxyError> {
        if !self.started {
            return Err(ProxyError::Request {
                request: "create link",
                message: "server is not started".to_string(),
            });
        }
        self.links.insert(port.clone());
        Ok(())
    }

    fn destroy_link(&mut self, port: &LinkPort) -> Result<(), ProxyError> {
        self.links.remove(port);
        Ok(())
    }

    fn take_events(&mut self) -> Vec<ServerEvent> {
        self.events.drain(..).collect()
    }
}
