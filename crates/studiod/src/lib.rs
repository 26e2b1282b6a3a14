//! studiod: audio session daemon
//!
//! A studio is a saved audio-server session: server parameters, a graph of
//! clients, ports and connections, rooms linked into it, and supervised app
//! processes. Every session request becomes one or more queued commands that
//! a single cooperative driver steps once per tick:
//!
//! - **Command / CommandQueue**: PREPARE -> PENDING -> WAITING* -> DONE, only
//!   the head runs, a failure abandons everything queued
//! - **EnvironmentStore**: latched server signals consumed by waiting commands
//! - **commands**: the per-operation bodies and the chains that queue them
//! - **StudioDaemon**: the driver tick and the request surface

pub mod clock;
pub mod codec;
pub mod command;
pub mod commands;
pub mod daemon;
pub mod environment;
pub mod error;
pub mod events;
pub mod graph;
pub mod notify;
pub mod queue;
pub mod room;
pub mod server;
pub mod studio;
pub mod supervisor;

pub use clock::{Clock, Deadline, ManualClock, MonotonicClock};
pub use codec::{JsonCodec, ProjectDocument, ProjectRef, StudioCodec, StudioDocument};
pub use command::{Command, CommandBody, CommandState, Progress, Step};
pub use commands::{AppAction, NewAppRequest};
pub use daemon::{StudioDaemon, StudioEntry};
pub use environment::{EnvironmentStore, Signal};
pub use error::CommandError;
pub use events::{EventSink, LogEventSink, StudioEvent};
pub use graph::{Graph, GraphError, GraphSnapshot, PortDirection, PortType};
pub use notify::{LogNotifier, Notifier, Urgency};
pub use queue::CommandQueue;
pub use room::{Room, RoomTemplate};
pub use server::{DummyServer, LinkPort, ProxyError, ServerEvent, ServerParams, ServerProxy};
pub use studio::{AppTarget, Backends, Studio, StudioSettings};
pub use supervisor::{
    AppLevel, AppProcess, AppSignal, AppSupervisor, LaunchRequest, Launcher, ProcessLauncher,
};
