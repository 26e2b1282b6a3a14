//! Broadcasts to control-surface listeners

use std::fmt;

use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudioEvent {
    StudioAppeared { name: String },
    StudioDisappeared,
    StudioStarted,
    StudioStopped,
    StudioCrashed,
    StudioRenamed { name: String },
    RoomAppeared { uuid: Uuid, name: String },
    RoomDisappeared { uuid: Uuid, name: String },
    ProjectLoaded { room: String, name: String },
    ProjectUnloaded { room: String },
}

impl fmt::Display for StudioEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StudioEvent::StudioAppeared { name } => write!(f, "studio '{}' appeared", name),
            StudioEvent::StudioDisappeared => write!(f, "studio disappeared"),
            StudioEvent::StudioStarted => write!(f, "studio started"),
            StudioEvent::StudioStopped => write!(f, "studio stopped"),
            StudioEvent::StudioCrashed => write!(f, "studio crashed"),
            StudioEvent::StudioRenamed { name } => write!(f, "studio renamed to '{}'", name),
            StudioEvent::RoomAppeared { name, .. } => write!(f, "room '{}' appeared", name),
            StudioEvent::RoomDisappeared { name, .. } => {
                write!(f, "room '{}' disappeared", name)
            }
            StudioEvent::ProjectLoaded { room, name } => {
                write!(f, "project '{}' loaded in room '{}'", name, room)
            }
            StudioEvent::ProjectUnloaded { room } => {
                write!(f, "project unloaded from room '{}'", room)
            }
        }
    }
}

pub trait EventSink {
    fn publish(&mut self, event: StudioEvent);
}

#[derive(Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn publish(&mut self, event: StudioEvent) {
        info!(target: "studiod::events", "{}", event);
    }
}
