use tracing::{debug, error, info};
use uuid::Uuid;

use super::StudioQueue;
use crate::command::{Command, CommandBody, Progress, Step};
use crate::error::CommandError;
use crate::events::StudioEvent;
use crate::notify::{Urgency, CHECK_LOG_HINT};
use crate::room::Room;
use crate::studio::Studio;

struct CreateRoom {
    name: String,
    template: String,
}

impl CommandBody<Studio> for CreateRoom {
    fn name(&self) -> &'static str {
        "create room"
    }

    fn run(&mut self, studio: &mut Studio, _step: Step) -> Progress {
        if studio.room_index(&self.name).is_some() {
            error!("Room '{}' already exists", self.name);
            studio.notify(Urgency::High, "Room creation failed", CHECK_LOG_HINT);
            return Progress::Failed;
        }
        let Some(template) = studio.templates.get(&self.template).cloned() else {
            error!("Unknown room template '{}'", self.template);
            studio.notify(Urgency::High, "Room creation failed", CHECK_LOG_HINT);
            return Progress::Failed;
        };

        info!("Creating room '{}' from template '{}'", self.name, self.template);
        let mut room = match Room::create(None, &self.name, &template, &mut studio.studio_graph) {
            Ok(room) => room,
            Err(e) => {
                error!("Failed to create room '{}': {}", self.name, e);
                studio.notify(Urgency::High, "Room creation failed", CHECK_LOG_HINT);
                return Progress::Failed;
            }
        };

        if studio.is_started() {
            if let Err(e) = room.wire(studio.server.as_mut(), &mut studio.studio_graph) {
                error!("Failed to wire room '{}': {}", self.name, e);
                room.teardown_links(studio.server.as_mut(), &mut studio.studio_graph);
                room.destroy(&mut studio.studio_graph);
                studio.notify(Urgency::High, "Room creation failed", CHECK_LOG_HINT);
                return Progress::Failed;
            }
        }

        let event = StudioEvent::RoomAppeared {
            uuid: room.uuid(),
            name: room.name().to_string(),
        };
        studio.rooms.push(room);
        studio.publish(event);
        studio.modified = true;
        Progress::Done
    }
}

/// Queue a room built from `template`.
pub fn create_room(
    queue: &mut StudioQueue,
    studio: &Studio,
    name: &str,
    template: &str,
) -> Result<(), CommandError> {
    if name.is_empty() {
        return Err(CommandError::InvalidArgument("room name is empty".to_string()));
    }
    if studio.room_by_name(name).is_some() {
        return Err(CommandError::NameCollision(name.to_string()));
    }
    if !studio.templates.contains_key(template) {
        return Err(CommandError::UnknownTemplate(template.to_string()));
    }

    queue.add_command(Command::new(CreateRoom {
        name: name.to_string(),
        template: template.to_string(),
    }))
}

struct DeleteRoom {
    name: String,
    uuid: Option<Uuid>,
}

impl CommandBody<Studio> for DeleteRoom {
    fn name(&self) -> &'static str {
        "delete room"
    }

    fn run(&mut self, studio: &mut Studio, step: Step) -> Progress {
        if step.is_first() {
            let Some(index) = studio.room_index(&self.name) else {
                error!("Cannot delete unknown room '{}'", self.name);
                studio.notify(Urgency::High, "Room deletion failed", CHECK_LOG_HINT);
                return Progress::Failed;
            };

            info!("Deleting room '{}'", self.name);
            let room = &mut studio.rooms[index];
            self.uuid = Some(room.uuid());
            room.initiate_stop();
            room.teardown_links(studio.server.as_mut(), &mut studio.studio_graph);
        }

        let Some(index) = self.uuid.and_then(|uuid| studio.room_index_by_uuid(uuid)) else {
            error!("Room '{}' vanished while being deleted", self.name);
            return Progress::Failed;
        };

        let room = &studio.rooms[index];
        if room.has_running_apps() {
            debug!("room '{}' still has running apps", self.name);
            return Progress::Waiting;
        }
        if !room.graph_is_empty() {
            debug!("room '{}' graph still has clients", self.name);
            return Progress::Waiting;
        }
        if !room.studio_presence_is_empty(&studio.studio_graph) {
            debug!("room '{}' still has ports in the studio graph", self.name);
            return Progress::Waiting;
        }

        let room = studio.rooms.remove(index);
        studio.publish(StudioEvent::RoomDisappeared {
            uuid: room.uuid(),
            name: room.name().to_string(),
        });
        room.destroy(&mut studio.studio_graph);
        studio.modified = true;
        info!("Room '{}' deleted", self.name);
        Progress::Done
    }
}

/// Queue the deletion of a room. The room lingers until its apps and
/// clients are gone.
pub fn delete_room(queue: &mut StudioQueue, name: &str) -> Result<(), CommandError> {
    if name.is_empty() {
        return Err(CommandError::InvalidArgument("room name is empty".to_string()));
    }
    queue.add_command(Command::new(DeleteRoom {
        name: name.to_string(),
        uuid: None,
    }))
}
