//! Per-operation commands and the factory functions that queue them
//!
//! Each factory validates its arguments, reports construction errors
//! synchronously and enqueues one or more commands. Composite operations are
//! queued as a unit: if a later enqueue fails, the commands already added are
//! dropped again before the error is returned.

mod app;
mod exit;
mod load_studio;
mod new_studio;
mod project;
mod rename_studio;
mod room;
mod save_studio;
mod start_studio;
mod stop_studio;
mod unload_studio;

pub use app::{change_app_state, new_app, remove_app, AppAction, NewAppRequest};
pub use exit::exit;
pub use load_studio::load_studio;
pub use new_studio::new_studio;
pub use project::{load_project, save_project, unload_project};
pub use rename_studio::rename_studio;
pub use room::{create_room, delete_room};
pub use save_studio::{save_studio, save_studio_as};
pub use start_studio::start_studio;
pub use stop_studio::stop_studio;
pub use unload_studio::unload_studio;

use crate::queue::CommandQueue;
use crate::studio::Studio;

pub type StudioQueue = CommandQueue<Studio>;

/// Drop everything queued after the queue had `len` commands.
fn unwind(queue: &mut StudioQueue, len: usize) {
    for _ in len..queue.len() {
        queue.drop_command();
    }
}
