//! User-facing status notifications

use std::fmt;

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Urgency {
    Low,
    Normal,
    High,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Urgency::Low => write!(f, "low"),
            Urgency::Normal => write!(f, "normal"),
            Urgency::High => write!(f, "high"),
        }
    }
}

/// Appended to failures whose details only went to the log
pub const CHECK_LOG_HINT: &str = "Please inspect the daemon log for more info.";

/// Fire-and-forget sink for messages meant for the operator.
pub trait Notifier {
    fn notify(&mut self, urgency: Urgency, title: &str, message: &str);
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, urgency: Urgency, title: &str, message: &str) {
        match urgency {
            Urgency::Low => info!(target: "studiod::notify", "{}: {}", title, message),
            Urgency::Normal => warn!(target: "studiod::notify", "{}: {}", title, message),
            Urgency::High => error!(target: "studiod::notify", "{}: {}", title, message),
        }
    }
}
