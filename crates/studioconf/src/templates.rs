//! Room templates - the shapes a new room can be created from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the template that always exists.
pub const DEFAULT_TEMPLATE: &str = "Default";

/// Link port layout of one room template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomTemplateConfig {
    #[serde(default = "RoomTemplateConfig::default_audio")]
    pub audio_inputs: u32,

    #[serde(default = "RoomTemplateConfig::default_audio")]
    pub audio_outputs: u32,

    #[serde(default = "RoomTemplateConfig::default_midi")]
    pub midi_inputs: u32,

    #[serde(default = "RoomTemplateConfig::default_midi")]
    pub midi_outputs: u32,
}

impl RoomTemplateConfig {
    fn default_audio() -> u32 {
        2
    }

    fn default_midi() -> u32 {
        1
    }
}

impl Default for RoomTemplateConfig {
    fn default() -> Self {
        Self {
            audio_inputs: Self::default_audio(),
            audio_outputs: Self::default_audio(),
            midi_inputs: Self::default_midi(),
            midi_outputs: Self::default_midi(),
        }
    }
}

/// Templates by name. Ordered so listings are stable.
pub type TemplatesConfig = BTreeMap<String, RoomTemplateConfig>;

/// Built-in templates, overridable from config files.
pub fn default_templates() -> TemplatesConfig {
    let mut templates = BTreeMap::new();
    templates.insert(DEFAULT_TEMPLATE.to_string(), RoomTemplateConfig::default());
    templates.insert(
        "Stereo".to_string(),
        RoomTemplateConfig {
            audio_inputs: 2,
            audio_outputs: 2,
            midi_inputs: 0,
            midi_outputs: 0,
        },
    );
    templates
}
