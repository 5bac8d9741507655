//! Host-configurable engine options

use crate::host::{CoreOption, Host};
use rg_core::Config;

/// Key of the dynamic recompiler option
pub const DRC_OPTION_KEY: &str = "rg_drc";

/// Options declared to the host
pub const CORE_OPTIONS: &[CoreOption] = &[CoreOption {
    key: DRC_OPTION_KEY,
    description: "Dynamic recompiler (restart)",
    values: &["enabled", "disabled"],
}];

/// Engine options resolved from the host's variables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Translation setting in effect for the loaded game
    pub translation: bool,
    /// Translation setting requested after load, applied on the next load
    pub pending_translation: Option<bool>,
    /// Used at load time when the host has no value
    default_translation: bool,
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            translation: config.cpu.translation,
            pending_translation: None,
            default_translation: config.cpu.translation,
        }
    }

    fn parse_toggle(value: &str) -> Option<bool> {
        match value {
            "enabled" => Some(true),
            "disabled" => Some(false),
            _ => None,
        }
    }

    /// Re-read the host's variables.
    ///
    /// At load time the host's value takes effect immediately; a missing
    /// variable falls back to the configured default (enabled unless the
    /// config says otherwise). Between frames a differing value is only
    /// recorded as pending, since the caches cannot be reallocated live.
    pub fn resolve<H: Host + ?Sized>(&mut self, host: &H, from_load: bool) {
        let requested = match host.variable(DRC_OPTION_KEY) {
            Some(value) => match Self::parse_toggle(&value) {
                Some(enabled) => enabled,
                None => {
                    tracing::warn!("Ignoring unknown {} value {:?}", DRC_OPTION_KEY, value);
                    return;
                }
            },
            None if from_load => self.default_translation,
            None => return,
        };

        if from_load {
            self.translation = requested;
            self.pending_translation = None;
        } else if requested != self.translation {
            tracing::info!(
                "Dynamic recompiler will be {} after the game is reloaded",
                if requested { "enabled" } else { "disabled" }
            );
            self.pending_translation = Some(requested);
        } else {
            self.pending_translation = None;
        }
    }
}
