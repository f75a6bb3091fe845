use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    meta::Metadata,
    pin::{Direction, PinState},
    register::{Access, BitOrder},
};

/// Process-wide defaults for a model.
///
/// Each attribute kind (registers, bits, pins) has its own registry. These
/// are the least specific layer of every attribute lookup, consulted after
/// anything declared on the instance or its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Versions", into = "Versions")]
pub struct Config {
    /// Bit order of registers that neither declare one nor inherit one from
    /// their domain.
    pub bit_order: BitOrder,

    /// Access policy of bits without a field- or register-level policy.
    pub bit_access: Access,

    /// Direction of pins without a declared direction.
    pub pin_direction: Direction,

    /// Reset state of pins without a declared reset state.
    pub pin_reset: PinState,

    register_meta: Metadata,
    bit_meta: Metadata,
    pin_meta: Metadata,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bit_order: BitOrder::default(),
            bit_access: Access::default(),
            pin_direction: Direction::default(),
            pin_reset: PinState::default(),
            register_meta: Metadata::new(),
            bit_meta: Metadata::new(),
            pin_meta: Metadata::new(),
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the TOML content is
    /// invalid.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {e}"))?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {e}"))
    }

    /// Saves the configuration to a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized to TOML or if
    /// the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content =
            toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, content).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Default metadata applied to every register.
    #[must_use]
    pub const fn register_meta(&self) -> &Metadata {
        &self.register_meta
    }

    /// Default metadata applied to every bit.
    #[must_use]
    pub const fn bit_meta(&self) -> &Metadata {
        &self.bit_meta
    }

    /// Default metadata applied to every pin.
    #[must_use]
    pub const fn pin_meta(&self) -> &Metadata {
        &self.pin_meta
    }

    /// Merges `meta` into the register defaults.
    ///
    /// Applies to registers declared before and after the call.
    pub fn add_register_meta(&mut self, meta: &Metadata) {
        self.register_meta.merge(meta);
    }

    /// Merges `meta` into the bit defaults.
    pub fn add_bit_meta(&mut self, meta: &Metadata) {
        self.bit_meta.merge(meta);
    }

    /// Merges `meta` into the pin defaults.
    pub fn add_pin_meta(&mut self, meta: &Metadata) {
        self.pin_meta.merge(meta);
    }
}

/// The serialized versions of the configuration.
/// This allows for future changes to the configuration format and to the domain
/// type without breaking compatibility.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum Versions {
    #[serde(rename = "1")]
    V1 {
        #[serde(default)]
        bit_order: BitOrder,

        #[serde(default)]
        bit_access: Access,

        #[serde(default)]
        pin_direction: Direction,

        #[serde(default)]
        pin_reset: PinState,

        #[serde(default, skip_serializing_if = "Metadata::is_empty")]
        register_meta: Metadata,

        #[serde(default, skip_serializing_if = "Metadata::is_empty")]
        bit_meta: Metadata,

        #[serde(default, skip_serializing_if = "Metadata::is_empty")]
        pin_meta: Metadata,
    },
}

impl From<Versions> for Config {
    fn from(versions: Versions) -> Self {
        match versions {
            Versions::V1 {
                bit_order,
                bit_access,
                pin_direction,
                pin_reset,
                register_meta,
                bit_meta,
                pin_meta,
            } => Self {
                bit_order,
                bit_access,
                pin_direction,
                pin_reset,
                register_meta,
                bit_meta,
                pin_meta,
            },
        }
    }
}

impl From<Config> for Versions {
    fn from(config: Config) -> Self {
        Self::V1 {
            bit_order: config.bit_order,
            bit_access: config.bit_access,
            pin_direction: config.pin_direction,
            pin_reset: config.pin_reset,
            register_meta: config.register_meta,
            bit_meta: config.bit_meta,
            pin_meta: config.pin_meta,
        }
    }
}
