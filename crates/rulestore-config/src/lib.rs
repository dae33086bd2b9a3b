// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Configuration for rulestore tools.
//! Storage is a port ([`ConfigStore`]); values travel as JSON.

pub mod config;
pub mod fs;
pub mod settings;

pub use config::{ConfigError, ConfigService, ConfigStore};
pub use fs::FsConfigStore;
pub use settings::{StoreSettings, ENV_TABLE, ENV_URL, SETTINGS_KEY};
