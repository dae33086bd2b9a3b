// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted connection settings for a rule store.

use rulestore::{StoreOptions, DEFAULT_TABLE_NAME};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigService, ConfigStore};

/// Config key the settings are stored under.
pub const SETTINGS_KEY: &str = "rulestore";

/// Environment variable overriding [`StoreSettings::url`].
pub const ENV_URL: &str = "RULESTORE_URL";

/// Environment variable overriding [`StoreSettings::table_name`].
pub const ENV_TABLE: &str = "RULESTORE_TABLE";

/// Where and how to open the rule store.
///
/// Missing fields in a stored blob take their defaults, so a partial file
/// such as `{"table_name": "authz"}` is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Connection descriptor passed to [`rulestore::RuleStore::open`].
    pub url: String,
    /// Table holding the rules.
    pub table_name: String,
    /// Assume the table already exists.
    pub skip_table_create: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_owned(),
            table_name: DEFAULT_TABLE_NAME.to_owned(),
            skip_table_create: false,
        }
    }
}

impl StoreSettings {
    /// Load from `service`, falling back to defaults when nothing is stored.
    pub fn load<S: ConfigStore>(service: &ConfigService<S>) -> Result<Self, ConfigError> {
        service.load_or_default(SETTINGS_KEY)
    }

    /// Persist to `service`.
    pub fn save<S: ConfigStore>(&self, service: &ConfigService<S>) -> Result<(), ConfigError> {
        service.save(SETTINGS_KEY, self)
    }

    /// Apply [`ENV_URL`] and [`ENV_TABLE`] from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`. Unset or empty values leave the field
    /// alone.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());
        if let Some(url) = get(ENV_URL) {
            self.url = url;
        }
        if let Some(table_name) = get(ENV_TABLE) {
            self.table_name = table_name;
        }
        self
    }

    /// Constructor options for [`rulestore::RuleStore`].
    pub fn to_options(&self) -> StoreOptions {
        let options = StoreOptions::default().with_table_name(self.table_name.as_str());
        if self.skip_table_create {
            options.skip_table_create()
        } else {
            options
        }
    }
}
