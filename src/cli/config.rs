//! Command-line interface configuration
//!
//! `h8flash.toml` supplies defaults for the connection options. It is looked
//! up in the current directory, then its parent, then the user configuration
//! directory. Options given on the command line take precedence.

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::debug;
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "h8flash.toml";

/// Defaults for the connection options
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Serial device path, `usb` or `usb:VVVV:PPPP`
    #[serde(default)]
    pub port: Option<String>,
    /// Input clock in MHz, e.g. `"12.5"`
    #[serde(default)]
    pub frequency: Option<String>,
    /// Byte order of v2 targets, `l` or `b`
    #[serde(default)]
    pub endian: Option<String>,
}

impl Config {
    /// Load the configuration file, if there is one
    pub fn load() -> Result<Self> {
        match Self::find_config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Config::default()),
        }
    }

    /// Load the configuration at `path`; a missing file gives the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let Ok(data) = read_to_string(path) else {
            return Ok(Config::default());
        };

        let config = Self::parse(&data)
            .wrap_err_with(|| format!("Failed to parse {}", path.display()))?;
        debug!("Config from {}: {:#?}", path.display(), config);

        Ok(config)
    }

    pub fn parse(data: &str) -> Result<Self> {
        toml::from_str(data).into_diagnostic()
    }

    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;

        let local_config = current_dir.join(CONFIG_FILE);
        if local_config.exists() {
            return Some(local_config);
        }
        if let Some(parent_folder) = current_dir.parent() {
            let workspace_config = parent_folder.join(CONFIG_FILE);
            if workspace_config.exists() {
                return Some(workspace_config);
            }
        }

        ProjectDirs::from("", "", "h8flash")
            .map(|project_dirs| project_dirs.config_dir().join(CONFIG_FILE))
    }
}
