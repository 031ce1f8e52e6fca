//! Runtime settings
//!
//! Layered with the `config` crate, later sources overriding earlier ones:
//! built-in defaults, then an optional settings file (`--config`, or
//! `<config dir>/flowrun/config.{toml,yaml,json}`), then `FLOWRUN_*`
//! environment variables such as `FLOWRUN_BIND` or `FLOWRUN_STEP_TIMEOUT_SECS`.

use crate::error::Result;
use crate::server::DEFAULT_BIND;
use crate::toolbox::Toolbox;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const ENV_PREFIX: &str = "FLOWRUN";
pub const DEFAULT_PID_FILE: &str = "/tmp/flowrun.pid";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Toolbox file; the per-user default when unset
    #[serde(default)]
    pub toolbox_path: Option<PathBuf>,
    pub bind: String,
    pub pid_file: PathBuf,
    /// Kill external programs running longer than this; unlimited when unset
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            toolbox_path: None,
            bind: DEFAULT_BIND.to_string(),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            step_timeout_secs: None,
        }
    }
}

impl Settings {
    /// Load settings from defaults, `file` (or the per-user file) and the
    /// process environment.
    ///
    /// # Errors
    ///
    /// * `FlowrunError::Config` - If an explicit file is missing or any source
    ///   is malformed
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with(file, Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    fn load_with(file: Option<&Path>, env: Environment) -> Result<Self> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("bind", defaults.bind)?
            .set_default("pid_file", defaults.pid_file.to_string_lossy().to_string())?;

        match file {
            Some(path) => {
                debug!("Loading settings from {:?}", path);
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(dir) = dirs::config_dir() {
                    let stem = dir.join("flowrun").join("config");
                    builder = builder
                        .add_source(File::with_name(&stem.to_string_lossy()).required(false));
                }
            }
        }

        let settings: Settings = builder.add_source(env).build()?.try_deserialize()?;
        debug!("Effective settings: {:?}", settings);

        Ok(settings)
    }

    /// Toolbox file to load and save
    pub fn toolbox_path(&self) -> Result<PathBuf> {
        match &self.toolbox_path {
            Some(path) => Ok(path.clone()),
            None => Toolbox::default_path(),
        }
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }
}
