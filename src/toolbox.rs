//! Registry of logical tool names and their executable paths
//!
//! Run steps whose program starts with `$` (e.g. `$cargo build`) are resolved
//! through the toolbox. Lookups never touch the filesystem; only registration
//! searches `PATH`.

use crate::error::{FlowrunError, Result};
use crate::models::ToolInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name → tool mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolbox {
    #[serde(default)]
    tools: BTreeMap<String, ToolInfo>,
}

impl Toolbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Location of the user's toolbox file (`<config dir>/flowrun/toolbox.json`)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            FlowrunError::Other("Could not determine user config directory".to_string())
        })?;
        Ok(config_dir.join("flowrun").join("toolbox.json"))
    }

    /// Load a toolbox from disk. A missing file yields an empty toolbox.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => {
                let toolbox: Toolbox = serde_json::from_str(&content)?;
                debug!("Loaded {} tools from {:?}", toolbox.len(), path);
                Ok(toolbox)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No toolbox at {:?}, starting empty", path);
                Ok(Self::new())
            }
            Err(e) => Err(FlowrunError::Io(e)),
        }
    }

    /// Write the toolbox as pretty JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Saved {} tools to {:?}", self.len(), path);
        Ok(())
    }

    /// Look up a tool by logical name
    pub fn resolve(&self, name: &str) -> Option<&ToolInfo> {
        self.tools.get(name)
    }

    /// Register a tool at an explicit path, replacing any previous entry
    pub fn add_manual(&mut self, name: impl Into<String>, path: impl Into<String>) -> ToolInfo {
        let info = ToolInfo {
            name: name.into(),
            path: path.into(),
        };
        self.tools.insert(info.name.clone(), info.clone());
        info
    }

    /// Register a tool by searching `PATH` for it.
    ///
    /// # Errors
    ///
    /// * `FlowrunError::ToolNotFound` - If no matching executable is on `PATH`
    pub fn add_auto(&mut self, name: &str) -> Result<ToolInfo> {
        let path = find_on_path(name, std::env::var_os("PATH")).ok_or_else(|| {
            FlowrunError::ToolNotFound {
                name: name.to_string(),
            }
        })?;
        Ok(self.add_manual(name, path.to_string_lossy()))
    }

    /// Remove a tool, reporting whether it existed
    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolInfo> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Program file name to search for on this platform
fn program_file_name(name: &str) -> String {
    if cfg!(windows) && Path::new(name).extension().is_none() {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// Search each directory of `path_var` for an executable named `name`
pub fn find_on_path(name: &str, path_var: Option<OsString>) -> Option<PathBuf> {
    let program = program_file_name(name);
    let path_var = path_var?;

    std::env::split_paths(&path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(&program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve() {
        let mut toolbox = Toolbox::new();
        assert!(toolbox.resolve("tool").is_none());

        toolbox.add_manual("tool", "/bin/tool");
        let info = toolbox.resolve("tool").unwrap();
        assert_eq!(info.name, "tool");
        assert_eq!(info.path, "/bin/tool");
    }

    #[test]
    fn test_add_manual_replaces() {
        let mut toolbox = Toolbox::new();
        toolbox.add_manual("tool", "/bin/old");
        toolbox.add_manual("tool", "/bin/new");
        assert_eq!(toolbox.len(), 1);
        assert_eq!(toolbox.resolve("tool").unwrap().path, "/bin/new");
    }

    #[test]
    fn test_remove() {
        let mut toolbox = Toolbox::new();
        toolbox.add_manual("tool", "/bin/tool");
        assert!(toolbox.remove("tool"));
        assert!(!toolbox.remove("tool"));
        assert!(toolbox.is_empty());
    }

    #[test]
    fn test_load_missing_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let toolbox = Toolbox::load(temp_dir.path().join("toolbox.json")).unwrap();
        assert!(toolbox.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("toolbox.json");

        let mut toolbox = Toolbox::new();
        toolbox.add_manual("sh", "/bin/sh");
        toolbox.save(&path).unwrap();

        let loaded = Toolbox::load(&path).unwrap();
        assert_eq!(loaded, toolbox);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["tools"]["sh"]["path"], "/bin/sh");
    }

    #[test]
    fn test_load_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("toolbox.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(Toolbox::load(&path), Err(FlowrunError::Json(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_on_path() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let empty_dir = TempDir::new().unwrap();
        let tool = temp_dir.path().join("mytool");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let not_exec = temp_dir.path().join("plainfile");
        fs::write(&not_exec, "data").unwrap();

        let path_var =
            std::env::join_paths([empty_dir.path(), temp_dir.path()]).unwrap();

        assert_eq!(find_on_path("mytool", Some(path_var.clone())), Some(tool));
        assert_eq!(find_on_path("plainfile", Some(path_var.clone())), None);
        assert_eq!(find_on_path("missing", Some(path_var)), None);
        assert_eq!(find_on_path("mytool", None), None);
    }

    #[test]
    fn test_add_auto_not_found() {
        let mut toolbox = Toolbox::new();
        let result = toolbox.add_auto("definitely-not-a-real-program-xyz");
        assert!(matches!(result, Err(FlowrunError::ToolNotFound { .. })));
        assert!(toolbox.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_add_auto_finds_sh() {
        let mut toolbox = Toolbox::new();
        let info = toolbox.add_auto("sh").unwrap();
        assert!(info.path.ends_with("/sh"));
        assert_eq!(toolbox.resolve("sh"), Some(&info));
    }

    #[test]
    fn test_program_file_name() {
        if cfg!(windows) {
            assert_eq!(program_file_name("cargo"), "cargo.exe");
            assert_eq!(program_file_name("script.bat"), "script.bat");
        } else {
            assert_eq!(program_file_name("cargo"), "cargo");
        }
    }
}
