//! Configuration management for testagon
//!
//! Settings are layered: built-in defaults, then the global file
//! (~/.config/testagon/config.json), then the project file (.testagon.json),
//! then environment variables. The resolved value is created once at startup
//! and handed to every component explicitly.

use crate::util::write_atomic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Project-local config file name (hidden, so the scanner never picks it up)
pub const PROJECT_CONFIG_FILE: &str = ".testagon.json";

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "openai/gpt-4o";

/// Keys `save_project` writes. Service settings stay in the global file.
const PROJECT_KEYS: &[&str] = &[
    "test_dir",
    "test_prefix",
    "source_extension",
    "pytest_command",
    "test_timeout_secs",
    "invariants",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API key for the reasoning service. Never written by `save_project`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// OpenAI-compatible base URL (`/chat/completions` is appended)
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Upper bound on syntax-repair round trips per generated file
    pub max_syntax_attempts: usize,
    /// Root of the generated test tree, relative to the project root
    pub test_dir: PathBuf,
    /// Prefix added to every generated test file name
    pub test_prefix: String,
    /// Extension of source files eligible for generation
    pub source_extension: String,
    pub pytest_command: String,
    pub test_timeout_secs: u64,
    /// Annotate functions with invariants before generating tests
    pub invariants: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 16384,
            max_syntax_attempts: crate::syntax::DEFAULT_MAX_ATTEMPTS,
            test_dir: PathBuf::from("tests"),
            test_prefix: "test_".to_string(),
            source_extension: "py".to_string(),
            pytest_command: "pytest".to_string(),
            test_timeout_secs: 300,
            invariants: true,
        }
    }
}

impl Config {
    /// Get the global config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("testagon"))
    }

    /// Get the global config file path
    fn global_config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Resolve the configuration for the project rooted at `project_root`
    pub fn load(project_root: &Path) -> Self {
        // .env is optional; a missing file is the common case
        let _ = dotenvy::from_path(project_root.join(".env"));

        let global = Self::global_config_path();
        let mut config = Self::layered(global.as_deref(), &project_root.join(PROJECT_CONFIG_FILE));
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    /// Defaults, then each file key by key. A key a later file leaves out
    /// keeps the earlier value.
    fn layered(global: Option<&Path>, project: &Path) -> Self {
        let mut merged = Map::new();
        for layer in global.into_iter().chain([project]).filter_map(read_config_layer) {
            merged.extend(layer);
        }
        match serde_json::from_value(Value::Object(merged)) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("Config layers do not combine ({}); using defaults", err);
                Self::default()
            }
        }
    }

    /// Overlay environment variables. Takes a lookup so tests stay hermetic.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("TESTAGON_API_KEY").or_else(|| lookup("OPENROUTER_API_KEY")) {
            if !key.trim().is_empty() {
                self.api_key = Some(key.trim().to_string());
            }
        }
        if let Some(url) = lookup("TESTAGON_BASE_URL") {
            self.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("TESTAGON_MODEL") {
            self.model = model;
        }
    }

    /// Absolute path of the generated test tree
    pub fn test_root(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.test_dir)
    }

    /// Write the project-scoped settings to the project config file, atomically
    pub fn save_project(&self, project_root: &Path) -> anyhow::Result<PathBuf> {
        let path = project_root.join(PROJECT_CONFIG_FILE);
        let mut fields = match serde_json::to_value(self)? {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        fields.retain(|key, _| PROJECT_KEYS.contains(&key.as_str()));
        let content = serde_json::to_string_pretty(&Value::Object(fields))?;
        write_atomic(&path, &content)?;
        Ok(path)
    }
}

/// The keys one config file sets. A file that is not a valid config object
/// is backed up and contributes nothing.
fn read_config_layer(path: &Path) -> Option<Map<String, Value>> {
    let content = fs::read_to_string(path).ok()?;
    let parsed = serde_json::from_str::<Value>(&content).and_then(|value| {
        serde_json::from_value::<Config>(value.clone())?;
        Ok(value)
    });
    match parsed {
        Ok(Value::Object(fields)) => Some(fields),
        Ok(_) => {
            preserve_corrupt_config(path, &content);
            tracing::warn!(
                "Config file {} is not a JSON object. A backup was saved and it was ignored.",
                path.display()
            );
            None
        }
        Err(err) => {
            preserve_corrupt_config(path, &content);
            tracing::warn!(
                "Config file {} was corrupted ({}). A backup was saved and it was ignored.",
                path.display(),
                err
            );
            None
        }
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.api_key.is_none());
        assert_eq!(config.max_syntax_attempts, 10);
        assert_eq!(config.test_dir, PathBuf::from("tests"));
        assert_eq!(config.test_prefix, "test_");
    }

    #[test]
    fn test_env_overrides_key_and_model() {
        let env: HashMap<&str, &str> = [
            ("OPENROUTER_API_KEY", "sk-fallback"),
            ("TESTAGON_MODEL", "openai/gpt-4o-mini"),
            ("TESTAGON_BASE_URL", "http://localhost:8080/v1/"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("sk-fallback"));
        assert_eq!(config.model, "openai/gpt-4o-mini");
        assert_eq!(config.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_project_file_round_trip_omits_key() {
        let dir = tempdir().unwrap();
        let config = Config {
            api_key: Some("sk-secret".to_string()),
            model: "custom/model".to_string(),
            test_timeout_secs: 30,
            ..Config::default()
        };

        let path = config.save_project(dir.path()).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(!written.contains("sk-secret"));
        assert!(!written.contains("custom/model"));

        let loaded = Config::layered(None, &path);
        assert_eq!(loaded.test_timeout_secs, 30);
        assert_eq!(loaded.model, DEFAULT_MODEL);
        assert!(loaded.api_key.is_none());
    }

    #[test]
    fn test_project_file_overrides_only_the_keys_it_sets() {
        let dir = tempdir().unwrap();
        let global = dir.path().join("testagon").join("config.json");
        fs::create_dir_all(global.parent().unwrap()).unwrap();
        fs::write(
            &global,
            r#"{"model":"global/model","max_syntax_attempts":4,"api_key":"sk-global"}"#,
        )
        .unwrap();
        let project = dir.path().join(PROJECT_CONFIG_FILE);
        fs::write(&project, r#"{"test_dir":"spec","max_syntax_attempts":2}"#).unwrap();

        let config = Config::layered(Some(&global), &project);

        assert_eq!(config.model, "global/model");
        assert_eq!(config.max_syntax_attempts, 2);
        assert_eq!(config.test_dir, PathBuf::from("spec"));
        assert_eq!(config.api_key.as_deref(), Some("sk-global"));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_init_file_keeps_global_service_settings() {
        let dir = tempdir().unwrap();
        let global = dir.path().join("config.json");
        fs::write(&global, r#"{"model":"global/model","max_syntax_attempts":4}"#).unwrap();
        let root = dir.path().join("project");
        fs::create_dir(&root).unwrap();

        let project = Config::default().save_project(&root).unwrap();
        let config = Config::layered(Some(&global), &project);

        assert_eq!(config.model, "global/model");
        assert_eq!(config.max_syntax_attempts, 4);
    }

    #[test]
    fn test_corrupt_config_is_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PROJECT_CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();

        assert!(read_config_layer(&path).is_none());
        assert!(!path.exists());
        assert!(path.with_extension("json.corrupt").exists());
    }

    #[test]
    fn test_mistyped_file_is_ignored_not_merged() {
        let dir = tempdir().unwrap();
        let global = dir.path().join("config.json");
        fs::write(&global, r#"{"model":"global/model"}"#).unwrap();
        let project = dir.path().join(PROJECT_CONFIG_FILE);
        fs::write(&project, r#"{"max_syntax_attempts":"many"}"#).unwrap();

        let config = Config::layered(Some(&global), &project);

        assert_eq!(config.model, "global/model");
        assert_eq!(config.max_syntax_attempts, 10);
        assert!(project.with_extension("json.corrupt").exists());
    }
}
