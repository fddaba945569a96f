//! Run configuration and scenario discovery.

use crate::model::{Scenario, ScenarioOutline};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings shared by every scenario of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root URL of the API under test.
    pub base_url: String,
    /// Token sent while scenarios are authenticated.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,
    /// Slug of the organization scenarios work in by default.
    #[serde(default = "default_organization")]
    pub organization: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Scenarios executed concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

fn default_auth_scheme() -> String {
    "Bearer".to_string()
}

fn default_organization() -> String {
    "default".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_parallelism() -> usize {
    1
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            token: None,
            auth_scheme: default_auth_scheme(),
            organization: default_organization(),
            timeout: default_timeout(),
            parallelism: default_parallelism(),
        }
    }
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Finds and loads scenario files.
#[derive(Debug)]
pub struct ScenarioLoader {
    pub search_paths: Vec<PathBuf>,
}

impl ScenarioLoader {
    pub fn new() -> Self {
        Self {
            search_paths: vec![PathBuf::from("tests/scenarios")],
        }
    }

    pub fn add_path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Load one file and expand its outline rows.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Scenario>> {
        let path = path.as_ref();
        info!("Loading scenario from {}", path.display());

        let content = fs::read_to_string(path)
            .context(format!("Failed to read scenario file: {}", path.display()))?;
        let outline = ScenarioOutline::from_yaml(&content)
            .context(format!("Failed to parse YAML from {}", path.display()))?;
        let scenarios = outline
            .instantiate()
            .context(format!("Failed to expand scenario from {}", path.display()))?;

        debug!(
            "Loaded scenario '{}' ({} instance(s))",
            outline.name,
            scenarios.len()
        );
        Ok(scenarios)
    }

    /// Load every scenario file directly inside `dir`, in file name
    /// order. Unparsable files are skipped.
    pub fn load_dir<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<Scenario>> {
        let dir = dir.as_ref();
        info!("Loading scenarios from directory: {}", dir.display());

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)
            .context(format!("Failed to read directory: {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && is_scenario_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut scenarios = Vec::new();
        for path in paths {
            match self.load_file(&path) {
                Ok(mut loaded) => scenarios.append(&mut loaded),
                Err(err) => {
                    warn!("Skipping scenario file {}: {:#}", path.display(), err);
                }
            }
        }

        info!("Loaded {} scenarios from {}", scenarios.len(), dir.display());
        Ok(scenarios)
    }

    /// Load a file or a directory.
    pub fn load_path<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Scenario>> {
        let path = path.as_ref();
        if path.is_dir() {
            self.load_dir(path)
        } else {
            self.load_file(path)
        }
    }

    /// Load every scenario found in the search paths.
    pub fn load_all(&self) -> Result<Vec<Scenario>> {
        let mut all = Vec::new();

        for path in &self.search_paths {
            if path.is_dir() {
                match self.load_dir(path) {
                    Ok(mut scenarios) => all.append(&mut scenarios),
                    Err(err) => {
                        debug!("Failed to load scenarios from {}: {}", path.display(), err);
                    }
                }
            }
        }

        info!("Loaded {} scenarios in total", all.len());
        Ok(all)
    }
}

impl Default for ScenarioLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep scenarios whose name contains `filter` (case-insensitive) and
/// that carry `tag`, when given.
pub fn select(scenarios: Vec<Scenario>, filter: Option<&str>, tag: Option<&str>) -> Vec<Scenario> {
    let filter = filter.map(str::to_lowercase);
    scenarios
        .into_iter()
        .filter(|s| {
            filter
                .as_ref()
                .map_or(true, |f| s.name.to_lowercase().contains(f))
        })
        .filter(|s| tag.map_or(true, |t| s.has_tag(t)))
        .collect()
}

/// Return `true` for `.yaml` / `.yml` files.
fn is_scenario_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}
