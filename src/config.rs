//! Layered daemon configuration: compiled defaults, optional `swarmd.toml`,
//! overridden by CLI flags / environment variables (`SPEC_FULL.md` §4.8).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Resolved configuration the daemon actually runs with.
#[derive(Debug, Clone)]
pub struct SwarmdConfig {
    pub workspace_base: PathBuf,
    pub max_agents: usize,
    pub max_depth: usize,
    pub max_concurrent: usize,
    pub min_free_disk_bytes: u64,
    pub smart_tee_line_cap: usize,
    pub tool_result_content_cap: usize,
    pub coordination_response_cap: usize,
    pub health_scan_interval_secs: u64,
    pub default_reviewer_count: usize,
    pub agent_binary: String,
    pub mux_binary: String,
    pub verbose: bool,
}

impl Default for SwarmdConfig {
    fn default() -> Self {
        Self {
            workspace_base: PathBuf::from(".swarmd"),
            max_agents: 45,
            max_depth: 5,
            max_concurrent: 20,
            min_free_disk_bytes: 100 * 1024 * 1024,
            smart_tee_line_cap: 8 * 1024,
            tool_result_content_cap: 2 * 1024,
            coordination_response_cap: 2 * 1024,
            health_scan_interval_secs: 30,
            default_reviewer_count: 3,
            agent_binary: "agent".to_string(),
            mux_binary: "tmux".to_string(),
            verbose: false,
        }
    }
}

impl SwarmdConfig {
    /// Load compiled defaults, then layer an optional `swarmd.toml` found at
    /// `workspace_base/swarmd.toml`, then apply CLI overrides.
    pub fn load(workspace_base: PathBuf, verbose: bool) -> Result<Self> {
        let mut config = Self {
            workspace_base: workspace_base.clone(),
            verbose,
            ..Self::default()
        };

        let toml_path = workspace_base.join("swarmd.toml");
        if toml_path.exists() {
            let toml = SwarmdToml::load(&toml_path)?;
            toml.apply(&mut config);
        }

        if let Ok(binary) = std::env::var("SWARMD_AGENT_BINARY") {
            config.agent_binary = binary;
        }
        if let Ok(binary) = std::env::var("SWARMD_MUX_BINARY") {
            config.mux_binary = binary;
        }

        Ok(config)
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.workspace_base.join("registry")
    }

    pub fn global_index_path(&self) -> PathBuf {
        self.registry_dir().join("GLOBAL_INDEX")
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.workspace_base.join(task_id)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.registry_dir()).context("failed to create registry dir")?;
        Ok(())
    }
}

/// On-disk `swarmd.toml`: `[limits]` and `[daemon]` sections, mirroring the
/// teacher's `ForgeToml` two-stage parse-then-apply split.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmdToml {
    #[serde(default)]
    pub limits: LimitsToml,
    #[serde(default)]
    pub daemon: DaemonToml,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsToml {
    pub max_agents: Option<usize>,
    pub max_depth: Option<usize>,
    pub max_concurrent: Option<usize>,
    pub min_free_disk_mb: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonToml {
    pub health_scan_interval_secs: Option<u64>,
    pub default_reviewer_count: Option<usize>,
    pub agent_binary: Option<String>,
    pub mux_binary: Option<String>,
}

impl SwarmdToml {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    fn apply(&self, config: &mut SwarmdConfig) {
        if let Some(v) = self.limits.max_agents {
            config.max_agents = v;
        }
        if let Some(v) = self.limits.max_depth {
            config.max_depth = v;
        }
        if let Some(v) = self.limits.max_concurrent {
            config.max_concurrent = v;
        }
        if let Some(v) = self.limits.min_free_disk_mb {
            config.min_free_disk_bytes = v * 1024 * 1024;
        }
        if let Some(v) = self.daemon.health_scan_interval_secs {
            config.health_scan_interval_secs = v;
        }
        if let Some(v) = self.daemon.default_reviewer_count {
            config.default_reviewer_count = v;
        }
        if let Some(ref v) = self.daemon.agent_binary {
            config.agent_binary = v.clone();
        }
        if let Some(ref v) = self.daemon.mux_binary {
            config.mux_binary = v.clone();
        }
    }

    /// Collect non-fatal warnings about values that parse but look wrong,
    /// mirroring the teacher's `ForgeConfig::validate` warnings-collection
    /// style rather than rejecting the file outright.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(max_agents) = self.limits.max_agents
            && max_agents == 0
        {
            warnings.push("limits.max_agents is 0; no workers could ever be spawned".to_string());
        }
        if let Some(max_concurrent) = self.limits.max_concurrent
            && let Some(max_agents) = self.limits.max_agents
            && max_concurrent > max_agents
        {
            warnings.push(format!(
                "limits.max_concurrent ({max_concurrent}) exceeds limits.max_agents ({max_agents})"
            ));
        }
        if let Some(count) = self.daemon.default_reviewer_count
            && count == 0
        {
            warnings.push("daemon.default_reviewer_count is 0; reviews could never reach quorum".to_string());
        }
        warnings
    }
}
