//! sr-OLTHAD configuration stored as TOML (default `sr-olthad.toml`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "sr-olthad.toml";

const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_PROMPTS_VERSION: &str = "1.0";

/// Top-level configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values the agents were tuned with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SrOlthadConfig {
    /// Indent used when stringifying OLTHADs and non-string env states.
    pub json_indent: usize,
    pub openai: OpenAiConfig,
    pub attempt_summarizer: AgentConfig,
    pub planner: AgentConfig,
    pub backtracker: BacktrackerConfig,
}

impl Default for SrOlthadConfig {
    fn default() -> Self {
        Self {
            json_indent: 3,
            openai: OpenAiConfig::default(),
            attempt_summarizer: AgentConfig::default(),
            planner: AgentConfig {
                max_tries: 3,
                ..AgentConfig::default()
            },
            backtracker: BacktrackerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OpenAiConfig {
    /// Base URL of an OpenAI-compatible API.
    pub api_base: String,
    /// API key. When unset, read from the `api_key_env` environment variable.
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Settings of a single-call LM agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    /// Attempts to get a parseable, valid LM response before giving up.
    pub max_tries: u32,
    pub prompts_version: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tries: 1,
            prompts_version: DEFAULT_PROMPTS_VERSION.to_string(),
        }
    }
}

/// Settings of a backtracker classifier, which may vote over several calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub model: String,
    pub max_tries: u32,
    pub prompts_version: String,
    pub n_calls_for_voting: usize,
    pub max_async_calls_for_voting: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tries: 1,
            prompts_version: DEFAULT_PROMPTS_VERSION.to_string(),
            n_calls_for_voting: 1,
            max_async_calls_for_voting: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BacktrackerConfig {
    pub successful_completion: ClassifierConfig,
    pub exhaustive_effort: ClassifierConfig,
    pub partial_success: ClassifierConfig,
    pub most_worthwhile_pursuit: ClassifierConfig,
}

impl Default for BacktrackerConfig {
    fn default() -> Self {
        Self {
            successful_completion: ClassifierConfig::default(),
            exhaustive_effort: ClassifierConfig::default(),
            partial_success: ClassifierConfig::default(),
            most_worthwhile_pursuit: ClassifierConfig {
                model: "gpt-4o-mini-2024-07-18".to_string(),
                ..ClassifierConfig::default()
            },
        }
    }
}

impl AgentConfig {
    fn validate(&self, section: &str) -> Result<()> {
        validate_common(section, &self.model, self.max_tries)
    }
}

impl ClassifierConfig {
    fn validate(&self, section: &str) -> Result<()> {
        validate_common(section, &self.model, self.max_tries)?;
        if self.n_calls_for_voting == 0 {
            return Err(anyhow!("{section}.n_calls_for_voting must be > 0"));
        }
        if self.max_async_calls_for_voting == 0 {
            return Err(anyhow!("{section}.max_async_calls_for_voting must be > 0"));
        }
        Ok(())
    }
}

fn validate_common(section: &str, model: &str, max_tries: u32) -> Result<()> {
    if model.trim().is_empty() {
        return Err(anyhow!("{section}.model must not be empty"));
    }
    if max_tries == 0 {
        return Err(anyhow!("{section}.max_tries must be > 0"));
    }
    Ok(())
}

impl SrOlthadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.openai.api_base.trim().is_empty() {
            return Err(anyhow!("openai.api_base must not be empty"));
        }
        if self.openai.request_timeout_secs == 0 {
            return Err(anyhow!("openai.request_timeout_secs must be > 0"));
        }
        self.attempt_summarizer.validate("attempt_summarizer")?;
        self.planner.validate("planner")?;
        let bt = &self.backtracker;
        bt.successful_completion
            .validate("backtracker.successful_completion")?;
        bt.exhaustive_effort.validate("backtracker.exhaustive_effort")?;
        bt.partial_success.validate("backtracker.partial_success")?;
        bt.most_worthwhile_pursuit
            .validate("backtracker.most_worthwhile_pursuit")?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SrOlthadConfig::default()`.
pub fn load_config(path: &Path) -> Result<SrOlthadConfig> {
    if !path.exists() {
        let cfg = SrOlthadConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SrOlthadConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SrOlthadConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, SrOlthadConfig::default());
        assert_eq!(cfg.planner.max_tries, 3);
        assert_eq!(
            cfg.backtracker.most_worthwhile_pursuit.model,
            "gpt-4o-mini-2024-07-18"
        );
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/sr-olthad.toml");
        let mut cfg = SrOlthadConfig::default();
        cfg.backtracker.exhaustive_effort.n_calls_for_voting = 3;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("sr-olthad.toml");
        fs::write(&path, "json_indent = 2\n\n[planner]\nmodel = \"gpt-4o\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.json_indent, 2);
        assert_eq!(cfg.planner.model, "gpt-4o");
        assert_eq!(cfg.planner.max_tries, 1);
        assert_eq!(cfg.openai.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn zero_voting_calls_are_rejected() {
        let mut cfg = SrOlthadConfig::default();
        cfg.backtracker.partial_success.n_calls_for_voting = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("backtracker.partial_success.n_calls_for_voting"));
    }
}
