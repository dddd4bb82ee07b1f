//! Configuration management for the CPA benchmark
//!
//! Loads the provider, prompt and sweep settings from TOML files and provides
//! runtime access. Nothing here is global: the loaded [`Config`] is passed into
//! the sweep explicitly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::VerdictNotation;
use crate::questions::{QuestionLayout, Subject};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Per-subject question layout overrides
    #[serde(default)]
    pub layouts: BTreeMap<Subject, QuestionLayout>,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
}

/// Hosted API provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Requests per minute, 0 for no limit
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    /// Tokens per minute, 0 for no limit
    #[serde(default = "default_tpm")]
    pub tpm: u32,
}

/// Locally hosted models behind an OpenAI-compatible server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_base_url")]
    pub base_url: String,
}

/// Input and output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_corpus_dir")]
    pub corpus_dir: PathBuf,
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,
}

/// Prompt text around each sub-statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_system_prompt")]
    pub system: String,
    #[serde(default = "default_pre_question")]
    pub pre_question: String,
    #[serde(default = "default_post_question")]
    pub post_question: String,
    /// Token pair the system prompt asks the model to answer with
    #[serde(default)]
    pub notation: VerdictNotation,
}

/// The (subject × year × model × retrieval-mode) grid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Model answering inside the retrieval tools
    #[serde(default = "default_sub_model")]
    pub sub_model: String,
    /// Model names starting with one of these go to the hosted API
    #[serde(default = "default_api_prefixes")]
    pub api_model_prefixes: Vec<String>,
    #[serde(default = "default_retrieval_modes")]
    pub retrieval_modes: Vec<bool>,
    #[serde(default = "default_years")]
    pub years: BTreeMap<Subject, Vec<String>>,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

/// Retrieval corpus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Excerpts returned per search
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound on tool-calling rounds per answer
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

/// Execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Per-request timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

// Default value functions
fn default_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_api_key_env() -> String { "OPENAI_API_KEY".to_string() }
fn default_rpm() -> u32 { 500 }
fn default_tpm() -> u32 { 200_000 }
fn default_local_base_url() -> String { "http://localhost:8080/v1".to_string() }
fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_corpus_dir() -> PathBuf { PathBuf::from("vectorstore") }
fn default_result_dir() -> PathBuf { PathBuf::from("result") }
fn default_system_prompt() -> String {
    "与えた文章が正しいか誤っているか判別し、正しければ”True”、誤っていたら”False”を出力しなさい。それ以外には何も含めないことを厳守してください。".to_string()
}
fn default_pre_question() -> String { "問題:\n".to_string() }
fn default_post_question() -> String { "回答:".to_string() }
fn default_models() -> Vec<String> {
    vec![
        "gpt-3.5-turbo-0125".to_string(),
        "gpt-4-turbo-2024-04-09".to_string(),
        "gpt-4o-2024-05-13".to_string(),
    ]
}
fn default_sub_model() -> String { "gpt-3.5-turbo-0125".to_string() }
fn default_api_prefixes() -> Vec<String> {
    vec!["gpt".to_string(), "o1".to_string(), "o3".to_string()]
}
fn default_retrieval_modes() -> Vec<bool> { vec![false] }
fn default_years() -> BTreeMap<Subject, Vec<String>> {
    let mut years = BTreeMap::new();
    years.insert(
        Subject::Audit,
        ["H31_1", "H31_2", "R2_1", "R2_2", "R3", "R4_1", "R4_2", "R5_1", "R5_2"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    years.insert(
        Subject::CoAct,
        ["H28_1", "H28_2", "H29_1", "H29_2", "H30_1", "H30_2", "H31_1", "H31_2", "R2_1", "R2_2", "R3"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    years
}
fn default_max_output_tokens() -> u32 { 500 }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_top_k() -> usize { 4 }
fn default_max_tool_rounds() -> usize { 8 }
fn default_timeout_ms() -> u64 { 120_000 }

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            rpm: default_rpm(),
            tpm: default_tpm(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_url: default_local_base_url(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            corpus_dir: default_corpus_dir(),
            result_dir: default_result_dir(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: default_system_prompt(),
            pre_question: default_pre_question(),
            post_question: default_post_question(),
            notation: VerdictNotation::default(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            sub_model: default_sub_model(),
            api_model_prefixes: default_api_prefixes(),
            retrieval_modes: default_retrieval_modes(),
            years: default_years(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embedding_model: default_embedding_model(),
            top_k: default_top_k(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            local: LocalConfig::default(),
            paths: PathsConfig::default(),
            prompts: PromptConfig::default(),
            sweep: SweepConfig::default(),
            layouts: BTreeMap::new(),
            retrieval: RetrievalConfig::default(),
            benchmark: BenchmarkConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from default config location or return defaults
    pub fn load_or_default() -> Self {
        let config_paths = [
            "config/cpa.toml",
            "../config/cpa.toml",
            "cpa-benchmark/config/cpa.toml",
        ];

        for path in &config_paths {
            if let Ok(config) = Self::from_file(path) {
                tracing::info!("Loaded configuration from {}", path);
                return config;
            }
        }

        tracing::info!("Using default configuration");
        Self::default()
    }

    /// Save configuration to a TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, content)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Whether a model is served by the hosted API rather than the local server
    pub fn is_api_model(&self, model: &str) -> bool {
        self.sweep
            .api_model_prefixes
            .iter()
            .any(|p| model.starts_with(p.as_str()))
    }

    /// Question layout for a subject
    pub fn layout_for(&self, subject: Subject) -> QuestionLayout {
        self.layouts
            .get(&subject)
            .copied()
            .unwrap_or_else(|| subject.default_layout())
    }

    /// Years configured for a subject
    pub fn years_for(&self, subject: Subject) -> &[String] {
        self.sweep
            .years
            .get(&subject)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Subjects with at least one configured year, in a fixed order
    pub fn subjects(&self) -> Vec<Subject> {
        Subject::all()
            .into_iter()
            .filter(|s| !self.years_for(*s).is_empty())
            .collect()
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
}
