//! TOML configuration for the `cortex` binary.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. [`load_config`] parses the file and rejects settings that would
//! make the pipeline unsafe to run (for example a lease shorter than the
//! collaborator call timeout, which would let a second runner claim an
//! item that is still being processed).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use radio_cortex_core::license::LicenseKind;
use radio_cortex_core::models::{Capability, Status};
use radio_cortex_core::pipeline;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Per-capability overrides, keyed by capability name.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub compliance: ComplianceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            lease_secs: default_lease_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}
fn default_lease_secs() -> u64 {
    300
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_call_timeout_secs() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    30
}
fn default_backoff_max_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AgentConfig {
    /// Status this capability's runner consumes. Must be owned by the
    /// capability in the status graph.
    #[serde(default)]
    pub consumes: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            url: None,
            timeout_secs: default_http_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_provider")]
    pub provider: String,
    #[serde(default = "default_classifier_url")]
    pub url: String,
    #[serde(default = "default_classifier_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: default_classifier_provider(),
            url: default_classifier_url(),
            model: default_classifier_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_classifier_provider() -> String {
    "keyword".to_string()
}
fn default_classifier_url() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}
fn default_classifier_model() -> String {
    "llama3-70b-8192".to_string()
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetcherConfig {
    #[serde(default = "default_fetcher_provider")]
    pub provider: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            provider: default_fetcher_provider(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_fetcher_provider() -> String {
    "none".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ComplianceConfig {
    #[serde(default = "default_allowed_licenses")]
    pub allowed: Vec<LicenseKind>,
    #[serde(default = "default_min_duration_secs")]
    pub min_duration_secs: i64,
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: i64,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            allowed: default_allowed_licenses(),
            min_duration_secs: default_min_duration_secs(),
            max_duration_secs: default_max_duration_secs(),
        }
    }
}

fn default_allowed_licenses() -> Vec<LicenseKind> {
    vec![
        LicenseKind::Cc0,
        LicenseKind::CcBy,
        LicenseKind::CcBySa,
        LicenseKind::PublicDomain,
    ]
}
fn default_min_duration_secs() -> i64 {
    60
}
fn default_max_duration_secs() -> i64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8088".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub kind: String,
    pub path: PathBuf,
}

impl PipelineConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Config {
    /// The status a capability's runner consumes, honoring `[agents.<cap>]`.
    pub fn consumes(&self, capability: Capability) -> Result<Status> {
        match self
            .agents
            .get(capability.as_str())
            .and_then(|a| a.consumes.as_deref())
        {
            Some(name) => Ok(name.parse::<Status>()?),
            None => Ok(pipeline::input_status(capability)),
        }
    }

    /// Retry ceiling for a capability, honoring `[agents.<cap>]`.
    pub fn max_attempts(&self, capability: Capability) -> u32 {
        self.agents
            .get(capability.as_str())
            .and_then(|a| a.max_attempts)
            .unwrap_or(self.pipeline.max_attempts)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let p = &config.pipeline;
    if p.batch_size == 0 {
        bail!("pipeline.batch_size must be >= 1");
    }
    if p.max_attempts == 0 {
        bail!("pipeline.max_attempts must be >= 1");
    }
    if p.call_timeout_secs == 0 {
        bail!("pipeline.call_timeout_secs must be > 0");
    }
    if p.lease_secs <= p.call_timeout_secs {
        bail!(
            "pipeline.lease_secs ({}) must be greater than pipeline.call_timeout_secs ({})",
            p.lease_secs,
            p.call_timeout_secs
        );
    }
    if p.poll_interval_secs == 0 || p.sweep_interval_secs == 0 {
        bail!("pipeline.poll_interval_secs and pipeline.sweep_interval_secs must be > 0");
    }
    if p.backoff_max_secs < p.backoff_base_secs {
        bail!("pipeline.backoff_max_secs must be >= pipeline.backoff_base_secs");
    }

    for (name, agent) in &config.agents {
        let capability: Capability = name
            .parse()
            .with_context(|| format!("Unknown agent section: [agents.{}]", name))?;
        if agent.max_attempts == Some(0) {
            bail!("agents.{}.max_attempts must be >= 1", name);
        }
        let status = config.consumes(capability)?;
        pipeline::authorize(capability, status)?;
    }

    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "hash" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama")
        && config.embedding.model.is_none()
    {
        bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.classifier.provider.as_str() {
        "keyword" | "chat" => {}
        other => bail!(
            "Unknown classifier provider: '{}'. Must be keyword or chat.",
            other
        ),
    }

    match config.fetcher.provider.as_str() {
        "none" | "http" => {}
        other => bail!("Unknown fetcher provider: '{}'. Must be none or http.", other),
    }

    let c = &config.compliance;
    if c.min_duration_secs < 0 || c.max_duration_secs < c.min_duration_secs {
        bail!(
            "compliance duration bounds must satisfy \
             0 <= min_duration_secs <= max_duration_secs"
        );
    }

    for (name, source) in &config.sources {
        if source.kind != "jsonl" {
            bail!(
                "Unknown source kind for sources.{}: '{}'. Must be jsonl.",
                name,
                source.kind
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/cortex.sqlite\"\n").unwrap();
        assert_eq!(config.pipeline.batch_size, 10);
        assert_eq!(config.pipeline.lease_secs, 300);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.dims, 256);
        assert_eq!(config.classifier.provider, "keyword");
        assert_eq!(config.server.bind, "127.0.0.1:8088");
        assert_eq!(config.compliance.allowed.len(), 4);
        assert_eq!(
            config.consumes(Capability::Enrich).unwrap(),
            Status::PendingEnrichment
        );
        assert_eq!(config.max_attempts(Capability::Enrich), 3);
    }

    #[test]
    fn test_agent_overrides() {
        let config = parse(
            r#"
[db]
path = "x.sqlite"

[agents.enrich]
consumes = "pending_enrichment"
max_attempts = 5
"#,
        )
        .unwrap();
        assert_eq!(config.max_attempts(Capability::Enrich), 5);
        assert_eq!(config.max_attempts(Capability::Validate), 3);
    }

    #[test]
    fn test_unauthorized_consumes_is_rejected() {
        let err = parse(
            r#"
[db]
path = "x.sqlite"

[agents.enrich]
consumes = "pending_compliance"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not authorized"), "{err}");
    }

    #[test]
    fn test_lease_must_exceed_call_timeout() {
        let err = parse(
            r#"
[db]
path = "x.sqlite"

[pipeline]
lease_secs = 30
call_timeout_secs = 60
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("lease_secs"));
    }

    #[test]
    fn test_unknown_providers_are_rejected() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[classifier]\nprovider = \"oracle\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[fetcher]\nprovider = \"ftp\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[agents.dance]\n").is_err());
    }

    #[test]
    fn test_license_names_in_compliance() {
        let config = parse(
            r#"
[db]
path = "x"

[compliance]
allowed = ["cc0", "cc_by_nc"]
"#,
        )
        .unwrap();
        assert_eq!(
            config.compliance.allowed,
            vec![LicenseKind::Cc0, LicenseKind::CcByNc]
        );
    }

    #[test]
    fn test_zero_batch_is_rejected() {
        assert!(parse("[db]\npath = \"x\"\n[pipeline]\nbatch_size = 0\n").is_err());
    }
}
