//! Application configuration. Loaded from `config.yaml` in the package root
//! via [`load_config`], with every tunable defaulting to the value fixed in
//! the external interfaces section, so the service runs with zero config.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
    #[serde(default)]
    pub research_worker: ResearchWorkerConfig,
    #[serde(default)]
    pub pdf_worker: PdfWorkerConfig,
    #[serde(default)]
    pub section_generation: SectionGenerationConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub model_provider: ModelProviderConfig,
    #[serde(default)]
    pub custom_search: CustomSearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_disable_security")]
    pub disable_security: bool,
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,
    #[serde(default = "default_window_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_scrape_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "default_web_search_total_timeout_seconds")]
    pub total_timeout_seconds: f64,
    #[serde(default = "default_web_search_scrape_timeout_seconds")]
    pub per_url_timeout_seconds: f64,
    #[serde(default = "default_min_web_documents_low")]
    pub min_documents_low: usize,
    #[serde(default = "default_min_web_documents_medium")]
    pub min_documents_medium: usize,
    #[serde(default = "default_min_web_documents_high")]
    pub min_documents_high: usize,
    #[serde(default = "default_search_result_count")]
    pub search_result_count: usize,
}

impl WebSearchConfig {
    /// `min_documents_before_stop(depth)` from §4.4.
    pub fn min_documents_before_stop(&self, depth: &str) -> usize {
        match depth {
            "low" => self.min_documents_low,
            "high" => self.min_documents_high,
            _ => self.min_documents_medium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfConfig {
    #[serde(default = "default_pdf_probe_timeout_seconds")]
    pub probe_timeout_seconds: f64,
    #[serde(default = "default_pdf_primary_timeout_seconds")]
    pub primary_timeout_seconds: f64,
    #[serde(default = "default_pdf_in_memory_timeout_seconds")]
    pub in_memory_timeout_seconds: f64,
    #[serde(default = "default_pdf_min_partial_chars")]
    pub min_partial_chars: usize,
    #[serde(default = "default_pdf_http_timeout_seconds")]
    pub http_timeout_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchWorkerConfig {
    #[serde(default = "default_research_poll_interval_seconds")]
    pub poll_interval_seconds: f64,
    #[serde(default = "default_research_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_research_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_research_lease_seconds")]
    pub lease_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfWorkerConfig {
    #[serde(default = "default_pdf_worker_poll_interval_seconds")]
    pub poll_interval_seconds: f64,
    #[serde(default = "default_pdf_worker_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_pdf_worker_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_pdf_worker_lease_seconds")]
    pub lease_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionGenerationConfig {
    #[serde(default = "default_section_attempt_timeout_seconds")]
    pub attempt_timeout_seconds: f64,
    #[serde(default = "default_section_retry_delays")]
    pub retry_delays_seconds: Vec<f64>,
}

/// Settings for the OpenAI-compatible chat-completions endpoint every
/// [`crate::model::ModelClient`] instance talks to. `mini_model`/`pro_model`
/// select the model name by `ResearchJob.request.model_tier`; `secondary_model`
/// is the alternate name expert sub-pipelines rotate through to diversify
/// failure modes across a single vendor's model lineup, mirroring the
/// reference's rotation across two distinct vendors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProviderConfig {
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    #[serde(default = "default_model_api_key_env_var")]
    pub api_key_env_var: String,
    #[serde(default = "default_mini_model")]
    pub mini_model: String,
    #[serde(default = "default_pro_model")]
    pub pro_model: String,
    #[serde(default = "default_secondary_model")]
    pub secondary_model: String,
    #[serde(default = "default_model_request_timeout_seconds")]
    pub request_timeout_seconds: f64,
}

/// Settings for the Google Custom Search JSON API `url_search`/`web_search`
/// tools call through [`crate::toolset::SearchProvider`]. `search_engine_id`
/// has no sensible default (it names a caller-provisioned search engine);
/// `None` means the API key/engine id were absent at startup, which the
/// concrete provider surfaces as a per-search error rather than a panic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomSearchConfig {
    #[serde(default = "default_custom_search_base_url")]
    pub base_url: String,
    #[serde(default = "default_custom_search_api_key_env_var")]
    pub api_key_env_var: String,
    #[serde(default)]
    pub search_engine_id: Option<String>,
    #[serde(default = "default_custom_search_timeout_seconds")]
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    #[serde(default = "default_repair_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_repair_retry_timeout_seconds")]
    pub retry_timeout_seconds: f64,
    #[serde(default = "default_visual_repair_enabled")]
    pub visual_repair_enabled: bool,
    #[serde(default = "default_equation_max_chars")]
    pub equation_max_chars: usize,
}

fn default_headless() -> bool {
    true
}
fn default_disable_security() -> bool {
    false
}
fn default_window_width() -> u32 {
    1280
}
fn default_window_height() -> u32 {
    720
}
fn default_scrape_timeout_ms() -> u64 {
    20_000
}
fn default_min_content_chars() -> usize {
    500
}
fn default_web_search_total_timeout_seconds() -> f64 {
    40.0
}
fn default_web_search_scrape_timeout_seconds() -> f64 {
    30.0
}
fn default_min_web_documents_low() -> usize {
    1
}
fn default_min_web_documents_medium() -> usize {
    2
}
fn default_min_web_documents_high() -> usize {
    4
}
fn default_search_result_count() -> usize {
    5
}
fn default_pdf_probe_timeout_seconds() -> f64 {
    2.5
}
fn default_pdf_primary_timeout_seconds() -> f64 {
    30.0
}
fn default_pdf_in_memory_timeout_seconds() -> f64 {
    180.0
}
fn default_pdf_min_partial_chars() -> usize {
    500
}
fn default_pdf_http_timeout_seconds() -> f64 {
    20.0
}
fn default_research_poll_interval_seconds() -> f64 {
    1.0
}
fn default_research_batch_size() -> usize {
    8
}
fn default_research_max_retries() -> u32 {
    2
}
fn default_research_lease_seconds() -> i64 {
    900
}
fn default_pdf_worker_poll_interval_seconds() -> f64 {
    2.0
}
fn default_pdf_worker_batch_size() -> usize {
    2
}
fn default_pdf_worker_max_retries() -> u32 {
    3
}
fn default_pdf_worker_lease_seconds() -> i64 {
    600
}
fn default_section_attempt_timeout_seconds() -> f64 {
    900.0
}
fn default_section_retry_delays() -> Vec<f64> {
    vec![0.5, 1.0]
}
fn default_repair_max_retries() -> u32 {
    2
}
fn default_repair_retry_timeout_seconds() -> f64 {
    60.0
}
fn default_visual_repair_enabled() -> bool {
    true
}
fn default_equation_max_chars() -> usize {
    4096
}
fn default_model_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model_api_key_env_var() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_mini_model() -> String {
    "gpt-5-nano".to_string()
}
fn default_pro_model() -> String {
    "gpt-5-mini".to_string()
}
fn default_secondary_model() -> String {
    "gpt-5-mini".to_string()
}
fn default_model_request_timeout_seconds() -> f64 {
    120.0
}
fn default_custom_search_base_url() -> String {
    "https://www.googleapis.com/customsearch/v1".to_string()
}
fn default_custom_search_api_key_env_var() -> String {
    "CUSTOM_SEARCH_API_KEY".to_string()
}
fn default_custom_search_timeout_seconds() -> f64 {
    20.0
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            browser: BrowserConfig::default(),
            scrape: ScrapeConfig::default(),
            web_search: WebSearchConfig::default(),
            pdf: PdfConfig::default(),
            research_worker: ResearchWorkerConfig::default(),
            pdf_worker: PdfWorkerConfig::default(),
            section_generation: SectionGenerationConfig::default(),
            repair: RepairConfig::default(),
            model_provider: ModelProviderConfig::default(),
            custom_search: CustomSearchConfig::default(),
        }
    }
}

impl Default for CustomSearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_custom_search_base_url(),
            api_key_env_var: default_custom_search_api_key_env_var(),
            search_engine_id: None,
            timeout_seconds: default_custom_search_timeout_seconds(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            disable_security: default_disable_security(),
            window: WindowConfig::default(),
        }
    }
}
impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}
impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_scrape_timeout_ms(),
            min_content_chars: default_min_content_chars(),
        }
    }
}
impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            total_timeout_seconds: default_web_search_total_timeout_seconds(),
            per_url_timeout_seconds: default_web_search_scrape_timeout_seconds(),
            min_documents_low: default_min_web_documents_low(),
            min_documents_medium: default_min_web_documents_medium(),
            min_documents_high: default_min_web_documents_high(),
            search_result_count: default_search_result_count(),
        }
    }
}
impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            probe_timeout_seconds: default_pdf_probe_timeout_seconds(),
            primary_timeout_seconds: default_pdf_primary_timeout_seconds(),
            in_memory_timeout_seconds: default_pdf_in_memory_timeout_seconds(),
            min_partial_chars: default_pdf_min_partial_chars(),
            http_timeout_seconds: default_pdf_http_timeout_seconds(),
        }
    }
}
impl Default for ResearchWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_research_poll_interval_seconds(),
            batch_size: default_research_batch_size(),
            max_retries: default_research_max_retries(),
            lease_seconds: default_research_lease_seconds(),
        }
    }
}
impl Default for PdfWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_pdf_worker_poll_interval_seconds(),
            batch_size: default_pdf_worker_batch_size(),
            max_retries: default_pdf_worker_max_retries(),
            lease_seconds: default_pdf_worker_lease_seconds(),
        }
    }
}
impl Default for SectionGenerationConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_seconds: default_section_attempt_timeout_seconds(),
            retry_delays_seconds: default_section_retry_delays(),
        }
    }
}
impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_retries: default_repair_max_retries(),
            retry_timeout_seconds: default_repair_retry_timeout_seconds(),
            visual_repair_enabled: default_visual_repair_enabled(),
            equation_max_chars: default_equation_max_chars(),
        }
    }
}
impl Default for ModelProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_base_url(),
            api_key_env_var: default_model_api_key_env_var(),
            mini_model: default_mini_model(),
            pro_model: default_pro_model(),
            secondary_model: default_secondary_model(),
            request_timeout_seconds: default_model_request_timeout_seconds(),
        }
    }
}

/// Load config from `config.yaml` in the package root; falls back to
/// built-in defaults if the file is absent.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.yaml");

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let config: AppConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    } else {
        Ok(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_external_interfaces() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.web_search.min_documents_before_stop("low"), 1);
        assert_eq!(cfg.web_search.min_documents_before_stop("medium"), 2);
        assert_eq!(cfg.web_search.min_documents_before_stop("high"), 4);
        assert_eq!(cfg.research_worker.max_retries, 2);
        assert_eq!(cfg.pdf_worker.max_retries, 3);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        // CARGO_MANIFEST_DIR/config.yaml is not shipped by this crate.
        let cfg = load_config().expect("default config always loads");
        assert_eq!(cfg.scrape.min_content_chars, 500);
    }
}
