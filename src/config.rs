use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_API_URL: &str = "https://www.receitaws.com.br/v1/cnpj";
pub const DEFAULT_OUTPUT_FILE: &str = "resultado_consulta.txt";
pub const DEFAULT_SEARCH_URL: &str = "https://www.google.com/";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
const DEFAULT_WEBDRIVER_PORT: u16 = 9515;

const REQUEST_TIMEOUT_SECS: u64 = 10;
/// Pause between two batch lookups.
const RATE_LIMIT_SECS: u64 = 3;
/// Extra pause after an HTTP 429 before the single retry.
const BACKOFF_429_SECS: u64 = 60;
const ELEMENT_WAIT_SECS: u64 = 10;
const ELEMENT_POLL_MS: u64 = 500;

/// Every tunable of the application. `Default` gives the compiled values;
/// `from_env` lets a `.env` file or the environment override a few of them.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub request_timeout: Duration,
    pub rate_limit: Duration,
    pub backoff_429: Duration,
    pub output_file: PathBuf,
    pub search_url: String,
    pub query_input_name: String,
    pub heading_selector: String,
    pub element_wait: Duration,
    pub element_poll: Duration,
    pub webdriver_url: String,
    pub chromedriver_path: Option<PathBuf>,
    pub headless: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            rate_limit: Duration::from_secs(RATE_LIMIT_SECS),
            backoff_429: Duration::from_secs(BACKOFF_429_SECS),
            output_file: PathBuf::from(DEFAULT_OUTPUT_FILE),
            search_url: DEFAULT_SEARCH_URL.to_string(),
            query_input_name: "q".to_string(),
            heading_selector: "h3.LC20lb".to_string(),
            element_wait: Duration::from_secs(ELEMENT_WAIT_SECS),
            element_poll: Duration::from_millis(ELEMENT_POLL_MS),
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            chromedriver_path: None,
            headless: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = non_empty_var("CNPJ_API_URL") {
            config.api_url = url;
        }
        if let Some(file) = non_empty_var("CNPJ_OUTPUT_FILE") {
            config.output_file = PathBuf::from(file);
        }
        if let Some(url) = non_empty_var("WEBDRIVER_URL") {
            config.webdriver_url = url;
        }
        if let Some(path) = non_empty_var("CHROMEDRIVER_PATH") {
            config.chromedriver_path = Some(PathBuf::from(path));
        }
        if let Some(value) = non_empty_var("BROWSER_HEADLESS") {
            config.headless = parse_flag(&value)
                .with_context(|| format!("BROWSER_HEADLESS has an invalid value: {value}"))?;
        }

        Ok(config)
    }

    /// Port chromedriver should listen on, taken from the WebDriver URL.
    pub fn webdriver_port(&self) -> u16 {
        reqwest::Url::parse(&self.webdriver_url)
            .ok()
            .and_then(|url| url.port_or_known_default())
            .unwrap_or(DEFAULT_WEBDRIVER_PORT)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "sim" => Some(true),
        "0" | "false" | "no" | "nao" | "não" => Some(false),
        _ => None,
    }
}
