use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::marketplace::SupportedLocales;

pub const DEFAULT_OXYLABS_URL: &str = "https://realtime.oxylabs.io/v1/queries";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Clone, Debug)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub store_path: PathBuf,
    pub scraper: ScraperConfig,
    pub llm: LlmConfig,
}

#[derive(Clone)]
pub struct ScraperConfig {
    pub username: String,
    pub password: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_competitors: usize,
    pub locales: SupportedLocales,
}

#[derive(Clone)]
pub struct LlmConfig {
    /// `None` disables analysis; everything else keeps working.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            var(key).ok_or_else(|| AppError::Config(format!("{} is not set", key)))
        };

        let host = var("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_num::<u16>("PORT", var("PORT"), 3000)?;
        let ip = IpAddr::from_str(&host)
            .map_err(|e| AppError::Config(format!("Invalid host address: {}", e)))?;

        let locales = match var("SUPPORTED_LOCALES") {
            Some(list) => SupportedLocales::from_list(&list)?,
            None => SupportedLocales::default(),
        };

        let scraper = ScraperConfig {
            username: required("OXYLABS_USERNAME")?,
            password: required("OXYLABS_PASSWORD")?,
            base_url: var("OXYLABS_BASE_URL").unwrap_or_else(|| DEFAULT_OXYLABS_URL.to_string()),
            timeout: Duration::from_secs(parse_num("SCRAPER_TIMEOUT_SECS", var("SCRAPER_TIMEOUT_SECS"), 60)?),
            max_competitors: parse_num("MAX_COMPETITORS", var("MAX_COMPETITORS"), 20)?,
            locales,
        };

        let llm = LlmConfig {
            api_key: var("OPENAI_API_KEY"),
            base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            timeout: Duration::from_secs(parse_num("LLM_TIMEOUT_SECS", var("LLM_TIMEOUT_SECS"), 90)?),
        };

        Ok(Config {
            server_addr: SocketAddr::new(ip, port),
            store_path: var("STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/records.json")),
            scraper,
            llm,
        })
    }
}

fn parse_num<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T::Err: fmt::Display,
{
    match value {
        Some(v) => v
            .parse::<T>()
            .map_err(|e| AppError::Config(format!("Invalid {}: {}", key, e))),
        None => Ok(default),
    }
}

impl fmt::Debug for ScraperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScraperConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_competitors", &self.max_competitors)
            .field("locales", &self.locales)
            .finish()
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const CREDS: [(&str, &str); 2] = [("OXYLABS_USERNAME", "user"), ("OXYLABS_PASSWORD", "secret")];

    #[test]
    fn defaults_apply_when_only_credentials_are_set() {
        let config = Config::from_lookup(lookup(&CREDS)).unwrap();
        assert_eq!(config.server_addr.to_string(), "127.0.0.1:3000");
        assert_eq!(config.scraper.base_url, DEFAULT_OXYLABS_URL);
        assert_eq!(config.scraper.max_competitors, 20);
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.scraper.locales, SupportedLocales::default());
    }

    #[test]
    fn missing_scraper_credentials_are_a_config_error() {
        let err = Config::from_lookup(lookup(&[("OXYLABS_USERNAME", "user")])).unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("OXYLABS_PASSWORD")));
    }

    #[test]
    fn blank_llm_key_counts_as_absent() {
        let mut pairs = CREDS.to_vec();
        pairs.push(("OPENAI_API_KEY", "   "));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let mut pairs = CREDS.to_vec();
        pairs.push(("PORT", "eighty"));
        assert!(matches!(Config::from_lookup(lookup(&pairs)), Err(AppError::Config(_))));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut pairs = CREDS.to_vec();
        pairs.push(("OPENAI_API_KEY", "sk-live"));
        let rendered = format!("{:?}", Config::from_lookup(lookup(&pairs)).unwrap());
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("sk-live"));
    }
}
