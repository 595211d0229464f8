use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use ::config::builder::DefaultState;
use ::config::{Config, ConfigBuilder, Environment};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

pub const DEFAULT_MODEL: &str = "google_genai/gemini-2.0-flash";
pub const DEFAULT_SOURCE_URL: &str =
    "https://www.google.com/about/careers/applications/jobs/results/";
pub const DEFAULT_SENTINEL: &str = "N/A";

/// Runtime settings. Every field is optional in the environment; the
/// defaults below apply to whatever is not set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `LLM_MODEL`, optionally prefixed with a provider (`google_genai/...`).
    pub llm_model: String,
    /// `GOOGLE_API_KEY`
    pub google_api_key: Option<String>,
    /// `SPIDER_API_KEY`
    pub spider_api_key: Option<String>,
    /// `SOURCE_URL`
    pub source_url: String,
    /// `OUTPUT_DIR`
    pub output_dir: Option<PathBuf>,
    /// `BACKUP_DIR`
    pub backup_dir: Option<PathBuf>,
    /// `VERBOSE`
    #[serde(deserialize_with = "lenient_bool")]
    pub verbose: bool,
    /// `HEADLESS`. spider.cloud renders pages on its side; the flag is only
    /// reported.
    #[serde(deserialize_with = "lenient_bool")]
    pub headless: bool,
    /// `DEFAULT_VALUE`
    pub default_value: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_model: DEFAULT_MODEL.to_string(),
            google_api_key: None,
            spider_api_key: None,
            source_url: DEFAULT_SOURCE_URL.to_string(),
            output_dir: None,
            backup_dir: None,
            verbose: true,
            headless: true,
            default_value: DEFAULT_SENTINEL.to_string(),
        }
    }
}

impl Settings {
    /// Load from the process environment, after merging a `.env` file from
    /// the working directory (or a parent) if there is one. Variables already
    /// set in the environment win over the file.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e).context("Failed to read .env file"),
        }
        Self::from_builder(Config::builder().add_source(Environment::default()))
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let settings: Settings = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(settings.normalized())
    }

    // Blank values in the environment mean "not set".
    fn normalized(mut self) -> Self {
        self.output_dir = self.output_dir.filter(|p| !p.as_os_str().is_empty());
        self.backup_dir = self.backup_dir.filter(|p| !p.as_os_str().is_empty());
        self.google_api_key = self.google_api_key.filter(|k| !k.trim().is_empty());
        self.spider_api_key = self.spider_api_key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Log filter used when `RUST_LOG` is not set. Verbose output is
    /// limited to this crate; dependencies stay at `info`.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "careers_scraper=debug,info"
        } else {
            "info"
        }
    }
}

/// `true`, `1`, `yes` and `on` (any case) are true. Any other text is false
/// rather than an error.
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct Flag;

    impl<'de> Visitor<'de> for Flag {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a boolean flag")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<bool, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<bool, E> {
            Ok(matches!(
                v.trim().to_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            ))
        }
    }

    deserializer.deserialize_any(Flag)
}
