use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("reference image not found: {0}")]
    MissingReferenceImage(PathBuf),
    #[error("output directory {path} is not writable: {source}")]
    OutputDirNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Runtime settings for the service, read once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub serpapi_key: String,
    pub serpapi_base_url: String,
    pub search_country: String,
    pub search_language: String,
    pub reference_image: PathBuf,
    /// Directory that per-request reference images are resolved against.
    pub reference_dir: PathBuf,
    pub output_dir: PathBuf,
    pub request_timeout: Duration,
    pub synthesis_timeout: Duration,
    pub default_max_results: usize,
    pub generation_cap: usize,
    pub fallback_min_live: usize,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            text_model: "gemini-2.0-flash".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            serpapi_key: String::new(),
            serpapi_base_url: "https://serpapi.com/search.json".to_string(),
            search_country: "us".to_string(),
            search_language: "en".to_string(),
            reference_image: PathBuf::from("reference.jpg"),
            reference_dir: PathBuf::from("."),
            output_dir: PathBuf::from("generated_outfits"),
            request_timeout: Duration::from_secs(10),
            synthesis_timeout: Duration::from_secs(60),
            default_max_results: 5,
            generation_cap: 3,
            fallback_min_live: 3,
            port: 8080,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests don't touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, default: String| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };

        let gemini_api_key = text("GEMINI_API_KEY", String::new());
        if gemini_api_key.is_empty() {
            warn!("⚠️ GEMINI_API_KEY is not set; refinement, advice and try-on calls will fail");
        }
        let serpapi_key = text("SERPAPI_KEY", String::new());
        if serpapi_key.is_empty() {
            warn!("⚠️ SERPAPI_KEY is not set; live search will fail and only the fallback catalog is used");
        }

        let request_timeout = Duration::from_secs(parse_number(
            &lookup,
            "REQUEST_TIMEOUT_SECS",
            defaults.request_timeout.as_secs(),
        )?);
        let synthesis_timeout = Duration::from_secs(parse_number(
            &lookup,
            "SYNTHESIS_TIMEOUT_SECS",
            defaults.synthesis_timeout.as_secs(),
        )?);

        let reference_image = lookup("REFERENCE_IMAGE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.reference_image);
        let reference_dir = lookup("REFERENCE_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| parent_dir(&reference_image));

        Ok(Self {
            gemini_api_key,
            gemini_base_url: text("GEMINI_API_BASE", defaults.gemini_base_url),
            text_model: text("GEMINI_TEXT_MODEL", defaults.text_model),
            image_model: text("GEMINI_IMAGE_MODEL", defaults.image_model),
            serpapi_key,
            serpapi_base_url: text("SERPAPI_BASE", defaults.serpapi_base_url),
            search_country: text("SEARCH_COUNTRY", defaults.search_country),
            search_language: text("SEARCH_LANGUAGE", defaults.search_language),
            reference_image,
            reference_dir,
            output_dir: lookup("OUTPUT_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            request_timeout,
            synthesis_timeout,
            default_max_results: parse_positive(&lookup, "DEFAULT_MAX_RESULTS", defaults.default_max_results)?,
            generation_cap: parse_positive(&lookup, "GENERATION_CAP", defaults.generation_cap)?,
            fallback_min_live: parse_number(&lookup, "FALLBACK_MIN_LIVE", defaults.fallback_min_live)?,
            port: parse_number(&lookup, "PORT", defaults.port)?,
        })
    }

    /// Checks the filesystem preconditions: the reference image exists and the
    /// output directory exists (created if needed) and accepts writes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.reference_image.is_file() {
            return Err(ConfigError::MissingReferenceImage(self.reference_image.clone()));
        }
        ensure_writable_dir(&self.output_dir)?;
        info!(
            "✅ Config validated: reference={} output_dir={}",
            self.reference_image.display(),
            self.output_dir.display()
        );
        Ok(())
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn ensure_writable_dir(dir: &Path) -> Result<(), ConfigError> {
    let not_writable = |source| ConfigError::OutputDirNotWritable { path: dir.to_path_buf(), source };
    fs::create_dir_all(dir).map_err(not_writable)?;
    let probe = dir.join(format!(".write_probe_{}", std::process::id()));
    fs::write(&probe, b"ok").map_err(not_writable)?;
    fs::remove_file(&probe).map_err(not_writable)?;
    Ok(())
}

fn parse_number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw.clone() }),
        _ => Ok(default),
    }
}

fn parse_positive<F>(lookup: &F, key: &'static str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_number(lookup, key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue { key, value: "0".into() });
    }
    Ok(value)
}
