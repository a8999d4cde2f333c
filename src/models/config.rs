//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Endpoints, headers and timeouts
    #[serde(default)]
    pub http: HttpConfig,

    /// Transport retry budget
    #[serde(default)]
    pub retry: RetryConfig,

    /// Adaptive rate-limit backoff
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Signed-endpoint settings
    #[serde(default)]
    pub signature: SignatureConfig,

    /// Business status code interpretation
    #[serde(default)]
    pub business: BusinessConfig,

    /// What to harvest and how much
    #[serde(default)]
    pub harvest: HarvestConfig,

    /// Polite pauses between requests
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Output locations
    #[serde(default)]
    pub paths: PathsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.http.api_url)?;
        url::Url::parse(&self.http.enhanced_url)?;
        url::Url::parse(&self.http.static_url)?;

        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.retry.max_attempts == 0
            || self.retry.detail_attempts == 0
            || self.retry.score_attempts == 0
        {
            return Err(AppError::validation("retry attempt budgets must be > 0"));
        }
        if self.backoff.floor_ms == 0 || self.backoff.floor_ms > self.backoff.ceiling_ms {
            return Err(AppError::validation(
                "backoff.floor_ms must be > 0 and <= backoff.ceiling_ms",
            ));
        }
        if self.backoff.factor < 1.0 {
            return Err(AppError::validation("backoff.factor must be >= 1.0"));
        }
        if !(self.backoff.decay > 0.0 && self.backoff.decay <= 1.0) {
            return Err(AppError::validation("backoff.decay must be in (0, 1]"));
        }
        if self.backoff.jitter_ratio < 0.0 {
            return Err(AppError::validation("backoff.jitter_ratio must be >= 0"));
        }
        if self.business.success_codes.is_empty() {
            return Err(AppError::validation("business.success_codes is empty"));
        }
        if self.business.list_keys.is_empty() {
            return Err(AppError::validation("business.list_keys is empty"));
        }
        if self.harvest.page_size == 0 || self.harvest.major_page_size == 0 {
            return Err(AppError::validation("page sizes must be > 0"));
        }
        if self.harvest.page_ceiling == 0 {
            return Err(AppError::validation("harvest.page_ceiling must be > 0"));
        }
        if !(1..=4).contains(&self.harvest.concurrency) {
            return Err(AppError::validation(
                "harvest.concurrency must be between 1 and 4",
            ));
        }
        for (name, range) in self.pacing.named() {
            if range.min_ms > range.max_ms {
                return Err(AppError::validation(format!(
                    "pacing.{name}: min_ms > max_ms"
                )));
            }
        }
        Ok(())
    }
}

/// Endpoints and HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// POST endpoint of the listing/detail API (`uri` selects the call)
    #[serde(default = "defaults::api_url")]
    pub api_url: String,

    /// GET endpoint of the signed enhanced school listing
    #[serde(default = "defaults::enhanced_url")]
    pub enhanced_url: String,

    /// Root of the per-entity static JSON resources
    #[serde(default = "defaults::static_url")]
    pub static_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    #[serde(default = "defaults::origin")]
    pub origin: String,

    #[serde(default = "defaults::referer")]
    pub referer: String,

    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Session cookie sent with every request, if any
    #[serde(default)]
    pub cookie: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            api_url: defaults::api_url(),
            enhanced_url: defaults::enhanced_url(),
            static_url: defaults::static_url(),
            user_agent: defaults::user_agent(),
            origin: defaults::origin(),
            referer: defaults::referer(),
            accept_language: defaults::accept_language(),
            timeout_secs: defaults::timeout(),
            cookie: None,
        }
    }
}

/// Attempt budgets for transport retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Default attempts per request
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Attempts for per-school detail requests
    #[serde(default = "defaults::detail_attempts")]
    pub detail_attempts: u32,

    /// Attempts for score-line requests
    #[serde(default = "defaults::score_attempts")]
    pub score_attempts: u32,

    /// Base transport retry delay; attempt `n` waits `n * base`
    #[serde(default = "defaults::base_delay")]
    pub base_delay_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            detail_attempts: defaults::detail_attempts(),
            score_attempts: defaults::score_attempts(),
            base_delay_ms: defaults::base_delay(),
        }
    }
}

/// Adaptive backoff applied on rate-limit signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "defaults::backoff_floor")]
    pub floor_ms: u64,

    #[serde(default = "defaults::backoff_ceiling")]
    pub ceiling_ms: u64,

    /// Multiplier applied on each rate-limit signal
    #[serde(default = "defaults::backoff_factor")]
    pub factor: f64,

    /// Multiplier applied on each clean success
    #[serde(default = "defaults::backoff_decay")]
    pub decay: f64,

    /// Every sleep is stretched by a random share in `[0, jitter_ratio]`
    #[serde(default = "defaults::jitter_ratio")]
    pub jitter_ratio: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor_ms: defaults::backoff_floor(),
            ceiling_ms: defaults::backoff_ceiling(),
            factor: defaults::backoff_factor(),
            decay: defaults::backoff_decay(),
            jitter_ratio: defaults::jitter_ratio(),
        }
    }
}

/// Whether empty-valued parameters take part in the signed string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmptyParams {
    #[default]
    Include,
    Strip,
}

/// Signed-endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Shared secret; without it the signature parameter is sent empty
    #[serde(default)]
    pub secret: Option<String>,

    /// Namespace prepended to the canonical parameter string
    #[serde(default = "defaults::signature_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub empty_params: EmptyParams,

    /// Query parameter carrying the signature
    #[serde(default = "defaults::signature_param")]
    pub param: String,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            secret: None,
            prefix: defaults::signature_prefix(),
            empty_params: EmptyParams::default(),
            param: defaults::signature_param(),
        }
    }
}

/// How business status codes inside JSON bodies are read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessConfig {
    #[serde(default = "defaults::code_field")]
    pub code_field: String,

    #[serde(default = "defaults::message_field")]
    pub message_field: String,

    /// Codes meaning success (compared as strings: `0` and `"0"` match)
    #[serde(default = "defaults::success_codes")]
    pub success_codes: Vec<String>,

    /// Codes meaning "slow down"
    #[serde(default = "defaults::rate_limit_codes")]
    pub rate_limit_codes: Vec<String>,

    /// Keys under `data` that may hold the item list, in lookup order
    #[serde(default = "defaults::list_keys")]
    pub list_keys: Vec<String>,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            code_field: defaults::code_field(),
            message_field: defaults::message_field(),
            success_codes: defaults::success_codes(),
            rate_limit_codes: defaults::rate_limit_codes(),
            list_keys: defaults::list_keys(),
        }
    }
}

/// Harvest scope and toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Pages of the school listings to request
    #[serde(default = "defaults::max_pages")]
    pub max_pages: u32,

    #[serde(default = "defaults::page_size")]
    pub page_size: u32,

    #[serde(default = "defaults::major_page_size")]
    pub major_page_size: u32,

    /// Hard stop for any paginated sweep
    #[serde(default = "defaults::page_ceiling")]
    pub page_ceiling: u32,

    /// Fetch per-school detail records
    #[serde(default = "defaults::enabled")]
    pub fetch_detail: bool,

    /// Fetch the signed enhanced listing
    #[serde(default = "defaults::enabled")]
    pub fetch_enhanced: bool,

    /// Cap on school ids read from the schools snapshot (all when unset)
    #[serde(default)]
    pub sample_schools: Option<usize>,

    #[serde(default = "defaults::years")]
    pub score_years: Vec<String>,

    /// Province filter for score lines (empty = all)
    #[serde(default)]
    pub score_province_id: String,

    #[serde(default = "defaults::years")]
    pub plan_years: Vec<String>,

    /// Provinces to query for plans (empty = every known province)
    #[serde(default)]
    pub plan_province_ids: Vec<String>,

    /// Parallel per-entity requests (1..=4)
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_pages: defaults::max_pages(),
            page_size: defaults::page_size(),
            major_page_size: defaults::major_page_size(),
            page_ceiling: defaults::page_ceiling(),
            fetch_detail: defaults::enabled(),
            fetch_enhanced: defaults::enabled(),
            sample_schools: None,
            score_years: defaults::years(),
            score_province_id: String::new(),
            plan_years: defaults::years(),
            plan_province_ids: Vec::new(),
            concurrency: defaults::concurrency(),
        }
    }
}

/// A randomized pause window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl PauseRange {
    pub const fn millis(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms.max(self.min_ms))
    }
}

/// Polite pauses inserted between requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "defaults::page_pause")]
    pub page: PauseRange,

    #[serde(default = "defaults::detail_pause")]
    pub detail: PauseRange,

    #[serde(default = "defaults::score_request_pause")]
    pub score_request: PauseRange,

    #[serde(default = "defaults::score_school_pause")]
    pub score_school: PauseRange,

    #[serde(default = "defaults::school_score_pause")]
    pub school_score: PauseRange,

    #[serde(default = "defaults::plan_request_pause")]
    pub plan_request: PauseRange,

    #[serde(default = "defaults::plan_school_pause")]
    pub plan_school: PauseRange,
}

impl PacingConfig {
    /// No pauses at all; for tests and replayed runs.
    pub fn none() -> Self {
        let zero = PauseRange::millis(0, 0);
        Self {
            page: zero,
            detail: zero,
            score_request: zero,
            score_school: zero,
            school_score: zero,
            plan_request: zero,
            plan_school: zero,
        }
    }

    fn named(&self) -> [(&'static str, PauseRange); 7] {
        [
            ("page", self.page),
            ("detail", self.detail),
            ("score_request", self.score_request),
            ("score_school", self.score_school),
            ("school_score", self.school_score),
            ("plan_request", self.plan_request),
            ("plan_school", self.plan_school),
        ]
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            page: defaults::page_pause(),
            detail: defaults::detail_pause(),
            score_request: defaults::score_request_pause(),
            score_school: defaults::score_school_pause(),
            school_score: defaults::school_score_pause(),
            plan_request: defaults::plan_request_pause(),
            plan_school: defaults::plan_school_pause(),
        }
    }
}

/// Output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory receiving snapshot files
    #[serde(default = "defaults::output_dir")]
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: defaults::output_dir(),
        }
    }
}

/// Parse a year selection: `"2023-2025"`, `"2025,2024"` or a single year.
pub fn parse_years(input: &str) -> Result<Vec<String>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AppError::validation("empty year selection"));
    }

    if let Some((start, end)) = input.split_once('-') {
        let start: u32 = start
            .trim()
            .parse()
            .map_err(|_| AppError::validation(format!("invalid start year in '{input}'")))?;
        let end: u32 = end
            .trim()
            .parse()
            .map_err(|_| AppError::validation(format!("invalid end year in '{input}'")))?;
        if start > end {
            return Err(AppError::validation(format!("empty year range '{input}'")));
        }
        return Ok((start..=end).map(|y| y.to_string()).collect());
    }

    Ok(input
        .split(',')
        .map(str::trim)
        .filter(|y| !y.is_empty())
        .map(str::to_string)
        .collect())
}

mod defaults {
    use std::path::PathBuf;

    use super::PauseRange;

    // HTTP defaults
    pub fn api_url() -> String {
        "https://api.zjzw.cn/web/api/".into()
    }
    pub fn enhanced_url() -> String {
        "https://api-gaokao.zjzw.cn/apidata/web".into()
    }
    pub fn static_url() -> String {
        "https://static-data.gaokao.cn/www/2.0".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".into()
    }
    pub fn origin() -> String {
        "https://www.gaokao.cn".into()
    }
    pub fn referer() -> String {
        "https://www.gaokao.cn/".into()
    }
    pub fn accept_language() -> String {
        "zh-CN,zh;q=0.9".into()
    }
    pub fn timeout() -> u64 {
        15
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn detail_attempts() -> u32 {
        2
    }
    pub fn score_attempts() -> u32 {
        5
    }
    pub fn base_delay() -> u64 {
        2000
    }

    // Backoff defaults
    pub fn backoff_floor() -> u64 {
        1000
    }
    pub fn backoff_ceiling() -> u64 {
        60_000
    }
    pub fn backoff_factor() -> f64 {
        2.0
    }
    pub fn backoff_decay() -> f64 {
        0.9
    }
    pub fn jitter_ratio() -> f64 {
        0.3
    }

    // Signature defaults
    pub fn signature_prefix() -> String {
        "api-gaokao.zjzw.cn/apidata/web?".into()
    }
    pub fn signature_param() -> String {
        "signsafe".into()
    }

    // Business code defaults
    pub fn code_field() -> String {
        "code".into()
    }
    pub fn message_field() -> String {
        "message".into()
    }
    pub fn success_codes() -> Vec<String> {
        vec!["0".into(), "0000".into()]
    }
    pub fn rate_limit_codes() -> Vec<String> {
        vec!["1069".into(), "429".into()]
    }
    pub fn list_keys() -> Vec<String> {
        vec!["item".into(), "items".into()]
    }

    // Harvest defaults
    pub fn max_pages() -> u32 {
        10
    }
    pub fn page_size() -> u32 {
        20
    }
    pub fn major_page_size() -> u32 {
        30
    }
    pub fn page_ceiling() -> u32 {
        200
    }
    pub fn enabled() -> bool {
        true
    }
    pub fn years() -> Vec<String> {
        vec!["2025".into(), "2024".into(), "2023".into()]
    }
    pub fn concurrency() -> usize {
        1
    }

    // Pacing defaults
    pub fn page_pause() -> PauseRange {
        PauseRange::millis(1000, 1500)
    }
    pub fn detail_pause() -> PauseRange {
        PauseRange::millis(500, 800)
    }
    pub fn score_request_pause() -> PauseRange {
        PauseRange::millis(3000, 6000)
    }
    pub fn score_school_pause() -> PauseRange {
        PauseRange::millis(5000, 8000)
    }
    pub fn school_score_pause() -> PauseRange {
        PauseRange::millis(2000, 4000)
    }
    pub fn plan_request_pause() -> PauseRange {
        PauseRange::millis(1500, 3000)
    }
    pub fn plan_school_pause() -> PauseRange {
        PauseRange::millis(4000, 7000)
    }

    // Path defaults
    pub fn output_dir() -> PathBuf {
        PathBuf::from("data")
    }
}
