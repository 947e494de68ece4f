//! Configuration management for Gauntlet.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use gauntlet_common::constants::{
    DEFAULT_BLOCK_DURATION_SECS, DEFAULT_CHALLENGE_TIMEOUT_SECS, DEFAULT_CLEANUP_INTERVAL_SECS,
    DEFAULT_MAX_ACTIVE_CHALLENGES, DEFAULT_MAX_FAILED_ATTEMPTS, DEFAULT_MAX_PORT,
    DEFAULT_MIN_PORT, DEFAULT_REDIS_URL, DEFAULT_REQUESTS_PER_MINUTE,
};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub captcha: CaptchaConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub balancer: BalancerConfig,
}

/// Server and lifecycle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Port discovery range start (inclusive)
    #[serde(default = "default_min_port")]
    pub min_port: u16,

    /// Port discovery range end (inclusive)
    #[serde(default = "default_max_port")]
    pub max_port: u16,

    /// Fixed metrics port; 0 means discover from the range
    #[serde(default)]
    pub metrics_port: u16,

    /// Graceful drain deadline on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Startup gate: all three surfaces must bind within this window
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Deadline for dependency initialization (Redis dial etc.)
    #[serde(default = "default_init_timeout")]
    pub init_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            min_port: default_min_port(),
            max_port: default_max_port(),
            metrics_port: 0,
            shutdown_timeout_secs: default_shutdown_timeout(),
            startup_timeout_secs: default_startup_timeout(),
            init_timeout_secs: default_init_timeout(),
        }
    }
}

/// Optional external cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_ms: u64,

    #[serde(default = "default_io_timeout")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_io_timeout")]
    pub write_timeout_ms: u64,

    #[serde(default = "default_redis_retries")]
    pub max_retries: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            dial_timeout_ms: default_dial_timeout(),
            read_timeout_ms: default_io_timeout(),
            write_timeout_ms: default_io_timeout(),
            max_retries: default_redis_retries(),
        }
    }
}

/// Challenge store and generator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CaptchaConfig {
    #[serde(default = "default_max_active")]
    pub max_active_challenges: usize,

    #[serde(default = "default_challenge_timeout")]
    pub challenge_timeout_secs: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Pre-generation pool capacity; 0 disables the pool
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Complexity used for pool refills
    #[serde(default = "default_pool_complexity")]
    pub pool_complexity: i32,

    #[serde(default)]
    pub drag_drop: DragDropConfig,

    #[serde(default)]
    pub click: ClickConfig,

    #[serde(default)]
    pub swipe: SwipeConfig,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            max_active_challenges: default_max_active(),
            challenge_timeout_secs: default_challenge_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
            pool_capacity: default_pool_capacity(),
            pool_complexity: default_pool_complexity(),
            drag_drop: DragDropConfig::default(),
            click: ClickConfig::default(),
            swipe: SwipeConfig::default(),
        }
    }
}

/// Drag & drop generator geometry
#[derive(Debug, Clone, Deserialize)]
pub struct DragDropConfig {
    #[serde(default = "default_dd_min_objects")]
    pub min_objects: usize,
    #[serde(default = "default_dd_max_objects")]
    pub max_objects: usize,
    #[serde(default = "default_canvas_width")]
    pub canvas_width: i32,
    #[serde(default = "default_canvas_height")]
    pub canvas_height: i32,
}

impl Default for DragDropConfig {
    fn default() -> Self {
        Self {
            min_objects: default_dd_min_objects(),
            max_objects: default_dd_max_objects(),
            canvas_width: default_canvas_width(),
            canvas_height: default_canvas_height(),
        }
    }
}

/// Click generator geometry
#[derive(Debug, Clone, Deserialize)]
pub struct ClickConfig {
    #[serde(default = "default_click_min")]
    pub min_clicks: usize,
    #[serde(default = "default_click_max")]
    pub max_clicks: usize,
    #[serde(default = "default_click_radius")]
    pub click_radius: i32,
    #[serde(default = "default_canvas_width")]
    pub canvas_width: i32,
    #[serde(default = "default_canvas_height")]
    pub canvas_height: i32,
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            min_clicks: default_click_min(),
            max_clicks: default_click_max(),
            click_radius: default_click_radius(),
            canvas_width: default_canvas_width(),
            canvas_height: default_canvas_height(),
        }
    }
}

/// Swipe generator geometry
#[derive(Debug, Clone, Deserialize)]
pub struct SwipeConfig {
    #[serde(default = "default_swipe_min")]
    pub min_swipes: usize,
    #[serde(default = "default_swipe_max")]
    pub max_swipes: usize,
    #[serde(default = "default_swipe_threshold")]
    pub swipe_threshold: u32,
    #[serde(default = "default_canvas_width")]
    pub canvas_width: i32,
    #[serde(default = "default_canvas_height")]
    pub canvas_height: i32,
}

impl Default for SwipeConfig {
    fn default() -> Self {
        Self {
            min_swipes: default_swipe_min(),
            max_swipes: default_swipe_max(),
            swipe_threshold: default_swipe_threshold(),
            canvas_width: default_canvas_width(),
            canvas_height: default_canvas_height(),
        }
    }
}

/// Security pipeline configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub ip_blocking: IpBlockingConfig,

    #[serde(default)]
    pub bot_detection: BotDetectionConfig,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,

    #[serde(default = "default_burst")]
    pub burst_size: u32,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rpm(),
            burst_size: default_burst(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

/// IP blocking configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IpBlockingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_failures")]
    pub max_failed_attempts: u32,

    #[serde(default = "default_block_duration")]
    pub block_duration_secs: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for IpBlockingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_failed_attempts: default_max_failures(),
            block_duration_secs: default_block_duration(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

/// Bot detection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BotDetectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Extra suspicious user-agent patterns, merged with the built-ins
    #[serde(default)]
    pub suspicious_patterns: Vec<String>,
}

impl Default for BotDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            suspicious_patterns: Vec::new(),
        }
    }
}

/// Balancer registration configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BalancerConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_registration_interval")]
    pub registration_interval_secs: u64,

    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            enabled: false,
            registration_interval_secs: default_registration_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

// Default value functions
fn default_min_port() -> u16 { DEFAULT_MIN_PORT }
fn default_max_port() -> u16 { DEFAULT_MAX_PORT }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_startup_timeout() -> u64 { 30 }
fn default_init_timeout() -> u64 { 10 }
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_pool_size() -> u32 { 16 }
fn default_dial_timeout() -> u64 { 5000 }
fn default_io_timeout() -> u64 { 3000 }
fn default_redis_retries() -> u32 { 3 }
fn default_max_active() -> usize { DEFAULT_MAX_ACTIVE_CHALLENGES }
fn default_challenge_timeout() -> u64 { DEFAULT_CHALLENGE_TIMEOUT_SECS }
fn default_cleanup_interval() -> u64 { DEFAULT_CLEANUP_INTERVAL_SECS }
fn default_pool_capacity() -> usize { 1000 }
fn default_pool_complexity() -> i32 { 50 }
fn default_dd_min_objects() -> usize { 3 }
fn default_dd_max_objects() -> usize { 8 }
fn default_click_min() -> usize { 2 }
fn default_click_max() -> usize { 5 }
fn default_click_radius() -> i32 { 20 }
fn default_swipe_min() -> usize { 1 }
fn default_swipe_max() -> usize { 3 }
fn default_swipe_threshold() -> u32 { 50 }
fn default_canvas_width() -> i32 { 400 }
fn default_canvas_height() -> i32 { 300 }
fn default_rpm() -> u32 { DEFAULT_REQUESTS_PER_MINUTE }
fn default_burst() -> u32 { 10 }
fn default_true() -> bool { true }
fn default_max_failures() -> u32 { DEFAULT_MAX_FAILED_ATTEMPTS }
fn default_block_duration() -> u64 { DEFAULT_BLOCK_DURATION_SECS }
fn default_registration_interval() -> u64 { 1 }
fn default_heartbeat_timeout() -> u64 { 5 }
fn default_max_retry_attempts() -> u32 { 10 }
fn default_retry_delay() -> u64 { 5 }

/// CLI flags that override file and environment configuration
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub redis_url: Option<String>,
    pub balancer_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from file, with environment and CLI overrides
    pub fn load(config_path: &str, args: &CliOverrides) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides()?;

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.redis.url = redis_url.clone();
        }
        if let Some(ref balancer_url) = args.balancer_url {
            config.balancer.url = balancer_url.clone();
            config.balancer.enabled = true;
        }

        config.validate()?;

        Ok(config)
    }

    /// Named environment variables override file values
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("MIN_PORT") {
            self.server.min_port = v.parse().context("MIN_PORT must be a port number")?;
        }
        if let Ok(v) = std::env::var("MAX_PORT") {
            self.server.max_port = v.parse().context("MAX_PORT must be a port number")?;
        }
        if let Ok(v) = std::env::var("METRICS_PORT") {
            self.server.metrics_port = v.parse().context("METRICS_PORT must be a port number")?;
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.redis.url = v;
        }
        if let Ok(v) = std::env::var("BALANCER_URL") {
            self.balancer.url = v;
            self.balancer.enabled = true;
        }
        Ok(())
    }

    /// Reject configurations the service cannot run with
    fn validate(&self) -> Result<()> {
        if self.server.min_port == 0 || self.server.max_port == 0 {
            bail!(
                "invalid port range: min={}, max={}",
                self.server.min_port,
                self.server.max_port
            );
        }
        if self.server.min_port >= self.server.max_port {
            bail!(
                "min port must be less than max port: min={}, max={}",
                self.server.min_port,
                self.server.max_port
            );
        }
        if self.captcha.max_active_challenges == 0 {
            bail!("max active challenges must be positive");
        }
        if self.captcha.challenge_timeout_secs == 0 {
            bail!("challenge timeout must be positive");
        }
        if self.security.rate_limit.requests_per_minute == 0 {
            bail!("requests per minute must be positive");
        }
        if self.captcha.click.min_clicks > self.captcha.click.max_clicks {
            bail!("click: min_clicks must not exceed max_clicks");
        }
        if self.captcha.drag_drop.min_objects > self.captcha.drag_drop.max_objects {
            bail!("drag_drop: min_objects must not exceed max_objects");
        }
        if self.captcha.swipe.min_swipes > self.captcha.swipe.max_swipes {
            bail!("swipe: min_swipes must not exceed max_swipes");
        }
        if self.balancer.enabled && self.balancer.url.is_empty() {
            bail!("balancer enabled but no url configured");
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.server.startup_timeout_secs)
    }

    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_secs(self.captcha.challenge_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.captcha.cleanup_interval_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            captcha: CaptchaConfig::default(),
            security: SecurityConfig::default(),
            balancer: BalancerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.server.min_port < config.server.max_port);
        assert_eq!(config.security.rate_limit.requests_per_minute, 60);
        assert_eq!(config.security.ip_blocking.max_failed_attempts, 5);
    }

    #[test]
    fn test_invalid_port_range_rejected() {
        let mut config = AppConfig::default();
        config.server.min_port = 9000;
        config.server.max_port = 8000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_balancer_requires_url() {
        let mut config = AppConfig::default();
        config.balancer.enabled = true;
        config.balancer.url = String::new();
        assert!(config.validate().is_err());
    }
}
