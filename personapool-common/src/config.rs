use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Secret;

/// Rate-limit cooldown escalation curve: base * multiplier^(n-1), capped.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CooldownConfig {
    #[serde(default = "_default_cooldown_base", with = "humantime_serde")]
    pub base: Duration,

    #[serde(default = "_default_cooldown_multiplier")]
    pub multiplier: f32,

    #[serde(default = "_default_cooldown_max", with = "humantime_serde")]
    pub max: Duration,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            base: _default_cooldown_base(),
            multiplier: _default_cooldown_multiplier(),
            max: _default_cooldown_max(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PoolConfig {
    #[serde(default = "_default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "_default_window_duration", with = "humantime_serde")]
    pub window_duration: Duration,

    #[serde(default = "_default_suspension_threshold")]
    pub suspension_threshold: i32,

    #[serde(default = "_default_restore_health")]
    pub restore_health: i32,

    #[serde(default = "_default_suspend_after_rate_limits")]
    pub suspend_after_rate_limits: u32,

    #[serde(default = "_default_min_suspension", with = "humantime_serde")]
    pub min_suspension: Duration,

    #[serde(default = "_default_leak_threshold", with = "humantime_serde")]
    pub leak_threshold: Duration,

    #[serde(default)]
    pub cooldown: CooldownConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_tokens: _default_max_tokens(),
            window_duration: _default_window_duration(),
            suspension_threshold: _default_suspension_threshold(),
            restore_health: _default_restore_health(),
            suspend_after_rate_limits: _default_suspend_after_rate_limits(),
            min_suspension: _default_min_suspension(),
            leak_threshold: _default_leak_threshold(),
            cooldown: <_>::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HousekeeperConfig {
    #[serde(default = "_default_true")]
    pub enabled: bool,

    #[serde(default = "_default_housekeeper_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Reconcile the durable store on every Nth housekeeper tick.
    #[serde(default = "_default_reconcile_every")]
    pub reconcile_every: u32,
}

impl Default for HousekeeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: _default_housekeeper_interval(),
            reconcile_every: _default_reconcile_every(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IssuerConfig {
    #[serde(default = "_default_issuer_url")]
    pub url: String,

    #[serde(default = "_default_renewal_buffer", with = "humantime_serde")]
    pub renewal_buffer: Duration,

    #[serde(default = "_default_issue_batch_size")]
    pub max_batch_size: usize,

    /// Pause between consecutive issuer calls within one sweep.
    #[serde(default = "_default_issue_delay", with = "humantime_serde")]
    pub delay: Duration,

    #[serde(default = "_default_issuer_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            url: _default_issuer_url(),
            renewal_buffer: _default_renewal_buffer(),
            max_batch_size: _default_issue_batch_size(),
            delay: _default_issue_delay(),
            timeout: _default_issuer_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WarmUpConfig {
    #[serde(default = "_default_lock_lease", with = "humantime_serde")]
    pub lock_lease: Duration,
}

impl Default for WarmUpConfig {
    fn default() -> Self {
        Self {
            lock_lease: _default_lock_lease(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "_default_http_listen")]
    pub listen: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: _default_http_listen(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PersonaPoolConfigStore {
    #[serde(default = "_default_database_url")]
    pub database_url: Secret<String>,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub housekeeper: HousekeeperConfig,

    #[serde(default)]
    pub issuer: IssuerConfig,

    #[serde(default)]
    pub warmup: WarmUpConfig,
}

impl Default for PersonaPoolConfigStore {
    fn default() -> Self {
        Self {
            database_url: _default_database_url(),
            http: <_>::default(),
            pool: <_>::default(),
            housekeeper: <_>::default(),
            issuer: <_>::default(),
            warmup: <_>::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersonaPoolConfig {
    pub store: PersonaPoolConfigStore,
    pub paths_relative_to: PathBuf,
}

const fn _default_true() -> bool {
    true
}

const fn _default_max_tokens() -> u32 {
    80
}

const fn _default_window_duration() -> Duration {
    Duration::from_secs(60)
}

const fn _default_suspension_threshold() -> i32 {
    30
}

const fn _default_restore_health() -> i32 {
    70
}

const fn _default_suspend_after_rate_limits() -> u32 {
    5
}

const fn _default_min_suspension() -> Duration {
    Duration::from_secs(60 * 60)
}

const fn _default_leak_threshold() -> Duration {
    Duration::from_secs(60)
}

const fn _default_cooldown_base() -> Duration {
    Duration::from_secs(30)
}

const fn _default_cooldown_multiplier() -> f32 {
    2.0
}

const fn _default_cooldown_max() -> Duration {
    Duration::from_secs(60 * 10)
}

const fn _default_housekeeper_interval() -> Duration {
    Duration::from_secs(5)
}

const fn _default_reconcile_every() -> u32 {
    3
}

#[inline]
fn _default_issuer_url() -> String {
    "http://localhost:9000/session".to_owned()
}

const fn _default_renewal_buffer() -> Duration {
    Duration::from_secs(60 * 5)
}

const fn _default_issue_batch_size() -> usize {
    10
}

const fn _default_issue_delay() -> Duration {
    Duration::from_millis(500)
}

const fn _default_issuer_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn _default_lock_lease() -> Duration {
    Duration::from_secs(300)
}

#[inline]
fn _default_database_url() -> Secret<String> {
    Secret::new("sqlite:data/db".to_owned())
}

#[inline]
fn _default_http_listen() -> SocketAddr {
    #[allow(clippy::unwrap_used)]
    "0.0.0.0:8771".to_socket_addrs().unwrap().next().unwrap()
}
