//! # Request Rate Limiting
//!
//! Ceilings are declared as short strings (`"10 per hour"`, `"200 per day"`)
//! and enforced per client address with fixed windows: a client's window
//! opens on its first request, admits at most N requests, and resets once the
//! period has elapsed. The N+1st request inside a window is always rejected.
//!
//! Each route owns a [`RouteLimiter`]; the HTTP side lives in
//! `middleware::rate_limit`. All counters are in process memory and reset on
//! restart.

use crate::config::{parse_limits, RateLimitConfig};
use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    fn seconds(self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 60 * 60,
            TimeUnit::Day => 24 * 60 * 60,
        }
    }

    fn name(self) -> &'static str {
        match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
        }
    }

    fn parse(word: &str) -> Option<Self> {
        match word.trim_end_matches('s') {
            "second" | "sec" => Some(TimeUnit::Second),
            "minute" | "min" => Some(TimeUnit::Minute),
            "hour" => Some(TimeUnit::Hour),
            "day" => Some(TimeUnit::Day),
            _ => None,
        }
    }
}

/// One ceiling: `count` requests per `multiplier` x `unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitItem {
    pub count: NonZeroU32,
    pub multiplier: u32,
    pub unit: TimeUnit,
}

impl RateLimitItem {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.unit.seconds() * u64::from(self.multiplier))
    }
}

/// Renders as `"10 per 1 hour"`; this string is what rejected clients see.
impl fmt::Display for RateLimitItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {} {}", self.count, self.multiplier, self.unit.name())
    }
}

/// Accepts `"10 per hour"`, `"5 per 30 seconds"`, `"100/minute"`, `"2/3 days"`.
impl FromStr for RateLimitItem {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let (count, period) = normalized
            .split_once('/')
            .or_else(|| normalized.split_once(" per "))
            .ok_or_else(|| anyhow!("expected '<count> per <period>', got '{raw}'"))?;

        let count: u32 = count
            .trim()
            .parse()
            .with_context(|| format!("invalid request count in '{raw}'"))?;
        let count = NonZeroU32::new(count)
            .ok_or_else(|| anyhow!("request count must be positive in '{raw}'"))?;

        let mut words = period.split_whitespace();
        let first = words
            .next()
            .ok_or_else(|| anyhow!("missing time unit in '{raw}'"))?;
        let (multiplier, unit_word) = match first.parse::<u32>() {
            Ok(n) => (
                n,
                words
                    .next()
                    .ok_or_else(|| anyhow!("missing time unit in '{raw}'"))?,
            ),
            Err(_) => (1, first),
        };
        if words.next().is_some() {
            return Err(anyhow!("unexpected trailing text in '{raw}'"));
        }
        if multiplier == 0 {
            return Err(anyhow!("period multiplier must be positive in '{raw}'"));
        }

        let unit = TimeUnit::parse(unit_word)
            .ok_or_else(|| anyhow!("unknown time unit '{unit_word}'"))?;

        Ok(Self {
            count,
            multiplier,
            unit,
        })
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone)]
pub struct RateLimitExceeded {
    pub limit: RateLimitItem,
    pub retry_after: Duration,
}

/// One client's current window for one ceiling.
#[derive(Debug, Clone, Copy)]
struct Window {
    opened: Instant,
    hits: u32,
}

impl Window {
    fn expired(&self, period: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.opened) >= period
    }
}

/// The ceilings guarding a single route.
///
/// Each client maps to one window per ceiling. All of a client's windows are
/// checked and counted under the same map entry, so a request rejected by one
/// ceiling is not charged against the others.
pub struct RouteLimiter {
    route: &'static str,
    items: Vec<RateLimitItem>,
    clients: DashMap<String, Vec<Window>>,
}

impl RouteLimiter {
    pub fn new(route: &'static str, items: &[RateLimitItem]) -> Self {
        Self {
            route,
            items: items.to_vec(),
            clients: DashMap::new(),
        }
    }

    /// A limiter that admits everything.
    pub fn unlimited(route: &'static str) -> Self {
        Self::new(route, &[])
    }

    pub fn route(&self) -> &'static str {
        self.route
    }

    /// Count one request from `client` against every ceiling.
    pub fn check(&self, client: &str) -> Result<(), RateLimitExceeded> {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> Result<(), RateLimitExceeded> {
        if self.items.is_empty() {
            return Ok(());
        }

        let fresh = Window { opened: now, hits: 0 };
        let mut windows = self
            .clients
            .entry(client.to_string())
            .or_insert_with(|| vec![fresh; self.items.len()]);

        for (window, item) in windows.iter_mut().zip(&self.items) {
            if window.expired(item.period(), now) {
                *window = fresh;
            }
        }

        if let Some((window, item)) = windows
            .iter()
            .zip(&self.items)
            .find(|(window, item)| window.hits >= item.count.get())
        {
            let reopens = window.opened + item.period();
            return Err(RateLimitExceeded {
                limit: *item,
                retry_after: reopens.saturating_duration_since(now),
            });
        }

        for window in windows.iter_mut() {
            window.hits += 1;
        }
        Ok(())
    }

    fn retain_recent_at(&self, now: Instant) {
        self.clients.retain(|_, windows| {
            windows
                .iter()
                .zip(&self.items)
                .any(|(window, item)| !window.expired(item.period(), now))
        });
    }

    fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

/// Every route's limiter, built once at startup and shared by all workers.
#[derive(Clone)]
pub struct RateLimits {
    pub default: Arc<RouteLimiter>,
    pub upload: Arc<RouteLimiter>,
    pub list_levels: Arc<RouteLimiter>,
    pub fetch_audio: Arc<RouteLimiter>,
    pub delete_level: Arc<RouteLimiter>,
}

impl RateLimits {
    pub fn from_config(config: &RateLimitConfig) -> Result<Self> {
        let build = |route: &'static str, limits: &[String]| -> Result<Arc<RouteLimiter>> {
            if !config.enabled {
                return Ok(Arc::new(RouteLimiter::unlimited(route)));
            }
            let items = parse_limits(limits)
                .with_context(|| format!("invalid rate limit for {route}"))?;
            Ok(Arc::new(RouteLimiter::new(route, &items)))
        };

        Ok(Self {
            default: build("default", &config.default_limits)?,
            upload: build("upload", &config.upload)?,
            list_levels: build("list_levels", &config.list_levels)?,
            fetch_audio: build("fetch_audio", &config.fetch_audio)?,
            delete_level: build("delete_level", &config.delete_level)?,
        })
    }

    fn all(&self) -> [&RouteLimiter; 5] {
        [
            self.default.as_ref(),
            self.upload.as_ref(),
            self.list_levels.as_ref(),
            self.fetch_audio.as_ref(),
            self.delete_level.as_ref(),
        ]
    }

    /// Forget clients whose windows have all expired.
    pub fn retain_recent(&self) {
        let now = Instant::now();
        for limiter in self.all() {
            limiter.retain_recent_at(now);
        }
        debug!(tracked_clients = self.tracked_clients(), "Pruned idle rate limit entries");
    }

    pub fn tracked_clients(&self) -> usize {
        self.all().iter().map(|l| l.tracked_clients()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(raw: &str) -> RateLimitItem {
        raw.parse().unwrap()
    }

    #[test]
    fn test_parse_common_forms() {
        let ten_per_hour = item("10 per hour");
        assert_eq!(ten_per_hour.count.get(), 10);
        assert_eq!(ten_per_hour.period(), Duration::from_secs(3600));

        assert_eq!(item("200 per day").period(), Duration::from_secs(86_400));
        assert_eq!(item("100/minute").period(), Duration::from_secs(60));
        assert_eq!(item("5 per 30 seconds").period(), Duration::from_secs(30));
        assert_eq!(item(" 2 PER 3 Days ").period(), Duration::from_secs(3 * 86_400));
    }

    #[test]
    fn test_parse_rejects_nonsense() {
        for raw in [
            "",
            "ten per hour",
            "0 per hour",
            "10 per 0 hours",
            "10 per fortnight",
            "10 per",
            "10 per hour please",
        ] {
            assert!(raw.parse::<RateLimitItem>().is_err(), "{raw} should not parse");
        }
    }

    #[test]
    fn test_display_matches_client_message() {
        assert_eq!(item("10 per hour").to_string(), "10 per 1 hour");
        assert_eq!(item("5/30 seconds").to_string(), "5 per 30 second");
    }

    #[test]
    fn test_eleventh_request_in_an_hour_is_rejected() {
        let limiter = RouteLimiter::new("upload", &[item("10 per hour")]);

        for _ in 0..10 {
            assert!(limiter.check("10.0.0.1").is_ok());
        }
        let rejected = limiter.check("10.0.0.1").unwrap_err();
        assert_eq!(rejected.limit.to_string(), "10 per 1 hour");
        assert!(rejected.retry_after > Duration::from_secs(3590));
        assert!(rejected.retry_after <= Duration::from_secs(3600));

        // Another address has its own budget.
        assert!(limiter.check("10.0.0.2").is_ok());
    }

    #[test]
    fn test_window_does_not_refill_before_period_ends() {
        let limiter = RouteLimiter::new("upload", &[item("4 per 2 seconds")]);
        let start = Instant::now();

        for _ in 0..4 {
            assert!(limiter.check_at("client", start).is_ok());
        }
        for elapsed_ms in [600, 1200, 1999] {
            let at = start + Duration::from_millis(elapsed_ms);
            let rejected = limiter.check_at("client", at).unwrap_err();
            assert_eq!(
                rejected.retry_after,
                Duration::from_millis(2000 - elapsed_ms),
                "request at +{elapsed_ms}ms"
            );
        }
    }

    #[test]
    fn test_window_resets_after_period() {
        let limiter = RouteLimiter::new("upload", &[item("2 per 1 second")]);
        let start = Instant::now();

        assert!(limiter.check_at("client", start).is_ok());
        assert!(limiter.check_at("client", start + Duration::from_millis(500)).is_ok());
        assert!(limiter.check_at("client", start + Duration::from_millis(900)).is_err());

        // The new window opens with the first request after expiry.
        let reopened = start + Duration::from_millis(1000);
        assert!(limiter.check_at("client", reopened).is_ok());
        assert!(limiter.check_at("client", reopened + Duration::from_millis(10)).is_ok());
        assert!(limiter.check_at("client", reopened + Duration::from_millis(20)).is_err());
    }

    #[test]
    fn test_rejection_does_not_charge_other_ceilings() {
        let limiter = RouteLimiter::new("default", &[item("3 per day"), item("1 per second")]);
        let start = Instant::now();

        assert!(limiter.check_at("client", start).is_ok());
        // Rejected by the per-second ceiling; the daily count stays at one.
        for _ in 0..5 {
            assert!(limiter.check_at("client", start).is_err());
        }
        assert!(limiter.check_at("client", start + Duration::from_secs(1)).is_ok());
        assert!(limiter.check_at("client", start + Duration::from_secs(2)).is_ok());

        let rejected = limiter.check_at("client", start + Duration::from_secs(3)).unwrap_err();
        assert_eq!(rejected.limit, item("3 per day"));
    }

    #[test]
    fn test_retain_recent_drops_expired_clients() {
        let limiter = RouteLimiter::new("upload", &[item("5 per minute")]);
        let start = Instant::now();

        assert!(limiter.check_at("old", start).is_ok());
        assert!(limiter.check_at("new", start + Duration::from_secs(50)).is_ok());
        assert_eq!(limiter.tracked_clients(), 2);

        limiter.retain_recent_at(start + Duration::from_secs(61));
        assert_eq!(limiter.tracked_clients(), 1);
        assert!(limiter.clients.contains_key("new"));
    }

    #[test]
    fn test_tightest_ceiling_wins() {
        let limiter = RouteLimiter::new("default", &[item("200 per day"), item("3 per hour")]);

        for _ in 0..3 {
            assert!(limiter.check("client").is_ok());
        }
        let rejected = limiter.check("client").unwrap_err();
        assert_eq!(rejected.limit, item("3 per hour"));
    }

    #[test]
    fn test_disabled_config_is_unlimited() {
        let config = RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        };
        let limits = RateLimits::from_config(&config).unwrap();
        for _ in 0..100 {
            assert!(limits.upload.check("client").is_ok());
        }
        assert_eq!(limits.tracked_clients(), 0);
    }

    #[test]
    fn test_from_config_uses_route_ceilings() {
        let limits = RateLimits::from_config(&RateLimitConfig::default()).unwrap();
        assert_eq!(limits.delete_level.route(), "delete_level");

        for _ in 0..20 {
            assert!(limits.delete_level.check("client").is_ok());
        }
        assert!(limits.delete_level.check("client").is_err());
        // Counters are per route.
        assert!(limits.upload.check("client").is_ok());

        limits.retain_recent();
        assert!(limits.tracked_clients() >= 1);
    }
}
