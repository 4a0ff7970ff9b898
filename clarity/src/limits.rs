//! Resource limiting for protecting system capacity.
//!
//! - [`RateLimiter`]: per-client sliding window with a temporary block once the limit is exceeded
//! - [`UsageQuota`]: per-user transformation allowance over a long fixed window
//! - [`ConversionLimiter`]: bounds concurrent LibreOffice runs and the queue waiting for them

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::config::{ConversionConfig, LimitsConfig, QuotaConfig, RateLimitConfig};
use crate::errors::{Error, Result};

/// Container for all resource limiters.
#[derive(Clone)]
pub struct Limiters {
    /// Per-client request rate. None when rate limiting is disabled.
    pub rate: Option<Arc<RateLimiter>>,
    /// Per-user transformation quota. None when quotas are disabled.
    pub quota: Option<Arc<UsageQuota>>,
    /// Concurrency control for document conversions
    pub conversions: Arc<ConversionLimiter>,
}

impl Limiters {
    /// Creates all limiters from configuration.
    pub fn new(limits: &LimitsConfig, conversion: &ConversionConfig) -> Self {
        Self {
            rate: limits.rate.enabled.then(|| Arc::new(RateLimiter::new(&limits.rate))),
            quota: limits.quota.enabled.then(|| Arc::new(UsageQuota::new(&limits.quota))),
            conversions: Arc::new(ConversionLimiter::new(conversion)),
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        /// Requests left in the current window
        remaining: usize,
        /// Time until the oldest counted request leaves the window
        reset_after: Duration,
    },
    Blocked {
        retry_after: Duration,
    },
}

#[derive(Debug, Default)]
struct ClientWindow {
    hits: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

#[derive(Debug)]
struct HourlyCounter {
    started: Instant,
    count: u64,
}

/// Snapshot served by the metrics endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct RateLimitMetrics {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub unique_ips: usize,
    pub current_hour_requests: u64,
    pub blocked_ips_count: usize,
}

/// Sliding-window limiter keyed by client address.
///
/// A client that sends more than `max_requests` within `window` is refused for
/// `block_duration`, regardless of how its window drains in the meantime.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    block_duration: Duration,
    clients: DashMap<String, ClientWindow>,
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
    hourly: Mutex<HourlyCounter>,
}

impl RateLimiter {
    const HOUR: Duration = Duration::from_secs(60 * 60);

    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: config.window,
            block_duration: config.block_duration,
            clients: DashMap::new(),
            total_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
            hourly: Mutex::new(HourlyCounter {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Count a request from `client` and decide whether it may proceed.
    pub fn check(&self, client: &str) -> RateDecision {
        let now = Instant::now();
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.count_hourly(now);

        let mut entry = self.clients.entry(client.to_string()).or_default();
        let state = entry.value_mut();

        if let Some(until) = state.blocked_until {
            if until > now {
                self.blocked_requests.fetch_add(1, Ordering::Relaxed);
                return RateDecision::Blocked {
                    retry_after: until - now,
                };
            }
            state.blocked_until = None;
            state.hits.clear();
        }

        while state.hits.front().is_some_and(|hit| now.duration_since(*hit) >= self.window) {
            state.hits.pop_front();
        }

        if state.hits.len() >= self.max_requests {
            state.blocked_until = Some(now + self.block_duration);
            self.blocked_requests.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(client = %client, block_secs = self.block_duration.as_secs(), "Rate limit exceeded, blocking client");
            return RateDecision::Blocked {
                retry_after: self.block_duration,
            };
        }

        state.hits.push_back(now);
        let oldest = state.hits.front().copied().unwrap_or(now);
        RateDecision::Allowed {
            remaining: self.max_requests - state.hits.len(),
            reset_after: self.window.saturating_sub(now.duration_since(oldest)),
        }
    }

    fn count_hourly(&self, now: Instant) {
        let mut hourly = match self.hourly.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if now.duration_since(hourly.started) >= Self::HOUR {
            hourly.started = now;
            hourly.count = 0;
        }
        hourly.count += 1;
    }

    pub fn metrics(&self) -> RateLimitMetrics {
        let now = Instant::now();
        let current_hour_requests = match self.hourly.lock() {
            Ok(hourly) if now.duration_since(hourly.started) < Self::HOUR => hourly.count,
            Ok(_) => 0,
            Err(poisoned) => poisoned.into_inner().count,
        };

        RateLimitMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            unique_ips: self.clients.len(),
            current_hour_requests,
            blocked_ips_count: self
                .clients
                .iter()
                .filter(|entry| entry.blocked_until.is_some_and(|until| until > now))
                .count(),
        }
    }

    /// Forget clients with no recent requests and no active block. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.clients.len();
        self.clients.retain(|_, state| {
            let blocked = state.blocked_until.is_some_and(|until| until > now);
            let recent = state.hits.back().is_some_and(|hit| now.duration_since(*hit) < self.window);
            blocked || recent
        });
        before - self.clients.len()
    }
}

/// Remaining allowance reported with each transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub requests_remaining: u32,
    /// Seconds until the allowance resets
    pub time_until_reset: u64,
    pub reset_time: DateTime<Utc>,
}

#[derive(Debug)]
struct QuotaWindow {
    started: Instant,
    started_at: DateTime<Utc>,
    used: u32,
}

/// Fixed-window allowance per user, starting at the user's first request.
#[derive(Debug)]
pub struct UsageQuota {
    max_requests: u32,
    window: Duration,
    users: DashMap<String, QuotaWindow>,
}

impl UsageQuota {
    pub fn new(config: &QuotaConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: config.window,
            users: DashMap::new(),
        }
    }

    /// Consume one request from the user's allowance.
    pub fn consume(&self, user: &str) -> Result<QuotaStatus> {
        let now = Instant::now();
        let mut entry = self.users.entry(user.to_string()).or_insert_with(|| QuotaWindow {
            started: now,
            started_at: Utc::now(),
            used: 0,
        });
        let window = entry.value_mut();

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.started_at = Utc::now();
            window.used = 0;
        }

        let time_until_reset = self.window.saturating_sub(now.duration_since(window.started));
        let reset_time = window.started_at + chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());

        if window.used >= self.max_requests {
            return Err(Error::TooManyRequests {
                message: format!(
                    "Transformation limit of {} requests reached. Try again in {} minutes.",
                    self.max_requests,
                    time_until_reset.as_secs().div_ceil(60)
                ),
                retry_after: Some(time_until_reset.as_secs()),
            });
        }

        window.used += 1;
        Ok(QuotaStatus {
            requests_remaining: self.max_requests - window.used,
            time_until_reset: time_until_reset.as_secs(),
            reset_time,
        })
    }
}

/// Controls concurrent document conversions.
///
/// LibreOffice shares one user profile per process owner, so conversions are serialised by
/// default. Uploads reserve a queue slot up front and receive HTTP 429 when the queue is full;
/// the background job then waits for a run permit.
#[derive(Debug)]
pub struct ConversionLimiter {
    semaphore: Arc<Semaphore>,
    queued: AtomicUsize,
    /// None = unlimited queue
    max_queued: Option<usize>,
}

impl ConversionLimiter {
    pub fn new(config: &ConversionConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            queued: AtomicUsize::new(0),
            max_queued: if config.max_queued == 0 { None } else { Some(config.max_queued) },
        }
    }

    /// Reserve a place in the conversion queue.
    pub fn enqueue(self: &Arc<Self>) -> Result<QueuedConversion> {
        let current = self.queued.fetch_add(1, Ordering::SeqCst);
        if let Some(max_queued) = self.max_queued
            && current >= max_queued
        {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::TooManyRequests {
                message: "Too many documents are being converted. Please retry later.".to_string(),
                retry_after: None,
            });
        }

        Ok(QueuedConversion {
            limiter: self.clone(),
            released: false,
        })
    }

    /// Conversions waiting for or holding a permit
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

/// A reserved queue slot. Dropping it without starting frees the slot.
#[must_use]
pub struct QueuedConversion {
    limiter: Arc<ConversionLimiter>,
    released: bool,
}

impl QueuedConversion {
    /// Wait for a run permit.
    pub async fn start(mut self) -> Result<ConversionPermit> {
        let permit = self
            .limiter
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal {
                operation: "acquire conversion permit: limiter closed".to_string(),
            })?;

        self.limiter.queued.fetch_sub(1, Ordering::SeqCst);
        self.released = true;
        Ok(ConversionPermit { _permit: permit })
    }
}

impl Drop for QueuedConversion {
    fn drop(&mut self) {
        if !self.released {
            self.limiter.queued.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// RAII guard that releases the conversion slot when dropped.
#[must_use]
pub struct ConversionPermit {
    _permit: OwnedSemaphorePermit,
}
