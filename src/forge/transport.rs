//! Rate limiting and retry handling shared by every remote call.
//!
//! Both pieces are synchronous: waits are real sleeps taken on the calling
//! thread through an injectable [`Clock`], so tests can observe them
//! without actually sleeping.
use log::*;
use std::{
    collections::VecDeque,
    io::{self, BufRead, Write},
    rc::Rc,
    time::{Duration, Instant},
};

use crate::{
    error::{FleetbumpError, Result},
    forge::config::{RateLimitConfig, RetryConfig},
};

/// Length of the rolling window used to count requests.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);
/// Fraction of the per-minute budget at which the limiter starts waiting.
pub const RATE_THRESHOLD: f64 = 0.9;
/// Requests closer together than this count towards the burst limit.
const BURST_SPACING: Duration = Duration::from_secs(1);

/// Source of time for the transport.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`std::thread::sleep`].
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// Asked before the retry handler commits to a long wait.
pub trait ConfirmLongWait {
    /// Returns true when the caller agrees to wait `wait` before retrying
    /// `operation`.
    fn confirm(&self, wait: Duration, operation: &str) -> bool;
}

/// Prompts on the terminal, defaulting to "no" on empty or unreadable
/// input.
pub struct TerminalConfirm;

impl ConfirmLongWait for TerminalConfirm {
    fn confirm(&self, wait: Duration, operation: &str) -> bool {
        print!(
            "Rate limited while running '{operation}'. Wait {}s and retry? [y/N] ",
            wait.as_secs()
        );
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Fixed answer, used for non-interactive runs.
pub struct AutoConfirm(pub bool);

impl ConfirmLongWait for AutoConfirm {
    fn confirm(&self, wait: Duration, operation: &str) -> bool {
        info!(
            "non-interactive: {} wait of {}s for {operation}",
            if self.0 { "accepting" } else { "declining" },
            wait.as_secs()
        );
        self.0
    }
}

/// Rolling-window request limiter with burst detection.
pub struct RateLimiter {
    requests_per_minute: u32,
    burst_limit: u32,
    min_delay: Duration,
    window: VecDeque<Instant>,
    last_request: Option<Instant>,
    burst_count: u32,
    clock: Rc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, clock: Rc<dyn Clock>) -> Self {
        let requests_per_minute = config.requests_per_minute.max(1);
        Self {
            requests_per_minute,
            burst_limit: config.burst_limit,
            min_delay: RATE_WINDOW / requests_per_minute,
            window: VecDeque::new(),
            last_request: None,
            burst_count: 0,
            clock,
        }
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Number of requests still inside the rolling window.
    pub fn requests_in_window(&self) -> usize {
        self.window.len()
    }

    fn threshold(&self) -> usize {
        ((self.requests_per_minute as f64 * RATE_THRESHOLD).floor() as usize)
            .max(1)
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.window.front() {
            if now.duration_since(*oldest) >= RATE_WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Blocks until another request may be sent, then records it.
    pub fn acquire(&mut self) {
        let now = self.clock.now();
        self.prune(now);

        if self.window.len() >= self.threshold()
            && let Some(oldest) = self.window.front()
        {
            let wait = (*oldest + RATE_WINDOW).saturating_duration_since(now);
            if !wait.is_zero() {
                warn!(
                    "approaching rate limit ({} requests in window): waiting {:.1}s",
                    self.window.len(),
                    wait.as_secs_f64()
                );
                self.clock.sleep(wait);
            }
            let now = self.clock.now();
            self.prune(now);
        }

        if let Some(last) = self.last_request {
            let now = self.clock.now();
            let elapsed = now.saturating_duration_since(last);

            if elapsed < BURST_SPACING {
                self.burst_count += 1;
            } else {
                self.burst_count = 0;
            }

            if self.burst_count > self.burst_limit {
                let cooldown = BURST_SPACING.max(self.min_delay * 2);
                debug!(
                    "burst limit reached: cooling down for {:.1}s",
                    cooldown.as_secs_f64()
                );
                self.clock.sleep(cooldown);
                self.burst_count = 0;
            } else if elapsed < self.min_delay {
                self.clock.sleep(self.min_delay - elapsed);
            }
        }

        let now = self.clock.now();
        self.window.push_back(now);
        self.last_request = Some(now);
    }
}

/// Failure of a single attempt, before retry classification.
#[derive(Debug)]
pub enum TransportFault {
    /// The server answered with a non-success status.
    Status {
        status: u16,
        retry_after: Option<Duration>,
        message: String,
    },
    /// The request never got a response.
    Network(String),
    /// Anything that retrying cannot fix.
    Fatal(FleetbumpError),
}

impl TransportFault {
    fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { status: 429, .. })
    }

    fn into_error(self) -> FleetbumpError {
        match self {
            Self::Status {
                status: 401 | 403,
                message,
                ..
            } => FleetbumpError::Authentication(message),
            Self::Status {
                status: 429,
                message,
                ..
            } => FleetbumpError::RateLimitExhausted(message),
            Self::Status {
                status, message, ..
            } => FleetbumpError::http(status, message),
            Self::Network(message) => FleetbumpError::Network(message),
            Self::Fatal(err) => err,
        }
    }
}

impl From<reqwest::Error> for TransportFault {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
                retry_after: None,
                message: err.to_string(),
            },
            None if err.is_builder() => Self::Fatal(err.into()),
            None => Self::Network(err.to_string()),
        }
    }
}

/// Exponential backoff with 429 awareness and a confirmation gate for
/// long waits.
pub struct RetryHandler {
    config: RetryConfig,
    clock: Rc<dyn Clock>,
    confirm: Rc<dyn ConfirmLongWait>,
}

impl RetryHandler {
    pub fn new(
        config: RetryConfig,
        clock: Rc<dyn Clock>,
        confirm: Rc<dyn ConfirmLongWait>,
    ) -> Self {
        Self {
            config,
            clock,
            confirm,
        }
    }

    /// Delay before retry number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable fault, or
    /// the retry budget is spent.
    pub fn execute<T>(
        &self,
        operation: &str,
        mut op: impl FnMut() -> std::result::Result<T, TransportFault>,
    ) -> Result<T> {
        let mut attempt = 0;

        loop {
            let fault = match op() {
                Ok(value) => return Ok(value),
                Err(fault) => fault,
            };

            let delay = match &fault {
                TransportFault::Status {
                    status: 429,
                    retry_after,
                    ..
                } => retry_after.unwrap_or_else(|| self.backoff(attempt)),
                TransportFault::Status { status, .. } if *status >= 500 => {
                    self.backoff(attempt)
                }
                TransportFault::Network(_) => self.backoff(attempt),
                _ => return Err(fault.into_error()),
            };

            if attempt >= self.config.max_retries {
                error!(
                    "{operation}: giving up after {} retries",
                    self.config.max_retries
                );
                return Err(fault.into_error());
            }

            if delay > self.config.confirm_threshold
                && !self.confirm.confirm(delay, operation)
            {
                return Err(FleetbumpError::RateLimitExhausted(format!(
                    "{operation}: declined to wait {}s before retrying",
                    delay.as_secs()
                )));
            }

            warn!(
                "{operation}: {} (attempt {}/{}), retrying in {:.1}s",
                describe(&fault),
                attempt + 1,
                self.config.max_retries + 1,
                delay.as_secs_f64()
            );

            if fault.is_rate_limited() {
                debug!("{operation}: server requested backoff");
            }

            self.clock.sleep(delay);
            attempt += 1;
        }
    }
}

fn describe(fault: &TransportFault) -> String {
    match fault {
        TransportFault::Status {
            status, message, ..
        } => format!("status {status}: {message}"),
        TransportFault::Network(message) => format!("network error: {message}"),
        TransportFault::Fatal(err) => err.to_string(),
    }
}

/// Parses a `Retry-After` header given in seconds.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}
