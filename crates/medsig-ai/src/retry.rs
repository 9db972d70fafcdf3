use std::time::Duration;

/// Default attempt budget for a translation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// How long to keep re-asking the model for a usable translation.
///
/// `max_attempts: None` retries until the output parses; only
/// [`RetryPolicy::unbounded`] builds that. `timeout` bounds the whole
/// translation, retries included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bounded(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// At most `attempts` calls (at least one).
    pub fn bounded(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts.max(1)),
            timeout: None,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether another call may follow `attempts` failed ones.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_five_attempts() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, Some(5));
        assert!(p.timeout.is_none());
        assert!(p.allows_retry(4));
        assert!(!p.allows_retry(5));
    }

    #[test]
    fn zero_means_one_attempt() {
        let p = RetryPolicy::bounded(0);
        assert!(!p.allows_retry(1));
    }

    #[test]
    fn unbounded_always_retries() {
        let p = RetryPolicy::unbounded().with_timeout(Duration::from_secs(30));
        assert!(p.allows_retry(10_000));
        assert_eq!(p.timeout, Some(Duration::from_secs(30)));
    }
}
