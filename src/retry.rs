use anyhow::Result;
use rand::Rng;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 500;

/// Runs `f` up to `attempts` times, sleeping with exponential backoff plus
/// jitter between failures. The last error is returned unchanged so callers
/// can still downcast it.
pub fn with_retries<T>(what: &str, attempts: u32, f: impl FnMut() -> Result<T>) -> Result<T> {
    with_retries_delayed(what, attempts, Duration::from_millis(BASE_DELAY_MS), f)
}

pub fn with_retries_delayed<T>(
    what: &str,
    attempts: u32,
    base_delay: Duration,
    mut f: impl FnMut() -> Result<T>,
) -> Result<T> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        if attempt > 0 && !base_delay.is_zero() {
            let backoff = base_delay * 2u32.saturating_pow(attempt - 1);
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=250));
            std::thread::sleep(backoff + jitter);
        }
        match f() {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {:#}",
                    what,
                    attempt + 1,
                    attempts,
                    e
                );
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_succeeds_first_try() {
        let mut calls = 0;
        let result = with_retries_delayed("op", 3, Duration::ZERO, || {
            calls += 1;
            Ok::<_, anyhow::Error>(7)
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_recovers_after_transient_failures() {
        let mut calls = 0;
        let result = with_retries_delayed("op", 3, Duration::ZERO, || {
            calls += 1;
            if calls < 3 {
                Err(anyhow!("transient"))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_gives_up_after_bound_and_returns_last_error() {
        let mut calls = 0;
        let result: Result<()> = with_retries_delayed("op", 3, Duration::ZERO, || {
            calls += 1;
            Err(anyhow!("failure {}", calls))
        });
        assert_eq!(calls, 3);
        assert_eq!(result.unwrap_err().to_string(), "failure 3");
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let mut calls = 0;
        let _: Result<()> = with_retries_delayed("op", 0, Duration::ZERO, || {
            calls += 1;
            Err(anyhow!("nope"))
        });
        assert_eq!(calls, 1);
    }
}
