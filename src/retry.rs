use std::time::Duration;

use anyhow::Result;
use log::debug;
use rand::Rng;

/// Executes an operation with retry logic.
/// Retries up to max_attempts times with a fixed delay between attempts.
/// Returns the result of the first successful operation, or the last error.
pub fn retry_with_backoff<T, F>(mut operation: F, max_attempts: u32, delay: Duration) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    for attempt in 0..max_attempts {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt == max_attempts - 1 {
                    return Err(e);
                }
                debug!(
                    "[retry] Operation failed (attempt {}), retrying in {}ms: {}",
                    attempt + 1,
                    delay.as_millis(),
                    e
                );
                std::thread::sleep(delay);
            }
        }
    }
    unreachable!()
}

/// Bounded exponential backoff with jitter for status polling.
///
/// Each call to `next_delay` doubles the interval up to `max`, then adds up to
/// 25% random jitter so concurrent pollers do not hammer the server in
/// lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        with_jitter(delay)
    }
}

fn with_jitter(delay: Duration) -> Duration {
    let jitter_budget = delay.as_millis() as u64 / 4;
    if jitter_budget == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=jitter_budget);
    delay + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn retry_succeeds_immediately() {
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();
        let result = retry_with_backoff(
            move || {
                *calls_clone.lock().unwrap() += 1;
                Ok(42)
            },
            3,
            Duration::from_millis(1),
        );
        assert_eq!(result.unwrap(), 42);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn retry_retries_until_success() {
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();
        let result = retry_with_backoff(
            move || {
                let mut count = calls_clone.lock().unwrap();
                *count += 1;
                if *count >= 3 {
                    Ok(*count)
                } else {
                    Err(anyhow::anyhow!("not yet"))
                }
            },
            5,
            Duration::from_millis(1),
        );
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn retry_surfaces_the_last_error() {
        let result: Result<()> = retry_with_backoff(
            || Err(anyhow::anyhow!("always fails")),
            3,
            Duration::from_millis(1),
        );
        assert!(result.unwrap_err().to_string().contains("always fails"));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        let first = backoff.next_delay();
        let second = backoff.next_delay();
        let third = backoff.next_delay();
        let fourth = backoff.next_delay();
        // Jitter adds at most 25% on top of the undelayed schedule.
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(250));
        assert!(third >= Duration::from_millis(350) && third <= Duration::from_millis(438));
        assert!(fourth >= Duration::from_millis(350) && fourth <= Duration::from_millis(438));
    }

    #[test]
    fn backoff_reset_returns_to_base() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        backoff.reset();
        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(125));
    }
}
