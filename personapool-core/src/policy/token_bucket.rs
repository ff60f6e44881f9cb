use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::persona::PooledPersona;

/// Lazy fixed-window refill: once the window has passed (or none was ever
/// started), the budget resets to max and a new window begins at `now`.
pub fn refill(
    persona: &mut PooledPersona,
    max_tokens: u32,
    window_duration: Duration,
    now: DateTime<Utc>,
) {
    let window_expired = match persona.window_end {
        Some(end) => now > end,
        None => true,
    };

    if window_expired {
        persona.remaining_tokens = max_tokens;
        persona.max_tokens = max_tokens;
        persona.window_start = Some(now);
        persona.window_end =
            Some(now + chrono::Duration::milliseconds(window_duration.as_millis() as i64));
    }
}

/// Consume one token; false when the budget for the current window is spent.
pub fn try_consume(persona: &mut PooledPersona) -> bool {
    if persona.remaining_tokens == 0 {
        return false;
    }
    persona.remaining_tokens -= 1;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona() -> PooledPersona {
        PooledPersona::new(1, "fp-1".into(), 100, 80)
    }

    #[test]
    fn test_first_refill_opens_a_window() {
        let mut p = persona();
        let now = Utc::now();
        refill(&mut p, 80, Duration::from_secs(60), now);

        assert_eq!(p.remaining_tokens, 80);
        assert_eq!(p.window_start, Some(now));
        assert_eq!(p.window_end, Some(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_refill_is_noop_within_window() {
        let mut p = persona();
        let now = Utc::now();
        refill(&mut p, 80, Duration::from_secs(60), now);
        p.remaining_tokens = 3;

        refill(&mut p, 80, Duration::from_secs(60), now + chrono::Duration::seconds(30));
        assert_eq!(p.remaining_tokens, 3);
    }

    #[test]
    fn test_refill_resets_after_window_passes() {
        let mut p = persona();
        let now = Utc::now();
        refill(&mut p, 80, Duration::from_secs(60), now);
        p.remaining_tokens = 0;

        let later = now + chrono::Duration::seconds(61);
        refill(&mut p, 80, Duration::from_secs(60), later);
        assert_eq!(p.remaining_tokens, 80);
        assert_eq!(p.window_start, Some(later));
    }

    #[test]
    fn test_consume_drains_to_zero() {
        let mut p = persona();
        let now = Utc::now();
        refill(&mut p, 2, Duration::from_secs(60), now);

        assert!(try_consume(&mut p));
        assert!(try_consume(&mut p));
        assert!(!try_consume(&mut p));
        assert_eq!(p.remaining_tokens, 0);
    }
}
