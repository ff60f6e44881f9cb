use std::time::Duration;

use personapool_common::CooldownConfig;

/// Cooldown duration after the nth consecutive rate limit.
/// Formula: base * multiplier^(n - 1), capped at max.
pub fn graduated_backoff(consecutive_rate_limits: u32, config: &CooldownConfig) -> Duration {
    if consecutive_rate_limits <= 1 {
        return std::cmp::min(config.base, config.max);
    }

    let factor = config
        .multiplier
        .powi((consecutive_rate_limits - 1) as i32);
    let duration_secs = (config.base.as_secs_f32() * factor) as u64;

    std::cmp::min(Duration::from_secs(duration_secs), config.max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> CooldownConfig {
        CooldownConfig {
            base: Duration::from_secs(30),
            multiplier: 2.0,
            max: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_backoff_first_rate_limit() {
        let duration = graduated_backoff(1, &default_config());
        // First 429: 30s * 2^0 = 30s
        assert_eq!(duration.as_secs(), 30);
    }

    #[test]
    fn test_backoff_second_rate_limit() {
        let duration = graduated_backoff(2, &default_config());
        // Second 429: 30s * 2^1 = 60s
        assert_eq!(duration.as_secs(), 60);
    }

    #[test]
    fn test_backoff_fourth_rate_limit() {
        let duration = graduated_backoff(4, &default_config());
        // Fourth 429: 30s * 2^3 = 240s
        assert_eq!(duration.as_secs(), 240);
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let duration = graduated_backoff(10, &default_config());
        // 30s * 2^9 = 15360s, capped at 600s
        assert_eq!(duration.as_secs(), 600);
    }

    #[test]
    fn test_backoff_zero_defaults_to_base() {
        let duration = graduated_backoff(0, &default_config());
        assert_eq!(duration.as_secs(), 30);
    }

    #[test]
    fn test_backoff_with_different_multiplier() {
        let mut config = default_config();
        config.multiplier = 1.5;
        let duration = graduated_backoff(3, &config);
        // 30s * 1.5^2 = 67.5s, truncated
        assert_eq!(duration.as_secs(), 67);
    }
}
