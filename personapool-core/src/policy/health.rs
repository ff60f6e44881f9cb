use personapool_common::RequestOutcome;

pub const MIN_HEALTH: i32 = 0;
pub const MAX_HEALTH: i32 = 100;

pub const SUCCESS_REWARD: i32 = 5;
pub const SERVER_ERROR_PENALTY: i32 = 10;
pub const GENERIC_FAILURE_PENALTY: i32 = 5;

/// Health delta for one request outcome. A 429 never touches health
/// directly; it is handled by the cooldown ladder instead.
pub fn delta_for(outcome: &RequestOutcome) -> i32 {
    if outcome.success {
        return SUCCESS_REWARD;
    }
    if outcome.is_rate_limited() {
        return 0;
    }
    if outcome.http_status >= 500 {
        -SERVER_ERROR_PENALTY
    } else {
        -GENERIC_FAILURE_PENALTY
    }
}

pub fn apply_delta(health: i32, delta: i32) -> i32 {
    (health + delta).clamp(MIN_HEALTH, MAX_HEALTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rewards_five() {
        assert_eq!(delta_for(&RequestOutcome::success(200)), 5);
    }

    #[test]
    fn test_server_error_costs_ten() {
        assert_eq!(delta_for(&RequestOutcome::failure(503)), -10);
    }

    #[test]
    fn test_client_error_costs_five() {
        assert_eq!(delta_for(&RequestOutcome::failure(403)), -5);
    }

    #[test]
    fn test_rate_limit_does_not_touch_health() {
        assert_eq!(delta_for(&RequestOutcome::failure(429)), 0);
    }

    #[test]
    fn test_forced_return_status_zero_costs_five() {
        assert_eq!(delta_for(&RequestOutcome::failure(0)), -5);
    }

    #[test]
    fn test_clamped_to_bounds() {
        assert_eq!(apply_delta(98, 5), 100);
        assert_eq!(apply_delta(3, -10), 0);
        assert_eq!(apply_delta(50, -5), 45);
    }
}
