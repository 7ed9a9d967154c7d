//! Token validity against the wall clock.

use chrono::Utc;

use crate::models::TokenPair;

/// Current time in epoch seconds.
pub fn now_epoch_secs() -> i64 {
    Utc::now().timestamp()
}

/// True while the current time is strictly before `tokens.expires_at`.
pub fn is_valid(tokens: &TokenPair) -> bool {
    is_valid_at(tokens, now_epoch_secs())
}

pub fn is_valid_at(tokens: &TokenPair, now: i64) -> bool {
    now < tokens.expires_at
}

/// Seconds left before expiry, zero once expired (for display)
pub fn seconds_remaining(tokens: &TokenPair) -> i64 {
    (tokens.expires_at - now_epoch_secs()).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(expires_at: i64) -> TokenPair {
        TokenPair {
            access_token: "a".into(),
            id_token: "i".into(),
            refresh_token: None,
            expires_at,
        }
    }

    #[test]
    fn test_expiry_boundary() {
        assert!(is_valid_at(&pair(101), 100));
        assert!(!is_valid_at(&pair(100), 100));
        assert!(!is_valid_at(&pair(99), 100));
    }

    #[test]
    fn test_against_wall_clock() {
        let now = now_epoch_secs();
        assert!(is_valid(&pair(now + 3600)));
        assert!(!is_valid(&pair(now - 1)));
        assert!(!is_valid(&pair(i64::MIN)));
    }

    #[test]
    fn test_seconds_remaining_never_negative() {
        assert_eq!(seconds_remaining(&pair(0)), 0);
        assert!(seconds_remaining(&pair(now_epoch_secs() + 600)) > 590);
    }
}
