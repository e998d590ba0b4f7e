//! Statement text the harness issues on its own behalf
//!
//! Scenario SQL is passed through verbatim. These are the few statements the
//! harness itself sends to open, close and bound transactions.

use std::time::Duration;

/// Opens a transaction block
pub const BEGIN: &str = "BEGIN";

/// Commits the open transaction block
pub const COMMIT: &str = "COMMIT";

/// Rolls back the open transaction block
pub const ROLLBACK: &str = "ROLLBACK";

/// `SET statement_timeout = ...` for a session
///
/// Whole seconds render as `'<n>s'`, anything else as `'<n>ms'` rounded up
/// to the next millisecond, and a zero duration disables the timeout. A
/// non-zero timeout never renders as 0, which PostgreSQL reads as "off".
pub fn set_statement_timeout(timeout: Duration) -> String {
    if timeout.is_zero() {
        return "SET statement_timeout = 0".to_string();
    }
    if timeout.subsec_nanos() == 0 {
        format!("SET statement_timeout = '{}s'", timeout.as_secs())
    } else {
        let millis = (timeout.as_nanos() + 999_999) / 1_000_000;
        format!("SET statement_timeout = '{}ms'", millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_timeout_in_seconds() {
        assert_eq!(
            set_statement_timeout(Duration::from_secs(5)),
            "SET statement_timeout = '5s'"
        );
    }

    #[test]
    fn statement_timeout_sub_second() {
        assert_eq!(
            set_statement_timeout(Duration::from_millis(1500)),
            "SET statement_timeout = '1500ms'"
        );
    }

    #[test]
    fn sub_millisecond_timeout_stays_enabled() {
        assert_eq!(
            set_statement_timeout(Duration::from_micros(300)),
            "SET statement_timeout = '1ms'"
        );
        assert_eq!(
            set_statement_timeout(Duration::from_nanos(1)),
            "SET statement_timeout = '1ms'"
        );
    }

    #[test]
    fn partial_milliseconds_round_up() {
        assert_eq!(
            set_statement_timeout(Duration::from_micros(1_500_200)),
            "SET statement_timeout = '1501ms'"
        );
        assert_eq!(
            set_statement_timeout(Duration::new(2, 1)),
            "SET statement_timeout = '2001ms'"
        );
    }

    #[test]
    fn zero_disables_timeout() {
        assert_eq!(
            set_statement_timeout(Duration::ZERO),
            "SET statement_timeout = 0"
        );
    }
}
