//! Identity and isolation types

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// SQL transaction isolation level
///
/// PostgreSQL treats READ UNCOMMITTED as READ COMMITTED, so it is not offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    /// Each statement sees data committed before it began
    #[default]
    ReadCommitted,
    /// Every statement sees the snapshot taken by the first one
    RepeatableRead,
    /// Repeatable read plus serializable-snapshot conflict detection
    Serializable,
}

impl IsolationLevel {
    /// All levels, weakest first
    pub const ALL: [IsolationLevel; 3] = [
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// Keyword form used in SQL
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// The `SET TRANSACTION` statement selecting this level
    pub fn set_transaction_sql(&self) -> String {
        format!("SET TRANSACTION ISOLATION LEVEL {}", self.as_sql())
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for IsolationLevel {
    type Err = HarnessError;

    /// Accepts `read-committed`, `read_committed` and `READ COMMITTED` spellings
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | '_' => ' ',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        match normalized.as_str() {
            "READ COMMITTED" => Ok(IsolationLevel::ReadCommitted),
            "REPEATABLE READ" => Ok(IsolationLevel::RepeatableRead),
            "SERIALIZABLE" => Ok(IsolationLevel::Serializable),
            _ => Err(HarnessError::config(format!(
                "unknown isolation level '{}'",
                s
            ))),
        }
    }
}

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a scripted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Allocate the next id
    pub fn next() -> Self {
        TransactionId(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Identity of one checkout from a connection pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseId(u64);

impl LeaseId {
    /// Wrap a raw id
    pub fn new(id: u64) -> Self {
        LeaseId(id)
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_transaction_sql_is_literal() {
        assert_eq!(
            IsolationLevel::ReadCommitted.set_transaction_sql(),
            "SET TRANSACTION ISOLATION LEVEL READ COMMITTED"
        );
        assert_eq!(
            IsolationLevel::RepeatableRead.set_transaction_sql(),
            "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ"
        );
        assert_eq!(
            IsolationLevel::Serializable.set_transaction_sql(),
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"
        );
    }

    #[test]
    fn parses_all_spellings() {
        for (input, expected) in [
            ("read-committed", IsolationLevel::ReadCommitted),
            ("READ COMMITTED", IsolationLevel::ReadCommitted),
            ("repeatable_read", IsolationLevel::RepeatableRead),
            (" Serializable ", IsolationLevel::Serializable),
        ] {
            assert_eq!(input.parse::<IsolationLevel>().unwrap(), expected);
        }
        assert!("snapshot".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn default_is_read_committed() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&IsolationLevel::RepeatableRead).unwrap();
        assert_eq!(json, "\"repeatable-read\"");
    }

    #[test]
    fn transaction_ids_are_unique_and_increasing() {
        let a = TransactionId::next();
        let b = TransactionId::next();
        assert!(b > a);
        assert_eq!(format!("{}", LeaseId::new(7)), "L7");
        assert!(a.to_string().starts_with('T'));
    }
}
