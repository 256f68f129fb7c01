//! Transaction isolation levels.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Read uncommitted (dirty reads allowed).
    ReadUncommitted,
    /// Read committed.
    #[default]
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable (highest isolation).
    Serializable,
    /// Snapshot isolation, where the backend supports it.
    Snapshot,
}

impl IsolationLevel {
    /// Get the SQL statement to set this isolation level.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED",
            Self::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            Self::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            Self::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
            Self::Snapshot => "SET TRANSACTION ISOLATION LEVEL SNAPSHOT",
        }
    }

    /// Canonical upper-case name, as accepted by [`FromStr`].
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ_UNCOMMITTED",
            Self::ReadCommitted => "READ_COMMITTED",
            Self::RepeatableRead => "REPEATABLE_READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IsolationLevel {
    type Err = Error;

    /// Accepts `READ_COMMITTED`, `read committed`, `read-committed` and the
    /// like, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();

        match normalized.as_str() {
            "READ_UNCOMMITTED" => Ok(Self::ReadUncommitted),
            "READ_COMMITTED" => Ok(Self::ReadCommitted),
            "REPEATABLE_READ" => Ok(Self::RepeatableRead),
            "SERIALIZABLE" => Ok(Self::Serializable),
            "SNAPSHOT" => Ok(Self::Snapshot),
            _ => Err(Error::InvalidIsolationLevel(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        assert_eq!(
            "read committed".parse::<IsolationLevel>().ok(),
            Some(IsolationLevel::ReadCommitted)
        );
        assert_eq!(
            "REPEATABLE-READ".parse::<IsolationLevel>().ok(),
            Some(IsolationLevel::RepeatableRead)
        );
        assert_eq!(
            "Serializable".parse::<IsolationLevel>().ok(),
            Some(IsolationLevel::Serializable)
        );
        assert!("chaos".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn test_name_round_trips_through_parse() {
        for level in [
            IsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable,
            IsolationLevel::Snapshot,
        ] {
            assert_eq!(level.name().parse::<IsolationLevel>().ok(), Some(level));
        }
    }

    #[test]
    fn test_default_is_read_committed() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert!(IsolationLevel::default().as_sql().ends_with("READ COMMITTED"));
    }
}
