//! Parsed CSV input rows.

use serde::{Deserialize, Serialize};
use statsink_core::{AppError, AppResult};

/// Validated statistics-subject identifier: `U` followed by five digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatsUserId(String);

impl StatsUserId {
    /// Creates a validated user identifier.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let mut chars = value.chars();

        let well_formed = chars.next() == Some('U')
            && value.len() == 6
            && chars.all(|ch| ch.is_ascii_digit());

        if !well_formed {
            return Err(AppError::Validation(format!(
                "user id must match 'U' followed by five digits, got '{value}'"
            )));
        }

        Ok(Self(value))
    }

    /// Returns the underlying user id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<StatsUserId> for String {
    fn from(value: StatsUserId) -> Self {
        value.0
    }
}

impl std::fmt::Display for StatsUserId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// One parsed input tuple carrying the new authoritative totals for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRow {
    /// Subject user identifier.
    pub user_id: StatsUserId,
    /// New authoritative login total.
    pub login_count: u64,
    /// New authoritative post total.
    pub post_count: u64,
}

impl StatsRow {
    /// Parses one row from raw CSV cell values.
    ///
    /// Counters must be base-10 non-negative integers; signs, blanks, and
    /// fractions are rejected.
    pub fn parse(user_id: &str, login_count: &str, post_count: &str) -> AppResult<Self> {
        let user_id = StatsUserId::new(user_id.trim())?;
        let login_count = parse_counter("login_count", login_count)?;
        let post_count = parse_counter("post_count", post_count)?;

        Ok(Self {
            user_id,
            login_count,
            post_count,
        })
    }
}

fn parse_counter(column: &str, value: &str) -> AppResult<u64> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        return Err(AppError::Validation(format!(
            "{column} must not be empty"
        )));
    }

    if !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(AppError::Validation(format!(
            "{column} must be a non-negative integer, got '{trimmed}'"
        )));
    }

    trimmed.parse::<u64>().map_err(|error| {
        AppError::Validation(format!("{column} value '{trimmed}' is out of range: {error}"))
    })
}

/// One validated row together with its zero-based data-row index in the
/// source file. The index is the idempotence key component for audit
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedRow {
    /// Zero-based index among the file's data rows.
    pub index: u64,
    /// The parsed row.
    pub row: StatsRow,
}

#[cfg(test)]
mod tests {
    use statsink_core::AppResult;

    use super::{StatsRow, StatsUserId};

    #[test]
    fn accepts_well_formed_user_ids() -> AppResult<()> {
        let user_id = StatsUserId::new("U00001")?;
        assert_eq!(user_id.as_str(), "U00001");
        Ok(())
    }

    #[test]
    fn rejects_malformed_user_ids() {
        for value in ["u00001", "U0001", "U000001", "U0000a", "X00001", ""] {
            assert!(StatsUserId::new(value).is_err(), "accepted '{value}'");
        }
    }

    #[test]
    fn parses_rows_with_surrounding_whitespace() -> AppResult<()> {
        let row = StatsRow::parse(" U00002 ", " 3", "7 ")?;
        assert_eq!(row.user_id.as_str(), "U00002");
        assert_eq!(row.login_count, 3);
        assert_eq!(row.post_count, 7);
        Ok(())
    }

    #[test]
    fn rejects_non_integer_counters() {
        assert!(StatsRow::parse("U00001", "-1", "2").is_err());
        assert!(StatsRow::parse("U00001", "1.5", "2").is_err());
        assert!(StatsRow::parse("U00001", "", "2").is_err());
        assert!(StatsRow::parse("U00001", "three", "2").is_err());
        assert!(StatsRow::parse("U00001", "+3", "2").is_err());
    }

    mod user_id_laws {
        use proptest::prelude::*;

        use super::StatsUserId;

        proptest! {
            #[test]
            fn five_digit_ids_always_parse(digits in 0u32..=99_999) {
                let value = format!("U{digits:05}");
                prop_assert!(StatsUserId::new(value).is_ok());
            }
        }
    }
}
