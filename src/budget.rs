//! Monthly budgets: the month-year key and the budget table.

use std::{fmt::Display, str::FromStr};

use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Serialize, Serializer};
use time::{Date, Month, OffsetDateTime, UtcOffset};

use crate::{Error, user::UserID};

/// A calendar month, written as "YYYY-MM".
///
/// The text form sorts in chronological order, which the budget queries rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthYear {
    first_day: Date,
}

impl MonthYear {
    /// Create the key for `month` of `year`.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidMonthYear] if `year` is outside 0..=9999.
    pub fn new(year: i32, month: Month) -> Result<Self, Error> {
        if !(0..=9999).contains(&year) {
            return Err(Error::InvalidMonthYear(format!("{year}-{:02}", u8::from(month))));
        }

        Date::from_calendar_date(year, month, 1)
            .map(|first_day| Self { first_day })
            .map_err(|error| Error::InvalidMonthYear(error.to_string()))
    }

    /// The month that `date_time` falls in, seen from the timezone `offset`.
    pub fn from_date_time(date_time: OffsetDateTime, offset: UtcOffset) -> Self {
        let date = date_time.to_offset(offset).date();

        Self {
            first_day: date.replace_day(1).unwrap_or(date),
        }
    }

    /// The current month in the timezone `offset`.
    pub fn current(offset: UtcOffset) -> Self {
        Self::from_date_time(OffsetDateTime::now_utc(), offset)
    }

    pub fn year(&self) -> i32 {
        self.first_day.year()
    }

    pub fn month(&self) -> Month {
        self.first_day.month()
    }

    /// The half-open range `[start, end)` of instants in this month, in the timezone `offset`.
    pub fn date_range(&self, offset: UtcOffset) -> (OffsetDateTime, OffsetDateTime) {
        let next_first_day = match self.month() {
            Month::December => Date::from_calendar_date(self.year() + 1, Month::January, 1),
            month => Date::from_calendar_date(self.year(), month.next(), 1),
        }
        .unwrap_or(Date::MAX);

        (
            self.first_day.midnight().assume_offset(offset),
            next_first_day.midnight().assume_offset(offset),
        )
    }
}

impl Display for MonthYear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), u8::from(self.month()))
    }
}

impl FromStr for MonthYear {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidMonthYear(s.to_owned());

        let (raw_year, raw_month) = s.split_once('-').ok_or_else(invalid)?;

        if raw_year.len() != 4
            || raw_month.len() != 2
            || !raw_year.bytes().chain(raw_month.bytes()).all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let year: i32 = raw_year.parse().map_err(|_| invalid())?;
        let month: u8 = raw_month.parse().map_err(|_| invalid())?;
        let month = Month::try_from(month).map_err(|_| invalid())?;

        Self::new(year, month)
    }
}

impl Serialize for MonthYear {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A spending ceiling for one user and month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Budget {
    /// The ID of the budget row.
    pub id: i64,
    /// The ID of the user the budget belongs to.
    pub user_id: i64,
    /// The most the user wants to spend in the month.
    pub amount: f64,
    /// The month the budget applies to.
    pub month_year: MonthYear,
}

/// Create the budget table.
///
/// The unique (user, month) pair is what turns `INSERT OR REPLACE` into an upsert.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_budget_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS budgets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                amount REAL NOT NULL,
                month_year TEXT NOT NULL,
                UNIQUE(user_id, month_year),
                FOREIGN KEY(user_id) REFERENCES users(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    Ok(())
}

/// Set the budget of `user_id` for `month_year` to `amount`, replacing any previous value.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidBudgetAmount] if `amount` is negative, NaN or infinite,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn upsert_budget(
    user_id: UserID,
    month_year: &MonthYear,
    amount: f64,
    connection: &Connection,
) -> Result<(), Error> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(Error::InvalidBudgetAmount(amount));
    }

    connection.execute(
        "INSERT OR REPLACE INTO budgets (user_id, amount, month_year) VALUES (?1, ?2, ?3)",
        (user_id.as_i64(), amount, month_year.to_string()),
    )?;

    Ok(())
}

/// Get the budget amount of `user_id` for the latest month that has one, or zero.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn get_latest_budget_amount(user_id: UserID, connection: &Connection) -> Result<f64, Error> {
    let amount = connection
        .query_row(
            "SELECT amount FROM budgets WHERE user_id = ?1 ORDER BY month_year DESC LIMIT 1",
            (user_id.as_i64(),),
            |row| row.get(0),
        )
        .optional()?;

    Ok(amount.unwrap_or(0.0))
}

/// Get the budget amount of `user_id` for `month_year`, or zero if none was set.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn get_budget_amount(
    user_id: UserID,
    month_year: &MonthYear,
    connection: &Connection,
) -> Result<f64, Error> {
    let amount = connection
        .query_row(
            "SELECT amount FROM budgets WHERE user_id = ?1 AND month_year = ?2",
            (user_id.as_i64(), month_year.to_string()),
            |row| row.get(0),
        )
        .optional()?;

    Ok(amount.unwrap_or(0.0))
}

/// Get every budget of `user_id`, newest month first.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn get_budgets_by_user(user_id: UserID, connection: &Connection) -> Result<Vec<Budget>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, amount, month_year FROM budgets
             WHERE user_id = :user_id ORDER BY month_year DESC",
        )?
        .query_map(&[(":user_id", &user_id.as_i64())], map_budget_row)?
        .map(|maybe_budget| maybe_budget.map_err(Error::from))
        .collect()
}

fn map_budget_row(row: &Row) -> Result<Budget, rusqlite::Error> {
    let raw_month_year: String = row.get(3)?;
    let month_year = raw_month_year.parse().map_err(|error: Error| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(error))
    })?;

    Ok(Budget {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        month_year,
    })
}
