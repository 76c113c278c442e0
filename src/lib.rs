//! A personal finance tracker.
//!
//! Users register with a username and password, record income and expenses,
//! and set a budget for each month. Everything is stored in a single SQLite
//! file and accessed through the [Database] gateway.

pub mod app;
pub mod budget;
pub mod config;
pub mod db;
pub mod logging;
pub mod password;
pub mod timezone;
pub mod transaction;
pub mod user;

pub use app::App;
pub use budget::{Budget, MonthYear};
pub use config::Config;
pub use db::{Database, initialize as initialize_db};
pub use password::{PasswordHash, ValidatedPassword};
pub use transaction::{MonthlySummary, Transaction, TransactionId};
pub use user::{User, UserID};

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The gateway has no open connection. Call [Database::open] first.
    #[error("the database connection is not open")]
    NotConnected,

    /// The database file could not be opened or created.
    #[error("could not open the database: {0}")]
    ConnectionError(String),

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// A username did not match any registered user.
    #[error("there is no user named \"{0}\"")]
    UnknownUser(String),

    /// A user ID did not match any registered user.
    #[error("there is no user with ID {0}")]
    UnknownUserId(i64),

    /// A user was created with an empty username.
    #[error("username cannot be empty")]
    EmptyUsername,

    /// The username is already registered. The client should pick another one.
    #[error("the username \"{0}\" is already taken")]
    DuplicateUsername(String),

    /// A user was saved before a password was set.
    #[error("the user has no password set")]
    MissingPasswordHash,

    /// An empty string was given as a password.
    #[error("password cannot be empty")]
    EmptyPassword,

    /// The user provided an invalid combination of username and password.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// The user provided a password that is too easy to guess.
    #[error("password is too weak: {0}")]
    TooWeak(String),

    /// An unexpected error occurred with the underlying hashing library.
    ///
    /// The error string should only be logged for debugging.
    #[error("hashing failed: {0}")]
    HashingError(String),

    /// A transaction needs a positive, finite amount, a description, a category and an owner.
    #[error("a transaction needs a positive amount, a description and a category")]
    InvalidTransaction,

    /// Budgets must be zero or more.
    #[error("{0} is not a valid budget amount")]
    InvalidBudgetAmount(f64),

    /// A month-year key was not in the form "YYYY-MM".
    #[error("\"{0}\" is not a month in the form YYYY-MM")]
    InvalidMonthYear(String),

    /// An error occurred while getting the local timezone from a canonical timezone string.
    #[error("invalid timezone {0}")]
    InvalidTimezone(String),

    /// Tried to update a user that does not exist
    #[error("tried to update a user that is not in the database")]
    UpdateMissingUser,

    /// Tried to delete a user that does not exist
    #[error("tried to delete a user that is not in the database")]
    DeleteMissingUser,

    /// Tried to update a transaction that does not exist
    #[error("tried to update a transaction that is not in the database")]
    UpdateMissingTransaction,

    /// Tried to delete a transaction that does not exist
    #[error("tried to delete a transaction that is not in the database")]
    DeleteMissingTransaction,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}
