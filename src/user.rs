//! Code for creating the user table and storing users in the database.

use std::fmt::Display;

use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{Error, PasswordHash, db::timestamp_from_column};

/// The currency assigned to users who do not pick one.
pub const DEFAULT_CURRENCY: &str = "TWD";

/// A newtype wrapper for integer user IDs.
///
/// This helps disambiguate user IDs from other types of IDs, leading to better compile time
/// errors, and more flexible generics that can have distinct implementations for multiple ID types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct UserID(i64);

impl UserID {
    /// Create a new user ID.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Cast the user ID to a 64 bit integer.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for UserID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A user of the application, identified by their unique username.
///
/// The password digest can only be set by hashing a plaintext password with
/// [User::set_password], or by reading a stored user back from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    id: Option<UserID>,
    username: String,
    email: String,
    display_name: String,
    currency: String,
    password_hash: Option<PasswordHash>,
    created_at: OffsetDateTime,
    last_login: Option<OffsetDateTime>,
}

impl User {
    /// Create a user that has not been saved yet.
    ///
    /// The currency defaults to [DEFAULT_CURRENCY] and the creation time to now.
    /// No password is set.
    pub fn new(username: &str, email: &str) -> Self {
        Self {
            id: None,
            username: username.to_owned(),
            email: email.to_owned(),
            display_name: String::new(),
            currency: DEFAULT_CURRENCY.to_owned(),
            password_hash: None,
            created_at: OffsetDateTime::now_utc(),
            last_login: None,
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_owned();
        self
    }

    /// Set the preferred currency.
    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = currency.to_owned();
        self
    }

    /// Set the creation time. The Unix epoch is treated as "not given" and replaced with now.
    pub fn with_created_at(mut self, created_at: OffsetDateTime) -> Self {
        self.created_at = if created_at.unix_timestamp() == 0 {
            OffsetDateTime::now_utc()
        } else {
            created_at
        };
        self
    }

    /// Set the time of the last successful log in.
    pub fn with_last_login(mut self, last_login: Option<OffsetDateTime>) -> Self {
        self.last_login = last_login;
        self
    }

    /// The ID assigned by the database, `None` if the user has not been saved.
    pub fn id(&self) -> Option<UserID> {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn password_hash(&self) -> Option<&PasswordHash> {
        self.password_hash.as_ref()
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn last_login(&self) -> Option<OffsetDateTime> {
        self.last_login
    }

    pub fn set_email(&mut self, email: &str) {
        self.email = email.to_owned();
    }

    pub fn set_display_name(&mut self, display_name: &str) {
        self.display_name = display_name.to_owned();
    }

    pub fn set_currency(&mut self, currency: &str) {
        self.currency = currency.to_owned();
    }

    pub fn set_last_login(&mut self, last_login: OffsetDateTime) {
        self.last_login = Some(last_login);
    }

    /// Hash `plaintext` with bcrypt at `cost` and store the digest.
    ///
    /// # Errors
    ///
    /// Returns [Error::EmptyPassword] for an empty password or [Error::HashingError]
    /// if hashing failed. The previous digest is kept on error.
    pub fn set_password(&mut self, plaintext: &str, cost: u32) -> Result<(), Error> {
        self.password_hash = Some(PasswordHash::from_raw_password(plaintext, cost)?);
        Ok(())
    }

    /// Check `attempt` against the stored digest.
    ///
    /// Returns false if no password has been set or the digest is unreadable.
    pub fn authenticate(&self, attempt: &str) -> bool {
        let Some(password_hash) = &self.password_hash else {
            return false;
        };

        match password_hash.verify(attempt) {
            Ok(is_match) => is_match,
            Err(error) => {
                tracing::warn!("could not verify password for {}: {error}", self.username);
                false
            }
        }
    }
}

/// Create the user table.
///
/// # Errors
///
/// This function will return an error if the SQL query failed.
pub fn create_user_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                email TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                display_name TEXT NOT NULL DEFAULT '',
                currency TEXT NOT NULL DEFAULT 'TWD',
                created_at INTEGER NOT NULL,
                last_login INTEGER
                )",
        (),
    )?;

    Ok(())
}

/// Insert `user` into the database and return the ID it was assigned.
///
/// # Errors
///
/// This function will return a:
/// - [Error::EmptyUsername] if the username is empty,
/// - [Error::MissingPasswordHash] if no password has been set,
/// - [Error::DuplicateUsername] if the username is taken,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_user(user: &User, connection: &Connection) -> Result<UserID, Error> {
    if user.username.is_empty() {
        return Err(Error::EmptyUsername);
    }

    let password_hash = user
        .password_hash
        .as_ref()
        .ok_or(Error::MissingPasswordHash)?;

    connection
        .execute(
            "INSERT INTO users (username, email, password_hash, display_name, currency, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            (
                &user.username,
                &user.email,
                password_hash.as_ref(),
                &user.display_name,
                &user.currency,
                user.created_at.unix_timestamp(),
                user.last_login.map(|at| at.unix_timestamp()),
            ),
        )
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: _,
                    extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
                },
                _,
            ) => Error::DuplicateUsername(user.username.clone()),
            error => error.into(),
        })?;

    Ok(UserID::new(connection.last_insert_rowid()))
}

/// Get the user with the specified `username`.
///
/// # Errors
///
/// This function will return an error if:
/// - `username` does not belong to a registered user ([Error::NotFound]),
/// - there was an error trying to access the store.
pub fn get_user_by_username(username: &str, connection: &Connection) -> Result<User, Error> {
    connection
        .prepare(
            "SELECT id, username, email, password_hash, display_name, currency, created_at, last_login
             FROM users WHERE username = :username",
        )?
        .query_row(&[(":username", &username)], map_user_row)
        .map_err(|error| error.into())
}

/// Resolve `username` to the ID of the user that owns it.
///
/// # Errors
///
/// Returns [Error::UnknownUser] if no user has that username.
pub fn get_user_id(username: &str, connection: &Connection) -> Result<UserID, Error> {
    connection
        .prepare("SELECT id FROM users WHERE username = :username")?
        .query_row(&[(":username", &username)], |row| row.get(0).map(UserID::new))
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::UnknownUser(username.to_owned()),
            error => error.into(),
        })
}

/// Overwrite the stored details of the user with the same username as `user`.
///
/// # Errors
///
/// Returns [Error::UpdateMissingUser] if no such user exists, or
/// [Error::MissingPasswordHash] if `user` has no password.
pub fn update_user(user: &User, connection: &Connection) -> Result<(), Error> {
    let password_hash = user
        .password_hash
        .as_ref()
        .ok_or(Error::MissingPasswordHash)?;

    let rows_affected = connection.execute(
        "UPDATE users
         SET email = ?1, password_hash = ?2, display_name = ?3, currency = ?4, last_login = ?5
         WHERE username = ?6",
        (
            &user.email,
            password_hash.as_ref(),
            &user.display_name,
            &user.currency,
            user.last_login.map(|at| at.unix_timestamp()),
            &user.username,
        ),
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingUser);
    }

    Ok(())
}

/// Record `at` as the last time `username` logged in.
///
/// # Errors
///
/// Returns [Error::UpdateMissingUser] if no such user exists.
pub fn update_last_login(
    username: &str,
    at: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE users SET last_login = ?1 WHERE username = ?2",
        (at.unix_timestamp(), username),
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingUser);
    }

    Ok(())
}

/// Delete the user with `username`. Their transactions and budgets go with them.
///
/// # Errors
///
/// Returns [Error::DeleteMissingUser] if no such user exists.
pub fn delete_user(username: &str, connection: &Connection) -> Result<(), Error> {
    let rows_affected =
        connection.execute("DELETE FROM users WHERE username = ?1", (username,))?;

    if rows_affected == 0 {
        return Err(Error::DeleteMissingUser);
    }

    Ok(())
}

fn map_user_row(row: &Row) -> Result<User, rusqlite::Error> {
    let raw_password_hash: String = row.get(3)?;
    let raw_last_login: Option<i64> = row.get(7)?;

    let last_login = match raw_last_login {
        Some(timestamp) => Some(timestamp_from_column(7, timestamp)?),
        None => None,
    };

    Ok(User {
        id: Some(UserID::new(row.get(0)?)),
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: Some(PasswordHash::new_unchecked(&raw_password_hash)),
        display_name: row.get(4)?,
        currency: row.get(5)?,
        created_at: timestamp_from_column(6, row.get(6)?)?,
        last_login,
    })
}
