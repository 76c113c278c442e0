//! Settings that control where data lives and how passwords and dates are handled.

use std::path::PathBuf;

use time::UtcOffset;

use crate::{Error, PasswordHash, db::DEFAULT_DB_PATH, timezone::get_local_offset};

/// The timezone used when none is configured.
pub const DEFAULT_TIMEZONE: &str = "Etc/UTC";

/// The application settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// File path to the application SQLite database.
    pub db_path: PathBuf,

    /// The local timezone as a canonical timezone name, e.g. "Asia/Taipei".
    ///
    /// Decides which month "now" falls in and how dates are displayed.
    pub timezone: String,

    /// The bcrypt cost used when hashing new passwords.
    pub password_cost: u32,

    /// Whether new passwords must pass the strength check.
    pub require_strong_passwords: bool,

    /// File to append debug logs to, if any.
    pub log_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            timezone: DEFAULT_TIMEZONE.to_owned(),
            password_cost: PasswordHash::DEFAULT_COST,
            require_strong_passwords: true,
            log_path: None,
        }
    }
}

impl Config {
    /// The current UTC offset of the configured timezone.
    ///
    /// # Errors
    /// Returns [Error::InvalidTimezone] if the timezone name is not recognised.
    pub fn utc_offset(&self) -> Result<UtcOffset, Error> {
        get_local_offset(&self.timezone).ok_or_else(|| Error::InvalidTimezone(self.timezone.clone()))
    }
}

#[cfg(test)]
mod config_tests {
    use std::path::Path;

    use time::UtcOffset;

    use crate::{Error, config::Config};

    #[test]
    fn defaults() {
        let config = Config::default();

        assert_eq!(config.db_path, Path::new("data/PFT.db"));
        assert_eq!(config.utc_offset(), Ok(UtcOffset::UTC));
        assert!(config.require_strong_passwords);
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        let config = Config {
            timezone: "Mars/Olympus_Mons".to_owned(),
            ..Default::default()
        };

        assert_eq!(
            config.utc_offset(),
            Err(Error::InvalidTimezone("Mars/Olympus_Mons".to_owned()))
        );
    }
}
