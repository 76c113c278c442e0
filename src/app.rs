//! The application shell: one database gateway plus the settings that the
//! command line front end needs to register users and log them in.

use time::UtcOffset;

use crate::{
    Error, ValidatedPassword,
    budget::{Budget, MonthYear},
    config::Config,
    db::Database,
    transaction::{MonthlySummary, Transaction, TransactionId},
    user::User,
};

/// The running application.
#[derive(Debug)]
pub struct App {
    database: Database,
    config: Config,
}

impl App {
    /// Open the configured database and make sure the schema exists.
    ///
    /// # Errors
    /// Returns an error if the timezone is invalid or the database could not
    /// be opened or initialised.
    pub fn start(config: Config) -> Result<Self, Error> {
        let offset = config.utc_offset()?;
        let database = Database::new(&config.db_path).with_utc_offset(offset);

        Self::with_database(database, config)
    }

    /// Start the application on top of an existing gateway, opening it if needed.
    ///
    /// # Errors
    /// Returns an error if the database could not be opened or initialised.
    pub fn with_database(mut database: Database, config: Config) -> Result<Self, Error> {
        database.open()?;
        database.init_schema()?;

        Ok(Self { database, config })
    }

    pub fn database(&mut self) -> &mut Database {
        &mut self.database
    }

    pub fn utc_offset(&self) -> UtcOffset {
        self.database.utc_offset()
    }

    /// Create an account for `username`.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::TooWeak] if strong passwords are required and `password` is not one,
    /// - [Error::DuplicateUsername] if the username is taken,
    /// - or any error from hashing or storing the user.
    pub fn register(&mut self, username: &str, email: &str, password: &str) -> Result<User, Error> {
        if self.config.require_strong_passwords {
            ValidatedPassword::new(password)?;
        }

        let mut user = User::new(username, email);
        user.set_password(password, self.config.password_cost)?;
        self.database.add_user(&user)?;

        self.database.get_user(username)
    }

    /// Check the credentials of `username` and record the log in.
    ///
    /// # Errors
    /// Returns [Error::InvalidCredentials] if the user does not exist or the
    /// password is wrong. The two cases are not told apart.
    pub fn log_in(&mut self, username: &str, password: &str) -> Result<User, Error> {
        let user = match self.database.get_user(username) {
            Ok(user) => user,
            Err(Error::NotFound) => return Err(Error::InvalidCredentials),
            Err(error) => return Err(error),
        };

        if !user.authenticate(password) {
            tracing::info!("failed log in for {username}");
            return Err(Error::InvalidCredentials);
        }

        self.database.record_login(username)?;
        tracing::info!("{username} logged in");

        self.database.get_user(username)
    }

    /// Replace the password of `username`.
    ///
    /// # Errors
    /// Returns [Error::NotFound] for unknown users, [Error::TooWeak] if the
    /// password policy rejects `new_password`, or any storage error.
    pub fn change_password(&mut self, username: &str, new_password: &str) -> Result<(), Error> {
        if self.config.require_strong_passwords {
            ValidatedPassword::new(new_password)?;
        }

        let mut user = self.database.get_user(username)?;
        user.set_password(new_password, self.config.password_cost)?;

        self.database.update_user(&user)
    }

    pub fn add_transaction(
        &mut self,
        username: &str,
        transaction: &Transaction,
    ) -> Result<Transaction, Error> {
        self.database.add_transaction(username, transaction)
    }

    pub fn transactions(&mut self, username: &str) -> Result<Vec<Transaction>, Error> {
        self.database.get_transactions(username)
    }

    /// Delete one of the transactions of `username`.
    ///
    /// # Errors
    /// Returns [Error::DeleteMissingTransaction] if `id` is not one of their transactions.
    pub fn delete_transaction(&mut self, username: &str, id: TransactionId) -> Result<(), Error> {
        let owns_transaction = self
            .database
            .get_transactions(username)?
            .iter()
            .any(|transaction| transaction.id == id);

        if !owns_transaction {
            return Err(Error::DeleteMissingTransaction);
        }

        self.database.delete_transaction(id)
    }

    /// Set the budget of `username` for `month_year`, or the current month if `None`.
    pub fn set_budget(
        &mut self,
        username: &str,
        month_year: Option<&MonthYear>,
        amount: f64,
    ) -> Result<(), Error> {
        match month_year {
            Some(month_year) => self
                .database
                .set_budget_for_month(username, month_year, amount),
            None => self.database.set_budget(username, amount),
        }
    }

    pub fn budgets(&mut self, username: &str) -> Result<Vec<Budget>, Error> {
        self.database.get_budgets(username)
    }

    /// Summarise `month_year`, or the current month if `None`.
    pub fn summary(
        &mut self,
        username: &str,
        month_year: Option<MonthYear>,
    ) -> Result<MonthlySummary, Error> {
        let month_year = month_year.unwrap_or_else(|| MonthYear::current(self.utc_offset()));

        self.database.monthly_summary(username, &month_year)
    }
}
