/*! This module owns the application's database: the schema and the [Database] gateway that all reads and writes go through. */

use std::path::{Path, PathBuf};

use rusqlite::{Connection, Transaction as SqlTransaction};
use time::{OffsetDateTime, UtcOffset};

use crate::{
    Error,
    budget::{self, Budget, MonthYear},
    timezone::system_offset,
    transaction::{self, MonthlySummary, Transaction, TransactionId},
    user::{self, User, UserID},
};

/// Where the database file lives unless configured otherwise.
pub const DEFAULT_DB_PATH: &str = "data/PFT.db";

/// Create the tables for the domain models, if they do not exist yet.
///
/// # Errors
/// Returns an error if a table could not be created, in which case none are.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    // Must run outside a transaction, SQLite ignores it otherwise.
    connection.pragma_update(None, "foreign_keys", true)?;

    let sql_transaction =
        SqlTransaction::new_unchecked(connection, rusqlite::TransactionBehavior::Exclusive)?;

    user::create_user_table(&sql_transaction)?;
    transaction::create_transaction_table(&sql_transaction)?;
    budget::create_budget_table(&sql_transaction)?;

    sql_transaction.commit()?;

    Ok(())
}

/// Convert a Unix timestamp read from column `index` into a date-time.
pub(crate) fn timestamp_from_column(
    index: usize,
    timestamp: i64,
) -> Result<OffsetDateTime, rusqlite::Error> {
    OffsetDateTime::from_unix_timestamp(timestamp).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Integer,
            Box::new(error),
        )
    })
}

/// The persistence gateway: the single owner of the SQLite connection.
///
/// The gateway is either connected or disconnected. Every operation on a
/// disconnected gateway fails with [Error::NotConnected]. Each failure is also
/// remembered as the [last error](Database::last_error), replacing the one before.
///
/// Writes that need more than one statement run inside a savepoint, so they
/// either fully happen or not at all.
#[derive(Debug)]
pub struct Database {
    target: Target,
    connection: Option<Connection>,
    utc_offset: UtcOffset,
    last_error: Option<String>,
}

/// The store a [Database] connects to when it is opened.
#[derive(Debug)]
enum Target {
    File(PathBuf),
    Memory,
    /// An in-memory connection handed over by the caller. Once closed, it is gone.
    Injected,
}

impl Database {
    /// Create a disconnected gateway for the database file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_target(Target::File(path.as_ref().to_path_buf()), None)
    }

    /// Create a disconnected gateway for a fresh in-memory database.
    pub fn in_memory() -> Self {
        Self::with_target(Target::Memory, None)
    }

    /// Create a gateway for `path` and open it.
    ///
    /// # Errors
    /// Returns [Error::ConnectionError] if the database could not be opened.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut database = Self::new(path);
        database.open()?;

        Ok(database)
    }

    /// Create a connected gateway around an already open connection.
    ///
    /// If `connection` is backed by a file, reopening the gateway after
    /// [closing](Database::close) it reopens that file. An in-memory connection
    /// cannot be reopened.
    ///
    /// # Errors
    /// Returns an error if foreign keys could not be enabled on `connection`.
    pub fn from_connection(connection: Connection) -> Result<Self, Error> {
        connection.pragma_update(None, "foreign_keys", true)?;

        let target = match connection.path() {
            Some(path) if !path.is_empty() => Target::File(PathBuf::from(path)),
            _ => Target::Injected,
        };

        Ok(Self::with_target(target, Some(connection)))
    }

    fn with_target(target: Target, connection: Option<Connection>) -> Self {
        Self {
            target,
            connection,
            utc_offset: system_offset(),
            last_error: None,
        }
    }

    /// Use `offset` as the local timezone when working out the current month.
    pub fn with_utc_offset(mut self, offset: UtcOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn utc_offset(&self) -> UtcOffset {
        self.utc_offset
    }

    /// Open the connection. The file and its parent directory are created if missing.
    ///
    /// Opening an already connected gateway does nothing. On failure the
    /// gateway stays disconnected.
    ///
    /// # Errors
    /// Returns [Error::ConnectionError] if the database could not be opened,
    /// including when an injected in-memory connection has been closed.
    pub fn open(&mut self) -> Result<(), Error> {
        if self.is_connected() {
            return Ok(());
        }

        let result = open_connection(&self.target);

        match self.track(result) {
            Ok(connection) => {
                tracing::debug!("opened database {:?}", self.target);
                self.connection = Some(connection);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Close the connection. Closing a disconnected gateway does nothing.
    pub fn close(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        match connection.close() {
            Ok(()) => tracing::debug!("closed database {:?}", self.target),
            Err((_, error)) => {
                // The connection is dropped anyway, which releases the handle.
                tracing::error!("could not close database cleanly: {error}");
                self.last_error = Some(error.to_string());
            }
        }
    }

    /// Whether the gateway holds a live connection.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// The message of the most recent failed operation, if any operation has failed.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Create the users, transactions and budgets tables if they do not exist.
    ///
    /// # Errors
    /// Returns [Error::NotConnected] or the SQL error that stopped the schema being created.
    pub fn init_schema(&mut self) -> Result<(), Error> {
        let result = self.connection().and_then(initialize);
        self.track(result)
    }

    // ------------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------------

    /// Store a new user and return its ID.
    ///
    /// # Errors
    /// See [user::create_user].
    pub fn add_user(&mut self, user: &User) -> Result<UserID, Error> {
        let result = self
            .connection()
            .and_then(|connection| user::create_user(user, connection));

        if let Ok(id) = &result {
            tracing::info!("registered user {} with ID {id}", user.username());
        }

        self.track(result)
    }

    /// Load the user with `username`.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if no such user exists.
    pub fn get_user(&mut self, username: &str) -> Result<User, Error> {
        let result = self
            .connection()
            .and_then(|connection| user::get_user_by_username(username, connection));
        self.track(result)
    }

    /// Save the email, password, display name, currency and last login of `user`.
    ///
    /// # Errors
    /// Returns [Error::UpdateMissingUser] if the username is not registered.
    pub fn update_user(&mut self, user: &User) -> Result<(), Error> {
        let result = self
            .connection()
            .and_then(|connection| user::update_user(user, connection));
        self.track(result)
    }

    /// Delete the user with `username` along with their transactions and budgets.
    ///
    /// # Errors
    /// Returns [Error::DeleteMissingUser] if the username is not registered.
    pub fn delete_user(&mut self, username: &str) -> Result<(), Error> {
        let result = self
            .connection()
            .and_then(|connection| user::delete_user(username, connection));
        self.track(result)
    }

    /// Record now as the last log in of `username`.
    ///
    /// # Errors
    /// Returns [Error::UpdateMissingUser] if the username is not registered.
    pub fn record_login(&mut self, username: &str) -> Result<(), Error> {
        let result = self.connection().and_then(|connection| {
            user::update_last_login(username, OffsetDateTime::now_utc(), connection)
        });
        self.track(result)
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Store `transaction` for the user `username` and return the stored copy.
    ///
    /// Any owner already set on `transaction` is replaced by the user that
    /// `username` resolves to. Nothing is written on failure.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::UnknownUser] if `username` is not registered,
    /// - [Error::InvalidTransaction] if the transaction is not valid,
    /// - or [Error::SqlError] if there is some other SQL error.
    pub fn add_transaction(
        &mut self,
        username: &str,
        transaction: &Transaction,
    ) -> Result<Transaction, Error> {
        let result = self.atomically(|connection| {
            let user_id = user::get_user_id(username, connection)?;
            let owned = Transaction {
                user_id: user_id.as_i64(),
                ..transaction.clone()
            };

            transaction::create_transaction(&owned, connection)
        });
        self.track(result)
    }

    /// Load every transaction of `username`, most recent first.
    ///
    /// # Errors
    /// Returns [Error::UnknownUser] if `username` is not registered.
    pub fn get_transactions(&mut self, username: &str) -> Result<Vec<Transaction>, Error> {
        let result = self.connection().and_then(|connection| {
            let user_id = user::get_user_id(username, connection)?;
            transaction::get_transactions_by_user(user_id, connection)
        });
        self.track(result)
    }

    /// Save the details of `transaction`, matched by its ID.
    ///
    /// # Errors
    /// Returns [Error::InvalidTransaction] for invalid details or
    /// [Error::UpdateMissingTransaction] if no transaction has that ID.
    pub fn update_transaction(&mut self, transaction: &Transaction) -> Result<(), Error> {
        let result = self
            .connection()
            .and_then(|connection| transaction::update_transaction(transaction, connection));
        self.track(result)
    }

    /// Delete the transaction with `id`.
    ///
    /// # Errors
    /// Returns [Error::DeleteMissingTransaction] if no transaction has that ID.
    pub fn delete_transaction(&mut self, id: TransactionId) -> Result<(), Error> {
        let result = self
            .connection()
            .and_then(|connection| transaction::delete_transaction(id, connection));
        self.track(result)
    }

    // ------------------------------------------------------------------------
    // Budgets
    // ------------------------------------------------------------------------

    /// Set the budget of `username` for the current month to `amount`.
    ///
    /// The current month is taken from the wall clock in the gateway's timezone.
    ///
    /// # Errors
    /// See [Database::set_budget_for_month].
    pub fn set_budget(&mut self, username: &str, amount: f64) -> Result<(), Error> {
        let month_year = MonthYear::current(self.utc_offset);
        self.set_budget_for_month(username, &month_year, amount)
    }

    /// Set the budget of `username` for `month_year` to `amount`, replacing any previous value.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::UnknownUser] if `username` is not registered,
    /// - [Error::InvalidBudgetAmount] if `amount` is negative or not finite,
    /// - or [Error::SqlError] if there is some other SQL error.
    pub fn set_budget_for_month(
        &mut self,
        username: &str,
        month_year: &MonthYear,
        amount: f64,
    ) -> Result<(), Error> {
        let result = self.atomically(|connection| {
            let user_id = user::get_user_id(username, connection)?;
            budget::upsert_budget(user_id, month_year, amount, connection)
        });
        self.track(result)
    }

    /// The budget of `username` for their most recent budgeted month, or zero.
    ///
    /// # Errors
    /// Returns [Error::UnknownUser] if `username` is not registered.
    pub fn get_budget(&mut self, username: &str) -> Result<f64, Error> {
        let result = self.connection().and_then(|connection| {
            let user_id = user::get_user_id(username, connection)?;
            budget::get_latest_budget_amount(user_id, connection)
        });
        self.track(result)
    }

    /// The budget of `username` for `month_year`, or zero.
    ///
    /// # Errors
    /// Returns [Error::UnknownUser] if `username` is not registered.
    pub fn get_budget_for_month(
        &mut self,
        username: &str,
        month_year: &MonthYear,
    ) -> Result<f64, Error> {
        let result = self.connection().and_then(|connection| {
            let user_id = user::get_user_id(username, connection)?;
            budget::get_budget_amount(user_id, month_year, connection)
        });
        self.track(result)
    }

    /// Every budget of `username`, newest month first.
    ///
    /// # Errors
    /// Returns [Error::UnknownUser] if `username` is not registered.
    pub fn get_budgets(&mut self, username: &str) -> Result<Vec<Budget>, Error> {
        let result = self.connection().and_then(|connection| {
            let user_id = user::get_user_id(username, connection)?;
            budget::get_budgets_by_user(user_id, connection)
        });
        self.track(result)
    }

    /// Budget, spending and income of `username` in `month_year`.
    ///
    /// # Errors
    /// Returns [Error::UnknownUser] if `username` is not registered.
    pub fn monthly_summary(
        &mut self,
        username: &str,
        month_year: &MonthYear,
    ) -> Result<MonthlySummary, Error> {
        let offset = self.utc_offset;
        let result = self.connection().and_then(|connection| {
            let user_id = user::get_user_id(username, connection)?;
            let budget = budget::get_budget_amount(user_id, month_year, connection)?;
            let (expenses, income) =
                transaction::sum_transactions_in_month(user_id, month_year, offset, connection)?;

            Ok(MonthlySummary {
                month_year: *month_year,
                budget,
                expenses,
                income,
            })
        });
        self.track(result)
    }

    // ------------------------------------------------------------------------
    // Low-level helpers
    // ------------------------------------------------------------------------

    /// Run one or more raw SQL statements.
    ///
    /// # Errors
    /// Returns [Error::SqlError] if any statement fails.
    pub fn execute_query(&mut self, sql: &str) -> Result<(), Error> {
        let result = self
            .connection()
            .and_then(|connection| connection.execute_batch(sql).map_err(Error::from));
        self.track(result)
    }

    /// Start an explicit transaction that lasts until committed or rolled back.
    pub fn begin_transaction(&mut self) -> Result<(), Error> {
        self.execute_query("BEGIN TRANSACTION")
    }

    pub fn commit_transaction(&mut self) -> Result<(), Error> {
        self.execute_query("COMMIT")
    }

    pub fn rollback_transaction(&mut self) -> Result<(), Error> {
        self.execute_query("ROLLBACK")
    }

    fn connection(&self) -> Result<&Connection, Error> {
        self.connection.as_ref().ok_or(Error::NotConnected)
    }

    /// Run `operation` inside a savepoint that is only committed if it succeeds.
    ///
    /// Savepoints nest, so this also works inside [Database::begin_transaction].
    fn atomically<T>(
        &mut self,
        operation: impl FnOnce(&Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let connection = self.connection.as_mut().ok_or(Error::NotConnected)?;
        // Dropping the savepoint without committing rolls it back.
        let savepoint = connection.savepoint()?;
        let value = operation(&*savepoint)?;
        savepoint.commit()?;

        Ok(value)
    }

    /// Remember the error of a failed operation before handing the result back.
    fn track<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(error) = &result {
            tracing::warn!("database operation failed: {error}");
            self.last_error = Some(error.to_string());
        }

        result
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_connection(target: &Target) -> Result<Connection, Error> {
    let connection = match target {
        Target::File(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|error| {
                    Error::ConnectionError(format!("could not create {parent:?}: {error}"))
                })?;
            }

            Connection::open(path)
        }
        Target::Memory => Connection::open_in_memory(),
        Target::Injected => {
            return Err(Error::ConnectionError(
                "the injected in-memory connection was closed and cannot be reopened".to_owned(),
            ));
        }
    }
    .map_err(|error| Error::ConnectionError(error.to_string()))?;

    connection.pragma_update(None, "foreign_keys", true)?;

    Ok(connection)
}

#[cfg(test)]
mod database_tests {
    use time::{UtcOffset, macros::datetime};

    use crate::{
        Error,
        budget::MonthYear,
        db::Database,
        transaction::Transaction,
        user::User,
    };

    fn get_database() -> Database {
        let mut database = Database::in_memory().with_utc_offset(UtcOffset::UTC);
        database.open().unwrap();
        database.init_schema().unwrap();
        database
    }

    fn add_alice(database: &mut Database) {
        let mut user = User::new("alice", "a@x.com");
        user.set_password("pw1", 4).unwrap();
        database.add_user(&user).unwrap();
    }

    fn coffee() -> Transaction {
        Transaction::new(42.50, "coffee", "food", true)
    }

    #[test]
    fn starts_disconnected() {
        let database = Database::in_memory();

        assert!(!database.is_connected());
        assert_eq!(database.last_error(), None);
    }

    #[test]
    fn open_and_close() {
        let mut database = Database::in_memory();

        database.open().unwrap();
        assert!(database.is_connected());

        database.close();
        assert!(!database.is_connected());

        database.close();
        assert!(!database.is_connected());
    }

    #[test]
    fn closed_injected_memory_connection_cannot_reopen() {
        let connection = rusqlite::Connection::open_in_memory().unwrap();
        let mut database = Database::from_connection(connection).unwrap();
        database.init_schema().unwrap();

        database.close();
        let result = database.open();

        assert!(matches!(result, Err(Error::ConnectionError(_))));
        assert!(!database.is_connected());
        assert_eq!(database.get_user("alice"), Err(Error::NotConnected));
    }

    #[test]
    fn operations_fail_when_disconnected() {
        let mut database = Database::in_memory();

        assert_eq!(database.init_schema(), Err(Error::NotConnected));
        assert_eq!(database.get_user("alice"), Err(Error::NotConnected));
        assert_eq!(database.get_budget("alice"), Err(Error::NotConnected));
        assert_eq!(
            database.add_transaction("alice", &coffee()),
            Err(Error::NotConnected)
        );
        assert_eq!(
            database.last_error(),
            Some(Error::NotConnected.to_string().as_str())
        );
    }

    #[test]
    fn init_schema_is_idempotent() {
        let mut database = get_database();

        assert_eq!(database.init_schema(), Ok(()));
    }

    #[test]
    fn register_then_authenticate() {
        let mut database = get_database();
        add_alice(&mut database);

        let user = database.get_user("alice").unwrap();

        assert_eq!(user.email(), "a@x.com");
        assert!(user.authenticate("pw1"));
        assert!(!user.authenticate("wrong"));
    }

    #[test]
    fn get_unknown_user_fails() {
        let mut database = get_database();

        assert_eq!(database.get_user("nobody"), Err(Error::NotFound));
        assert_eq!(database.last_error(), Some(Error::NotFound.to_string().as_str()));
    }

    #[test]
    fn last_error_is_overwritten() {
        let mut database = get_database();
        add_alice(&mut database);

        let _ = database.get_user("nobody");
        let mut duplicate = User::new("alice", "b@x.com");
        duplicate.set_password("pw", 4).unwrap();
        let _ = database.add_user(&duplicate);

        assert_eq!(
            database.last_error(),
            Some(Error::DuplicateUsername("alice".to_owned()).to_string().as_str())
        );
    }

    #[test]
    fn add_transaction_for_known_user() {
        let mut database = get_database();
        add_alice(&mut database);

        let stored = database.add_transaction("alice", &coffee()).unwrap();
        let transactions = database.get_transactions("alice").unwrap();

        assert_eq!(transactions, vec![stored]);
        assert_eq!(transactions[0].formatted_amount(), "-$42.50");
    }

    #[test]
    fn add_transaction_for_unknown_user_writes_nothing() {
        let mut database = get_database();
        add_alice(&mut database);

        let result = database.add_transaction("bob", &coffee());

        assert_eq!(result, Err(Error::UnknownUser("bob".to_owned())));
        assert!(database.get_transactions("alice").unwrap().is_empty());
    }

    #[test]
    fn add_invalid_transaction_fails() {
        let mut database = get_database();
        add_alice(&mut database);

        let result = database.add_transaction("alice", &Transaction::new(0.0, "x", "y", true));

        assert_eq!(result, Err(Error::InvalidTransaction));
    }

    #[test]
    fn transactions_are_newest_first() {
        let mut database = get_database();
        add_alice(&mut database);
        let old = coffee().with_date(datetime!(2024-01-01 8:00 UTC));
        let new = coffee().with_date(datetime!(2024-06-01 8:00 UTC));
        database.add_transaction("alice", &old).unwrap();
        database.add_transaction("alice", &new).unwrap();

        let dates: Vec<_> = database
            .get_transactions("alice")
            .unwrap()
            .into_iter()
            .map(|transaction| transaction.date)
            .collect();

        assert_eq!(dates, vec![new.date, old.date]);
    }

    #[test]
    fn update_and_delete_transaction() {
        let mut database = get_database();
        add_alice(&mut database);
        let mut stored = database.add_transaction("alice", &coffee()).unwrap();

        stored.description = "tea".to_owned();
        database.update_transaction(&stored).unwrap();
        assert_eq!(database.get_transactions("alice").unwrap(), vec![stored.clone()]);

        database.delete_transaction(stored.id).unwrap();
        assert!(database.get_transactions("alice").unwrap().is_empty());
        assert_eq!(
            database.delete_transaction(stored.id),
            Err(Error::DeleteMissingTransaction)
        );
    }

    #[test]
    fn set_budget_twice_keeps_second_amount() {
        let mut database = get_database();
        add_alice(&mut database);

        database.set_budget("alice", 500.0).unwrap();
        database.set_budget("alice", 800.0).unwrap();

        let budgets = database.get_budgets("alice").unwrap();
        assert_eq!(budgets.len(), 1);
        assert_eq!(budgets[0].month_year, MonthYear::current(UtcOffset::UTC));
        assert_eq!(database.get_budget("alice"), Ok(800.0));
    }

    #[test]
    fn budget_is_zero_when_unset() {
        let mut database = get_database();
        add_alice(&mut database);

        assert_eq!(database.get_budget("alice"), Ok(0.0));
    }

    #[test]
    fn set_budget_for_unknown_user_fails() {
        let mut database = get_database();

        assert_eq!(
            database.set_budget("bob", 10.0),
            Err(Error::UnknownUser("bob".to_owned()))
        );
    }

    #[test]
    fn delete_user_cascades() {
        let mut database = get_database();
        add_alice(&mut database);
        database.add_transaction("alice", &coffee()).unwrap();
        database.set_budget("alice", 100.0).unwrap();

        database.delete_user("alice").unwrap();
        add_alice(&mut database);

        assert!(database.get_transactions("alice").unwrap().is_empty());
        assert!(database.get_budgets("alice").unwrap().is_empty());
    }

    #[test]
    fn update_user_and_record_login() {
        let mut database = get_database();
        add_alice(&mut database);
        let mut user = database.get_user("alice").unwrap();
        user.set_currency("USD");

        database.update_user(&user).unwrap();
        database.record_login("alice").unwrap();

        let user = database.get_user("alice").unwrap();
        assert_eq!(user.currency(), "USD");
        assert!(user.last_login().is_some());
    }

    #[test]
    fn monthly_summary_totals() {
        let mut database = get_database();
        add_alice(&mut database);
        let february: MonthYear = "2025-02".parse().unwrap();
        database
            .set_budget_for_month("alice", &february, 300.0)
            .unwrap();
        let in_month = datetime!(2025-02-10 12:00 UTC);
        database
            .add_transaction("alice", &coffee().with_date(in_month))
            .unwrap();
        database
            .add_transaction(
                "alice",
                &Transaction::new(1000.0, "salary", "income", false).with_date(in_month),
            )
            .unwrap();
        database
            .add_transaction(
                "alice",
                &coffee().with_date(datetime!(2025-03-01 0:00 UTC)),
            )
            .unwrap();

        let summary = database.monthly_summary("alice", &february).unwrap();

        assert_eq!(summary.budget, 300.0);
        assert_eq!(summary.expenses, 42.5);
        assert_eq!(summary.income, 1000.0);
        assert_eq!(summary.remaining(), 257.5);
        assert_eq!(database.get_budget_for_month("alice", &february), Ok(300.0));
    }

    #[test]
    fn rolled_back_explicit_transaction_discards_writes() {
        let mut database = get_database();
        add_alice(&mut database);

        database.begin_transaction().unwrap();
        database.add_transaction("alice", &coffee()).unwrap();
        database.rollback_transaction().unwrap();

        assert!(database.get_transactions("alice").unwrap().is_empty());
    }

    #[test]
    fn execute_query_reports_bad_sql() {
        let mut database = get_database();

        let result = database.execute_query("SELEKT 1");

        assert!(matches!(result, Err(Error::SqlError(_))));
        assert!(database.last_error().is_some());
    }
}
