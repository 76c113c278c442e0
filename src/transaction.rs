//! Defines the transaction model and its database queries.

use rusqlite::{Connection, Row};
use serde::Serialize;
use time::{OffsetDateTime, UtcOffset};

use crate::{
    Error,
    budget::MonthYear,
    db::timestamp_from_column,
    timezone::system_offset,
    user::UserID,
};

/// Alias for the integer type used for transaction IDs.
pub type TransactionId = i64;

// ============================================================================
// MODELS
// ============================================================================

/// An expense or income, i.e. an event where money was either spent or earned.
///
/// The amount is always positive, [Transaction::is_expense] says which way the
/// money moved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    /// The ID of the transaction, zero until it has been stored.
    pub id: TransactionId,
    /// The ID of the user that owns the transaction, zero until ownership is known.
    pub user_id: i64,
    /// The amount of money spent or earned in this transaction.
    pub amount: f64,
    /// A text description of what the transaction was for.
    pub description: String,
    /// The category of the transaction, e.g. "food", "rent", "salary".
    pub category: String,
    /// When the transaction happened.
    #[serde(with = "time::serde::timestamp")]
    pub date: OffsetDateTime,
    /// Whether money was spent (`true`) or earned (`false`).
    pub is_expense: bool,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            id: 0,
            user_id: 0,
            amount: 0.0,
            description: String::new(),
            category: String::new(),
            date: OffsetDateTime::now_utc(),
            is_expense: true,
        }
    }
}

impl Transaction {
    /// Create a transaction dated now that does not belong to a user yet.
    ///
    /// The owner is filled in when the transaction is added for a username.
    pub fn new(amount: f64, description: &str, category: &str, is_expense: bool) -> Self {
        Self {
            amount,
            description: description.to_owned(),
            category: category.to_owned(),
            is_expense,
            ..Default::default()
        }
    }

    /// Create a transaction dated now for the user `user_id`.
    pub fn for_user(
        user_id: UserID,
        amount: f64,
        description: &str,
        category: &str,
        is_expense: bool,
    ) -> Self {
        Self {
            user_id: user_id.as_i64(),
            ..Self::new(amount, description, category, is_expense)
        }
    }

    /// Set the date of the transaction.
    pub fn with_date(mut self, date: OffsetDateTime) -> Self {
        self.date = date;
        self
    }

    /// Whether the transaction can be stored: a positive finite amount, a description,
    /// a category and an owner.
    pub fn is_valid(&self) -> bool {
        self.has_valid_details() && self.user_id > 0
    }

    /// The checks of [Transaction::is_valid] that do not depend on ownership.
    fn has_valid_details(&self) -> bool {
        self.amount.is_finite()
            && self.amount > 0.0
            && !self.description.is_empty()
            && !self.category.is_empty()
    }

    /// The amount with its direction, e.g. "-$42.50" for an expense or "+$42.50" for income.
    pub fn formatted_amount(&self) -> String {
        let sign = if self.is_expense { '-' } else { '+' };

        format!("{sign}${:.2}", self.amount)
    }

    /// The date as "YYYY-MM-DD HH:MM" in the timezone `offset`.
    pub fn formatted_date(&self, offset: UtcOffset) -> String {
        let date = self.date.to_offset(offset);

        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}",
            date.year(),
            u8::from(date.month()),
            date.day(),
            date.hour(),
            date.minute()
        )
    }

    /// The date as "YYYY-MM-DD HH:MM" in the local timezone of this machine.
    pub fn formatted_local_date(&self) -> String {
        self.formatted_date(system_offset())
    }
}

/// Totals for one user and month, compared against that month's budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySummary {
    /// The month being summarised.
    pub month_year: MonthYear,
    /// The budget for the month, zero if none was set.
    pub budget: f64,
    /// The sum of all expenses in the month.
    pub expenses: f64,
    /// The sum of all income in the month.
    pub income: f64,
}

impl MonthlySummary {
    /// How much of the budget is left after expenses. Negative when overspent.
    pub fn remaining(&self) -> f64 {
        self.budget - self.expenses
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the transaction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                amount REAL NOT NULL,
                description TEXT NOT NULL,
                category TEXT NOT NULL,
                date INTEGER NOT NULL,
                is_expense INTEGER NOT NULL DEFAULT 1,
                FOREIGN KEY(user_id) REFERENCES users(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    // Listing a user's transactions newest first is the hot path.
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_user_date ON transactions(user_id, date);",
        (),
    )?;

    Ok(())
}

/// Store `transaction` and return it with the ID the database assigned.
///
/// The caller must have set `transaction.user_id`.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidTransaction] if the transaction fails [Transaction::is_valid],
/// - [Error::UnknownUserId] if `user_id` does not refer to a user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_transaction(
    transaction: &Transaction,
    connection: &Connection,
) -> Result<Transaction, Error> {
    if !transaction.is_valid() {
        return Err(Error::InvalidTransaction);
    }

    connection
        .prepare(
            "INSERT INTO transactions (user_id, amount, description, category, date, is_expense)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             RETURNING id, user_id, amount, description, category, date, is_expense",
        )?
        .query_row(
            (
                transaction.user_id,
                transaction.amount,
                &transaction.description,
                &transaction.category,
                transaction.date.unix_timestamp(),
                transaction.is_expense,
            ),
            map_transaction_row,
        )
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: _,
                    extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY,
                },
                _,
            ) => Error::UnknownUserId(transaction.user_id),
            error => error.into(),
        })
}

/// Retrieve all transactions of the user `user_id`, most recent first.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn get_transactions_by_user(
    user_id: UserID,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, amount, description, category, date, is_expense
             FROM transactions WHERE user_id = :user_id
             ORDER BY date DESC, id DESC",
        )?
        .query_map(&[(":user_id", &user_id.as_i64())], map_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::from))
        .collect()
}

/// Overwrite the amount, description, category, date and direction of the
/// stored transaction with the same ID as `transaction`.
///
/// The owner of a stored transaction never changes.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidTransaction] if the new details are invalid,
/// - [Error::UpdateMissingTransaction] if there is no transaction with that ID,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_transaction(transaction: &Transaction, connection: &Connection) -> Result<(), Error> {
    if !transaction.has_valid_details() {
        return Err(Error::InvalidTransaction);
    }

    let rows_affected = connection.execute(
        "UPDATE transactions
         SET amount = ?1, description = ?2, category = ?3, date = ?4, is_expense = ?5
         WHERE id = ?6",
        (
            transaction.amount,
            &transaction.description,
            &transaction.category,
            transaction.date.unix_timestamp(),
            transaction.is_expense,
            transaction.id,
        ),
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingTransaction);
    }

    Ok(())
}

/// Delete the transaction with `id`.
///
/// # Errors
/// Returns [Error::DeleteMissingTransaction] if there is no transaction with that ID.
pub fn delete_transaction(id: TransactionId, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection.execute("DELETE FROM transactions WHERE id = ?1", (id,))?;

    if rows_affected == 0 {
        return Err(Error::DeleteMissingTransaction);
    }

    Ok(())
}

/// Sum the expenses and income of `user_id` dated within `month_year` in the timezone `offset`.
///
/// Returns `(expenses, income)`.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn sum_transactions_in_month(
    user_id: UserID,
    month_year: &MonthYear,
    offset: UtcOffset,
    connection: &Connection,
) -> Result<(f64, f64), Error> {
    let (start, end) = month_year.date_range(offset);

    connection
        .query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN is_expense THEN amount ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN is_expense THEN 0 ELSE amount END), 0)
             FROM transactions
             WHERE user_id = ?1 AND date >= ?2 AND date < ?3",
            (
                user_id.as_i64(),
                start.unix_timestamp(),
                end.unix_timestamp(),
            ),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|error| error.into())
}

/// Map a database row to a Transaction.
pub fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    let id = row.get(0)?;
    let user_id = row.get(1)?;
    let amount = row.get(2)?;
    let description = row.get(3)?;
    let category = row.get(4)?;
    let date = timestamp_from_column(5, row.get(5)?)?;
    let is_expense = row.get(6)?;

    Ok(Transaction {
        id,
        user_id,
        amount,
        description,
        category,
        date,
        is_expense,
    })
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod database_tests {
    use rusqlite::Connection;
    use time::{UtcOffset, macros::datetime};

    use crate::{
        Error,
        budget::MonthYear,
        db::initialize,
        transaction::{
            Transaction, TransactionId, create_transaction, delete_transaction,
            get_transactions_by_user, map_transaction_row, sum_transactions_in_month,
            update_transaction,
        },
        user::{User, UserID, create_user},
    };

    fn get_transaction(id: TransactionId, conn: &Connection) -> Result<Transaction, Error> {
        conn.query_row(
            "SELECT id, user_id, amount, description, category, date, is_expense
             FROM transactions WHERE id = ?1",
            (id,),
            map_transaction_row,
        )
        .map_err(Error::from)
    }

    fn count_transactions(conn: &Connection) -> Result<u32, Error> {
        conn.query_row("SELECT COUNT(id) FROM transactions;", [], |row| row.get(0))
            .map_err(Error::from)
    }

    fn get_test_connection() -> (Connection, UserID) {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        let mut user = User::new("alice", "a@x.com");
        user.set_password("pw1", 4).unwrap();
        let user_id = create_user(&user, &conn).unwrap();

        (conn, user_id)
    }

    #[test]
    fn create_succeeds() {
        let (conn, user_id) = get_test_connection();
        let amount = 12.3;

        let result = create_transaction(
            &Transaction::for_user(user_id, amount, "lunch", "food", true),
            &conn,
        );

        match result {
            Ok(transaction) => {
                assert!(transaction.id > 0);
                assert_eq!(transaction.amount, amount);
                assert_eq!(transaction.user_id, user_id.as_i64());
            }
            Err(error) => panic!("Unexpected error: {error}"),
        }
    }

    #[test]
    fn create_fails_on_invalid_transaction() {
        let (conn, user_id) = get_test_connection();

        let result = create_transaction(
            &Transaction::for_user(user_id, 12.3, "", "food", true),
            &conn,
        );

        assert_eq!(result, Err(Error::InvalidTransaction));
        assert_eq!(count_transactions(&conn), Ok(0));
    }

    #[test]
    fn create_fails_on_unknown_user_id() {
        let (conn, _) = get_test_connection();

        let result = create_transaction(
            &Transaction::for_user(UserID::new(42), 12.3, "lunch", "food", true),
            &conn,
        );

        assert_eq!(result, Err(Error::UnknownUserId(42)));
    }

    #[test]
    fn lists_newest_first() {
        let (conn, user_id) = get_test_connection();
        for (day, description) in [(3, "b"), (1, "a"), (5, "c")] {
            let date = datetime!(2025-01-01 12:00 UTC).replace_day(day).unwrap();
            create_transaction(
                &Transaction::for_user(user_id, 1.0, description, "misc", true).with_date(date),
                &conn,
            )
            .unwrap();
        }

        let descriptions: Vec<String> = get_transactions_by_user(user_id, &conn)
            .unwrap()
            .into_iter()
            .map(|transaction| transaction.description)
            .collect();

        assert_eq!(descriptions, ["c", "b", "a"]);
    }

    #[test]
    fn update_changes_details() {
        let (conn, user_id) = get_test_connection();
        let mut transaction = create_transaction(
            &Transaction::for_user(user_id, 12.3, "lunch", "food", true),
            &conn,
        )
        .unwrap();
        transaction.amount = 99.0;
        transaction.is_expense = false;
        transaction.category = "refund".to_owned();

        update_transaction(&transaction, &conn).unwrap();

        assert_eq!(get_transaction(transaction.id, &conn), Ok(transaction));
    }

    #[test]
    fn update_fails_on_missing_transaction() {
        let (conn, user_id) = get_test_connection();
        let mut transaction = Transaction::for_user(user_id, 12.3, "lunch", "food", true);
        transaction.id = 1337;

        assert_eq!(
            update_transaction(&transaction, &conn),
            Err(Error::UpdateMissingTransaction)
        );
    }

    #[test]
    fn delete_removes_transaction() {
        let (conn, user_id) = get_test_connection();
        let transaction = create_transaction(
            &Transaction::for_user(user_id, 12.3, "lunch", "food", true),
            &conn,
        )
        .unwrap();

        delete_transaction(transaction.id, &conn).unwrap();

        assert_eq!(get_transaction(transaction.id, &conn), Err(Error::NotFound));
        assert_eq!(
            delete_transaction(transaction.id, &conn),
            Err(Error::DeleteMissingTransaction)
        );
    }

    #[test]
    fn sums_only_transactions_in_month() {
        let (conn, user_id) = get_test_connection();
        let rows = [
            (datetime!(2025-01-31 23:59 UTC), 10.0, true),
            (datetime!(2025-02-01 0:00 UTC), 20.0, true),
            (datetime!(2025-02-14 12:00 UTC), 5.5, true),
            (datetime!(2025-02-15 12:00 UTC), 100.0, false),
            (datetime!(2025-03-01 0:00 UTC), 40.0, true),
        ];
        for (date, amount, is_expense) in rows {
            create_transaction(
                &Transaction::for_user(user_id, amount, "x", "y", is_expense).with_date(date),
                &conn,
            )
            .unwrap();
        }
        let month: MonthYear = "2025-02".parse().unwrap();

        let totals = sum_transactions_in_month(user_id, &month, UtcOffset::UTC, &conn);

        assert_eq!(totals, Ok((25.5, 100.0)));
    }

    #[test]
    fn sums_are_zero_without_transactions() {
        let (conn, user_id) = get_test_connection();
        let month: MonthYear = "2025-02".parse().unwrap();

        let totals = sum_transactions_in_month(user_id, &month, UtcOffset::UTC, &conn);

        assert_eq!(totals, Ok((0.0, 0.0)));
    }
}
