//! Scenarios that go through a database file on disk.

use pft::{Database, Error, Transaction, User};
use tempfile::tempdir;
use time::UtcOffset;

fn register_alice(database: &mut Database) {
    let mut user = User::new("alice", "a@x.com");
    user.set_password("pw1", 4).unwrap();
    database.add_user(&user).unwrap();
}

#[test]
fn creates_missing_directory_and_file() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("data").join("PFT.db");

    let mut database = Database::connect(&db_path).unwrap();
    database.init_schema().unwrap();

    assert!(database.is_connected());
    assert!(db_path.is_file());
}

#[test]
fn data_survives_reopening() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("PFT.db");

    let mut database = Database::new(&db_path).with_utc_offset(UtcOffset::UTC);
    database.open().unwrap();
    database.init_schema().unwrap();
    register_alice(&mut database);
    database
        .add_transaction("alice", &Transaction::new(42.50, "coffee", "food", true))
        .unwrap();
    database.set_budget("alice", 300.0).unwrap();
    database.close();

    assert_eq!(database.get_user("alice"), Err(Error::NotConnected));

    database.open().unwrap();
    let user = database.get_user("alice").unwrap();
    let transactions = database.get_transactions("alice").unwrap();

    assert!(user.authenticate("pw1"));
    assert!(!user.authenticate("wrong"));
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].formatted_amount(), "-$42.50");
    assert_eq!(transactions[0].description, "coffee");
    assert_eq!(database.get_budget("alice"), Ok(300.0));
}

#[test]
fn failed_open_stays_disconnected() {
    let dir = tempdir().unwrap();
    let not_a_directory = dir.path().join("notes.txt");
    std::fs::write(&not_a_directory, "hello").unwrap();
    let mut database = Database::new(not_a_directory.join("PFT.db"));

    let result = database.open();

    assert!(matches!(result, Err(Error::ConnectionError(_))));
    assert!(!database.is_connected());
    assert!(database.last_error().is_some());
}

#[test]
fn injected_connection_is_used() {
    let connection = rusqlite::Connection::open_in_memory().unwrap();
    let mut database = Database::from_connection(connection).unwrap();

    database.init_schema().unwrap();
    register_alice(&mut database);

    assert_eq!(database.get_user("alice").unwrap().username(), "alice");
}

#[test]
fn injected_file_connection_reopens_same_file() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("PFT.db");
    let connection = rusqlite::Connection::open(&db_path).unwrap();
    let mut database = Database::from_connection(connection).unwrap();
    database.init_schema().unwrap();
    register_alice(&mut database);

    database.close();
    database.open().unwrap();

    assert!(database.is_connected());
    assert!(database.get_user("alice").unwrap().authenticate("pw1"));
}
