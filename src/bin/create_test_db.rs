use std::error::Error;
use std::path::Path;
use std::process::exit;

use clap::Parser;
use time::{Duration, OffsetDateTime, UtcOffset};

use pft::{Database, MonthYear, Transaction, User};

/// A utility for creating a test database for pft.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to save the SQLite database to.
    #[arg(long, short)]
    output_path: String,
}

/// Create and populate a database for manual testing.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let output_path = Path::new(&args.output_path);

    match output_path.extension() {
        None => {
            eprintln!("Output path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        Some(extension) if extension.is_empty() => {
            eprintln!("Output path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        _ => {}
    }

    if output_path.is_file() {
        eprintln!("File already exists at {output_path:#?}!");
        exit(1);
    }

    println!("Creating database at {output_path:#?}");
    let mut database = Database::connect(output_path)?.with_utc_offset(UtcOffset::UTC);
    database.init_schema()?;

    println!("Creating test user...");

    let mut user = User::new("test", "test@example.com").with_display_name("Test User");
    user.set_password("test", pft::PasswordHash::DEFAULT_COST)?;
    database.add_user(&user)?;

    println!("Creating transactions...");

    let now = OffsetDateTime::now_utc();
    let samples = [
        (3200.0, "Salary", "income", false),
        (1200.0, "Rent", "housing", true),
        (85.4, "Groceries", "food", true),
        (4.5, "Coffee", "food", true),
        (42.0, "Electricity", "utilities", true),
    ];

    for (days_ago, (amount, description, category, is_expense)) in samples.into_iter().enumerate() {
        let date = now - Duration::days(days_ago as i64 * 3);
        let transaction = Transaction::new(amount, description, category, is_expense).with_date(date);
        database.add_transaction("test", &transaction)?;
    }

    database.set_budget_for_month("test", &MonthYear::current(UtcOffset::UTC), 2000.0)?;

    database.close();

    println!("Success!");

    Ok(())
}
