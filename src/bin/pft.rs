use std::{error::Error, io, path::PathBuf, process::exit};

use clap::{Parser, Subcommand};

use pft::{App, Config, MonthYear, Transaction, config::DEFAULT_TIMEZONE, logging::setup_logging};

/// Track income, expenses and monthly budgets.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long, default_value = pft::db::DEFAULT_DB_PATH)]
    db_path: PathBuf,

    /// Canonical timezone name used for months and dates, e.g. "Asia/Taipei".
    #[arg(long, default_value = DEFAULT_TIMEZONE)]
    timezone: String,

    /// Append debug logs to this file.
    #[arg(long)]
    log_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new user.
    Register {
        username: String,
        email: String,
    },
    /// Record an expense, or income with `--income`.
    Add {
        username: String,
        amount: f64,
        description: String,
        category: String,
        #[arg(long)]
        income: bool,
    },
    /// List transactions, most recent first.
    List {
        username: String,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Delete a transaction by its ID.
    Delete { username: String, id: i64 },
    /// Set the budget for the current month, or the month given with `--month`.
    SetBudget {
        username: String,
        amount: f64,
        #[arg(long)]
        month: Option<MonthYear>,
    },
    /// Show the budget of every month.
    Budget { username: String },
    /// Compare spending against the budget for a month.
    Summary {
        username: String,
        #[arg(long)]
        month: Option<MonthYear>,
    },
    /// Choose a new password.
    ResetPassword { username: String },
}

impl Command {
    fn username(&self) -> &str {
        match self {
            Command::Register { username, .. }
            | Command::Add { username, .. }
            | Command::List { username, .. }
            | Command::Delete { username, .. }
            | Command::SetBudget { username, .. }
            | Command::Budget { username }
            | Command::Summary { username, .. }
            | Command::ResetPassword { username } => username,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    setup_logging(args.log_path.as_deref())?;

    let config = Config {
        db_path: args.db_path,
        timezone: args.timezone,
        log_path: args.log_path,
        ..Default::default()
    };
    let mut app = App::start(config)?;

    if let Command::Register { username, email } = &args.command {
        let Some(password) = prompt_new_password()? else {
            return Ok(());
        };
        app.register(username, email, &password)?;
        println!("Registered {username}.");
        return Ok(());
    }

    let username = args.command.username().to_owned();
    let password = rpassword::prompt_password(format!("Password for {username}: "))?;
    if let Err(error) = app.log_in(&username, &password) {
        print_error(error);
        exit(1);
    }

    match args.command {
        Command::Register { .. } => unreachable!("handled before logging in"),
        Command::Add {
            amount,
            description,
            category,
            income,
            ..
        } => {
            let transaction = Transaction::new(amount, &description, &category, !income);
            let stored = app.add_transaction(&username, &transaction)?;
            println!("Added #{} {}", stored.id, stored.formatted_amount());
        }
        Command::List { json, .. } => {
            let transactions = app.transactions(&username)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&transactions)?);
            } else {
                let offset = app.utc_offset();
                for transaction in transactions {
                    println!(
                        "{:>5}  {}  {:>12}  {:<12}  {}",
                        transaction.id,
                        transaction.formatted_date(offset),
                        transaction.formatted_amount(),
                        transaction.category,
                        transaction.description
                    );
                }
            }
        }
        Command::Delete { id, .. } => {
            app.delete_transaction(&username, id)?;
            println!("Deleted #{id}");
        }
        Command::SetBudget { amount, month, .. } => {
            app.set_budget(&username, month.as_ref(), amount)?;
            println!("Budget set to ${amount:.2}");
        }
        Command::Budget { .. } => {
            for budget in app.budgets(&username)? {
                println!("{}  ${:.2}", budget.month_year, budget.amount);
            }
        }
        Command::Summary { month, .. } => {
            let summary = app.summary(&username, month)?;
            println!("Month:     {}", summary.month_year);
            println!("Budget:    ${:.2}", summary.budget);
            println!("Expenses:  ${:.2}", summary.expenses);
            println!("Income:    ${:.2}", summary.income);
            println!("Remaining: ${:.2}", summary.remaining());
        }
        Command::ResetPassword { .. } => {
            let Some(new_password) = prompt_new_password()? else {
                return Ok(());
            };
            app.change_password(&username, &new_password)?;
            println!("Password updated successfully!");
        }
    }

    Ok(())
}

/// Ask for a new password twice until both entries match.
///
/// Returns `None` if stdin is closed.
fn prompt_new_password() -> io::Result<Option<String>> {
    loop {
        let first_password = match rpassword::prompt_password("Enter a new password: ") {
            Ok(string) => string,
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(error) => return Err(error),
        };

        if let Err(error) = pft::ValidatedPassword::new(&first_password) {
            print_error(error);
            continue;
        }

        let second_password = match rpassword::prompt_password("Enter the same password again: ")
        {
            Ok(string) => string,
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(error) => return Err(error),
        };

        if first_password != second_password {
            print_error("Passwords must match, try again.");
            continue;
        }

        return Ok(Some(first_password));
    }
}

fn print_error(error: impl ToString) {
    eprintln!(
        "\x1b[31;1m{}\x1b[0m",
        capitalise_first_char(&error.to_string())
    )
}

/// From https://crates.io/crates/capitalize
fn capitalise_first_char(string: &str) -> String {
    let mut chars = string.chars();
    let Some(first) = chars.next() else {
        return String::with_capacity(0);
    };
    first.to_uppercase().chain(chars).collect()
}
