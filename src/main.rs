//! SoberUp - Command Line Entry Point
//!
//! Headless companion for the SoberUp app: sign in, keep the weekly usage
//! goal in sync and check progress.

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use soberup_client::{commands, config::Config, logging, AppState};

#[derive(Parser)]
#[command(name = "soberup", version, about = "SoberUp companion client")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with phone number and password
    Login {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        password: String,
    },
    /// Sign out and forget stored tokens
    Logout,
    /// Show the current session
    Status,
    /// Show or change the weekly usage goal
    Goal {
        #[command(subcommand)]
        action: GoalAction,
    },
    /// Manage contacts
    Contact {
        #[command(subcommand)]
        action: ContactAction,
    },
    /// Show this week's progress against the goal
    Progress {
        /// Monday of the week to show (YYYY-MM-DD)
        #[arg(long)]
        week_start: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum GoalAction {
    Show,
    /// Set the goal in minutes per week
    Set { minutes: u32 },
}

#[derive(Subcommand)]
enum ContactAction {
    /// Add a contact by phone number
    Add { phone: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;

    let _log_guard = logging::init(&config.log_dir());
    info!("SoberUp client starting against {}", config.api_url);

    let state = AppState::open(&config).await.context("failed to initialize")?;
    state
        .session
        .bootstrap()
        .await
        .context("session bootstrap did not finish")?;

    match cli.command {
        Command::Login { phone, password } => {
            let result = commands::sign_in(&state, &phone, &password).await;
            if cli.json {
                print_json(&result)?;
            } else if let Some(error) = &result.error {
                bail!("{error}");
            } else {
                println!("Signed in as {}", result.user_id.as_deref().unwrap_or("unknown user"));
            }
        }
        Command::Logout => {
            commands::logout(&state).await.map_err(anyhow::Error::msg)?;
            if !cli.json {
                println!("Signed out");
            }
        }
        Command::Status => {
            let session = commands::get_session(&state);
            if cli.json {
                print_json(&session)?;
            } else {
                match session {
                    Some(s) => println!(
                        "Signed in as {} ({})",
                        s.user_id.as_deref().unwrap_or("unknown user"),
                        s.state
                    ),
                    None => println!("Not signed in"),
                }
            }
        }
        Command::Goal { action } => {
            let result = match action {
                GoalAction::Show => commands::load_goal(&state).await,
                GoalAction::Set { minutes } => commands::save_goal(&state, minutes).await,
            };
            report(&result, cli.json, |user| {
                format!(
                    "Weekly goal: {}h {}m",
                    user.usage_goal_minutes / 60,
                    user.usage_goal_minutes % 60
                )
            })?;
        }
        Command::Contact {
            action: ContactAction::Add { phone },
        } => {
            let result = commands::add_contact(&state, &phone).await;
            report(&result, cli.json, |user| format!("Added {} ({})", user.name, user.phone_number))?;
        }
        Command::Progress { week_start } => {
            let result = commands::weekly_progress(&state, week_start).await;
            report(&result, cli.json, |progress| {
                format!(
                    "{:.1}% of {} minutes used ({} min)",
                    progress.percent,
                    progress.goal_minutes,
                    progress.total_ms / 60_000
                )
            })?;
        }
    }

    Ok(())
}

fn report<T: Serialize>(
    result: &commands::CommandResult<T>,
    json: bool,
    describe: impl Fn(&T) -> String,
) -> anyhow::Result<()> {
    if json {
        return print_json(result);
    }
    if !result.signed_in && !result.success {
        bail!("Not signed in. Run `soberup login` first.");
    }
    if let Some(error) = &result.error {
        bail!("{error}");
    }
    match &result.data {
        Some(data) => println!("{}", describe(data)),
        None => println!("Nothing to show"),
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
