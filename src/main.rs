use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};

use crate::history::RideList;
use crate::portal::http::ReqwestTransport;
use crate::session::{Session, SessionState};
use crate::stats::{HistoryStats, Metric};

mod changes;
mod history;
mod portal;
mod session;
mod stats;
mod store;

#[derive(Parser)]
#[command(name = "hsl-citybike", about = "City-bike account client for the HSL portal")]
struct App {
    #[arg(long = "data-dir", env = "CITYBIKE_DATA_DIR")]
    /// Directory for the persisted cookies and the remembered login
    /// name. Defaults to the platform data directory.
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the session state and account fields.
    Status,
    /// Sign in to the portal and remember the session.
    Login {
        #[arg(long, env = "CITYBIKE_USERNAME")]
        username: Option<String>,
    },
    /// Sign out and drop the persisted session.
    Logout,
    /// List rides from the history.
    History {
        #[arg(long)]
        year: Option<i32>,
        /// Month number, 1-12.
        #[arg(long)]
        month: Option<u32>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Monthly totals over the ride history.
    Stats {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long, value_enum, default_value = "distance")]
        metric: MetricArg,
    },
    /// Poll the session and show an open ride's progress live.
    Watch,
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricArg {
    Rides,
    Distance,
    Duration,
}

impl From<MetricArg> for Metric {
    fn from(arg: MetricArg) -> Metric {
        match arg {
            MetricArg::Rides => Metric::Rides,
            MetricArg::Distance => Metric::Distance,
            MetricArg::Duration => Metric::Duration,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let app = App::parse();
    let data_dir = app
        .data_dir
        .clone()
        .or_else(|| dirs::data_dir().map(|dir| dir.join("hsl-citybike")));

    let mut session = Session::new(ReqwestTransport::new()?);
    session.set_data_dir(data_dir).await;
    session.take_changes();

    match app.command {
        Command::Status => print_status(&session),
        Command::Login { username } => run_login(&mut session, username).await?,
        Command::Logout => {
            session.log_out().await;
            match session.state() {
                SessionState::Unauthorized => println!("Signed out."),
                state => println!("Sign-out did not complete (state {state:?})."),
            }
        }
        Command::History { year, month, limit } => {
            require_history(&session)?;
            print_history(&session, year, month, limit);
        }
        Command::Stats { year, metric } => {
            require_history(&session)?;
            print_stats(&session, year, metric.into());
        }
        Command::Watch => {
            require_history(&session)?;
            watch(&mut session).await;
        }
    }

    Ok(())
}

async fn run_login(
    session: &mut Session<ReqwestTransport>,
    username: Option<String>,
) -> anyhow::Result<()> {
    if session.state() == SessionState::Ready {
        println!("Already signed in as {}.", session.full_name());
        return Ok(());
    }

    let mut editor = rustyline::DefaultEditor::new()?;
    let username = match username {
        Some(username) => username,
        None => {
            let saved = session.login().to_owned();
            let prompt = if saved.is_empty() {
                "Username: ".to_owned()
            } else {
                format!("Username [{saved}]: ")
            };
            let line = editor.readline(&prompt)?;
            let line = line.trim();
            if line.is_empty() {
                saved
            } else {
                line.to_owned()
            }
        }
    };
    anyhow::ensure!(!username.is_empty(), "a username is required");
    let password = SecretString::from(editor.readline("Password: ")?.trim().to_owned());

    session.sign_in(&username, password.expose_secret()).await;

    match session.state() {
        SessionState::Ready => {
            println!("Signed in as {}.", session.full_name());
            Ok(())
        }
        SessionState::LoginFailed => {
            let message = session.error_text();
            if message.is_empty() {
                anyhow::bail!("the portal rejected the sign-in");
            }
            anyhow::bail!("the portal rejected the sign-in: {message}");
        }
        state => {
            anyhow::bail!(
                "sign-in did not complete (state {state:?}, HTTP {})",
                session.http_error()
            )
        }
    }
}

fn require_history(session: &Session<ReqwestTransport>) -> anyhow::Result<()> {
    match session.state() {
        SessionState::Ready => Ok(()),
        SessionState::Unauthorized => {
            anyhow::bail!("not signed in; run `hsl-citybike login` first")
        }
        state => anyhow::bail!(
            "session is not ready (state {state:?}, HTTP {})",
            session.http_error()
        ),
    }
}

fn print_status(session: &Session<ReqwestTransport>) {
    println!("State:        {:?}", session.state());
    if !session.full_name().is_empty() {
        println!("Name:         {}", session.full_name());
    }
    if !session.login().is_empty() {
        println!("Login:        {}", session.login());
    }
    if !session.card().is_empty() {
        println!("Card:         {}", session.card());
        println!("Tag id:       {}", session.tag_id());
    }
    if let Some(updated) = session.last_update() {
        println!("Last update:  {}", updated.format("%Y-%m-%d %H:%M:%S"));
    }
    if !session.years().is_empty() {
        let years: Vec<String> = session.years().iter().map(i32::to_string).collect();
        println!("Years:        {}", years.join(", "));
        if session.last_year() < session.this_year() {
            println!("              (no rides yet in {})", session.this_year());
        }
    }
    println!("Rides:        {}", session.history().len());
    if session.ride_in_progress() {
        println!(
            "Ride open:    {}",
            stats::format(session.ride_duration() as u64, Metric::Duration)
        );
    }
    if session.http_error() != 0 {
        println!("HTTP error:   {}", session.http_error());
    }
    if !session.error_text().is_empty() {
        println!("Error:        {}", session.error_text());
    }
}

fn print_history(
    session: &Session<ReqwestTransport>,
    year: Option<i32>,
    month: Option<u32>,
    limit: Option<usize>,
) {
    let mut list = RideList::new();
    list.set_year(year);
    list.set_month(month);
    list.set_max_count(limit);
    list.set_history(session.history());
    list.tick(Utc::now());

    for ride in list.rows() {
        let departure = ride
            .departure_date
            .map(|date| date.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "????-??-?? --:--".to_owned());
        let route = if ride.return_station.is_empty() {
            format!("{} → (riding)", ride.departure_station)
        } else {
            format!("{} → {}", ride.departure_station, ride.return_station)
        };
        println!(
            "{departure}  {route}  {}  {}  bike {}",
            stats::format(ride.distance as u64, Metric::Distance),
            stats::format(ride.duration as u64, Metric::Duration),
            ride.bike
        );
    }
    println!("{} ride(s)", list.rows().len());
}

fn print_stats(session: &Session<ReqwestTransport>, year: Option<i32>, metric: Metric) {
    let mut totals = HistoryStats::new();
    totals.set_mode(metric);
    totals.set_year(year);
    totals.set_history(session.history());

    let unit = stats::step(totals.max_value(), 24, metric);
    for month in 1..=12u32 {
        let value = totals.month_total(month, metric);
        if value == 0 {
            continue;
        }
        let name = chrono::Month::try_from(month as u8)
            .map(|m| m.name())
            .unwrap_or("?");
        let bar = if unit > 0 {
            "#".repeat((value / unit) as usize)
        } else {
            String::new()
        };
        println!("{name:<10} {:<24} {}", bar, totals.format_month_total(month));
    }
    match year {
        Some(year) => println!("Total {year}: {}", stats::format(totals.total(), metric)),
        None => println!("Total: {}", stats::format(totals.total(), metric)),
    }
}

/// Keeps an open ride's duration on screen, refreshing the history
/// every few minutes to notice new rides and the open one closing.
async fn watch(session: &mut Session<ReqwestTransport>) {
    const REFRESH_EVERY_SECS: u32 = 300;

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    let mut elapsed = 0u32;
    loop {
        ticker.tick().await;
        elapsed += 1;
        if elapsed % REFRESH_EVERY_SECS == 0 {
            session.refresh().await;
        }
        session.tick(Utc::now());

        let mut ride_changed = false;
        session.take_changes().drain(|change| {
            use crate::session::SessionChange;
            if matches!(
                change,
                SessionChange::RideDuration | SessionChange::RideInProgress
            ) {
                ride_changed = true;
            }
        });
        if ride_changed {
            if session.ride_in_progress() {
                println!(
                    "Ride open: {}",
                    stats::format(session.ride_duration() as u64, Metric::Duration)
                );
            } else {
                println!("No ride in progress.");
            }
        }
    }
}
