use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use reviewdash::api::{
    CoverageFilter, MergeRequestReview, PushReview, ReviewFilter, ReviewKind, StatType, StatsFilter, Timestamp, logs,
    reviews,
};
use reviewdash::config::{DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS};
use reviewdash::format;
use reviewdash::gateway::Notifier;
use reviewdash::router::HistoryNavigator;
use reviewdash::session::LoginRequest;
use reviewdash::storage::FileStorage;
use reviewdash::{ApiError, App, AppServices, ClientConfig};
use serde::Serialize;
use serde_json::{Value, json};
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("not logged in; run `reviewdash login` first")]
    NotLoggedIn,
    #[error("session expired; run `reviewdash login` again")]
    SessionExpired,
    #[error("unknown statistics type: {0}")]
    UnknownStatType(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "reviewdash", about = "Code review dashboard client")]
struct Cli {
    #[arg(long, env = "REVIEWDASH_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, env = "REVIEWDASH_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    timeout_secs: u64,

    #[arg(long, env = "REVIEWDASH_CONNECT_TIMEOUT_SECS", default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout_secs: u64,

    #[arg(long, env = "REVIEWDASH_STATE_DIR", help = "Session storage directory [default: ~/.reviewdash]")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the session token.
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "REVIEWDASH_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, help = "Keep the token for this invocation only")]
        no_remember: bool,
    },
    Logout,
    /// Show the restored session.
    Status,
    /// Check the stored token with the backend.
    Verify,
    Reviews {
        kind: KindArg,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, help = "Print a compact table instead of JSON")]
        table: bool,
    },
    Stats(StatsCommand),
    Metadata(StatsArgs),
    /// Timestamp-filtered review logs.
    Logs {
        kind: KindArg,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, help = "Fetch every matching row, ignoring pagination")]
        all: bool,
    },
    Projects,
    Authors,
    /// Dashboard configuration.
    Config,
    /// Developers without reviewed activity.
    Unreviewed {
        #[arg(long)]
        time_range: Option<String>,
        #[arg(long)]
        start_time: Option<i64>,
        #[arg(long)]
        end_time: Option<i64>,
    },
    /// Run the navigation guard for a route and print where it lands.
    Open { path: String },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum KindArg {
    Mr,
    Push,
}

impl From<KindArg> for ReviewKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Mr => Self::MergeRequest,
            KindArg::Push => Self::Push,
        }
    }
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    #[arg(long, help = "YYYY-MM-DD")]
    start_date: Option<String>,
    #[arg(long, help = "YYYY-MM-DD")]
    end_date: Option<String>,
    #[arg(long = "author")]
    authors: Vec<String>,
    #[arg(long = "project")]
    projects: Vec<String>,
    #[arg(long)]
    page: Option<NonZeroU32>,
    #[arg(long)]
    page_size: Option<NonZeroU32>,
}

impl FilterArgs {
    fn into_filter(self) -> ReviewFilter {
        ReviewFilter {
            start_date: self.start_date,
            end_date: self.end_date,
            authors: self.authors,
            project_names: self.projects,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[derive(Args, Debug)]
struct StatsCommand {
    #[command(subcommand)]
    command: StatsSubcommand,
}

#[derive(Subcommand, Debug)]
enum StatsSubcommand {
    Projects(StatsArgs),
    Authors(StatsArgs),
    /// One named aggregate, e.g. `author_code_lines`.
    Raw {
        stat_type: String,
        #[command(flatten)]
        args: StatsArgs,
    },
}

#[derive(Args, Debug, Default)]
struct StatsArgs {
    #[arg(long, help = "YYYY-MM-DD [default: 7 days ago]")]
    start_date: Option<String>,
    #[arg(long, help = "YYYY-MM-DD [default: today]")]
    end_date: Option<String>,
    #[arg(long = "type")]
    kind: Option<KindArg>,
}

impl StatsArgs {
    /// Without explicit dates the dashboard shows the last seven days.
    fn into_filter(self, today: time::Date) -> StatsFilter {
        let (start_date, end_date) = match (self.start_date, self.end_date) {
            (None, None) => {
                let (start, end) = format::default_date_range(today);
                (Some(start), Some(end))
            }
            other => other,
        };
        StatsFilter { start_date, end_date, kind: self.kind.map(ReviewKind::from) }
    }
}

/// Notifications go to stderr so stdout stays machine-readable.
struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::new(&cli.base_url)?.with_timeout(Duration::from_secs(cli.timeout_secs));
    config.connect_timeout = Duration::from_secs(cli.connect_timeout_secs);
    if let Some(dir) = cli.state_dir {
        config = config.with_state_dir(dir);
    }

    let services = AppServices {
        storage: Arc::new(FileStorage::new(config.state_dir.clone())),
        navigator: Arc::new(HistoryNavigator::new(&start_path(&cli.command, &config))),
        notifier: Arc::new(StderrNotifier),
    };
    let app = App::start(config, services)?;
    run(&app, cli.command).await
}

/// Where the user "is" while a command runs. Login-related commands sit on
/// the login route so a 401 there never counts as an expired session.
fn start_path(command: &Command, config: &ClientConfig) -> String {
    match command {
        Command::Login { .. } | Command::Logout | Command::Status | Command::Verify => config.login_path.clone(),
        Command::Open { .. } => "/".to_owned(),
        _ => config.landing_path.clone(),
    }
}

/// Route backing each data command; the guard must let us in first.
fn page_for(command: &Command) -> Option<&'static str> {
    match command {
        Command::Reviews { kind: KindArg::Mr, .. } | Command::Logs { kind: KindArg::Mr, .. } => {
            Some("/admin/reviews/mr")
        }
        Command::Reviews { kind: KindArg::Push, .. } | Command::Logs { kind: KindArg::Push, .. } => {
            Some("/admin/reviews/push")
        }
        Command::Stats(_) | Command::Metadata(_) => Some("/admin/statistics"),
        Command::Config => Some("/admin/settings"),
        Command::Projects | Command::Authors | Command::Unreviewed { .. } => Some("/admin/dashboard"),
        Command::Login { .. } | Command::Logout | Command::Status | Command::Verify | Command::Open { .. } => None,
    }
}

async fn run(app: &App, command: Command) -> Result<(), CliError> {
    if let Some(page) = page_for(&command) {
        let landed = app.router().navigate(page).await;
        tracing::debug!(page, landed = %landed, "guarded page");
        if landed == app.config().login_path {
            return Err(CliError::NotLoggedIn);
        }
    }

    let result = dispatch(app, command).await;
    match result {
        Err(CliError::Api(ApiError::Unauthorized { .. })) => Err(CliError::SessionExpired),
        other => other,
    }
}

async fn dispatch(app: &App, command: Command) -> Result<(), CliError> {
    let gateway = app.gateway();
    let today = OffsetDateTime::now_utc().date();

    match command {
        Command::Login { username, password, no_remember } => {
            let request = LoginRequest { remember: !no_remember, ..LoginRequest::new(username, password) };
            let user = app.auth().login(request).await?;
            let landed = app.router().navigate(&app.config().landing_path).await;
            print_json(&json!({ "user": user.username, "route": landed }))
        }
        Command::Logout => {
            app.auth().restore_auth().await;
            let session = app.auth().logout().await;
            print_json(&session_json(&session))
        }
        Command::Status => {
            let session = app.auth().restore_auth().await;
            print_json(&session_json(&session))
        }
        Command::Verify => {
            app.auth().restore_auth().await;
            if app.session().token().await.is_none() {
                return Err(CliError::NotLoggedIn);
            }
            let response = app.auth().verify_token().await?;
            print_json(&json!({
                "success": response.success.unwrap_or(true),
                "user": response.user.map(|u| u.username),
            }))
        }
        Command::Reviews { kind, filter, table } => {
            let filter = filter.into_filter();
            match kind {
                KindArg::Mr => {
                    let page = reviews::mr_reviews(gateway, &filter).await?;
                    if table {
                        print_mr_table(&page.data);
                        return Ok(());
                    }
                    print_serialized(&page)
                }
                KindArg::Push => {
                    let page = reviews::push_reviews(gateway, &filter).await?;
                    if table {
                        print_push_table(&page.data);
                        return Ok(());
                    }
                    print_serialized(&page)
                }
            }
        }
        Command::Stats(stats) => match stats.command {
            StatsSubcommand::Projects(args) => {
                print_serialized(&reviews::project_statistics(gateway, &args.into_filter(today)).await?)
            }
            StatsSubcommand::Authors(args) => {
                print_serialized(&reviews::author_statistics(gateway, &args.into_filter(today)).await?)
            }
            StatsSubcommand::Raw { stat_type, args } => {
                let stat = StatType::parse(&stat_type).ok_or(CliError::UnknownStatType(stat_type))?;
                let filter = args.into_filter(today);
                print_serialized(&reviews::statistics(gateway, stat, Some(&filter)).await?)
            }
        },
        Command::Metadata(args) => print_serialized(&reviews::metadata(gateway, &args.into_filter(today)).await?),
        Command::Logs { kind, filter, all } => {
            let filter = filter.into_filter();
            match (kind, all) {
                (KindArg::Mr, false) => print_serialized(&logs::mr_logs(gateway, &filter).await?),
                (KindArg::Mr, true) => print_serialized(&logs::all_mr_logs(gateway, &filter).await?),
                (KindArg::Push, false) => print_serialized(&logs::push_logs(gateway, &filter).await?),
                (KindArg::Push, true) => print_serialized(&logs::all_push_logs(gateway, &filter).await?),
            }
        }
        Command::Projects => print_serialized(&logs::projects(gateway).await?),
        Command::Authors => print_serialized(&logs::authors(gateway).await?),
        Command::Config => print_serialized(&logs::dashboard_config(gateway).await?),
        Command::Unreviewed { time_range, start_time, end_time } => {
            let filter = CoverageFilter { time_range, start_time, end_time };
            print_serialized(&logs::users_without_review(gateway, &filter).await?)
        }
        Command::Open { path } => {
            let landed = app.router().navigate(&path).await;
            let session = app.session().snapshot().await;
            print_json(&json!({ "requested": path, "route": landed, "authenticated": session.is_authenticated }))
        }
    }
}

fn session_json(session: &reviewdash::session::Session) -> Value {
    json!({
        "phase": format!("{:?}", session.phase()),
        "authenticated": session.is_authenticated,
        "user": session.user.as_ref().map(|u| u.username.clone()),
        "remember": session.remember,
    })
}

fn print_mr_table(rows: &[MergeRequestReview]) {
    for row in rows {
        print_row(&row.updated_at, &row.project_name, &row.author, row.score, row.additions, row.deletions, &row.commit_messages);
    }
}

fn print_push_table(rows: &[PushReview]) {
    for row in rows {
        print_row(&row.updated_at, &row.project_name, &row.author, row.score, row.additions, row.deletions, &row.commit_messages);
    }
}

fn print_row(
    updated_at: &Timestamp,
    project: &str,
    author: &str,
    score: f64,
    additions: Option<i64>,
    deletions: Option<i64>,
    message: &str,
) {
    let when = match updated_at {
        Timestamp::Unix(secs) => OffsetDateTime::from_unix_timestamp(*secs).ok(),
        Timestamp::Text(text) => format::parse_datetime(text),
    };
    let ago = when.map(|t| format::relative_time(t, OffsetDateTime::now_utc())).unwrap_or_default();
    println!(
        "{}  {ago:<16} {project:<24} {author:<16} {:>6}  {:<14} {}",
        updated_at.display(),
        format::format_score(score),
        format::format_delta(additions, deletions),
        format::truncate_text(message.lines().next().unwrap_or_default(), 60),
    );
}

fn print_serialized<T: Serialize>(value: &T) -> Result<(), CliError> {
    print_json(&serde_json::to_value(value)?)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
