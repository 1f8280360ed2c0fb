use std::io::{self, Write};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use loris_mirror::api::HttpConnector;
use loris_mirror::app::App;
use loris_mirror::config::{Credentials, RunContext};
use loris_mirror::domain::CandidateId;
use loris_mirror::error::MirrorError;

#[derive(Parser)]
#[command(name = "loris-mirror")]
#[command(about = "Mirrors a LORIS-hosted imaging dataset (BIDS or MINC layout) onto local storage")]
#[command(version, author)]
struct Cli {
    /// Output directory for the mirrored dataset. Defaults to the current directory.
    #[arg(short, long)]
    output: Option<Utf8PathBuf>,

    /// Enable per-request debug messages.
    #[arg(short, long)]
    verbose: bool,

    /// Imaging layout to download: bids or minc.
    #[arg(short = 'f', long, default_value = "bids")]
    format: String,

    /// Candidate id to download (repeatable). Default is every candidate available.
    #[arg(short = 'c', long = "candidate")]
    candidates: Vec<CandidateId>,

    /// Username for the API login. Prompted when omitted.
    #[arg(long)]
    username: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(mirror) = report.downcast_ref::<MirrorError>() {
            return ExitCode::from(map_exit_code(mirror));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MirrorError) -> u8 {
    match error {
        MirrorError::UnknownSchema(_) => 1,
        MirrorError::EmptyCandidateFilter(_) => 2,
        MirrorError::Authentication(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_root = match cli.output {
        Some(path) => path,
        None => Utf8PathBuf::from_path_buf(std::env::current_dir().into_diagnostic()?)
            .map_err(|path| miette::Report::msg(format!("non-utf8 working directory: {}", path.display())))?,
    };

    let credentials = collect_credentials(cli.username)?;

    let ctx = RunContext::new(output_root);
    let connector = HttpConnector::new(ctx.clone());
    let app = App::new(connector);
    let summary = app.run(&ctx, &cli.format, &credentials, &cli.candidates)?;

    println!(
        "\nDownloaded {}/{} candidates.",
        summary.completed, summary.requested
    );
    Ok(())
}

fn collect_credentials(username: Option<String>) -> miette::Result<Credentials> {
    let username = match username {
        Some(username) => username,
        None => prompt("Please enter your username: ")?,
    };
    let password = match std::env::var("LORIS_MIRROR_PASSWORD") {
        Ok(password) if !password.is_empty() => password,
        _ => prompt("Please enter your password: ")?,
    };
    Ok(Credentials { username, password })
}

fn prompt(message: &str) -> miette::Result<String> {
    print!("{message}");
    io::stdout().flush().into_diagnostic()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line).into_diagnostic()?;
    Ok(line.trim().to_string())
}
