use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use c2db_harvest::app::{App, ProgressEvent, ProgressSink, RunOptions, RunReport, VerifyReport};
use c2db_harvest::client::{DEFAULT_BASE_URL, TableHttpClient};
use c2db_harvest::error::HarvestError;
use c2db_harvest::output::{JsonOutput, OutputMode};
use c2db_harvest::store::Store;

#[derive(Parser)]
#[command(name = "c2db-harvest")]
#[command(about = "Batch downloader for the C2DB materials database")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Crawl the results table and download every material")]
    Run(RunArgs),
    #[command(about = "Summarize the manifest without touching the network")]
    Status(TargetArgs),
    #[command(about = "Check that every manifest entry has its files on disk")]
    Verify(TargetArgs),
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Search identifier to crawl (the main dataset by default).
    #[arg(long, default_value_t = 1542)]
    sid: u32,

    /// Directory where the dataset will be stored.
    #[arg(long, default_value = "downloads/c2db")]
    output: Utf8PathBuf,

    /// Politeness delay in seconds between HTTP requests.
    #[arg(long, default_value_t = 1.0)]
    delay: f64,

    /// Manifest path (defaults to <output>/manifest.json).
    #[arg(long)]
    manifest: Option<Utf8PathBuf>,

    /// Limit the number of materials to download.
    #[arg(long)]
    max_materials: Option<usize>,

    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,
}

#[derive(Args, Clone)]
struct TargetArgs {
    #[arg(long, default_value = "downloads/c2db")]
    output: Utf8PathBuf,

    #[arg(long)]
    manifest: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(harvest) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(harvest));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::ManifestRead(_) | HarvestError::ManifestParse(_) => 2,
        HarvestError::TableHttp(_)
        | HarvestError::TableStatus { .. }
        | HarvestError::MaterialHttp(_)
        | HarvestError::MaterialStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let command = cli.command.unwrap_or(Commands::Run(RunArgs {
        sid: 1542,
        output: Utf8PathBuf::from("downloads/c2db"),
        delay: 1.0,
        manifest: None,
        max_materials: None,
        base_url: DEFAULT_BASE_URL.to_string(),
    }));

    match command {
        Commands::Run(args) => run_harvest(args, output_mode),
        Commands::Status(args) => run_status(args, output_mode),
        Commands::Verify(args) => run_verify(args, output_mode),
    }
}

fn run_harvest(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    if !args.delay.is_finite() || args.delay < 0.0 {
        return Err(miette::Report::msg(
            "--delay must be a non-negative number of seconds",
        ));
    }

    let store = Store::new(args.output.clone()).into_diagnostic()?;
    let client = TableHttpClient::new(args.base_url).into_diagnostic()?;
    let app = App::new(store, client, args.manifest);

    let options = RunOptions {
        sid: args.sid,
        delay: Duration::from_secs_f64(args.delay),
        max_materials: args.max_materials,
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let report = app.run(options, &JsonOutput).into_diagnostic()?;
            JsonOutput::print(&report).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let report = app.run(options, &ConsoleProgress).into_diagnostic()?;
            print_run_summary(&report);
            Ok(())
        }
    }
}

fn run_status(args: TargetArgs, output_mode: OutputMode) -> miette::Result<()> {
    let store = Store::new(args.output).into_diagnostic()?;
    let app = App::new(store, NopClient, args.manifest);
    let report = app.status().into_diagnostic()?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(&report).into_diagnostic(),
        OutputMode::Interactive => {
            println!("manifest: {}", report.manifest_path);
            println!(
                "{} materials recorded ({} complete, {} failed)",
                report.total, report.complete, report.failed
            );
            Ok(())
        }
    }
}

fn run_verify(args: TargetArgs, output_mode: OutputMode) -> miette::Result<()> {
    let store = Store::new(args.output).into_diagnostic()?;
    let app = App::new(store, NopClient, args.manifest);
    let report = app.verify().into_diagnostic()?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(&report).into_diagnostic()?,
        OutputMode::Interactive => print_verify_summary(&report),
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(miette::Report::msg(format!(
            "{} manifest entries are missing files",
            report.missing.len()
        )))
    }
}

/// Client stand-in for the offline subcommands.
struct NopClient;

impl c2db_harvest::client::TableClient for NopClient {
    fn fetch_table_page(&self, _sid: u32, _page: u32) -> Result<String, HarvestError> {
        Err(HarvestError::TableHttp(
            "network client not configured".to_string(),
        ))
    }

    fn download_material(
        &self,
        _slug: &c2db_harvest::domain::MaterialSlug,
        _kind: c2db_harvest::domain::DownloadKind,
        _destination: &std::path::Path,
    ) -> Result<(), HarvestError> {
        Err(HarvestError::MaterialHttp(
            "network client not configured".to_string(),
        ))
    }
}

/// Plain progress lines on stderr; detailed diagnostics stay behind RUST_LOG.
struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        eprintln!("{}", event.message);
    }
}

fn print_run_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}C2DB harvest summary (sid {}){reset}", report.sid);
    println!(
        "{cyan}  pages crawled: {}, materials discovered: {}{reset}",
        report.pages, report.discovered
    );
    println!("{green}  downloaded: {}{reset}", report.downloaded);
    println!("{yellow}  skipped (already present): {}{reset}", report.skipped);
    println!("{red}  failed: {}{reset}", report.failed);

    for item in report.items.iter().filter(|item| item.action == "failed") {
        let error = item.error.as_deref().unwrap_or("unknown error");
        println!("{red}  ✗ {}: {}{reset}", item.slug, error);
    }

    println!("  manifest: {}", report.manifest_path);
}

fn print_verify_summary(report: &VerifyReport) {
    let green = "\x1b[32m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    if report.is_clean() {
        println!(
            "{green}✓ {} manifest entries verified, all files present{reset}",
            report.checked
        );
        return;
    }
    for missing in &report.missing {
        for path in &missing.paths {
            println!("{red}✗ {}: missing {}{reset}", missing.slug, path);
        }
    }
}
