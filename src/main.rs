use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storefront_e2e::browser::{ChromeDriver, ConnectionMode};
use storefront_e2e::config::{self, ExecutorOptions, MailboxConfig, StoreConfig};
use storefront_e2e::flow::{
    shared_platform, Flow, FlowExecutor, FlowValidator, JourneyReport, MetricsCollector,
    RunTelemetry, StepOutcome, StepRegistry, ValidationResult,
};
use storefront_e2e::otp::{GmailOtpClient, OtpProvider};
use storefront_e2e::reporting::{
    format_duration, DashboardService, DashboardSource, LiveDashboard, RealtimeListener,
    RunRecorder, SupabaseStore,
};
use storefront_e2e::server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run journeys (JSON flows or .feature files) in Chrome
    Run(RunArgs),

    /// Check flow files without launching a browser
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the most recent OTP code in the mailbox
    Otp {
        #[command(flatten)]
        mailbox: MailboxArgs,

        /// Keep polling for up to this many seconds
        #[arg(long, default_value_t = 0)]
        wait: u64,
    },

    /// Print dashboard cards for every platform
    Report {
        #[command(flatten)]
        store: StoreArgs,

        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve the dashboard API
    Serve {
        #[command(flatten)]
        store: StoreArgs,

        /// Port to listen on
        #[arg(short, long, default_value_t = 9669)]
        port: u16,

        /// Directory with screenshot artifacts
        #[arg(long, default_value = "./artifacts")]
        artifacts: PathBuf,

        /// Refresh the snapshot on every datastore change
        #[arg(long)]
        realtime: bool,
    },
}

#[derive(Args, Debug)]
struct StoreArgs {
    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: String,

    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    supabase_key: String,
}

#[derive(Args, Debug)]
struct MailboxArgs {
    #[arg(long, env = "GMAIL_USER")]
    gmail_user: String,

    #[arg(long, env = "GMAIL_APP_PASSWORD", hide_env_values = true)]
    gmail_app_password: String,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Flow files; a .feature file may hold several scenarios
    #[arg(required = true)]
    flows: Vec<PathBuf>,

    #[arg(long, env = "CHROME_PATH")]
    chrome_path: Option<String>,

    /// Attach to a Chrome started with --remote-debugging-port
    #[arg(long)]
    debug_port: Option<u16>,

    /// Run headless (implied on CI)
    #[arg(long)]
    headless: bool,

    /// Disable the Chrome sandbox (implied on CI)
    #[arg(long)]
    no_sandbox: bool,

    /// Placeholder value, NAME=VALUE; E2E_<NAME> environment variables are also read
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    #[arg(long, env = "BASE_URL")]
    base_url: Option<String>,

    /// Default step timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long, default_value = "./artifacts")]
    artifacts: PathBuf,

    /// Record the run to the datastore
    #[arg(long)]
    record: bool,

    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: Option<String>,

    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    supabase_key: Option<String>,

    #[arg(long, env = "GMAIL_USER")]
    gmail_user: Option<String>,

    #[arg(long, env = "GMAIL_APP_PASSWORD", hide_env_values = true)]
    gmail_app_password: Option<String>,

    /// Write journey reports and telemetry as JSON
    #[arg(long)]
    report_out: Option<PathBuf>,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Validate { files } => validate(&files).await,
        Command::Otp { mailbox, wait } => otp(mailbox, wait).await,
        Command::Report { store, json } => report(store, json).await,
        Command::Serve {
            store,
            port,
            artifacts,
            realtime,
        } => serve(store, port, artifacts, realtime).await,
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// JSON flows hold one journey, feature files one per scenario
async fn load_flows(paths: &[PathBuf]) -> anyhow::Result<Vec<Flow>> {
    let registry = StepRegistry::new();
    let mut flows = Vec::new();

    for path in paths {
        if is_feature(path) {
            let source = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let parsed = registry
                .parse_feature(&source)
                .with_context(|| format!("parsing {}", path.display()))?;
            flows.extend(parsed);
        } else {
            let flow = Flow::from_file(path)
                .await
                .with_context(|| format!("loading {}", path.display()))?;
            flows.push(flow);
        }
    }

    for (i, flow) in flows.iter_mut().enumerate() {
        flow.journey_number.get_or_insert(i as u32 + 1);
    }
    Ok(flows)
}

fn is_feature(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("feature")
}

fn collect_variables(args: &RunArgs) -> HashMap<String, String> {
    let mut variables: HashMap<String, String> = std::env::vars()
        .filter_map(|(name, value)| name.strip_prefix("E2E_").map(|n| (n.to_string(), value)))
        .collect();

    if let Some(base_url) = &args.base_url {
        variables.insert("BASE_URL".to_string(), base_url.trim_end_matches('/').to_string());
    }
    if let Some(user) = &args.gmail_user {
        variables.entry("EMAIL".to_string()).or_insert_with(|| user.clone());
    }
    variables.extend(args.vars.iter().cloned());
    variables
}

async fn launch(args: &RunArgs) -> anyhow::Result<ChromeDriver> {
    let driver = if let Some(port) = args.debug_port {
        ChromeDriver::connect_debug_port(port).await?
    } else if args.headless || args.no_sandbox {
        let is_ci = config::is_ci();
        ChromeDriver::new(ConnectionMode::Sandboxed {
            chrome_path: args.chrome_path.clone(),
            no_sandbox: args.no_sandbox || is_ci,
            headless: args.headless || is_ci,
        })
        .await?
    } else {
        ChromeDriver::launch_auto(args.chrome_path.clone()).await?
    };
    Ok(driver)
}

async fn run(args: RunArgs) -> anyhow::Result<bool> {
    let flows = load_flows(&args.flows).await?;
    let platform = shared_platform(&flows)?;
    log::info!("Loaded {} {} journey(s)", flows.len(), platform);

    let store = if args.record {
        let url = args
            .supabase_url
            .clone()
            .context("--record needs SUPABASE_URL")?;
        let key = args
            .supabase_key
            .clone()
            .context("--record needs SUPABASE_ANON_KEY")?;
        Some(SupabaseStore::new(&StoreConfig::new(url, key))?)
    } else {
        None
    };

    let otp_client = match (&args.gmail_user, &args.gmail_app_password) {
        (Some(user), Some(password)) => {
            Some(GmailOtpClient::new(MailboxConfig::gmail(user.clone(), password.clone())))
        }
        _ => None,
    };

    let mut options = ExecutorOptions {
        artifact_dir: Some(args.artifacts.clone()),
        ..ExecutorOptions::default()
    };
    if let Some(timeout) = args.timeout_ms {
        options.default_timeout = Duration::from_millis(timeout);
    }
    let variables = collect_variables(&args);

    let driver = launch(&args).await?;

    // The run row is only written once Chrome is up
    let mut recorder = match &store {
        Some(store) => {
            let extra = serde_json::json!({
                "flows": args.flows.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            });
            match RunRecorder::start(store, platform, extra).await {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    if let Err(close) = driver.close().await {
                        log::warn!("Failed to close Chrome cleanly: {}", close);
                    }
                    return Err(e.into());
                }
            }
        }
        None => None,
    };

    let metrics = MetricsCollector::new();
    let mut reports: Vec<JourneyReport> = Vec::new();
    let mut all_passed = true;

    for flow in &flows {
        let mut executor = FlowExecutor::new(&driver, &metrics)
            .with_options(options.clone())
            .with_variables(variables.clone());
        if let Some(client) = &otp_client {
            executor = executor.with_otp_provider(client as &dyn OtpProvider);
        }

        let report = match executor.execute_flow(flow).await {
            Ok(report) => report,
            Err(e) => {
                log::error!("Journey '{}' could not run: {}", flow.name, e);
                JourneyReport::aborted(flow, &e)
            }
        };

        print_journey(&report);
        all_passed &= report.is_success();

        if let Some(recorder) = recorder.as_mut() {
            if let Err(e) = recorder.record_journey(&report).await {
                log::error!("Failed to record journey '{}': {}", report.journey_name, e);
            }
        }
        reports.push(report);
    }

    let telemetry = metrics.flush();
    println!(
        "\n{} journey(s), average page load {}, average step {}",
        reports.len(),
        format_duration(telemetry.average_page_load_ms),
        format_duration(telemetry.average_step_ms)
    );

    if let Some(recorder) = recorder {
        let extra = serde_json::json!({ "journeys": reports.len() });
        if let Err(e) = recorder.finish(&telemetry, extra).await {
            log::error!("Failed to complete run record: {}", e);
        }
    }

    if let Some(path) = &args.report_out {
        write_report(path, &reports, &telemetry).await?;
    }

    if let Err(e) = driver.close().await {
        log::warn!("Failed to close Chrome cleanly: {}", e);
    }

    Ok(all_passed)
}

fn print_journey(report: &JourneyReport) {
    let mark = if report.is_success() { "✓" } else { "✗" };
    println!(
        "{} {} ({} passed, {} failed, {} skipped, {} not run, {})",
        mark,
        report.journey_name,
        report.passed,
        report.failed,
        report.skipped,
        report.not_run,
        format_duration(report.total_duration.as_millis() as u64)
    );

    for step in &report.steps {
        match step.outcome {
            StepOutcome::Failed => println!(
                "    ✗ {}: {}",
                step.name,
                step.error.as_deref().unwrap_or("failed")
            ),
            StepOutcome::Skipped => println!("    - {} (optional, skipped)", step.name),
            StepOutcome::Passed | StepOutcome::NotRun => {}
        }
    }
}

async fn write_report(
    path: &Path,
    reports: &[JourneyReport],
    telemetry: &RunTelemetry,
) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&serde_json::json!({
        "journeys": reports,
        "telemetry": telemetry,
    }))?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Report written to {}", path.display());
    Ok(())
}

async fn validate(files: &[PathBuf]) -> anyhow::Result<bool> {
    let validator = FlowValidator::new();
    let registry = StepRegistry::new();
    let mut all_valid = true;

    for path in files {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        let results: Vec<(String, ValidationResult)> = if is_feature(path) {
            match registry.parse_feature(&source) {
                Ok(flows) => flows
                    .iter()
                    .map(|flow| {
                        let mut result = ValidationResult::success();
                        validator.validate_flow(flow, &mut result);
                        (flow.name.clone(), result)
                    })
                    .collect(),
                Err(e) => {
                    println!("✗ {}: {}", path.display(), e);
                    all_valid = false;
                    continue;
                }
            }
        } else {
            vec![(path.display().to_string(), validator.validate_json(&source))]
        };

        for (name, result) in results {
            print_validation(&name, &result);
            all_valid &= result.is_valid;
        }
    }

    Ok(all_valid)
}

fn print_validation(name: &str, result: &ValidationResult) {
    if result.is_valid {
        println!("✓ {}", name);
    } else {
        println!("✗ {}", name);
    }

    for error in &result.errors {
        let location = match (error.location.line, error.location.column) {
            (Some(line), Some(column)) => format!(" (line {}, column {})", line, column),
            _ if !error.location.field_path.is_empty() => format!(" ({})", error.location.field_path),
            _ => String::new(),
        };
        println!("    error{}: {}", location, error.message);
        if let Some(suggestion) = &error.suggestion {
            println!("      hint: {}", suggestion);
        }
    }
    for warning in &result.warnings {
        println!("    warning: {}", warning);
    }
}

async fn otp(args: MailboxArgs, wait: u64) -> anyhow::Result<bool> {
    let client = GmailOtpClient::new(MailboxConfig::gmail(args.gmail_user, args.gmail_app_password));

    let code = if wait > 0 {
        client.wait_for_otp(Duration::from_secs(wait)).await?
    } else {
        client.fetch_latest_otp().await?.map(|found| found.code)
    };

    match code {
        Some(code) => {
            println!("{}", code);
            Ok(true)
        }
        None => {
            eprintln!("No OTP found");
            Ok(false)
        }
    }
}

fn dashboard(args: &StoreArgs) -> anyhow::Result<DashboardService> {
    let config = StoreConfig::new(args.supabase_url.clone(), args.supabase_key.clone());
    Ok(DashboardService::new(SupabaseStore::new(&config)?))
}

async fn report(args: StoreArgs, json: bool) -> anyhow::Result<bool> {
    let snapshot = dashboard(&args)?.build_snapshot().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(true);
    }

    println!(
        "{:<14} {:>5} {:>8} {:>10} {:>10}  {}",
        "Platform", "Runs", "Success", "Avg step", "Total", "Last run"
    );
    for card in &snapshot.platforms {
        println!(
            "{:<14} {:>5} {:>7}% {:>10} {:>10}  {}",
            card.label,
            card.runs,
            card.success_rate,
            card.avg_step_time,
            card.total_duration,
            card.last_run_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    if !snapshot.in_progress_runs.is_empty() {
        println!("\nIn progress: {}", snapshot.in_progress_runs.join(", "));
    }
    if !snapshot.recent_failures.is_empty() {
        println!("\nRecent failures:");
        for failure in snapshot.recent_failures.iter().take(10) {
            println!(
                "  [{}] {} / {}: {}",
                failure.system,
                failure.journey_name.as_deref().unwrap_or("?"),
                failure.step_name,
                failure.error_message.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(true)
}

async fn serve(args: StoreArgs, port: u16, artifacts: PathBuf, realtime: bool) -> anyhow::Result<bool> {
    let service = dashboard(&args)?;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let source: Arc<dyn DashboardSource> = if realtime {
        let live = Arc::new(LiveDashboard::new(service));
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        let config = StoreConfig::new(args.supabase_url.clone(), args.supabase_key.clone());
        RealtimeListener::new(&config).spawn(tx);

        let refresher = live.clone();
        tokio::spawn(async move { refresher.run(rx).await });
        live
    } else {
        Arc::new(service)
    };

    server::serve(source, artifacts, addr).await?;
    Ok(true)
}
