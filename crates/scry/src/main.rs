mod diagnostics;
mod handlers;
mod output;
mod telemetry;

use std::io::{IsTerminal, Write};
use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use scry_core::ScryError;
use scry_core::config::Config;
use scry_core::ids::TraceId;
use scry_core::time::TimeFlags;
use scry_query::HttpBackend;
use scry_query::commands::{LogFilter, TraceFilter};
use tracing::Instrument;

use crate::diagnostics::Diagnostics;
use crate::handlers::{Session, SessionFlags};
use crate::output::{Format, RenderOptions, Report, render, select_format};
use crate::telemetry::{init_cli_tracing, shutdown_tracing};

#[derive(Parser, Debug)]
#[command(name = "scry", version)]
#[command(about = "Explore traces and logs in remote datasets without knowing their schema")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, value_enum, default_value_t = Format::Auto)]
    format: Format,

    #[arg(long, global = true, value_delimiter = ',', help = "Comma-separated columns to show")]
    columns: Option<Vec<String>>,

    #[arg(long, global = true, help = "Upper bound on rows x columns in the output")]
    max_cells: Option<usize>,

    #[arg(long, global = true, help = "Print requests, queries and detection scores to stderr")]
    explain: bool,

    #[arg(long, global = true, help = "Backend base URL")]
    url: Option<String>,

    #[arg(long, global = true, help = "Use this dataset for traces instead of detecting one")]
    dataset: Option<String>,

    #[arg(long, global = true, help = "Use this dataset for logs instead of detecting one")]
    logs_dataset: Option<String>,

    #[arg(long, global = true)]
    limit: Option<usize>,

    #[arg(long, global = true, help = "Window start as a duration ago (e.g. 30m)")]
    since: Option<String>,

    #[arg(long, global = true, help = "Window end as a duration ago (e.g. 5m)")]
    until: Option<String>,

    #[arg(long, global = true, help = "Absolute window start (RFC3339), overrides --since")]
    start: Option<String>,

    #[arg(long, global = true, help = "Absolute window end (RFC3339), overrides --until")]
    end: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "List datasets with their region and field count")]
    Datasets,
    #[command(about = "Show which datasets hold traces and logs and how fields map")]
    Detect,
    #[command(about = "Span and error counts per service")]
    Services,
    #[command(about = "Per-operation counts and durations for one service")]
    Operations { service: String },
    #[command(about = "Recent traces, errors first")]
    Traces {
        #[arg(long)]
        service: Option<String>,
        #[arg(long, help = "Only traces with at least one failing span")]
        errors: bool,
    },
    #[command(about = "Reconstruct one trace as a span tree")]
    Trace { trace_id: String },
    #[command(about = "Recent log lines")]
    Logs {
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        trace: Option<String>,
        #[arg(long, help = "Only lines whose body contains this text")]
        search: Option<String>,
    },
    #[command(about = "Most recent raw rows of one or more datasets")]
    Sample {
        #[arg(required = true)]
        datasets: Vec<String>,
    },
    #[command(about = "Run a query as written and print the rows")]
    Query { apl: String },
    #[command(about = "List monitors defined on the backend")]
    Monitors,
    #[command(about = "Recent runs of one monitor, by id or name")]
    MonitorHistory { monitor: String },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Datasets => "datasets",
            Self::Detect => "detect",
            Self::Services => "services",
            Self::Operations { .. } => "operations",
            Self::Traces { .. } => "traces",
            Self::Trace { .. } => "trace",
            Self::Logs { .. } => "logs",
            Self::Sample { .. } => "sample",
            Self::Query { .. } => "query",
            Self::Monitors => "monitors",
            Self::MonitorHistory { .. } => "monitor-history",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_cli_tracing();
    let diag = Diagnostics::new();

    let span = tracing::info_span!("scry", command = cli.command.name());
    let code = match run(cli, diag).instrument(span).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            diag.error(&format!("{err:#}"));
            ExitCode::from(exit_code(&err))
        }
    };
    shutdown_tracing();
    code
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ScryError>())
        .map(|e| e.exit_code())
        .unwrap_or(1)
        .clamp(1, 255) as u8
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load()?;
    if let Some(url) = &cli.url {
        config.url = url.trim_end_matches('/').to_string();
    }
    if let Some(max_cells) = cli.max_cells {
        if max_cells == 0 {
            return Err(ScryError::InvalidArgument("--max-cells must be at least 1".into()).into());
        }
        config.max_cells = max_cells;
    }
    Ok(config)
}

async fn run(cli: Cli, diag: Diagnostics) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let explain = cli.explain.then(|| diag.explain_sink());
    let backend = HttpBackend::new(&config, explain)?;

    let session = Session {
        backend: &backend,
        diag,
        flags: SessionFlags {
            dataset: cli.dataset.clone(),
            logs_dataset: cli.logs_dataset.clone(),
            history_dataset: Some(config.history_dataset.clone()),
            limit: cli.limit,
            time: TimeFlags {
                since: cli.since.clone(),
                until: cli.until.clone(),
                start: cli.start.clone(),
                end: cli.end.clone(),
            },
            explain: cli.explain,
        },
        now: Utc::now(),
    };

    let report = dispatch(&session, &cli.command).await?;
    tracing::debug!(command = report.command, rows = report.rows.len(), "command finished");

    let format = select_format(
        cli.format,
        report.kind,
        &report.rows,
        std::io::stdout().is_terminal(),
    );
    let opts = RenderOptions {
        columns: cli.columns.clone(),
        max_cells: config.max_cells,
        generated_at: session.now,
        width: RenderOptions::terminal_width(),
    };
    let rendered = render(report, format, &opts)?;

    // Nothing reaches stdout until the whole result rendered.
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(rendered.stdout.as_bytes())
        .and_then(|_| stdout.flush())
        .or_else(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe => Ok(()),
            _ => Err(e),
        })
        .context("writing output")?;

    for hint in &rendered.hints {
        diag.hint(hint);
    }
    Ok(())
}

async fn dispatch(session: &Session<'_>, command: &Commands) -> anyhow::Result<Report> {
    match command {
        Commands::Datasets => session.datasets().await,
        Commands::Detect => session.detect_report().await,
        Commands::Services => session.services().await,
        Commands::Operations { service } => session.operations(service).await,
        Commands::Traces { service, errors } => {
            session
                .traces(TraceFilter {
                    service: service.clone(),
                    errors_only: *errors,
                })
                .await
        }
        Commands::Trace { trace_id } => session.trace(trace_id).await,
        Commands::Logs {
            service,
            trace,
            search,
        } => {
            let trace_id = trace.as_deref().map(TraceId::parse).transpose()?;
            session
                .logs(LogFilter {
                    service: service.clone(),
                    trace_id,
                    search: search.clone(),
                })
                .await
        }
        Commands::Sample { datasets } => session.sample(datasets).await,
        Commands::Query { apl } => session.query(apl).await,
        Commands::Monitors => session.monitors().await,
        Commands::MonitorHistory { monitor } => session.monitor_history(monitor).await,
    }
}
