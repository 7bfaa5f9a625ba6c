use anyhow::{bail, Context, Result};
use causeway::{
    batch::BatchRunner,
    cli::{Cli, OutputFormat},
    config::CausewayConfig,
    expectation_types::ExpectationFile,
    reconcile::reconcile,
    recognizer::RecognizerRegistry,
    report::Report,
    shape::group_unique,
    synthesis::synthesize,
    trace_log::TraceLog,
};
use clap::Parser;
use std::io::{self, Write};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber on stderr; warnings only unless --debug
fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

/// Configuration file values with command-line overrides applied
fn load_config(args: &Cli) -> Result<CausewayConfig> {
    let mut config = CausewayConfig::discover(args.config.as_deref())?;
    if args.save_unmatched_sends {
        config.reconcile.save_unmatched_sends = true;
    }
    if let Some(budget) = args.search_budget {
        config.matching.search_budget = budget;
    }
    if let Some(jobs) = args.jobs {
        config.batch.jobs = jobs;
    }
    Ok(config)
}

/// Run one batch; `Ok(false)` when any error was counted along the way
fn run(args: Cli) -> Result<bool> {
    let config = load_config(&args)?;

    let logs = args
        .logs
        .iter()
        .map(|path| TraceLog::from_file(path))
        .collect::<Result<Vec<_>>>()?;
    let mut reconciliation =
        reconcile(&logs, &config.reconcile).context("Trace logs are structurally corrupt")?;
    if let Some(id) = &args.path {
        reconciliation.paths.retain(|path| path.id.to_string() == *id);
        if reconciliation.paths.is_empty() {
            bail!("No path {} in the trace logs", id);
        }
    }
    info!(
        paths = reconciliation.paths.len(),
        errors = reconciliation.error_count(),
        "Reconciled logs"
    );

    let expectations = if args.expectations.is_empty() {
        ExpectationFile::default()
    } else {
        ExpectationFile::from_files(&args.expectations)?
    };
    let registry = RecognizerRegistry::build(&expectations).context("Invalid expectations")?;

    let result = BatchRunner::new(&registry, &config.matching, config.batch.jobs)
        .run(&reconciliation.paths);

    let unique = (args.unique || args.synthesize.is_some())
        .then(|| group_unique(reconciliation.valid_paths()));
    if let (Some(out), Some(groups)) = (&args.synthesize, &unique) {
        synthesize(groups, "path").write_file(out)?;
        info!(recognizers = groups.len(), file = %out.display(), "Wrote synthesized recognizers");
    }

    let report = Report {
        logs: logs.len(),
        reconciliation: &reconciliation,
        registry: &registry,
        result: &result,
        unique: if args.unique { unique.as_deref() } else { None },
        trees: args.trees,
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match args.format {
        OutputFormat::Text => report.write_text(&mut out, args.verbose)?,
        OutputFormat::Json => writeln!(out, "{}", report.to_json()?)?,
    }
    out.flush()?;

    let exhausted: u64 = result
        .stats
        .recognizers
        .iter()
        .map(|stats| stats.budget_exhausted)
        .sum();
    Ok(reconciliation.error_count() == 0 && result.failed_aggregates() == 0 && exhausted == 0)
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);
    if !run(args)? {
        std::process::exit(1);
    }
    Ok(())
}
