#![deny(warnings)]

//! Headless CLI: read a form, validate it and run a paced simulation.

mod config;

use anyhow::{anyhow, Context, Result};
use config::{load_config, parse_args, FileConfig, Settings, USAGE};
use data_pipeline::{
    summary_line, AnalyticTable, CsvExporter, LogWriter, ProgressTracker, SeriesHistory, Shared,
};
use form_input::money_string;
use persistence::{default_sqlite_url, FormStore};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sim_core::SchemeError;
use sim_runtime::SinkSet;
use std::fs::File;
use std::io::BufWriter;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

fn describe(e: SchemeError) -> anyhow::Error {
    match e {
        SchemeError::InvalidScheme => anyhow!("unit revenue must be greater than unit cost"),
        SchemeError::InsufficientCapital(min) => {
            anyhow!("initial capital must be at least {}", money_string(min))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        print!("{USAGE}");
        return Ok(());
    }
    let file = match &args.config {
        Some(path) => load_config(path)?,
        None => FileConfig::default(),
    };

    let db_url = args
        .db_url
        .clone()
        .or_else(|| file.db_url.clone())
        .unwrap_or_else(|| default_sqlite_url().to_string());
    let store = FormStore::open(&db_url)
        .await
        .with_context(|| format!("opening form store {db_url}"))?;
    if args.reset && store.clear().await? {
        info!("saved form cleared");
    }
    let saved = store.load().await?.unwrap_or_default();

    let settings = Settings::resolve(&args, file, &saved);
    let params = settings.form.to_parameters().context("invalid form")?;
    if !args.no_save {
        store.save(&settings.form).await?;
    }
    info!(
        seed = settings.seed,
        capital = %params.initial_capital(),
        unit_cost = %params.unit_cost(),
        unit_revenue = %params.unit_revenue(),
        target = %params.target_net_profit(),
        variance = %params.yield_variance(),
        "starting simulation"
    );

    let history = Shared::new(match settings.start_date {
        Some(d) => SeriesHistory::with_start_date(d),
        None => SeriesHistory::new(),
    });
    let table = Shared::new(match settings.start_date {
        Some(d) => AnalyticTable::with_start_date(d),
        None => AnalyticTable::new(),
    });
    let progress = Shared::new(ProgressTracker::new(params.target_net_profit()));

    let mut sinks = SinkSet::new();
    sinks
        .push(history.clone())
        .push(table.clone())
        .push(progress.clone());
    if !args.quiet {
        let log = LogWriter::new(std::io::stdout());
        sinks.push(match settings.start_date {
            Some(d) => log.with_start_date(d),
            None => log,
        });
    }
    let csv = match &args.csv {
        Some(path) => {
            let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            let exporter = Shared::new(CsvExporter::new(BufWriter::new(f))?);
            sinks.push(exporter.clone());
            Some(exporter)
        }
        None => None,
    };

    let rng = ChaCha8Rng::seed_from_u64(settings.seed);
    let handle =
        sim_runtime::run(params, rng, sinks, settings.options).map_err(describe)?;
    info!(minimum = %money_string(handle.min_viable_capital()), "configuration accepted");

    let summary = tokio::select! {
        summary = handle.wait() => summary,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            None
        }
    };

    if let Some(csv) = &csv {
        csv.lock().flush().context("writing CSV export")?;
    }
    if let Some(path) = &args.json {
        let json = history.lock().to_json()?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    }
    if args.table {
        print!("{}", table.lock().render());
    }

    match summary {
        Some(summary) => {
            if args.quiet {
                let last_net = table.lock().rows().next().map(|r| r.net_profit);
                println!("{}", summary_line(&summary, last_net));
            }
            println!("Progress {}", progress.lock().render_bar(30));
        }
        None => println!("Run cancelled after {} months", progress.lock().periods()),
    }
    Ok(())
}
