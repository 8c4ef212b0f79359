//! Run configuration: YAML file, command-line flags and the saved form.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use form_input::FormValues;
use serde::Deserialize;
use sim_runtime::{RunOptions, DEFAULT_PACING};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SEED: u64 = 42;

/// Contents of a `--config` YAML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    #[serde(flatten)]
    pub form: FormValues,
    pub seed: Option<u64>,
    pub pacing_ms: Option<u64>,
    pub max_periods: Option<u32>,
    pub start_date: Option<NaiveDate>,
    pub db_url: Option<String>,
}

pub fn load_config(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

/// Command-line flags.
#[derive(Debug, Default)]
pub struct Args {
    pub config: Option<PathBuf>,
    pub form: FormValues,
    pub seed: Option<u64>,
    pub pacing_ms: Option<u64>,
    pub max_periods: Option<u32>,
    pub start_date: Option<NaiveDate>,
    pub db_url: Option<String>,
    pub csv: Option<PathBuf>,
    pub json: Option<PathBuf>,
    pub table: bool,
    pub quiet: bool,
    pub no_save: bool,
    pub reset: bool,
    pub help: bool,
}

pub const USAGE: &str = "\
usage: reinvest [options]

  --capital <money>       starting capital, e.g. \"R$ 1.000,00\" or 1000
  --unit-cost <money>     cost of one unit
  --unit-revenue <money>  revenue of one unit per month
  --target <money>        monthly net profit that ends the run
  --variance <percent>    revenue variance, e.g. 10%
  --config <file>         YAML file with any of the settings above
  --seed <u64>            random seed (default 42)
  --pacing-ms <ms>        delay between months (default 500)
  --max-periods <n>       stop after n months
  --start-date <date>     label months from YYYY-MM-DD
  --db <url>              form store (default sqlite://./saves/form.db)
  --csv <file>            export months as CSV
  --json <file>           export chart series as JSON
  --table                 print the analytic table at the end
  --quiet                 no per-month log
  --no-save               do not remember this form
  --reset                 forget the saved form first
";

fn value<I: Iterator<Item = String>>(it: &mut I, flag: &str) -> Result<String> {
    match it.next() {
        Some(v) => Ok(v),
        None => bail!("{flag} requires a value"),
    }
}

fn parsed<T, I>(it: &mut I, flag: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    I: Iterator<Item = String>,
{
    let raw = value(it, flag)?;
    raw.parse()
        .with_context(|| format!("{flag}: cannot parse {raw:?}"))
}

pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    let mut out = Args::default();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--capital" => out.form.initial_capital = value(&mut it, &arg)?,
            "--unit-cost" => out.form.unit_cost = value(&mut it, &arg)?,
            "--unit-revenue" => out.form.unit_revenue = value(&mut it, &arg)?,
            "--target" => out.form.target_net_profit = value(&mut it, &arg)?,
            "--variance" => out.form.yield_variance = value(&mut it, &arg)?,
            "--config" => out.config = Some(value(&mut it, &arg)?.into()),
            "--seed" => out.seed = Some(parsed(&mut it, &arg)?),
            "--pacing-ms" => out.pacing_ms = Some(parsed(&mut it, &arg)?),
            "--max-periods" => out.max_periods = Some(parsed(&mut it, &arg)?),
            "--start-date" => out.start_date = Some(parsed(&mut it, &arg)?),
            "--db" => out.db_url = Some(value(&mut it, &arg)?),
            "--csv" => out.csv = Some(value(&mut it, &arg)?.into()),
            "--json" => out.json = Some(value(&mut it, &arg)?.into()),
            "--table" => out.table = true,
            "--quiet" => out.quiet = true,
            "--no-save" => out.no_save = true,
            "--reset" => out.reset = true,
            "-h" | "--help" => out.help = true,
            other => bail!("unknown argument {other:?}"),
        }
    }
    Ok(out)
}

/// Effective settings after merging flags, file and saved form.
#[derive(Debug)]
pub struct Settings {
    pub form: FormValues,
    pub seed: u64,
    pub options: RunOptions,
    pub start_date: Option<NaiveDate>,
}

impl Settings {
    /// Flags win over the file, the file over the saved form.
    pub fn resolve(args: &Args, file: FileConfig, saved: &FormValues) -> Self {
        let form = args.form.clone().or(&file.form.or(saved));
        let pacing = args
            .pacing_ms
            .or(file.pacing_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PACING);
        Self {
            form,
            seed: args.seed.or(file.seed).unwrap_or(DEFAULT_SEED),
            options: RunOptions {
                pacing,
                max_periods: args.max_periods.or(file.max_periods),
            },
            start_date: args.start_date.or(file.start_date),
        }
    }
}
