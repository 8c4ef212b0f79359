#![deny(warnings)]

//! Output collaborators for the reinvestment simulator.
//!
//! Every type here consumes the outcome stream of a run through
//! [`OutcomeSink`] and keeps whatever history its rendering needs. None of
//! them feed anything back into the engine.

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sim_core::PeriodOutcome;
use sim_runtime::{OutcomeSink, RunStatus, RunSummary};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Round to cents, halves away from zero.
pub fn cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn money(value: Decimal) -> String {
    format!("R$ {:.2}", cents(value))
}

fn add_months(start: NaiveDate, months: u32) -> NaiveDate {
    let total = start.month0() + months;
    let year = start.year() + (total / 12) as i32;
    NaiveDate::from_ymd_opt(year, total % 12 + 1, 1).unwrap_or(start)
}

/// Display label of a period.
pub fn period_label(period_index: u32, start: Option<NaiveDate>) -> String {
    match start {
        Some(d) => {
            let m = add_months(d, period_index.saturating_sub(1));
            format!("{:04}-{:02}", m.year(), m.month())
        }
        None => format!("Month {period_index}"),
    }
}

/// One-line description of how a run ended.
pub fn summary_line(summary: &RunSummary, last_net: Option<Decimal>) -> String {
    match summary.status {
        RunStatus::TargetReached => format!(
            "Target reached in month {} | net {} | cumulative {}",
            summary.periods,
            money(last_net.unwrap_or_default()),
            money(summary.final_state.cumulative_net_profit)
        ),
        RunStatus::PeriodLimitReached => format!(
            "Stopped after {} months without reaching the target | cumulative {}",
            summary.periods,
            money(summary.final_state.cumulative_net_profit)
        ),
    }
}

/// Chart series: profit lines and extras per month.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesHistory {
    pub labels: Vec<String>,
    pub gross_profit: Vec<Decimal>,
    /// Capital credited for extras each month.
    pub reinvestment: Vec<Decimal>,
    pub net_profit: Vec<Decimal>,
    pub extras: Vec<u32>,
    #[serde(skip)]
    start_date: Option<NaiveDate>,
}

impl SeriesHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label periods by calendar month from `start` instead of by number.
    pub fn with_start_date(start: NaiveDate) -> Self {
        Self {
            start_date: Some(start),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl OutcomeSink for SeriesHistory {
    fn on_outcome(&mut self, o: &PeriodOutcome) {
        self.labels.push(period_label(o.period_index, self.start_date));
        self.gross_profit.push(cents(o.gross_profit));
        self.reinvestment.push(cents(o.reinvestment));
        self.net_profit.push(cents(o.net_profit));
        self.extras.push(o.extra_units_purchased);
    }
}

/// A row of the analytic table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub period_index: u32,
    pub units_held: u64,
    pub extras: u32,
    pub capital: Decimal,
    pub gross_profit: Decimal,
    pub net_profit: Decimal,
    pub cumulative_net_profit: Decimal,
}

impl From<&PeriodOutcome> for TableRow {
    fn from(o: &PeriodOutcome) -> Self {
        Self {
            period_index: o.period_index,
            units_held: o.units_held,
            extras: o.extra_units_purchased,
            capital: o.capital_at_start,
            gross_profit: o.gross_profit,
            net_profit: o.net_profit,
            cumulative_net_profit: o.cumulative_net_profit,
        }
    }
}

/// Analytic table, newest month first.
#[derive(Clone, Debug, Default)]
pub struct AnalyticTable {
    rows: VecDeque<TableRow>,
    summary: Option<String>,
    start_date: Option<NaiveDate>,
}

impl AnalyticTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_date(start: NaiveDate) -> Self {
        Self {
            start_date: Some(start),
            ..Self::default()
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = &TableRow> {
        self.rows.iter()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(s) = &self.summary {
            out.push_str(s);
            out.push('\n');
        }
        out.push_str(&format!(
            "{:<10} {:>8} {:>6} {:>16} {:>16} {:>16} {:>16}\n",
            "Month", "Units", "Extras", "Capital", "Gross", "Net", "Cumulative"
        ));
        for r in &self.rows {
            out.push_str(&format!(
                "{:<10} {:>8} {:>6} {:>16} {:>16} {:>16} {:>16}\n",
                period_label(r.period_index, self.start_date),
                r.units_held,
                r.extras,
                money(r.capital),
                money(r.gross_profit),
                money(r.net_profit),
                money(r.cumulative_net_profit)
            ));
        }
        out
    }
}

impl OutcomeSink for AnalyticTable {
    fn on_outcome(&mut self, o: &PeriodOutcome) {
        self.rows.push_front(TableRow::from(o));
    }

    fn on_finish(&mut self, summary: &RunSummary) {
        let last_net = self.rows.front().map(|r| r.net_profit);
        self.summary = Some(summary_line(summary, last_net));
    }
}

/// Latest net profit as a share of the target.
#[derive(Clone, Debug)]
pub struct ProgressTracker {
    target: Decimal,
    last_net: Decimal,
    periods: u32,
    done: bool,
}

impl ProgressTracker {
    pub fn new(target: Decimal) -> Self {
        Self {
            target,
            last_net: Decimal::ZERO,
            periods: 0,
            done: false,
        }
    }

    /// Progress in `[0, 1]`.
    pub fn fraction(&self) -> Decimal {
        if self.target <= Decimal::ZERO {
            return Decimal::ONE;
        }
        (self.last_net / self.target).clamp(Decimal::ZERO, Decimal::ONE)
    }

    pub fn periods(&self) -> u32 {
        self.periods
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Text bar such as `[#####-----]  50%`.
    pub fn render_bar(&self, width: usize) -> String {
        let f = self.fraction();
        let filled = (f * Decimal::from(width as u64))
            .floor()
            .to_usize()
            .unwrap_or(0)
            .min(width);
        let pct = (f * Decimal::ONE_HUNDRED).floor().to_u32().unwrap_or(0);
        format!(
            "[{}{}] {:>3}%",
            "#".repeat(filled),
            "-".repeat(width - filled),
            pct
        )
    }
}

impl OutcomeSink for ProgressTracker {
    fn on_outcome(&mut self, o: &PeriodOutcome) {
        self.last_net = o.net_profit;
        self.periods = o.period_index;
    }

    fn on_finish(&mut self, _summary: &RunSummary) {
        self.done = true;
    }
}

const CSV_HEADER: &str = "month,units_held,extra_units,capital_at_start,unit_revenue,gross_profit,net_profit,cumulative_net_profit,reinvestment,target_reached";

/// Streams outcomes as CSV rows while the run progresses.
///
/// Write errors are remembered and reported by [`CsvExporter::finish`];
/// rows after the first failure are skipped.
pub struct CsvExporter<W: Write> {
    out: W,
    rows: usize,
    error: Option<io::Error>,
}

impl<W: Write> CsvExporter<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "{CSV_HEADER}")?;
        Ok(Self {
            out,
            rows: 0,
            error: None,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush, reporting the first write error if there was one.
    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.out.flush()
    }

    /// Flush and return the writer, or the first write error.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush()?;
        Ok(self.out)
    }

    fn write_row(&mut self, o: &PeriodOutcome) -> io::Result<()> {
        writeln!(
            self.out,
            "{},{},{},{},{},{},{},{},{},{}",
            o.period_index,
            o.units_held,
            o.extra_units_purchased,
            cents(o.capital_at_start),
            cents(o.effective_unit_revenue),
            cents(o.gross_profit),
            cents(o.net_profit),
            cents(o.cumulative_net_profit),
            cents(o.reinvestment),
            o.terminated
        )
    }
}

impl<W: Write> OutcomeSink for CsvExporter<W> {
    fn on_outcome(&mut self, o: &PeriodOutcome) {
        if self.error.is_some() {
            return;
        }
        match self.write_row(o) {
            Ok(()) => self.rows += 1,
            Err(e) => {
                warn!(error = %e, period = o.period_index, "csv export failed");
                self.error = Some(e);
            }
        }
    }

    fn on_finish(&mut self, _summary: &RunSummary) {
        if self.error.is_none() {
            if let Err(e) = self.out.flush() {
                self.error = Some(e);
            }
        }
    }
}

/// Writes one log entry per month as it happens, plus the closing line.
pub struct LogWriter<W: Write> {
    out: W,
    start_date: Option<NaiveDate>,
    last_net: Option<Decimal>,
}

impl<W: Write> LogWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            start_date: None,
            last_net: None,
        }
    }

    pub fn with_start_date(mut self, start: NaiveDate) -> Self {
        self.start_date = Some(start);
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> OutcomeSink for LogWriter<W> {
    fn on_outcome(&mut self, o: &PeriodOutcome) {
        self.last_net = Some(o.net_profit);
        let line = format!(
            "{} | units {} | extras {} | capital {} | gross {} | net {} | cumulative {}",
            period_label(o.period_index, self.start_date),
            o.units_held,
            o.extra_units_purchased,
            money(o.capital_at_start),
            money(o.gross_profit),
            money(o.net_profit),
            money(o.cumulative_net_profit)
        );
        if let Err(e) = writeln!(self.out, "{line}") {
            warn!(error = %e, "log write failed");
        }
    }

    fn on_finish(&mut self, summary: &RunSummary) {
        let line = summary_line(summary, self.last_net);
        if let Err(e) = writeln!(self.out, "{line}").and_then(|_| self.out.flush()) {
            warn!(error = %e, "log write failed");
        }
    }
}

/// A sink shared between the run task and the caller.
pub struct Shared<S>(Arc<Mutex<S>>);

impl<S> Shared<S> {
    pub fn new(sink: S) -> Self {
        Self(Arc::new(Mutex::new(sink)))
    }

    /// Lock the inner sink. A poisoned lock still yields the data.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> Clone for Shared<S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<S: OutcomeSink> OutcomeSink for Shared<S> {
    fn on_outcome(&mut self, outcome: &PeriodOutcome) {
        self.lock().on_outcome(outcome)
    }

    fn on_finish(&mut self, summary: &RunSummary) {
        self.lock().on_finish(summary)
    }
}
