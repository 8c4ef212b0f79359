#![deny(warnings)]

//! Core domain model for the reinvestment simulator.
//!
//! A run starts from a fixed amount of capital that buys whole units at a
//! fixed cost. Every month each unit yields revenue, and part of the profit
//! is reinvested as extra units for the following month. This crate holds
//! the immutable run parameters, the per-run state, the per-period outcome,
//! the feasibility check that gates a run and the pure step function.

use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Upper bound on extra units bought in a single period.
pub const MAX_EXTRAS: u32 = 30;

/// Fixed monthly overhead assumed by the minimum-capital rule.
pub const MONTHLY_OVERHEAD: Decimal = Decimal::from_parts(120, 0, 0, false, 0);

/// Largest accepted currency amount for any parameter.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

/// Largest number of units the starting capital may buy.
pub const MAX_UNITS: u64 = 1_000_000_000_000;

/// Units held per extra unit bought (one extra for every ten held).
const UNITS_PER_EXTRA: u64 = 10;

/// Decimal places kept from a random draw.
const DRAW_SCALE: u32 = 9;

/// Field-domain violations found while building [`SimulationParameters`].
#[derive(Debug, Error, PartialEq)]
pub enum ParameterError {
    /// Currency inputs must be strictly positive.
    #[error("{field} must be > 0, got {value}")]
    NonPositive {
        /// Name of the offending field.
        field: &'static str,
        /// Value that was rejected.
        value: Decimal,
    },
    /// Currency inputs are capped at [`MAX_AMOUNT`].
    #[error("{field} must be <= {MAX_AMOUNT}, got {value}")]
    AmountTooLarge {
        /// Name of the offending field.
        field: &'static str,
        /// Value that was rejected.
        value: Decimal,
    },
    /// Starting capital buys more than [`MAX_UNITS`] units.
    #[error("initial capital buys more than {MAX_UNITS} units")]
    TooManyUnits,
    /// Variance is a fraction in [0, 1).
    #[error("yield variance must be within [0, 1), got {0}")]
    VarianceOutOfRange(Decimal),
}

/// Reasons a configuration may not start a run.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SchemeError {
    /// Unit revenue does not exceed unit cost; no amount of capital helps.
    #[error("unit revenue must be greater than unit cost")]
    InvalidScheme,
    /// Starting capital is below the minimum viable capital carried here.
    #[error("initial capital must be at least {0}")]
    InsufficientCapital(Decimal),
}

#[derive(Deserialize)]
struct RawParameters {
    initial_capital: Decimal,
    unit_cost: Decimal,
    unit_revenue: Decimal,
    target_net_profit: Decimal,
    #[serde(default)]
    yield_variance: Decimal,
}

/// Inputs of a single run. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawParameters")]
pub struct SimulationParameters {
    initial_capital: Decimal,
    unit_cost: Decimal,
    unit_revenue: Decimal,
    target_net_profit: Decimal,
    yield_variance: Decimal,
}

impl SimulationParameters {
    /// Build parameters, checking each field's domain.
    ///
    /// Economic feasibility (revenue above cost, enough capital) is a
    /// separate concern handled by [`validate`].
    pub fn new(
        initial_capital: Decimal,
        unit_cost: Decimal,
        unit_revenue: Decimal,
        target_net_profit: Decimal,
        yield_variance: Decimal,
    ) -> Result<Self, ParameterError> {
        for (field, value) in [
            ("initial capital", initial_capital),
            ("unit cost", unit_cost),
            ("unit revenue", unit_revenue),
            ("target net profit", target_net_profit),
        ] {
            if value <= Decimal::ZERO {
                return Err(ParameterError::NonPositive { field, value });
            }
            if value > MAX_AMOUNT {
                return Err(ParameterError::AmountTooLarge { field, value });
            }
        }
        match initial_capital.checked_div(unit_cost) {
            Some(units) if units.floor() <= Decimal::from(MAX_UNITS) => {}
            _ => return Err(ParameterError::TooManyUnits),
        }
        if yield_variance < Decimal::ZERO || yield_variance >= Decimal::ONE {
            return Err(ParameterError::VarianceOutOfRange(yield_variance));
        }
        Ok(Self {
            initial_capital,
            unit_cost,
            unit_revenue,
            target_net_profit,
            yield_variance,
        })
    }

    /// Starting reinvestable capital.
    pub fn initial_capital(&self) -> Decimal {
        self.initial_capital
    }

    /// Cost of one unit.
    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    /// Gross revenue of one unit per period, before variance.
    pub fn unit_revenue(&self) -> Decimal {
        self.unit_revenue
    }

    /// Single-period net profit that ends the run.
    pub fn target_net_profit(&self) -> Decimal {
        self.target_net_profit
    }

    /// Maximum symmetric relative perturbation of unit revenue.
    pub fn yield_variance(&self) -> Decimal {
        self.yield_variance
    }

    /// Net margin of one unit at nominal revenue.
    pub fn unit_margin(&self) -> Decimal {
        self.unit_revenue - self.unit_cost
    }
}

impl TryFrom<RawParameters> for SimulationParameters {
    type Error = ParameterError;

    fn try_from(raw: RawParameters) -> Result<Self, Self::Error> {
        Self::new(
            raw.initial_capital,
            raw.unit_cost,
            raw.unit_revenue,
            raw.target_net_profit,
            raw.yield_variance,
        )
    }
}

/// Accumulated state of a run between periods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationState {
    /// Completed periods.
    pub period_index: u32,
    /// Capital available to buy units at the start of the next period.
    pub capital: Decimal,
    /// Sum of every period's net profit so far.
    pub cumulative_net_profit: Decimal,
    /// Set once a period's net profit met the target. Never cleared.
    pub terminated: bool,
}

impl SimulationState {
    /// State before the first period of a run.
    pub fn initial(params: &SimulationParameters) -> Self {
        Self {
            period_index: 0,
            capital: params.initial_capital,
            cumulative_net_profit: Decimal::ZERO,
            terminated: false,
        }
    }
}

/// Result of one period, handed to output sinks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodOutcome {
    /// 1-based month number.
    pub period_index: u32,
    /// Whole units bought with the capital at the start of the period.
    pub units_held: u64,
    /// Extra units credited for the next period.
    pub extra_units_purchased: u32,
    /// Capital the period started with.
    pub capital_at_start: Decimal,
    /// Unit revenue actually used this period, after variance.
    pub effective_unit_revenue: Decimal,
    /// Revenue of all held units.
    pub gross_profit: Decimal,
    /// Revenue minus unit cost across all held units.
    pub net_profit: Decimal,
    /// Net profit summed over every period up to this one.
    pub cumulative_net_profit: Decimal,
    /// Capital credited for the extras (`unit_cost * extra_units_purchased`).
    pub reinvestment: Decimal,
    /// Whether this period met the target.
    pub terminated: bool,
}

/// Minimum capital that clears the fixed overhead rule.
///
/// `ceil((120 + 2 * unit_cost) / margin) * unit_cost`, failing with
/// [`SchemeError::InvalidScheme`] when the margin is not positive. A margin
/// so thin that the rule overflows yields `Decimal::MAX`.
pub fn min_viable_capital(params: &SimulationParameters) -> Result<Decimal, SchemeError> {
    let margin = params.unit_margin();
    if margin <= Decimal::ZERO {
        return Err(SchemeError::InvalidScheme);
    }
    let overhead = MONTHLY_OVERHEAD + Decimal::TWO * params.unit_cost;
    Ok(overhead
        .checked_div(margin)
        .and_then(|units| units.ceil().checked_mul(params.unit_cost))
        .unwrap_or(Decimal::MAX))
}

/// Check that a configuration may start a run.
///
/// Returns the minimum viable capital on success.
pub fn validate(params: &SimulationParameters) -> Result<Decimal, SchemeError> {
    let minimum = min_viable_capital(params)?;
    if params.initial_capital < minimum {
        return Err(SchemeError::InsufficientCapital(minimum));
    }
    Ok(minimum)
}

/// Whole units that `capital` can buy, saturating at `u64::MAX`.
///
/// Parameters built through [`SimulationParameters::new`] stay far below
/// the saturation point.
pub fn units_affordable(capital: Decimal, unit_cost: Decimal) -> u64 {
    if unit_cost <= Decimal::ZERO || capital <= Decimal::ZERO {
        return 0;
    }
    capital
        .checked_div(unit_cost)
        .and_then(|units| units.floor().to_u64())
        .unwrap_or(u64::MAX)
}

/// Extra units bought for a given holding: a tenth of it, within `[1, MAX_EXTRAS]`.
pub fn extra_units_for(units_held: u64) -> u32 {
    // Bounded by MAX_EXTRAS so the cast is lossless.
    (units_held / UNITS_PER_EXTRA).clamp(1, MAX_EXTRAS as u64) as u32
}

/// Unit revenue for one period. Draws from `rng` only when variance is on.
pub fn effective_revenue<R: Rng + ?Sized>(params: &SimulationParameters, rng: &mut R) -> Decimal {
    if params.yield_variance <= Decimal::ZERO {
        return params.unit_revenue;
    }
    let draw: f64 = rng.gen();
    let draw = Decimal::from_f64(draw)
        .unwrap_or(Decimal::ZERO)
        .round_dp(DRAW_SCALE);
    let factor = draw * Decimal::TWO * params.yield_variance - params.yield_variance;
    params.unit_revenue.saturating_mul(Decimal::ONE + factor)
}

/// Advance a run by one period.
///
/// Pure with respect to its inputs: the same state, parameters and random
/// draw always give the same result. Extras are credited to capital without
/// being deducted from the period's profit. Money arithmetic saturates, so
/// the step never panics however long a run grows.
pub fn step<R: Rng + ?Sized>(
    state: SimulationState,
    params: &SimulationParameters,
    rng: &mut R,
) -> (SimulationState, PeriodOutcome) {
    let period_index = state.period_index.saturating_add(1);
    let revenue = effective_revenue(params, rng);
    let units_held = units_affordable(state.capital, params.unit_cost);
    let units = Decimal::from(units_held);
    let gross_profit = units.saturating_mul(revenue);
    let net_profit = units.saturating_mul(revenue - params.unit_cost);
    let cumulative_net_profit = state.cumulative_net_profit.saturating_add(net_profit);
    let extra_units = extra_units_for(units_held);
    let reinvestment = params.unit_cost.saturating_mul(Decimal::from(extra_units));
    let terminated = net_profit >= params.target_net_profit;
    trace!(
        period = period_index,
        units_held,
        extra_units,
        %net_profit,
        terminated,
        "period stepped"
    );

    let next = SimulationState {
        period_index,
        capital: state.capital.saturating_add(reinvestment),
        cumulative_net_profit,
        terminated,
    };
    let outcome = PeriodOutcome {
        period_index,
        units_held,
        extra_units_purchased: extra_units,
        capital_at_start: state.capital,
        effective_unit_revenue: revenue,
        gross_profit,
        net_profit,
        cumulative_net_profit,
        reinvestment,
        terminated,
    };
    (next, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::mock::StepRng;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn dec(units: i64) -> Decimal {
        Decimal::new(units, 0)
    }

    fn params(capital: i64, cost: i64, revenue: i64, target: i64) -> SimulationParameters {
        SimulationParameters::new(dec(capital), dec(cost), dec(revenue), dec(target), Decimal::ZERO)
            .unwrap()
    }

    #[test]
    fn minimum_capital_matches_overhead_rule() {
        let p = params(280, 10, 15, 1_000_000);
        assert_eq!(min_viable_capital(&p).unwrap(), dec(280));
        assert_eq!(validate(&p).unwrap(), dec(280));
    }

    #[test]
    fn capital_one_below_minimum_is_reported() {
        let p = params(279, 10, 15, 1_000_000);
        assert_eq!(validate(&p), Err(SchemeError::InsufficientCapital(dec(280))));
    }

    #[test]
    fn non_positive_margin_is_invalid_regardless_of_capital() {
        for capital in [1, 1_000, 1_000_000_000] {
            let p = params(capital, 20, 15, 1_000);
            assert_eq!(validate(&p), Err(SchemeError::InvalidScheme));
        }
        let even = params(1_000_000, 15, 15, 1_000);
        assert_eq!(validate(&even), Err(SchemeError::InvalidScheme));
    }

    #[test]
    fn min_units_round_up() {
        // (120 + 20) / 3 = 46.67 -> 47 units
        let p = params(10_000, 10, 13, 1_000);
        assert_eq!(min_viable_capital(&p).unwrap(), dec(470));
    }

    #[test]
    fn constructor_rejects_out_of_domain_fields() {
        let zero_cost =
            SimulationParameters::new(dec(100), Decimal::ZERO, dec(15), dec(10), Decimal::ZERO);
        assert_eq!(
            zero_cost,
            Err(ParameterError::NonPositive {
                field: "unit cost",
                value: Decimal::ZERO
            })
        );
        let variance = SimulationParameters::new(dec(100), dec(10), dec(15), dec(10), Decimal::ONE);
        assert_eq!(variance, Err(ParameterError::VarianceOutOfRange(Decimal::ONE)));
    }

    #[test]
    fn oversized_configurations_are_rejected() {
        assert_eq!(MAX_AMOUNT, Decimal::new(1_000_000_000_000, 0));
        let cent = Decimal::new(1, 2);
        let two_cents = Decimal::new(2, 2);

        // 1e20 / 0.01 units would not fit the unit counter.
        let huge = Decimal::from_i128_with_scale(100_000_000_000_000_000_000, 0);
        assert_eq!(
            SimulationParameters::new(huge, cent, two_cents, dec(1_000), Decimal::ZERO),
            Err(ParameterError::AmountTooLarge {
                field: "initial capital",
                value: huge
            })
        );
        let enormous = Decimal::from_i128_with_scale(10i128.pow(27), 0);
        assert!(SimulationParameters::new(enormous, cent, two_cents, dec(1_000), Decimal::ZERO)
            .is_err());

        // Within the amount cap but still too many units.
        let tiny = Decimal::new(1, 9);
        assert_eq!(
            SimulationParameters::new(dec(10_000), tiny, cent, dec(1_000), Decimal::ZERO),
            Err(ParameterError::TooManyUnits)
        );
    }

    #[test]
    fn largest_accepted_configuration_steps_exactly() {
        let p = SimulationParameters::new(
            MAX_AMOUNT,
            Decimal::ONE,
            MAX_AMOUNT,
            MAX_AMOUNT,
            Decimal::new(99, 2),
        )
        .unwrap();
        validate(&p).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (next, out) = step(SimulationState::initial(&p), &p, &mut rng);
        assert_eq!(out.units_held, MAX_UNITS);
        assert_eq!(Decimal::from(out.units_held) * p.unit_cost(), out.capital_at_start);
        assert_eq!(out.extra_units_purchased, MAX_EXTRAS);
        assert_eq!(next.capital, MAX_AMOUNT + dec(30));
    }

    #[test]
    fn razor_thin_margin_needs_unbounded_capital() {
        let cost = Decimal::ONE;
        let revenue = cost + Decimal::new(1, 27);
        assert!(revenue > cost);
        let p = SimulationParameters::new(MAX_AMOUNT, cost, revenue, dec(1), Decimal::ZERO)
            .unwrap();
        assert_eq!(min_viable_capital(&p), Ok(Decimal::MAX));
        assert_eq!(validate(&p), Err(SchemeError::InsufficientCapital(Decimal::MAX)));
    }

    #[test]
    fn step_saturates_instead_of_panicking() {
        let p = params(1_000, 10, 15, 1_000_000);
        let state = SimulationState {
            period_index: u32::MAX,
            capital: Decimal::MAX,
            cumulative_net_profit: Decimal::MAX,
            terminated: false,
        };
        let (next, out) = step(state, &p, &mut StepRng::new(0, 0));
        assert_eq!(out.units_held, u64::MAX);
        assert_eq!(next.cumulative_net_profit, Decimal::MAX);
        assert_eq!(next.capital, Decimal::MAX);
        assert_eq!(next.period_index, u32::MAX);
        assert!(next.terminated);
    }

    #[test]
    fn deserialization_goes_through_checks() {
        let ok = r#"{"initial_capital":"1000","unit_cost":"10","unit_revenue":"15","target_net_profit":"500"}"#;
        let p: SimulationParameters = serde_json::from_str(ok).unwrap();
        assert_eq!(p.yield_variance(), Decimal::ZERO);
        assert_eq!(p.unit_margin(), dec(5));

        let bad = r#"{"initial_capital":"-1","unit_cost":"10","unit_revenue":"15","target_net_profit":"500"}"#;
        assert!(serde_json::from_str::<SimulationParameters>(bad).is_err());
    }

    #[test]
    fn deterministic_step_example() {
        let p = params(1_000, 10, 15, 1_000_000);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let (next, out) = step(SimulationState::initial(&p), &p, &mut rng);
        assert_eq!(out.period_index, 1);
        assert_eq!(out.units_held, 100);
        assert_eq!(out.extra_units_purchased, 10);
        assert_eq!(out.capital_at_start, dec(1_000));
        assert_eq!(out.gross_profit, dec(1_500));
        assert_eq!(out.net_profit, dec(500));
        assert_eq!(out.cumulative_net_profit, dec(500));
        assert_eq!(out.reinvestment, dec(100));
        assert!(!out.terminated);
        assert_eq!(next.capital, dec(1_100));
        assert_eq!(next.period_index, 1);
        assert!(!next.terminated);
    }

    #[test]
    fn extras_are_credited_not_deducted() {
        // 28 units earn 140 net but the extras credit is independent of it.
        let p = params(280, 10, 15, 1_000_000);
        let mut rng = StepRng::new(0, 0);
        let (next, out) = step(SimulationState::initial(&p), &p, &mut rng);
        assert_eq!(out.units_held, 28);
        assert_eq!(out.extra_units_purchased, 2);
        assert_eq!(next.capital, dec(280) + dec(20));
        assert_eq!(next.cumulative_net_profit, out.net_profit);

        // Even a loss-making period still adds the credit.
        let cheap = params(50, 10, 11, 1_000_000);
        let (after, out) = step(SimulationState::initial(&cheap), &cheap, &mut rng);
        assert_eq!(out.units_held, 5);
        assert_eq!(out.extra_units_purchased, 1);
        assert_eq!(after.capital, dec(60));
    }

    #[test]
    fn reaching_target_terminates() {
        let p = params(1_000, 10, 15, 500);
        let mut rng = StepRng::new(0, 0);
        let (next, out) = step(SimulationState::initial(&p), &p, &mut rng);
        assert!(out.terminated);
        assert!(next.terminated);
    }

    #[test]
    fn zero_variance_consumes_no_randomness() {
        let p = params(1_000, 10, 15, 1_000_000);
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let mut untouched = rng.clone();
        let _ = step(SimulationState::initial(&p), &p, &mut rng);
        assert_eq!(rng.gen::<u64>(), untouched.gen::<u64>());
    }

    #[test]
    fn lowest_draw_applies_full_negative_variance() {
        let p = SimulationParameters::new(
            dec(1_000),
            dec(10),
            dec(15),
            dec(1_000_000),
            Decimal::new(20, 2),
        )
        .unwrap();
        let mut rng = StepRng::new(0, 0);
        let (_, out) = step(SimulationState::initial(&p), &p, &mut rng);
        assert_eq!(out.effective_unit_revenue, dec(12));
        assert_eq!(out.gross_profit, dec(1_200));
        assert_eq!(out.net_profit, dec(200));
    }

    #[test]
    fn step_and_validate_are_idempotent() {
        let p = SimulationParameters::new(
            dec(5_000),
            dec(10),
            dec(15),
            dec(1_000_000),
            Decimal::new(10, 2),
        )
        .unwrap();
        assert_eq!(validate(&p), validate(&p));
        let s = SimulationState::initial(&p);
        let a = step(s, &p, &mut ChaCha8Rng::seed_from_u64(3));
        let b = step(s, &p, &mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn extras_clamp_at_both_ends() {
        assert_eq!(extra_units_for(0), 1);
        assert_eq!(extra_units_for(9), 1);
        assert_eq!(extra_units_for(25), 2);
        assert_eq!(extra_units_for(300), 30);
        assert_eq!(extra_units_for(u64::MAX), MAX_EXTRAS);
    }

    proptest! {
        #[test]
        fn extras_always_within_bounds(units in 1u64..u64::MAX) {
            let extras = extra_units_for(units);
            prop_assert!((1..=MAX_EXTRAS).contains(&extras));
        }

        #[test]
        fn units_held_is_floor_of_capital(capital_cents in 1i64..100_000_000, cost_cents in 1i64..1_000_000) {
            let capital = Decimal::new(capital_cents, 2);
            let cost = Decimal::new(cost_cents, 2);
            let units = units_affordable(capital, cost);
            prop_assert!(Decimal::from(units) * cost <= capital);
            prop_assert!(Decimal::from(units + 1) * cost > capital);
        }

        #[test]
        fn zero_variance_growth_is_monotonic(
            cost_cents in 100i64..100_000,
            margin_cents in 1i64..50_000,
            capital_units in 1i64..5_000,
        ) {
            let cost = Decimal::new(cost_cents, 2);
            let revenue = cost + Decimal::new(margin_cents, 2);
            let capital = cost * Decimal::from(capital_units);
            let p = SimulationParameters::new(capital, cost, revenue, dec(1_000_000_000), Decimal::ZERO).unwrap();
            let mut rng = StepRng::new(0, 0);
            let mut state = SimulationState::initial(&p);
            let mut prev: Option<PeriodOutcome> = None;
            for _ in 0..60 {
                let (next, out) = step(state, &p, &mut rng);
                prop_assert!((1..=MAX_EXTRAS).contains(&out.extra_units_purchased));
                if let Some(prev) = &prev {
                    prop_assert!(out.units_held >= prev.units_held);
                    prop_assert!(out.net_profit >= prev.net_profit);
                    prop_assert!(out.cumulative_net_profit >= prev.cumulative_net_profit);
                }
                prev = Some(out);
                state = next;
            }
        }

        #[test]
        fn revenue_stays_within_variance_band(seed in any::<u64>(), pct in 1i64..100) {
            let variance = Decimal::new(pct, 2);
            let p = SimulationParameters::new(dec(1_000), dec(10), dec(15), dec(1_000), variance).unwrap();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let revenue = effective_revenue(&p, &mut rng);
            prop_assert!(revenue >= dec(15) * (Decimal::ONE - variance));
            prop_assert!(revenue <= dec(15) * (Decimal::ONE + variance));
        }
    }
}
