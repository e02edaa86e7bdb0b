use polars::prelude::{DataFrame, NamedFrom, Series};
use tracing::{info, warn};

use crate::error::Result;
use crate::panel::{has_columns, numeric_values};

pub const INT_MAX_DISADVANTAGE: &str = "INT_MAX_DISADVANTAGE";
pub const RU_OVERAGE_LS_MALE: &str = "RU_OVERAGE_LS_Male";

// Disadvantaged (lower secondary) and advantaged (primary) group indicators.
const DISADVANTAGED: &str = "OAEPG.H.2";
const ADVANTAGED: &str = "OAEPG.H.1";
const RURAL_LS_MALE: &str = "OAEPG_RUR_LS_Male";
const URBAN_LS_MALE: &str = "OAEPG_URB_LS_Male";

// Proxy weights for the rural/urban gap when the rural and urban columns are
// absent. A placeholder heuristic, not a validated formula.
const PROXY_DISADVANTAGED_WEIGHT: f64 = 0.3;
const PROXY_ADVANTAGED_WEIGHT: f64 = 0.1;

// Element-wise `a * wa - b * wb`; a missing operand makes the result missing.
fn weighted_difference(
    a: &[Option<f64>],
    wa: f64,
    b: &[Option<f64>],
    wb: f64,
) -> Vec<Option<f64>> {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => Some(x * wa - y * wb),
            _ => None,
        })
        .collect()
}

// A column's values, or a constant zero column when it is absent.
fn values_or_zero(data: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    if has_columns(data, &[name]) {
        numeric_values(data, name)
    } else {
        Ok(vec![Some(0.0); data.height()])
    }
}

// Create the derived educational disparity outcomes
//
// `INT_MAX_DISADVANTAGE` is the gap between the disadvantaged and
// advantaged group indicators and is left out (with a warning) when either
// is missing. `RU_OVERAGE_LS_Male` is the rural minus urban overage; without
// those two columns it falls back to the weighted proxy
// `0.3 * OAEPG.H.2 - 0.1 * OAEPG.H.1`, where an absent source counts as 0.
pub fn add_derived_variables(data: &mut DataFrame) -> Result<()> {
    if has_columns(data, &[DISADVANTAGED, ADVANTAGED]) {
        let gap = weighted_difference(
            &numeric_values(data, DISADVANTAGED)?,
            1.0,
            &numeric_values(data, ADVANTAGED)?,
            1.0,
        );
        data.with_column(Series::new(INT_MAX_DISADVANTAGE, gap))?;
        info!(column = INT_MAX_DISADVANTAGE, "created derived variable");
    } else {
        warn!(
            column = INT_MAX_DISADVANTAGE,
            "'{DISADVANTAGED}' or '{ADVANTAGED}' not found, cannot create derived variable"
        );
    }

    if has_columns(data, &[RURAL_LS_MALE, URBAN_LS_MALE]) {
        let gap = weighted_difference(
            &numeric_values(data, RURAL_LS_MALE)?,
            1.0,
            &numeric_values(data, URBAN_LS_MALE)?,
            1.0,
        );
        data.with_column(Series::new(RU_OVERAGE_LS_MALE, gap))?;
        info!(column = RU_OVERAGE_LS_MALE, "created derived variable");
    } else {
        warn!(
            column = RU_OVERAGE_LS_MALE,
            "rural/urban columns not found, using the approximate proxy \
             {PROXY_DISADVANTAGED_WEIGHT} * {DISADVANTAGED} - {PROXY_ADVANTAGED_WEIGHT} * {ADVANTAGED}"
        );
        let proxy = weighted_difference(
            &values_or_zero(data, DISADVANTAGED)?,
            PROXY_DISADVANTAGED_WEIGHT,
            &values_or_zero(data, ADVANTAGED)?,
            PROXY_ADVANTAGED_WEIGHT,
        );
        data.with_column(Series::new(RU_OVERAGE_LS_MALE, proxy))?;
    }
    Ok(())
}
