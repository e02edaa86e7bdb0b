// Column access helpers shared by the preprocessing stages, plus the
// country indicator.

use polars::datatypes::DataType::{Float64, Int32, Utf8};
use polars::prelude::{DataFrame, NamedFrom, Series};
use tracing::info;

use crate::error::{PipelineError, Result};

// Pull a column out as `f64` values. Nulls and NaN both come back as `None`.
pub fn numeric_values(data: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = data
        .column(name)
        .map_err(|_| PipelineError::MissingColumn(name.to_string()))?
        .cast(&Float64)?;
    let values = series
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect();
    Ok(values)
}

// Names of the numeric columns, in frame order.
pub fn numeric_columns(data: &DataFrame) -> Vec<String> {
    data.get_columns()
        .iter()
        .filter(|s| s.dtype().is_numeric())
        .map(|s| s.name().to_string())
        .collect()
}

pub fn has_columns(data: &DataFrame, names: &[&str]) -> bool {
    let present = data.get_column_names();
    names.iter().all(|name| present.contains(name))
}

// Maps a country label onto the Mexico flag. Anything that is not Mexico,
// including a missing label, is 0.
pub fn mexico_flag(country: Option<&str>) -> i32 {
    match country {
        Some(c) if c.trim().to_uppercase() == "MEXICO" => 1,
        _ => 0,
    }
}

// Create the country indicator column (1 for Mexico, 0 otherwise).
pub fn add_country_indicator(
    data: &mut DataFrame,
    country_col: &str,
    flag_col: &str,
) -> Result<()> {
    let series = data
        .column(country_col)
        .map_err(|_| PipelineError::MissingColumn(country_col.to_string()))?
        .cast(&Utf8)?;
    let flags: Vec<i32> = series.utf8()?.into_iter().map(mexico_flag).collect();
    let n_mexico = flags.iter().filter(|f| **f == 1).count();
    let n_chile = flags.len() - n_mexico;
    let flag = Series::new(flag_col, flags).cast(&Int32)?;
    data.with_column(flag)?;
    info!(mexico = n_mexico, chile = n_chile, "created country indicator");
    Ok(())
}
