use polars::datatypes::DataType::Float64;
use polars::prelude::{
    interpolate, ChunkFillNullValue, DataFrame, FillNullStrategy, IntoSeries,
    InterpolationMethod, Series,
};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::panel::{has_columns, numeric_columns};

const SURVEY_MARKERS: [&str; 3] = ["OAEPG", "OVERAGE", "INT_MAX"];
const ECONOMIC_VARS: [&str; 3] = ["SI.POV.GINI", "NY.GDP.PCAP.PP.KD", "EN.POP.DNST"];
const POLICY_VARS: [&str; 3] = ["XGOVEXP.IMF", "YEARS.FC.COMP.1T3", "YEARS.FC.FREE.1T3"];

// Original row position, used to put the country partitions back together.
const ROW_INDEX: &str = "__row_index";

// Every numeric column belongs to exactly one group, and the group decides
// how its gaps are filled:
//
// Survey        linear interpolation within country, nearest value at the ends
// Economic      median within country
// Policy        forward fill then backward fill within country
// OtherNumeric  global median
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableGroup {
    Survey,
    Economic,
    Policy,
    OtherNumeric,
}

impl VariableGroup {
    pub fn classify(column: &str) -> Self {
        if SURVEY_MARKERS.iter().any(|m| column.contains(m)) {
            Self::Survey
        } else if ECONOMIC_VARS.contains(&column) {
            Self::Economic
        } else if POLICY_VARS.contains(&column) {
            Self::Policy
        } else {
            Self::OtherNumeric
        }
    }

    fn within_country(self) -> bool {
        self != Self::OtherNumeric
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImputationReport {
    pub missing_before: usize,
    pub missing_after: usize,
    // Columns that still hold missing values, with their counts.
    pub unresolved: Vec<(String, usize)>,
}

// Replace nulls with the median of the observed values. A column with no
// observations is returned unchanged.
fn fill_with_median(series: &Series) -> Result<Series> {
    match series.median() {
        Some(median) => Ok(series.f64()?.fill_null_with_values(median)?.into_series()),
        None => Ok(series.clone()),
    }
}

fn fill_forward_backward(series: &Series) -> Result<Series> {
    Ok(series
        .fill_null(FillNullStrategy::Forward(None))?
        .fill_null(FillNullStrategy::Backward(None))?)
}

// Fill one column of one partition according to its group.
fn fill_series(group: VariableGroup, series: &Series) -> Result<Series> {
    let series = series.cast(&Float64)?;
    match group {
        VariableGroup::Survey => {
            fill_forward_backward(&interpolate(&series, InterpolationMethod::Linear))
        }
        VariableGroup::Economic | VariableGroup::OtherNumeric => fill_with_median(&series),
        VariableGroup::Policy => fill_forward_backward(&series),
    }
}

// Apply the within-country rules to `columns`
//
// The frame is split per country, each column is filled inside its
// partition, and the partitions are stacked back in the original row order.
fn fill_within_country(
    data: &DataFrame,
    country_col: &str,
    columns: &[(String, VariableGroup)],
) -> Result<DataFrame> {
    let indexed = data.with_row_count(ROW_INDEX, None)?;
    let mut stitched: Option<DataFrame> = None;
    for mut part in indexed.partition_by_stable([country_col])? {
        for (name, group) in columns {
            let filled = fill_series(*group, part.column(name)?)?;
            part.with_column(filled)?;
        }
        match stitched.as_mut() {
            Some(acc) => {
                acc.vstack_mut(&part)?;
            }
            None => stitched = Some(part),
        }
    }
    match stitched {
        Some(frame) => Ok(frame.sort([ROW_INDEX], false)?.drop(ROW_INDEX)?),
        None => Ok(data.clone()),
    }
}

fn total_missing(data: &DataFrame) -> usize {
    data.get_columns().iter().map(|s| s.null_count()).sum()
}

// Handle missing values with the per-group policy
//
// Only numeric columns that actually contain gaps are rewritten. Country
// partitions come from `country_col`. Gaps that cannot be filled, such as a
// country with no observations of an economic variable, are listed in the
// report.
pub fn impute_missing(data: &mut DataFrame, country_col: &str) -> Result<ImputationReport> {
    if !has_columns(data, &[country_col]) {
        return Err(PipelineError::MissingColumn(country_col.to_string()));
    }
    let missing_before = total_missing(data);
    let gaps: Vec<(String, VariableGroup)> = numeric_columns(data)
        .into_iter()
        .filter(|name| data.column(name).map_or(false, |s| s.null_count() > 0))
        .map(|name| {
            let group = VariableGroup::classify(&name);
            (name, group)
        })
        .collect();
    if !gaps.is_empty() {
        info!(
            variables = gaps.len(),
            cells = missing_before,
            "missing values detected before imputation"
        );
    }

    let (by_country, global): (Vec<_>, Vec<_>) =
        gaps.into_iter().partition(|(_, group)| group.within_country());
    if !by_country.is_empty() {
        *data = fill_within_country(data, country_col, &by_country)?;
    }
    for (name, group) in by_country.iter().chain(global.iter()) {
        if !group.within_country() {
            let filled = fill_series(*group, data.column(name)?)?;
            data.with_column(filled)?;
        }
        debug!(column = %name, ?group, "imputed");
    }

    let unresolved: Vec<(String, usize)> = data
        .get_columns()
        .iter()
        .filter(|s| s.null_count() > 0)
        .map(|s| (s.name().to_string(), s.null_count()))
        .collect();
    for (name, count) in &unresolved {
        warn!(column = %name, missing = count, "column still has missing values after imputation");
    }
    let missing_after = total_missing(data);
    info!(remaining = missing_after, "imputation complete");

    Ok(ImputationReport {
        missing_before,
        missing_after,
        unresolved,
    })
}
