use polars::datatypes::DataType::Float64;
use polars::prelude::DataFrame;
use tracing::info;

use crate::config::PanelConfig;
use crate::error::{PipelineError, Result};
use crate::panel::{has_columns, numeric_columns};

// Position of each row after sorting by (entity, time).
const SORTED_ROW: &str = "__sorted_row";

// Difference one entity's rows, already in time order. The first period has
// no predecessor and is dropped.
fn difference_entity(
    part: &DataFrame,
    to_diff: &[String],
    carried: &[&str],
) -> Result<DataFrame> {
    let kept = part.height().saturating_sub(1);
    let mut columns = Vec::with_capacity(to_diff.len() + carried.len());
    for name in to_diff {
        let values = part.column(name)?.cast(&Float64)?;
        let mut change = &values - &values.shift(1);
        change.rename(name);
        columns.push(change.slice(1, kept));
    }
    for name in carried {
        columns.push(part.column(name)?.slice(1, kept));
    }
    Ok(DataFrame::new(columns)?)
}

// Apply first-differencing per entity
//
// Rows are sorted by (entity, time). Every numeric column other than the
// identifiers becomes the change from the entity's previous period; the
// identifiers (entity, time, country, flag) are carried through untouched.
// An entity is keyed by country and id together, so the same id in two
// countries is two entities. The first period of each entity has no
// predecessor and is dropped, as are non-numeric non-identifier columns.
pub fn first_difference(data: &DataFrame, panel: &PanelConfig) -> Result<DataFrame> {
    let entity_col = panel.entity_col.as_str();
    let time_col = panel.time_col.as_str();
    for required in [entity_col, time_col] {
        if !has_columns(data, &[required]) {
            return Err(PipelineError::MissingColumn(required.to_string()));
        }
    }

    let identifiers: Vec<&str> = [
        entity_col,
        time_col,
        panel.country_col.as_str(),
        panel.flag_col.as_str(),
    ]
    .into_iter()
    .filter(|name| has_columns(data, &[*name]))
    .collect();
    let to_diff: Vec<String> = numeric_columns(data)
        .into_iter()
        .filter(|name| !identifiers.contains(&name.as_str()))
        .collect();
    info!(
        variables = to_diff.len(),
        entity = entity_col,
        "applying first-differencing"
    );

    let sorted = data
        .sort([entity_col, time_col], false)?
        .with_row_count(SORTED_ROW, None)?;
    let keys: Vec<&str> = identifiers
        .iter()
        .copied()
        .filter(|name| *name == panel.country_col || *name == entity_col)
        .collect();
    let mut carried = identifiers.clone();
    carried.push(SORTED_ROW);

    let mut differenced: Option<DataFrame> = None;
    for part in sorted.partition_by_stable(keys)? {
        let entity = difference_entity(&part, &to_diff, &carried)?;
        match differenced.as_mut() {
            Some(acc) => {
                acc.vstack_mut(&entity)?;
            }
            None => differenced = Some(entity),
        }
    }
    let differenced = match differenced {
        Some(frame) => frame.sort([SORTED_ROW], false)?.drop(SORTED_ROW)?,
        None => difference_entity(&sorted, &to_diff, &identifiers)?,
    };
    info!(
        rows = differenced.height(),
        columns = differenced.width(),
        "first-differencing complete"
    );
    Ok(differenced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::numeric_values;
    use polars::df;
    use polars::prelude::NamedFrom;

    fn panel() -> PanelConfig {
        PanelConfig::default()
    }

    #[test]
    fn drops_first_period_of_each_entity() {
        let data = df!(
            "country" => &["Mexico", "Mexico", "Mexico", "Chile", "Mexico"],
            "is_MEX" => &[1, 1, 1, 0, 1],
            "region_id" => &[1i64, 1, 1, 2, 3],
            "year" => &[2012i64, 2010, 2014, 2010, 2010],
            "x" => &[3.0, 1.0, 6.0, 9.0, 4.0]
        )
        .unwrap();
        let out = first_difference(&data, &panel()).unwrap();

        // Region 1 has three periods, regions 2 and 3 have one each.
        assert_eq!(out.height(), 2);
        assert_eq!(numeric_values(&out, "x").unwrap(), vec![Some(2.0), Some(3.0)]);
        assert_eq!(
            numeric_values(&out, "year").unwrap(),
            vec![Some(2012.0), Some(2014.0)]
        );
    }

    #[test]
    fn identifiers_are_carried_through_unchanged() {
        let data = df!(
            "region_id" => &[7i64, 7, 8, 8],
            "year" => &[2011i64, 2010, 2010, 2011],
            "country" => &["Chile", "Chile", "MEXICO", "MEXICO"],
            "is_MEX" => &[0, 0, 1, 1],
            "y" => &[5.5, 5.0, 1.0, 0.0]
        )
        .unwrap();
        let out = first_difference(&data, &panel()).unwrap();

        let names = out.get_column_names();
        assert_eq!(names, vec!["y", "region_id", "year", "country", "is_MEX"]);
        assert_eq!(out.column("region_id").unwrap().dtype(), data.column("region_id").unwrap().dtype());
        assert_eq!(out.column("is_MEX").unwrap().dtype(), data.column("is_MEX").unwrap().dtype());

        let countries: Vec<Option<&str>> = out.column("country").unwrap().utf8().unwrap().into_iter().collect();
        assert_eq!(countries, vec![Some("Chile"), Some("MEXICO")]);
        let flags: Vec<Option<i32>> = out.column("is_MEX").unwrap().i32().unwrap().into_iter().collect();
        assert_eq!(flags, vec![Some(0), Some(1)]);
        assert_eq!(numeric_values(&out, "y").unwrap(), vec![Some(0.5), Some(-1.0)]);
    }

    #[test]
    fn same_id_in_two_countries_is_two_entities() {
        let data = df!(
            "country" => &["Mexico", "Chile", "Mexico", "Chile"],
            "region_id" => &[1i64, 1, 1, 1],
            "year" => &[2010i64, 2010, 2011, 2011],
            "x" => &[1.0, 100.0, 2.0, 110.0]
        )
        .unwrap();
        let out = first_difference(&data, &panel()).unwrap();
        assert_eq!(out.height(), 2);
        let mut diffs: Vec<f64> = numeric_values(&out, "x").unwrap().into_iter().flatten().collect();
        diffs.sort_by(f64::total_cmp);
        assert_eq!(diffs, vec![1.0, 10.0]);
    }

    #[test]
    fn text_entity_ids_are_supported() {
        let data = df!(
            "country" => &["Chile", "Chile", "Chile"],
            "region_id" => &["CL-RM", "CL-RM", "CL-BI"],
            "year" => &[2010i64, 2012, 2010],
            "x" => &[Some(1.0), None, Some(3.0)]
        )
        .unwrap();
        let out = first_difference(&data, &panel()).unwrap();
        assert_eq!(out.height(), 1);
        assert_eq!(numeric_values(&out, "x").unwrap(), vec![None]);
    }

    #[test]
    fn requires_entity_and_time() {
        let data = df!("country" => &["Chile"], "x" => &[1.0]).unwrap();
        let err = first_difference(&data, &panel()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn(_)));
    }

    #[test]
    fn unsorted_input_is_differenced_in_time_order() {
        let data = df!(
            "country" => &["Chile", "Chile", "Chile", "Chile"],
            "region_id" => &[5i64, 4, 5, 4],
            "year" => &[2014i64, 2012, 2010, 2010],
            "x" => &[Some(9.0), Some(4.0), Some(1.0), Some(3.0)]
        )
        .unwrap();
        let out = first_difference(&data, &panel()).unwrap();
        assert_eq!(numeric_values(&out, "region_id").unwrap(), vec![Some(4.0), Some(5.0)]);
        assert_eq!(numeric_values(&out, "x").unwrap(), vec![Some(1.0), Some(8.0)]);
        assert!(!has_columns(&out, &[SORTED_ROW]));
    }

    #[test]
    fn single_period_panel_yields_no_rows() {
        let data = df!(
            "country" => &["Chile", "Mexico"],
            "region_id" => &[1i64, 2],
            "year" => &[2010i64, 2010],
            "x" => &[1.0, 2.0]
        )
        .unwrap();
        let out = first_difference(&data, &panel()).unwrap();
        assert_eq!(out.height(), 0);
        assert!(has_columns(&out, &["x", "region_id", "year", "country"]));
    }
}
