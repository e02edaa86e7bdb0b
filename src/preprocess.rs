use polars::prelude::DataFrame;
use std::path::Path;
use tracing::{info, warn};

use crate::config::PanelConfig;
use crate::derive::add_derived_variables;
use crate::difference::first_difference;
use crate::error::Result;
use crate::impute::{impute_missing, ImputationReport};
use crate::loader::load_panel;
use crate::panel::{add_country_indicator, has_columns};

// Output of a preprocessing run.
#[derive(Debug)]
pub struct Preprocessed {
    pub data: DataFrame,
    pub imputation: ImputationReport,
    // False when the panel identifiers were absent and the levels were kept.
    pub differenced: bool,
}

// Run the full preprocessing pipeline
//
// Load, flag the country, derive the disparity variables, impute, and
// first-difference. Any load failure is returned untouched so the caller
// can halt.
pub fn preprocess(path: &Path, panel: &PanelConfig) -> Result<Preprocessed> {
    info!(path = %path.display(), "starting data preprocessing");
    let mut data = load_panel(path)?;
    add_country_indicator(&mut data, &panel.country_col, &panel.flag_col)?;
    add_derived_variables(&mut data)?;
    let imputation = impute_missing(&mut data, &panel.country_col)?;

    let identifiers = [panel.entity_col.as_str(), panel.time_col.as_str()];
    let (data, differenced) = if has_columns(&data, &identifiers) {
        (first_difference(&data, panel)?, true)
    } else {
        warn!(
            entity = %panel.entity_col,
            time = %panel.time_col,
            "panel identifiers not found, skipping first-differencing"
        );
        (data, false)
    };

    info!(
        rows = data.height(),
        columns = data.width(),
        "preprocessing complete"
    );
    Ok(Preprocessed {
        data,
        imputation,
        differenced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::{INT_MAX_DISADVANTAGE, RU_OVERAGE_LS_MALE};
    use crate::error::PipelineError;
    use crate::panel::numeric_values;
    use std::io::Write;

    fn write_csv(dir: &Path, contents: &str) -> std::path::PathBuf {
        let path = dir.join("panel.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn full_pipeline_differences_the_panel() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "country,region_id,year,OAEPG.H.1,OAEPG.H.2,EN.POP.DNST\n\
             Mexico,1,2010,1.0,3.0,10.0\n\
             Mexico,1,2012,2.0,,12.0\n\
             Mexico,1,2014,3.0,7.0,15.0\n\
             Chile,2,2010,2.0,2.0,5.0\n\
             Chile,2,2012,2.0,4.0,6.0\n\
             Chile,2,2014,2.0,6.0,8.0\n",
        );
        let out = preprocess(&path, &PanelConfig::default()).unwrap();
        assert!(out.differenced);
        assert_eq!(out.data.height(), 4);
        assert!(out.imputation.missing_before > 0);
        assert!(has_columns(&out.data, &["is_MEX", INT_MAX_DISADVANTAGE, RU_OVERAGE_LS_MALE]));

        let density = numeric_values(&out.data, "EN.POP.DNST").unwrap();
        let mut sorted: Vec<f64> = density.into_iter().flatten().collect();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(sorted, vec![1.0, 2.0, 2.0, 3.0]);
    }

    #[test]
    fn skips_differencing_without_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "country,x\nMexico,1.0\nChile,2.0\n");
        let out = preprocess(&path, &PanelConfig::default()).unwrap();
        assert!(!out.differenced);
        assert_eq!(out.data.height(), 2);
        let flags = numeric_values(&out.data, "is_MEX").unwrap();
        assert_eq!(flags, vec![Some(1.0), Some(0.0)]);
    }

    #[test]
    fn missing_file_is_a_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = preprocess(&dir.path().join("absent.csv"), &PanelConfig::default()).unwrap_err();
        assert!(err.is_load_failure());
        assert!(matches!(err, PipelineError::DataNotFound(_)));
    }
}
