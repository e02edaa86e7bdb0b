use ndarray::{Array1, Array2};
use polars::prelude::{ChunkCompare, DataFrame, NamedFrom, Series};
use tracing::{info, warn};

use crate::config::AnalysisConfig;
use crate::dml::CausalForestDml;
use crate::error::{PipelineError, Result};
use crate::panel::{has_columns, numeric_values};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Country {
    Mexico,
    Chile,
}

impl Country {
    pub const ALL: [Country; 2] = [Country::Mexico, Country::Chile];

    pub fn label(self) -> &'static str {
        match self {
            Self::Mexico => "Mexico",
            Self::Chile => "Chile",
        }
    }
}

// One causal question: the effect of `treatment` on `outcome`, allowed to
// vary with the heterogeneity features and adjusted for the controls.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSpec {
    key: String,
    name: String,
    outcome: String,
    treatment: String,
    heterogeneity: Vec<String>,
    controls: Vec<String>,
}

impl ScenarioSpec {
    // The outcome and treatment are removed from the feature and control
    // lists.
    pub fn new(
        key: &str,
        name: &str,
        outcome: &str,
        treatment: &str,
        heterogeneity: &[String],
        controls: &[String],
    ) -> Self {
        let keep = |c: &&String| c.as_str() != outcome && c.as_str() != treatment;
        Self {
            key: key.to_string(),
            name: name.to_string(),
            outcome: outcome.to_string(),
            treatment: treatment.to_string(),
            heterogeneity: heterogeneity.iter().filter(keep).cloned().collect(),
            controls: controls.iter().filter(keep).cloned().collect(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    pub fn treatment(&self) -> &str {
        &self.treatment
    }

    pub fn heterogeneity(&self) -> &[String] {
        &self.heterogeneity
    }

    pub fn controls(&self) -> &[String] {
        &self.controls
    }
}

// Country-level summary of the per-row effects. The interval is the average
// of the per-row bounds, not an interval for the averaged effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupEffect {
    pub cate: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub n: usize,
}

impl GroupEffect {
    // Average the `cate`, `ci_lower` and `ci_upper` columns of one country's
    // rows. An empty country gives NaN means.
    fn from_frame(rows: &DataFrame) -> Result<Self> {
        let mean = |name: &str| -> Result<f64> {
            Ok(rows.column(name)?.mean().unwrap_or(f64::NAN))
        };
        Ok(Self {
            cate: mean("cate")?,
            ci_lower: mean("ci_lower")?,
            ci_upper: mean("ci_upper")?,
            n: rows.height(),
        })
    }

    // Zero lies outside the interval. An undefined interval is never
    // significant.
    pub fn is_significant(&self) -> bool {
        self.ci_lower > 0.0 || self.ci_upper < 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectEstimate {
    pub key: String,
    pub scenario: String,
    pub outcome: String,
    pub treatment: String,
    pub mexico: GroupEffect,
    pub chile: GroupEffect,
    pub n_total: usize,
}

impl EffectEstimate {
    pub fn group(&self, country: Country) -> &GroupEffect {
        match country {
            Country::Mexico => &self.mexico,
            Country::Chile => &self.chile,
        }
    }
}

fn column_vector(data: &DataFrame, name: &str) -> Result<Array1<f64>> {
    let values = numeric_values(data, name)?;
    let missing = values.iter().filter(|v| v.is_none()).count();
    if missing > 0 {
        return Err(PipelineError::estimation(format!(
            "column '{name}' still has {missing} missing values"
        )));
    }
    Ok(values.into_iter().flatten().collect())
}

fn feature_matrix(data: &DataFrame, names: &[String]) -> Result<Array2<f64>> {
    let columns = names
        .iter()
        .map(|name| column_vector(data, name))
        .collect::<Result<Vec<_>>>()?;
    Ok(Array2::from_shape_fn((data.height(), names.len()), |(i, j)| {
        columns[j][i]
    }))
}

// Drop the columns the table does not have, warning about each one.
fn available(data: &DataFrame, scenario: &str, role: &str, names: &[String]) -> Vec<String> {
    names
        .iter()
        .filter(|name| {
            let present = has_columns(data, &[name.as_str()]);
            if !present {
                warn!(scenario, role, column = %name, "column not found, dropping it");
            }
            present
        })
        .cloned()
        .collect()
}

// Run the DML causal forest for one scenario
//
// Extracts Y, T, X and W, fits the estimator, and averages the per-row
// effects and interval bounds over each country. The table is not modified.
pub fn run_scenario(
    data: &DataFrame,
    spec: &ScenarioSpec,
    config: &AnalysisConfig,
) -> Result<EffectEstimate> {
    info!(
        scenario = spec.name(),
        outcome = spec.outcome(),
        treatment = spec.treatment(),
        heterogeneity = ?spec.heterogeneity(),
        controls = ?spec.controls(),
        "running scenario"
    );
    for required in [spec.outcome(), spec.treatment(), config.panel.flag_col.as_str()] {
        if !has_columns(data, &[required]) {
            return Err(PipelineError::MissingColumn(required.to_string()));
        }
    }
    let heterogeneity = available(data, spec.name(), "heterogeneity", spec.heterogeneity());
    let controls = available(data, spec.name(), "control", spec.controls());

    let y = column_vector(data, spec.outcome())?;
    let t = column_vector(data, spec.treatment())?;
    let x = feature_matrix(data, &heterogeneity)?;
    let w = if controls.is_empty() {
        None
    } else {
        Some(feature_matrix(data, &controls)?)
    };

    let estimator = CausalForestDml::new(&config.nuisance, &config.forest);
    let fitted = estimator.fit(&y, &t, &x, w.as_ref())?;
    let effect = fitted.effect(&x);
    let (lower, upper) = fitted.effect_interval(&x, config.forest.alpha)?;

    let flag = data.column(&config.panel.flag_col)?;
    let scored = DataFrame::new(vec![
        flag.clone(),
        Series::new("cate", effect.to_vec()),
        Series::new("ci_lower", lower.to_vec()),
        Series::new("ci_upper", upper.to_vec()),
    ])?;
    let mexico = scored.filter(&flag.equal(1)?)?;
    let chile = scored.filter(&flag.equal(0)?)?;

    Ok(EffectEstimate {
        key: spec.key().to_string(),
        scenario: spec.name().to_string(),
        outcome: spec.outcome().to_string(),
        treatment: spec.treatment().to_string(),
        mexico: GroupEffect::from_frame(&mexico)?,
        chile: GroupEffect::from_frame(&chile)?,
        n_total: data.height(),
    })
}

// Runs every scenario in order. A scenario that fails is logged and
// skipped so the remaining ones still produce estimates.
pub fn run_all_scenarios(
    data: &DataFrame,
    specs: &[ScenarioSpec],
    config: &AnalysisConfig,
) -> Vec<EffectEstimate> {
    let mut estimates = Vec::with_capacity(specs.len());
    for spec in specs {
        match run_scenario(data, spec, config) {
            Ok(estimate) => estimates.push(estimate),
            Err(e) => warn!(scenario = spec.name(), error = %e, "scenario failed, skipping"),
        }
    }
    info!(
        completed = estimates.len(),
        requested = specs.len(),
        "scenario runs finished"
    );
    estimates
}
