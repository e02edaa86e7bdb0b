// Analysis configuration.
//
// Every section has a default, so a missing or partial `analysis.toml`
// still reproduces the published three-scenario study.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::scenario::ScenarioSpec;
use crate::validate::ReferenceRecord;

// Logging verbosity, mapped onto a `tracing` filter directive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Trace,
}

impl Verbosity {
    pub fn filter(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "info",
            Self::Verbose => "debug",
            Self::Trace => "trace",
        }
    }
}

// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub verbosity: Verbosity,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub nuisance: BoostingConfig,
    #[serde(default)]
    pub forest: ForestConfig,
    // Heterogeneity features shared by every scenario unless overridden.
    #[serde(default = "default_heterogeneity")]
    pub heterogeneity_features: Vec<String>,
    // Controls shared by every scenario unless overridden.
    #[serde(default = "default_controls")]
    pub control_vars: Vec<String>,
    #[serde(default = "default_scenarios")]
    pub scenarios: Vec<ScenarioEntry>,
    #[serde(default = "default_references")]
    pub references: Vec<ReferenceRecord>,
    #[serde(default)]
    pub validation: ValidationConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::default(),
            paths: PathsConfig::default(),
            panel: PanelConfig::default(),
            nuisance: BoostingConfig::default(),
            forest: ForestConfig::default(),
            heterogeneity_features: default_heterogeneity(),
            control_vars: default_controls(),
            scenarios: default_scenarios(),
            references: default_references(),
            validation: ValidationConfig::default(),
        }
    }
}

// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl AnalysisConfig {
    // Reads the config at `path`, falling back to the built-in defaults
    // when the file does not exist. Nothing is logged here since the
    // subscriber is configured from the result.
    pub fn load(path: &Path) -> Result<(Self, ConfigSource)> {
        if !path.is_file() {
            return Ok((Self::default(), ConfigSource::Defaults));
        }
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        Ok((config, ConfigSource::File(path.to_path_buf())))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        self.nuisance.check()?;
        self.forest.check()?;
        for entry in &self.scenarios {
            if entry.key.trim().is_empty() {
                return Err(PipelineError::config("scenario key must not be empty"));
            }
        }
        for reference in &self.references {
            if !(reference.tolerance >= 0.0) {
                return Err(PipelineError::config(format!(
                    "tolerance for '{}' must be non-negative",
                    reference.scenario
                )));
            }
        }
        Ok(())
    }

    // Resolves the scenario entries against the shared feature lists.
    pub fn scenario_specs(&self) -> Vec<ScenarioSpec> {
        self.scenarios
            .iter()
            .map(|entry| {
                ScenarioSpec::new(
                    &entry.key,
                    &entry.name,
                    &entry.outcome,
                    &entry.treatment,
                    entry
                        .heterogeneity
                        .as_deref()
                        .unwrap_or(&self.heterogeneity_features),
                    entry.controls.as_deref().unwrap_or(&self.control_vars),
                )
            })
            .collect()
    }
}

// Input and output locations, relative to the working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_raw_data")]
    pub raw_data: PathBuf,
    #[serde(default = "default_processed_data")]
    pub processed_data: PathBuf,
    #[serde(default = "default_figures_dir")]
    pub figures_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_data: default_raw_data(),
            processed_data: default_processed_data(),
            figures_dir: default_figures_dir(),
        }
    }
}

fn default_raw_data() -> PathBuf {
    PathBuf::from("data/raw/integrated_panel_data.csv")
}

fn default_processed_data() -> PathBuf {
    PathBuf::from("data/processed/processed_data.csv")
}

fn default_figures_dir() -> PathBuf {
    PathBuf::from("results/figures")
}

// Names of the panel's identifier columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(default = "default_entity_col")]
    pub entity_col: String,
    #[serde(default = "default_time_col")]
    pub time_col: String,
    #[serde(default = "default_country_col")]
    pub country_col: String,
    #[serde(default = "default_flag_col")]
    pub flag_col: String,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            entity_col: default_entity_col(),
            time_col: default_time_col(),
            country_col: default_country_col(),
            flag_col: default_flag_col(),
        }
    }
}

fn default_entity_col() -> String {
    "region_id".to_string()
}

fn default_time_col() -> String {
    "year".to_string()
}

fn default_country_col() -> String {
    "country".to_string()
}

fn default_flag_col() -> String {
    "is_MEX".to_string()
}

// Gradient boosting used for the outcome and treatment nuisance models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostingConfig {
    #[serde(default = "default_boosting_estimators")]
    pub n_estimators: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_boosting_depth")]
    pub max_depth: usize,
    #[serde(default = "default_boosting_split")]
    pub min_samples_split: usize,
    #[serde(default = "default_boosting_leaf")]
    pub min_samples_leaf: usize,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_boosting_estimators(),
            learning_rate: default_learning_rate(),
            max_depth: default_boosting_depth(),
            min_samples_split: default_boosting_split(),
            min_samples_leaf: default_boosting_leaf(),
        }
    }
}

impl BoostingConfig {
    fn check(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(PipelineError::config("nuisance.n_estimators must be positive"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(PipelineError::config("nuisance.learning_rate must be positive"));
        }
        if self.min_samples_leaf == 0 {
            return Err(PipelineError::config("nuisance.min_samples_leaf must be positive"));
        }
        Ok(())
    }
}

fn default_boosting_estimators() -> usize {
    100
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_boosting_depth() -> usize {
    3
}

fn default_boosting_split() -> usize {
    2
}

fn default_boosting_leaf() -> usize {
    1
}

// Causal forest and cross-fitting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    #[serde(default = "default_forest_estimators")]
    pub n_estimators: usize,
    // `None` grows trees until the leaf constraints stop them.
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default = "default_forest_split")]
    pub min_samples_split: usize,
    #[serde(default = "default_forest_leaf")]
    pub min_samples_leaf: usize,
    // Fraction of rows drawn for each tree.
    #[serde(default = "default_max_samples")]
    pub max_samples: f64,
    // Trees per little bag.
    #[serde(default = "default_subforest_size")]
    pub subforest_size: usize,
    #[serde(default = "default_true")]
    pub honest: bool,
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_forest_estimators(),
            max_depth: None,
            min_samples_split: default_forest_split(),
            min_samples_leaf: default_forest_leaf(),
            max_samples: default_max_samples(),
            subforest_size: default_subforest_size(),
            honest: true,
            cv_folds: default_cv_folds(),
            alpha: default_alpha(),
            seed: default_seed(),
        }
    }
}

impl ForestConfig {
    fn check(&self) -> Result<()> {
        if self.subforest_size < 2 {
            return Err(PipelineError::config("forest.subforest_size must be at least 2"));
        }
        if self.n_estimators < self.subforest_size {
            return Err(PipelineError::config(
                "forest.n_estimators must be at least forest.subforest_size",
            ));
        }
        if !(self.max_samples > 0.0 && self.max_samples <= 0.5) {
            return Err(PipelineError::config("forest.max_samples must lie in (0, 0.5]"));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(PipelineError::config("forest.alpha must lie in (0, 1)"));
        }
        if self.cv_folds < 2 {
            return Err(PipelineError::config("forest.cv_folds must be at least 2"));
        }
        if self.min_samples_leaf == 0 {
            return Err(PipelineError::config("forest.min_samples_leaf must be positive"));
        }
        Ok(())
    }
}

fn default_forest_estimators() -> usize {
    1000
}

fn default_forest_split() -> usize {
    10
}

fn default_forest_leaf() -> usize {
    5
}

fn default_max_samples() -> f64 {
    0.45
}

fn default_subforest_size() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_cv_folds() -> usize {
    2
}

fn default_alpha() -> f64 {
    0.05
}

fn default_seed() -> u64 {
    42
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    // Exit non-zero when any reference comparison fails.
    #[serde(default = "default_true")]
    pub fail_on_mismatch: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            fail_on_mismatch: true,
        }
    }
}

// One scenario as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioEntry {
    pub key: String,
    pub name: String,
    pub outcome: String,
    pub treatment: String,
    #[serde(default)]
    pub heterogeneity: Option<Vec<String>>,
    #[serde(default)]
    pub controls: Option<Vec<String>>,
}

fn default_heterogeneity() -> Vec<String> {
    ["is_MEX", "EN.POP.DNST", "SI.POV.GINI", "SP.URB.TOTL.IN.ZS"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_controls() -> Vec<String> {
    [
        "NY.GDP.PCAP.PP.KD",
        "XGOVEXP.IMF",
        "YEARS.FC.COMP.1T3",
        "YEARS.FC.FREE.1T3",
        "CTRL_SEVERITY",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn scenario_entry(key: &str, name: &str, outcome: &str, treatment: &str) -> ScenarioEntry {
    ScenarioEntry {
        key: key.to_string(),
        name: name.to_string(),
        outcome: outcome.to_string(),
        treatment: treatment.to_string(),
        heterogeneity: None,
        controls: None,
    }
}

fn default_scenarios() -> Vec<ScenarioEntry> {
    vec![
        scenario_entry(
            "density_disaster",
            "Density Disaster",
            "INT_MAX_DISADVANTAGE",
            "EN.POP.DNST",
        ),
        scenario_entry(
            "convergence_lever",
            "Convergence Lever",
            "RU_OVERAGE_LS_Male",
            "XGOVEXP.IMF",
        ),
        scenario_entry(
            "institutional_amplification",
            "Institutional Amplification",
            "INT_MAX_DISADVANTAGE",
            "SI.POV.GINI",
        ),
    ]
}

fn default_references() -> Vec<ReferenceRecord> {
    vec![
        ReferenceRecord::new("density_disaster", 1.02, 1.05, 0.1),
        ReferenceRecord::new("convergence_lever", -0.41, -0.34, 0.1),
        ReferenceRecord::new("institutional_amplification", 1.89, 2.94, 0.2),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_reproduce_published_study() {
        let config = AnalysisConfig::default();
        assert_eq!(config.scenarios.len(), 3);
        assert_eq!(config.references.len(), 3);
        assert_eq!(config.forest.n_estimators, 1000);
        assert_eq!(config.forest.min_samples_split, 10);
        assert_eq!(config.forest.min_samples_leaf, 5);
        assert_eq!(config.forest.max_depth, None);
        assert_eq!(config.nuisance.n_estimators, 100);
        assert_eq!(config.forest.seed, 42);
        assert!(config.validation.fail_on_mismatch);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = AnalysisConfig::from_toml("").unwrap();
        assert_eq!(config.verbosity, Verbosity::Normal);
        assert_eq!(config.paths.figures_dir, PathBuf::from("results/figures"));
        assert_eq!(config.scenarios[1].key, "convergence_lever");
    }

    #[test]
    fn toml_overrides_sections() {
        let config = AnalysisConfig::from_toml(
            r#"
            verbosity = "verbose"
            heterogeneity_features = ["is_MEX", "X1"]
            control_vars = []

            [forest]
            n_estimators = 40
            seed = 7

            [[scenarios]]
            key = "toy"
            name = "Toy Scenario"
            outcome = "Y"
            treatment = "X1"

            [[references]]
            scenario = "toy"
            mexico = 1.0
            chile = 2.0
            tolerance = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.verbosity.filter(), "debug");
        assert_eq!(config.forest.n_estimators, 40);
        assert_eq!(config.forest.seed, 7);
        assert_eq!(config.forest.min_samples_leaf, 5);

        let specs = config.scenario_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].heterogeneity(), ["is_MEX".to_string()]);
        assert!(specs[0].controls().is_empty());
    }

    #[test]
    fn rejects_bad_forest_parameters() {
        let err = AnalysisConfig::from_toml("[forest]\nalpha = 1.5\n").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));

        let err = AnalysisConfig::from_toml("[forest]\nsubforest_size = 1\n").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));

        let err = AnalysisConfig::from_toml("[forest]\nmax_samples = 0.8\n").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = AnalysisConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.scenarios.len(), 3);
        assert_eq!(source, ConfigSource::Defaults);
    }

    #[test]
    fn existing_file_is_reported_as_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.toml");
        std::fs::write(&path, "verbosity = \"verbose\"\n").unwrap();
        let (config, source) = AnalysisConfig::load(&path).unwrap();
        assert_eq!(config.verbosity, Verbosity::Verbose);
        assert_eq!(source, ConfigSource::File(path));
    }

    #[test]
    fn unreadable_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.toml");
        std::fs::write(&path, "[forest]\nn_estimators = \"many\"\n").unwrap();
        assert!(AnalysisConfig::load(&path).is_err());
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let shipped = AnalysisConfig::from_toml(include_str!("../config/analysis.toml")).unwrap();
        let defaults = AnalysisConfig::default();
        assert_eq!(shipped.verbosity, defaults.verbosity);
        assert_eq!(shipped.forest.n_estimators, defaults.forest.n_estimators);
        assert_eq!(shipped.nuisance.max_depth, defaults.nuisance.max_depth);
        assert_eq!(shipped.heterogeneity_features, defaults.heterogeneity_features);
        assert_eq!(shipped.control_vars, defaults.control_vars);
        assert_eq!(shipped.references, defaults.references);
        assert_eq!(shipped.scenario_specs(), defaults.scenario_specs());
    }
}
