use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::scenario::{Country, EffectEstimate};

// Published country effects for one scenario and the accepted distance
// from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    // Scenario key, matched against `EffectEstimate::key`.
    pub scenario: String,
    pub mexico: f64,
    pub chile: f64,
    pub tolerance: f64,
}

impl ReferenceRecord {
    pub fn new(scenario: &str, mexico: f64, chile: f64, tolerance: f64) -> Self {
        Self {
            scenario: scenario.to_string(),
            mexico,
            chile,
            tolerance,
        }
    }

    pub fn expected(&self, country: Country) -> f64 {
        match country {
            Country::Mexico => self.mexico,
            Country::Chile => self.chile,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub key: String,
    pub scenario: String,
    pub country: Country,
    pub actual: f64,
    pub expected: f64,
    pub tolerance: f64,
    pub matched: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationReport {
    pub all_match: bool,
    pub comparisons: Vec<Comparison>,
    // Referenced scenario keys with no estimate.
    pub missing: Vec<String>,
}

// Compare estimates against the reference table
//
// Every reference record is checked per country with
// `|actual - expected| <= tolerance`. A referenced scenario without an
// estimate counts as a failure, and so does a NaN effect.
pub fn validate(estimates: &[EffectEstimate], references: &[ReferenceRecord]) -> ValidationReport {
    let mut report = ValidationReport {
        all_match: true,
        ..ValidationReport::default()
    };
    for reference in references {
        let Some(estimate) = estimates.iter().find(|e| e.key == reference.scenario) else {
            warn!(scenario = %reference.scenario, "scenario not found in results");
            report.missing.push(reference.scenario.clone());
            report.all_match = false;
            continue;
        };
        for country in Country::ALL {
            let actual = estimate.group(country).cate;
            let expected = reference.expected(country);
            let matched = (actual - expected).abs() <= reference.tolerance;
            report.all_match &= matched;
            report.comparisons.push(Comparison {
                key: reference.scenario.clone(),
                scenario: estimate.scenario.clone(),
                country,
                actual,
                expected,
                tolerance: reference.tolerance,
                matched,
            });
        }
    }
    info!(
        all_match = report.all_match,
        comparisons = report.comparisons.len(),
        missing = report.missing.len(),
        "validation finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::GroupEffect;

    fn estimate(key: &str, mexico: f64, chile: f64) -> EffectEstimate {
        let group = |cate: f64| GroupEffect {
            cate,
            ci_lower: cate - 1.0,
            ci_upper: cate + 1.0,
            n: 10,
        };
        EffectEstimate {
            key: key.to_string(),
            scenario: format!("Scenario {key}"),
            outcome: "Y".to_string(),
            treatment: "T".to_string(),
            mexico: group(mexico),
            chile: group(chile),
            n_total: 20,
        }
    }

    #[test]
    fn wide_tolerance_passes_and_tight_tolerance_fails() {
        let estimates = vec![estimate("a", 1.00, 1.10), estimate("b", -0.40, -0.30)];
        let wide = vec![
            ReferenceRecord::new("a", 1.02, 1.05, 0.5),
            ReferenceRecord::new("b", -0.41, -0.34, 0.5),
        ];
        let report = validate(&estimates, &wide);
        assert!(report.all_match);
        assert_eq!(report.comparisons.len(), 4);
        assert!(report.missing.is_empty());

        // Chile in "a" is 0.05 away, so 0.03 is below the gap.
        let tight = vec![
            ReferenceRecord::new("a", 1.02, 1.05, 0.03),
            ReferenceRecord::new("b", -0.41, -0.34, 0.5),
        ];
        let report = validate(&estimates, &tight);
        assert!(!report.all_match);
        let failed: Vec<_> = report.comparisons.iter().filter(|c| !c.matched).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key, "a");
        assert_eq!(failed[0].country, Country::Chile);
    }

    #[test]
    fn missing_scenario_fails() {
        let estimates = vec![estimate("a", 1.0, 1.0)];
        let references = vec![
            ReferenceRecord::new("a", 1.0, 1.0, 0.1),
            ReferenceRecord::new("gone", 0.0, 0.0, 10.0),
        ];
        let report = validate(&estimates, &references);
        assert!(!report.all_match);
        assert_eq!(report.missing, vec!["gone".to_string()]);
        assert_eq!(report.comparisons.len(), 2);
    }

    #[test]
    fn nan_effect_never_matches() {
        let estimates = vec![estimate("a", f64::NAN, 1.0)];
        let references = vec![ReferenceRecord::new("a", 1.0, 1.0, 100.0)];
        assert!(!validate(&estimates, &references).all_match);
    }

    #[test]
    fn empty_reference_table_passes() {
        let report = validate(&[estimate("a", 1.0, 1.0)], &[]);
        assert!(report.all_match);
        assert!(report.comparisons.is_empty());
    }
}
