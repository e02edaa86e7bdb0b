use std::fmt;

use crate::scenario::{Country, EffectEstimate, GroupEffect};
use crate::validate::ValidationReport;

fn significance(group: &GroupEffect) -> &'static str {
    if group.cate.is_nan() {
        "n/a"
    } else if group.is_significant() {
        "Significant"
    } else {
        "Not Significant"
    }
}

// Implement `Display` for `EffectEstimate`.
impl fmt::Display for EffectEstimate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SCENARIO: {} =======================================\n\n\
            Outcome (Y): {} | Treatment (T): {}\n\
            Total Observations: {} (Mexico: {}, Chile: {})\n\n\
            Conditional Average Treatment Effects (CATEs):\n",
            self.scenario,
            self.outcome,
            self.treatment,
            self.n_total,
            self.mexico.n,
            self.chile.n
        )?;
        for country in Country::ALL {
            let group = self.group(country);
            if group.cate.is_nan() {
                writeln!(f, "  {:<7} : n/a (no rows)", country.label())?;
                continue;
            }
            writeln!(
                f,
                "  {:<7} : {:.4} (95% CI: [{:.4}, {:.4}])",
                country.label(),
                group.cate,
                group.ci_lower,
                group.ci_upper
            )?;
        }
        writeln!(f, "\nStatistical Significance at alpha=0.05:")?;
        for country in Country::ALL {
            writeln!(
                f,
                "  {:<7} : {}",
                country.label(),
                significance(self.group(country))
            )?;
        }
        Ok(())
    }
}

// Implement `Display` for `ValidationReport`.
impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "VALIDATION AGAINST REFERENCE RESULTS ========================")?;
        let mut current: Option<&str> = None;
        for comparison in &self.comparisons {
            if current != Some(comparison.key.as_str()) {
                writeln!(f, "\nScenario: {}", comparison.scenario)?;
                current = Some(comparison.key.as_str());
            }
            writeln!(
                f,
                "  {:<7} CATE: Actual={:.2}, Expected={:.2} -> {}",
                comparison.country.label(),
                comparison.actual,
                comparison.expected,
                if comparison.matched { "Match" } else { "Mismatch" }
            )?;
        }
        for key in &self.missing {
            writeln!(f, "\nWarning: scenario '{key}' not found in results.")?;
        }
        writeln!(f, "\n{}", "-".repeat(61))?;
        if self.all_match {
            writeln!(f, "SUCCESS: All generated results match the reference findings.")?;
        } else {
            writeln!(
                f,
                "FAILURE: One or more generated results do not match the reference findings."
            )?;
        }
        write!(f, "{}", "-".repeat(61))
    }
}
