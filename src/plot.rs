// Per-scenario CATE bar charts, rendered straight to SVG.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::scenario::{Country, EffectEstimate};

const WIDTH: f64 = 720.0;
const HEIGHT: f64 = 432.0;
const MARGIN_LEFT: f64 = 90.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_BOTTOM: f64 = 50.0;
const N_TICKS: usize = 5;

fn country_color(country: Country) -> &'static str {
    match country {
        Country::Mexico => "#006847",
        Country::Chile => "#d52b1e",
    }
}

// `cate_<name lower-cased, spaces replaced by underscores>.svg`
pub fn figure_filename(scenario: &str) -> String {
    format!("cate_{}.svg", scenario.replace(' ', "_").to_lowercase())
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// Minimal SVG document builder.
struct Svg {
    body: String,
}

impl Svg {
    fn new() -> Self {
        Self {
            body: String::new(),
        }
    }

    fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: &str, opacity: f64) {
        self.body.push_str(&format!(
            "<rect x=\"{x:.2}\" y=\"{y:.2}\" width=\"{w:.2}\" height=\"{h:.2}\" \
             fill=\"{fill}\" fill-opacity=\"{opacity}\" stroke=\"black\" stroke-width=\"1.5\"/>\n"
        ));
    }

    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, width: f64, dashed: bool) {
        let dash = if dashed { " stroke-dasharray=\"6,4\"" } else { "" };
        self.body.push_str(&format!(
            "<line x1=\"{x1:.2}\" y1=\"{y1:.2}\" x2=\"{x2:.2}\" y2=\"{y2:.2}\" \
             stroke=\"black\" stroke-width=\"{width}\"{dash}/>\n"
        ));
    }

    fn text(&mut self, x: f64, y: f64, content: &str, size: f64, anchor: &str, bold: bool) {
        let weight = if bold { "bold" } else { "normal" };
        self.body.push_str(&format!(
            "<text x=\"{x:.2}\" y=\"{y:.2}\" font-family=\"sans-serif\" font-size=\"{size}\" \
             font-weight=\"{weight}\" text-anchor=\"{anchor}\">{}</text>\n",
            escape(content)
        ));
    }

    fn text_rotated(&mut self, x: f64, y: f64, content: &str, size: f64) {
        self.body.push_str(&format!(
            "<text x=\"{x:.2}\" y=\"{y:.2}\" font-family=\"sans-serif\" font-size=\"{size}\" \
             text-anchor=\"middle\" transform=\"rotate(-90 {x:.2} {y:.2})\">{}</text>\n",
            escape(content)
        ));
    }

    fn finish(self) -> String {
        format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{WIDTH}\" height=\"{HEIGHT}\" \
             viewBox=\"0 0 {WIDTH} {HEIGHT}\">\n\
             <rect width=\"100%\" height=\"100%\" fill=\"white\"/>\n{}</svg>\n",
            self.body
        )
    }
}

// Value range covering zero, every effect and every interval bound, padded
// by a tenth on each side.
fn value_range(estimate: &EffectEstimate) -> (f64, f64) {
    let values: Vec<f64> = Country::ALL
        .iter()
        .flat_map(|&c| {
            let g = estimate.group(c);
            [g.cate, g.ci_lower, g.ci_upper]
        })
        .filter(|v| v.is_finite())
        .collect();
    let lo = values.iter().copied().fold(0.0_f64, f64::min);
    let hi = values.iter().copied().fold(0.0_f64, f64::max);
    let span = hi - lo;
    if span <= f64::EPSILON {
        return (lo - 1.0, hi + 1.0);
    }
    (lo - 0.1 * span, hi + 0.1 * span)
}

// Renders the Mexico vs Chile comparison: one bar per country with the
// averaged interval as error bars, a dashed zero line and value labels.
pub fn render_cate_chart(estimate: &EffectEstimate) -> String {
    let (lo, hi) = value_range(estimate);
    let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let y_of = |v: f64| MARGIN_TOP + (hi - v) / (hi - lo) * plot_h;

    let mut svg = Svg::new();
    svg.text(
        WIDTH / 2.0,
        MARGIN_TOP / 2.0,
        &format!("CATE of {} on {}", estimate.treatment, estimate.outcome),
        16.0,
        "middle",
        true,
    );
    svg.text_rotated(
        MARGIN_LEFT / 3.0,
        MARGIN_TOP + plot_h / 2.0,
        "Conditional Average Treatment Effect (CATE)",
        12.0,
    );

    // Axes and ticks.
    svg.line(MARGIN_LEFT, MARGIN_TOP, MARGIN_LEFT, MARGIN_TOP + plot_h, 1.0, false);
    svg.line(
        MARGIN_LEFT,
        MARGIN_TOP + plot_h,
        MARGIN_LEFT + plot_w,
        MARGIN_TOP + plot_h,
        1.0,
        false,
    );
    for k in 0..N_TICKS {
        let v = lo + (hi - lo) * k as f64 / (N_TICKS - 1) as f64;
        let y = y_of(v);
        svg.line(MARGIN_LEFT - 5.0, y, MARGIN_LEFT, y, 1.0, false);
        svg.text(MARGIN_LEFT - 8.0, y + 4.0, &format!("{v:.2}"), 10.0, "end", false);
    }

    let slot = plot_w / Country::ALL.len() as f64;
    let bar_w = 0.5 * slot;
    let zero = y_of(0.0);
    for (i, &country) in Country::ALL.iter().enumerate() {
        let group = estimate.group(country);
        let center = MARGIN_LEFT + slot * (i as f64 + 0.5);
        svg.text(center, MARGIN_TOP + plot_h + 20.0, country.label(), 12.0, "middle", false);
        if !group.cate.is_finite() {
            svg.text(center, zero - 6.0, "n/a", 11.0, "middle", true);
            continue;
        }

        let top = y_of(group.cate);
        svg.rect(
            center - bar_w / 2.0,
            top.min(zero),
            bar_w,
            (top - zero).abs(),
            country_color(country),
            0.8,
        );
        if group.ci_lower.is_finite() && group.ci_upper.is_finite() {
            let (y_lo, y_hi) = (y_of(group.ci_lower), y_of(group.ci_upper));
            let cap = bar_w / 8.0;
            svg.line(center, y_lo, center, y_hi, 1.5, false);
            svg.line(center - cap, y_lo, center + cap, y_lo, 1.5, false);
            svg.line(center - cap, y_hi, center + cap, y_hi, 1.5, false);
        }
        let label_y = if group.cate >= 0.0 { top - 8.0 } else { top + 16.0 };
        svg.text(
            center + bar_w / 4.0,
            label_y,
            &format!("{:.3}", group.cate),
            11.0,
            "middle",
            true,
        );
    }
    svg.line(MARGIN_LEFT, zero, MARGIN_LEFT + plot_w, zero, 0.8, true);

    svg.finish()
}

// Writes the chart for `estimate` into `dir`, creating it if needed, and
// returns the file path.
pub fn save_cate_chart(estimate: &EffectEstimate, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(figure_filename(&estimate.scenario));
    std::fs::write(&path, render_cate_chart(estimate))?;
    info!(path = %path.display(), "saved CATE comparison plot");
    Ok(path)
}
