use crate::config::{LOWER_PERCENTILE, UPPER_PERCENTILE};
use crate::simulator::SimulationResult;
use std::fmt::Write;

const WIDTH: usize = 58;

fn boxed_line(out: &mut String, text: &str) {
    let _ = writeln!(out, "║ {:<width$} ║", text, width = WIDTH);
}

fn rule(out: &mut String, left: char, right: char) {
    let _ = writeln!(out, "{}{}{}", left, "═".repeat(WIDTH + 2), right);
}

/// Renders the end-of-horizon summary as a text block.
pub fn render_summary(label: &str, result: &SimulationResult) -> String {
    let params = result.params();
    let summary = result.final_summary();
    let pct_change = (summary.median / params.start_price - 1.0) * 100.0;
    let direction = if pct_change >= 0.0 { "▲" } else { "▼" };

    let mut out = String::new();
    rule(&mut out, '╔', '╗');
    boxed_line(
        &mut out,
        &format!("Monte Carlo Simulation: {} ({} steps)", label, result.horizon()),
    );
    rule(&mut out, '╠', '╣');
    boxed_line(&mut out, &format!("Paths               : {}", result.paths().len()));
    boxed_line(&mut out, &format!("Start Price         : {:.2}", params.start_price));
    boxed_line(
        &mut out,
        &format!(
            "Drift / Volatility  : {:+.5} / {:.5} per step",
            params.drift_per_step, params.volatility_per_step
        ),
    );
    rule(&mut out, '╠', '╣');
    boxed_line(&mut out, &format!("Mean Price          : {:.2}", summary.mean));
    boxed_line(
        &mut out,
        &format!(
            "Median Price        : {:.2} ({}{:.1}%)",
            summary.median,
            direction,
            pct_change.abs()
        ),
    );
    boxed_line(
        &mut out,
        &format!(
            "P{:.0}-P{:.0} Interval     : [{:.2}, {:.2}]",
            LOWER_PERCENTILE, UPPER_PERCENTILE, summary.p5, summary.p95
        ),
    );
    boxed_line(&mut out, &format!("Std Dev             : {:.2}", summary.std_dev));
    boxed_line(
        &mut out,
        &format!(
            "P(end > start)      : {:.1}%",
            summary.probability_of_gain * 100.0
        ),
    );
    rule(&mut out, '╚', '╝');
    out
}

pub fn print_summary(label: &str, result: &SimulationResult) {
    println!("\n{}", render_summary(label, result));
    println!("⚠  Educational use only. Not financial advice.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{SimulationParameters, simulate_seeded};

    #[test]
    fn test_render_summary_flat_scenario() {
        let params = SimulationParameters {
            start_price: 100.0,
            step_count: 2,
            drift_per_step: 0.0,
            volatility_per_step: 0.0,
            path_count: 5,
        };
        let result = simulate_seeded(params, 1).unwrap();
        let text = render_summary("AAPL", &result);

        assert!(text.contains("Monte Carlo Simulation: AAPL (2 steps)"));
        assert!(text.contains("Paths               : 5"));
        assert!(text.contains("Mean Price          : 100.00"));
        assert!(text.contains("Median Price        : 100.00 (▲0.0%)"));
        assert!(text.contains("P5-P95 Interval     : [100.00, 100.00]"));
        assert!(text.contains("P(end > start)      : 0.0%"));
        assert!(text.starts_with('╔'));
    }
}
