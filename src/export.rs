//! CSV and JSON output of simulation results.

use crate::simulator::SimulationResult;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Shortest text that parses back to the same `f64`; shared by every CSV writer.
fn format_value(value: f64) -> String {
    value.to_string()
}

/// Writes one `step,mean,p5,p95` row per time step.
pub fn write_bands_csv<W: Write>(result: &SimulationResult, writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(["step", "mean", "p5", "p95"])?;
    for band in result.bands() {
        csv_writer.write_record([
            band.step.to_string(),
            format_value(band.mean),
            format_value(band.p5),
            format_value(band.p95),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Writes the raw paths in wide format: one row per step, one column per path.
pub fn write_paths_csv<W: Write>(result: &SimulationResult, writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = Vec::with_capacity(result.paths().len() + 1);
    header.push("step".to_string());
    header.extend((0..result.paths().len()).map(|i| format!("path_{}", i)));
    csv_writer.write_record(&header)?;

    for step in 0..=result.horizon() {
        let mut row = Vec::with_capacity(result.paths().len() + 1);
        row.push(step.to_string());
        row.extend(
            result
                .paths()
                .iter()
                .map(|p| p.at(step).map(format_value).unwrap_or_default()),
        );
        csv_writer.write_record(&row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_json<W: Write>(result: &SimulationResult, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, result)?;
    Ok(())
}

fn create_file(path: &Path) -> Result<std::io::BufWriter<std::fs::File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(std::io::BufWriter::new(file))
}

pub fn save_bands_csv(result: &SimulationResult, path: &Path) -> Result<()> {
    write_bands_csv(result, create_file(path)?)?;
    info!("Saved per-step bands: {}", path.display());
    Ok(())
}

pub fn save_paths_csv(result: &SimulationResult, path: &Path) -> Result<()> {
    write_paths_csv(result, create_file(path)?)?;
    info!("Saved simulated paths: {}", path.display());
    Ok(())
}

pub fn save_json(result: &SimulationResult, path: &Path) -> Result<()> {
    let mut writer = create_file(path)?;
    write_json(result, &mut writer)?;
    writer.flush()?;
    info!("Saved simulation result: {}", path.display());
    Ok(())
}
