use crate::simulator::SimulationParameters;
use crate::stats;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Represents a single candlestick data point (OHLCV).
#[derive(Clone, Debug, PartialEq)]
pub struct Candle {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: Option<f64>,
    pub volume: f64,
}

/// Daily price history for one symbol, oldest first.
#[derive(Clone, Debug)]
pub struct PriceHistory {
    pub symbol: String,
    pub candles: Vec<Candle>,
}

/// Which per-period return series drives drift and volatility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReturnKind {
    /// Percentage change `p[t] / p[t-1] - 1`.
    #[default]
    Simple,
    /// Log return `ln(p[t] / p[t-1])`.
    Log,
}

/// Return statistics of a history, ready to seed a simulation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReturnStats {
    pub drift: f64,
    pub volatility: f64,
    pub last_price: f64,
    pub observations: usize,
}

impl ReturnStats {
    pub fn parameters(&self, step_count: i32, path_count: i32) -> SimulationParameters {
        SimulationParameters {
            start_price: self.last_price,
            step_count,
            drift_per_step: self.drift,
            volatility_per_step: self.volatility,
            path_count,
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Yahoo chart JSON (as cached by the chart endpoint)
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Debug)]
struct YahooChart {
    result: Vec<YahooResult>,
}

#[derive(Deserialize, Debug)]
struct YahooResult {
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Debug)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
    #[serde(default)]
    adjclose: Vec<YahooAdjClose>,
}

#[derive(Deserialize, Debug)]
struct YahooQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Deserialize, Debug)]
struct YahooAdjClose {
    adjclose: Vec<Option<f64>>,
}

// ──────────────────────────────────────────────────────────────────────────────
// Yahoo-style CSV (Date,Open,High,Low,Close,Adj Close,Volume)
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct CsvRow {
    #[serde(rename = "Date", alias = "date")]
    date: String,
    #[serde(rename = "Open", alias = "open", default, deserialize_with = "csv::invalid_option")]
    open: Option<f64>,
    #[serde(rename = "High", alias = "high", default, deserialize_with = "csv::invalid_option")]
    high: Option<f64>,
    #[serde(rename = "Low", alias = "low", default, deserialize_with = "csv::invalid_option")]
    low: Option<f64>,
    #[serde(rename = "Close", alias = "close", default, deserialize_with = "csv::invalid_option")]
    close: Option<f64>,
    #[serde(
        rename = "Adj Close",
        alias = "adj_close",
        alias = "adjclose",
        default,
        deserialize_with = "csv::invalid_option"
    )]
    adj_close: Option<f64>,
    #[serde(rename = "Volume", alias = "volume", default, deserialize_with = "csv::invalid_option")]
    volume: Option<f64>,
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Unrecognised date '{}'", trimmed))
}

fn usable_price(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Parses a Yahoo-style CSV export. Rows without a usable close are skipped.
pub fn parse_csv<R: Read>(symbol: &str, reader: R) -> Result<PriceHistory> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut candles = Vec::new();
    let mut skipped = 0usize;
    for (row_idx, record) in reader.deserialize::<CsvRow>().enumerate() {
        let row = record.with_context(|| format!("Malformed CSV row {}", row_idx + 1))?;
        let Some(close) = row.close.filter(|&c| usable_price(c)) else {
            skipped += 1;
            continue;
        };
        let date = parse_date(&row.date)
            .with_context(|| format!("Invalid date in CSV row {}", row_idx + 1))?;
        candles.push(Candle {
            date,
            open: row.open.unwrap_or(close),
            high: row.high.unwrap_or(close),
            low: row.low.unwrap_or(close),
            close,
            adj_close: row.adj_close.filter(|&c| usable_price(c)),
            volume: row.volume.unwrap_or(0.0),
        });
    }

    if skipped > 0 {
        debug!("Skipped {} CSV rows without a usable close for {}", skipped, symbol);
    }
    PriceHistory::from_candles(symbol, candles)
}

/// Parses a cached Yahoo chart response.
pub fn parse_chart_json<R: Read>(symbol: &str, reader: R) -> Result<PriceHistory> {
    let response: YahooChartResponse =
        serde_json::from_reader(reader).context("Invalid Yahoo chart JSON")?;
    let result = response
        .chart
        .result
        .first()
        .ok_or(anyhow::anyhow!("No chart result for {}", symbol))?;
    let quotes = result
        .indicators
        .quote
        .first()
        .ok_or(anyhow::anyhow!("No quote result for {}", symbol))?;
    let adjclose = result.indicators.adjclose.first().map(|a| &a.adjclose);

    let mut candles = Vec::with_capacity(result.timestamp.len());
    for (i, &timestamp) in result.timestamp.iter().enumerate() {
        let Some(close) = quotes.close.get(i).copied().flatten().filter(|&c| usable_price(c)) else {
            continue;
        };
        let Some(date) = Utc.timestamp_opt(timestamp, 0).single() else {
            warn!("Skipping out-of-range timestamp {} for {}", timestamp, symbol);
            continue;
        };
        let field = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
        candles.push(Candle {
            date,
            open: field(&quotes.open).unwrap_or(close),
            high: field(&quotes.high).unwrap_or(close),
            low: field(&quotes.low).unwrap_or(close),
            close,
            adj_close: adjclose.and_then(field).filter(|&c| usable_price(c)),
            volume: field(&quotes.volume).unwrap_or(0.0),
        });
    }

    PriceHistory::from_candles(symbol, candles)
}

/// Loads a locally stored history. `.json` files are read as a Yahoo chart
/// response, everything else as CSV. The symbol defaults to the file stem.
pub fn load_history(path: &Path, symbol: Option<&str>) -> Result<PriceHistory> {
    let symbol = symbol
        .map(str::to_string)
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "UNKNOWN".to_string())
        .to_uppercase();

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open history file {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let history = if is_json {
        parse_chart_json(&symbol, reader)
    } else {
        parse_csv(&symbol, reader)
    }
    .with_context(|| format!("Failed to load history from {}", path.display()))?;

    info!(
        "Loaded {} candles for {} from {}",
        history.candles.len(),
        history.symbol,
        path.display()
    );
    Ok(history)
}

impl PriceHistory {
    pub fn from_candles(symbol: &str, mut candles: Vec<Candle>) -> Result<Self> {
        if candles.is_empty() {
            anyhow::bail!("No usable price data found for {}", symbol);
        }
        candles.sort_by_key(|c| c.date);

        let adjusted = candles.iter().filter(|c| c.adj_close.is_some()).count();
        if adjusted > 0 && adjusted < candles.len() {
            warn!(
                "{}: {} of {} rows lack an adjusted close; using raw closes",
                symbol,
                candles.len() - adjusted,
                candles.len()
            );
        }

        Ok(Self {
            symbol: symbol.to_uppercase(),
            candles,
        })
    }

    /// True when every candle carries an adjusted close.
    pub fn fully_adjusted(&self) -> bool {
        self.candles.iter().all(|c| c.adj_close.is_some())
    }

    /// Close series used for return statistics.
    ///
    /// Adjusted closes are used only when every candle has one; raw and
    /// adjusted values are never mixed within a series.
    pub fn closes(&self) -> Vec<f64> {
        if self.fully_adjusted() {
            self.candles
                .iter()
                .map(|c| c.adj_close.unwrap_or(c.close))
                .collect()
        } else {
            self.candles.iter().map(|c| c.close).collect()
        }
    }

    pub fn last_close(&self) -> Option<f64> {
        self.closes().last().copied()
    }

    pub fn simple_returns(&self) -> Vec<f64> {
        self.closes().windows(2).map(|w| w[1] / w[0] - 1.0).collect()
    }

    pub fn log_returns(&self) -> Vec<f64> {
        self.closes().windows(2).map(|w| (w[1] / w[0]).ln()).collect()
    }

    /// Sample mean and sample standard deviation of the chosen returns,
    /// plus the most recent close.
    pub fn return_stats(&self, kind: ReturnKind) -> Result<ReturnStats> {
        let returns = match kind {
            ReturnKind::Simple => self.simple_returns(),
            ReturnKind::Log => self.log_returns(),
        };
        if returns.len() < 2 {
            anyhow::bail!(
                "Not enough history for {} (need at least 3 prices, got {})",
                self.symbol,
                self.candles.len()
            );
        }
        let last_price = self
            .last_close()
            .ok_or(anyhow::anyhow!("No prices for {}", self.symbol))?;

        Ok(ReturnStats {
            drift: stats::mean(&returns),
            volatility: stats::sample_std_dev(&returns),
            last_price,
            observations: returns.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSV: &str = "Date,Open,High,Low,Close,Adj Close,Volume\n\
2024-01-02,100,101,99,100,50,1000\n\
2024-01-03,100,103,99,102,51,1200\n\
2024-01-04,null,null,null,null,null,null\n\
2024-01-05,102,102,98,99,49.5,900\n\
2024-01-08,99,105,99,104,52,1500\n";

    #[test]
    fn test_parse_csv_prefers_adjusted_close_and_skips_nulls() {
        let history = parse_csv("aapl", SAMPLE_CSV.as_bytes()).unwrap();
        assert_eq!(history.symbol, "AAPL");
        assert_eq!(history.candles.len(), 4);
        assert_eq!(history.closes(), vec![50.0, 51.0, 49.5, 52.0]);
        assert_eq!(history.last_close(), Some(52.0));
        assert_eq!(history.candles[1].close, 102.0);
        assert_eq!(history.candles[1].volume, 1200.0);
    }

    #[test]
    fn test_partial_adjusted_close_is_not_mixed_with_raw() {
        let csv = "Date,Close,Adj Close\n\
2024-01-01,100,50\n\
2024-01-02,100,null\n\
2024-01-03,100,50\n\
2024-01-04,100,50\n";
        let history = parse_csv("x", csv.as_bytes()).unwrap();
        assert_eq!(history.candles.len(), 4);
        assert!(!history.fully_adjusted());
        assert_eq!(history.closes(), vec![100.0; 4]);
        assert_eq!(history.last_close(), Some(100.0));

        let stats = history.return_stats(ReturnKind::Simple).unwrap();
        assert_eq!(stats.drift, 0.0);
        assert_eq!(stats.volatility, 0.0, "flat series must have zero volatility");
    }

    #[test]
    fn test_parse_csv_close_only_columns() {
        let csv = "date,close\n2024-03-02,10\n2024-03-01,8\n2024-03-03,11\n";
        let history = parse_csv("x", csv.as_bytes()).unwrap();
        // Sorted by date regardless of file order.
        assert_eq!(history.closes(), vec![8.0, 10.0, 11.0]);
        assert_eq!(history.candles[0].open, 8.0);
        assert_eq!(history.candles[0].adj_close, None);
    }

    #[test]
    fn test_parse_csv_rejects_bad_dates_and_empty_files() {
        let bad_date = "Date,Close\nyesterday,10\n";
        assert!(parse_csv("x", bad_date.as_bytes()).is_err());

        let empty = "Date,Close\n";
        assert!(parse_csv("x", empty.as_bytes()).is_err());
    }

    #[test]
    fn test_return_stats_simple_returns() {
        let history = parse_csv("aapl", SAMPLE_CSV.as_bytes()).unwrap();
        let stats = history.return_stats(ReturnKind::Simple).unwrap();

        let returns = [51.0 / 50.0 - 1.0, 49.5 / 51.0 - 1.0, 52.0 / 49.5 - 1.0];
        let mean = returns.iter().sum::<f64>() / 3.0;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 2.0;

        assert_eq!(stats.observations, 3);
        assert!((stats.drift - mean).abs() < 1e-12);
        assert!((stats.volatility - var.sqrt()).abs() < 1e-12);
        assert_eq!(stats.last_price, 52.0);

        let params = stats.parameters(10, 20);
        assert_eq!(params.start_price, 52.0);
        assert_eq!(params.step_count, 10);
        assert_eq!(params.path_count, 20);
        assert_eq!(params.drift_per_step, stats.drift);
        assert_eq!(params.volatility_per_step, stats.volatility);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_return_stats_log_returns() {
        let history = parse_csv("aapl", SAMPLE_CSV.as_bytes()).unwrap();
        let stats = history.return_stats(ReturnKind::Log).unwrap();
        // Log returns telescope: their mean is ln(last / first) / n.
        let expected = (52.0f64 / 50.0).ln() / 3.0;
        assert!((stats.drift - expected).abs() < 1e-12);
    }

    #[test]
    fn test_return_stats_needs_three_prices() {
        let csv = "Date,Close\n2024-01-01,10\n2024-01-02,11\n";
        let history = parse_csv("x", csv.as_bytes()).unwrap();
        assert!(history.return_stats(ReturnKind::Simple).is_err());
    }

    #[test]
    fn test_parse_chart_json() {
        let json = r#"{
            "chart": {
                "result": [{
                    "timestamp": [1704153600, 1704240000, 1704326400],
                    "indicators": {
                        "quote": [{
                            "open": [1.0, 2.0, 3.0],
                            "high": [1.5, 2.5, 3.5],
                            "low": [0.5, 1.5, 2.5],
                            "close": [1.2, null, 3.2],
                            "volume": [10.0, 20.0, 30.0]
                        }],
                        "adjclose": [{ "adjclose": [1.1, null, 3.1] }]
                    }
                }]
            }
        }"#;
        let history = parse_chart_json("spy", json.as_bytes()).unwrap();
        assert_eq!(history.symbol, "SPY");
        assert_eq!(history.candles.len(), 2);
        assert_eq!(history.closes(), vec![1.1, 3.1]);
        assert_eq!(history.candles[1].close, 3.2);
        assert_eq!(history.candles[1].high, 3.5);
    }

    #[test]
    fn test_parse_chart_json_without_results() {
        let json = r#"{ "chart": { "result": [] } }"#;
        assert!(parse_chart_json("spy", json.as_bytes()).is_err());
    }

    #[test]
    fn test_load_history_from_file() {
        let path = std::env::temp_dir().join(format!("pathsim-history-{}.csv", std::process::id()));
        std::fs::write(&path, SAMPLE_CSV).unwrap();

        let history = load_history(&path, None).unwrap();
        assert!(history.symbol.starts_with("PATHSIM-HISTORY"));
        assert_eq!(history.candles.len(), 4);

        let named = load_history(&path, Some("msft")).unwrap();
        assert_eq!(named.symbol, "MSFT");

        std::fs::remove_file(&path).unwrap();
        assert!(load_history(&path, None).is_err());
    }
}
