//! Analysis over stored samples of one metric series
//!
//! Summary statistics, fixed-interval resampling, z-score anomaly detection
//! and a short trend forecast. The functions take samples in any order and
//! ignore non-finite values.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::backend::{MetricsSink, SampleQuery};
use super::error::StorageError;
use crate::MetricSample;

/// Samples further than this many standard deviations from the mean are
/// reported as anomalies.
pub const DEFAULT_ZSCORE_THRESHOLD: f64 = 3.0;

/// Upper bound on the number of buckets one resample may produce.
pub const MAX_BUCKETS: usize = 10_000;

/// Forecast steps when the caller does not choose.
pub const DEFAULT_FORECAST_PERIODS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum SeriesError {
    #[error("resample interval must be at least one millisecond")]
    InvalidInterval,

    #[error("resampling would produce {buckets} buckets, more than {MAX_BUCKETS}")]
    TooManyBuckets { buckets: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub count: usize,
}

/// One resampled interval, labelled by its start. Empty intervals keep
/// their place with `mean: None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    pub mean: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub z_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Chronological `(timestamp, value)` pairs with finite values.
fn points(samples: &[MetricSample]) -> Vec<(DateTime<Utc>, f64)> {
    let mut points: Vec<_> = samples
        .iter()
        .filter(|s| s.value.is_finite())
        .map(|s| (s.timestamp, s.value))
        .collect();
    points.sort_by_key(|(timestamp, _)| *timestamp);
    points
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// `None` when there is no finite value.
pub fn statistics(samples: &[MetricSample]) -> Option<SeriesStats> {
    let mut values: Vec<f64> = samples
        .iter()
        .map(|s| s.value)
        .filter(|v| v.is_finite())
        .collect();
    if values.is_empty() {
        return None;
    }

    values.sort_by(f64::total_cmp);
    let count = values.len();
    let median = if count % 2 == 1 {
        values[count / 2]
    } else {
        (values[count / 2 - 1] + values[count / 2]) / 2.0
    };

    Some(SeriesStats {
        min: values[0],
        max: values[count - 1],
        mean: mean(&values),
        median,
        count,
    })
}

/// Average samples into consecutive `interval` wide buckets starting at
/// the oldest sample. Each bucket is closed on the left.
pub fn resample(samples: &[MetricSample], interval: Duration) -> Result<Vec<Bucket>, SeriesError> {
    let width = i64::try_from(interval.as_millis()).map_err(|_| SeriesError::InvalidInterval)?;
    if width == 0 {
        return Err(SeriesError::InvalidInterval);
    }

    let points = points(samples);
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Ok(Vec::new());
    };

    let origin = first.0;
    let span = (last.0 - origin).num_milliseconds();
    let buckets = (span / width) as u64 + 1;
    if buckets > MAX_BUCKETS as u64 {
        return Err(SeriesError::TooManyBuckets { buckets });
    }

    let mut sums = vec![(0.0, 0usize); buckets as usize];
    for (timestamp, value) in &points {
        let index = ((*timestamp - origin).num_milliseconds() / width) as usize;
        sums[index].0 += value;
        sums[index].1 += 1;
    }

    Ok(sums
        .into_iter()
        .enumerate()
        .map(|(index, (sum, count))| Bucket {
            start: origin + TimeDelta::milliseconds(width * index as i64),
            mean: (count > 0).then(|| sum / count as f64),
            count,
        })
        .collect())
}

/// Samples whose z-score exceeds `threshold`, oldest first.
///
/// Needs at least three values; a flat series has no anomalies.
pub fn anomalies(samples: &[MetricSample], threshold: f64) -> Vec<Anomaly> {
    let points = points(samples);
    if points.len() < 3 {
        return Vec::new();
    }

    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    let mean = mean(&values);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return Vec::new();
    }

    points
        .into_iter()
        .filter_map(|(timestamp, value)| {
            let z_score = ((value - mean) / std_dev).abs();
            (z_score > threshold).then_some(Anomaly {
                timestamp,
                value,
                z_score,
            })
        })
        .collect()
}

/// Extend the series by `periods` steps.
///
/// Each step is spaced like the last two samples. Values start from the
/// mean of the most recent samples (2 to 5 of them) and move by half the
/// difference between the means of the newer and the older half of the
/// series per step. Needs at least three values.
pub fn forecast(samples: &[MetricSample], periods: usize) -> Vec<ForecastPoint> {
    let points = points(samples);
    let n = points.len();
    if n < 3 {
        return Vec::new();
    }

    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    let trend = mean(&values[n / 2..]) - mean(&values[..n / 2]);
    let window = (n / 3).clamp(2, 5);
    let recent = mean(&values[n - window..]);

    let last = points[n - 1].0;
    let step = last - points[n - 2].0;

    (1..=periods)
        .map_while(|i| {
            let offset = step.checked_mul(i32::try_from(i).ok()?)?;
            Some(ForecastPoint {
                timestamp: last.checked_add_signed(offset)?,
                value: recent + trend * i as f64 / 2.0,
            })
        })
        .collect()
}

/// Everything the analysis functions report for one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesReport {
    pub stats: Option<SeriesStats>,
    pub buckets: Vec<Bucket>,
    pub anomalies: Vec<Anomaly>,
    pub forecast: Vec<ForecastPoint>,
}

#[derive(Debug, Clone)]
pub struct SeriesOptions {
    pub interval: Duration,
    pub zscore_threshold: f64,
    pub forecast_periods: usize,
}

impl Default for SeriesOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            zscore_threshold: DEFAULT_ZSCORE_THRESHOLD,
            forecast_periods: DEFAULT_FORECAST_PERIODS,
        }
    }
}

/// Load the samples matching `query` and analyse them.
pub async fn analyze(
    sink: &dyn MetricsSink,
    query: SampleQuery,
    options: &SeriesOptions,
) -> Result<SeriesReport, SeriesError> {
    let samples = sink.query_samples(query).await?;

    Ok(SeriesReport {
        stats: statistics(&samples),
        buckets: resample(&samples, options.interval)?,
        anomalies: anomalies(&samples, options.zscore_threshold),
        forecast: forecast(&samples, options.forecast_periods),
    })
}
