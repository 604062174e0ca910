//! Output formatting and persistence for query results.
//!
//! Every CLI command answers with the uniform response envelope; prediction
//! results can additionally be appended to a CSV file.

use anyhow::Result;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

use crate::classify::CongestionLevel;
use crate::error::Error;
use crate::predict::types::Prediction;

/// The uniform response envelope every boundary answer is wrapped in.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    /// Failure envelope. Error detail goes into `message` only when
    /// `expose_detail` is set; production boundaries answer with the kind
    /// alone.
    pub fn fail(err: &Error, expose_detail: bool) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.kind().to_string()),
            message: expose_detail.then(|| err.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// Serializes an envelope as pretty JSON on stdout.
pub fn emit<T: Serialize>(envelope: &Envelope<T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    Ok(())
}

/// Flat CSV projection of a [`Prediction`].
#[derive(Debug, Serialize)]
struct PredictionRow {
    route_id: String,
    prediction_time: DateTime<Utc>,
    hour: u8,
    day_of_week: u8,
    congestion_index: f64,
    congestion_level: CongestionLevel,
    confidence: f64,
    vehicle_count: u64,
    is_weekend: bool,
    is_rush_hour: bool,
}

impl From<&Prediction> for PredictionRow {
    fn from(p: &Prediction) -> Self {
        Self {
            route_id: p.route_id.clone(),
            prediction_time: p.prediction_time,
            hour: p.predicted_for.hour,
            day_of_week: p.predicted_for.day_of_week,
            congestion_index: p.congestion_index,
            congestion_level: p.congestion_level,
            confidence: p.confidence,
            vehicle_count: p.factors.vehicle_count,
            is_weekend: p.factors.is_weekend,
            is_rush_hour: p.factors.is_rush_hour,
        }
    }
}

/// Appends predictions as rows to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_predictions(path: &str, predictions: &[Prediction]) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending prediction rows");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for prediction in predictions {
        writer.serialize(PredictionRow::from(prediction))?;
    }
    writer.flush()?;

    Ok(())
}
