// rust/solpred-core/src/export.rs

//! Long-format export of test-split predictions.
//!
//! Each sample contributes three rows keyed by its id: the observed target
//! (`actual`), the model's forecast (`<model>_pred`) and a persistence
//! forecast (`persist_pred`) that repeats the latest observed irradiance.

use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array2;
use serde::Serialize;

use crate::dataset::{Batch, MetadataRecord};
use crate::error::{LoaderError, Result};
use crate::storage::StorageBackend;

/// One `time,series,value` row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub time: String,
    pub series: String,
    pub value: f32,
}

/// Accumulates result rows for one model.
#[derive(Debug, Clone)]
pub struct ResultTable {
    model_name: String,
    rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            rows: Vec::new(),
        }
    }

    /// Add the rows for one sample.
    ///
    /// # Errors
    ///
    /// Fails if the metadata has no id or no primary irradiance on its first
    /// input record.
    pub fn record(&mut self, metadata: &MetadataRecord, prediction: f32, actual: f32) -> Result<()> {
        let time = metadata
            .id()
            .ok_or_else(|| LoaderError::serialization("sample metadata has no 'id'"))?;
        let persistence = metadata.persistence().ok_or_else(|| {
            LoaderError::serialization(format!(
                "sample '{time}' has no primary irradiance on its first input"
            ))
        })?;

        let pred_series = format!("{}_pred", self.model_name);
        for (series, value) in [
            ("actual", actual),
            (pred_series.as_str(), prediction),
            ("persist_pred", persistence),
        ] {
            self.rows.push(ResultRow {
                time: time.clone(),
                series: series.to_string(),
                value,
            });
        }
        Ok(())
    }

    /// Add the rows for every sample of a single-horizon batch.
    ///
    /// `predictions` must have the batch's target shape `(B, 1)`.
    pub fn record_batch(&mut self, batch: &Batch, predictions: &Array2<f32>) -> Result<()> {
        if predictions.shape() != batch.targets.shape() {
            return Err(LoaderError::batch(format!(
                "predictions have shape {:?} but targets have {:?}",
                predictions.shape(),
                batch.targets.shape()
            )));
        }
        if batch.targets.ncols() != 1 {
            return Err(LoaderError::batch(format!(
                "export expects one horizon per sample, got {}",
                batch.targets.ncols()
            )));
        }

        for (i, metadata) in batch.metadata.iter().enumerate() {
            self.record(metadata, predictions[[i, 0]], batch.targets[[i, 0]])?;
        }
        Ok(())
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the table as CSV with a `time,series,value` header.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<W> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        if self.rows.is_empty() {
            csv_writer
                .write_record(["time", "series", "value"])
                .map_err(|e| LoaderError::serialization(e.to_string()))?;
        }
        for row in &self.rows {
            csv_writer
                .serialize(row)
                .map_err(|e| LoaderError::serialization(e.to_string()))?;
        }
        csv_writer
            .into_inner()
            .map_err(|e| LoaderError::serialization(e.to_string()))
    }

    /// Write the table to `path` through `storage`. A `.gz` extension
    /// gzip-compresses the output.
    pub fn write_csv(&self, storage: &dyn StorageBackend, path: &Path) -> Result<()> {
        let writer = storage.open_write(path)?;
        let gzip = path.extension().is_some_and(|ext| ext == "gz");

        let writer = if gzip {
            let encoder = self.write_to(GzEncoder::new(writer, Compression::default()))?;
            encoder
                .finish()
                .map_err(|e| LoaderError::storage_with_source(path, "failed to finish gzip stream", e))?
        } else {
            self.write_to(writer)?
        };
        writer.finish()?;

        tracing::info!("Wrote {} result rows to {}", self.rows.len(), path.display());
        Ok(())
    }
}
