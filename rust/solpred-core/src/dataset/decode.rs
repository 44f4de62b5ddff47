// rust/solpred-core/src/dataset/decode.rs

//! Sample decoding: image attachments to normalized CHW tensors, metadata
//! documents to irradiance vectors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::imageops::{self, FilterType};
use ndarray::{Array1, Array3};
use serde::Serialize;
use serde_json::{Map, Value};

use super::shard_reader::RawSample;
use super::stack::stack_images;
use crate::config::{DecodeConfig, DecodeErrorPolicy};
use crate::error::{LoaderError, Result};

/// Channels per decoded image (RGB).
pub const IMAGE_CHANNELS: usize = 3;

const GENERIC_FIELD: &str = "value";
const CLEAR_SKY_FIELD: &str = "clearskyghi";

/// Irradiance component carried by an input record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Global,
    Direct,
    Diffuse,
}

impl Channel {
    /// Field name used by the physical instrument for this component.
    pub fn instrument_field(self) -> &'static str {
        match self {
            Channel::Global => "globalcmp11physical",
            Channel::Direct => "directchp1physical",
            Channel::Diffuse => "diffusecmp11physical",
        }
    }
}

/// Where a channel's values are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSource {
    Instrument,
    Generic,
}

/// Field naming convention for one sample, resolved once from its first
/// stored input record and applied to every record of that sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLabels {
    pub global: LabelSource,
    pub direct: LabelSource,
    pub diffuse: LabelSource,
}

impl ChannelLabels {
    pub fn resolve(first_input: &Map<String, Value>) -> Self {
        let source = |channel: Channel| {
            if first_input.contains_key(channel.instrument_field()) {
                LabelSource::Instrument
            } else {
                LabelSource::Generic
            }
        };
        Self {
            global: source(Channel::Global),
            direct: source(Channel::Direct),
            diffuse: source(Channel::Diffuse),
        }
    }

    pub fn field(&self, channel: Channel) -> &'static str {
        let source = match channel {
            Channel::Global => self.global,
            Channel::Direct => self.direct,
            Channel::Diffuse => self.diffuse,
        };
        match source {
            LabelSource::Instrument => channel.instrument_field(),
            LabelSource::Generic => GENERIC_FIELD,
        }
    }
}

/// The metadata document of a sample, passed through untouched for export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetadataRecord(Value);

impl MetadataRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The sample's time-derived identifier.
    ///
    /// Numeric ids are rendered as their JSON text.
    pub fn id(&self) -> Option<String> {
        match self.0.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Inputs in stored (unsorted) order.
    pub fn inputs(&self) -> Option<&Vec<Value>> {
        self.0.get("inputs")?.as_array()
    }

    pub fn targets(&self) -> Option<&Vec<Value>> {
        self.0.get("targets")?.as_array()
    }

    /// Labels resolved from the first stored input record.
    pub fn labels(&self) -> Option<ChannelLabels> {
        let first = self.inputs()?.first()?.as_object()?;
        Some(ChannelLabels::resolve(first))
    }

    /// Primary irradiance of the first stored input record, the value a
    /// persistence forecast repeats.
    pub fn persistence(&self) -> Option<f32> {
        let labels = self.labels()?;
        let first = self.inputs()?.first()?;
        first
            .get(labels.field(Channel::Global))?
            .as_f64()
            .map(|v| v as f32)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// One fully decoded sample.
#[derive(Debug, Clone)]
pub struct DecodedSample {
    pub key: String,
    /// Stacked images, `(T * 3, W, W)`.
    pub images: Array3<f32>,
    /// Primary irradiance by ascending distance.
    pub input_irradiance: Array1<f32>,
    /// Diffuse values then direct values, both by ascending distance.
    pub diffuse_direct: Array1<f32>,
    /// Clear-sky value of the nearest input, or zero; always length 1.
    pub most_recent_clear_sky: Array1<f32>,
    /// Target values by ascending horizon.
    pub targets: Array1<f32>,
    /// Per-horizon clear-sky values, or zeros.
    pub target_clear_sky: Array1<f32>,
    pub metadata: MetadataRecord,
}

/// Decodes raw samples into tensors.
#[derive(Debug, Clone)]
pub struct SampleDecoder {
    image_width: u32,
    image_extensions: Vec<String>,
    metadata_field: String,
}

impl SampleDecoder {
    pub fn new(config: &DecodeConfig) -> Self {
        Self {
            image_width: config.image_width,
            image_extensions: config
                .image_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            metadata_field: config.metadata_field.clone(),
        }
    }

    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    /// Whether a field holds an image attachment, judged by its last extension.
    pub fn is_image_field(&self, field: &str) -> bool {
        field
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .or(Some(field))
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.image_extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }

    pub fn decode(&self, raw: RawSample) -> Result<DecodedSample> {
        let RawSample { key, fields, .. } = raw;

        let mut images = Vec::new();
        let mut metadata_bytes = None;
        for (field, bytes) in &fields {
            if *field == self.metadata_field {
                metadata_bytes = Some(bytes);
            } else if self.is_image_field(field) {
                images.push((field.clone(), self.decode_image(&key, field, bytes)?));
            }
        }

        let Some(metadata_bytes) = metadata_bytes else {
            return Err(LoaderError::decode(
                &key,
                format!("missing metadata field '{}'", self.metadata_field),
            ));
        };
        let features = self.decode_metadata(&key, metadata_bytes)?;
        let images = stack_images(&key, images, self.image_width as usize)?;

        Ok(DecodedSample {
            key,
            images,
            input_irradiance: features.input_irradiance,
            diffuse_direct: features.diffuse_direct,
            most_recent_clear_sky: features.most_recent_clear_sky,
            targets: features.targets,
            target_clear_sky: features.target_clear_sky,
            metadata: features.record,
        })
    }

    /// Decode one encoded image into a `(3, W, W)` tensor scaled to `[0, 1]`.
    pub fn decode_image(&self, key: &str, field: &str, bytes: &[u8]) -> Result<Array3<f32>> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| LoaderError::decode_field(key, field, e.to_string()))?;
        let mut rgb = decoded.to_rgb8();

        let w = self.image_width;
        if rgb.dimensions() != (w, w) {
            rgb = imageops::resize(&rgb, w, w, FilterType::Triangle);
        }

        let side = w as usize;
        let pixels: Vec<f32> = rgb
            .into_raw()
            .into_iter()
            .map(|v| f32::from(v) / 255.0)
            .collect();
        let hwc = Array3::from_shape_vec((side, side, IMAGE_CHANNELS), pixels)
            .map_err(|e| LoaderError::decode_field(key, field, e.to_string()))?;

        Ok(hwc.permuted_axes([2, 0, 1]).as_standard_layout().into_owned())
    }

    fn decode_metadata(&self, key: &str, bytes: &[u8]) -> Result<MetadataFeatures> {
        let field = self.metadata_field.as_str();
        let err = |message: String| LoaderError::decode_field(key, field, message);

        let value: Value = serde_json::from_slice(bytes).map_err(|e| err(e.to_string()))?;
        if !value.is_object() {
            return Err(err("metadata is not a JSON object".to_string()));
        }

        let inputs = records(&value, "inputs").map_err(err)?;
        let targets = records(&value, "targets").map_err(err)?;

        let labels = ChannelLabels::resolve(inputs[0]);

        let inputs = sorted_by(inputs, "distance").map_err(err)?;
        let targets = sorted_by(targets, "horizon").map_err(err)?;

        let global = channel_values(&inputs, labels.field(Channel::Global), "inputs")
            .map_err(err)?;
        let diffuse = channel_values(&inputs, labels.field(Channel::Diffuse), "inputs")
            .map_err(err)?;
        let direct = channel_values(&inputs, labels.field(Channel::Direct), "inputs")
            .map_err(err)?;
        let target_values = channel_values(&targets, GENERIC_FIELD, "targets").map_err(err)?;

        let most_recent_clear_sky = if inputs[0].contains_key(CLEAR_SKY_FIELD) {
            channel_values(&inputs[..1], CLEAR_SKY_FIELD, "inputs").map_err(err)?
        } else {
            vec![0.0]
        };
        let target_clear_sky = if targets[0].contains_key(CLEAR_SKY_FIELD) {
            channel_values(&targets, CLEAR_SKY_FIELD, "targets").map_err(err)?
        } else {
            vec![0.0; targets.len()]
        };

        let mut diffuse_direct = diffuse;
        diffuse_direct.extend(direct);

        Ok(MetadataFeatures {
            input_irradiance: Array1::from(global),
            diffuse_direct: Array1::from(diffuse_direct),
            most_recent_clear_sky: Array1::from(most_recent_clear_sky),
            targets: Array1::from(target_values),
            target_clear_sky: Array1::from(target_clear_sky),
            record: MetadataRecord::new(value),
        })
    }
}

struct MetadataFeatures {
    input_irradiance: Array1<f32>,
    diffuse_direct: Array1<f32>,
    most_recent_clear_sky: Array1<f32>,
    targets: Array1<f32>,
    target_clear_sky: Array1<f32>,
    record: MetadataRecord,
}

/// The non-empty list of object records under `name`.
fn records<'a>(value: &'a Value, name: &str) -> std::result::Result<Vec<&'a Map<String, Value>>, String> {
    let list = value
        .get(name)
        .ok_or_else(|| format!("missing '{name}'"))?
        .as_array()
        .ok_or_else(|| format!("'{name}' is not a list"))?;
    if list.is_empty() {
        return Err(format!("'{name}' is empty"));
    }
    list.iter()
        .enumerate()
        .map(|(i, record)| {
            record
                .as_object()
                .ok_or_else(|| format!("{name}[{i}] is not an object"))
        })
        .collect()
}

/// Stable ascending sort of records on a numeric field.
fn sorted_by<'a>(
    records: Vec<&'a Map<String, Value>>,
    field: &str,
) -> std::result::Result<Vec<&'a Map<String, Value>>, String> {
    let mut keyed = records
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            record
                .get(field)
                .and_then(Value::as_f64)
                .map(|k| (k, record))
                .ok_or_else(|| format!("record {i} has no numeric '{field}'"))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(keyed.into_iter().map(|(_, record)| record).collect())
}

fn channel_values(
    records: &[&Map<String, Value>],
    field: &str,
    list: &str,
) -> std::result::Result<Vec<f32>, String> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            record
                .get(field)
                .and_then(Value::as_f64)
                .map(|v| v as f32)
                .ok_or_else(|| format!("{list} record {i} has no numeric '{field}'"))
        })
        .collect()
}

/// Applies a [`SampleDecoder`] to an upstream of raw samples.
///
/// Decode failures follow the configured policy; every other error is passed
/// through unchanged.
pub struct DecodeStage<I> {
    upstream: I,
    decoder: Arc<SampleDecoder>,
    policy: DecodeErrorPolicy,
    skipped: Arc<AtomicU64>,
}

impl<I> DecodeStage<I>
where
    I: Iterator<Item = Result<RawSample>>,
{
    pub fn new(
        upstream: I,
        decoder: Arc<SampleDecoder>,
        policy: DecodeErrorPolicy,
        skipped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            upstream,
            decoder,
            policy,
            skipped,
        }
    }

    pub fn next_sample(&mut self) -> Result<Option<DecodedSample>> {
        loop {
            let Some(raw) = self.upstream.next().transpose()? else {
                return Ok(None);
            };
            let shard = raw.shard.clone();

            match self.decoder.decode(raw) {
                Ok(sample) => return Ok(Some(sample)),
                Err(e) if e.is_decode() && self.policy == DecodeErrorPolicy::Skip => {
                    let total = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        "Skipping sample from {}: {} ({} skipped so far)",
                        shard.display(),
                        e,
                        total
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<I> Iterator for DecodeStage<I>
where
    I: Iterator<Item = Result<RawSample>>,
{
    type Item = Result<DecodedSample>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_sample().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::png_bytes;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn decoder(width: u32) -> SampleDecoder {
        SampleDecoder::new(&DecodeConfig {
            image_width: width,
            ..Default::default()
        })
    }

    fn raw(key: &str, fields: Vec<(&str, Vec<u8>)>) -> RawSample {
        RawSample {
            key: key.to_string(),
            shard: PathBuf::from("test.tar"),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn decode_json(doc: Value) -> Result<DecodedSample> {
        decoder(4).decode(raw("s", vec![("data.json", doc.to_string().into_bytes())]))
    }

    #[test]
    fn test_inputs_and_targets_sorted() {
        let doc = json!({
            "id": "20200101T1200",
            "inputs": [
                {"distance": 2, "value": 30.0},
                {"distance": 0, "value": 10.0},
                {"distance": 1, "value": 20.0}
            ],
            "targets": [
                {"horizon": 60, "value": 3.0},
                {"horizon": 10, "value": 1.0},
                {"horizon": 30, "value": 2.0}
            ]
        });
        let sample = decode_json(doc).unwrap();

        assert_eq!(sample.input_irradiance.to_vec(), vec![10.0, 20.0, 30.0]);
        assert_eq!(sample.targets.to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(sample.diffuse_direct.to_vec(), vec![10.0, 20.0, 30.0, 10.0, 20.0, 30.0]);
        assert_eq!(sample.metadata.id().as_deref(), Some("20200101T1200"));
    }

    #[test]
    fn test_instrument_labels_preferred() {
        let doc = json!({
            "inputs": [
                {"distance": 1, "value": -1.0, "globalcmp11physical": 500.0,
                 "directchp1physical": 300.0, "diffusecmp11physical": 100.0},
                {"distance": 0, "value": -1.0, "globalcmp11physical": 510.0,
                 "directchp1physical": 310.0, "diffusecmp11physical": 110.0}
            ],
            "targets": [{"horizon": 1, "value": 7.0}]
        });
        let sample = decode_json(doc).unwrap();

        assert_eq!(sample.input_irradiance.to_vec(), vec![510.0, 500.0]);
        assert_eq!(sample.diffuse_direct.to_vec(), vec![110.0, 100.0, 310.0, 300.0]);
        assert_eq!(sample.targets.to_vec(), vec![7.0]);
    }

    #[test]
    fn test_labels_resolved_independently() {
        let first = json!({"distance": 0, "value": 1.0, "diffusecmp11physical": 2.0});
        let labels = ChannelLabels::resolve(first.as_object().unwrap());

        assert_eq!(labels.global, LabelSource::Generic);
        assert_eq!(labels.direct, LabelSource::Generic);
        assert_eq!(labels.diffuse, LabelSource::Instrument);
        assert_eq!(labels.field(Channel::Diffuse), "diffusecmp11physical");
        assert_eq!(labels.field(Channel::Direct), "value");
    }

    #[test]
    fn test_labels_come_from_first_stored_record() {
        // The record without instrument fields is stored first but sorts last.
        let doc = json!({
            "inputs": [
                {"distance": 5, "value": 1.0},
                {"distance": 0, "value": 2.0, "globalcmp11physical": 900.0}
            ],
            "targets": [{"horizon": 1, "value": 0.0}]
        });
        let sample = decode_json(doc).unwrap();
        assert_eq!(sample.input_irradiance.to_vec(), vec![2.0, 1.0]);
    }

    #[test]
    fn test_missing_clear_sky_is_zero() {
        let doc = json!({
            "inputs": [{"distance": 0, "value": 1.0}],
            "targets": [{"horizon": 1, "value": 2.0}, {"horizon": 2, "value": 3.0}]
        });
        let sample = decode_json(doc).unwrap();

        assert_eq!(sample.most_recent_clear_sky.to_vec(), vec![0.0]);
        assert_eq!(sample.target_clear_sky.to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_clear_sky_values_extracted() {
        let doc = json!({
            "inputs": [
                {"distance": 1, "value": 1.0, "clearskyghi": 800.0},
                {"distance": 0, "value": 1.0, "clearskyghi": 810.0}
            ],
            "targets": [
                {"horizon": 2, "value": 2.0, "clearskyghi": 830.0},
                {"horizon": 1, "value": 2.0, "clearskyghi": 820.0}
            ]
        });
        let sample = decode_json(doc).unwrap();

        assert_eq!(sample.most_recent_clear_sky.to_vec(), vec![810.0]);
        assert_eq!(sample.target_clear_sky.to_vec(), vec![820.0, 830.0]);
    }

    #[test]
    fn test_missing_required_fields() {
        let cases = [
            json!({"targets": [{"horizon": 1, "value": 1.0}]}),
            json!({"inputs": [], "targets": [{"horizon": 1, "value": 1.0}]}),
            json!({"inputs": [{"distance": 0, "value": 1.0}]}),
            json!({"inputs": [{"distance": 0}], "targets": [{"horizon": 1, "value": 1.0}]}),
            json!({"inputs": [{"value": 1.0}], "targets": [{"horizon": 1, "value": 1.0}]}),
            json!({"inputs": [{"distance": 0, "value": 1.0}], "targets": [{"horizon": 1}]}),
            json!([1, 2, 3]),
        ];
        for doc in cases {
            let err = decode_json(doc.clone()).unwrap_err();
            assert!(err.is_decode(), "{doc} gave {err}");
        }
    }

    #[test]
    fn test_missing_metadata_field() {
        let err = decoder(4)
            .decode(raw("s", vec![("t00.png", png_bytes(4, 4, [0, 0, 0]))]))
            .unwrap_err();
        assert!(err.is_decode());
        assert!(err.to_string().contains("data.json"));
    }

    #[test]
    fn test_image_resized_and_normalized() {
        let decoder = decoder(8);
        let img = decoder
            .decode_image("s", "t00.png", &png_bytes(16, 12, [255, 0, 51]))
            .unwrap();

        assert_eq!(img.shape(), &[3, 8, 8]);
        assert!(img.index_axis(ndarray::Axis(0), 0).iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(img.index_axis(ndarray::Axis(0), 1).iter().all(|&v| v.abs() < 1e-6));
        assert!(img.index_axis(ndarray::Axis(0), 2).iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_corrupt_image_names_field() {
        let err = decoder(4)
            .decode_image("000007", "t02.webp", b"not an image")
            .unwrap_err();
        match err {
            LoaderError::Decode { key, field, .. } => {
                assert_eq!(key, "000007");
                assert_eq!(field.as_deref(), Some("t02.webp"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_full_sample_stacks_images() {
        let doc = json!({
            "inputs": [{"distance": 0, "value": 1.0}],
            "targets": [{"horizon": 1, "value": 2.0}]
        });
        let sample = decoder(4)
            .decode(raw(
                "s",
                vec![
                    ("t01.png", png_bytes(6, 6, [255, 255, 255])),
                    ("t00.png", png_bytes(6, 6, [0, 0, 0])),
                    ("data.json", doc.to_string().into_bytes()),
                    ("notes.txt", b"ignored".to_vec()),
                ],
            ))
            .unwrap();

        assert_eq!(sample.images.shape(), &[6, 4, 4]);
        assert!(sample.images[[0, 0, 0]] < 1e-6);
        assert!((sample.images[[3, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_is_image_field() {
        let decoder = decoder(4);
        assert!(decoder.is_image_field("t00.webp"));
        assert!(decoder.is_image_field("cam.t00.PNG"));
        assert!(decoder.is_image_field("jpg"));
        assert!(!decoder.is_image_field("data.json"));
        assert!(!decoder.is_image_field("webp.json"));
    }

    #[test]
    fn test_persistence_uses_stored_first_input() {
        let record = MetadataRecord::new(json!({
            "id": 42,
            "inputs": [
                {"distance": 3, "globalcmp11physical": 321.0, "value": 0.0},
                {"distance": 0, "globalcmp11physical": 123.0, "value": 0.0}
            ]
        }));
        assert_eq!(record.persistence(), Some(321.0));
        assert_eq!(record.id().as_deref(), Some("42"));
    }

    #[test]
    fn test_stage_skip_policy_counts() {
        let good = json!({
            "inputs": [{"distance": 0, "value": 1.0}],
            "targets": [{"horizon": 1, "value": 2.0}]
        })
        .to_string()
        .into_bytes();
        let upstream = vec![
            Ok(raw("a", vec![("data.json", good.clone())])),
            Ok(raw("b", vec![("data.json", b"{".to_vec())])),
            Ok(raw("c", vec![("data.json", good)])),
        ];

        let skipped = Arc::new(AtomicU64::new(0));
        let stage = DecodeStage::new(
            upstream.into_iter(),
            Arc::new(decoder(4)),
            DecodeErrorPolicy::Skip,
            skipped.clone(),
        );
        let keys: Vec<_> = stage.map(|s| s.unwrap().key).collect();

        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(skipped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_stage_abort_policy_surfaces_error() {
        let upstream = vec![Ok(raw("b", vec![("data.json", b"{".to_vec())]))];
        let mut stage = DecodeStage::new(
            upstream.into_iter(),
            Arc::new(decoder(4)),
            DecodeErrorPolicy::Abort,
            Arc::new(AtomicU64::new(0)),
        );
        assert!(stage.next().unwrap().unwrap_err().is_decode());
    }

    #[test]
    fn test_stage_never_skips_shard_errors() {
        let upstream = vec![Err(LoaderError::shard_open("x.tar", "missing"))];
        let mut stage = DecodeStage::new(
            upstream.into_iter(),
            Arc::new(decoder(4)),
            DecodeErrorPolicy::Skip,
            Arc::new(AtomicU64::new(0)),
        );
        assert!(matches!(
            stage.next(),
            Some(Err(LoaderError::ShardOpen { .. }))
        ));
    }
}
