// rust/solpred-core/src/dataset/batch.rs

use ndarray::{stack, Array2, Array4, ArrayView, Axis, Dimension};

use super::decode::{DecodedSample, MetadataRecord, IMAGE_CHANNELS};
use crate::error::{LoaderError, Result};

/// A group of decoded samples with every tensor field stacked along a new
/// leading batch axis. Row `i` of each tensor belongs to `metadata[i]`.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `(B, T * 3, W, W)`
    pub images: Array4<f32>,
    /// `(B, N)`
    pub input_irradiance: Array2<f32>,
    /// `(B, M)`
    pub targets: Array2<f32>,
    /// `(B, 2N)`
    pub diffuse_direct: Array2<f32>,
    /// `(B, 1)`
    pub most_recent_clear_sky: Array2<f32>,
    /// `(B, M)`
    pub target_clear_sky: Array2<f32>,
    pub metadata: Vec<MetadataRecord>,
}

impl Batch {
    /// Stack `samples` in order.
    ///
    /// # Errors
    ///
    /// Returns a batch error if `samples` is empty or any field's shape
    /// differs between samples.
    pub fn from_samples(samples: Vec<DecodedSample>) -> Result<Self> {
        let Some(first) = samples.first() else {
            return Err(LoaderError::batch("cannot build a batch from zero samples"));
        };

        let images = stack_field(&samples, "images", |s| s.images.view())?;
        let input_irradiance =
            stack_field(&samples, "input_irradiance", |s| s.input_irradiance.view())?;
        let targets = stack_field(&samples, "targets", |s| s.targets.view())?;
        let diffuse_direct = stack_field(&samples, "diffuse_direct", |s| s.diffuse_direct.view())?;
        let most_recent_clear_sky = stack_field(&samples, "most_recent_clear_sky", |s| {
            s.most_recent_clear_sky.view()
        })?;
        let target_clear_sky =
            stack_field(&samples, "target_clear_sky", |s| s.target_clear_sky.view())?;

        tracing::trace!("Assembled batch of {} starting at '{}'", samples.len(), first.key);

        Ok(Self {
            images,
            input_irradiance,
            targets,
            diffuse_direct,
            most_recent_clear_sky,
            target_clear_sky,
            metadata: samples.into_iter().map(|s| s.metadata).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Images stacked per sample.
    pub fn time_steps(&self) -> usize {
        self.images.shape()[1] / IMAGE_CHANNELS
    }

    /// Sample ids in batch order.
    pub fn ids(&self) -> Vec<Option<String>> {
        self.metadata.iter().map(MetadataRecord::id).collect()
    }
}

fn stack_field<'a, D, F>(
    samples: &'a [DecodedSample],
    name: &str,
    view: F,
) -> Result<ndarray::Array<f32, D::Larger>>
where
    D: Dimension,
    F: Fn(&'a DecodedSample) -> ArrayView<'a, f32, D>,
{
    let views: Vec<ArrayView<'a, f32, D>> = samples.iter().map(&view).collect();

    let expected = views[0].shape();
    for (sample, v) in samples.iter().zip(&views).skip(1) {
        if v.shape() != expected {
            return Err(LoaderError::batch(format!(
                "{name} of sample '{}' has shape {:?}, expected {:?} as in sample '{}'",
                sample.key,
                v.shape(),
                expected,
                samples[0].key
            )));
        }
    }

    stack(Axis(0), &views).map_err(|e| LoaderError::batch(format!("{name}: {e}")))
}

/// Groups a sample stream into batches of `batch_size`.
///
/// The trailing `len % batch_size` samples form a final short batch when
/// `partial` is set and are dropped otherwise.
pub struct Batcher<I> {
    upstream: I,
    batch_size: usize,
    partial: bool,
    done: bool,
}

impl<I> Batcher<I>
where
    I: Iterator<Item = Result<DecodedSample>>,
{
    pub fn new(upstream: I, batch_size: usize, partial: bool) -> Self {
        Self {
            upstream,
            batch_size: batch_size.max(1),
            partial,
            done: false,
        }
    }

    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.done {
            return Ok(None);
        }

        let mut samples = Vec::with_capacity(self.batch_size);
        while samples.len() < self.batch_size {
            match self.upstream.next() {
                Some(sample) => samples.push(sample?),
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if samples.is_empty() {
            return Ok(None);
        }
        if samples.len() < self.batch_size && !self.partial {
            tracing::debug!(
                "Dropping {} trailing samples short of a batch of {}",
                samples.len(),
                self.batch_size
            );
            return Ok(None);
        }

        Batch::from_samples(samples).map(Some)
    }
}

impl<I> Iterator for Batcher<I>
where
    I: Iterator<Item = Result<DecodedSample>>,
{
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3};
    use serde_json::json;

    fn sample(i: usize, n_inputs: usize) -> DecodedSample {
        DecodedSample {
            key: format!("{i:04}"),
            images: Array3::from_elem((6, 4, 4), i as f32),
            input_irradiance: Array1::from_elem(n_inputs, i as f32),
            diffuse_direct: Array1::from_elem(2 * n_inputs, i as f32),
            most_recent_clear_sky: Array1::from(vec![0.0]),
            targets: Array1::from(vec![i as f32, i as f32 + 0.5]),
            target_clear_sky: Array1::zeros(2),
            metadata: MetadataRecord::new(json!({ "id": format!("{i:04}") })),
        }
    }

    fn stream(n: usize) -> impl Iterator<Item = Result<DecodedSample>> {
        (0..n).map(|i| Ok(sample(i, 3)))
    }

    #[test]
    fn test_batch_shapes_and_order() {
        let batch = Batch::from_samples((0..3).map(|i| sample(i, 5)).collect()).unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.images.shape(), &[3, 6, 4, 4]);
        assert_eq!(batch.time_steps(), 2);
        assert_eq!(batch.input_irradiance.shape(), &[3, 5]);
        assert_eq!(batch.diffuse_direct.shape(), &[3, 10]);
        assert_eq!(batch.most_recent_clear_sky.shape(), &[3, 1]);
        assert_eq!(batch.targets.shape(), &[3, 2]);
        assert_eq!(batch.target_clear_sky.shape(), &[3, 2]);
        for i in 0..3 {
            assert_eq!(batch.images[[i, 0, 0, 0]], i as f32);
            assert_eq!(batch.targets[[i, 1]], i as f32 + 0.5);
        }
        assert_eq!(
            batch.ids(),
            vec![Some("0000".into()), Some("0001".into()), Some("0002".into())]
        );
    }

    #[test]
    fn test_shape_mismatch_is_batch_error() {
        let err = Batch::from_samples(vec![sample(0, 3), sample(1, 4)]).unwrap_err();
        assert!(matches!(err, LoaderError::Batch { .. }));
        assert!(err.to_string().contains("input_irradiance"));
        assert!(err.to_string().contains("0001"));
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(Batch::from_samples(Vec::new()).is_err());
    }

    #[test]
    fn test_drops_trailing_partial() {
        let sizes: Vec<_> = Batcher::new(stream(10), 4, false)
            .map(|b| b.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![4, 4]);
    }

    #[test]
    fn test_keeps_trailing_partial() {
        let sizes: Vec<_> = Batcher::new(stream(10), 4, true)
            .map(|b| b.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_exact_multiple_has_no_partial() {
        let sizes: Vec<_> = Batcher::new(stream(8), 4, true)
            .map(|b| b.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![4, 4]);
    }

    #[test]
    fn test_upstream_error_surfaces() {
        let upstream = vec![Ok(sample(0, 3)), Err(LoaderError::decode("0001", "bad"))];
        let mut batcher = Batcher::new(upstream.into_iter(), 4, true);
        assert!(batcher.next().unwrap().unwrap_err().is_decode());
    }
}
