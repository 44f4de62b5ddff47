// rust/solpred-core/src/dataset/stack.rs

use ndarray::{concatenate, Array3, ArrayView3, Axis};

use crate::error::{LoaderError, Result};

/// Concatenate per-timestep images along the channel axis.
///
/// Images are ordered by field name, which encodes capture time. `T` images
/// of shape `(C, H, W)` become one `(T * C, H, W)` tensor; a sample with no
/// images yields `(0, width, width)`.
pub fn stack_images(
    key: &str,
    mut images: Vec<(String, Array3<f32>)>,
    width: usize,
) -> Result<Array3<f32>> {
    if images.is_empty() {
        return Ok(Array3::zeros((0, width, width)));
    }

    images.sort_by(|a, b| a.0.cmp(&b.0));

    let (first_field, first) = &images[0];
    let spatial = &first.shape()[1..];
    for (field, image) in &images[1..] {
        if image.shape()[1..] != *spatial {
            return Err(LoaderError::stack(
                key,
                format!(
                    "'{field}' is {:?} but '{first_field}' is {:?}",
                    image.shape(),
                    first.shape()
                ),
            ));
        }
    }

    let views: Vec<ArrayView3<f32>> = images.iter().map(|(_, image)| image.view()).collect();
    concatenate(Axis(0), &views).map_err(|e| LoaderError::stack(key, e.to_string()))
}
