use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

pub const INPUT_HEIGHT: u32 = 224;
pub const INPUT_WIDTH: u32 = 224;
pub const INPUT_CHANNELS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("tensor shape mismatch: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// A single normalized image batch of shape (1, 224, 224, 3).
#[derive(Debug, Clone)]
pub struct PreprocessedTensor {
    data: Array4<f32>,
}

impl PreprocessedTensor {
    pub fn shape(&self) -> [usize; 4] {
        let s = self.data.shape();
        [s[0], s[1], s[2], s[3]]
    }

    #[cfg(test)]
    pub fn view(&self) -> ndarray::ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Values in (batch, height, width, channels) order.
    pub fn to_nhwc_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// Values in (batch, channels, height, width) order.
    pub fn to_nchw_vec(&self) -> Vec<f32> {
        self.data.view().permuted_axes([0, 3, 1, 2]).iter().copied().collect()
    }
}

/// Decodes raw upload bytes into an RGB image. Any format `image` can guess is
/// accepted; grayscale, alpha and 16-bit inputs are flattened to 8-bit RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, PreprocessError> {
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgb8())
}

/// Resizes to the model's input size and applies MobileNetV2 scaling, which
/// maps each channel from [0, 255] to [-1, 1].
pub fn to_tensor(image: &RgbImage) -> Result<PreprocessedTensor, PreprocessError> {
    let resized = imageops::resize(image, INPUT_WIDTH, INPUT_HEIGHT, FilterType::CatmullRom);

    let values: Vec<f32> = resized.into_raw().into_iter().map(normalize).collect();
    let data = Array4::from_shape_vec(
        (
            1,
            INPUT_HEIGHT as usize,
            INPUT_WIDTH as usize,
            INPUT_CHANNELS,
        ),
        values,
    )?;

    Ok(PreprocessedTensor { data })
}

pub fn preprocess(bytes: &[u8]) -> Result<PreprocessedTensor, PreprocessError> {
    let image = decode_rgb(bytes)?;
    to_tensor(&image)
}

fn normalize(value: u8) -> f32 {
    value as f32 / 127.5 - 1.0
}
