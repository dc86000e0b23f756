//! Image decoding and the resize / crop / normalize pipeline

use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::RgbImage;
use rand::Rng;
use std::path::Path;

use super::DataError;
use crate::error::Result;

/// Resize the shortest side to `size`, crop `size x size`, map pixels to `[-1, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransform {
    size: u32,
    center_crop: bool,
}

impl ImageTransform {
    /// Create a transform
    pub fn new(size: u32, center_crop: bool) -> Self {
        Self { size, center_crop }
    }

    /// Output side length
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Whether crops are centered
    pub fn center_crop(&self) -> bool {
        self.center_crop
    }

    /// Decode an image file as 8-bit RGB
    pub fn load(path: &Path) -> Result<RgbImage> {
        let image = image::open(path).map_err(|source| DataError::InvalidImage {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(image.to_rgb8())
    }

    /// Decode `path` and transform it with a thread-local random source
    pub fn load_tensor(&self, path: &Path) -> Result<Tensor> {
        let image = Self::load(path)?;
        self.apply(&image, &mut rand::rng())
    }

    /// Transform a decoded image into a `[3, size, size]` f32 tensor
    pub fn apply<R: Rng>(&self, image: &RgbImage, rng: &mut R) -> Result<Tensor> {
        let (width, height) = self.resized_dims(image.width(), image.height());
        let resized = if (width, height) == image.dimensions() {
            image.clone()
        } else {
            imageops::resize(image, width, height, FilterType::Lanczos3)
        };

        let (x, y) = self.crop_origin(width, height, rng);
        let cropped = imageops::crop_imm(&resized, x, y, self.size, self.size).to_image();

        to_tensor(&cropped)
    }

    /// Dimensions after scaling the shortest side to `size`
    fn resized_dims(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = |long: u32, short: u32| -> u32 {
            ((self.size as u64 * long as u64) / short.max(1) as u64).max(self.size as u64) as u32
        };
        if width <= height {
            (self.size, scale(height, width))
        } else {
            (scale(width, height), self.size)
        }
    }

    fn crop_origin<R: Rng>(&self, width: u32, height: u32, rng: &mut R) -> (u32, u32) {
        let max_x = width - self.size;
        let max_y = height - self.size;
        if self.center_crop {
            (
                (max_x as f32 / 2.0).round() as u32,
                (max_y as f32 / 2.0).round() as u32,
            )
        } else {
            (rng.random_range(0..=max_x), rng.random_range(0..=max_y))
        }
    }
}

/// HWC u8 to CHW f32 with `v / 127.5 - 1`
fn to_tensor(image: &RgbImage) -> Result<Tensor> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let plane = width * height;
    let mut data = vec![0f32; 3 * plane];

    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = pixel.0[c] as f32 / 127.5 - 1.0;
        }
    }

    Ok(Tensor::from_vec(data, (3, height, width), &Device::Cpu)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgb;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
        })
    }

    fn values(tensor: &Tensor) -> Vec<f32> {
        tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn test_output_shape_and_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for (w, h) in [(40, 20), (20, 40), (16, 16), (9, 33), (100, 101)] {
            for center_crop in [true, false] {
                let transform = ImageTransform::new(16, center_crop);
                let tensor = transform.apply(&gradient(w, h), &mut rng).unwrap();
                assert_eq!(tensor.dims(), &[3, 16, 16]);
                assert!(values(&tensor).iter().all(|v| (-1.0..=1.0).contains(v)));
            }
        }
    }

    #[test]
    fn test_upscales_small_images() {
        let transform = ImageTransform::new(32, true);
        let tensor = transform.apply(&gradient(8, 12), &mut rand::rng()).unwrap();
        assert_eq!(tensor.dims(), &[3, 32, 32]);
    }

    #[test]
    fn test_normalization_endpoints() {
        let transform = ImageTransform::new(4, true);
        let black = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        let white = RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]));

        for v in values(&transform.apply(&black, &mut rand::rng()).unwrap()) {
            assert_relative_eq!(v, -1.0);
        }
        for v in values(&transform.apply(&white, &mut rand::rng()).unwrap()) {
            assert_relative_eq!(v, 1.0);
        }
    }

    #[test]
    fn test_center_crop_is_deterministic() {
        let transform = ImageTransform::new(8, true);
        let image = gradient(30, 10);
        let a = values(&transform.apply(&image, &mut StdRng::seed_from_u64(1)).unwrap());
        let b = values(&transform.apply(&image, &mut StdRng::seed_from_u64(2)).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_resized_dims_keep_aspect() {
        let transform = ImageTransform::new(512, false);
        assert_eq!(transform.resized_dims(1024, 768), (682, 512));
        assert_eq!(transform.resized_dims(768, 1024), (512, 682));
        assert_eq!(transform.resized_dims(512, 512), (512, 512));
    }

    #[test]
    fn test_unreadable_image() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        assert!(ImageTransform::new(8, true).load_tensor(&path).is_err());
    }
}
