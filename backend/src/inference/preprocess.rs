use image::imageops::{self, FilterType};
use ndarray::Array4;

use super::decode::PixelBuffer;

/// Model input, laid out as (batch = 1, channels = 3, height, width) with
/// every sample scaled into [0, 1].
pub type InputTensor = Array4<f32>;

/// Bilinear resize to the model's input geometry followed by HWC -> NCHW
/// conversion.
pub fn to_tensor(pixels: &PixelBuffer, target_height: u32, target_width: u32) -> InputTensor {
    let resized = if pixels.dimensions() == (target_width, target_height) {
        pixels.clone()
    } else {
        imageops::resize(pixels, target_width, target_height, FilterType::Triangle)
    };

    Array4::from_shape_fn(
        (1, 3, target_height as usize, target_width as usize),
        |(_, c, y, x)| f32::from(resized.get_pixel(x as u32, y as u32)[c]) / 255.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn produces_nchw_shape() {
        let pixels = RgbImage::from_pixel(640, 480, Rgb([1, 2, 3]));
        let tensor = to_tensor(&pixels, 224, 192);
        assert_eq!(tensor.shape(), &[1, 3, 224, 192]);
    }

    #[test]
    fn values_are_scaled_into_unit_range() {
        let pixels = RgbImage::from_fn(31, 17, |x, y| Rgb([(x * 8) as u8, (y * 15) as u8, 255]));
        let tensor = to_tensor(&pixels, 64, 64);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn channels_are_planar() {
        let pixels = RgbImage::from_pixel(10, 10, Rgb([255, 0, 51]));
        let tensor = to_tensor(&pixels, 4, 4);
        assert_eq!(tensor[[0, 0, 3, 3]], 1.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert!((tensor[[0, 2, 2, 1]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn matching_size_keeps_samples() {
        let pixels = RgbImage::from_fn(3, 2, |x, y| Rgb([(x * 100) as u8, (y * 100) as u8, 0]));
        let tensor = to_tensor(&pixels, 2, 3);
        assert_eq!(tensor[[0, 0, 1, 2]], 200.0 / 255.0);
        assert_eq!(tensor[[0, 1, 1, 2]], 100.0 / 255.0);
    }

    #[test]
    fn decoded_uploads_become_unit_range_nchw() {
        use crate::inference::decode;
        use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
        use std::io::Cursor;

        let rgb = DynamicImage::ImageRgb8(RgbImage::from_fn(37, 23, |x, y| {
            Rgb([(x * 7) as u8, (y * 11) as u8, 255])
        }));
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_fn(29, 41, |x, y| {
            Rgba([255, (x * 9) as u8, (y * 6) as u8, (x + y) as u8])
        }));
        let gray = DynamicImage::ImageLuma8(GrayImage::from_fn(16, 48, |x, y| {
            Luma([(x * 16 + y) as u8])
        }));

        let cases = [
            (ImageFormat::Png, &rgb),
            (ImageFormat::Png, &rgba),
            (ImageFormat::Png, &gray),
            (ImageFormat::Jpeg, &rgb),
            (ImageFormat::Jpeg, &gray),
            (ImageFormat::WebP, &rgb),
            (ImageFormat::WebP, &rgba),
        ];

        for (format, source) in cases {
            let mut bytes = Cursor::new(Vec::new());
            source.write_to(&mut bytes, format).unwrap();
            let pixels = decode::normalize(bytes.get_ref()).unwrap();

            for (height, width) in [(224, 224), (64, 96)] {
                let tensor = to_tensor(&pixels, height, width);
                assert_eq!(
                    tensor.shape(),
                    &[1, 3, height as usize, width as usize],
                    "{:?} {:?}",
                    format,
                    source.color()
                );
                assert!(
                    tensor.iter().all(|v| (0.0..=1.0).contains(v)),
                    "{:?} {:?}",
                    format,
                    source.color()
                );
            }
        }
    }

    #[test]
    fn deterministic_for_same_input() {
        let pixels = RgbImage::from_fn(50, 40, |x, y| Rgb([x as u8, y as u8, (x ^ y) as u8]));
        assert_eq!(to_tensor(&pixels, 32, 32), to_tensor(&pixels, 32, 32));
    }
}
