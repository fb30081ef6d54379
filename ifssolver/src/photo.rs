use std::io::Cursor;
use std::path::Path;

use image::io::Reader;
use image::{GrayImage, ImageOutputFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::atomic_file::write_atomic;
use crate::error::{Result, SolverError};

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    pub width: usize,
    pub height: usize,
}

impl ImageShape {
    pub fn new(width: usize, height: usize) -> Self {
        ImageShape { width, height }
    }

    /// Reads only the header of the image at `path`.
    pub fn of_file(path: &Path) -> Result<ImageShape> {
        if !path.exists() {
            return Err(SolverError::ImageNotFound(path.to_path_buf()));
        }
        let (width, height) = Reader::open(path)?
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|source| SolverError::ImageDecode {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(ImageShape::new(width as usize, height as usize))
    }

    pub fn max_side(&self) -> usize {
        self.width.max(self.height)
    }
}

/// A basic representation of an image with RGBA pixel data.
/// Each pixel occupies 4 bytes: R, G, B, and A (alpha).
#[derive(Clone, Debug, Default)]
pub struct Photo {
    /// Pixel data stored in a 1D `Vec<u8>`, in RGBA format (4 bytes per pixel).
    pub img_data: Vec<u8>,
    /// The width (in pixels) of the image.
    pub width: usize,
    /// The height (in pixels) of the image.
    pub height: usize,
}

impl Photo {
    /// Loads and decodes the image at `path`. The format is sniffed from the content, since
    /// downloaded portal photos carry a `.jpg` name whatever their encoding.
    ///
    /// # Errors
    /// - [`SolverError::ImageNotFound`] when the file does not exist.
    /// - [`SolverError::ImageDecode`] when the file cannot be decoded.
    pub fn open(path: &Path) -> Result<Photo> {
        if !path.exists() {
            return Err(SolverError::ImageNotFound(path.to_path_buf()));
        }
        let img = Reader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|source| SolverError::ImageDecode {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Photo::from_rgba_image(img.to_rgba8()))
    }

    pub fn from_rgba_image(img: RgbaImage) -> Photo {
        let width = img.width() as usize;
        let height = img.height() as usize;
        Photo {
            img_data: img.into_raw(),
            width,
            height,
        }
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            let index = (y as usize * self.width + x as usize) * 4;
            Rgba([
                self.img_data[index],
                self.img_data[index + 1],
                self.img_data[index + 2],
                self.img_data[index + 3],
            ])
        })
    }

    pub fn shape(&self) -> ImageShape {
        ImageShape::new(self.width, self.height)
    }

    /// Returns the `(R, G, B)` components at the pixel coordinate `(x, y)`.
    ///
    /// If `(x, y)` is out of bounds, this method returns `(0, 0, 255)`, effectively a blue pixel.
    pub fn get_rgb(&self, x: usize, y: usize) -> (u8, u8, u8) {
        if x >= self.width || y >= self.height {
            (0, 0, 255)
        } else {
            let index = (y * self.width + x) * 4;
            (
                self.img_data[index],
                self.img_data[index + 1],
                self.img_data[index + 2],
            )
        }
    }

    /// Converts the photo to a single-channel luma buffer (row-major, one byte per pixel),
    /// using the ITU-R BT.601 weights.
    pub fn to_gray(&self) -> Vec<u8> {
        self.img_data
            .chunks_exact(4)
            .map(|p| ((p[0] as u32 * 299 + p[1] as u32 * 587 + p[2] as u32 * 114) / 1000) as u8)
            .collect()
    }

    /// Returns the top-left `width` x `height` region of the photo.
    ///
    /// The requested size is clamped to the photo's own dimensions.
    pub fn crop(&self, width: usize, height: usize) -> Photo {
        let width = width.min(self.width);
        let height = height.min(self.height);
        let mut img_data = Vec::with_capacity(width * height * 4);
        for y in 0..height {
            let start = y * self.width * 4;
            img_data.extend_from_slice(&self.img_data[start..start + width * 4]);
        }
        Photo {
            img_data,
            width,
            height,
        }
    }

    /// Produces a new `Photo` scaled proportionally to `new_width`.
    ///
    /// This method preserves the aspect ratio by computing a scale factor and rounding
    /// the new height accordingly. Each destination pixel is the average of the block of
    /// source pixels it covers, so it is meant for downscaling.
    ///
    /// # Parameters
    /// - `new_width`: The desired new width of the scaled image.
    ///
    /// # Returns
    /// A new `Photo` with width = `new_width` and a proportionally scaled height. An empty
    /// photo is returned when `new_width` or the source width is zero.
    pub fn get_scaled_proportional(&self, new_width: usize) -> Photo {
        if new_width == 0 || self.width == 0 || self.height == 0 {
            return Photo::default();
        }

        let scale_factor = new_width as f32 / self.width as f32;
        let new_height = proportional_height(self.width, self.height, new_width);
        let mut new_img_data = vec![0u8; new_width * new_height * 4];

        for new_y in 0..new_height {
            for new_x in 0..new_width {
                // Block of source pixels that map onto this destination pixel
                let orig_x_start = (((new_x as f32) / scale_factor).round() as usize).min(self.width - 1);
                let orig_y_start = (((new_y as f32) / scale_factor).round() as usize).min(self.height - 1);
                let orig_x_end = ((((new_x + 1) as f32) / scale_factor).round() as usize)
                    .min(self.width - 1)
                    .max(orig_x_start);
                let orig_y_end = ((((new_y + 1) as f32) / scale_factor).round() as usize)
                    .min(self.height - 1)
                    .max(orig_y_start);

                let mut totals = [0u32; 4];
                let mut pixel_count: u32 = 0;
                for orig_y in orig_y_start..=orig_y_end {
                    for orig_x in orig_x_start..=orig_x_end {
                        let orig_index = (orig_y * self.width + orig_x) * 4;
                        for (c, total) in totals.iter_mut().enumerate() {
                            *total += self.img_data[orig_index + c] as u32;
                        }
                        pixel_count += 1;
                    }
                }

                let new_index = (new_y * new_width + new_x) * 4;
                for (c, total) in totals.iter().enumerate() {
                    new_img_data[new_index + c] = (total / pixel_count) as u8;
                }
            }
        }

        Photo {
            img_data: new_img_data,
            width: new_width,
            height: new_height,
        }
    }

    /// Encodes the photo as PNG and writes it atomically to `path`.
    pub fn save_png(&self, path: &Path) -> Result<()> {
        let mut buffer = Cursor::new(Vec::new());
        self.to_rgba_image().write_to(&mut buffer, ImageOutputFormat::Png)?;
        write_atomic(path, buffer.get_ref())
    }
}

/// Height of a `width` x `height` image scaled to `new_width`, as produced by
/// [`Photo::get_scaled_proportional`].
pub fn proportional_height(width: usize, height: usize, new_width: usize) -> usize {
    let scale_factor = new_width as f32 / width as f32;
    ((height as f32 * scale_factor).round() as usize).max(1)
}

/// Encodes a grayscale image as PNG and writes it atomically to `path`.
pub fn save_gray_png(img: &GrayImage, path: &Path) -> Result<()> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageOutputFormat::Png)?;
    write_atomic(path, buffer.get_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(width: usize, height: usize) -> Photo {
        let mut img_data = Vec::with_capacity(width * height * 4);
        for y in 0..height {
            for x in 0..width {
                let v = if (x + y) % 2 == 0 { 255 } else { 0 };
                img_data.extend_from_slice(&[v, v, v, 255]);
            }
        }
        Photo {
            img_data,
            width,
            height,
        }
    }

    #[test]
    fn crop_keeps_top_left_region() {
        let photo = checker(5, 4);
        let cropped = photo.crop(3, 2);
        assert_eq!(cropped.shape(), ImageShape::new(3, 2));
        assert_eq!(cropped.get_rgb(0, 0), photo.get_rgb(0, 0));
        assert_eq!(cropped.get_rgb(2, 1), photo.get_rgb(2, 1));
    }

    #[test]
    fn scaled_checker_averages_to_gray() {
        let scaled = checker(8, 8).get_scaled_proportional(4);
        assert_eq!(scaled.shape(), ImageShape::new(4, 4));
        let (r, _, _) = scaled.get_rgb(1, 1);
        assert!(r > 60 && r < 200, "unexpected average {r}");
    }

    #[test]
    fn png_round_trip_preserves_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checker.png");
        let photo = checker(6, 3);
        photo.save_png(&path).unwrap();
        let loaded = Photo::open(&path).unwrap();
        assert_eq!(loaded.img_data, photo.img_data);
        assert_eq!(ImageShape::of_file(&path).unwrap(), ImageShape::new(6, 3));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = Photo::open(Path::new("/definitely/not/here.jpg")).unwrap_err();
        assert!(matches!(err, SolverError::ImageNotFound(_)));
    }
}
