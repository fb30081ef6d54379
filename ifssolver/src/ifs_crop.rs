use serde::{Deserialize, Serialize};

use crate::photo::Photo;

/// Background classification for the IFS picture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropParams {
    pub background: [u8; 3],
    /// Pixels whose squared RGB distance to `background` is at most this are background.
    pub threshold: u32,
}

impl Default for CropParams {
    fn default() -> Self {
        CropParams {
            background: [50, 50, 50],
            threshold: 200,
        }
    }
}

impl CropParams {
    pub fn is_background(&self, (r, g, b): (u8, u8, u8)) -> bool {
        let [br, bg, bb] = self.background;
        let d = |a: u8, b: u8| {
            let v = a as i32 - b as i32;
            (v * v) as u32
        };
        d(r, br) + d(g, bg) + d(b, bb) <= self.threshold
    }
}

/// Width and height of the region from the origin that holds every foreground pixel.
///
/// The extent is inclusive: the last foreground row and column stay in the crop, so the
/// result is one larger in each direction than the largest foreground coordinate. An
/// image without any foreground keeps its full size.
///
/// # Examples
/// ```
/// use ifssolver::ifs_crop::{content_extent, CropParams};
/// use ifssolver::photo::Photo;
///
/// let mut img_data = [50u8, 50, 50, 255].repeat(6 * 4);
/// // a single red pixel at (2, 1)
/// img_data[(1 * 6 + 2) * 4] = 255;
/// let photo = Photo { img_data, width: 6, height: 4 };
/// assert_eq!(content_extent(&photo, &CropParams::default()), (3, 2));
/// ```
pub fn content_extent(photo: &Photo, params: &CropParams) -> (usize, usize) {
    let mut max_x = None;
    let mut max_y = None;
    for y in 0..photo.height {
        for x in 0..photo.width {
            if !params.is_background(photo.get_rgb(x, y)) {
                max_x = Some(max_x.map_or(x, |m: usize| m.max(x)));
                max_y = Some(y);
            }
        }
    }
    match (max_x, max_y) {
        (Some(x), Some(y)) => (x + 1, y + 1),
        _ => (photo.width, photo.height),
    }
}

/// Crops the IFS picture to [`content_extent`].
pub fn crop_ifs(photo: &Photo, params: &CropParams) -> Photo {
    let (width, height) = content_extent(photo, params);
    photo.crop(width, height)
}
