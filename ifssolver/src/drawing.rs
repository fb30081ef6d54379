use std::path::Path;

use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::drawing::draw_antialiased_line_segment_mut;
use imageproc::pixelops::interpolate;

use crate::config::PasscodeStyle;
use crate::contour::Contour;
use crate::error::Result;
use crate::photo::{save_gray_png, Photo};

const OVERLAY_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const STROKE_COLOR: Luma<u8> = Luma([255]);

/// Outlines every contour in red on top of `photo`.
pub fn draw_match_overlay(photo: &Photo, contours: &[Contour]) -> RgbaImage {
    let mut img = photo.to_rgba_image();
    for contour in contours {
        let pts = contour.points;
        for i in 0..pts.len() {
            let end = pts[(i + 1) % pts.len()];
            draw_antialiased_line_segment_mut(&mut img, pts[i], end, OVERLAY_COLOR, interpolate);
        }
    }
    img
}

pub fn save_match_overlay(photo: &Photo, contours: &[Contour], path: &Path) -> Result<()> {
    Photo::from_rgba_image(draw_match_overlay(photo, contours)).save_png(path)
}

/// Maps one column's (lng, lat) points into its glyph cell.
///
/// The points are shifted to the origin and scaled uniformly so the larger extent spans
/// `char_size`. Latitude grows upwards, so y is flipped.
pub fn glyph_points(column: usize, lnglat: &[(f64, f64)], style: &PasscodeStyle) -> Vec<(i32, i32)> {
    if lnglat.is_empty() {
        return Vec::new();
    }
    let min_x = lnglat.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let min_y = lnglat.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let extent = lnglat
        .iter()
        .map(|&(x, y)| (x - min_x).max(y - min_y))
        .fold(0.0, f64::max);
    let char_size = style.char_size as f64;
    let border = style.border as f64;
    let scale = if extent > 0.0 { char_size / extent } else { 0.0 };

    let offset_x = (2 * column + 1) as f64 * border + column as f64 * char_size;
    lnglat
        .iter()
        .map(|&(x, y)| {
            let sx = ((x - min_x) * scale).round();
            let sy = ((y - min_y) * scale).round();
            ((sx + offset_x) as i32, (char_size - sy + border) as i32)
        })
        .collect()
}

/// Renders the passcode glyphs, one open polyline per column on a black canvas.
///
/// `columns` holds the zero based column index and its points ordered by row. The canvas
/// has one `char_size + 2 * border` square cell per column up to the highest index.
pub fn draw_passcode(columns: &[(usize, Vec<(f64, f64)>)], style: &PasscodeStyle) -> GrayImage {
    let cell = style.char_size + 2 * style.border;
    let num_columns = columns.iter().map(|(n, _)| n + 1).max().unwrap_or(0) as u32;
    let mut img = GrayImage::new((cell * num_columns).max(1), cell);

    for (n, lnglat) in columns {
        let pts = glyph_points(*n, lnglat, style);
        if let [(x, y)] = pts[..] {
            if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
                img.put_pixel(x as u32, y as u32, STROKE_COLOR);
            }
        }
        for pair in pts.windows(2) {
            draw_antialiased_line_segment_mut(&mut img, pair[0], pair[1], STROKE_COLOR, interpolate);
        }
    }
    img
}

pub fn save_passcode(columns: &[(usize, Vec<(f64, f64)>)], style: &PasscodeStyle, path: &Path) -> Result<()> {
    save_gray_png(&draw_passcode(columns, style), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glyph_fills_its_cell() {
        let style = PasscodeStyle::default();
        let pts = glyph_points(1, &[(121.0, 31.0), (121.5, 31.0), (121.5, 31.25)], &style);
        // column 1 starts at 3 * border + char_size
        assert_eq!(pts, vec![(110, 90), (190, 90), (190, 50)]);
    }

    #[test]
    fn single_point_column_does_not_divide_by_zero() {
        let style = PasscodeStyle::default();
        assert_eq!(glyph_points(0, &[(1.0, 2.0)], &style), vec![(10, 90)]);
        assert!(glyph_points(0, &[], &style).is_empty());
    }

    #[test]
    fn passcode_canvas_layout() {
        let style = PasscodeStyle::default();
        let columns = vec![
            (0, vec![(0.0, 0.0), (1.0, 1.0)]),
            (2, vec![(0.0, 0.0), (0.0, 1.0), (1.0, 1.0)]),
        ];
        let img = draw_passcode(&columns, &style);
        assert_eq!(img.dimensions(), (300, 100));
        // both endpoints of the first stroke are lit
        assert_eq!(img.get_pixel(10, 90)[0], 255);
        assert_eq!(img.get_pixel(90, 10)[0], 255);
        // the unused middle cell stays dark
        assert!((100..200).all(|x| (0..100).all(|y| img.get_pixel(x, y)[0] == 0)));
    }

    #[test]
    fn overlay_outlines_contour() {
        let photo = Photo {
            img_data: [0u8, 0, 0, 255].repeat(20 * 20),
            width: 20,
            height: 20,
        };
        let contour = Contour {
            points: [(2, 2), (2, 12), (15, 12), (15, 2)],
        };
        let img = draw_match_overlay(&photo, &[contour]);
        assert_eq!(*img.get_pixel(2, 7), OVERLAY_COLOR);
        assert_eq!(*img.get_pixel(8, 12), OVERLAY_COLOR);
        assert_eq!(*img.get_pixel(8, 7), Rgba([0, 0, 0, 255]));
    }
}
