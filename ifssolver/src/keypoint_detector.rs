/// Bresenham circle of radius 3 around the candidate pixel, in ring order.
const CIRCLE_OFFSETS: [(isize, isize); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Minimum length of the contiguous brighter or darker arc.
const ARC_LENGTH: usize = 9;

/// A corner found by [`detect_corners`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub x: usize,
    pub y: usize,
    /// Sum of the absolute intensity differences beyond the threshold on the ring.
    pub score: f32,
}

/// FAST-9 corner detection on a row-major luma buffer, followed by 3x3 non-maximum
/// suppression.
///
/// Pixels closer than `border` (at least 3) to the image edge are never reported.
/// Corners are returned in raster order.
///
/// # Examples
/// ```
/// use ifssolver::keypoint_detector::detect_corners;
///
/// // A bright square on a dark background has corners near its four vertices.
/// let (width, height) = (24, 24);
/// let mut gray = vec![0u8; width * height];
/// for y in 8..16 {
///     for x in 8..16 {
///         gray[y * width + x] = 255;
///     }
/// }
/// let corners = detect_corners(&gray, width, height, 40, 3);
/// assert!(!corners.is_empty());
/// assert!(corners.iter().all(|c| c.x >= 5 && c.x <= 18 && c.y >= 5 && c.y <= 18));
/// ```
pub fn detect_corners(gray: &[u8], width: usize, height: usize, threshold: u8, border: usize) -> Vec<Corner> {
    let border = border.max(3);
    if width <= 2 * border || height <= 2 * border || gray.len() < width * height {
        return Vec::new();
    }

    let mut scores = vec![0f32; width * height];
    for y in border..height - border {
        for x in border..width - border {
            scores[y * width + x] = corner_score(gray, width, x, y, threshold);
        }
    }

    let mut corners = Vec::new();
    for y in border..height - border {
        for x in border..width - border {
            let index = y * width + x;
            let score = scores[index];
            if score <= 0.0 {
                continue;
            }
            if is_local_maximum(&scores, width, x, y, score) {
                corners.push(Corner { x, y, score });
            }
        }
    }
    corners
}

/// Keeps a pixel when no 8-neighbour scores higher. Ties go to the neighbour that comes
/// first in raster order, so a plateau yields exactly one corner.
fn is_local_maximum(scores: &[f32], width: usize, x: usize, y: usize, score: f32) -> bool {
    for dy in -1isize..=1 {
        for dx in -1isize..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = (x as isize + dx) as usize;
            let ny = (y as isize + dy) as usize;
            let other = scores[ny * width + nx];
            let earlier = dy < 0 || (dy == 0 && dx < 0);
            if other > score || (other == score && earlier) {
                return false;
            }
        }
    }
    true
}

/// Returns 0 when the pixel is not a corner.
fn corner_score(gray: &[u8], width: usize, x: usize, y: usize, threshold: u8) -> f32 {
    let center = gray[y * width + x] as i32;
    let t = threshold as i32;

    let mut ring = [0i32; 16];
    for (value, &(dx, dy)) in ring.iter_mut().zip(CIRCLE_OFFSETS.iter()) {
        let px = (x as isize + dx) as usize;
        let py = (y as isize + dy) as usize;
        *value = gray[py * width + px] as i32 - center;
    }

    let brighter = has_arc(&ring, |d| d > t);
    let darker = has_arc(&ring, |d| d < -t);
    if !brighter && !darker {
        return 0.0;
    }

    let mut score = 0i32;
    for &d in &ring {
        if brighter && d > t {
            score += d - t;
        }
        if darker && d < -t {
            score += -d - t;
        }
    }
    score as f32
}

fn has_arc(ring: &[i32; 16], predicate: impl Fn(i32) -> bool) -> bool {
    let mut run = 0;
    // walk the ring twice so arcs wrapping past index 0 are seen
    for i in 0..32 {
        if predicate(ring[i % 16]) {
            run += 1;
            if run >= ARC_LENGTH {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_image_has_no_corners() {
        let gray = vec![128u8; 32 * 32];
        assert!(detect_corners(&gray, 32, 32, 10, 3).is_empty());
    }

    #[test]
    fn isolated_bright_pixel_is_a_single_corner() {
        let (width, height) = (21, 21);
        let mut gray = vec![10u8; width * height];
        gray[10 * width + 10] = 250;
        let corners = detect_corners(&gray, width, height, 20, 3);
        assert_eq!(corners.len(), 1);
        assert_eq!((corners[0].x, corners[0].y), (10, 10));
    }

    #[test]
    fn border_is_respected() {
        let (width, height) = (21, 21);
        let mut gray = vec![10u8; width * height];
        gray[4 * width + 4] = 250;
        assert!(detect_corners(&gray, width, height, 20, 6).is_empty());
        assert_eq!(detect_corners(&gray, width, height, 20, 3).len(), 1);
    }
}
