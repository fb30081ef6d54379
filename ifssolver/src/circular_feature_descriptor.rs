use crate::photo::Photo;

/// Number of values in a descriptor: an (x, y) centre of mass for each of the R, G and B
/// channels, measured in the outer disk and again in the inner disk.
pub const DESCRIPTOR_DIMS: usize = 12;

/// Factor applied to the normalized aligned coordinates before rounding them into the
/// integer `feature_vector` used for nearest neighbour search.
pub const QUANTIZATION_SCALE: f32 = 10_000.0;

/// Stores information about the "center of mass" of color channels in a circular region
/// around a keypoint. Each channel (R, G, B) is expressed relative to the overall (combined)
/// center of mass, which makes the descriptor invariant to rotation.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct CircularFeatureDescriptor {
    /// The combined angle (using `atan2`) of the total color center of mass in the outer disk.
    pub total_angle: f32,

    /// The magnitude of the total color center of mass, divided by the outer radius.
    pub total_radius: f32,

    /// Per-channel centres of mass rotated by `-total_angle` and divided by the disk radius.
    /// Layout: outer disk `[rx, ry, gx, gy, bx, by]` followed by the same for the inner disk.
    pub aligned: [f32; DESCRIPTOR_DIMS],

    /// An integer-based feature vector (scaled by [`QUANTIZATION_SCALE`]) derived from `aligned`.
    pub feature_vector: [i64; DESCRIPTOR_DIMS],
}

impl CircularFeatureDescriptor {
    /// Builds a descriptor from its aligned coordinates, deriving the quantized feature vector.
    pub fn from_aligned(total_angle: f32, total_radius: f32, aligned: [f32; DESCRIPTOR_DIMS]) -> Self {
        let mut feature_vector = [0i64; DESCRIPTOR_DIMS];
        for (q, a) in feature_vector.iter_mut().zip(aligned.iter()) {
            *q = f32::round(a * QUANTIZATION_SCALE) as i64;
        }
        CircularFeatureDescriptor {
            total_angle,
            total_radius,
            aligned,
            feature_vector,
        }
    }

    /// Euclidean distance between the aligned coordinates of two descriptors.
    pub fn distance(&self, other: &CircularFeatureDescriptor) -> f32 {
        self.aligned
            .iter()
            .zip(other.aligned.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

/// Row extents of a digital disk: for every `dy` in `-radius..=radius`, the pixels with
/// `|dx| <= row_extents[dy + radius]` lie inside the disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskTable {
    radius: isize,
    row_extents: Vec<isize>,
}

impl DiskTable {
    pub fn new(radius: usize) -> Self {
        let radius = radius as isize;
        let radius2 = radius * radius;
        let row_extents = (-radius..=radius)
            .map(|y| f32::sqrt((radius2 - y * y) as f32).floor() as isize)
            .collect();
        DiskTable { radius, row_extents }
    }

    pub fn radius(&self) -> usize {
        self.radius as usize
    }

    pub fn row_extent(&self, dy: isize) -> Option<isize> {
        if dy < -self.radius || dy > self.radius {
            None
        } else {
            Some(self.row_extents[(dy + self.radius) as usize])
        }
    }
}

/// Weighted channel sums over a disk.
#[derive(Default, Clone, Copy)]
struct ChannelSums {
    sum: [i64; 3],
    weighted_x: [i64; 3],
    weighted_y: [i64; 3],
}

impl ChannelSums {
    fn add(&mut self, dx: isize, dy: isize, rgb: (u8, u8, u8)) {
        let values = [rgb.0 as i64, rgb.1 as i64, rgb.2 as i64];
        for c in 0..3 {
            self.sum[c] += values[c];
            self.weighted_x[c] += dx as i64 * values[c];
            self.weighted_y[c] += dy as i64 * values[c];
        }
    }

    fn centre_of_mass(&self, c: usize) -> (f32, f32) {
        if self.sum[c] == 0 {
            (0.0, 0.0)
        } else {
            (
                self.weighted_x[c] as f32 / self.sum[c] as f32,
                self.weighted_y[c] as f32 / self.sum[c] as f32,
            )
        }
    }

    fn total_centre_of_mass(&self) -> (f32, f32) {
        let sum_all: i64 = self.sum.iter().sum();
        if sum_all == 0 {
            (0.0, 0.0)
        } else {
            (
                self.weighted_x.iter().sum::<i64>() as f32 / sum_all as f32,
                self.weighted_y.iter().sum::<i64>() as f32 / sum_all as f32,
            )
        }
    }
}

/// Computes the descriptor of the region centred on `(center_x, center_y)`.
///
/// The caller keeps keypoints at least `outer.radius()` pixels away from the image border.
/// Pixels outside the photo would read as blue through [`Photo::get_rgb`].
pub fn compute_descriptor(
    photo: &Photo,
    center_x: isize,
    center_y: isize,
    outer: &DiskTable,
    inner: &DiskTable,
) -> CircularFeatureDescriptor {
    let mut outer_sums = ChannelSums::default();
    let mut inner_sums = ChannelSums::default();

    for dy in -outer.radius..=outer.radius {
        let row_radius = outer.row_extents[(dy + outer.radius) as usize];
        let inner_row = inner.row_extent(dy);
        for dx in -row_radius..=row_radius {
            let x = center_x + dx;
            let y = center_y + dy;
            if x < 0 || y < 0 {
                continue;
            }
            let rgb = photo.get_rgb(x as usize, y as usize);
            outer_sums.add(dx, dy, rgb);
            if matches!(inner_row, Some(extent) if dx.abs() <= extent) {
                inner_sums.add(dx, dy, rgb);
            }
        }
    }

    let (total_cm_x, total_cm_y) = outer_sums.total_centre_of_mass();
    let total_angle = if total_cm_x == 0.0 && total_cm_y == 0.0 {
        0.0
    } else {
        total_cm_y.atan2(total_cm_x)
    };
    let outer_radius = outer.radius.max(1) as f32;
    let inner_radius = inner.radius.max(1) as f32;
    let total_radius = (total_cm_x * total_cm_x + total_cm_y * total_cm_y).sqrt() / outer_radius;

    // Rotate every channel so that the total color angle becomes the new zero angle.
    let (sin, cos) = total_angle.sin_cos();
    let mut aligned = [0.0f32; DESCRIPTOR_DIMS];
    for (disk, (sums, radius)) in [(&outer_sums, outer_radius), (&inner_sums, inner_radius)].into_iter().enumerate() {
        for c in 0..3 {
            let (cm_x, cm_y) = sums.centre_of_mass(c);
            let base = disk * 6 + c * 2;
            aligned[base] = (cm_x * cos + cm_y * sin) / radius;
            aligned[base + 1] = (cm_y * cos - cm_x * sin) / radius;
        }
    }

    CircularFeatureDescriptor::from_aligned(total_angle, total_radius, aligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo_from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> [u8; 3]) -> Photo {
        let mut img_data = Vec::with_capacity(width * height * 4);
        for y in 0..height {
            for x in 0..width {
                let [r, g, b] = f(x, y);
                img_data.extend_from_slice(&[r, g, b, 255]);
            }
        }
        Photo {
            img_data,
            width,
            height,
        }
    }

    #[test]
    fn disk_table_extents() {
        let table = DiskTable::new(3);
        assert_eq!(table.row_extent(0), Some(3));
        assert_eq!(table.row_extent(3), Some(0));
        assert_eq!(table.row_extent(-2), Some(2));
        assert_eq!(table.row_extent(4), None);
    }

    #[test]
    fn uniform_region_has_zero_descriptor() {
        let photo = photo_from_fn(20, 20, |_, _| [120, 40, 200]);
        let d = compute_descriptor(&photo, 10, 10, &DiskTable::new(6), &DiskTable::new(3));
        assert_eq!(d.feature_vector, [0; DESCRIPTOR_DIMS]);
        assert_eq!(d.total_radius, 0.0);
    }

    #[test]
    fn descriptor_is_rotation_invariant() {
        // A horizontal gradient and the same gradient rotated by 90 degrees.
        let horizontal = photo_from_fn(21, 21, |x, y| [(x * 10) as u8, (y * 3) as u8, 60]);
        let vertical = photo_from_fn(21, 21, |x, y| [((20 - y) * 10) as u8, (x * 3) as u8, 60]);
        let outer = DiskTable::new(8);
        let inner = DiskTable::new(4);
        let a = compute_descriptor(&horizontal, 10, 10, &outer, &inner);
        let b = compute_descriptor(&vertical, 10, 10, &outer, &inner);
        assert!(a.distance(&b) < 1e-4, "distance {}", a.distance(&b));
        assert!((a.total_angle - b.total_angle).abs() > 1.0);
    }
}
