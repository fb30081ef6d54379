use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::circular_feature_descriptor::{compute_descriptor, DiskTable};
use crate::error::{Result, SolverError};
use crate::feature_set::{FeatureArray, FeatureSet, Keypoint};
use crate::keypoint_detector::{detect_corners, Corner};
use crate::photo::{proportional_height, ImageShape, Photo};
use crate::plan_cache::{PlanCache, PlanKey};

/// Tuning shared by the extraction backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorParams {
    /// FAST intensity threshold.
    pub fast_threshold: u8,
    /// Radius of the outer descriptor disk; the inner disk has half of it.
    pub descriptor_radius: usize,
    /// Number of pyramid levels, each half the size of the previous one.
    pub octaves: usize,
    /// Strongest keypoints kept per portal photo, over all levels.
    pub max_keypoints: usize,
    /// Keypoint budget of the IFS picture. `None` keeps every corner.
    pub ifs_max_keypoints: Option<usize>,
    /// Bound on memoized per-shape plans. `None` keeps every plan.
    pub plan_cache_capacity: Option<usize>,
}

impl Default for ExtractorParams {
    fn default() -> Self {
        ExtractorParams {
            fast_threshold: 20,
            descriptor_radius: 8,
            octaves: 3,
            max_keypoints: 2000,
            ifs_max_keypoints: None,
            plan_cache_capacity: None,
        }
    }
}

/// Computes features for images and caches them on disk.
///
/// Each backend uses its own `Features` representation, the one its matcher consumes. On
/// disk every backend stores the packed [`FeatureArray`] layout.
pub trait FeatureExtractor {
    type Features;

    /// Name of the backend; also the cache sub directory.
    fn method(&self) -> &'static str;

    /// Whether existing cache files may be reused.
    fn cache_enabled(&self) -> bool;

    fn params(&self) -> &ExtractorParams;

    /// Computes features from decoded pixels, keeping the `max_keypoints` strongest
    /// corners when a limit is given.
    fn extract(&mut self, photo: &Photo, max_keypoints: Option<usize>) -> Result<Self::Features>;

    /// Computes features directly from decoded pixels, without touching the cache.
    fn get_image_features(&mut self, photo: &Photo) -> Result<Self::Features> {
        let limit = self.params().max_keypoints;
        self.extract(photo, Some(limit))
    }

    /// Features of the IFS picture. It holds every portal photo at once, so it gets its own
    /// budget instead of the per-photo one.
    fn get_ifs_features(&mut self, photo: &Photo) -> Result<Self::Features> {
        let limit = self.params().ifs_max_keypoints;
        self.extract(photo, limit)
    }

    fn pack(features: &Self::Features) -> FeatureArray;

    fn unpack(array: FeatureArray) -> std::result::Result<Self::Features, String>;

    /// Features of the image at `image_path` along with its pixel shape.
    ///
    /// A readable cache entry at `cache_path` is returned as is when caching is enabled.
    /// An unreadable one is deleted. Freshly computed features are always written back.
    ///
    /// # Errors
    /// [`SolverError::ImageNotFound`] when the image does not exist, decode and I/O errors
    /// otherwise. A broken cache entry is never an error.
    fn get_features_and_shape(&mut self, image_path: &Path, cache_path: &Path) -> Result<(Self::Features, ImageShape)> {
        if !image_path.exists() {
            return Err(SolverError::ImageNotFound(image_path.to_path_buf()));
        }

        if self.cache_enabled() && cache_path.exists() {
            let cached = FeatureArray::load(cache_path).and_then(|array| {
                Self::unpack(array).map_err(|reason| SolverError::CacheCorrupt {
                    path: cache_path.to_path_buf(),
                    reason,
                })
            });
            match cached {
                Ok(features) => {
                    debug!("Using cached features {}", cache_path.display());
                    return Ok((features, ImageShape::of_file(image_path)?));
                }
                Err(e) => {
                    warn!("Discarding feature cache: {e}");
                    if let Err(e) = fs::remove_file(cache_path) {
                        warn!("Could not remove {}: {e}", cache_path.display());
                    }
                }
            }
        }

        let photo = Photo::open(image_path)?;
        let features = self.get_image_features(&photo)?;
        Self::pack(&features).save(cache_path)?;
        Ok((features, photo.shape()))
    }
}

/// `{features_dir}/{method}/{image stem}.features`
pub fn feature_cache_path(features_dir: &Path, method: &str, image_path: &Path) -> PathBuf {
    let stem = image_path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    features_dir.join(method).join(format!("{stem}.features"))
}

/// Size of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PyramidLevel {
    pub width: usize,
    pub height: usize,
    /// Level 0 pixels per level pixel.
    pub scale: f32,
}

/// Per-shape resources for extraction: the pyramid layout and the disk tables.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionPlan {
    pub levels: Vec<PyramidLevel>,
    pub outer: DiskTable,
    pub inner: DiskTable,
}

impl ExtractionPlan {
    pub fn new(key: &PlanKey, params: &ExtractorParams) -> ExtractionPlan {
        let radius = params.descriptor_radius.max(2);
        let min_side = 2 * radius + 8;
        let ImageShape { width, height } = key.shape;

        let mut levels = vec![PyramidLevel { width, height, scale: 1.0 }];
        for octave in 1..params.octaves.max(1) {
            let factor = (1usize << octave) as f32;
            let level_width = (width as f32 / factor).round() as usize;
            let level_height = (height as f32 / factor).round() as usize;
            if level_width < min_side || level_height < min_side {
                break;
            }
            levels.push(PyramidLevel {
                width: level_width,
                height: proportional_height(width, height, level_width),
                scale: width as f32 / level_width as f32,
            });
        }

        ExtractionPlan {
            levels,
            outer: DiskTable::new(radius),
            inner: DiskTable::new(radius / 2),
        }
    }

    /// Scaled copies of `photo`, level 0 borrowed.
    pub fn pyramid<'a>(&self, photo: &'a Photo) -> Vec<Cow<'a, Photo>> {
        self.levels
            .iter()
            .enumerate()
            .map(|(octave, level)| {
                if octave == 0 {
                    Cow::Borrowed(photo)
                } else {
                    Cow::Owned(photo.get_scaled_proportional(level.width))
                }
            })
            .collect()
    }

    /// FAST corners on every level, strongest `max_keypoints` overall, as
    /// `(octave, corner)` in level coordinates ordered by octave then raster position.
    pub fn select_corners(
        &self,
        pyramid: &[Cow<'_, Photo>],
        fast_threshold: u8,
        max_keypoints: Option<usize>,
    ) -> Vec<(usize, Corner)> {
        let mut candidates = Vec::new();
        for (octave, level) in pyramid.iter().enumerate() {
            let gray = level.to_gray();
            let corners = detect_corners(&gray, level.width, level.height, fast_threshold, self.outer.radius());
            candidates.extend(corners.into_iter().map(|c| (octave, c)));
        }

        let limit = max_keypoints.unwrap_or(usize::MAX);
        if candidates.len() > limit {
            candidates.sort_by(|a, b| b.1.score.total_cmp(&a.1.score).then(raster_order(a, b)));
            candidates.truncate(limit);
            candidates.sort_by(raster_order);
        }
        candidates
    }
}

fn raster_order(a: &(usize, Corner), b: &(usize, Corner)) -> std::cmp::Ordering {
    (a.0, a.1.y, a.1.x).cmp(&(b.0, b.1.y, b.1.x))
}

/// Extracts rotation aligned circular colour descriptors at multi-scale FAST corners.
pub struct CpuFeatureExtractor {
    params: ExtractorParams,
    enable_cache: bool,
    plans: PlanCache<ExtractionPlan>,
    /// Number of images actually processed, cache hits excluded.
    total_extractions: usize,
}

impl CpuFeatureExtractor {
    pub fn new(params: ExtractorParams, enable_cache: bool) -> Self {
        let plans = PlanCache::new(params.plan_cache_capacity);
        CpuFeatureExtractor {
            params,
            enable_cache,
            plans,
            total_extractions: 0,
        }
    }

    pub fn get_num_extractions(&self) -> usize {
        self.total_extractions
    }

    pub fn plans(&self) -> &PlanCache<ExtractionPlan> {
        &self.plans
    }
}

impl FeatureExtractor for CpuFeatureExtractor {
    type Features = FeatureSet;

    fn method(&self) -> &'static str {
        "cpu"
    }

    fn cache_enabled(&self) -> bool {
        self.enable_cache
    }

    fn params(&self) -> &ExtractorParams {
        &self.params
    }

    fn extract(&mut self, photo: &Photo, max_keypoints: Option<usize>) -> Result<FeatureSet> {
        let params = &self.params;
        let plan = self
            .plans
            .get_or_build(PlanKey::rgba(photo.shape()), |key| Ok(ExtractionPlan::new(key, params)))?;
        self.total_extractions += 1;

        let pyramid = plan.pyramid(photo);
        let mut features = FeatureSet::default();
        for (octave, corner) in plan.select_corners(&pyramid, self.params.fast_threshold, max_keypoints) {
            let scale = plan.levels[octave].scale;
            let descriptor = compute_descriptor(
                &pyramid[octave],
                corner.x as isize,
                corner.y as isize,
                &plan.outer,
                &plan.inner,
            );
            features.keypoints.push(Keypoint {
                x: corner.x as f32 * scale,
                y: corner.y as f32 * scale,
                angle: descriptor.total_angle,
                response: corner.score,
                octave: octave as u32,
                size: 2.0 * plan.outer.radius() as f32 * scale,
            });
            features.descriptors.push(descriptor);
        }
        debug!("Extracted {} keypoints from {}x{} image", features.len(), photo.width, photo.height);
        Ok(features)
    }

    fn pack(features: &FeatureSet) -> FeatureArray {
        features.pack()
    }

    fn unpack(array: FeatureArray) -> std::result::Result<FeatureSet, String> {
        FeatureSet::unpack(&array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise_photo(width: usize, height: usize, seed: u64) -> Photo {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut img_data = Vec::with_capacity(width * height * 4);
        for _ in 0..width * height {
            img_data.extend_from_slice(&[rng.random(), rng.random(), rng.random(), 255]);
        }
        Photo {
            img_data,
            width,
            height,
        }
    }

    #[test]
    fn cache_round_trip_skips_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("portal.jpg");
        noise_photo(48, 36, 7).save_png(&image_path).unwrap();
        let cache_path = feature_cache_path(dir.path(), "cpu", &image_path);
        assert_eq!(cache_path, dir.path().join("cpu").join("portal.features"));

        let mut extractor = CpuFeatureExtractor::new(ExtractorParams::default(), true);
        let (fresh, shape) = extractor.get_features_and_shape(&image_path, &cache_path).unwrap();
        assert_eq!(shape, ImageShape::new(48, 36));
        assert!(!fresh.is_empty());
        assert!(cache_path.exists());

        let (cached, cached_shape) = extractor.get_features_and_shape(&image_path, &cache_path).unwrap();
        assert_eq!(cached, fresh);
        assert_eq!(cached_shape, shape);
        assert_eq!(extractor.get_num_extractions(), 1);
    }

    #[test]
    fn corrupt_cache_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("portal.jpg");
        noise_photo(40, 40, 3).save_png(&image_path).unwrap();
        let cache_path = feature_cache_path(dir.path(), "cpu", &image_path);
        fs::create_dir_all(cache_path.parent().unwrap()).unwrap();
        fs::write(&cache_path, b"garbage").unwrap();

        let mut extractor = CpuFeatureExtractor::new(ExtractorParams::default(), true);
        let (features, _) = extractor.get_features_and_shape(&image_path, &cache_path).unwrap();
        assert_eq!(extractor.get_num_extractions(), 1);
        let reloaded = FeatureSet::unpack(&FeatureArray::load(&cache_path).unwrap()).unwrap();
        assert_eq!(reloaded, features);
    }

    #[test]
    fn disabled_cache_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("portal.jpg");
        noise_photo(40, 30, 5).save_png(&image_path).unwrap();
        let cache_path = feature_cache_path(dir.path(), "cpu", &image_path);

        let mut extractor = CpuFeatureExtractor::new(ExtractorParams::default(), false);
        extractor.get_features_and_shape(&image_path, &cache_path).unwrap();
        extractor.get_features_and_shape(&image_path, &cache_path).unwrap();
        assert_eq!(extractor.get_num_extractions(), 2);
        assert_eq!(extractor.plans().get_num_builds(), 1);
    }

    #[test]
    fn missing_image_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("absent.jpg");
        let mut extractor = CpuFeatureExtractor::new(ExtractorParams::default(), true);
        let err = extractor
            .get_features_and_shape(&image_path, &dir.path().join("absent.features"))
            .unwrap_err();
        assert!(matches!(err, SolverError::ImageNotFound(_)));
    }

    #[test]
    fn ifs_picture_has_its_own_keypoint_budget() {
        let photo = noise_photo(200, 150, 9);
        let params = ExtractorParams {
            octaves: 1,
            max_keypoints: 50,
            ..ExtractorParams::default()
        };
        let mut extractor = CpuFeatureExtractor::new(params.clone(), false);
        assert_eq!(extractor.get_image_features(&photo).unwrap().len(), 50);
        assert!(extractor.get_ifs_features(&photo).unwrap().len() > 80);

        let mut extractor = CpuFeatureExtractor::new(
            ExtractorParams {
                ifs_max_keypoints: Some(80),
                ..params
            },
            false,
        );
        assert_eq!(extractor.get_ifs_features(&photo).unwrap().len(), 80);
    }

    #[test]
    fn pyramid_stops_before_descriptor_no_longer_fits() {
        let plan = ExtractionPlan::new(&PlanKey::rgba(ImageShape::new(48, 36)), &ExtractorParams::default());
        // 24x18 is too small for a radius 8 disk plus margin
        assert_eq!(plan.levels.len(), 1);
        let plan = ExtractionPlan::new(&PlanKey::rgba(ImageShape::new(400, 300)), &ExtractorParams::default());
        assert_eq!(plan.levels.len(), 3);
        assert_eq!((plan.levels[2].width, plan.levels[2].height), (100, 75));
    }
}
