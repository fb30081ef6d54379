use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::SolverConfig;
use crate::contour::Contour;
use crate::drawing::{save_match_overlay, save_passcode};
use crate::error::{Result, SolverError};
use crate::feature_extractor::{feature_cache_path, CpuFeatureExtractor, FeatureExtractor};
use crate::feature_matcher::{CpuFeatureMatcher, FeatureMatcher};
use crate::grid_sort::sort_grid;
use crate::ifs_crop::content_extent;
use crate::match_result::{group_columns, read_match_result, write_match_result, write_split_errors, MatchResultRow, SplitError};
use crate::match_state::MatchState;
use crate::photo::Photo;
use crate::portal::{read_portals, Portal};

/// Feature extraction and matching backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Cpu,
    Gpu,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Cpu => "cpu",
            Method::Gpu => "gpu",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Method> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(Method::Cpu),
            "gpu" => Ok(Method::Gpu),
            other => Err(SolverError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Summary of a finished split run.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitReport {
    pub rows: Vec<MatchResultRow>,
    /// Portals that could not be processed in this session.
    pub errors: Vec<SplitError>,
    /// Whether the run continued a saved session.
    pub resumed: bool,
}

impl SplitReport {
    /// Number of matches per column, left to right.
    pub fn column_counts(&self) -> Vec<usize> {
        let num_columns = self.rows.iter().map(|r| r.col).max().unwrap_or(0);
        let mut counts = vec![0; num_columns];
        for row in &self.rows {
            counts[row.col - 1] += 1;
        }
        counts
    }
}

/// Drives a split run and the passcode rendering for one configuration.
pub struct Solver {
    config: SolverConfig,
    no_clean: bool,
    save_progress: bool,
    metadata: PathBuf,
    interrupt: Arc<AtomicBool>,
}

impl Solver {
    pub fn new(config: SolverConfig) -> Solver {
        let metadata = config.metadata_csv();
        Solver {
            config,
            no_clean: false,
            save_progress: true,
            metadata,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reuse portal features cached by an earlier run.
    pub fn with_no_clean(mut self, no_clean: bool) -> Solver {
        self.no_clean = no_clean;
        self
    }

    pub fn with_save_progress(mut self, save_progress: bool) -> Solver {
        self.save_progress = save_progress;
        self
    }

    /// Reads portals from `metadata` instead of the configured metadata file.
    pub fn with_metadata(mut self, metadata: impl Into<PathBuf>) -> Solver {
        self.metadata = metadata.into();
        self
    }

    /// Flag polled between portals; once set the run stops with [`SolverError::Interrupted`].
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Solver {
        self.interrupt = interrupt;
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Locates every portal photo in the IFS picture and writes the result table and the
    /// match overlay.
    pub fn split_picture(&self, method: Method) -> Result<SplitReport> {
        info!("Splitting {} with the {method} backend", self.config.ifs_image.display());
        self.config.validate()?;
        match method {
            Method::Cpu => {
                let mut extractor = CpuFeatureExtractor::new(self.config.cpu.extractor.clone(), self.no_clean);
                let mut matcher = CpuFeatureMatcher::new(self.config.cpu.matcher.clone());
                self.run_split(&mut extractor, &mut matcher)
            }
            #[cfg(feature = "gpu")]
            Method::Gpu => {
                use crate::gpu::{GpuContext, GpuFeatureExtractor, GpuFeatureMatcher};
                use std::rc::Rc;

                let context = Rc::new(GpuContext::new(self.config.gpu.power_preference)?);
                let mut extractor =
                    GpuFeatureExtractor::new(Rc::clone(&context), self.config.gpu.extractor.clone(), self.no_clean);
                let mut matcher = GpuFeatureMatcher::new(context, self.config.gpu.matcher.clone());
                self.run_split(&mut extractor, &mut matcher)
            }
            #[cfg(not(feature = "gpu"))]
            Method::Gpu => Err(SolverError::BackendUnavailable("gpu")),
        }
    }

    fn run_split<E, M>(&self, extractor: &mut E, matcher: &mut M) -> Result<SplitReport>
    where
        E: FeatureExtractor,
        M: FeatureMatcher<Features = E::Features>,
    {
        self.config.prepare_and_check()?;

        info!("Computing IFS image features");
        let ifs = Photo::open(&self.config.ifs_image)?;
        let (width, height) = content_extent(&ifs, &self.config.crop);
        let cropped = ifs.crop(width, height);
        cropped.save_png(&self.config.cropped_ifs_png(width, height))?;
        let ifs_features = extractor.get_ifs_features(&cropped)?;

        info!("Computing portal images");
        let portals = read_portals(&self.metadata)?;
        let features_dir = self.config.portal_features_dir();
        fs::create_dir_all(features_dir.join(extractor.method()))?;

        let mut state = MatchState::open(&self.config.match_state_bin(), &self.metadata, self.save_progress)?;
        let resumed = state.is_resumed();
        let errors_path = self.config.split_errors_txt();
        if !resumed {
            write_split_errors(&errors_path, &[], false)?;
        }

        let mut errors = Vec::new();
        for n in state.index()..portals.len() {
            if self.interrupt.load(Ordering::SeqCst) {
                warn!("Interrupted before portal {n} of {}", portals.len());
                return Err(SolverError::Interrupted);
            }
            let portal = &portals[n];
            let image_path = self.config.portal_images_dir().join(portal.image_filename());
            let cache_path = feature_cache_path(&features_dir, extractor.method(), &image_path);

            match match_portal(extractor, matcher, &image_path, &cache_path, &ifs_features) {
                Ok(contours) => {
                    debug!("Portal {n} ({}): {} matches", portal.name, contours.len());
                    for contour in contours {
                        state.save_cnt(n, contour);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!("Portal {n} ({}) skipped: {e}", portal.name);
                    let error = SplitError {
                        index: n,
                        name: portal.name.clone(),
                        reason: error_reason(&e),
                    };
                    write_split_errors(&errors_path, std::slice::from_ref(&error), true)?;
                    errors.push(error);
                }
            }
            state.save_index(n + 1);
        }

        let match_cnts = state.commit()?;
        if !errors.is_empty() {
            warn!("{} portal photos could not be processed, see {}", errors.len(), errors_path.display());
        }

        let rows = build_rows(&portals, &match_cnts, self.config.column);
        write_match_result(&self.config.match_result_csv(), &rows)?;
        let contours: Vec<Contour> = match_cnts.iter().map(|(_, c)| *c).collect();
        save_match_overlay(&ifs, &contours, &self.config.match_result_png())?;
        info!("{} matches written to {}", rows.len(), self.config.match_result_csv().display());

        Ok(SplitReport { rows, errors, resumed })
    }

    /// Renders the passcode from the result table of an earlier split.
    ///
    /// Returns the (lng, lat) points of every column ordered by row, keyed by the zero
    /// based column index.
    pub fn draw_passcode(&self) -> Result<Vec<(usize, Vec<(f64, f64)>)>> {
        let rows = read_match_result(&self.config.match_result_csv())?;
        let columns = group_columns(&rows);
        save_passcode(&columns, &self.config.passcode, &self.config.passcode_png())?;
        info!("Results written to {}", self.config.output_sub_dir().display());
        Ok(columns)
    }
}

fn match_portal<E, M>(
    extractor: &mut E,
    matcher: &mut M,
    image_path: &Path,
    cache_path: &Path,
    ifs_features: &E::Features,
) -> Result<Vec<Contour>>
where
    E: FeatureExtractor,
    M: FeatureMatcher<Features = E::Features>,
{
    let (features, shape) = extractor.get_features_and_shape(image_path, cache_path)?;
    matcher.get_match_contours(shape, &features, ifs_features)
}

fn error_reason(e: &SolverError) -> String {
    match e {
        SolverError::ImageNotFound(_) => "Not Found".to_string(),
        other => other.to_string(),
    }
}

/// Clusters the match centroids into columns and numbers them from 1.
fn build_rows(portals: &[Portal], match_cnts: &[(usize, Contour)], column: usize) -> Vec<MatchResultRow> {
    let centers: Vec<(i32, i32)> = match_cnts.iter().map(|(_, c)| c.center()).collect();
    let points: Vec<(f64, f64)> = centers.iter().map(|&(x, y)| (x as f64, y as f64)).collect();
    let grid = sort_grid(&points, column);

    let mut rows = Vec::with_capacity(centers.len());
    for (col, members) in grid.iter().enumerate() {
        for (row, &m) in members.iter().enumerate() {
            let portal = &portals[match_cnts[m].0];
            let (x, y) = centers[m];
            rows.push(MatchResultRow {
                col: col + 1,
                row: row + 1,
                lat: portal.latitude,
                lng: portal.longitude,
                x,
                y,
                name: portal.name.clone(),
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portal(name: &str, lat: f64, lng: f64) -> Portal {
        Portal {
            name: name.to_string(),
            latitude: lat,
            longitude: lng,
            image_url: format!("http://example.com/{name}.jpg"),
        }
    }

    fn square_at(x: i32, y: i32) -> Contour {
        Contour {
            points: [(x, y), (x, y + 10), (x + 10, y + 10), (x + 10, y)],
        }
    }

    #[test]
    fn method_names() {
        assert_eq!("CPU".parse::<Method>().unwrap(), Method::Cpu);
        assert_eq!(Method::Gpu.to_string(), "gpu");
        assert!(matches!("opencv".parse::<Method>(), Err(SolverError::UnsupportedMethod(_))));
    }

    #[test]
    fn rows_follow_grid_order() {
        let portals = vec![portal("a", 1.0, 2.0), portal("b", 3.0, 4.0), portal("c", 5.0, 6.0)];
        // portal 1 appears twice, once per column
        let match_cnts = vec![(1, square_at(200, 0)), (0, square_at(0, 100)), (2, square_at(0, 0)), (1, square_at(200, 90))];
        let rows = build_rows(&portals, &match_cnts, 2);
        let summary: Vec<(usize, usize, &str, i32, i32)> =
            rows.iter().map(|r| (r.col, r.row, r.name.as_str(), r.x, r.y)).collect();
        assert_eq!(
            summary,
            vec![(1, 1, "c", 5, 5), (1, 2, "a", 5, 105), (2, 1, "b", 205, 5), (2, 2, "b", 205, 95)]
        );

        let report = SplitReport {
            rows,
            errors: Vec::new(),
            resumed: false,
        };
        assert_eq!(report.column_counts(), vec![2, 2]);
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn gpu_backend_requires_feature() {
        let solver = Solver::new(SolverConfig::new("ifs.png", 1));
        assert!(matches!(solver.split_picture(Method::Gpu), Err(SolverError::BackendUnavailable("gpu"))));
    }
}
