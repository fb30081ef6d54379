//! # IFS Solver Library
//!
//! The `ifssolver` library locates geotagged portal photos inside a composite IFS puzzle
//! picture and decodes the passcode spelled by their grid arrangement. A split run is a
//! long offline batch job: features are cached on disk and progress is saved after every
//! portal, so an interrupted run resumes where it stopped.
//!
//! ## Overview of Modules
//!
//! - **`solver`**: Orchestrates a split run (crop, feature extraction, matching, grid
//!   sorting, result table, overlay) and the passcode rendering.
//!
//! - **`config`**: YAML configuration with per-backend tuning and the derived file layout.
//!
//! - **`photo`**: Defines the RGBA `Photo` struct with decoding, cropping, scaling and PNG
//!   output.
//!
//! - **`feature_extractor`**: The `FeatureExtractor` trait with its on-disk feature cache,
//!   and the CPU backend built on multi-scale FAST corners.
//!
//! - **`keypoint_detector`**: FAST-9 corner detection with non-maximum suppression.
//!
//! - **`circular_feature_descriptor`**: Rotation aligned colour centre of mass descriptors
//!   over an inner and an outer disk.
//!
//! - **`circular_feature_descriptor_matcher`**: Ratio-tested nearest neighbour matching of
//!   descriptors through a k-d tree.
//!
//! - **`feature_set`**: Keypoint and descriptor collections and their packed array form,
//!   which is also the cache file format.
//!
//! - **`plan_cache`**: Memoizes per-shape extraction resources.
//!
//! - **`feature_matcher`**: The `FeatureMatcher` trait and the iterative homography
//!   matchers that find every copy of a portal photo.
//!
//! - **`homography`**: Projective transforms fitted by normalized DLT inside RANSAC.
//!
//! - **`contour`**: Matched quadrilaterals, polygon moments and Hu-moment shape distance.
//!
//! - **`grid_sort`**: Orders match centres into columns with one dimensional k-means.
//!
//! - **`match_state`**: Resumable progress of a split run, persisted on drop.
//!
//! - **`portal`**, **`match_result`**: The metadata table, the result table and the split
//!   error report.
//!
//! - **`ifs_crop`**, **`drawing`**: Background cropping of the IFS picture, the match
//!   overlay and the passcode glyphs.
//!
//! - **`gpu`** (feature `gpu`): wgpu compute backend for descriptors and matching.

pub mod solver;

pub mod config;
pub mod error;
pub mod photo;

pub mod circular_feature_descriptor;
pub mod circular_feature_descriptor_matcher;
pub mod feature_extractor;
pub mod feature_set;
pub mod keypoint_detector;
pub mod plan_cache;

pub mod contour;
pub mod feature_matcher;
pub mod grid_sort;
pub mod homography;

pub mod drawing;
pub mod ifs_crop;
pub mod match_result;
pub mod match_state;
pub mod portal;

#[cfg(feature = "gpu")]
pub mod gpu;

mod atomic_file;

pub use error::{Result, SolverError};
pub use solver::{Method, Solver, SplitReport};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
