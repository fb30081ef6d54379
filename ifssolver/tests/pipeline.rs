use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ifssolver::config::SolverConfig;
use ifssolver::feature_extractor::feature_cache_path;
use ifssolver::match_state::MatchState;
use ifssolver::photo::Photo;
use ifssolver::portal::{read_portals, write_portals, Portal};
use ifssolver::{Method, Solver, SolverError};

const PORTAL_W: usize = 48;
const PORTAL_H: usize = 36;
const NUM_PORTALS: usize = 12;
/// Portal index placed at (column, row) of the IFS picture.
const LAYOUT: [[usize; 2]; 3] = [[4, 0], [2, 9], [7, 5]];
/// Portal without a downloaded photo.
const MISSING: usize = 11;

fn noise_photo(seed: u64) -> Photo {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img_data = Vec::with_capacity(PORTAL_W * PORTAL_H * 4);
    for _ in 0..PORTAL_W * PORTAL_H {
        img_data.extend_from_slice(&[rng.random(), rng.random(), rng.random(), 255]);
    }
    Photo {
        img_data,
        width: PORTAL_W,
        height: PORTAL_H,
    }
}

fn portals() -> Vec<Portal> {
    (0..NUM_PORTALS)
        .map(|i| Portal {
            name: format!("Portal {i}"),
            latitude: 31.0 + i as f64 * 0.001,
            longitude: 121.0 + i as f64 * 0.002,
            image_url: format!("http://example.com/portal/{i}.jpg"),
        })
        .collect()
}

fn paste(canvas: &mut Photo, photo: &Photo, x0: usize, y0: usize) {
    for y in 0..photo.height {
        let src = y * photo.width * 4;
        let dst = ((y0 + y) * canvas.width + x0) * 4;
        canvas.img_data[dst..dst + photo.width * 4].copy_from_slice(&photo.img_data[src..src + photo.width * 4]);
    }
}

fn origin(col: usize, row: usize) -> (usize, usize) {
    (20 + col * 88, 20 + row * 66)
}

/// Writes the IFS picture, the portal photos and the metadata table under `root`.
fn setup(root: &Path) -> SolverConfig {
    let mut config = SolverConfig::new(root.join("ifs.png"), 3);
    config.temp_dir = root.join("temp");
    config.output_dir = root.join("output");
    config.cpu.extractor.octaves = 1;
    config.cpu.extractor.max_keypoints = 5000;
    config.cpu.matcher.ransac_threshold = 5.0;

    let portals = portals();
    for (i, portal) in portals.iter().enumerate() {
        if i != MISSING {
            let path = config.portal_images_dir().join(portal.image_filename());
            noise_photo(i as u64).save_png(&path).unwrap();
        }
    }
    write_portals(&config.metadata_csv(), &portals).unwrap();

    let mut ifs = Photo {
        img_data: [50u8, 50, 50, 255].repeat(300 * 200),
        width: 300,
        height: 200,
    };
    for (col, rows) in LAYOUT.iter().enumerate() {
        for (row, &portal) in rows.iter().enumerate() {
            let (x0, y0) = origin(col, row);
            paste(&mut ifs, &noise_photo(portal as u64), x0, y0);
        }
    }
    ifs.save_png(&config.ifs_image).unwrap();
    config
}

#[test]
fn split_then_draw() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let solver = Solver::new(config.clone());

    let report = solver.split_picture(Method::Cpu).unwrap();
    assert!(!report.resumed);
    assert_eq!(report.rows.len(), 6);
    assert_eq!(report.column_counts(), vec![2, 2, 2]);
    for row in &report.rows {
        let expected = LAYOUT[row.col - 1][row.row - 1];
        assert_eq!(row.name, format!("Portal {expected}"));
        let (x0, y0) = origin(row.col - 1, row.row - 1);
        assert_eq!((row.x, row.y), (x0 as i32 + 23, y0 as i32 + 17));
    }

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].index, MISSING);
    assert_eq!(
        fs::read_to_string(config.split_errors_txt()).unwrap(),
        format!("{MISSING}, Portal {MISSING}, \"Not Found\"\n")
    );
    assert!(config.match_result_png().exists());
    // cropped to the lower right corner of the last pasted photo
    assert!(config.cropped_ifs_png(244, 122).exists());

    let columns = solver.draw_passcode().unwrap();
    assert_eq!(columns.len(), 3);
    for (n, points) in &columns {
        let expected: Vec<(f64, f64)> = LAYOUT[*n]
            .iter()
            .map(|&p| (121.0 + p as f64 * 0.002, 31.0 + p as f64 * 0.001))
            .collect();
        assert_eq!(points, &expected);
    }
    let first = fs::read(config.passcode_png()).unwrap();
    solver.draw_passcode().unwrap();
    assert_eq!(fs::read(config.passcode_png()).unwrap(), first);
}

#[test]
fn finished_run_resumes_without_rework() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let first = Solver::new(config.clone()).split_picture(Method::Cpu).unwrap();

    // the photos are gone, so only the saved progress can reproduce the result
    fs::remove_dir_all(config.portal_images_dir()).unwrap();
    fs::create_dir_all(config.portal_images_dir()).unwrap();
    let second = Solver::new(config.clone()).split_picture(Method::Cpu).unwrap();
    assert!(second.resumed);
    assert!(second.errors.is_empty());
    assert_eq!(second.rows, first.rows);
}

#[test]
fn interrupted_run_keeps_progress() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());

    let interrupt = Arc::new(AtomicBool::new(true));
    let err = Solver::new(config.clone())
        .with_interrupt(interrupt)
        .split_picture(Method::Cpu)
        .unwrap_err();
    assert!(matches!(err, SolverError::Interrupted));
    assert!(config.match_state_bin().exists());
    assert!(!config.match_result_csv().exists());

    let report = Solver::new(config.clone()).split_picture(Method::Cpu).unwrap();
    assert!(report.resumed);
    assert_eq!(report.rows.len(), 6);
}

#[test]
fn resumes_from_saved_index() {
    const RESUME_AT: usize = 6;
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let full = Solver::new(config.clone()).split_picture(Method::Cpu).unwrap();

    // rewind the saved progress to just before portal RESUME_AT
    let state_path = config.match_state_bin();
    let metadata = config.metadata_csv();
    let earlier: Vec<_> = MatchState::open(&state_path, &metadata, true)
        .unwrap()
        .match_cnts()
        .iter()
        .filter(|(n, _)| *n < RESUME_AT)
        .copied()
        .collect();
    assert!(!earlier.is_empty());
    drop(MatchState::open(&state_path, &metadata, false).unwrap());
    {
        let mut state = MatchState::open(&state_path, &metadata, true).unwrap();
        assert!(!state.is_resumed());
        for (n, contour) in earlier {
            state.save_cnt(n, contour);
        }
        state.save_index(RESUME_AT);
    }

    // portals before the resume point can no longer be extracted
    let portals = read_portals(&metadata).unwrap();
    let cache_of = |portal: &Portal| {
        let photo = config.portal_images_dir().join(portal.image_filename());
        feature_cache_path(&config.portal_features_dir(), Method::Cpu.as_str(), &photo)
    };
    for portal in &portals[..RESUME_AT] {
        fs::remove_file(config.portal_images_dir().join(portal.image_filename())).unwrap();
        fs::remove_file(cache_of(portal)).unwrap();
    }

    let resumed = Solver::new(config.clone()).split_picture(Method::Cpu).unwrap();
    assert!(resumed.resumed);
    let error_indices: Vec<usize> = resumed.errors.iter().map(|e| e.index).collect();
    assert_eq!(error_indices, vec![MISSING]);
    assert_eq!(resumed.rows.len(), 6);
    assert_eq!(resumed.rows, full.rows);
    for portal in &portals[..RESUME_AT] {
        assert!(!cache_of(portal).exists());
    }
    assert!(cache_of(&portals[RESUME_AT + 1]).exists());
}

#[test]
fn disabled_progress_leaves_no_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let report = Solver::new(config.clone())
        .with_save_progress(false)
        .split_picture(Method::Cpu)
        .unwrap();
    assert_eq!(report.rows.len(), 6);
    assert!(!config.match_state_bin().exists());
}

#[test]
fn cached_features_are_reused() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    Solver::new(config.clone())
        .with_save_progress(false)
        .split_picture(Method::Cpu)
        .unwrap();
    let cache_dir = config.portal_features_dir().join("cpu");
    assert_eq!(fs::read_dir(&cache_dir).unwrap().count(), NUM_PORTALS - 1);

    let report = Solver::new(config)
        .with_no_clean(true)
        .with_save_progress(false)
        .split_picture(Method::Cpu)
        .unwrap();
    assert_eq!(report.rows.len(), 6);
}

#[test]
fn zero_columns_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = setup(dir.path());
    config.column = 0;
    let err = Solver::new(config.clone()).split_picture(Method::Cpu).unwrap_err();
    assert!(matches!(err, SolverError::InvalidConfig(_)));
    assert!(!config.match_result_csv().exists());
}

#[test]
fn draw_requires_split() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let err = Solver::new(config).draw_passcode().unwrap_err();
    assert!(matches!(err, SolverError::MissingInput(_)));
}
