use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::atomic_file::write_atomic;
use crate::error::{Result, SolverError};

/// One located portal in the reconstructed grid. `col` and `row` are 1-indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResultRow {
    pub col: usize,
    pub row: usize,
    pub lat: f64,
    pub lng: f64,
    /// Centroid of the matched contour in IFS pixels.
    pub x: i32,
    pub y: i32,
    pub name: String,
}

pub fn write_match_result(path: &Path, rows: &[MatchResultRow]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if rows.is_empty() {
        writer.write_record(["col", "row", "lat", "lng", "x", "y", "name"])?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer.into_inner().map_err(|e| SolverError::Io(e.into_error()))?;
    write_atomic(path, &bytes)
}

/// # Errors
/// [`SolverError::MissingInput`] when no result table has been written yet.
pub fn read_match_result(path: &Path) -> Result<Vec<MatchResultRow>> {
    if !path.exists() {
        return Err(SolverError::MissingInput(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Groups rows by column and orders every group by row.
///
/// Returns the zero based column index with that column's (lng, lat) points.
///
/// # Examples
/// ```
/// use ifssolver::match_result::{group_columns, MatchResultRow};
///
/// let row = |col, row, lng| MatchResultRow { col, row, lat: 0.0, lng, x: 0, y: 0, name: String::new() };
/// let rows = vec![row(2, 1, 5.0), row(1, 2, 2.0), row(1, 1, 1.0)];
/// assert_eq!(
///     group_columns(&rows),
///     vec![(0, vec![(1.0, 0.0), (2.0, 0.0)]), (1, vec![(5.0, 0.0)])]
/// );
/// ```
pub fn group_columns(rows: &[MatchResultRow]) -> Vec<(usize, Vec<(f64, f64)>)> {
    let mut columns: BTreeMap<usize, Vec<&MatchResultRow>> = BTreeMap::new();
    for row in rows {
        columns.entry(row.col).or_default().push(row);
    }
    columns
        .into_iter()
        .map(|(col, mut members)| {
            members.sort_by_key(|r| r.row);
            let points = members.iter().map(|r| (r.lng, r.lat)).collect();
            (col.saturating_sub(1), points)
        })
        .collect()
}

/// A portal that could not be processed during a split run.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitError {
    pub index: usize,
    pub name: String,
    pub reason: String,
}

/// Writes the error report, one `index, name, "reason"` line per entry.
///
/// A resumed run appends to the existing report, a fresh run replaces it.
pub fn write_split_errors(path: &Path, errors: &[SplitError], append: bool) -> Result<()> {
    let mut text = String::new();
    for e in errors {
        text.push_str(&format!("{}, {}, \"{}\"\n", e.index, e.name, e.reason));
    }
    if append {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(text.as_bytes())?;
        Ok(())
    } else {
        write_atomic(path, text.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(col: usize, row: usize, name: &str) -> MatchResultRow {
        MatchResultRow {
            col,
            row,
            lat: 31.0 + row as f64 * 0.001,
            lng: 121.0 + col as f64 * 0.001,
            x: col as i32 * 100,
            y: row as i32 * 80,
            name: name.to_string(),
        }
    }

    #[test]
    fn table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("match_result.csv");
        let rows = vec![row(1, 1, "Gate"), row(1, 2, "Bench, east"), row(2, 1, "Mural \"B\"")];
        write_match_result(&path, &rows).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("col,row,lat,lng,x,y,name\n"));
        assert_eq!(read_match_result(&path).unwrap(), rows);
    }

    #[test]
    fn empty_table_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("match_result.csv");
        write_match_result(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "col,row,lat,lng,x,y,name\n");
        assert!(read_match_result(&path).unwrap().is_empty());
    }

    #[test]
    fn missing_table() {
        let err = read_match_result(Path::new("/no/such/match_result.csv")).unwrap_err();
        assert!(matches!(err, SolverError::MissingInput(_)));
    }

    #[test]
    fn error_report_append_and_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split_errors.txt");
        let first = [SplitError {
            index: 3,
            name: "Gate".to_string(),
            reason: "Not Found".to_string(),
        }];
        let second = [SplitError {
            index: 7,
            name: "Pond".to_string(),
            reason: "decode failed".to_string(),
        }];
        write_split_errors(&path, &first, false).unwrap();
        write_split_errors(&path, &second, true).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "3, Gate, \"Not Found\"\n7, Pond, \"decode failed\"\n"
        );
        write_split_errors(&path, &second, false).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "7, Pond, \"decode failed\"\n");
    }
}
