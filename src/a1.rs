use anyhow::{Result, anyhow, bail};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;

static A1_CELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]{1,3})([1-9][0-9]*)$").expect("regex"));
static COLUMN_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{1,3}$").expect("regex"));

/// Last row of an `.xlsx` grid.
pub const MAX_ROWS: u32 = 1_048_576;
/// Last column of an `.xlsx` grid (`XFD`).
pub const MAX_COLS: u32 = 16_384;

/// A single 1-based cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellAddress {
    pub col: u32,
    pub row: u32,
}

impl CellAddress {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let (label, row) = split_a1(value)?;
        Ok(Self {
            col: column_label_to_index(&label)?,
            row,
        })
    }

    pub fn label(&self) -> String {
        cell_label(self.col, self.row)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Ord for CellAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        // Row-major ordering
        match self.row.cmp(&other.row) {
            Ordering::Equal => self.col.cmp(&other.col),
            ord => ord,
        }
    }
}

impl PartialOrd for CellAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Inclusive rectangle with endpoints already ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeBounds {
    pub min_col: u32,
    pub min_row: u32,
    pub max_col: u32,
    pub max_row: u32,
}

impl RangeBounds {
    /// Parse a two-endpoint range. Endpoint order does not matter.
    pub fn parse(value: &str) -> Result<Self> {
        let candidate = value.trim();
        let Some((start, end)) = candidate.split_once(':') else {
            bail!("Invalid range reference: {value}");
        };
        let start = CellAddress::parse(start).map_err(|_| anyhow!("Invalid range reference: {value}"))?;
        let end = CellAddress::parse(end).map_err(|_| anyhow!("Invalid range reference: {value}"))?;
        Ok(Self::from_corners(start, end))
    }

    /// Accepts either `A1` or `A1:C3`.
    pub fn parse_cell_or_range(value: &str) -> Result<Self> {
        if value.contains(':') {
            Self::parse(value)
        } else {
            let cell = CellAddress::parse(value.trim())?;
            Ok(Self::from_corners(cell, cell))
        }
    }

    pub fn from_corners(a: CellAddress, b: CellAddress) -> Self {
        Self {
            min_col: a.col.min(b.col),
            min_row: a.row.min(b.row),
            max_col: a.col.max(b.col),
            max_row: a.row.max(b.row),
        }
    }

    /// Rectangle of `rows` x `cols` cells anchored at `origin`; must stay on the grid.
    pub fn from_origin(origin: CellAddress, rows: u32, cols: u32) -> Result<Self> {
        let max_col = origin.col.checked_add(cols.max(1) - 1).filter(|col| *col <= MAX_COLS);
        let max_row = origin.row.checked_add(rows.max(1) - 1).filter(|row| *row <= MAX_ROWS);
        let (Some(max_col), Some(max_row)) = (max_col, max_row) else {
            bail!("Range starting at {origin} with {rows} rows and {cols} columns exceeds the sheet grid.");
        };
        Ok(Self {
            min_col: origin.col,
            min_row: origin.row,
            max_col,
            max_row,
        })
    }

    pub fn top_left(&self) -> CellAddress {
        CellAddress::new(self.min_col, self.min_row)
    }

    pub fn bottom_right(&self) -> CellAddress {
        CellAddress::new(self.max_col, self.max_row)
    }

    pub fn rows(&self) -> u32 {
        self.max_row - self.min_row + 1
    }

    pub fn cols(&self) -> u32 {
        self.max_col - self.min_col + 1
    }

    pub fn cell_count(&self) -> u64 {
        u64::from(self.rows()) * u64::from(self.cols())
    }

    pub fn contains(&self, cell: CellAddress) -> bool {
        (self.min_col..=self.max_col).contains(&cell.col)
            && (self.min_row..=self.max_row).contains(&cell.row)
    }

    pub fn intersects(&self, other: &RangeBounds) -> bool {
        self.min_col <= other.max_col
            && other.min_col <= self.max_col
            && self.min_row <= other.max_row
            && other.min_row <= self.max_row
    }

    /// Cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellAddress> + '_ {
        (self.min_row..=self.max_row)
            .flat_map(move |row| (self.min_col..=self.max_col).map(move |col| CellAddress::new(col, row)))
    }

    pub fn label(&self) -> String {
        format!("{}:{}", self.top_left(), self.bottom_right())
    }
}

impl fmt::Display for RangeBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Split `b12` into `("B", 12)`.
pub fn split_a1(value: &str) -> Result<(String, u32)> {
    let caps = A1_CELL_RE
        .captures(value)
        .ok_or_else(|| anyhow!("Invalid cell reference: {value}"))?;
    let row = caps[2]
        .parse::<u32>()
        .ok()
        .filter(|row| *row <= MAX_ROWS)
        .ok_or_else(|| anyhow!("Invalid cell reference: {value}"))?;
    let label = caps[1].to_ascii_uppercase();
    if column_label_to_index(&label)? > MAX_COLS {
        bail!("Invalid cell reference: {value}");
    }
    Ok((label, row))
}

pub fn is_cell_reference(value: &str) -> bool {
    split_a1(value).is_ok()
}

pub fn column_label_to_index(label: &str) -> Result<u32> {
    let normalized = label.trim().to_ascii_uppercase();
    if !COLUMN_LABEL_RE.is_match(&normalized) {
        bail!("Invalid column label: {label}");
    }
    Ok(normalized
        .bytes()
        .fold(0u32, |acc, b| acc * 26 + u32::from(b - b'A' + 1)))
}

pub fn column_index_to_label(index: u32) -> Result<String> {
    if index < 1 {
        bail!("Column index must be positive (got {index}).");
    }
    let mut current = index;
    let mut chunks = Vec::new();
    while current > 0 {
        current -= 1;
        chunks.push((b'A' + (current % 26) as u8) as char);
        current /= 26;
    }
    Ok(chunks.into_iter().rev().collect())
}

/// Label for a coordinate that is already known to be valid.
pub fn cell_label(col: u32, row: u32) -> String {
    let column = column_index_to_label(col.max(1)).unwrap_or_else(|_| "A".to_string());
    format!("{column}{row}")
}

/// Uppercase and reorder a two-endpoint range into `min:max` form.
pub fn normalize_range(value: &str) -> Result<String> {
    Ok(RangeBounds::parse(value)?.label())
}

pub fn range_cell_count(value: &str) -> Result<u64> {
    Ok(RangeBounds::parse(value)?.cell_count())
}

/// Top-left cell plus `(rows, cols)` of a range.
pub fn parse_range_geometry(value: &str) -> Result<(String, u32, u32)> {
    let bounds = RangeBounds::parse(value)?;
    Ok((bounds.top_left().label(), bounds.rows(), bounds.cols()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_labels_round_trip() {
        for n in 1..=18_278u32 {
            let label = column_index_to_label(n).unwrap();
            assert_eq!(column_label_to_index(&label).unwrap(), n, "label {label}");
        }
        assert_eq!(column_index_to_label(27).unwrap(), "AA");
        assert_eq!(column_label_to_index("zz").unwrap(), 702);
    }

    #[test]
    fn rejects_out_of_domain_columns() {
        assert!(column_index_to_label(0).is_err());
        assert!(column_label_to_index("ABCD").is_err());
        assert!(column_label_to_index("A1").is_err());
    }

    #[test]
    fn split_a1_uppercases_and_rejects_leading_zero() {
        assert_eq!(split_a1("ab12").unwrap(), ("AB".to_string(), 12));
        assert!(split_a1("A01").is_err());
        assert!(split_a1("12").is_err());
        let err = split_a1("A0").unwrap_err().to_string();
        assert!(err.contains("A0"));
    }

    #[test]
    fn cell_references_stay_on_the_sheet_grid() {
        assert_eq!(split_a1("A1048576").unwrap(), ("A".to_string(), MAX_ROWS));
        assert_eq!(split_a1("xfd1").unwrap(), ("XFD".to_string(), 1));
        for outside in ["A1048577", "XFE1", "A2000000", "A4294967295", "A99999999999"] {
            let err = split_a1(outside).unwrap_err().to_string();
            assert_eq!(err, format!("Invalid cell reference: {outside}"));
            assert!(!is_cell_reference(outside));
        }
        assert!(RangeBounds::parse("A1:XFE2").is_err());
    }

    #[test]
    fn origin_extent_is_checked_against_the_grid() {
        let corner = CellAddress::new(1, MAX_ROWS);
        assert_eq!(RangeBounds::from_origin(corner, 1, 1).unwrap().label(), "A1048576:A1048576");
        assert!(RangeBounds::from_origin(corner, 2, 1).is_err());
        assert!(RangeBounds::from_origin(CellAddress::new(MAX_COLS, 1), 1, 2).is_err());
        assert!(RangeBounds::from_origin(CellAddress::new(1, u32::MAX), 2, 1).is_err());
        let block = RangeBounds::from_origin(CellAddress::new(2, 3), 0, 4).unwrap();
        assert_eq!(block.label(), "B3:E3");
    }

    #[test]
    fn range_count_ignores_endpoint_order() {
        for (a, b) in [("A1", "C3"), ("B7", "AA2"), ("D4", "D4")] {
            let forward = range_cell_count(&format!("{a}:{b}")).unwrap();
            let reverse = range_cell_count(&format!("{b}:{a}")).unwrap();
            assert_eq!(forward, reverse);
        }
        assert_eq!(normalize_range("c3:a1").unwrap(), "A1:C3");
    }

    #[test]
    fn geometry_reports_top_left_and_extent() {
        assert_eq!(
            parse_range_geometry("C5:A1").unwrap(),
            ("A1".to_string(), 5, 3)
        );
    }

    #[test]
    fn intersection_and_membership() {
        let a = RangeBounds::parse("A1:C3").unwrap();
        let b = RangeBounds::parse("C3:D4").unwrap();
        let c = RangeBounds::parse("E1:E2").unwrap();
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.contains(CellAddress::parse("B2").unwrap()));
        assert_eq!(a.cells().count(), 9);
    }
}
