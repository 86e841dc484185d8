//! Table repair: turn a [`RawTable`] into a rectangular [`RepairedTable`].
//!
//! Vision models read merged cells inconsistently. A value that spans three
//! rows is printed once, so the rows below it come back short, or with a
//! spurious leading blank that shifts every later cell one column right.
//! Repair is deterministic and runs four passes per row, in order:
//!
//! 1. **Leading-empty trim** — a row longer than the header that starts with
//!    blanks loses up to `row.len() - headers.len()` leading blanks.
//! 2. **Length reconciliation** — pad with `None` or truncate from the right
//!    so `row.len() == headers.len()`.
//! 3. **Vertical merge back-fill** — in the first `merge_fill_columns`
//!    columns, a blank cell takes the last value seen in that column when a
//!    later cell in the same row has content.
//! 4. **Null normalisation** — blank strings become `None`.
//!
//! The back-fill bound is a heuristic: group labels (department, project,
//! category) sit in the leading columns of most real tables. It is not a
//! guarantee for every layout, so it is configurable.
//!
//! Repairing an already repaired table is a no-op.

use crate::output::UNKNOWN_CONFIDENCE;
use crate::table::{is_blank, Cell, RawTable, RepairedTable};
use tracing::debug;

pub use crate::config::DEFAULT_MERGE_FILL_COLUMNS;

/// Counts of what repair changed, used for warnings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Leading blank cells removed by pass 1.
    pub trimmed_cells: usize,
    /// Rows right-padded by pass 2.
    pub padded_rows: usize,
    /// Rows truncated by pass 2 (content may be lost).
    pub truncated_rows: usize,
    /// Cells filled by pass 3.
    pub backfilled_cells: usize,
    /// Headers that had to be synthesised.
    pub synthesized_headers: usize,
}

impl RepairReport {
    pub fn merge(&mut self, other: RepairReport) {
        self.trimmed_cells += other.trimmed_cells;
        self.padded_rows += other.padded_rows;
        self.truncated_rows += other.truncated_rows;
        self.backfilled_cells += other.backfilled_cells;
        self.synthesized_headers += other.synthesized_headers;
    }

    pub fn is_clean(&self) -> bool {
        *self == RepairReport::default()
    }
}

/// Deterministic repairer; holds only the back-fill column bound.
#[derive(Debug, Clone, Copy)]
pub struct TableRepairer {
    merge_fill_columns: usize,
}

impl Default for TableRepairer {
    fn default() -> Self {
        Self::new(DEFAULT_MERGE_FILL_COLUMNS)
    }
}

impl TableRepairer {
    pub fn new(merge_fill_columns: usize) -> Self {
        Self { merge_fill_columns }
    }

    /// Repair one table.
    ///
    /// `fallback_confidence` is used when the table carries none (usually
    /// the page-level score).
    pub fn repair(
        &self,
        raw: RawTable,
        fallback_confidence: Option<f64>,
    ) -> (RepairedTable, RepairReport) {
        let mut report = RepairReport::default();
        let headers = normalize_headers(raw.headers, &raw.rows, &mut report);
        let width = headers.len();

        let mut last_seen: Vec<Cell> = vec![None; self.merge_fill_columns.min(width)];
        let mut rows = Vec::with_capacity(raw.rows.len());

        for row in raw.rows {
            let row = trim_leading_empty(row, width, &mut report);
            let row = reconcile_length(row, width, &mut report);
            let row = self.backfill(row, &mut last_seen, &mut report);
            rows.push(normalize_nulls(row));
        }

        if !report.is_clean() {
            debug!(
                "Repaired table '{}' (page {}): {:?}",
                raw.sheet_name, raw.page_number, report
            );
        }

        let table = RepairedTable {
            sheet_name: raw.sheet_name.trim().to_string(),
            headers,
            rows,
            page_number: raw.page_number,
            confidence: raw
                .confidence
                .or(fallback_confidence)
                .unwrap_or(UNKNOWN_CONFIDENCE),
            confidence_details: raw.confidence_details,
        };
        (table, report)
    }

    /// Pass 3. `last_seen` carries the last non-blank value per fill column
    /// across rows.
    fn backfill(
        &self,
        mut row: Vec<Cell>,
        last_seen: &mut [Cell],
        report: &mut RepairReport,
    ) -> Vec<Cell> {
        for col in 0..last_seen.len() {
            if is_blank(&row[col]) && last_seen[col].is_some() {
                let has_content_after = row[col + 1..].iter().any(|c| !is_blank(c));
                if has_content_after {
                    row[col] = last_seen[col].clone();
                    report.backfilled_cells += 1;
                }
            }
        }
        for (col, seen) in last_seen.iter_mut().enumerate() {
            if !is_blank(&row[col]) {
                *seen = row[col].clone();
            }
        }
        row
    }
}

/// Repair with the default back-fill bound.
pub fn repair_table(raw: RawTable) -> RepairedTable {
    TableRepairer::default().repair(raw, None).0
}

/// Trim header text; blank headers become `Column N`. A table with no
/// headers at all gets one synthesised header per cell of its widest row.
fn normalize_headers(
    headers: Vec<String>,
    rows: &[Vec<Cell>],
    report: &mut RepairReport,
) -> Vec<String> {
    let headers: Vec<String> = if headers.is_empty() {
        let widest = rows.iter().map(Vec::len).max().unwrap_or(0);
        vec![String::new(); widest]
    } else {
        headers
    };

    headers
        .into_iter()
        .enumerate()
        .map(|(i, h)| {
            let h = h.trim();
            if h.is_empty() {
                report.synthesized_headers += 1;
                format!("Column {}", i + 1)
            } else {
                h.to_string()
            }
        })
        .collect()
}

/// Pass 1.
fn trim_leading_empty(mut row: Vec<Cell>, width: usize, report: &mut RepairReport) -> Vec<Cell> {
    if row.len() <= width {
        return row;
    }
    let excess = row.len() - width;
    let leading_blanks = row.iter().take_while(|c| is_blank(c)).count();
    let remove = leading_blanks.min(excess);
    if remove > 0 {
        row.drain(..remove);
        report.trimmed_cells += remove;
    }
    row
}

/// Pass 2. Post-condition: `row.len() == width`.
fn reconcile_length(mut row: Vec<Cell>, width: usize, report: &mut RepairReport) -> Vec<Cell> {
    if row.len() < width {
        row.resize(width, None);
        report.padded_rows += 1;
    } else if row.len() > width {
        row.truncate(width);
        report.truncated_rows += 1;
    }
    row
}

/// Pass 4.
fn normalize_nulls(row: Vec<Cell>) -> Vec<Cell> {
    row.into_iter()
        .map(|c| if is_blank(&c) { None } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<Cell> {
        values
            .iter()
            .map(|v| if v.is_empty() { None } else { Some(v.to_string()) })
            .collect()
    }

    fn raw(headers: &[&str], rows: Vec<Vec<Cell>>) -> RawTable {
        RawTable {
            sheet_name: "Plan".into(),
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows,
            page_number: 1,
            confidence: Some(0.9),
            confidence_details: None,
        }
    }

    const SIX: [&str; 6] = ["Project", "Phase", "Task", "Team", "Start", "End"];

    #[test]
    fn merged_group_cells_are_backfilled() {
        let t = raw(
            &SIX,
            vec![
                cells(&["Alpha", "Planning", "Research", "Team A", "01/07", "05/07"]),
                vec![
                    Some(String::new()),
                    Some(String::new()),
                    Some("Design".into()),
                    Some("Team B".into()),
                    Some("06/07".into()),
                    Some("12/07".into()),
                ],
            ],
        );
        let (repaired, report) = TableRepairer::default().repair(t, None);
        assert_eq!(
            repaired.rows[1],
            cells(&["Alpha", "Planning", "Design", "Team B", "06/07", "12/07"])
        );
        assert_eq!(report.backfilled_cells, 2);
    }

    #[test]
    fn spurious_leading_blank_is_trimmed() {
        let t = raw(
            &["A", "B", "C"],
            vec![cells(&["x", "y", "z"]), cells(&["", "1", "2", "3"])],
        );
        let (repaired, report) = TableRepairer::default().repair(t, None);
        assert_eq!(repaired.rows[1], cells(&["1", "2", "3"]));
        assert_eq!(report.trimmed_cells, 1);
        assert_eq!(report.truncated_rows, 0);
    }

    #[test]
    fn trim_removes_at_most_the_excess() {
        let t = raw(&["A", "B"], vec![cells(&["", "", "", "v"])]);
        let (repaired, report) = TableRepairer::new(0).repair(t, None);
        // Excess is 2: two blanks go, the row is then ["", "v"].
        assert_eq!(repaired.rows[0], cells(&["", "v"]));
        assert_eq!(report.trimmed_cells, 2);
    }

    #[test]
    fn short_rows_padded_long_rows_truncated() {
        let t = raw(
            &["A", "B", "C"],
            vec![cells(&["1"]), cells(&["1", "2", "3", "4", "5"])],
        );
        let (repaired, report) = TableRepairer::new(0).repair(t, None);
        assert_eq!(repaired.rows[0], cells(&["1", "", ""]));
        assert_eq!(repaired.rows[1], cells(&["1", "2", "3"]));
        assert_eq!(report.padded_rows, 1);
        assert_eq!(report.truncated_rows, 1);
        assert!(repaired.is_rectangular());
    }

    #[test]
    fn no_backfill_without_later_content() {
        let t = raw(
            &["Group", "Item", "Qty"],
            vec![cells(&["Fruit", "Apple", "3"]), cells(&["", "", ""])],
        );
        let repaired = repair_table(t);
        assert_eq!(repaired.rows[1], cells(&["", "", ""]));
    }

    #[test]
    fn backfill_limited_to_leading_columns() {
        let t = raw(
            &["A", "B", "C", "D", "E"],
            vec![cells(&["a", "b", "c", "d", "e"]), cells(&["", "", "", "", "x"])],
        );
        let repaired = repair_table(t);
        assert_eq!(repaired.rows[1], cells(&["a", "b", "c", "", "x"]));
    }

    #[test]
    fn backfill_bound_is_configurable() {
        let t = raw(
            &["A", "B", "C"],
            vec![cells(&["a", "b", "c"]), cells(&["", "", "x"])],
        );
        let (repaired, _) = TableRepairer::new(1).repair(t, None);
        assert_eq!(repaired.rows[1], cells(&["a", "", "x"]));
    }

    #[test]
    fn backfilled_values_propagate_down() {
        let t = raw(
            &["Dept", "Name", "Role"],
            vec![
                cells(&["Sales", "Ann", "Lead"]),
                cells(&["", "Bob", "Rep"]),
                cells(&["", "Cid", "Rep"]),
            ],
        );
        let repaired = repair_table(t);
        assert_eq!(repaired.rows[2][0].as_deref(), Some("Sales"));
    }

    #[test]
    fn whitespace_cells_become_null() {
        let t = raw(&["A", "B"], vec![vec![Some("  ".into()), Some("".into())]]);
        let repaired = repair_table(t);
        assert_eq!(repaired.rows[0], vec![None, None]);
    }

    #[test]
    fn repair_is_idempotent() {
        let t = raw(
            &SIX,
            vec![
                cells(&["Alpha", "Planning", "Research", "Team A", "01/07", "05/07"]),
                cells(&["", "", "Design", "Team B", "06/07", "12/07"]),
                cells(&["", "Build", "Code"]),
                cells(&["", "", "", "", "", "", "", "x"]),
                cells(&["", "", "", "", "", ""]),
            ],
        );
        let once = repair_table(t);
        let twice = repair_table(RawTable::from(once.clone()));
        assert_eq!(once, twice);
    }

    #[test]
    fn row_length_invariant_holds() {
        let t = raw(
            &["A", "B", "C", "D"],
            vec![
                vec![],
                cells(&["1"]),
                cells(&["", "", "", "", "", "", "2"]),
                cells(&["1", "2", "3", "4", "5", "6"]),
            ],
        );
        let repaired = repair_table(t);
        for row in &repaired.rows {
            assert_eq!(row.len(), repaired.headers.len());
        }
    }

    #[test]
    fn missing_headers_synthesised_from_widest_row() {
        let t = raw(&[], vec![cells(&["a", "b"]), cells(&["c", "d", "e"])]);
        let (repaired, report) = TableRepairer::default().repair(t, None);
        assert_eq!(repaired.headers, vec!["Column 1", "Column 2", "Column 3"]);
        assert_eq!(report.synthesized_headers, 3);
        assert!(repaired.is_rectangular());
    }

    #[test]
    fn blank_header_named_by_position() {
        let t = raw(&["Name", " ", "Qty"], vec![]);
        let repaired = repair_table(t);
        assert_eq!(repaired.headers, vec!["Name", "Column 2", "Qty"]);
    }

    #[test]
    fn confidence_falls_back() {
        let mut t = raw(&["A"], vec![cells(&["1"])]);
        t.confidence = None;
        let (repaired, _) = TableRepairer::default().repair(t.clone(), Some(0.7));
        assert_eq!(repaired.confidence, 0.7);
        let (repaired, _) = TableRepairer::default().repair(t, None);
        assert_eq!(repaired.confidence, UNKNOWN_CONFIDENCE);
    }
}
