//! Table types: the untrusted [`RawTable`] as the service sends it, and the
//! rectangular [`RepairedTable`] the rest of the crate works with.

use crate::output::{ConfidenceBreakdown, ConfidenceWire};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cell: `None` is an empty or missing value.
pub type Cell = Option<String>;

/// One table as reported by the extraction service for one page.
///
/// Nothing here is trusted: `rows[i].len()` may differ from
/// `headers.len()`, and cells may arrive as numbers, booleans or null.
/// Deserialisation coerces every cell to text and normalises confidence to
/// `[0, 1]`; shape repair is left to [`crate::pipeline::repair`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawTableWire")]
pub struct RawTable {
    pub sheet_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    /// 1-based page; 0 until the orchestrator assigns it.
    pub page_number: usize,
    pub confidence: Option<f64>,
    pub confidence_details: Option<ConfidenceBreakdown>,
}

/// A table whose every row has exactly `headers.len()` cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairedTable {
    pub sheet_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub page_number: usize,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_details: Option<ConfidenceBreakdown>,
}

impl RepairedTable {
    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn is_rectangular(&self) -> bool {
        self.rows.iter().all(|r| r.len() == self.headers.len())
    }
}

impl From<RepairedTable> for RawTable {
    fn from(t: RepairedTable) -> Self {
        Self {
            sheet_name: t.sheet_name,
            headers: t.headers,
            rows: t.rows,
            page_number: t.page_number,
            confidence: Some(t.confidence),
            confidence_details: t.confidence_details,
        }
    }
}

/// True for `None`, `""` and whitespace-only cells.
pub fn is_blank(cell: &Cell) -> bool {
    cell.as_deref().is_none_or(|s| s.trim().is_empty())
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawTableWire {
    #[serde(alias = "name", alias = "title", alias = "sheet")]
    sheet_name: Option<Value>,
    #[serde(alias = "columns")]
    headers: Option<Vec<Value>>,
    #[serde(alias = "data")]
    rows: Option<Vec<Value>>,
    page_number: Option<Value>,
    confidence: Option<ConfidenceWire>,
}

impl From<RawTableWire> for RawTable {
    fn from(w: RawTableWire) -> Self {
        let headers: Vec<String> = w
            .headers
            .unwrap_or_default()
            .into_iter()
            .map(|v| cell_text(v).unwrap_or_default())
            .collect();

        let rows = w
            .rows
            .unwrap_or_default()
            .into_iter()
            .map(|row| row_cells(row, &headers))
            .collect();

        let (confidence, confidence_details) = w
            .confidence
            .map(ConfidenceWire::resolve)
            .unwrap_or((None, None));

        Self {
            sheet_name: w.sheet_name.and_then(cell_text).unwrap_or_default(),
            headers,
            rows,
            page_number: w
                .page_number
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
                .unwrap_or(0),
            confidence,
            confidence_details,
        }
    }
}

/// Coerce one JSON value to cell text.
fn cell_text(v: Value) -> Cell {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Rows usually arrive as arrays. Some models emit objects keyed by header
/// instead; those are laid out in header order, with keys the headers do not
/// name appended after.
fn row_cells(row: Value, headers: &[String]) -> Vec<Cell> {
    match row {
        Value::Array(cells) => cells.into_iter().map(cell_text).collect(),
        Value::Object(mut map) => {
            let mut cells: Vec<Cell> = headers
                .iter()
                .map(|h| map.remove(h).and_then(cell_text))
                .collect();
            cells.extend(map.into_iter().map(|(_, v)| cell_text(v)));
            cells
        }
        Value::Null => Vec::new(),
        scalar => vec![cell_text(scalar)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_cells() {
        let t: RawTable = serde_json::from_str(
            r#"{"sheetName": "Items", "headers": ["Qty", "Price", 3],
                "rows": [[2, 9.5, null], ["x", true]], "confidence": 88}"#,
        )
        .unwrap();
        assert_eq!(t.sheet_name, "Items");
        assert_eq!(t.headers, vec!["Qty", "Price", "3"]);
        assert_eq!(
            t.rows[0],
            vec![Some("2".to_string()), Some("9.5".to_string()), None]
        );
        assert_eq!(t.rows[1], vec![Some("x".to_string()), Some("true".to_string())]);
        assert_eq!(t.confidence, Some(0.88));
    }

    #[test]
    fn object_rows_follow_header_order() {
        let t: RawTable = serde_json::from_str(
            r#"{"headers": ["B", "A"], "rows": [{"A": "1", "B": "2", "C": "3"}]}"#,
        )
        .unwrap();
        assert_eq!(
            t.rows[0],
            vec![Some("2".to_string()), Some("1".to_string()), Some("3".to_string())]
        );
    }

    #[test]
    fn missing_fields_default() {
        let t: RawTable = serde_json::from_str(r#"{"title": null, "rows": null}"#).unwrap();
        assert!(t.sheet_name.is_empty());
        assert!(t.headers.is_empty());
        assert!(t.rows.is_empty());
        assert_eq!(t.confidence, None);
    }

    #[test]
    fn blank_cells() {
        assert!(is_blank(&None));
        assert!(is_blank(&Some(String::new())));
        assert!(is_blank(&Some("  ".into())));
        assert!(!is_blank(&Some("0".into())));
    }
}
