//! Aggregation: per-page tables → one ordered, uniquely named collection.
//!
//! Sheet names must survive a spreadsheet writer, which caps them at
//! [`MAX_SHEET_NAME_LEN`] characters, forbids a handful of characters and
//! compares names case-insensitively. Names are made valid here so the
//! external writer never has to rename anything.

use crate::table::RepairedTable;
use std::collections::HashSet;
use tracing::debug;

/// Hard limit on sheet-name length, in characters.
pub const MAX_SHEET_NAME_LEN: usize = 31;

/// Characters spreadsheet applications reject in sheet names.
const FORBIDDEN: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

/// Characters left dangling by truncation.
const TRAILING_SEPARATORS: &[char] = &['-', '_', ',', '.', ';', ':', '/', '&', '|', '('];

/// Fraction of the available length a word-boundary cut must keep.
const WORD_BOUNDARY_MIN_RATIO: f64 = 0.6;

/// The tables one page contributed.
#[derive(Debug, Clone, Default)]
pub struct PageTables {
    pub page_number: usize,
    pub tables: Vec<RepairedTable>,
    /// `None` for pages excluded from the document confidence (failed, or
    /// nothing extracted).
    pub confidence: Option<f64>,
}

/// Aggregated output of a run.
#[derive(Debug, Clone, Default)]
pub struct Aggregated {
    pub tables: Vec<RepairedTable>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    multi_page: bool,
}

impl Aggregator {
    /// `total_pages` is the document's page count, not the number
    /// extracted: a 40-page PDF capped at 1 page still gets page suffixes.
    pub fn new(total_pages: usize) -> Self {
        Self {
            multi_page: total_pages > 1,
        }
    }

    pub fn aggregate(&self, mut pages: Vec<PageTables>) -> Aggregated {
        pages.sort_by_key(|p| p.page_number);

        let confidence = mean_confidence(pages.iter().map(|p| p.confidence));

        let mut used: HashSet<String> = HashSet::new();
        let mut tables = Vec::new();
        for page in pages {
            for mut table in page.tables {
                let ordinal = tables.len() + 1;
                let suffix = if self.multi_page {
                    format!(" (P{})", table.page_number)
                } else {
                    String::new()
                };
                let name = unique_sheet_name(&table.sheet_name, ordinal, &suffix, &mut used);
                if name != table.sheet_name {
                    debug!("Sheet '{}' renamed to '{}'", table.sheet_name, name);
                }
                table.sheet_name = name;
                tables.push(table);
            }
        }

        Aggregated { tables, confidence }
    }
}

/// Arithmetic mean of the present values; 0 when none is present.
pub fn mean_confidence(values: impl IntoIterator<Item = Option<f64>>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        (sum / n as f64).clamp(0.0, 1.0)
    }
}

// ── Sheet names ──────────────────────────────────────────────────────────

/// Replace forbidden characters, collapse whitespace, drop quotes at the
/// ends.
pub fn sanitize_sheet_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if FORBIDDEN.contains(&c) {
                '-'
            } else if c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect();
    replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches('\'')
        .trim()
        .to_string()
}

/// Fit `base` + `suffix` into [`MAX_SHEET_NAME_LEN`] characters.
///
/// When `base` must be cut, the cut prefers the last word boundary that
/// keeps at least 60% of the available length; separators left at the end
/// are stripped before the suffix is appended.
pub fn fit_sheet_name(base: &str, suffix: &str) -> String {
    let suffix_len = suffix.chars().count();
    let available = MAX_SHEET_NAME_LEN.saturating_sub(suffix_len);

    let base = base.trim();
    let fitted = if base.chars().count() <= available {
        base.to_string()
    } else {
        let prefix: Vec<char> = base.chars().take(available).collect();
        let min_keep = (available as f64 * WORD_BOUNDARY_MIN_RATIO).ceil() as usize;
        let cut = prefix
            .iter()
            .rposition(|c| c.is_whitespace() || TRAILING_SEPARATORS.contains(c) || *c == ')')
            .filter(|&i| i >= min_keep)
            .unwrap_or(prefix.len());
        let truncated: String = prefix[..cut].iter().collect();
        truncated
            .trim_end_matches(|c: char| c.is_whitespace() || TRAILING_SEPARATORS.contains(&c))
            .to_string()
    };

    let name = format!("{fitted}{suffix}");
    let name = name.trim();
    if name.chars().count() > MAX_SHEET_NAME_LEN {
        name.chars().take(MAX_SHEET_NAME_LEN).collect()
    } else {
        name.to_string()
    }
}

/// Sanitise, fit and de-duplicate one name. Blank names become `Table N`;
/// a case-insensitive clash gets a ` 2`, ` 3`… counter before `suffix`.
fn unique_sheet_name(
    raw: &str,
    ordinal: usize,
    suffix: &str,
    used: &mut HashSet<String>,
) -> String {
    let mut base = sanitize_sheet_name(raw);
    if base.is_empty() {
        base = format!("Table {ordinal}");
    }

    let mut counter = 1usize;
    loop {
        let tail = if counter == 1 {
            suffix.to_string()
        } else {
            format!(" {counter}{suffix}")
        };
        let candidate = fit_sheet_name(&base, &tail);
        if used.insert(candidate.to_lowercase()) {
            return candidate;
        }
        counter += 1;
    }
}
