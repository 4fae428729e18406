use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

pub const REPORTS_HEADING: &str = "## Longitudinal maneuver reports";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub description: String,
    pub link: String,
}

// BTreeMap so serialization gets sorted platform keys for free; the
// per-platform vectors keep table row order.
pub type ReportMap = BTreeMap<String, Vec<ReportEntry>>;

#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub reports: ReportMap,
    pub skipped_rows: usize,
}

// Structural match: the heading, optional blank lines, a header row, a
// separator row, then one-or-more data rows. Anything else yields an empty
// map and the caller decides whether that is fatal.
pub fn parse_reports(readme: &str, pages_base_url: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();

    let mut lines = readme.lines();
    if lines.by_ref().find(|l| l.contains(REPORTS_HEADING)).is_none() {
        return outcome;
    }

    let header = loop {
        match lines.next() {
            Some(line) if line.trim().is_empty() => continue,
            other => break other,
        }
    };
    match header {
        Some(line) if line.trim_start().starts_with('|') => {}
        _ => return outcome,
    }
    match lines.next() {
        Some(line) if line.starts_with('|') => {}
        _ => return outcome,
    }

    for row in lines {
        if !row.starts_with('|') {
            break;
        }

        // drop the text outside the outer pipes, trim each cell
        let mut cells: Vec<&str> = row.split('|').map(str::trim).collect();
        cells.remove(0);
        cells.pop();

        let &[platform, description, link_cell] = &cells[..] else {
            outcome.skipped_rows += 1;
            continue;
        };

        let Some(path) = link_path(link_cell) else {
            outcome.skipped_rows += 1;
            continue;
        };

        outcome
            .reports
            .entry(platform.to_string())
            .or_default()
            .push(ReportEntry {
                description: description.to_string(),
                link: format!("{pages_base_url}/{path}"),
            });
    }

    outcome
}

pub fn total_entries(reports: &ReportMap) -> usize {
    reports.values().map(Vec::len).sum()
}

fn link_path(cell: &str) -> Option<&str> {
    static LINK_RE: OnceLock<Regex> = OnceLock::new();
    let re = LINK_RE.get_or_init(|| Regex::new(r"\[[^\]]*\]\(([^)]*)\)").expect("valid pattern"));
    re.captures(cell)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
