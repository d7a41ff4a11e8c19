//! In-memory model of the shared schedule table.
//!
//! Parsing never fails: lines that do not carry a management marker, or carry one but
//! cannot be decoded, are kept verbatim and written back unchanged.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Suffix of the trailing comment that tags a line as ours.
pub const MARKER_SUFFIX: &str = " - managed by control-panel";

/// `<5 cron fields> <command> # <name> - managed by control-panel`
static MANAGED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+\s+\S+\s+\S+\s+\S+\s+\S+)\s+(.+?)\s+# (.+) - managed by control-panel$")
        .expect("Invalid regex pattern for managed schedule lines")
});

/// The comment identifying the entry called `name`.
pub fn marker(name: &str) -> String {
    format!("# {name}{MARKER_SUFFIX}")
}

/// A decoded managed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub name: String,
    /// Five whitespace-separated fields, normalized to single spaces.
    pub cron_expression: String,
    pub command: String,
}

impl TableEntry {
    fn parse(line: &str) -> Option<Self> {
        let caps = MANAGED_LINE.captures(line.trim_end())?;
        Some(Self {
            cron_expression: normalize_cron(&caps[1]),
            command: caps[2].to_string(),
            name: caps[3].to_string(),
        })
    }
}

impl fmt::Display for TableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.cron_expression,
            self.command,
            marker(&self.name)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TableLine {
    Managed(TableEntry),
    Other(String),
}

impl TableLine {
    fn carries_marker(&self, name: &str, marker: &str) -> bool {
        match self {
            TableLine::Managed(entry) => entry.name == name,
            TableLine::Other(raw) => raw.trim_end().ends_with(marker),
        }
    }
}

/// Ordered lines of a schedule table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CronTable {
    lines: Vec<TableLine>,
}

impl CronTable {
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(|line| match TableEntry::parse(line) {
                Some(entry) => TableLine::Managed(entry),
                None => TableLine::Other(line.to_string()),
            })
            .collect();
        Self { lines }
    }

    /// Managed entries in table order.
    pub fn entries(&self) -> impl Iterator<Item = &TableEntry> {
        self.lines.iter().filter_map(|line| match line {
            TableLine::Managed(entry) => Some(entry),
            TableLine::Other(_) => None,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        let marker = marker(name);
        self.lines.iter().any(|l| l.carries_marker(name, &marker))
    }

    /// Drop every line carrying the marker for `name`. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let marker = marker(name);
        let before = self.lines.len();
        self.lines.retain(|l| !l.carries_marker(name, &marker));
        before - self.lines.len()
    }

    /// Replace any entry with the same name and append `entry` at the end.
    pub fn upsert(&mut self, entry: TableEntry) {
        self.remove(&entry.name);
        self.lines.push(TableLine::Managed(entry));
    }

    /// Text form of the table. Non-empty tables end with a newline.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                TableLine::Managed(entry) => out.push_str(&entry.to_string()),
                TableLine::Other(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        out
    }
}

/// Collapse whitespace between cron fields.
pub fn normalize_cron(expression: &str) -> String {
    expression.split_whitespace().collect::<Vec<_>>().join(" ")
}
