use crate::common::{KioskError, Result};
use crate::core::identity::Identity;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const HEADER: &str = "date,time,name,id,emotion";

/// Prefix that keeps spreadsheet tools from reading ids as numbers.
const TEXT_MARKER: char = '\'';

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub date: String,
    pub time: String,
    pub name: String,
    pub external_id: String,
    pub emotion: String,
}

impl AttendanceRecord {
    pub fn new(identity: &Identity, emotion: &str, now: NaiveDateTime) -> Self {
        Self {
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S").to_string(),
            name: identity.name.clone(),
            external_id: identity.external_id.clone(),
            emotion: emotion.to_string(),
        }
    }

    fn to_csv_row(&self) -> String {
        [
            escape(&self.date),
            escape(&self.time),
            escape(&self.name),
            escape(&format!("{}{}", TEXT_MARKER, self.external_id)),
            escape(&self.emotion),
        ]
        .join(",")
    }

    fn from_fields(fields: Vec<String>) -> Option<Self> {
        let [date, time, name, id, emotion]: [String; 5] = fields.try_into().ok()?;
        let external_id = id.strip_prefix(TEXT_MARKER).unwrap_or(&id).to_string();
        Some(Self { date, time, name, external_id, emotion })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Written(AttendanceRecord),
    /// The identity was the last one logged; nothing was written.
    Duplicate,
}

/// Append-only attendance table persisted as CSV.
pub struct AttendanceLedger {
    path: PathBuf,
    records: Vec<AttendanceRecord>,
    last_logged: Option<Identity>,
}

impl AttendanceLedger {
    /// Load the ledger at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let records = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            parse_table(&contents, &path)
        } else {
            Vec::new()
        };

        tracing::info!("Loaded {} attendance records from {}", records.len(), path.display());
        Ok(Self { path, records, last_logged: None })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Log attendance for `identity` unless it is the identity logged last.
    ///
    /// On a storage failure the row stays in memory and is written out with
    /// the next successful record; the error is still returned.
    pub fn record(&mut self, identity: &Identity, emotion: &str, now: NaiveDateTime) -> Result<RecordOutcome> {
        if self.last_logged.as_ref() == Some(identity) {
            tracing::debug!("Ignoring repeated attendance for {}", identity);
            return Ok(RecordOutcome::Duplicate);
        }

        let record = AttendanceRecord::new(identity, emotion, now);
        self.records.push(record.clone());
        self.last_logged = Some(identity.clone());

        self.persist()?;
        tracing::info!("{} marked present with emotion {}", record.name, record.emotion);
        Ok(RecordOutcome::Written(record))
    }

    /// Count of records per emotion label, sorted by label.
    pub fn emotion_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.emotion.clone()).or_insert(0) += 1;
        }
        counts
    }

    fn persist(&self) -> Result<()> {
        let mut contents = String::with_capacity(64 * (self.records.len() + 1));
        contents.push_str(HEADER);
        contents.push('\n');
        for record in &self.records {
            contents.push_str(&record.to_csv_row());
            contents.push('\n');
        }

        let tmp = self.path.with_extension("csv.tmp");
        fs::write(&tmp, contents)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| KioskError::Ledger(format!(
                "Failed to write {}: {}", self.path.display(), e
            )))
    }
}

fn parse_table(contents: &str, path: &Path) -> Vec<AttendanceRecord> {
    let mut records = Vec::new();
    for (index, (line_no, fields)) in split_rows(contents).into_iter().enumerate() {
        if index == 0 && fields.join(",") == HEADER {
            continue;
        }
        match AttendanceRecord::from_fields(fields) {
            Some(record) => records.push(record),
            None => tracing::warn!("Skipping malformed row at line {} in {}", line_no, path.display()),
        }
    }
    records
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split CSV text into rows of fields, tagged with the line each row starts on.
///
/// Line breaks inside a quoted field belong to the field. Blank lines yield no row.
fn split_rows(contents: &str) -> Vec<(usize, Vec<String>)> {
    let mut rows = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut line = 1;
    let mut row_start = 1;
    let mut chars = contents.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if current.is_empty() => {
                in_quotes = true;
                quoted = true;
            }
            (',', false) => fields.push(std::mem::take(&mut current)),
            ('\r', false) if chars.peek() == Some(&'\n') => {}
            ('\n', false) => {
                fields.push(std::mem::take(&mut current));
                if quoted || fields.len() > 1 || !fields[0].trim().is_empty() {
                    rows.push((row_start, std::mem::take(&mut fields)));
                } else {
                    fields.clear();
                }
                quoted = false;
                line += 1;
                row_start = line;
            }
            _ => {
                if c == '\n' {
                    line += 1;
                }
                current.push(c);
            }
        }
    }
    if quoted || !fields.is_empty() || !current.trim().is_empty() {
        fields.push(current);
        rows.push((row_start, fields));
    }
    rows
}
