//! Delimited text in and out: CSV/TSV/pasted spreadsheet cells for import,
//! RFC 4180-style CSV for export.

use serde::{Deserialize, Serialize};

use crate::{
    CrmError, CrmResult,
    columns::{ColumnMapping, auto_map_columns},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    Comma,
    Tab,
}

impl Delimiter {
    /// Tab wins whenever the first line has one; pasted spreadsheet cells are
    /// tab separated.
    pub fn detect(text: &str) -> Self {
        let first_line = text.lines().next().unwrap_or_default();
        if first_line.contains('\t') {
            Delimiter::Tab
        } else {
            Delimiter::Comma
        }
    }

    fn as_char(self) -> char {
        match self {
            Delimiter::Comma => ',',
            Delimiter::Tab => '\t',
        }
    }
}

/// Splits `text` into records. Handles quoted fields with embedded
/// delimiters, doubled quotes and line breaks; skips blank lines.
pub fn parse_records(text: &str, delimiter: Delimiter) -> Vec<Vec<String>> {
    let delimiter = delimiter.as_char();
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.trim_start_matches('\u{feff}').chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            '\r' | '\n' => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                record.push(std::mem::take(&mut field));
                push_record(&mut records, std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        push_record(&mut records, record);
    }
    records
}

fn push_record(records: &mut Vec<Vec<String>>, record: Vec<String>) {
    if record.iter().any(|f| !f.trim().is_empty()) {
        records.push(record);
    }
}

/// Body of `POST /leads/import/parse`.
#[derive(Clone, Debug, Deserialize)]
pub struct ParseRequest {
    pub text: String,
    #[serde(default = "default_has_headers")]
    pub has_headers: bool,
}

fn default_has_headers() -> bool {
    true
}

#[derive(Clone, Debug, Serialize)]
pub struct ParsedTable {
    pub delimiter: Delimiter,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub mapping: Vec<ColumnMapping>,
}

impl ParsedTable {
    /// Rows keyed by mapped field name; unmapped columns are dropped.
    pub fn mapped_rows(&self) -> Vec<Vec<(&'static str, &str)>> {
        self.rows
            .iter()
            .map(|row| {
                self.mapping
                    .iter()
                    .zip(row)
                    .filter_map(|(mapping, value)| mapping.field.map(|f| (f, value.as_str())))
                    .collect()
            })
            .collect()
    }
}

/// Parses import text and suggests a mapping. Without a header row the
/// columns are named `Column 1..n` and left unmapped.
pub fn parse_table(text: &str, has_headers: bool) -> CrmResult<ParsedTable> {
    let delimiter = Delimiter::detect(text);
    let mut records = parse_records(text, delimiter);
    if records.is_empty() {
        return Err(CrmError::invalid("text", "contains no rows"));
    }

    let width = records.iter().map(Vec::len).max().unwrap_or(0);
    let (headers, mapping) = if has_headers {
        let mut headers: Vec<String> = records
            .remove(0)
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();
        headers.resize(width, String::new());
        let mapping = auto_map_columns(&headers);
        (headers, mapping)
    } else {
        let headers: Vec<String> = (1..=width).map(|n| format!("Column {n}")).collect();
        let mapping = headers
            .iter()
            .map(|header| ColumnMapping {
                header: header.clone(),
                field: None,
            })
            .collect();
        (headers, mapping)
    };

    let rows = records
        .into_iter()
        .map(|mut row| {
            row.resize(width, String::new());
            row.into_iter().map(|v| v.trim().to_string()).collect()
        })
        .collect();

    Ok(ParsedTable {
        delimiter,
        headers,
        rows,
        mapping,
    })
}

/// Quotes a field when it contains a comma, quote, CR or LF.
pub fn escape_field(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn write_csv<R, F>(headers: &[&str], rows: R) -> String
where
    R: IntoIterator<Item = Vec<F>>,
    F: AsRef<str>,
{
    let mut out = String::new();
    out.push_str(&headers.iter().map(|h| escape_field(h)).collect::<Vec<_>>().join(","));
    out.push('\n');
    for row in rows {
        let line = row
            .iter()
            .map(|value| escape_field(value.as_ref()))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}
