// Change rows - one CSV line as an ordered column -> value mapping
//
// Rows are the unit of work handed to a reconciler. Column order follows the
// CSV header so that a row printed in an error message reads like the input.

use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;

/// One input line: `(column, raw value)` pairs in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeRow {
    fields: Vec<(String, String)>,
}

impl ChangeRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing an existing value in place.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    /// Raw value of a column; missing columns read as empty.
    pub fn get(&self, column: &str) -> &str {
        self.fields
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    /// Value with surrounding whitespace removed.
    pub fn trimmed(&self, column: &str) -> &str {
        self.get(column).trim()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ChangeRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = ChangeRow::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl fmt::Display for ChangeRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (column, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {:?}", column, value)?;
        }
        write!(f, "}}")
    }
}

/// Load every data line of a CSV file as a `ChangeRow`, keyed by the header.
pub fn load_rows(csv_path: &Path) -> Result<Vec<ChangeRow>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;

    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read CSV header of {}", csv_path.display()))?
        .clone();

    let mut rows = Vec::new();

    for (line, result) in rdr.records().enumerate() {
        let record = result.with_context(|| {
            format!("Failed to read record {} of {}", line + 1, csv_path.display())
        })?;

        rows.push(headers.iter().zip(record.iter()).collect::<ChangeRow>());
    }

    tracing::debug!(
        path = %csv_path.display(),
        header = ?headers.iter().collect::<Vec<_>>(),
        rows = rows.len(),
        "loaded change rows"
    );

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_column_reads_empty() {
        let row: ChangeRow = [("identity_id", "42"), ("identity_name", "  Jane ")]
            .into_iter()
            .collect();

        assert_eq!(row.get("identity_id"), "42");
        assert_eq!(row.get("identity_email"), "");
        assert_eq!(row.trimmed("identity_name"), "Jane");
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut row = ChangeRow::new();
        row.insert("a", "1");
        row.insert("b", "2");
        row.insert("a", "3");

        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(row.get("a"), "3");
    }

    #[test]
    fn test_display_keeps_header_order() {
        let row: ChangeRow = [("z", "1"), ("a", "x y")].into_iter().collect();
        assert_eq!(row.to_string(), r#"{z: "1", a: "x y"}"#);
    }

    #[test]
    fn test_load_rows_from_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "action,identity_id,identity_name,identity_source").unwrap();
        writeln!(file, "update,42,Jane X,github").unwrap();
        writeln!(file, "update,43,\"Doe, John\",gitlab").unwrap();
        file.flush().unwrap();

        let rows = load_rows(file.path()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("identity_id"), "42");
        assert_eq!(rows[1].get("identity_name"), "Doe, John");
        assert_eq!(rows[1].get("identity_source"), "gitlab");
    }

    #[test]
    fn test_load_rows_missing_file() {
        let err = load_rows(Path::new("/nonexistent/identities.csv")).unwrap_err();
        assert!(err.to_string().contains("Failed to open CSV file"));
    }
}
