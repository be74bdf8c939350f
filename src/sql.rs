// Generated statements
//
// Reconcilers build their writes as text + positional parameters so that the
// exact statement can be previewed in dry-run mode and traced in debug mode.

use rusqlite::types::Value;
use std::fmt;

/// A write statement with positional (`?`) parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)?;
        if self.params.is_empty() {
            return Ok(());
        }
        write!(f, " [")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match param {
                Value::Null => write!(f, "{}:(null)", i + 1)?,
                Value::Integer(n) => write!(f, "{}:{}", i + 1, n)?,
                Value::Real(r) => write!(f, "{}:{}", i + 1, r)?,
                Value::Text(s) => write!(f, "{}:{}", i + 1, s)?,
                Value::Blob(b) => write!(f, "{}:<{} bytes>", i + 1, b.len())?,
            }
        }
        write!(f, "]")
    }
}

/// Modification stamp written with every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub modified_at: String,
    pub modified_by: String,
}

/// Value of the `locked_by` column for corrections made by people.
pub const LOCKED_BY: &str = "individual";

impl Stamp {
    pub fn now(modified_by: impl Into<String>) -> Self {
        Self {
            modified_at: chrono::Utc::now().to_rfc3339(),
            modified_by: modified_by.into(),
        }
    }
}

/// `UPDATE table SET ... WHERE key = ?` over only the columns that were set.
#[derive(Debug, Clone)]
pub struct Update {
    table: &'static str,
    assignments: Vec<&'static str>,
    params: Vec<Value>,
}

impl Update {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            assignments: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn set(&mut self, column: &'static str, value: Value) -> &mut Self {
        self.assignments.push(column);
        self.params.push(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Append the modification stamp columns and the key predicate.
    pub fn finish(mut self, stamp: &Stamp, key_column: &str, key: Value) -> Statement {
        self.set("last_modified", Value::Text(stamp.modified_at.clone()));
        self.set("last_modified_by", Value::Text(stamp.modified_by.clone()));
        self.set("locked_by", Value::Text(LOCKED_BY.to_string()));

        let columns = self
            .assignments
            .iter()
            .map(|c| format!("{} = ?", quote(c)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut params = self.params;
        params.push(key);

        Statement::new(
            format!("update {} set {} where {} = ?", self.table, columns, key_column),
            params,
        )
    }
}

/// One column whose persisted value differs from the requested one.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub column: &'static str,
    pub before: String,
    pub after: String,
    pub value: Value,
}

impl FieldChange {
    pub fn text(column: &'static str, before: &str, after: &str) -> Self {
        Self {
            column,
            before: before.to_string(),
            after: after.to_string(),
            value: text(after),
        }
    }
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.column, self.before, self.after)
    }
}

/// Columns of `changes` joined for a log line.
pub fn describe(changes: &[FieldChange]) -> String {
    changes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

impl Update {
    /// Start an update setting every changed column.
    pub fn with_changes(table: &'static str, changes: &[FieldChange]) -> Self {
        let mut update = Update::new(table);
        for change in changes {
            update.set(change.column, change.value.clone());
        }
        update
    }
}

/// `start` and `end` are keywords in SQL and need quoting as column names.
fn quote(column: &str) -> String {
    match column {
        "start" | "end" => format!("\"{}\"", column),
        _ => column.to_string(),
    }
}

pub fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

/// Empty strings become NULL.
pub fn text_or_null(value: &str) -> Value {
    if value.is_empty() {
        Value::Null
    } else {
        Value::Text(value.to_string())
    }
}

pub fn date(value: chrono::NaiveDate) -> Value {
    Value::Text(value.format("%Y-%m-%d").to_string())
}
