//! Column-ordered in-memory table used by every transformation stage.
//!
//! Cells are JSON scalars; [`Value::Null`] is the missing value. Column order
//! is significant and preserved by every operation so that serialized output
//! is byte-stable across runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("Column '{0}' not found")]
    MissingColumn(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Borrowed view of a single row with by-name access.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Row<'a> {
    /// Returns the cell for `column`, or `None` if the table has no such column.
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).and_then(cell_text)
    }

    /// Cell at a column index obtained from [`Table::column_index`].
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn get_at(&self, index: usize) -> &'a Value {
        &self.values[index]
    }
}

/// Renders a scalar cell as text; `None` for null.
pub fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Appends a row, padding with nulls or truncating to the column count.
    pub fn push_row(&mut self, mut values: Vec<Value>) {
        values.resize(self.columns.len(), Value::Null);
        self.rows.push(values);
    }

    /// Iterates over one column's cells, or `None` if it doesn't exist.
    pub fn column_values(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Replaces `name` in place if present, otherwise appends it.
    ///
    /// `values` is padded with nulls (or truncated) to the row count.
    pub fn set_column(&mut self, name: &str, mut values: Vec<Value>) {
        values.resize(self.rows.len(), Value::Null);
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
    }

    /// Sets every cell of `name` to the same value.
    pub fn fill_column(&mut self, name: &str, value: Value) {
        let values = vec![value; self.rows.len()];
        self.set_column(name, values);
    }

    /// Computes `target` from `source` cell by cell.
    ///
    /// When `source` is absent the target column is filled with nulls and
    /// `false` is returned.
    pub fn derive_column<F>(&mut self, source: &str, target: &str, f: F) -> bool
    where
        F: Fn(&Value) -> Value,
    {
        match self.column_index(source) {
            Some(idx) => {
                let values = self.rows.iter().map(|row| f(&row[idx])).collect();
                self.set_column(target, values);
                true
            }
            None => {
                self.fill_column(target, Value::Null);
                false
            }
        }
    }

    /// Projects onto `names`, silently skipping columns that don't exist.
    pub fn select(&self, names: &[&str]) -> Table {
        let indices: Vec<(usize, &str)> = names
            .iter()
            .filter_map(|name| self.column_index(name).map(|i| (i, *name)))
            .collect();

        Table {
            columns: indices.iter().map(|(_, n)| n.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|(i, _)| row[*i].clone()).collect())
                .collect(),
        }
    }

    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(Row<'_>) -> bool,
    {
        let columns = &self.columns;
        self.rows.retain(|values| keep(Row { columns, values }));
    }

    /// Removes columns matching `predicate`; returns the removed names.
    pub fn drop_columns_where<F>(&mut self, predicate: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let keep: Vec<bool> = self.columns.iter().map(|c| !predicate(c)).collect();
        let dropped = self
            .columns
            .iter()
            .zip(&keep)
            .filter(|(_, k)| !**k)
            .map(|(c, _)| c.clone())
            .collect();

        self.columns = self
            .columns
            .drain(..)
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(c, _)| c)
            .collect();
        for row in &mut self.rows {
            let mut flags = keep.iter();
            row.retain(|_| *flags.next().unwrap_or(&true));
        }
        dropped
    }

    /// Removes columns whose cells are all null; returns the removed names.
    pub fn drop_null_columns(&mut self) -> Vec<String> {
        let empty: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(i, _)| self.rows.iter().all(|row| row[*i].is_null()))
            .map(|(_, c)| c.clone())
            .collect();
        self.drop_columns_where(|c| empty.iter().any(|e| e == c))
    }

    /// Keeps the first row for each distinct `key` value; returns rows removed.
    ///
    /// Nulls compare equal to each other.
    pub fn dedup_by(&mut self, key: &str) -> Result<usize, TableError> {
        let idx = self
            .column_index(key)
            .ok_or_else(|| TableError::MissingColumn(key.to_string()))?;
        let before = self.rows.len();
        let mut seen = std::collections::HashSet::new();
        self.rows.retain(|row| seen.insert(row[idx].to_string()));
        Ok(before - self.rows.len())
    }

    /// Row count per non-null `key` value.
    pub fn count_by(&self, key: &str) -> Result<HashMap<String, usize>, TableError> {
        let idx = self
            .column_index(key)
            .ok_or_else(|| TableError::MissingColumn(key.to_string()))?;
        let mut counts = HashMap::new();
        for row in &self.rows {
            if let Some(k) = cell_text(&row[idx]) {
                *counts.entry(k).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Left join on `key`.
    ///
    /// Every left row appears exactly once, matched against the first right
    /// row carrying the same non-null key. Right-side columns whose name
    /// already exists on the left are emitted as `name + suffix`.
    pub fn left_join(&self, right: &Table, key: &str, suffix: &str) -> Result<Table, TableError> {
        let left_key = self
            .column_index(key)
            .ok_or_else(|| TableError::MissingColumn(key.to_string()))?;
        let right_key = right
            .column_index(key)
            .ok_or_else(|| TableError::MissingColumn(key.to_string()))?;

        let mut lookup: HashMap<String, usize> = HashMap::new();
        for (i, row) in right.rows.iter().enumerate() {
            if let Some(k) = cell_text(&row[right_key]) {
                lookup.entry(k).or_insert(i);
            }
        }

        let right_cols: Vec<usize> = (0..right.columns.len())
            .filter(|i| *i != right_key)
            .collect();

        let mut columns = self.columns.clone();
        for &i in &right_cols {
            let name = &right.columns[i];
            if self.has_column(name) {
                columns.push(format!("{name}{suffix}"));
            } else {
                columns.push(name.clone());
            }
        }

        let rows = self
            .rows
            .iter()
            .map(|row| {
                let matched = cell_text(&row[left_key])
                    .and_then(|k| lookup.get(&k))
                    .map(|&i| &right.rows[i]);
                let mut out = row.clone();
                for &i in &right_cols {
                    out.push(matched.map_or(Value::Null, |r| r[i].clone()));
                }
                out
            })
            .collect();

        Ok(Table { columns, rows })
    }

    /// Returns a copy with every column renamed through `rename`.
    pub fn rename_columns<F>(&self, rename: F) -> Table
    where
        F: Fn(&str) -> String,
    {
        Table {
            columns: self.columns.iter().map(|c| rename(c)).collect(),
            rows: self.rows.clone(),
        }
    }
}
