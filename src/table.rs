//! Flat delimited tables
//!
//! Columns are kept in file order and every cell stays a string, so columns
//! the pipeline does not know about pass through untouched.

use std::io;
use std::path::Path;

use crate::error::{LlmsimError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self { headers, rows: Vec::new() }
    }

    /// Read a comma-delimited file with a header row
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        let reader = csv::Reader::from_path(path)?;
        Self::from_reader(reader)
    }

    pub fn from_reader<R: io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut table = Table::new(headers);
        for record in reader.records() {
            let record = record?;
            table.push_row(record.iter().map(str::to_string).collect())?;
        }
        Ok(table)
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = csv::Writer::from_path(path)?;
        self.to_writer(writer)
    }

    pub fn to_writer<W: io::Write>(&self, mut writer: csv::Writer<W>) -> Result<()> {
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<()> {
        if row.len() != self.headers.len() {
            return Err(LlmsimError::Config(format!(
                "row has {} fields, table has {} columns",
                row.len(),
                self.headers.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Index of a column, or `MissingColumn`
    pub fn column(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| LlmsimError::MissingColumn(name.to_string()))
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        &self.rows[row][column]
    }

    pub fn set_cell(&mut self, row: usize, column: usize, value: impl Into<String>) {
        self.rows[row][column] = value.into();
    }

    /// Append a column filled with empty cells; an existing column is reused
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.headers.iter().position(|h| h == name) {
            return idx;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.headers.len() - 1
    }

    /// Set every cell of a column to the same value
    pub fn fill_column(&mut self, name: &str, value: &str) {
        let idx = self.ensure_column(name);
        for row in &mut self.rows {
            row[idx] = value.to_string();
        }
    }

    /// Remove columns by name; unknown names are ignored
    pub fn drop_columns(&mut self, names: &[String]) {
        let keep: Vec<usize> = (0..self.headers.len())
            .filter(|&i| !names.contains(&self.headers[i]))
            .collect();
        self.headers = keep.iter().map(|&i| self.headers[i].clone()).collect();
        for row in &mut self.rows {
            *row = keep.iter().map(|&i| row[i].clone()).collect();
        }
    }

    /// Keep rows whose value in `column` satisfies the predicate
    pub fn retain_rows<F>(&mut self, column: usize, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.rows.retain(|row| keep(&row[column]));
    }

    /// Drop rows with any empty cell
    pub fn drop_incomplete(&mut self) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| row.iter().all(|cell| !cell.trim().is_empty()));
        before - self.rows.len()
    }
}
