//! Read-only access to uploaded `.xlsx` workbooks.
//!
//! calamine hands out ranges that start at the first used cell. The parsers
//! address cells by their absolute template position, so every sheet is
//! re-anchored at A1 before it leaves this module.

use calamine::{open_workbook_from_rs, Data, Range, Reader, Xlsx};
use std::io::Cursor;
use std::path::Path;

use crate::error::{ImportError, Result};

/// The only upload format accepted.
pub const XLSX_EXTENSION: &str = "xlsx";

static EMPTY: Data = Data::Empty;

/// Reject uploads that are not `.xlsx` by file name, before touching the bytes.
pub fn ensure_xlsx(file_name: &str) -> Result<()> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some(XLSX_EXTENSION) => Ok(()),
        _ => Err(ImportError::invalid_format(format!(
            "'{}' is not an .xlsx file",
            file_name
        ))),
    }
}

/// A sheet as a dense grid addressed from A1 (row 0, column 0).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    name: String,
    rows: Vec<Vec<Data>>,
    width: usize,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<Data>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        Self {
            name: name.into(),
            rows,
            width,
        }
    }

    /// Build a sheet from a calamine range, padding the cells before the
    /// range start so indices stay absolute.
    fn from_range(name: &str, range: &Range<Data>) -> Self {
        let (start_row, start_col) = match range.start() {
            Some((r, c)) => (r as usize, c as usize),
            None => return Sheet::new(name, Vec::new()),
        };

        let mut rows: Vec<Vec<Data>> = vec![Vec::new(); start_row];
        for row in range.rows() {
            let mut cells = vec![Data::Empty; start_col];
            cells.extend(row.iter().cloned());
            rows.push(cells);
        }

        Sheet::new(name, rows)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns of the widest row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Cell at an absolute position; out-of-bounds cells read as empty.
    pub fn cell(&self, row: usize, col: usize) -> &Data {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    pub fn row(&self, row: usize) -> &[Data] {
        self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// An opened workbook. Sheets are decoded on demand.
pub struct Workbook {
    inner: Xlsx<Cursor<Vec<u8>>>,
    sheet_names: Vec<String>,
}

impl Workbook {
    /// Open workbook bytes. Anything calamine cannot read as xlsx is a
    /// format error, not a server error.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let inner: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
            .map_err(|e| ImportError::invalid_format(format!("unreadable xlsx workbook: {}", e)))?;
        let sheet_names = inner.sheet_names().to_vec();

        Ok(Self { inner, sheet_names })
    }

    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.sheet_names.iter().any(|n| n == name)
    }

    /// The first sheet, whatever its name.
    pub fn first_sheet(&mut self) -> Result<Sheet> {
        let name = self
            .sheet_names
            .first()
            .cloned()
            .ok_or_else(|| ImportError::invalid_format("workbook has no sheets"))?;
        self.read(&name)
    }

    /// A sheet by exact name; `None` when the workbook has no such sheet.
    pub fn sheet(&mut self, name: &str) -> Result<Option<Sheet>> {
        if !self.has_sheet(name) {
            return Ok(None);
        }
        self.read(name).map(Some)
    }

    /// A sheet by exact name that the template requires.
    pub fn required_sheet(&mut self, name: &str) -> Result<Sheet> {
        self.sheet(name)?.ok_or_else(|| {
            ImportError::invalid_format(format!("sheet '{}' not found in workbook", name))
        })
    }

    fn read(&mut self, name: &str) -> Result<Sheet> {
        let range = self.inner.worksheet_range(name)?;
        let sheet = Sheet::from_range(name, &range);
        tracing::debug!(
            sheet = name,
            rows = sheet.height(),
            cols = sheet.width(),
            "decoded sheet"
        );
        Ok(sheet)
    }
}
