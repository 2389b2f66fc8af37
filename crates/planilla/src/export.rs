use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use chrono::Datelike;
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook, XlsxError};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::normalize::{Value, normalize_record};
use crate::types::{INSTITUTION_COLUMN, PayrollRecord};

const SHEET_NAME: &str = "Planilla";
const DATE_CELL_FORMAT: &str = "yyyy-mm-dd";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Failed to write export: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize records: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to build workbook: {0}")]
    Xlsx(#[from] XlsxError),
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid export format '{0}'. Accepted values: 'csv', 'json', 'xlsx'")]
pub struct FormatParseError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Xlsx,
}

impl ExportFormat {
    /// `.json` selects JSON, `.xlsx` a workbook, anything else CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ExportFormat::Json,
            Some(ext) if ext.eq_ignore_ascii_case("xlsx") => ExportFormat::Xlsx,
            _ => ExportFormat::Csv,
        }
    }
}

impl FromStr for ExportFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "xlsx" => Ok(ExportFormat::Xlsx),
            _ => Err(FormatParseError(s.to_string())),
        }
    }
}

/// Union of all record columns in first-seen order, `INSTITUCION` last.
pub fn columns(records: &[PayrollRecord]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for column in records.iter().flat_map(|r| r.columns()) {
        if column != INSTITUTION_COLUMN && !columns.iter().any(|c| c == column) {
            columns.push(column.to_string());
        }
    }
    columns.push(INSTITUTION_COLUMN.to_string());
    columns
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(w: &mut W, row: &[String]) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            w.write_all(b",")?;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            w.write_all(cell.as_bytes())?;
        }
    }
    w.write_all(b"\r\n")
}

pub fn write_csv<W: Write>(mut w: W, records: &[PayrollRecord]) -> Result<usize, ExportError> {
    let columns = columns(records);
    write_row(&mut w, &columns)?;

    for record in records {
        let values = normalize_record(record);
        let row: Vec<String> = columns
            .iter()
            .map(|column| {
                values
                    .iter()
                    .find(|(header, _)| header == column)
                    .map(|(_, value)| value.to_cell())
                    .unwrap_or_default()
            })
            .collect();
        write_row(&mut w, &row)?;
    }

    w.flush()?;
    Ok(records.len())
}

/// A normalized record as a JSON object, keys in column order.
struct JsonRow(Vec<(String, Value)>);

impl Serialize for JsonRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (header, value) in &self.0 {
            map.serialize_entry(header, value)?;
        }
        map.end()
    }
}

pub fn write_json<W: Write>(mut w: W, records: &[PayrollRecord]) -> Result<usize, ExportError> {
    let rows: Vec<JsonRow> = records
        .iter()
        .map(|record| JsonRow(normalize_record(record)))
        .collect();

    serde_json::to_writer_pretty(&mut w, &rows)?;
    w.flush()?;
    Ok(records.len())
}

fn cell_index<T: TryFrom<usize>>(index: usize) -> Result<T, XlsxError> {
    T::try_from(index).map_err(|_| XlsxError::RowColumnLimitError)
}

/// Single-sheet workbook: header row, then one row per record. Currency
/// cells are numbers, start dates are date cells, missing values stay blank.
pub fn write_xlsx<W: Write>(mut w: W, records: &[PayrollRecord]) -> Result<usize, ExportError> {
    let columns = columns(records);
    let date_format = Format::new().set_num_format(DATE_CELL_FORMAT);
    let header_format = Format::new().set_bold();

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    for (col, column) in columns.iter().enumerate() {
        sheet.write_string_with_format(0, cell_index(col)?, column, &header_format)?;
    }

    for (i, record) in records.iter().enumerate() {
        let row: u32 = cell_index(i + 1)?;
        let values = normalize_record(record);
        for (col, column) in columns.iter().enumerate() {
            let col: u16 = cell_index(col)?;
            let Some((_, value)) = values.iter().find(|(header, _)| header == column) else {
                continue;
            };
            match value {
                Value::Text(text) => {
                    sheet.write_string(row, col, text)?;
                }
                Value::Number(Some(n)) => {
                    sheet.write_number(row, col, *n)?;
                }
                Value::Date(Some(date)) => {
                    // Dates outside Excel's range stay blank.
                    let Some(date) = u16::try_from(date.year()).ok().and_then(|year| {
                        ExcelDateTime::from_ymd(year, date.month() as u8, date.day() as u8).ok()
                    }) else {
                        continue;
                    };
                    sheet.write_datetime_with_format(row, col, &date, &date_format)?;
                }
                Value::Number(None) | Value::Date(None) => {}
            }
        }
    }

    w.write_all(&workbook.save_to_buffer()?)?;
    w.flush()?;
    Ok(records.len())
}

/// Write `records` to `path` and return the number of rows written.
pub fn export(
    records: &[PayrollRecord],
    path: &Path,
    format: ExportFormat,
) -> Result<usize, ExportError> {
    let writer = BufWriter::new(File::create(path)?);
    let written = match format {
        ExportFormat::Csv => write_csv(writer, records)?,
        ExportFormat::Json => write_json(writer, records)?,
        ExportFormat::Xlsx => write_xlsx(writer, records)?,
    };
    log::info!("Exported {} record(s) to {}", written, path.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Institution;

    fn record(institution: &str, fields: &[(&str, &str)]) -> PayrollRecord {
        PayrollRecord::new(
            Institution::new(institution),
            fields
                .iter()
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn sample() -> Vec<PayrollRecord> {
        vec![
            record(
                "MIN_SALUD",
                &[
                    ("Nombre", "Ana"),
                    ("Cargo", "Médica, General"),
                    ("Salario", "$1,234.50"),
                    ("Fecha de Inicio", "15/03/2021"),
                ],
            ),
            record(
                "MIN_EDUCACION",
                &[
                    ("Nombre", "Luis \"Lucho\""),
                    ("Salario", "sin dato"),
                    ("Gasto", "$100.00"),
                ],
            ),
        ]
    }

    #[test]
    fn test_columns_union_in_first_seen_order() {
        assert_eq!(
            columns(&sample()),
            vec![
                "Nombre",
                "Cargo",
                "Salario",
                "Fecha de Inicio",
                "Gasto",
                "INSTITUCION"
            ]
        );
        assert_eq!(columns(&[]), vec!["INSTITUCION"]);
    }

    #[test]
    fn test_write_csv() {
        let mut out = Vec::new();
        let written = write_csv(&mut out, &sample()).expect("Failed to write csv");
        let text = String::from_utf8(out).unwrap();

        assert_eq!(written, 2);
        let lines: Vec<&str> = text.split("\r\n").collect();
        assert_eq!(lines[0], "Nombre,Cargo,Salario,Fecha de Inicio,Gasto,INSTITUCION");
        assert_eq!(lines[1], "Ana,\"Médica, General\",1234.5,2021-03-15,,MIN_SALUD");
        assert_eq!(lines[2], "\"Luis \"\"Lucho\"\"\",,,,100,MIN_EDUCACION");
        assert_eq!(lines[3], "");
    }

    #[test]
    fn test_write_csv_empty_has_header_only() {
        let mut out = Vec::new();
        let written = write_csv(&mut out, &[]).expect("Failed to write csv");

        assert_eq!(written, 0);
        assert_eq!(String::from_utf8(out).unwrap(), "INSTITUCION\r\n");
    }

    #[test]
    fn test_write_json() {
        let mut out = Vec::new();
        write_json(&mut out, &sample()).expect("Failed to write json");
        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(parsed[0]["Salario"], serde_json::json!(1234.5));
        assert_eq!(parsed[0]["Fecha de Inicio"], serde_json::json!("2021-03-15"));
        assert_eq!(parsed[0]["INSTITUCION"], serde_json::json!("MIN_SALUD"));
        assert_eq!(parsed[1]["Salario"], serde_json::Value::Null);
        assert_eq!(parsed[1]["Gasto"], serde_json::json!(100.0));
    }

    #[test]
    fn test_write_json_keeps_column_order() {
        let records = vec![record(
            "MIN",
            &[("Nombre", "Ana"), ("Cargo", "Jefa"), ("Salario", "$10.00")],
        )];
        let mut out = Vec::new();
        write_json(&mut out, &records).expect("Failed to write json");
        let text = String::from_utf8(out).unwrap();

        let keys: Vec<usize> = ["\"Nombre\"", "\"Cargo\"", "\"Salario\"", "\"INSTITUCION\""]
            .iter()
            .map(|key| text.find(key).expect("key missing"))
            .collect();
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]), "{}", text);

        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["Salario"], serde_json::json!(10.0));
    }

    #[test]
    fn test_write_json_empty_is_empty_array() {
        let mut out = Vec::new();
        let written = write_json(&mut out, &[]).expect("Failed to write json");

        assert_eq!(written, 0);
        assert_eq!(String::from_utf8(out).unwrap(), "[]");
    }

    #[test]
    fn test_write_xlsx() {
        let mut out = Vec::new();
        let written = write_xlsx(&mut out, &sample()).expect("Failed to write xlsx");

        assert_eq!(written, 2);
        assert!(out.starts_with(b"PK"), "not a zip container");
    }

    #[test]
    fn test_write_xlsx_empty_has_header_only() {
        let mut out = Vec::new();
        let written = write_xlsx(&mut out, &[]).expect("Failed to write xlsx");

        assert_eq!(written, 0);
        assert!(out.starts_with(b"PK"));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ExportFormat::from_path(Path::new("planilla.JSON")),
            ExportFormat::Json
        );
        assert_eq!(
            ExportFormat::from_path(Path::new("planilla.csv")),
            ExportFormat::Csv
        );
        assert_eq!(ExportFormat::from_path(Path::new("planilla")), ExportFormat::Csv);
        assert_eq!(
            ExportFormat::from_path(Path::new("planilla.xlsx")),
            ExportFormat::Xlsx
        );
        assert_eq!("XLSX".parse::<ExportFormat>().unwrap(), ExportFormat::Xlsx);
        assert!("xls".parse::<ExportFormat>().is_err());
    }
}
