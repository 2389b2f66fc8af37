//! Column typing for export: currency columns become numbers, the start
//! date becomes a calendar date. Values that do not parse are kept as
//! explicit missing values rather than failing the export.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::types::{INSTITUTION_COLUMN, PayrollRecord};

pub const SALARY_COLUMN: &str = "Salario";
pub const EXPENSE_COLUMN: &str = "Gasto";
pub const START_DATE_COLUMN: &str = "Fecha de Inicio";

const DATE_FORMAT: &str = "%d/%m/%Y";

static RE_CURRENCY_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\$,\s]").expect("invalid regex: currency noise"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Currency,
    Date,
}

impl ColumnKind {
    pub fn of(column: &str) -> Self {
        match column {
            SALARY_COLUMN | EXPENSE_COLUMN => ColumnKind::Currency,
            START_DATE_COLUMN => ColumnKind::Date,
            _ => ColumnKind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(Option<f64>),
    Date(Option<NaiveDate>),
}

impl Value {
    pub fn parse(kind: ColumnKind, raw: &str) -> Self {
        match kind {
            ColumnKind::Text => Value::Text(raw.to_string()),
            ColumnKind::Currency => Value::Number(parse_currency(raw)),
            ColumnKind::Date => Value::Date(parse_date(raw)),
        }
    }

    /// Cell text for delimited output; missing values render empty.
    pub fn to_cell(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Number(Some(n)) => n.to_string(),
            Value::Date(Some(d)) => d.format("%Y-%m-%d").to_string(),
            Value::Number(None) | Value::Date(None) => String::new(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Text(s) => serializer.serialize_str(s),
            Value::Number(n) => n.serialize(serializer),
            Value::Date(d) => d.serialize(serializer),
        }
    }
}

/// `"$1,234.50"` -> `Some(1234.5)`.
pub fn parse_currency(raw: &str) -> Option<f64> {
    let cleaned = RE_CURRENCY_NOISE.replace_all(raw, "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Day/month/year, e.g. `"15/03/2021"`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

/// Typed cells of a record in column order, `INSTITUCION` last.
pub fn normalize_record(record: &PayrollRecord) -> Vec<(String, Value)> {
    record
        .fields
        .iter()
        .map(|(header, raw)| (header.clone(), Value::parse(ColumnKind::of(header), raw)))
        .chain(std::iter::once((
            INSTITUTION_COLUMN.to_string(),
            Value::Text(record.institution.to_string()),
        )))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Institution;

    #[test]
    fn test_parse_currency() {
        assert_eq!(parse_currency("$1,234.50"), Some(1234.50));
        assert_eq!(parse_currency("  $ 850.00 "), Some(850.0));
        assert_eq!(parse_currency("1,000,000"), Some(1_000_000.0));
        assert_eq!(parse_currency(""), None);
        assert_eq!(parse_currency("$"), None);
        assert_eq!(parse_currency("N/A"), None);
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("15/03/2021"),
            Some(NaiveDate::from_ymd_opt(2021, 3, 15).unwrap())
        );
        assert_eq!(parse_date("2021-03-15"), None);
        assert_eq!(parse_date("31/02/2021"), None);
        assert_eq!(parse_date("sin fecha"), None);
    }

    #[test]
    fn test_column_kinds() {
        assert_eq!(ColumnKind::of("Salario"), ColumnKind::Currency);
        assert_eq!(ColumnKind::of("Gasto"), ColumnKind::Currency);
        assert_eq!(ColumnKind::of("Fecha de Inicio"), ColumnKind::Date);
        assert_eq!(ColumnKind::of("Cargo"), ColumnKind::Text);
    }

    #[test]
    fn test_normalize_record() {
        let record = PayrollRecord::new(
            Institution::new("MIN_SALUD"),
            vec![
                ("Nombre".to_string(), "Ana".to_string()),
                ("Salario".to_string(), "$1,234.50".to_string()),
                ("Gasto".to_string(), "".to_string()),
                ("Fecha de Inicio".to_string(), "no disponible".to_string()),
            ],
        );

        let values = normalize_record(&record);
        assert_eq!(
            values,
            vec![
                ("Nombre".to_string(), Value::Text("Ana".to_string())),
                ("Salario".to_string(), Value::Number(Some(1234.5))),
                ("Gasto".to_string(), Value::Number(None)),
                ("Fecha de Inicio".to_string(), Value::Date(None)),
                (
                    "INSTITUCION".to_string(),
                    Value::Text("MIN_SALUD".to_string())
                ),
            ]
        );
    }

    #[test]
    fn test_value_rendering() {
        let date = Value::Date(NaiveDate::from_ymd_opt(2019, 2, 1));
        assert_eq!(date.to_cell(), "2019-02-01");
        assert_eq!(Value::Number(Some(1234.5)).to_cell(), "1234.5");
        assert_eq!(Value::Number(None).to_cell(), "");

        let json = serde_json::to_string(&vec![date, Value::Number(None)]).unwrap();
        assert_eq!(json, r#"["2019-02-01",null]"#);
    }
}
