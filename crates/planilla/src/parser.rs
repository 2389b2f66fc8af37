use std::collections::HashSet;
use std::sync::LazyLock;

use crate::types::{Institution, SessionTokens};

use scraper::{ElementRef, Html, Selector};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Missing element: {0}")]
    MissingElement(String),
}

pub(crate) const VIEWSTATE_ID: &str = "__VIEWSTATE";
pub(crate) const VIEWSTATE_GENERATOR_ID: &str = "__VIEWSTATEGENERATOR";
pub(crate) const EVENT_VALIDATION_ID: &str = "__EVENTVALIDATION";

const INSTITUTION_PLACEHOLDER: &str = "-- Seleccione una institución --";

static VIEWSTATE_INPUT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("input#__VIEWSTATE").expect("invalid selector: viewstate")
});
static VIEWSTATE_GENERATOR_INPUT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("input#__VIEWSTATEGENERATOR").expect("invalid selector: viewstate generator")
});
static EVENT_VALIDATION_INPUT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("input#__EVENTVALIDATION").expect("invalid selector: event validation")
});
static INSTITUTION_OPTIONS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("select#MainContent_ddlInstituciones option")
        .expect("invalid selector: institution options")
});
static INSTITUTION_DROPDOWN: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("select#MainContent_ddlInstituciones")
        .expect("invalid selector: institution dropdown")
});
static RESULTS_TABLE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("table#MainContent_gvResultado").expect("invalid selector: results table")
});
static TH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").expect("invalid selector: th"));
static TD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").expect("invalid selector: td"));
static BODY_ROWS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tbody > tr").expect("invalid selector: body rows"));

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hidden_input(document: &Html, selector: &Selector, id: &str) -> Result<String, ParseError> {
    document
        .select(selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string)
        .ok_or_else(|| ParseError::MissingField(id.to_string()))
}

/// Read the view-state tokens that must be echoed back on the next postback.
pub fn extract_tokens(document: &Html) -> Result<SessionTokens, ParseError> {
    Ok(SessionTokens {
        viewstate: hidden_input(document, &VIEWSTATE_INPUT, VIEWSTATE_ID)?,
        viewstate_generator: hidden_input(
            document,
            &VIEWSTATE_GENERATOR_INPUT,
            VIEWSTATE_GENERATOR_ID,
        )?,
        event_validation: hidden_input(document, &EVENT_VALIDATION_INPUT, EVENT_VALIDATION_ID)?,
    })
}

fn is_placeholder(value: &str) -> bool {
    value == INSTITUTION_PLACEHOLDER || (value.starts_with("--") && value.ends_with("--"))
}

pub fn parse_institutions(document: &Html) -> Vec<Institution> {
    if document.select(&INSTITUTION_DROPDOWN).next().is_none() {
        log::error!("Institution dropdown not found on the landing page");
        return Vec::new();
    }

    let mut seen = HashSet::new();
    document
        .select(&INSTITUTION_OPTIONS)
        .filter_map(|option| option.value().attr("value"))
        .filter(|value| !value.trim().is_empty() && !is_placeholder(value.trim()))
        .filter(|value| seen.insert(value.to_string()))
        .map(Institution::new)
        .collect()
}

/// Rows of the results grid as header/cell pairs.
///
/// Rows whose cell count differs from the header count are dropped; this
/// also skips the header row itself, which has no `td` cells.
pub fn parse_results_table(document: &Html) -> Result<Vec<Vec<(String, String)>>, ParseError> {
    let table = document
        .select(&RESULTS_TABLE)
        .next()
        .ok_or_else(|| ParseError::MissingElement("results table".to_string()))?;

    let headers: Vec<String> = table
        .select(&TH)
        .map(|th| normalize_whitespace(&elem_text(th)))
        .collect();

    let rows = table
        .select(&BODY_ROWS)
        .filter_map(|tr| {
            let cells: Vec<String> = tr
                .select(&TD)
                .map(|td| normalize_whitespace(&elem_text(td)))
                .collect();
            (!cells.is_empty() && cells.len() == headers.len())
                .then(|| headers.iter().cloned().zip(cells).collect())
        })
        .collect();

    Ok(rows)
}
