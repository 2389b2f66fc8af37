use std::fmt::Display;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Column injected into every record to identify where it came from.
pub const INSTITUTION_COLUMN: &str = "INSTITUCION";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Institution(String);

impl Institution {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Institution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Institution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Anti-forgery tokens of one rendered form page. They are valid for a
/// single postback, so every search fetches a fresh set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub viewstate: String,
    pub viewstate_generator: String,
    pub event_validation: String,
}

/// One row of the results table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayrollRecord {
    pub institution: Institution,
    /// Header/cell pairs in table column order.
    pub fields: Vec<(String, String)>,
}

impl PayrollRecord {
    pub fn new(institution: Institution, fields: Vec<(String, String)>) -> Self {
        Self {
            institution,
            fields,
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        if column == INSTITUTION_COLUMN {
            return Some(self.institution.as_str());
        }
        self.fields
            .iter()
            .find(|(header, _)| header == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(header, _)| header.as_str())
    }
}

impl Serialize for PayrollRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        for (header, value) in &self.fields {
            map.serialize_entry(header, value)?;
        }
        map.serialize_entry(INSTITUTION_COLUMN, &self.institution)?;
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeStage {
    Refresh,
    Extract,
    Submit,
    Parse,
}

impl Display for ScrapeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeStage::Refresh => write!(f, "refresh"),
            ScrapeStage::Extract => write!(f, "extract"),
            ScrapeStage::Submit => write!(f, "submit"),
            ScrapeStage::Parse => write!(f, "parse"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstitutionFailure {
    pub institution: Institution,
    pub stage: Option<ScrapeStage>,
    pub message: String,
}

impl Display for InstitutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{} ({}): {}", self.institution, stage, self.message),
            None => write!(f, "{}: {}", self.institution, self.message),
        }
    }
}

/// Outcome of one full run across all institutions.
#[derive(Debug, Clone, Default)]
pub struct HarvestReport {
    pub institutions: usize,
    /// Records in task completion order.
    pub records: Vec<PayrollRecord>,
    pub failures: Vec<InstitutionFailure>,
}

impl HarvestReport {
    pub fn succeeded(&self) -> usize {
        self.institutions.saturating_sub(self.failures.len())
    }
}

impl Display for HarvestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nHarvest summary:")?;
        writeln!(f, "  Institutions:  {}", self.institutions)?;
        writeln!(f, "  Succeeded:     {}", self.succeeded())?;
        writeln!(f, "  Failed:        {}", self.failures.len())?;
        writeln!(f, "  Records:       {}", self.records.len())?;
        for failure in &self.failures {
            writeln!(f, "  - no data for {}", failure)?;
        }
        Ok(())
    }
}
