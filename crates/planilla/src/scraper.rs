use crate::client::{ClientError, ResilientClient};
use crate::config::{ConfigError, HarvestConfig};
use crate::parser::{
    EVENT_VALIDATION_ID, ParseError, VIEWSTATE_GENERATOR_ID, VIEWSTATE_ID, extract_tokens,
    parse_institutions, parse_results_table,
};
use crate::types::{
    HarvestReport, Institution, InstitutionFailure, PayrollRecord, ScrapeStage, SessionTokens,
};

use futures::{StreamExt, stream};
use reqwest::Client;
use scraper::Html;

pub const INSTITUTION_FIELD: &str = "ctl00$MainContent$ddlInstituciones";
const SEARCH_BUTTON_FIELD: &str = "ctl00$MainContent$btnBuscar";
const SEARCH_BUTTON_LABEL: &str = "Buscar";

#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] ConfigError),
}

/// Failure of one institution's scrape, by the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Refreshing the form page failed: {0}")]
    Refresh(#[source] ClientError),
    #[error("Reading view-state tokens failed: {0}")]
    Extract(#[source] ParseError),
    #[error("Submitting the search failed: {0}")]
    Submit(#[source] ClientError),
    #[error("Reading the results table failed: {0}")]
    Parse(#[source] ParseError),
}

impl ScrapeError {
    pub fn stage(&self) -> ScrapeStage {
        match self {
            ScrapeError::Refresh(_) => ScrapeStage::Refresh,
            ScrapeError::Extract(_) => ScrapeStage::Extract,
            ScrapeError::Submit(_) => ScrapeStage::Submit,
            ScrapeError::Parse(_) => ScrapeStage::Parse,
        }
    }
}

/// Postback payload that searches every employee of one institution.
pub fn search_form(tokens: &SessionTokens, institution: &Institution) -> Vec<(&'static str, String)> {
    vec![
        ("__EVENTTARGET", String::new()),
        ("__EVENTARGUMENT", String::new()),
        ("__LASTFOCUS", String::new()),
        (VIEWSTATE_ID, tokens.viewstate.clone()),
        (VIEWSTATE_GENERATOR_ID, tokens.viewstate_generator.clone()),
        ("__VIEWSTATEENCRYPTED", String::new()),
        (EVENT_VALIDATION_ID, tokens.event_validation.clone()),
        (INSTITUTION_FIELD, institution.to_string()),
        ("ctl00$MainContent$txtNombre", String::new()),
        ("ctl00$MainContent$txtApellido", String::new()),
        ("ctl00$MainContent$txtCargo", String::new()),
        ("ctl00$MainContent$ddlEstado", String::new()),
        (SEARCH_BUTTON_FIELD, SEARCH_BUTTON_LABEL.to_string()),
    ]
}

#[derive(Debug, Clone)]
pub struct Harvester {
    client: ResilientClient,
    url: String,
    workers: usize,
}

impl Harvester {
    pub fn new(config: HarvestConfig) -> Result<Self, ScraperError> {
        let config = config.validate()?;

        let client = Client::builder()
            .cookie_store(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;
        log::debug!(
            "Request timeout {:?}, retry waits {:?}",
            config.timeout,
            config.retry.schedule()
        );

        Ok(Self {
            client: ResilientClient::new(client, config.retry),
            url: config.url,
            workers: config.workers,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn fetch_institutions(&self) -> Result<Vec<Institution>, ClientError> {
        log::info!("Fetching institution list from {}...", self.url);
        let html = self.client.get(&self.url).await?;
        Ok(parse_institutions(&Html::parse_document(&html)))
    }

    /// GET the form for fresh tokens, POST the search, read the grid.
    pub async fn scrape_institution(
        &self,
        institution: &Institution,
    ) -> Result<Vec<PayrollRecord>, ScrapeError> {
        log::info!("Processing: {}", institution);

        let page = self
            .client
            .get(&self.url)
            .await
            .map_err(ScrapeError::Refresh)?;
        let tokens = extract_tokens(&Html::parse_document(&page)).map_err(ScrapeError::Extract)?;

        let form = search_form(&tokens, institution);
        let results = self
            .client
            .post_form(&self.url, &form)
            .await
            .map_err(ScrapeError::Submit)?;
        let rows =
            parse_results_table(&Html::parse_document(&results)).map_err(ScrapeError::Parse)?;

        let records: Vec<PayrollRecord> = rows
            .into_iter()
            .map(|fields| PayrollRecord::new(institution.clone(), fields))
            .collect();
        log::debug!("{}: {} record(s)", institution, records.len());
        Ok(records)
    }

    /// Like [`Harvester::scrape_institution`], but a failure is logged and
    /// yields no records.
    pub async fn scrape_or_empty(&self, institution: &Institution) -> Vec<PayrollRecord> {
        self.scrape_institution(institution)
            .await
            .unwrap_or_else(|e| {
                log::error!("Error in {}: {}", institution, e);
                Vec::new()
            })
    }

    /// Scrape every institution on the landing page, `workers` at a time.
    ///
    /// Only a landing page that cannot be loaded ends the run early; every
    /// other failure is confined to its institution and listed in the
    /// report.
    pub async fn harvest(&self) -> HarvestReport {
        let institutions = match self.fetch_institutions().await {
            Ok(institutions) => institutions,
            Err(e) => {
                log::error!("Failed to load the landing page: {}", e);
                return HarvestReport::default();
            }
        };
        log::info!("Found {} institutions", institutions.len());

        let mut report = HarvestReport {
            institutions: institutions.len(),
            ..Default::default()
        };

        let mut outcomes = stream::iter(institutions)
            .map(|institution| {
                let harvester = self.clone();
                let task_institution = institution.clone();
                async move {
                    let handle = tokio::spawn(async move {
                        harvester.scrape_institution(&task_institution).await
                    });
                    (institution, handle.await)
                }
            })
            .buffer_unordered(self.workers);

        while let Some((institution, outcome)) = outcomes.next().await {
            match outcome {
                Ok(Ok(records)) => report.records.extend(records),
                Ok(Err(e)) => {
                    log::error!("Error in {}: {}", institution, e);
                    report.failures.push(InstitutionFailure {
                        institution,
                        stage: Some(e.stage()),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    log::error!("Scrape task for {} did not finish: {}", institution, e);
                    report.failures.push(InstitutionFailure {
                        institution,
                        stage: None,
                        message: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "Harvested {} record(s) from {} institution(s), {} failed",
            report.records.len(),
            report.institutions,
            report.failures.len()
        );
        report
    }
}
