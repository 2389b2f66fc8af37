pub mod client;
pub mod config;
pub mod export;
pub mod normalize;
mod parser;
pub mod scraper;
pub mod types;

pub use client::{ClientError, Method, ResilientClient, RetryPolicy};
pub use config::HarvestConfig;
pub use parser::ParseError;
pub use scraper::{Harvester, ScrapeError, ScraperError};

pub(crate) const BASE_URL: &str = "https://www.contraloria.gob.pa/CGR.PLANILLAGOB.UI/Formas/Index";
