//! CSV loading for route metadata and traffic samples.

use anyhow::Result;
use std::fs::File;
use tracing::info;

use crate::registry::Route;
use crate::store::SampleDraft;

/// Reads route records from a CSV file.
pub fn load_routes(path: &str) -> Result<Vec<Route>> {
    let file = File::open(path)?;
    let mut rdr = csv::Reader::from_reader(file);

    let mut routes = Vec::new();
    for result in rdr.deserialize() {
        let record: Route = result?;
        routes.push(record);
    }

    info!(path, count = routes.len(), "Routes loaded");
    Ok(routes)
}

/// Reads sample drafts from a CSV file. Rows are not validated here; the
/// store decides what it accepts.
pub fn load_sample_drafts(path: &str) -> Result<Vec<SampleDraft>> {
    let file = File::open(path)?;
    let mut rdr = csv::Reader::from_reader(file);

    let mut drafts = Vec::new();
    for result in rdr.deserialize() {
        let record: SampleDraft = result?;
        drafts.push(record);
    }

    info!(path, count = drafts.len(), "Sample drafts loaded");
    Ok(drafts)
}
