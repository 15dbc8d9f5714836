use std::path::Path;

use adwatch_core::Competitor;
use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CompetitorsFile {
    competitors: Vec<Competitor>,
}

pub fn parse_competitors(text: &str) -> Result<Vec<Competitor>> {
    let file: CompetitorsFile = serde_yaml::from_str(text).context("parsing competitors yaml")?;
    Ok(file.competitors)
}

/// Reads the competitor seed file used when no CRUD layer is attached.
pub fn load_competitors(path: impl AsRef<Path>) -> Result<Vec<Competitor>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading competitors file {}", path.display()))?;
    parse_competitors(&text).with_context(|| format!("loading {}", path.display()))
}
