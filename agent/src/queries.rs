//! Profile query files.
//!
//! A `.toml` file holds `[[query]]` tables, anything else is read as a JSON
//! array of queries.

use anyhow::{bail, Context, Result};
use pir_model::ProfileQuery;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Deserialize)]
struct QueryFile {
    #[serde(default)]
    query: Vec<ProfileQuery>,
}

/// Read and check the profile queries in `path`.
pub fn load_profile_queries(path: &Path) -> Result<Vec<ProfileQuery>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading profile queries from {}", path.display()))?;

    let queries = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str::<QueryFile>(&contents)
            .with_context(|| format!("parsing {}", path.display()))?
            .query
    } else {
        serde_json::from_str::<Vec<ProfileQuery>>(&contents)
            .with_context(|| format!("parsing {}", path.display()))?
    };

    let mut seen = HashSet::new();
    for query in &queries {
        if !seen.insert(query.id) {
            bail!("duplicate profile query id {} in {}", query.id, path.display());
        }
    }

    Ok(queries)
}
