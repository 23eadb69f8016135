use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Deserialize;

static MANIFEST: Lazy<Manifest> = Lazy::new(|| {
    let raw = include_str!("../../../../fixtures/manifest.json");
    serde_json::from_str(raw).expect("fixtures manifest should parse")
});

#[derive(Debug, Deserialize)]
struct Manifest {
    layouts: HashMap<String, String>,
    sections: HashMap<String, String>,
    pages: HashMap<String, PageEntry>,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    sections: Vec<String>,
    #[serde(default)]
    config: Option<String>,
}

fn fixtures_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../../fixtures")
}

fn resolve_path(rel: &str) -> PathBuf {
    fixtures_root().join(rel)
}

fn read_to_string(rel: &str) -> Result<String> {
    let path = resolve_path(rel);
    fs::read_to_string(&path)
        .with_context(|| format!("failed to read fixture at {}", path.display()))
}

fn load_json<T: DeserializeOwned>(rel: &str) -> Result<T> {
    let text = read_to_string(rel)?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse JSON fixture {rel}"))
}

fn lookup<'a, T>(map: &'a HashMap<String, T>, kind: &str, name: &str) -> Result<&'a T> {
    map.get(name)
        .ok_or_else(|| anyhow!("unknown {kind} fixture '{name}'"))
}

/// DOM layout snapshots (`StaticLayout` JSON).
pub mod layouts {
    use super::*;

    pub fn load<T: DeserializeOwned>(name: &str) -> Result<T> {
        let rel = lookup(&MANIFEST.layouts, "layout", name)?;
        super::load_json(rel)
    }
}

/// Declarative section specs.
pub mod sections {
    use super::*;

    pub fn load<T: DeserializeOwned>(name: &str) -> Result<T> {
        let rel = lookup(&MANIFEST.sections, "section", name)?;
        super::load_json(rel)
    }
}

/// Whole pages: an ordered section list plus optional config.
pub mod pages {
    use super::*;

    /// Section fixture names in mount order.
    pub fn section_names(name: &str) -> Result<Vec<String>> {
        let entry = lookup(&MANIFEST.pages, "page", name)?;
        Ok(entry.sections.clone())
    }

    pub fn sections<T: DeserializeOwned>(name: &str) -> Result<Vec<T>> {
        section_names(name)?
            .iter()
            .map(|section| super::sections::load(section))
            .collect()
    }

    pub fn config_json(name: &str) -> Result<Option<String>> {
        let entry = lookup(&MANIFEST.pages, "page", name)?;
        match &entry.config {
            Some(rel) => read_to_string(rel).map(Some),
            None => Ok(None),
        }
    }
}
