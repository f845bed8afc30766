//! Location string -> region lookup driven by an ordered keyword table.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const BUILTIN_REGIONS_YAML: &str = include_str!("../../../rules/regions.yaml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionKeyword {
    pub keyword: String,
    pub region: String,
}

#[derive(Debug, Error)]
pub enum RegionTableError {
    #[error("reading region table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing region table: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("region table keyword #{0} is blank")]
    BlankKeyword(usize),
    #[error("region table fallback region is blank")]
    BlankFallback,
}

#[derive(Debug, Clone, Deserialize)]
struct RegionTableFile {
    #[allow(dead_code)]
    version: u32,
    fallback: String,
    #[serde(default)]
    regions: Vec<String>,
    #[serde(default)]
    keywords: Vec<RegionKeyword>,
}

#[derive(Debug, Clone)]
struct Needle {
    lowered: String,
    region: String,
}

/// Ordered keyword table. Resolution is first-match-wins: keywords in table
/// order, then canonical region names, then the fallback region.
#[derive(Debug, Clone)]
pub struct RegionTable {
    keywords: Vec<Needle>,
    regions: Vec<Needle>,
    fallback: String,
}

impl RegionTable {
    pub fn new(
        keywords: Vec<RegionKeyword>,
        regions: Vec<String>,
        fallback: impl Into<String>,
    ) -> Result<Self, RegionTableError> {
        let fallback = fallback.into();
        if fallback.trim().is_empty() {
            return Err(RegionTableError::BlankFallback);
        }
        let keywords = keywords
            .into_iter()
            .enumerate()
            .map(|(idx, k)| {
                let lowered = k.keyword.trim().to_lowercase();
                if lowered.is_empty() {
                    return Err(RegionTableError::BlankKeyword(idx));
                }
                Ok(Needle {
                    lowered,
                    region: k.region,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let regions = regions
            .into_iter()
            .filter(|r| !r.trim().is_empty())
            .map(|r| Needle {
                lowered: r.trim().to_lowercase(),
                region: r,
            })
            .collect();
        Ok(Self {
            keywords,
            regions,
            fallback,
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, RegionTableError> {
        let file: RegionTableFile = serde_yaml::from_str(yaml)?;
        Self::new(file.keywords, file.regions, file.fallback)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegionTableError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| RegionTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// The New Zealand table shipped in `rules/regions.yaml`.
    pub fn builtin() -> Result<Self, RegionTableError> {
        Self::from_yaml_str(BUILTIN_REGIONS_YAML)
    }

    pub fn region_for(&self, location: &str) -> &str {
        let location = location.trim().to_lowercase();
        if location.is_empty() {
            return &self.fallback;
        }
        self.keywords
            .iter()
            .chain(self.regions.iter())
            .find(|needle| location.contains(&needle.lowered))
            .map(|needle| needle.region.as_str())
            .unwrap_or(&self.fallback)
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Canonical region names, in table order.
    pub fn regions(&self) -> Vec<&str> {
        self.regions.iter().map(|r| r.region.as_str()).collect()
    }
}
