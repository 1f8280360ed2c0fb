use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MirrorError;

/// Numeric candidate identifier as accepted on the command line. The LORIS
/// CandID space is strictly between 1000000 and 9999999.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateId(u32);

impl CandidateId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CandidateId {
    type Err = MirrorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let parsed: u32 = trimmed
            .parse()
            .map_err(|_| MirrorError::InvalidCandidateId(value.to_string()))?;
        if parsed <= 1_000_000 || parsed >= 9_999_999 {
            return Err(MirrorError::InvalidCandidateId(value.to_string()));
        }
        Ok(Self(parsed))
    }
}

/// Output layout selected with `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSchema {
    Bids,
    Minc,
}

impl OutputSchema {
    /// Parses the CLI value. Kept out of clap's value enum so an unrecognized
    /// selection surfaces as `UnknownSchema` with its own exit code.
    pub fn parse(value: &str) -> Result<Self, MirrorError> {
        match value {
            "bids" => Ok(OutputSchema::Bids),
            "minc" => Ok(OutputSchema::Minc),
            other => Err(MirrorError::UnknownSchema(other.to_string())),
        }
    }
}

impl fmt::Display for OutputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputSchema::Bids => write!(f, "bids"),
            OutputSchema::Minc => write!(f, "minc"),
        }
    }
}

/// Candidate record as returned by `/candidates/`. The demographic fields are
/// carried verbatim; `candidate.json` is a fixed projection of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateInfo {
    #[serde(rename = "CandID")]
    pub cand_id: String,
    #[serde(rename = "PSCID")]
    pub pscid: String,
    #[serde(rename = "Site")]
    pub site: String,
    #[serde(rename = "DoB")]
    pub dob: String,
    #[serde(rename = "Gender")]
    pub gender: String,
    #[serde(rename = "Language")]
    pub language: String,
    #[serde(rename = "Project")]
    pub project: String,
}

impl CandidateInfo {
    pub fn matches_filter(&self, requested: &[CandidateId]) -> bool {
        match self.cand_id.trim().parse::<u32>() {
            Ok(id) => requested.iter().any(|req| req.as_u32() == id),
            Err(_) => false,
        }
    }
}

/// Per-visit grouping in the flat (minc) layout: the session metadata blob
/// plus the image filenames attached to the visit.
#[derive(Debug, Clone)]
pub struct MincVisit {
    pub meta: serde_json::Value,
    pub filenames: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MincCandidate {
    pub info: CandidateInfo,
    pub visits: BTreeMap<String, MincVisit>,
}

impl MincCandidate {
    pub fn new(info: CandidateInfo) -> Self {
        Self {
            info,
            visits: BTreeMap::new(),
        }
    }

    /// Drops visits with no associated images. The materializer relies on
    /// every retained visit having at least one file.
    pub fn retain_nonempty_visits(&mut self) {
        self.visits.retain(|_, visit| !visit.filenames.is_empty());
    }
}

/// Per-visit grouping in the categorized (bids) layout: file references that
/// land directly under the session directory plus per-category references.
#[derive(Debug, Clone, Default)]
pub struct BidsVisit {
    pub files: Vec<String>,
    pub folders: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct BidsCandidate {
    pub id: String,
    pub visits: BTreeMap<String, BidsVisit>,
}

impl BidsCandidate {
    pub fn new(id: String) -> Self {
        Self {
            id,
            visits: BTreeMap::new(),
        }
    }

    pub fn matches_filter(&self, requested: &[CandidateId]) -> bool {
        match self.id.trim().parse::<u32>() {
            Ok(id) => requested.iter().any(|req| req.as_u32() == id),
            Err(_) => false,
        }
    }
}
