use std::fs;

use camino::Utf8Path;
use serde::Serialize;
use tracing::debug;

use crate::domain::{BidsCandidate, CandidateInfo, MincCandidate};
use crate::error::MirrorError;
use crate::transfer::{DownloadOutcome, FileFetcher};

/// Fixed projection written to `candidate.json` in the flat layout.
#[derive(Debug, Serialize)]
struct CandidateProjection<'a> {
    #[serde(rename = "CandID")]
    cand_id: &'a str,
    #[serde(rename = "Site")]
    site: &'a str,
    #[serde(rename = "DoB")]
    dob: &'a str,
    #[serde(rename = "Gender")]
    gender: &'a str,
    #[serde(rename = "Language")]
    language: &'a str,
    #[serde(rename = "Project")]
    project: &'a str,
}

impl<'a> From<&'a CandidateInfo> for CandidateProjection<'a> {
    fn from(info: &'a CandidateInfo) -> Self {
        Self {
            cand_id: &info.cand_id,
            site: &info.site,
            dob: &info.dob,
            gender: &info.gender,
            language: &info.language,
            project: &info.project,
        }
    }
}

/// Flat layout: `{root}/{id}/candidate.json`, `{id}/{visit}/session.json`,
/// then the visit's images. A `New` image additionally pulls its QC companion
/// as `{file}.qc.json`; the QC endpoint has no conditional-GET support, so a
/// `Current` image leaves the QC file untouched.
pub fn materialize_minc<F: FileFetcher>(
    candidate: &MincCandidate,
    fetcher: &F,
    root: &Utf8Path,
) -> Result<(), MirrorError> {
    let cand_id = &candidate.info.cand_id;
    let cand_dir = root.join(cand_id);
    fs::create_dir_all(cand_dir.as_std_path()).map_err(MirrorError::filesystem)?;

    let projection = CandidateProjection::from(&candidate.info);
    let bytes = serde_json::to_vec(&projection).map_err(MirrorError::filesystem)?;
    fs::write(cand_dir.join("candidate.json").as_std_path(), bytes)
        .map_err(MirrorError::filesystem)?;

    for (visit, record) in &candidate.visits {
        let visit_dir = cand_dir.join(visit);
        fs::create_dir_all(visit_dir.as_std_path()).map_err(MirrorError::filesystem)?;
        let meta = serde_json::to_vec(&record.meta).map_err(MirrorError::filesystem)?;
        fs::write(visit_dir.join("session.json").as_std_path(), meta)
            .map_err(MirrorError::filesystem)?;
    }

    for (visit, record) in &candidate.visits {
        let visit_dir = cand_dir.join(visit);
        for filename in &record.filenames {
            let request = format!("/candidates/{cand_id}/{visit}/images/{filename}");
            let outcome = fetcher.fetch_file(&request, &visit_dir, filename, true)?;
            if outcome == DownloadOutcome::New {
                let qc_name = format!("{filename}.qc.json");
                fetcher.fetch_file(&format!("{request}/qc"), &visit_dir, &qc_name, false)?;
            }
        }
    }

    debug!(candidate = %cand_id, "materialized");
    Ok(())
}

/// Categorized layout: `{root}/sub-{id}/ses-{visit}/` with per-category
/// subdirectories, every directory created before any fetch, every file
/// cache-validated, local filenames taken from the reference's basename.
pub fn materialize_bids<F: FileFetcher>(
    candidate: &BidsCandidate,
    fetcher: &F,
    root: &Utf8Path,
) -> Result<(), MirrorError> {
    let sub_dir = root.join(format!("sub-{}", candidate.id));
    fs::create_dir_all(sub_dir.as_std_path()).map_err(MirrorError::filesystem)?;

    for (visit, record) in &candidate.visits {
        let ses_dir = sub_dir.join(format!("ses-{visit}"));
        fs::create_dir_all(ses_dir.as_std_path()).map_err(MirrorError::filesystem)?;
        for category in record.folders.keys() {
            fs::create_dir_all(ses_dir.join(category).as_std_path())
                .map_err(MirrorError::filesystem)?;
        }
    }

    for (visit, record) in &candidate.visits {
        let ses_dir = sub_dir.join(format!("ses-{visit}"));
        for request in &record.files {
            fetcher.fetch_file(request, &ses_dir, basename(request), true)?;
        }
        for (category, requests) in &record.folders {
            let category_dir = ses_dir.join(category);
            for request in requests {
                fetcher.fetch_file(request, &category_dir, basename(request), true)?;
            }
        }
    }

    debug!(candidate = %candidate.id, "materialized");
    Ok(())
}

fn basename(request: &str) -> &str {
    request.rsplit('/').next().unwrap_or(request)
}
