use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::ApiSession;
use crate::domain::{BidsCandidate, CandidateInfo, MincCandidate, MincVisit};
use crate::error::MirrorError;
use crate::transfer::FileFetcher;

#[derive(Debug, Deserialize)]
struct CandidateList {
    #[serde(rename = "Candidates")]
    candidates: Vec<CandidateInfo>,
}

#[derive(Debug, Deserialize)]
struct VisitList {
    #[serde(rename = "Visits")]
    visits: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VisitImages {
    #[serde(rename = "Files")]
    files: Vec<ImageEntry>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    #[serde(rename = "Filename")]
    filename: String,
}

/// Bulk manifest returned by `/projects/loris/bids/`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BidsManifest {
    pub dataset_description: LinkEntry,
    #[serde(rename = "README")]
    pub readme: LinkEntry,
    pub bids_validator_config: LinkEntry,
    pub participants: ParticipantsEntry,
    pub session_files: Vec<SessionFileRecord>,
    pub images: Vec<ImageFileRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinkEntry {
    pub link: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParticipantsEntry {
    pub tsv_link: String,
    pub json_link: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionFileRecord {
    pub candidate: String,
    pub visit: String,
    pub tsv_link: String,
    pub json_link: String,
}

/// One image record: fixed metadata fields plus dynamically named file-link
/// fields, which land in `links` via the flatten.
#[derive(Debug, Deserialize)]
pub struct ImageFileRecord {
    #[serde(rename = "Candidate")]
    pub candidate: String,
    #[serde(rename = "PSCID")]
    pub pscid: String,
    #[serde(rename = "Visit")]
    pub visit: String,
    #[serde(rename = "LorisScanType", default)]
    pub scan_type: Option<String>,
    #[serde(rename = "Subfolder")]
    pub subfolder: String,
    #[serde(flatten)]
    pub links: BTreeMap<String, serde_json::Value>,
}

impl ImageFileRecord {
    /// The record's file references. Link fields are expected to be strings;
    /// anything else is flagged and skipped instead of being treated as a
    /// download request.
    pub fn file_links(&self) -> Vec<&str> {
        self.links
            .iter()
            .filter_map(|(field, value)| match value {
                serde_json::Value::String(link) => Some(link.as_str()),
                _ => {
                    warn!(
                        candidate = %self.candidate,
                        visit = %self.visit,
                        field,
                        "unexpected non-string manifest field, ignoring"
                    );
                    None
                }
            })
            .collect()
    }
}

/// Candidate list for the flat (minc) layout, one bulk query.
pub fn minc_candidate_list<S: ApiSession>(session: &S) -> Result<Vec<CandidateInfo>, MirrorError> {
    let list: CandidateList = session.get_json("/candidates/")?;
    Ok(list.candidates)
}

/// Builds one candidate's visit tree for the flat layout: visit list, then
/// per visit the session document and the image list. Visits without images
/// are dropped.
pub fn build_minc_candidate<S: ApiSession>(
    session: &S,
    info: CandidateInfo,
) -> Result<MincCandidate, MirrorError> {
    let mut candidate = MincCandidate::new(info);
    let cand_id = candidate.info.cand_id.clone();

    let visit_list: VisitList = session.get_json(&format!("/candidates/{cand_id}"))?;
    for visit in visit_list.visits {
        let session_doc: serde_json::Value =
            session.get_json(&format!("/candidates/{cand_id}/{visit}"))?;
        let meta = session_doc
            .get("Meta")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let images: VisitImages =
            session.get_json(&format!("/candidates/{cand_id}/{visit}/images"))?;
        let filenames = images.files.into_iter().map(|entry| entry.filename).collect();
        candidate.visits.insert(visit, MincVisit { meta, filenames });
    }

    candidate.retain_nonempty_visits();
    debug!(candidate = %cand_id, visits = candidate.visits.len(), "visit tree built");
    Ok(candidate)
}

/// Fetches the bulk manifest, downloads the fixed top-level dataset files,
/// and folds the record set into per-candidate visit trees.
pub fn build_bids_candidates<S: ApiSession, F: FileFetcher>(
    session: &S,
    fetcher: &F,
    root: &Utf8Path,
) -> Result<Vec<BidsCandidate>, MirrorError> {
    let manifest: BidsManifest = session.get_json("/projects/loris/bids/")?;
    fetch_dataset_files(&manifest, fetcher, root)?;
    Ok(fold_bids_manifest(&manifest))
}

/// The five dataset-level files are fetched here, during manifest
/// construction, because everything downstream assumes they exist.
pub fn fetch_dataset_files<F: FileFetcher>(
    manifest: &BidsManifest,
    fetcher: &F,
    root: &Utf8Path,
) -> Result<(), MirrorError> {
    fs::create_dir_all(root.as_std_path()).map_err(MirrorError::filesystem)?;
    let dataset_files = [
        (manifest.dataset_description.link.as_str(), "dataset_description.json"),
        (manifest.readme.link.as_str(), "README"),
        (manifest.bids_validator_config.link.as_str(), ".bids-validator-config.json"),
        (manifest.participants.tsv_link.as_str(), "participants.tsv"),
        (manifest.participants.json_link.as_str(), "participants.json"),
    ];
    for (request, filename) in dataset_files {
        fetcher.fetch_file(request, root, filename, true)?;
    }
    Ok(())
}

/// Folds the flat record set into candidate trees. Session records create
/// visits (merging, not overwriting, when a pair repeats); image records
/// append into their visit's category lists, created lazily on first sight.
pub fn fold_bids_manifest(manifest: &BidsManifest) -> Vec<BidsCandidate> {
    let mut candidates: BTreeMap<String, BidsCandidate> = BTreeMap::new();

    for record in &manifest.session_files {
        let candidate = candidates
            .entry(record.candidate.clone())
            .or_insert_with(|| BidsCandidate::new(record.candidate.clone()));
        let visit = candidate.visits.entry(record.visit.clone()).or_default();
        visit.files.push(record.tsv_link.clone());
        visit.files.push(record.json_link.clone());
    }

    for image in &manifest.images {
        let Some(candidate) = candidates.get_mut(&image.candidate) else {
            warn!(
                candidate = %image.candidate,
                visit = %image.visit,
                "image record without a session record, skipping"
            );
            continue;
        };
        let Some(visit) = candidate.visits.get_mut(&image.visit) else {
            warn!(
                candidate = %image.candidate,
                visit = %image.visit,
                "image record for an unknown visit, skipping"
            );
            continue;
        };
        let folder = visit.folders.entry(image.subfolder.clone()).or_default();
        folder.extend(image.file_links().into_iter().map(str::to_string));
    }

    candidates.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_from(value: serde_json::Value) -> BidsManifest {
        serde_json::from_value(value).unwrap()
    }

    fn skeleton(session_files: serde_json::Value, images: serde_json::Value) -> BidsManifest {
        manifest_from(serde_json::json!({
            "DatasetDescription": {"Link": "/projects/loris/bids/dataset_description"},
            "README": {"Link": "/projects/loris/bids/readme"},
            "BidsValidatorConfig": {"Link": "/projects/loris/bids/validator"},
            "Participants": {
                "TsvLink": "/projects/loris/bids/participants.tsv",
                "JsonLink": "/projects/loris/bids/participants.json"
            },
            "SessionFiles": session_files,
            "Images": images,
        }))
    }

    #[test]
    fn image_record_collects_dynamic_link_fields() {
        let record: ImageFileRecord = serde_json::from_value(serde_json::json!({
            "Candidate": "1200000",
            "PSCID": "MTL0001",
            "Visit": "V1",
            "LorisScanType": "t1w",
            "Subfolder": "anat",
            "NiftiFile": "/files/sub-1200000_t1w.nii.gz",
            "JsonFile": "/files/sub-1200000_t1w.json"
        }))
        .unwrap();

        let links = record.file_links();
        assert_eq!(links.len(), 2);
        assert!(links.contains(&"/files/sub-1200000_t1w.nii.gz"));
        assert!(links.contains(&"/files/sub-1200000_t1w.json"));
    }

    #[test]
    fn image_record_flags_non_string_fields() {
        let record: ImageFileRecord = serde_json::from_value(serde_json::json!({
            "Candidate": "1200000",
            "PSCID": "MTL0001",
            "Visit": "V1",
            "Subfolder": "anat",
            "NiftiFile": "/files/a.nii.gz",
            "AcquisitionTime": 1234
        }))
        .unwrap();

        assert_eq!(record.file_links(), vec!["/files/a.nii.gz"]);
    }

    #[test]
    fn fold_merges_repeated_session_pairs() {
        let manifest = skeleton(
            serde_json::json!([
                {"Candidate": "1200000", "Visit": "V1",
                 "TsvLink": "/ses/a.tsv", "JsonLink": "/ses/a.json"},
                {"Candidate": "1200000", "Visit": "V1",
                 "TsvLink": "/ses/b.tsv", "JsonLink": "/ses/b.json"},
            ]),
            serde_json::json!([]),
        );

        let candidates = fold_bids_manifest(&manifest);
        assert_eq!(candidates.len(), 1);
        let visit = &candidates[0].visits["V1"];
        assert_eq!(
            visit.files,
            vec!["/ses/a.tsv", "/ses/a.json", "/ses/b.tsv", "/ses/b.json"]
        );
    }

    #[test]
    fn fold_accumulates_repeated_categories() {
        let manifest = skeleton(
            serde_json::json!([
                {"Candidate": "1200000", "Visit": "V1",
                 "TsvLink": "/ses/a.tsv", "JsonLink": "/ses/a.json"},
            ]),
            serde_json::json!([
                {"Candidate": "1200000", "PSCID": "MTL0001", "Visit": "V1",
                 "Subfolder": "anat", "NiftiFile": "/files/t1.nii.gz"},
                {"Candidate": "1200000", "PSCID": "MTL0001", "Visit": "V1",
                 "Subfolder": "anat", "NiftiFile": "/files/t2.nii.gz"},
                {"Candidate": "1200000", "PSCID": "MTL0001", "Visit": "V1",
                 "Subfolder": "dwi", "NiftiFile": "/files/dwi.nii.gz"},
            ]),
        );

        let candidates = fold_bids_manifest(&manifest);
        let visit = &candidates[0].visits["V1"];
        assert_eq!(visit.folders["anat"], vec!["/files/t1.nii.gz", "/files/t2.nii.gz"]);
        assert_eq!(visit.folders["dwi"], vec!["/files/dwi.nii.gz"]);
    }

    #[test]
    fn fold_skips_images_without_session_record() {
        let manifest = skeleton(
            serde_json::json!([
                {"Candidate": "1200000", "Visit": "V1",
                 "TsvLink": "/ses/a.tsv", "JsonLink": "/ses/a.json"},
            ]),
            serde_json::json!([
                {"Candidate": "9999998", "PSCID": "MTL9999", "Visit": "V1",
                 "Subfolder": "anat", "NiftiFile": "/files/orphan.nii.gz"},
            ]),
        );

        let candidates = fold_bids_manifest(&manifest);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "1200000");
        assert!(candidates[0].visits["V1"].folders.is_empty());
    }
}
