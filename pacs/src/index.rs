//! The hierarchical metadata index backing query and retrieve.
//!
//! Four cross-linked maps, keyed by patient ID, study UID,
//! series UID and SOP instance UID.
//! Inserting an instance materializes its ancestors when absent
//! and validates that existing ancestors agree with the record.
//!
//! The index is a serialized owner:
//! the server wraps it in a single mutex
//! and every query captures a snapshot of its matches
//! before the lock is released.
use snafu::Snafu;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use ferrodicom_core::{is_valid_uid, tags, DataElement, DataSet, Tag, VR};

use crate::matching::{dataset_matches, QueryLevel};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum IndexError {
    #[snafu(display("data set lacks a non-empty {} for indexing", attribute))]
    MissingIdentifier { attribute: &'static str },

    #[snafu(display("data set carries a malformed {} `{}`", attribute, value))]
    InvalidIdentifier {
        attribute: &'static str,
        value: String,
    },

    #[snafu(display(
        "{} {} already belongs to {} `{}`, not `{}`",
        entity,
        uid,
        parent_kind,
        existing,
        offered
    ))]
    InvalidHierarchy {
        entity: &'static str,
        uid: String,
        parent_kind: &'static str,
        existing: String,
        offered: String,
    },
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientRecord {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyRecord {
    pub uid: String,
    pub patient_id: String,
    pub date: String,
    pub description: String,
    pub accession_number: String,
    pub referring_physician: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRecord {
    pub uid: String,
    pub study_uid: String,
    pub number: String,
    pub modality: String,
    pub body_part: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub sop_instance_uid: String,
    pub series_uid: String,
    pub sop_class_uid: String,
    pub instance_number: String,
    pub path: PathBuf,
    pub size: u64,
}

/// One stored instance with its full ancestry,
/// as derived from a stored data set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    pub patient: PatientRecord,
    pub study: StudyRecord,
    pub series: SeriesRecord,
    pub instance: InstanceRecord,
}

impl MetadataRecord {
    /// Derive a metadata record from a decoded data set
    /// and the storage placement of its file.
    pub fn from_dataset(dataset: &DataSet, path: PathBuf, size: u64) -> Result<MetadataRecord> {
        let sop_instance_uid = require_uid(dataset, tags::SOP_INSTANCE_UID, "SOPInstanceUID")?;
        let series_uid = require_uid(dataset, tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?;
        let study_uid = require_uid(dataset, tags::STUDY_INSTANCE_UID, "StudyInstanceUID")?;
        let patient_id = dataset.opt_string(tags::PATIENT_ID).unwrap_or_default();

        Ok(MetadataRecord {
            patient: PatientRecord {
                id: patient_id.clone(),
                name: dataset.opt_string(tags::PATIENT_NAME).unwrap_or_default(),
            },
            study: StudyRecord {
                uid: study_uid.clone(),
                patient_id,
                date: dataset.opt_string(tags::STUDY_DATE).unwrap_or_default(),
                description: dataset
                    .opt_string(tags::STUDY_DESCRIPTION)
                    .unwrap_or_default(),
                accession_number: dataset
                    .opt_string(tags::ACCESSION_NUMBER)
                    .unwrap_or_default(),
                referring_physician: dataset
                    .opt_string(tags::REFERRING_PHYSICIAN_NAME)
                    .unwrap_or_default(),
            },
            series: SeriesRecord {
                uid: series_uid.clone(),
                study_uid,
                number: dataset.opt_string(tags::SERIES_NUMBER).unwrap_or_default(),
                modality: dataset.opt_string(tags::MODALITY).unwrap_or_default(),
                body_part: dataset
                    .opt_string(tags::BODY_PART_EXAMINED)
                    .unwrap_or_default(),
            },
            instance: InstanceRecord {
                sop_instance_uid,
                series_uid,
                sop_class_uid: dataset.opt_string(tags::SOP_CLASS_UID).unwrap_or_default(),
                instance_number: dataset
                    .opt_string(tags::INSTANCE_NUMBER)
                    .unwrap_or_default(),
                path,
                size,
            },
        })
    }
}

/// Extract an identifying UID, enforcing UID syntax on the way in.
///
/// These values come straight off the wire and end up naming
/// filesystem paths, so anything that is not a well-formed UID
/// is rejected before a record exists at all.
fn require_uid(dataset: &DataSet, tag: Tag, attribute: &'static str) -> Result<String> {
    match dataset.opt_string(tag) {
        Some(uid) if !uid.is_empty() => {
            if !is_valid_uid(&uid) {
                return InvalidIdentifierSnafu {
                    attribute,
                    value: uid,
                }
                .fail();
            }
            Ok(uid)
        }
        _ => MissingIdentifierSnafu { attribute }.fail(),
    }
}

/// The in-memory metadata index.
#[derive(Debug, Default)]
pub struct MetadataIndex {
    patients: HashMap<String, PatientRecord>,
    studies: HashMap<String, StudyRecord>,
    series: HashMap<String, SeriesRecord>,
    instances: HashMap<String, InstanceRecord>,
    patient_studies: HashMap<String, BTreeSet<String>>,
    study_series: HashMap<String, BTreeSet<String>>,
    series_instances: HashMap<String, BTreeSet<String>>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        MetadataIndex::default()
    }

    pub fn patient_count(&self) -> usize {
        self.patients.len()
    }

    pub fn study_count(&self) -> usize {
        self.studies.len()
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Insert a record,
    /// materializing absent ancestors and validating existing ones.
    /// A record with a known SOP instance UID overwrites the prior entry.
    pub fn insert(&mut self, record: MetadataRecord) -> Result<()> {
        // hierarchy consistency first, so a rejected insert changes nothing
        if let Some(existing) = self.studies.get(&record.study.uid) {
            if existing.patient_id != record.study.patient_id {
                return InvalidHierarchySnafu {
                    entity: "study",
                    uid: record.study.uid,
                    parent_kind: "patient",
                    existing: existing.patient_id.clone(),
                    offered: record.study.patient_id,
                }
                .fail();
            }
        }
        if let Some(existing) = self.series.get(&record.series.uid) {
            if existing.study_uid != record.series.study_uid {
                return InvalidHierarchySnafu {
                    entity: "series",
                    uid: record.series.uid,
                    parent_kind: "study",
                    existing: existing.study_uid.clone(),
                    offered: record.series.study_uid,
                }
                .fail();
            }
        }

        if let Some(prior) = self.instances.remove(&record.instance.sop_instance_uid) {
            // duplicate SOP instance: drop the old linkage before relinking
            if let Some(siblings) = self.series_instances.get_mut(&prior.series_uid) {
                siblings.remove(&prior.sop_instance_uid);
            }
        }

        self.patients
            .entry(record.patient.id.clone())
            .or_insert_with(|| record.patient.clone());
        self.studies
            .entry(record.study.uid.clone())
            .or_insert_with(|| record.study.clone());
        self.series
            .entry(record.series.uid.clone())
            .or_insert_with(|| record.series.clone());

        self.patient_studies
            .entry(record.patient.id.clone())
            .or_default()
            .insert(record.study.uid.clone());
        self.study_series
            .entry(record.study.uid.clone())
            .or_default()
            .insert(record.series.uid.clone());
        self.series_instances
            .entry(record.series.uid.clone())
            .or_default()
            .insert(record.instance.sop_instance_uid.clone());

        self.instances
            .insert(record.instance.sop_instance_uid.clone(), record.instance);
        Ok(())
    }

    /// Remove an instance, pruning ancestors left without children.
    pub fn delete(&mut self, sop_instance_uid: &str) -> Option<InstanceRecord> {
        let instance = self.instances.remove(sop_instance_uid)?;
        let series_uid = instance.series_uid.clone();
        let series_empty = {
            let siblings = self.series_instances.entry(series_uid.clone()).or_default();
            siblings.remove(sop_instance_uid);
            siblings.is_empty()
        };
        if series_empty {
            self.series_instances.remove(&series_uid);
            if let Some(series) = self.series.remove(&series_uid) {
                let study_empty = {
                    let children = self.study_series.entry(series.study_uid.clone()).or_default();
                    children.remove(&series_uid);
                    children.is_empty()
                };
                if study_empty {
                    self.study_series.remove(&series.study_uid);
                    if let Some(study) = self.studies.remove(&series.study_uid) {
                        let patient_empty = {
                            let children = self
                                .patient_studies
                                .entry(study.patient_id.clone())
                                .or_default();
                            children.remove(&study.uid);
                            children.is_empty()
                        };
                        if patient_empty {
                            self.patient_studies.remove(&study.patient_id);
                            self.patients.remove(&study.patient_id);
                        }
                    }
                }
            }
        }
        Some(instance)
    }

    /// Fetch an instance record by SOP instance UID.
    pub fn instance(&self, sop_instance_uid: &str) -> Option<&InstanceRecord> {
        self.instances.get(sop_instance_uid)
    }

    /// Run a query at the given level,
    /// returning one result data set per match.
    ///
    /// Each result carries the queried keys
    /// plus the identifying UIDs at and above the level.
    pub fn query(&self, level: QueryLevel, query: &DataSet) -> Vec<DataSet> {
        self.matching_views(level, query)
            .into_iter()
            .map(|view| project(query, &view, level))
            .collect()
    }

    /// Resolve the stored instances selected by a query at the given level.
    pub fn retrieve(&self, level: QueryLevel, query: &DataSet) -> Vec<InstanceRecord> {
        let mut out = Vec::new();
        for view in self.matching_views(level, query) {
            match level {
                QueryLevel::Image => {
                    if let Some(uid) = view.opt_string(tags::SOP_INSTANCE_UID) {
                        out.extend(self.instances.get(&uid).cloned());
                    }
                }
                QueryLevel::Series => {
                    if let Some(uid) = view.opt_string(tags::SERIES_INSTANCE_UID) {
                        out.extend(self.instances_of_series(&uid));
                    }
                }
                QueryLevel::Study => {
                    if let Some(uid) = view.opt_string(tags::STUDY_INSTANCE_UID) {
                        out.extend(self.instances_of_study(&uid));
                    }
                }
                QueryLevel::Patient => {
                    if let Some(id) = view.opt_string(tags::PATIENT_ID) {
                        for study_uid in
                            self.patient_studies.get(&id).into_iter().flatten()
                        {
                            out.extend(self.instances_of_study(study_uid));
                        }
                    }
                }
            }
        }
        out
    }

    fn instances_of_series(&self, series_uid: &str) -> Vec<InstanceRecord> {
        self.series_instances
            .get(series_uid)
            .into_iter()
            .flatten()
            .filter_map(|uid| self.instances.get(uid).cloned())
            .collect()
    }

    fn instances_of_study(&self, study_uid: &str) -> Vec<InstanceRecord> {
        self.study_series
            .get(study_uid)
            .into_iter()
            .flatten()
            .flat_map(|series_uid| self.instances_of_series(series_uid))
            .collect()
    }

    /// Build the candidate attribute views at the given level
    /// and keep those matching the query.
    fn matching_views(&self, level: QueryLevel, query: &DataSet) -> Vec<DataSet> {
        let mut views = Vec::new();
        match level {
            QueryLevel::Patient => {
                for patient in self.patients.values() {
                    views.push(self.patient_view(patient));
                }
            }
            QueryLevel::Study => {
                for study in self.studies.values() {
                    views.push(self.study_view(study));
                }
            }
            QueryLevel::Series => {
                for series in self.series.values() {
                    views.push(self.series_view(series));
                }
            }
            QueryLevel::Image => {
                for instance in self.instances.values() {
                    views.push(self.instance_view(instance));
                }
            }
        }
        views.retain(|view| dataset_matches(query, view));
        views
    }

    fn patient_view(&self, patient: &PatientRecord) -> DataSet {
        let mut view = DataSet::new();
        view.put(DataElement::new(
            tags::PATIENT_ID,
            VR::LO,
            patient.id.as_str(),
        ));
        view.put(DataElement::new(
            tags::PATIENT_NAME,
            VR::PN,
            patient.name.as_str(),
        ));
        view
    }

    fn study_view(&self, study: &StudyRecord) -> DataSet {
        let mut view = self
            .patients
            .get(&study.patient_id)
            .map(|p| self.patient_view(p))
            .unwrap_or_default();
        view.put(DataElement::new(
            tags::STUDY_INSTANCE_UID,
            VR::UI,
            study.uid.as_str(),
        ));
        view.put(DataElement::new(
            tags::STUDY_DATE,
            VR::DA,
            study.date.as_str(),
        ));
        view.put(DataElement::new(
            tags::STUDY_DESCRIPTION,
            VR::LO,
            study.description.as_str(),
        ));
        view.put(DataElement::new(
            tags::ACCESSION_NUMBER,
            VR::SH,
            study.accession_number.as_str(),
        ));
        view.put(DataElement::new(
            tags::REFERRING_PHYSICIAN_NAME,
            VR::PN,
            study.referring_physician.as_str(),
        ));
        view
    }

    fn series_view(&self, series: &SeriesRecord) -> DataSet {
        let mut view = self
            .studies
            .get(&series.study_uid)
            .map(|s| self.study_view(s))
            .unwrap_or_default();
        view.put(DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            series.uid.as_str(),
        ));
        view.put(DataElement::new(
            tags::SERIES_NUMBER,
            VR::IS,
            series.number.as_str(),
        ));
        view.put(DataElement::new(
            tags::MODALITY,
            VR::CS,
            series.modality.as_str(),
        ));
        view.put(DataElement::new(
            tags::BODY_PART_EXAMINED,
            VR::CS,
            series.body_part.as_str(),
        ));
        view
    }

    fn instance_view(&self, instance: &InstanceRecord) -> DataSet {
        let mut view = self
            .series
            .get(&instance.series_uid)
            .map(|s| self.series_view(s))
            .unwrap_or_default();
        view.put(DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            instance.sop_instance_uid.as_str(),
        ));
        view.put(DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            instance.sop_class_uid.as_str(),
        ));
        view.put(DataElement::new(
            tags::INSTANCE_NUMBER,
            VR::IS,
            instance.instance_number.as_str(),
        ));
        view
    }
}

/// The identifying UID attributes at and above each level.
fn identifying_tags(level: QueryLevel) -> &'static [Tag] {
    match level {
        QueryLevel::Patient => &[tags::PATIENT_ID],
        QueryLevel::Study => &[tags::PATIENT_ID, tags::STUDY_INSTANCE_UID],
        QueryLevel::Series => &[
            tags::PATIENT_ID,
            tags::STUDY_INSTANCE_UID,
            tags::SERIES_INSTANCE_UID,
        ],
        QueryLevel::Image => &[
            tags::PATIENT_ID,
            tags::STUDY_INSTANCE_UID,
            tags::SERIES_INSTANCE_UID,
            tags::SOP_INSTANCE_UID,
        ],
    }
}

/// Build one result data set:
/// every queried key (filled from the view when known),
/// the identifying UIDs, and the level element.
fn project(query: &DataSet, view: &DataSet, level: QueryLevel) -> DataSet {
    let mut result = DataSet::new();
    for queried in query.iter() {
        if queried.tag() == tags::QUERY_RETRIEVE_LEVEL {
            continue;
        }
        match view.get(queried.tag()) {
            Some(found) => {
                result.put(found.clone());
            }
            None => {
                result.put(DataElement::empty(queried.tag(), queried.vr()));
            }
        }
    }
    for &tag in identifying_tags(level) {
        if let Some(found) = view.get(tag) {
            result.put(found.clone());
        }
    }
    result.put(DataElement::new(
        tags::QUERY_RETRIEVE_LEVEL,
        VR::CS,
        level.keyword(),
    ));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    // short but syntactically valid hierarchy UIDs
    const S1: &str = "1.21.1";
    const S2: &str = "1.21.2";
    const S3: &str = "1.21.3";
    const SE1: &str = "1.31.1";
    const SE2: &str = "1.31.2";
    const SE3: &str = "1.31.3";
    const I1: &str = "1.41.1";
    const I2: &str = "1.41.2";
    const I3: &str = "1.41.3";

    fn dataset_of(
        patient: (&str, &str),
        study: &str,
        series: &str,
        sop: &str,
    ) -> DataSet {
        let mut ds = DataSet::new();
        ds.put(DataElement::new(tags::PATIENT_ID, VR::LO, patient.0));
        ds.put(DataElement::new(tags::PATIENT_NAME, VR::PN, patient.1));
        ds.put(DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, study));
        ds.put(DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, series));
        ds.put(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, sop));
        ds.put(DataElement::new(tags::MODALITY, VR::CS, "CT"));
        ds.put(DataElement::new(tags::STUDY_DATE, VR::DA, "20240110"));
        ds
    }

    fn record(
        patient: (&str, &str),
        study: &str,
        series: &str,
        sop: &str,
    ) -> MetadataRecord {
        let ds = dataset_of(patient, study, series, sop);
        MetadataRecord::from_dataset(&ds, PathBuf::from(format!("/data/{sop}.dcm")), 1024)
            .unwrap()
    }

    fn level_query(level: QueryLevel, keys: &[DataElement]) -> DataSet {
        let mut q = DataSet::new();
        q.put(DataElement::new(
            tags::QUERY_RETRIEVE_LEVEL,
            VR::CS,
            level.keyword(),
        ));
        for key in keys {
            q.put(key.clone());
        }
        q
    }

    #[test]
    fn insert_materializes_ancestors() {
        let mut index = MetadataIndex::new();
        index
            .insert(record(("P1", "DOE^JANE"), S1, SE1, I1))
            .unwrap();
        assert_eq!(index.patient_count(), 1);
        assert_eq!(index.study_count(), 1);
        assert_eq!(index.series_count(), 1);
        assert_eq!(index.instance_count(), 1);
    }

    #[test]
    fn inserted_instances_are_query_hits() {
        let mut index = MetadataIndex::new();
        index
            .insert(record(("P1", "DOE^JANE"), S1, SE1, I1))
            .unwrap();

        let results = index.query(
            QueryLevel::Image,
            &level_query(
                QueryLevel::Image,
                &[DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, I1)],
            ),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].uid(tags::SOP_INSTANCE_UID).unwrap(), I1);
        // identifying UIDs above the level are present
        assert_eq!(results[0].uid(tags::STUDY_INSTANCE_UID).unwrap(), S1);
        assert_eq!(results[0].string(tags::PATIENT_ID).unwrap(), "P1");
    }

    #[test]
    fn duplicate_sop_instance_overwrites() {
        let mut index = MetadataIndex::new();
        index
            .insert(record(("P1", "DOE^JANE"), S1, SE1, I1))
            .unwrap();
        let mut newer = record(("P1", "DOE^JANE"), S1, SE1, I1);
        newer.instance.size = 2048;
        index.insert(newer).unwrap();
        assert_eq!(index.instance_count(), 1);
        assert_eq!(index.instance(I1).unwrap().size, 2048);
    }

    #[test]
    fn conflicting_hierarchy_is_rejected() {
        let mut index = MetadataIndex::new();
        index
            .insert(record(("P1", "DOE^JANE"), S1, SE1, I1))
            .unwrap();
        let err = index
            .insert(record(("P2", "ROE^JOHN"), S1, SE2, I2))
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidHierarchy { .. }));
        // nothing was changed by the failed insert
        assert_eq!(index.patient_count(), 1);
        assert_eq!(index.instance_count(), 1);
    }

    #[test]
    fn empty_patient_query_returns_each_patient() {
        let mut index = MetadataIndex::new();
        index
            .insert(record(("P1", "SMITH^JOHN"), S1, SE1, I1))
            .unwrap();
        index
            .insert(record(("P2", "smith^jane"), S2, SE2, I2))
            .unwrap();
        index
            .insert(record(("P3", "DOE^JANE"), S3, SE3, I3))
            .unwrap();

        let results = index.query(
            QueryLevel::Patient,
            &level_query(QueryLevel::Patient, &[]),
        );
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn wildcard_patient_name_query_is_case_insensitive() {
        let mut index = MetadataIndex::new();
        index
            .insert(record(("P1", "SMITH^JOHN"), S1, SE1, I1))
            .unwrap();
        index
            .insert(record(("P2", "smith^jane"), S2, SE2, I2))
            .unwrap();
        index
            .insert(record(("P3", "DOE^JANE"), S3, SE3, I3))
            .unwrap();

        let results = index.query(
            QueryLevel::Patient,
            &level_query(
                QueryLevel::Patient,
                &[DataElement::new(tags::PATIENT_NAME, VR::PN, "smith*")],
            ),
        );
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn study_query_returns_requested_empty_keys() {
        let mut index = MetadataIndex::new();
        index
            .insert(record(("P1", "DOE^JANE"), S1, SE1, I1))
            .unwrap();

        let results = index.query(
            QueryLevel::Study,
            &level_query(
                QueryLevel::Study,
                &[
                    DataElement::new(tags::PATIENT_ID, VR::LO, "P1"),
                    DataElement::empty(tags::STUDY_INSTANCE_UID, VR::UI),
                    DataElement::empty(tags::ACCESSION_NUMBER, VR::SH),
                ],
            ),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].uid(tags::STUDY_INSTANCE_UID).unwrap(), S1);
        // requested but unknown attributes come back empty
        assert!(results[0].get(tags::ACCESSION_NUMBER).unwrap().is_empty());
        assert_eq!(
            results[0].string(tags::QUERY_RETRIEVE_LEVEL).unwrap(),
            "STUDY"
        );
    }

    #[test]
    fn retrieve_descends_from_the_query_level() {
        let mut index = MetadataIndex::new();
        index
            .insert(record(("P1", "DOE^JANE"), S1, SE1, I1))
            .unwrap();
        index
            .insert(record(("P1", "DOE^JANE"), S1, SE1, I2))
            .unwrap();
        index
            .insert(record(("P1", "DOE^JANE"), S1, SE2, I3))
            .unwrap();

        let instances = index.retrieve(
            QueryLevel::Study,
            &level_query(
                QueryLevel::Study,
                &[DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, S1)],
            ),
        );
        assert_eq!(instances.len(), 3);

        let series_only = index.retrieve(
            QueryLevel::Series,
            &level_query(
                QueryLevel::Series,
                &[DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, SE1)],
            ),
        );
        assert_eq!(series_only.len(), 2);
    }

    #[test]
    fn delete_prunes_empty_ancestors() {
        let mut index = MetadataIndex::new();
        index
            .insert(record(("P1", "DOE^JANE"), S1, SE1, I1))
            .unwrap();
        index
            .insert(record(("P1", "DOE^JANE"), S1, SE1, I2))
            .unwrap();

        assert!(index.delete(I1).is_some());
        assert_eq!(index.series_count(), 1);
        assert!(index.delete(I2).is_some());
        assert_eq!(index.series_count(), 0);
        assert_eq!(index.study_count(), 0);
        assert_eq!(index.patient_count(), 0);
        assert!(index.delete(I2).is_none());
    }

    #[test]
    fn missing_identifiers_are_rejected() {
        let mut ds = DataSet::new();
        ds.put(DataElement::new(tags::PATIENT_ID, VR::LO, "P1"));
        let err = MetadataRecord::from_dataset(&ds, PathBuf::from("/x.dcm"), 1).unwrap_err();
        assert!(matches!(err, IndexError::MissingIdentifier { .. }));
    }

    #[test]
    fn malformed_identifiers_are_rejected() {
        // identifiers name storage paths, so UID syntax is enforced
        // before a record exists at all
        for hostile in ["..", "not-a-uid", "1..2", "S1"] {
            for (study, series, sop) in [
                (hostile, SE1, I1),
                (S1, hostile, I1),
                (S1, SE1, hostile),
            ] {
                let ds = dataset_of(("P1", "DOE^JANE"), study, series, sop);
                let err =
                    MetadataRecord::from_dataset(&ds, PathBuf::from("/x.dcm"), 1).unwrap_err();
                assert!(
                    matches!(err, IndexError::InvalidIdentifier { .. }),
                    "`{hostile}` must not pass as a UID"
                );
            }
        }
    }
}
