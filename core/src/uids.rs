//! Constants for the SOP class and well-known UIDs this toolkit serves.

/// DICOM application context name
pub const APPLICATION_CONTEXT_NAME: &str = "1.2.840.10008.3.1.1.1";

/// The implementation class UID of this toolkit
pub const IMPLEMENTATION_CLASS_UID: &str = "1.2.826.0.1.3680043.10.594.1";
/// The implementation version name of this toolkit
pub const IMPLEMENTATION_VERSION_NAME: &str = "FERRODICOM_031";

/// Verification SOP Class
pub const VERIFICATION: &str = "1.2.840.10008.1.1";

/// Computed Radiography Image Storage
pub const COMPUTED_RADIOGRAPHY_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.1";
/// CT Image Storage
pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
/// MR Image Storage
pub const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
/// Ultrasound Image Storage
pub const ULTRASOUND_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.6.1";
/// Secondary Capture Image Storage
pub const SECONDARY_CAPTURE_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7";
/// Positron Emission Tomography Image Storage
pub const POSITRON_EMISSION_TOMOGRAPHY_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.128";

/// Patient Root Query/Retrieve Information Model - FIND
pub const PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND: &str = "1.2.840.10008.5.1.4.1.2.1.1";
/// Patient Root Query/Retrieve Information Model - MOVE
pub const PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE: &str = "1.2.840.10008.5.1.4.1.2.1.2";
/// Patient Root Query/Retrieve Information Model - GET
pub const PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET: &str = "1.2.840.10008.5.1.4.1.2.1.3";
/// Study Root Query/Retrieve Information Model - FIND
pub const STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND: &str = "1.2.840.10008.5.1.4.1.2.2.1";
/// Study Root Query/Retrieve Information Model - MOVE
pub const STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE: &str = "1.2.840.10008.5.1.4.1.2.2.2";
/// Study Root Query/Retrieve Information Model - GET
pub const STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET: &str = "1.2.840.10008.5.1.4.1.2.2.3";

/// The storage SOP classes accepted by default.
pub const STORAGE_SOP_CLASSES: &[&str] = &[
    COMPUTED_RADIOGRAPHY_IMAGE_STORAGE,
    CT_IMAGE_STORAGE,
    MR_IMAGE_STORAGE,
    ULTRASOUND_IMAGE_STORAGE,
    SECONDARY_CAPTURE_IMAGE_STORAGE,
    POSITRON_EMISSION_TOMOGRAPHY_IMAGE_STORAGE,
];

/// The query/retrieve SOP classes served by the server.
pub const QUERY_RETRIEVE_SOP_CLASSES: &[&str] = &[
    PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
    PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
    PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET,
    STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
    STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
    STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET,
];

/// Whether the given UID identifies a storage SOP class known to this toolkit.
pub fn is_storage_sop_class(uid: &str) -> bool {
    STORAGE_SOP_CLASSES.contains(&crate::trim_uid(uid))
}
