//! End-to-end service scenarios against an in-process server.
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use ferrodicom_core::{tags, uids, DataElement, DataSet, VR};
use ferrodicom_dimse::Status;
use ferrodicom_encoding::encode;
use ferrodicom_pacs::config::Config;
use ferrodicom_pacs::matching::QueryLevel;
use ferrodicom_pacs::scu::{DimseClient, ScuOptions};
use ferrodicom_pacs::PacsServer;
use ferrodicom_ul::association::Error as AssociationError;
use ferrodicom_ul::pdu::{AssociationRjSource, ServiceUserReason};

const EXPLICIT_LE: &str = "1.2.840.10008.1.2.1";
const STUDY_1: &str = "1.2.111.1";
const SERIES_1: &str = "1.2.111.1.1";

fn start_server(mut config: Config, data_dir: &tempfile::TempDir) -> (PacsServer, SocketAddr) {
    config.data_directory = data_dir.path().to_path_buf();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    config.port = addr.port();
    let server = PacsServer::new(config).expect("server setup");
    let serving = server.clone();
    std::thread::spawn(move || serving.serve(listener));
    (server, addr)
}

fn scu_options() -> ScuOptions {
    ScuOptions {
        calling_ae_title: "TEST-SCU".to_string(),
        called_ae_title: "FERROPACS".to_string(),
        max_pdu_length: 16_384,
        read_timeout: Some(Duration::from_secs(10)),
    }
}

fn ct_dataset(patient_id: &str, name: &str, study: &str, series: &str, sop: &str) -> DataSet {
    let mut ds = DataSet::new();
    ds.put(DataElement::new(
        tags::SOP_CLASS_UID,
        VR::UI,
        uids::CT_IMAGE_STORAGE,
    ));
    ds.put(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, sop));
    ds.put(DataElement::new(tags::PATIENT_ID, VR::LO, patient_id));
    ds.put(DataElement::new(tags::PATIENT_NAME, VR::PN, name));
    ds.put(DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, study));
    ds.put(DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, series));
    ds.put(DataElement::new(tags::MODALITY, VR::CS, "CT"));
    ds
}

fn store_one(addr: SocketAddr, dataset: &DataSet) -> Status {
    let mut client = DimseClient::connect(
        addr,
        &scu_options(),
        &[(uids::CT_IMAGE_STORAGE.to_string(), vec![])],
    )
    .expect("association");
    let bytes = encode::write_dataset_by_uid(dataset, EXPLICIT_LE).expect("encode");
    let status = client
        .store(
            uids::CT_IMAGE_STORAGE,
            &dataset.uid(tags::SOP_INSTANCE_UID).unwrap().to_string(),
            EXPLICIT_LE,
            &bytes,
        )
        .expect("store exchange");
    client.release().expect("release");
    status
}

fn query(level: QueryLevel, keys: Vec<DataElement>) -> DataSet {
    let mut q = DataSet::new();
    q.put(DataElement::new(
        tags::QUERY_RETRIEVE_LEVEL,
        VR::CS,
        level.keyword(),
    ));
    for key in keys {
        q.put(key);
    }
    q
}

#[test]
fn echo_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (_server, addr) = start_server(Config::default(), &dir);

    let mut client = DimseClient::connect(
        addr,
        &scu_options(),
        &[(uids::VERIFICATION.to_string(), vec![])],
    )
    .expect("association");
    let status = client.echo().expect("echo exchange");
    assert_eq!(status, Status::SUCCESS);
    client.release().expect("release");
}

#[test]
fn store_then_find_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (server, addr) = start_server(Config::default(), &dir);

    let status = store_one(addr, &ct_dataset("P1", "DOE^JANE", STUDY_1, SERIES_1, "1.2.3"));
    assert_eq!(status, Status::SUCCESS);

    // the instance landed in storage and in the index
    {
        let index = server.index().lock().unwrap();
        let record = index.instance("1.2.3").expect("indexed instance");
        assert!(record.path.exists());
        assert!(record.path.starts_with(dir.path()));
    }
    assert_eq!(server.stats().snapshot().instances_stored, 1);

    // a later session queries at study level
    let mut client = DimseClient::connect(
        addr,
        &scu_options(),
        &[(
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND.to_string(),
            vec![],
        )],
    )
    .expect("association");
    let (status, matches) = client
        .find(
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
            &query(
                QueryLevel::Study,
                vec![
                    DataElement::new(tags::PATIENT_ID, VR::LO, "P1"),
                    DataElement::empty(tags::STUDY_INSTANCE_UID, VR::UI),
                    DataElement::empty(tags::STUDY_DATE, VR::DA),
                ],
            ),
        )
        .expect("find exchange");
    client.release().expect("release");

    assert_eq!(status, Status::SUCCESS);
    assert_eq!(matches.len(), 1);
    let found = &matches[0];
    assert_eq!(found.string(tags::PATIENT_ID).unwrap(), "P1");
    assert_eq!(found.uid(tags::STUDY_INSTANCE_UID).unwrap(), STUDY_1);
    assert_eq!(found.string(tags::STUDY_DATE).unwrap(), "");
}

#[test]
fn wildcard_find_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (_server, addr) = start_server(Config::default(), &dir);

    for (i, (id, name)) in [
        ("P1", "SMITH^JOHN"),
        ("P2", "smith^jane"),
        ("P3", "DOE^JANE"),
    ]
    .iter()
    .enumerate()
    {
        let sop = format!("1.2.3.{}", i);
        let study = format!("2.2.{}", i);
        let series = format!("3.3.{}", i);
        let status = store_one(addr, &ct_dataset(id, name, &study, &series, &sop));
        assert_eq!(status, Status::SUCCESS);
    }

    let mut client = DimseClient::connect(
        addr,
        &scu_options(),
        &[(
            uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND.to_string(),
            vec![],
        )],
    )
    .expect("association");
    let (status, matches) = client
        .find(
            uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
            &query(
                QueryLevel::Patient,
                vec![DataElement::new(tags::PATIENT_NAME, VR::PN, "smith*")],
            ),
        )
        .expect("find exchange");
    client.release().expect("release");

    assert_eq!(status, Status::SUCCESS);
    let mut names: Vec<String> = matches
        .iter()
        .map(|m| m.string(tags::PATIENT_NAME).unwrap().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["SMITH^JOHN".to_string(), "smith^jane".to_string()]);
}

#[test]
fn move_scenario() {
    let source_dir = tempfile::tempdir().unwrap();
    let dest_dir = tempfile::tempdir().unwrap();

    // the destination node the mover will store into
    let (dest_server, dest_addr) = start_server(Config::default(), &dest_dir);

    let mut config = Config::default();
    config
        .move_destinations
        .insert("NEARBY".to_string(), dest_addr.to_string());
    let (_server, addr) = start_server(config, &source_dir);

    let status = store_one(addr, &ct_dataset("P1", "DOE^JANE", STUDY_1, SERIES_1, "1.2.3"));
    assert_eq!(status, Status::SUCCESS);

    let mut client = DimseClient::connect(
        addr,
        &scu_options(),
        &[(
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE.to_string(),
            vec![],
        )],
    )
    .expect("association");
    let (status, counters) = client
        .move_to(
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
            "NEARBY",
            &query(
                QueryLevel::Study,
                vec![DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, STUDY_1)],
            ),
        )
        .expect("move exchange");
    client.release().expect("release");

    assert_eq!(status, Status::SUCCESS);
    assert_eq!(counters.remaining, 0);
    assert_eq!(counters.completed, 1);
    assert_eq!(counters.failed, 0);

    // the destination now holds the instance
    let index = dest_server.index().lock().unwrap();
    assert!(index.instance("1.2.3").is_some());
}

#[test]
fn move_to_unknown_destination_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (_server, addr) = start_server(Config::default(), &dir);

    store_one(addr, &ct_dataset("P1", "DOE^JANE", STUDY_1, SERIES_1, "1.2.3"));

    let mut client = DimseClient::connect(
        addr,
        &scu_options(),
        &[(
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE.to_string(),
            vec![],
        )],
    )
    .expect("association");
    let (status, counters) = client
        .move_to(
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
            "NOWHERE",
            &query(
                QueryLevel::Study,
                vec![DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, STUDY_1)],
            ),
        )
        .expect("move exchange");
    client.release().expect("release");

    assert_eq!(status, Status::MOVE_DESTINATION_UNKNOWN);
    assert_eq!(counters.completed, 0);
}

#[test]
fn get_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (_server, addr) = start_server(Config::default(), &dir);

    let dataset = ct_dataset("P1", "DOE^JANE", STUDY_1, SERIES_1, "1.2.3");
    assert_eq!(store_one(addr, &dataset), Status::SUCCESS);

    // the requester negotiates the storage class inbound
    let mut client = DimseClient::connect(
        addr,
        &scu_options(),
        &[
            (
                uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET.to_string(),
                vec![],
            ),
            (uids::CT_IMAGE_STORAGE.to_string(), vec![]),
        ],
    )
    .expect("association");
    let (status, counters, retrieved) = client
        .get(
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET,
            &query(
                QueryLevel::Study,
                vec![DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, STUDY_1)],
            ),
        )
        .expect("get exchange");
    client.release().expect("release");

    assert_eq!(status, Status::SUCCESS);
    assert_eq!(counters.completed, 1);
    assert_eq!(retrieved.len(), 1);
    assert_eq!(retrieved[0].sop_instance_uid, "1.2.3");
    let roundtripped = ferrodicom_encoding::decode::read_dataset_by_uid(
        &retrieved[0].dataset,
        &retrieved[0].transfer_syntax_uid,
    )
    .expect("decode retrieved instance");
    assert_eq!(roundtripped, dataset);
}

#[test]
fn rejected_calling_ae_title_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.allowed_calling_ae_titles = vec!["GOOD".to_string()];
    let (server, addr) = start_server(config, &dir);

    let mut options = scu_options();
    options.calling_ae_title = "BAD".to_string();
    let outcome = DimseClient::connect(
        addr,
        &options,
        &[(uids::VERIFICATION.to_string(), vec![])],
    );
    match outcome {
        Err(ferrodicom_pacs::scu::ScuError::Association {
            source: AssociationError::Rejected { rejection },
        }) => {
            assert_eq!(
                rejection.source,
                AssociationRjSource::ServiceUser(
                    ServiceUserReason::CallingAeTitleNotRecognized
                )
            );
        }
        other => panic!("expected a rejection, got {:?}", other.err()),
    }

    // an allowed caller passes
    let mut options = scu_options();
    options.calling_ae_title = "GOOD".to_string();
    let mut client = DimseClient::connect(
        addr,
        &options,
        &[(uids::VERIFICATION.to_string(), vec![])],
    )
    .expect("association");
    assert_eq!(client.echo().expect("echo exchange"), Status::SUCCESS);
    client.release().expect("release");

    // no session state is retained for the rejected peer
    assert_eq!(server.index().lock().unwrap().instance_count(), 0);
}
