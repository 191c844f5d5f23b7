//! The service class user front-end:
//! echo, store, find and move against a remote node.
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info, Level};

use ferrodicom_core::{dictionary, tags, uids, DataElement, DataSet, Tag, VR};
use ferrodicom_pacs::matching::QueryLevel;
use ferrodicom_pacs::scu::{DimseClient, ScuOptions};

/// A DICOM service class user
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// socket address of the peer (example: "127.0.0.1:11112")
    addr: String,
    /// the calling AE title
    #[arg(long = "calling-ae-title", default_value = "FERRO-SCU")]
    calling_ae_title: String,
    /// the called AE title
    #[arg(long = "called-ae-title", default_value = "ANY-SCP")]
    called_ae_title: String,
    /// the maximum PDU length
    #[arg(
        long = "max-pdu-length",
        default_value = "16384",
        value_parser(clap::value_parser!(u32).range(4096..=131_072))
    )]
    max_pdu_length: u32,
    /// verbose mode
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Verify connectivity with C-ECHO
    Echo,
    /// Send DICOM files with C-STORE
    Store {
        /// the DICOM files to send
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Query the peer with C-FIND
    Find {
        /// query terms, e.g. "PatientName=DOE*"
        #[arg(short('q'), required = true)]
        query: Vec<String>,
        /// the query level (PATIENT, STUDY, SERIES, IMAGE)
        #[arg(long, default_value = "STUDY")]
        level: String,
    },
    /// Ask the peer to move matches to another node with C-MOVE
    Move {
        /// the destination AE title
        #[arg(long)]
        destination: String,
        /// query terms, e.g. "StudyInstanceUID=1.2.3"
        #[arg(short('q'), required = true)]
        query: Vec<String>,
        /// the query level (PATIENT, STUDY, SERIES, IMAGE)
        #[arg(long, default_value = "STUDY")]
        level: String,
    },
}

const EXIT_FAILED: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_IO: u8 = 3;

fn main() -> ExitCode {
    let app = App::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_max_level(if app.verbose {
                Level::DEBUG
            } else {
                Level::INFO
            })
            .finish(),
    )
    .unwrap_or_else(|e| eprintln!("ferroscu: {}", e));

    match run(app) {
        Ok(code) => code,
        Err(message) => {
            error!("{}", message);
            ExitCode::from(EXIT_IO)
        }
    }
}

fn run(app: App) -> Result<ExitCode, String> {
    let options = ScuOptions {
        calling_ae_title: app.calling_ae_title.clone(),
        called_ae_title: app.called_ae_title.clone(),
        max_pdu_length: app.max_pdu_length,
        read_timeout: None,
    };

    match app.command {
        Command::Echo => {
            let mut client = connect(&app.addr, &options, &[(uids::VERIFICATION.to_string(), vec![])])?;
            let status = client.echo().map_err(|e| e.to_string())?;
            let _ = client.release();
            if status.is_success() {
                info!("C-ECHO succeeded");
                Ok(ExitCode::SUCCESS)
            } else {
                error!("C-ECHO failed with status {}", status);
                Ok(ExitCode::from(EXIT_FAILED))
            }
        }
        Command::Store { files } => {
            // propose each file's own storage class and coding
            let mut loaded = Vec::new();
            for path in &files {
                loaded.push(load_file(path)?);
            }
            let contexts: Vec<(String, Vec<String>)> = loaded
                .iter()
                .map(|f| (f.sop_class_uid.clone(), vec![f.transfer_syntax_uid.clone()]))
                .collect();
            let mut client = connect(&app.addr, &options, &contexts)?;
            let mut failures = 0u32;
            for file in &loaded {
                match client.store(
                    &file.sop_class_uid,
                    &file.sop_instance_uid,
                    &file.transfer_syntax_uid,
                    &file.dataset,
                ) {
                    Ok(status) if status.is_success() => {
                        info!(sop_instance = file.sop_instance_uid.as_str(), "stored");
                    }
                    Ok(status) => {
                        error!(
                            sop_instance = file.sop_instance_uid.as_str(),
                            "refused with status {}", status
                        );
                        failures += 1;
                    }
                    Err(e) => {
                        error!("store failed: {}", e);
                        failures += 1;
                    }
                }
            }
            let _ = client.release();
            Ok(if failures == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FAILED)
            })
        }
        Command::Find { query, level } => {
            let identifier = build_query(&query, &level)?;
            let model = uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND;
            let mut client = connect(&app.addr, &options, &[(model.to_string(), vec![])])?;
            let (status, matches) = client
                .find(model, &identifier)
                .map_err(|e| e.to_string())?;
            let _ = client.release();
            for (i, identifier) in matches.iter().enumerate() {
                println!("--- match #{} ---", i);
                print_dataset(identifier);
            }
            debug!("final status {}", status);
            if status.is_success() {
                if matches.is_empty() {
                    info!("no results matching query");
                }
                Ok(ExitCode::SUCCESS)
            } else {
                error!("C-FIND terminated with status {}", status);
                Ok(ExitCode::from(EXIT_FAILED))
            }
        }
        Command::Move {
            destination,
            query,
            level,
        } => {
            let identifier = build_query(&query, &level)?;
            let model = uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE;
            let mut client = connect(&app.addr, &options, &[(model.to_string(), vec![])])?;
            let (status, counters) = client
                .move_to(model, &destination, &identifier)
                .map_err(|e| e.to_string())?;
            let _ = client.release();
            info!(
                completed = counters.completed,
                failed = counters.failed,
                warning = counters.warning,
                "C-MOVE finished with status {}",
                status
            );
            Ok(if status.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FAILED)
            })
        }
    }
}

fn connect(
    addr: &str,
    options: &ScuOptions,
    contexts: &[(String, Vec<String>)],
) -> Result<DimseClient, String> {
    debug!("establishing association with {}", addr);
    DimseClient::connect(addr, options, contexts).map_err(|e| e.to_string())
}

struct LoadedFile {
    sop_class_uid: String,
    sop_instance_uid: String,
    transfer_syntax_uid: String,
    dataset: Vec<u8>,
}

/// Read a file envelope and slice out the coded data set.
fn load_file(path: &PathBuf) -> Result<LoadedFile, String> {
    use ferrodicom_encoding::{ByteReader, Endianness};
    use ferrodicom_object::meta::FileMetaTable;

    let bytes = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    if bytes.len() < 132 || &bytes[128..132] != b"DICM" {
        return Err(format!("{}: not a DICOM file", path.display()));
    }
    let mut reader = ByteReader::new(&bytes[132..], Endianness::Little);
    let meta = FileMetaTable::read_from(&mut reader)
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    let dataset = bytes[bytes.len() - reader.remaining()..].to_vec();
    Ok(LoadedFile {
        sop_class_uid: meta.media_storage_sop_class_uid,
        sop_instance_uid: meta.media_storage_sop_instance_uid,
        transfer_syntax_uid: meta.transfer_syntax_uid,
        dataset,
    })
}

/// Build a query identifier from `Keyword=value` terms.
fn build_query(terms: &[String], level: &str) -> Result<DataSet, String> {
    let level =
        QueryLevel::from_keyword(level).ok_or_else(|| format!("unknown query level `{level}`"))?;
    let mut query = DataSet::new();
    for term in terms {
        let (key, value) = term
            .split_once('=')
            .ok_or_else(|| format!("query term `{term}` is not `Keyword=value`"))?;
        let (tag, vr) = resolve_key(key)?;
        query.put(DataElement::new(tag, vr, value));
    }
    query.put(DataElement::new(
        tags::QUERY_RETRIEVE_LEVEL,
        VR::CS,
        level.keyword(),
    ));
    Ok(query)
}

fn resolve_key(key: &str) -> Result<(Tag, VR), String> {
    if let Some(entry) = dictionary::entry_by_name(key) {
        return Ok((entry.tag, entry.vr));
    }
    // fall back to the `gggg,eeee` notation
    if let Some((group, element)) = key.split_once(',') {
        let group = u16::from_str_radix(group, 16);
        let element = u16::from_str_radix(element, 16);
        if let (Ok(group), Ok(element)) = (group, element) {
            let tag = Tag(group, element);
            return Ok((tag, dictionary::vr_of(tag)));
        }
    }
    Err(format!("unknown attribute `{key}`"))
}

fn print_dataset(dataset: &DataSet) {
    for elem in dataset.iter() {
        let name = dictionary::entry(elem.tag())
            .map(|e| e.name)
            .unwrap_or("(unknown)");
        println!("{} {} {}: {}", elem.tag(), elem.vr(), name, elem.to_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        App::command().debug_assert();
    }

    #[test]
    fn query_terms_resolve_by_keyword_and_tag() {
        let query = build_query(
            &["PatientName=DOE*".to_string(), "0020,000D=1.2.3".to_string()],
            "STUDY",
        )
        .unwrap();
        assert_eq!(query.string(tags::PATIENT_NAME).unwrap(), "DOE*");
        assert_eq!(query.uid(tags::STUDY_INSTANCE_UID).unwrap(), "1.2.3");
        assert_eq!(query.string(tags::QUERY_RETRIEVE_LEVEL).unwrap(), "STUDY");

        assert!(build_query(&["NotAThing=1".to_string()], "STUDY").is_err());
        assert!(build_query(&[], "VOLUME").is_err());
    }
}
