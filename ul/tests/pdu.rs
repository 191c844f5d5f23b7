//! Round-trip tests for the PDU codec.
use ferrodicom_ul::pdu::{
    read_pdu, write_pdu, AbortServiceProviderReason, AbortSource, AssociationAc, AssociationRj,
    AssociationRjResult, AssociationRjSource, AssociationRq, PDataValue, PDataValueType, Pdu,
    PresentationContextProposed, PresentationContextResult, PresentationContextResultReason,
    ServiceUserReason, UserVariableItem, MINIMUM_PDU_SIZE,
};

fn roundtrip(pdu: &Pdu) -> Pdu {
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, pdu).expect("writing should succeed");
    let mut cursor = &bytes[..];
    read_pdu(&mut cursor, MINIMUM_PDU_SIZE, false).expect("reading should succeed")
}

#[test]
fn association_rq_roundtrip() {
    let pdu = Pdu::AssociationRq(AssociationRq {
        protocol_version: 1,
        calling_ae_title: "STORE-SCU".to_string(),
        called_ae_title: "MAIN-PACS".to_string(),
        application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
        presentation_contexts: vec![
            PresentationContextProposed {
                id: 1,
                abstract_syntax: "1.2.840.10008.1.1".to_string(),
                transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
            },
            PresentationContextProposed {
                id: 3,
                abstract_syntax: "1.2.840.10008.5.1.4.1.1.2".to_string(),
                transfer_syntaxes: vec![
                    "1.2.840.10008.1.2.1".to_string(),
                    "1.2.840.10008.1.2".to_string(),
                ],
            },
        ],
        user_variables: vec![
            UserVariableItem::MaxLength(16_384),
            UserVariableItem::ImplementationClassUid("1.2.826.0.1.3680043.10.594.1".to_string()),
            UserVariableItem::ImplementationVersionName("FERRODICOM_031".to_string()),
        ],
    });
    assert_eq!(roundtrip(&pdu), pdu);
}

#[test]
fn association_ac_roundtrip() {
    let pdu = Pdu::AssociationAc(AssociationAc {
        protocol_version: 1,
        calling_ae_title: "STORE-SCU".to_string(),
        called_ae_title: "MAIN-PACS".to_string(),
        application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
        presentation_contexts: vec![
            PresentationContextResult {
                id: 1,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: "1.2.840.10008.1.2".to_string(),
            },
            PresentationContextResult {
                id: 3,
                reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                transfer_syntax: "1.2.840.10008.1.2".to_string(),
            },
        ],
        user_variables: vec![UserVariableItem::MaxLength(32_768)],
    });
    assert_eq!(roundtrip(&pdu), pdu);
}

#[test]
fn association_rj_roundtrip() {
    let pdu = Pdu::AssociationRj(AssociationRj {
        result: AssociationRjResult::Permanent,
        source: AssociationRjSource::ServiceUser(
            ServiceUserReason::CallingAeTitleNotRecognized,
        ),
    });
    let back = roundtrip(&pdu);
    assert_eq!(back, pdu);

    // the wire form carries result=1 source=1 reason=3
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &pdu).unwrap();
    assert_eq!(&bytes[6..10], &[0x00, 0x01, 0x01, 0x03]);
}

#[test]
fn pdata_roundtrip() {
    let pdu = Pdu::PData {
        data: vec![
            PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Command,
                is_last: true,
                data: vec![8; 32],
            },
            PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Data,
                is_last: false,
                data: vec![42; 64],
            },
        ],
    };
    assert_eq!(roundtrip(&pdu), pdu);
}

#[test]
fn release_and_abort_roundtrip() {
    assert_eq!(roundtrip(&Pdu::ReleaseRq), Pdu::ReleaseRq);
    assert_eq!(roundtrip(&Pdu::ReleaseRp), Pdu::ReleaseRp);

    let abort = Pdu::AbortRq {
        source: AbortSource::ServiceProvider(AbortServiceProviderReason::UnexpectedPdu),
    };
    assert_eq!(roundtrip(&abort), abort);
}

#[test]
fn pdu_length_is_big_endian() {
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &Pdu::ReleaseRq).unwrap();
    assert_eq!(bytes[0], 0x05);
    assert_eq!(&bytes[2..6], &[0x00, 0x00, 0x00, 0x04]);
}

#[test]
fn oversized_pdu_is_rejected_in_strict_mode() {
    let pdu = Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Data,
            is_last: true,
            data: vec![0; MINIMUM_PDU_SIZE as usize + 64],
        }],
    };
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &pdu).unwrap();
    let mut cursor = &bytes[..];
    let err = read_pdu(&mut cursor, MINIMUM_PDU_SIZE, true).unwrap_err();
    assert!(matches!(
        err,
        ferrodicom_ul::pdu::reader::Error::PduTooLarge { .. }
    ));
}

#[test]
fn end_of_stream_means_no_pdu() {
    let mut cursor: &[u8] = &[];
    let err = read_pdu(&mut cursor, MINIMUM_PDU_SIZE, true).unwrap_err();
    assert!(matches!(
        err,
        ferrodicom_ul::pdu::reader::Error::NoPduAvailable
    ));
}
