//! Fragmentation of message payloads into presentation data values.
use crate::pdu::{PDataValue, PDataValueType, Pdu};

/// The overhead of a presentation data value item inside a P-DATA-TF:
/// 32-bit item length, context id, and the message control header.
const PDV_OVERHEAD: u32 = 6;

/// Split a message payload into P-DATA-TF PDUs,
/// none of which exceeds the peer's maximum PDU body length.
///
/// Each resulting PDU carries a single presentation data value;
/// command and data payloads are therefore never mixed in one PDU.
/// The last fragment carries the last-fragment flag.
pub fn fragment_pdvs(
    presentation_context_id: u8,
    value_type: PDataValueType,
    payload: &[u8],
    max_pdu_length: u32,
) -> Vec<Pdu> {
    let max_data = (max_pdu_length.saturating_sub(PDV_OVERHEAD)).max(1) as usize;
    let mut pdus = Vec::with_capacity(payload.len() / max_data + 1);
    let mut chunks = payload.chunks(max_data).peekable();
    if chunks.peek().is_none() {
        // zero-length payloads still need one last fragment
        return vec![Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type,
                is_last: true,
                data: Vec::new(),
            }],
        }];
    }
    while let Some(chunk) = chunks.next() {
        pdus.push(Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type,
                is_last: chunks.peek().is_none(),
                data: chunk.to_vec(),
            }],
        });
    }
    pdus
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_len(pdu: &Pdu) -> usize {
        match pdu {
            Pdu::PData { data } => data.iter().map(|pdv| pdv.data.len() + 6).sum(),
            _ => panic!("not a P-DATA-TF"),
        }
    }

    #[test]
    fn no_fragment_exceeds_the_limit() {
        let payload: Vec<u8> = (0..60_000u32).map(|i| i as u8).collect();
        let max_pdu = 16_384;
        let pdus = fragment_pdvs(3, PDataValueType::Data, &payload, max_pdu);
        assert!(pdus.len() > 1);
        for pdu in &pdus {
            assert!(body_len(pdu) <= max_pdu as usize);
        }
    }

    #[test]
    fn reassembly_restores_the_payload() {
        let payload: Vec<u8> = (0..50_001u32).map(|i| (i % 251) as u8).collect();
        let pdus = fragment_pdvs(5, PDataValueType::Command, &payload, 4096);
        let mut assembled = Vec::new();
        let mut saw_last = false;
        for pdu in &pdus {
            let Pdu::PData { data } = pdu else {
                panic!("not a P-DATA-TF")
            };
            for pdv in data {
                assert!(!saw_last, "fragment after the last fragment");
                assert_eq!(pdv.presentation_context_id, 5);
                assert_eq!(pdv.value_type, PDataValueType::Command);
                assembled.extend_from_slice(&pdv.data);
                saw_last = pdv.is_last;
            }
        }
        assert!(saw_last);
        assert_eq!(assembled, payload);
    }

    #[test]
    fn empty_payload_yields_a_single_last_fragment() {
        let pdus = fragment_pdvs(1, PDataValueType::Data, &[], 4096);
        assert_eq!(pdus.len(), 1);
        let Pdu::PData { data } = &pdus[0] else {
            panic!("not a P-DATA-TF")
        };
        assert_eq!(data.len(), 1);
        assert!(data[0].is_last);
        assert!(data[0].data.is_empty());
    }
}
