use super::*;

fn sample_message() -> PoetProofMessage {
    let opening = Opening {
        index: 5,
        label: [7u8; LABEL_SIZE],
        parent_labels: vec![[1u8; LABEL_SIZE], [2u8; LABEL_SIZE]],
        merkle_path: vec![[3u8; LABEL_SIZE], [4u8; LABEL_SIZE], [5u8; LABEL_SIZE]],
    };
    PoetProofMessage::new(
        RoundId(42),
        [9u8; LABEL_SIZE],
        vec![b"alice".to_vec(), b"bob".to_vec()],
        Proof {
            phi: [8u8; LABEL_SIZE],
            openings: vec![opening],
        },
    )
}

#[test]
fn proof_message_survives_wire_codec() {
    let message = sample_message();
    let bytes = message.to_bytes().unwrap();
    assert_eq!(bytes[0], WIRE_VERSION);

    let decoded = PoetProofMessage::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, message);
    assert_eq!(decoded.round_id, "42");
}

#[test]
fn proof_message_rejects_unknown_version() {
    let mut bytes = sample_message().to_bytes().unwrap();
    bytes[0] = WIRE_VERSION + 1;
    let err = PoetProofMessage::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err, WireError::UnsupportedVersion { found, .. } if found == WIRE_VERSION + 1));

    assert!(matches!(
        PoetProofMessage::from_bytes(&[]),
        Err(WireError::Empty)
    ));
}

#[test]
fn proof_message_rejects_truncated_body() {
    let bytes = sample_message().to_bytes().unwrap();
    assert!(PoetProofMessage::from_bytes(&bytes[..bytes.len() - 3]).is_err());
}

#[test]
fn challenge_is_sorted_and_deduplicated() {
    let challenge = Challenge::new(vec![9, 3, 3, 7, 1, 9]);
    assert_eq!(challenge.indices(), &[1, 3, 7, 9]);
    assert_eq!(challenge.len(), 4);
    assert!(challenge.contains(7));
    assert!(!challenge.contains(2));
    assert!(Challenge::default().is_empty());
}

#[test]
fn round_id_orders_and_parses() {
    let a = RoundId(9);
    let b = a.next();
    assert!(b > a);
    assert_eq!(b.to_string(), "10");
    assert_eq!("10".parse::<RoundId>().unwrap(), b);
    assert_eq!(RoundId::from_be_bytes(b.to_be_bytes()), b);
    assert!(a.to_be_bytes() < b.to_be_bytes());
}

#[test]
fn label_from_slice_requires_exact_width() {
    assert!(label_from_slice(&[0u8; LABEL_SIZE]).is_some());
    assert!(label_from_slice(&[0u8; LABEL_SIZE - 1]).is_none());
    assert_eq!(short_hex(&[0xab; LABEL_SIZE]), "abababababab");
}

#[test]
fn challenge_serializes_as_plain_index_list() {
    let challenge = Challenge::new(vec![4, 2]);
    let json = serde_json::to_string(&challenge).unwrap();
    assert_eq!(json, r#"{"indices":[2,4]}"#);
}
