// Pinned wire vectors: these bytes are the on-the-wire contract and must
// not drift between releases.
use bytes::Bytes;
use prost::Message as _;
use souk_wire::{ComparisonOperator, FilterCondition, Frame, WindowConfig};

#[test]
fn window_config_matches_pinned_bytes() {
    let config = WindowConfig {
        window_size: 3,
        aggregation_type: "avg".into(),
    };
    let payload = config.encode_to_vec();
    assert_eq!(payload, hex_to_bytes("08031203617667"));

    // Framed: 32-bit big-endian length, then the payload.
    let frame = Frame::new(Bytes::from(payload)).expect("frame");
    assert_eq!(frame.encode().as_ref(), hex_to_bytes("0000000708031203617667"));
}

#[test]
fn filter_condition_matches_pinned_bytes() {
    let condition = FilterCondition {
        field_name: "price".into(),
        operator: ComparisonOperator::Gt as i32,
        value: "50".into(),
        is_windowed: false,
    };
    // Default-valued fields (is_windowed=false) are omitted on the wire.
    assert_eq!(
        condition.encode_to_vec(),
        hex_to_bytes("0a05707269636510021a023530")
    );

    let decoded =
        FilterCondition::decode(Bytes::from(hex_to_bytes("0a05707269636510021a023530")))
            .expect("decode");
    assert_eq!(decoded, condition);
}

#[test]
fn decoder_ignores_field_order_and_unknown_tags() {
    // Same WindowConfig with fields reversed and a trailing unknown varint
    // field (tag 9, value 1).
    let reordered = hex_to_bytes("120361766708034801");
    let decoded = WindowConfig::decode(Bytes::from(reordered)).expect("decode");
    assert_eq!(decoded.window_size, 3);
    assert_eq!(decoded.aggregation_type, "avg");
}

fn hex_to_bytes(hex: &str) -> Vec<u8> {
    assert!(hex.len() % 2 == 0, "hex length must be even");
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = from_hex_char(pair[0]) << 4;
            let lo = from_hex_char(pair[1]);
            hi | lo
        })
        .collect()
}

fn from_hex_char(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => panic!("invalid hex char"),
    }
}
