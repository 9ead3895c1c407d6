#![cfg(test)]

use super::*;

#[test]
fn integer_accessors_cross_widths() {
    let mut metadata = Metadata::new();
    metadata.insert("a", MetadataValue::U64(7));
    metadata.insert("b", MetadataValue::I32(-1));
    metadata.insert("c", MetadataValue::U8(3));

    assert_eq!(metadata.get_u32("a"), Some(7));
    assert_eq!(metadata.get_u32("b"), None);
    assert_eq!(metadata.get_u32("c"), Some(3));
    assert_eq!(metadata.get_f32("b"), Some(-1.0));
}

#[test]
fn wrong_type_reads_as_absent() {
    let metadata: Metadata = [("general.name", "tiny")].into_iter().collect();
    assert_eq!(metadata.get_u32("general.name"), None);
    assert_eq!(metadata.get_string("general.name"), Some("tiny"));
    assert_eq!(metadata.get_string("missing"), None);
}

#[test]
fn find_containing_is_deterministic() {
    let mut metadata = Metadata::new();
    metadata.insert("llama.attention.layer_norm_rms_epsilon", 1e-6f32);
    metadata.insert("aaa.epsilon_shadow", 1e-3f32);

    let (key, value) = metadata.find_containing("epsilon").expect("epsilon key");
    assert_eq!(key, "aaa.epsilon_shadow");
    assert_eq!(value.as_f32(), Some(1e-3));
}

#[test]
fn string_arrays_reject_mixed_elements() {
    let mut metadata = Metadata::new();
    metadata.insert("tokens", vec!["a", "b"]);
    metadata.insert("mixed", MetadataValue::Array(vec!["a".into(), MetadataValue::U32(1)]));

    assert_eq!(metadata.get_string_array("tokens"), Some(vec!["a", "b"]));
    assert_eq!(metadata.get_string_array("mixed"), None);
}
