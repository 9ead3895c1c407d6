#![cfg(test)]

use super::*;

fn info(dtype: GgufDtype, shape: &[usize]) -> TensorInfo {
    TensorInfo {
        name: "t".to_string(),
        shape: shape.to_vec(),
        dtype,
        offset: 0,
    }
}

#[test]
fn f16_widens_exactly() {
    let values = [1.0f32, -2.5, 0.0, 65504.0];
    let bytes: Vec<u8> = values.iter().flat_map(|v| f16::from_f32(*v).to_le_bytes()).collect();
    let widened = widen_to_f32(&info(GgufDtype::F16, &[4]), &bytes).unwrap();
    assert_eq!(widened, values);
}

#[test]
fn bf16_widens() {
    let bytes: Vec<u8> = [bf16::from_f32(3.0), bf16::from_f32(-0.5)].iter().flat_map(|v| v.to_le_bytes()).collect();
    assert_eq!(widen_to_f32(&info(GgufDtype::BF16, &[2]), &bytes).unwrap(), vec![3.0, -0.5]);
}

#[test]
fn signed_integers_keep_sign() {
    let bytes: Vec<u8> = [-3i32, 7].iter().flat_map(|v| v.to_le_bytes()).collect();
    assert_eq!(widen_to_f32(&info(GgufDtype::I32, &[2]), &bytes).unwrap(), vec![-3.0, 7.0]);
    assert_eq!(widen_to_f32(&info(GgufDtype::I8, &[2]), &[0xff, 0x02]).unwrap(), vec![-1.0, 2.0]);
}

#[test]
fn quantized_tensors_are_rejected() {
    let err = widen_to_f32(&info(GgufDtype::from_u32(8), &[32]), &[0u8; 34]).unwrap_err();
    assert!(matches!(err, LoaderError::UnsupportedDtype { dtype: GgufDtype::Quantized(8), .. }));
}

#[test]
fn byte_length_mismatch_is_reported() {
    let err = widen_to_f32(&info(GgufDtype::F32, &[2, 2]), &[0u8; 12]).unwrap_err();
    assert!(matches!(err, LoaderError::InvalidData(_)));
}

#[test]
fn dtype_tags_round_trip_for_plain_encodings() {
    for dtype in [GgufDtype::F32, GgufDtype::F16, GgufDtype::BF16, GgufDtype::F64, GgufDtype::I8, GgufDtype::I64] {
        assert_eq!(GgufDtype::from_u32(dtype.to_u32()), dtype);
    }
    assert_eq!(GgufDtype::from_u32(99), GgufDtype::Unknown(99));
}

#[test]
fn overflowing_shapes_are_errors() {
    let huge = info(GgufDtype::F32, &[1 << 62, 8]);
    assert!(matches!(huge.element_count(), Err(LoaderError::InvalidData(_))));
    assert!(matches!(huge.byte_len(), Err(LoaderError::InvalidData(_))));

    // The element count fits but the byte length does not.
    let wide = info(GgufDtype::F32, &[1 << 62, 2]);
    assert_eq!(wide.element_count().unwrap(), 1 << 63);
    assert!(matches!(wide.byte_len(), Err(LoaderError::InvalidData(_))));
}
