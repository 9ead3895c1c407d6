use rand::{Rng, SeedableRng, rngs::StdRng};
use vellum_loader::{GgufDtype, GgufFile, GgufWriter, LoaderError, TensorTable};

#[test]
fn written_file_reads_back_through_mmap() {
    let mut rng = StdRng::seed_from_u64(7);
    let weights: Vec<f32> = (0..6 * 4).map(|_| rng.random_range(-1.0..1.0)).collect();
    let gain: Vec<f32> = (0..4).map(|i| i as f32 * 0.5).collect();

    let path = std::env::temp_dir().join(format!("vellum-loader-{}.gguf", std::process::id()));
    GgufWriter::new()
        .metadata("general.architecture", "llama")
        .metadata("llama.block_count", 1u32)
        .metadata("llama.attention.layer_norm_rms_epsilon", 1e-5f32)
        .metadata("tokenizer.ggml.tokens", vec!["a", "b", "c"])
        .tensor_f32("blk.0.attn_q.weight", &[6, 4], &weights)
        .tensor_f16("blk.0.attn_norm.weight", &[4], &gain)
        .write_to(&path)
        .expect("write gguf");

    let file = GgufFile::open(&path).expect("open gguf");
    std::fs::remove_file(&path).ok();

    assert_eq!(file.version(), 3);
    let metadata = file.metadata();
    assert_eq!(metadata.get_string("general.architecture"), Some("llama"));
    assert_eq!(metadata.get_u32("llama.block_count"), Some(1));
    assert_eq!(metadata.get_string_array("tokenizer.ggml.tokens"), Some(vec!["a", "b", "c"]));

    let info = file.tensor_info("blk.0.attn_q.weight").expect("tensor present");
    assert_eq!(info.shape, vec![6, 4]);
    assert_eq!(info.dtype, GgufDtype::F32);
    assert_eq!(file.tensor_f32("blk.0.attn_q.weight").unwrap(), weights);
    assert_eq!(file.tensor_f32("blk.0.attn_norm.weight").unwrap(), gain);
    assert_eq!(file.tensor_names(), vec!["blk.0.attn_q.weight", "blk.0.attn_norm.weight"]);
}

#[test]
fn custom_alignment_is_respected() {
    let bytes = GgufWriter::new()
        .metadata("general.alignment", 64u32)
        .tensor_f32("a", &[3], &[1.0, 2.0, 3.0])
        .tensor_f32("b", &[2], &[4.0, 5.0])
        .to_bytes()
        .unwrap();
    let file = GgufFile::from_bytes(bytes).unwrap();
    assert_eq!(file.tensor_info("b").unwrap().offset, 64);
    assert_eq!(file.tensor_f32("b").unwrap(), vec![4.0, 5.0]);
}

#[test]
fn bad_magic_is_rejected() {
    let err = GgufFile::from_bytes(b"GGML\x03\0\0\0".to_vec()).unwrap_err();
    assert!(matches!(err, LoaderError::InvalidMagic(m) if &m == b"GGML"));
}

#[test]
fn unsupported_version_is_rejected() {
    let mut bytes = GgufWriter::new().to_bytes().unwrap();
    bytes[4] = 1;
    assert!(matches!(GgufFile::from_bytes(bytes), Err(LoaderError::UnsupportedVersion(1))));
}

#[test]
fn truncated_header_is_an_io_error() {
    let bytes = GgufWriter::new().metadata("general.name", "x").to_bytes().unwrap();
    let truncated = bytes[..30].to_vec();
    assert!(GgufFile::from_bytes(truncated).is_err());
}

#[test]
fn quantized_tensor_reports_unsupported_dtype() {
    let bytes = GgufWriter::new()
        .tensor_raw("q", &[32], GgufDtype::from_u32(8), vec![0u8; 34])
        .to_bytes()
        .unwrap();
    let file = GgufFile::from_bytes(bytes).unwrap();
    match file.tensor_f32("q") {
        Err(LoaderError::UnsupportedDtype { name, dtype }) => {
            assert_eq!(name, "q");
            assert_eq!(dtype, GgufDtype::Quantized(8));
        }
        other => panic!("expected unsupported dtype, got {other:?}"),
    }
}

#[test]
fn missing_tensor_is_reported_by_name() {
    let file = GgufFile::from_bytes(GgufWriter::new().to_bytes().unwrap()).unwrap();
    assert!(matches!(file.tensor_f32("token_embd.weight"), Err(LoaderError::TensorNotFound(n)) if n == "token_embd.weight"));
    assert!(!file.has_tensor("token_embd.weight"));
    assert!(file.metadata().get("missing").is_none());
}

#[test]
fn overflowing_shape_is_a_load_error() {
    let bytes = GgufWriter::new().tensor_f32("t", &[1 << 62, 8], &[0.0; 8]).to_bytes().unwrap();
    let file = GgufFile::from_bytes(bytes).unwrap();
    assert!(matches!(file.tensor_f32("t"), Err(LoaderError::InvalidData(_))));
}

#[test]
fn overflowing_offset_is_a_load_error() {
    let mut bytes = GgufWriter::new().tensor_f32("t", &[2], &[1.0, 2.0]).to_bytes().unwrap();
    // magic, version, two counts, then name length + "t", n_dims, one dim and the dtype tag.
    let offset_at = 4 + 4 + 8 + 8 + 8 + 1 + 4 + 8 + 4;
    bytes[offset_at..offset_at + 8].copy_from_slice(&u64::MAX.to_le_bytes());

    let file = GgufFile::from_bytes(bytes).unwrap();
    assert_eq!(file.tensor_info("t").unwrap().offset, u64::MAX);
    assert!(matches!(file.tensor_f32("t"), Err(LoaderError::InvalidData(_))));
}
