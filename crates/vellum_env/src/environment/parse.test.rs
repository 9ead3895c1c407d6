#![cfg(test)]

use super::*;

#[test]
fn truthy_flag_treats_blank_and_negatives_as_off() {
    assert!(!parse_truthy_flag("").unwrap());
    assert!(!parse_truthy_flag("  ").unwrap());
    assert!(!parse_truthy_flag("OFF").unwrap());
    assert!(!parse_truthy_flag("0").unwrap());
    assert!(parse_truthy_flag("1").unwrap());
    assert!(parse_truthy_flag("anything").unwrap());
}

#[test]
fn strict_bool_rejects_unknown_spellings() {
    assert!(parse_bool("Yes").unwrap());
    assert!(!parse_bool("no").unwrap());
    assert!(parse_bool("maybe").is_err());
}

#[test]
fn numeric_parsers_trim_whitespace() {
    assert_eq!(parse_usize(" 1024 ").unwrap(), 1024);
    assert_eq!(parse_u64("7").unwrap(), 7);
    assert!(parse_usize("-1").is_err());
}

#[test]
fn backend_choice_is_normalised() {
    assert_eq!(parse_backend("Metal").unwrap(), "metal");
    assert_eq!(parse_backend(" host").unwrap(), "host");
    assert!(parse_backend("vulkan").is_err());
}

#[test]
fn log_level_accepts_tracing_names() {
    assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
    assert!(parse_log_level("chatty").is_err());
}

#[test]
fn empty_path_is_rejected() {
    assert!(parse_path("").is_err());
    assert_eq!(parse_path("/tmp/x").unwrap(), PathBuf::from("/tmp/x"));
}
