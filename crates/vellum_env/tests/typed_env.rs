use serial_test::serial;
use vellum_env::{DISABLE_CHAT_TEMPLATE, EnvVarError, EnvVarGuard, FoundryEnvVar, KERNEL_CACHE_CAPACITY, MAX_CONTEXT_LEN};

#[test]
#[serial]
fn malformed_value_is_an_error_even_with_a_default() {
    let _set = EnvVarGuard::set(FoundryEnvVar::KernelCacheCapacity, "-3");
    assert!(matches!(KERNEL_CACHE_CAPACITY.get_or(64), Err(EnvVarError::Parse { .. })));

    let _unset = KERNEL_CACHE_CAPACITY.unset_guard();
    assert_eq!(KERNEL_CACHE_CAPACITY.get_or(64).unwrap(), 64);
}

#[test]
#[serial]
fn guards_restore_previous_value() {
    let _outer = EnvVarGuard::set(FoundryEnvVar::MaxContextLen, "512");
    {
        let inner = MAX_CONTEXT_LEN.set_guard(2048).unwrap();
        assert_eq!(*inner, 2048);
        assert_eq!(MAX_CONTEXT_LEN.get().unwrap(), Some(2048));
    }
    assert_eq!(MAX_CONTEXT_LEN.get().unwrap(), Some(512));

    {
        let _unset = MAX_CONTEXT_LEN.unset_guard();
        assert_eq!(MAX_CONTEXT_LEN.get().unwrap(), None);
        assert_eq!(MAX_CONTEXT_LEN.get_or(1024).unwrap(), 1024);
    }
    assert_eq!(MAX_CONTEXT_LEN.get().unwrap(), Some(512));
}

#[test]
#[serial]
fn malformed_value_reports_the_key() {
    let _set = EnvVarGuard::set(FoundryEnvVar::MaxContextLen, "lots");
    let err = MAX_CONTEXT_LEN.get().unwrap_err();
    assert!(err.to_string().contains("VELLUM_MAX_CONTEXT_LEN"));
}

#[test]
#[serial]
fn blank_truthy_flag_is_off() {
    let _set = EnvVarGuard::set(FoundryEnvVar::DisableChatTemplate, "");
    assert_eq!(DISABLE_CHAT_TEMPLATE.get().unwrap(), Some(false));
}
