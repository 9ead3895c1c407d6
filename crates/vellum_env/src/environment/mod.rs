//! Process environment access for vellum.
//!
//! Every variable the runtime reads is named by an [`EnvVar`] so that reads and
//! mutations flow through one place. Mutations are serialised on a global mutex
//! because `std::env::set_var` is not thread-safe.

pub mod foundry;
pub mod guard;
pub mod instrument;
mod parse;
pub mod value;

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use foundry::FoundryEnvVar;
use instrument::InstrumentEnvVar;

/// Namespaced environment variable identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvVar {
    /// Logging and metrics pipeline.
    Instrument(InstrumentEnvVar),
    /// Kernel compilation, backend selection and generation defaults.
    Foundry(FoundryEnvVar),
}

impl From<InstrumentEnvVar> for EnvVar {
    fn from(value: InstrumentEnvVar) -> Self {
        Self::Instrument(value)
    }
}

impl From<FoundryEnvVar> for EnvVar {
    fn from(value: FoundryEnvVar) -> Self {
        Self::Foundry(value)
    }
}

impl EnvVar {
    /// Canonical process environment key.
    pub const fn key(self) -> &'static str {
        match self {
            EnvVar::Instrument(inner) => inner.key(),
            EnvVar::Foundry(inner) => inner.key(),
        }
    }
}

/// Facade over the process environment.
pub struct Environment;

impl Environment {
    /// Acquire the global environment mutex.
    ///
    /// A poisoned mutex is recovered: the guarded value is `()` so there is no
    /// state that a panicking holder could have left inconsistent.
    pub fn lock() -> MutexGuard<'static, ()> {
        static ENV_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_MUTEX.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the variable as UTF-8 if present.
    pub fn get(var: impl Into<EnvVar>) -> Option<String> {
        std::env::var(var.into().key()).ok()
    }

    /// Set the variable, taking the global lock for the duration of the write.
    ///
    /// Use [`Environment::lock`] together with the guard helpers when several
    /// mutations need to share one critical section.
    pub fn set(var: impl Into<EnvVar>, value: &str) {
        let var = var.into();
        let mut guard = Self::lock();
        Self::set_locked(var, value, &mut guard);
    }

    /// Remove the variable, taking the global lock for the duration of the write.
    pub fn remove(var: impl Into<EnvVar>) {
        let var = var.into();
        let mut guard = Self::lock();
        Self::remove_locked(var, &mut guard);
    }

    pub(crate) fn set_locked(var: EnvVar, value: &str, _guard: &mut MutexGuard<'static, ()>) {
        // SAFETY: the guard proves the global environment mutex is held.
        unsafe { std::env::set_var(var.key(), value) };
    }

    pub(crate) fn remove_locked(var: EnvVar, _guard: &mut MutexGuard<'static, ()>) {
        // SAFETY: the guard proves the global environment mutex is held.
        unsafe { std::env::remove_var(var.key()) };
    }
}
