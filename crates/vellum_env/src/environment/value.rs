//! Typed environment variable descriptors.
//!
//! A [`TypedEnvVar`] pairs an [`EnvVar`] with parse and format callbacks so call
//! sites deal in `usize`, `bool` or `Level` rather than raw strings.
//!
//! ```
//! use vellum_env::{FoundryEnvVar, MAX_CONTEXT_LEN, EnvVarGuard};
//!
//! let _guard = EnvVarGuard::set(FoundryEnvVar::MaxContextLen, "2048");
//! assert_eq!(MAX_CONTEXT_LEN.get().unwrap(), Some(2048));
//! ```

use std::ops::Deref;

use super::{EnvVar, Environment, guard::EnvVarGuard};

/// Failure to read or write a typed variable.
#[derive(Debug, thiserror::Error)]
pub enum EnvVarError {
    #[error("failed to parse environment variable {name} from '{value}': {source}")]
    Parse {
        name: &'static str,
        value: String,
        source: EnvVarParseError,
    },
    #[error("failed to format environment variable {name}: {source}")]
    Format {
        name: &'static str,
        source: EnvVarFormatError,
    },
}

/// Error returned by a parse callback.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct EnvVarParseError {
    message: String,
}

impl EnvVarParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Error returned by a format callback.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct EnvVarFormatError {
    message: String,
}

impl EnvVarFormatError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

pub type ParseFn<T> = fn(&str) -> Result<T, EnvVarParseError>;
pub type FormatFn<T> = fn(&T) -> Result<String, EnvVarFormatError>;

/// Descriptor for a strongly-typed environment variable.
#[derive(Clone, Copy)]
pub struct TypedEnvVar<T> {
    var: EnvVar,
    parse: ParseFn<T>,
    format: FormatFn<T>,
}

impl<T> TypedEnvVar<T> {
    pub const fn new(var: EnvVar, parse: ParseFn<T>, format: FormatFn<T>) -> Self {
        Self { var, parse, format }
    }

    #[must_use]
    pub const fn key(&self) -> &'static str {
        self.var.key()
    }

    #[must_use]
    pub const fn var(&self) -> EnvVar {
        self.var
    }

    fn format_value(&self, value: &T) -> Result<String, EnvVarError> {
        (self.format)(value).map_err(|source| EnvVarError::Format { name: self.key(), source })
    }

    /// Read and parse the variable. `Ok(None)` when it is not set.
    pub fn get(&self) -> Result<Option<T>, EnvVarError> {
        match Environment::get(self.var) {
            Some(raw) => (self.parse)(&raw).map(Some).map_err(|source| EnvVarError::Parse {
                name: self.key(),
                value: raw,
                source,
            }),
            None => Ok(None),
        }
    }

    /// Read the variable, falling back to `default` when unset.
    pub fn get_or(&self, default: T) -> Result<T, EnvVarError> {
        Ok(self.get()?.unwrap_or(default))
    }

    pub fn set(&self, value: T) -> Result<(), EnvVarError> {
        let formatted = self.format_value(&value)?;
        Environment::set(self.var, &formatted);
        Ok(())
    }

    pub fn unset(&self) {
        Environment::remove(self.var);
    }

    /// Set the variable until the returned guard is dropped.
    pub fn set_guard(&self, value: T) -> Result<TypedEnvVarGuard<T>, EnvVarError> {
        let formatted = self.format_value(&value)?;
        let guard = EnvVarGuard::set(self.var, &formatted);
        Ok(TypedEnvVarGuard { _guard: guard, value })
    }

    /// Unset the variable until the returned guard is dropped.
    #[must_use]
    pub fn unset_guard(&self) -> EnvVarGuard {
        EnvVarGuard::unset(self.var)
    }
}

/// Scoped typed assignment; derefs to the value that was written.
pub struct TypedEnvVarGuard<T> {
    _guard: EnvVarGuard,
    value: T,
}

impl<T> TypedEnvVarGuard<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for TypedEnvVarGuard<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}
