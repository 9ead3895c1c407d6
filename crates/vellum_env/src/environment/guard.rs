//! Scoped environment mutation.

use super::{EnvVar, Environment};

/// Restores the previous value of a variable when dropped.
pub struct EnvVarGuard {
    var: EnvVar,
    previous: Option<String>,
}

impl EnvVarGuard {
    /// Set `var` to `value` until the guard is dropped.
    pub fn set(var: impl Into<EnvVar>, value: &str) -> Self {
        let var = var.into();
        let mut lock = Environment::lock();
        let previous = Environment::get(var);
        Environment::set_locked(var, value, &mut lock);
        Self { var, previous }
    }

    /// Remove `var` until the guard is dropped.
    pub fn unset(var: impl Into<EnvVar>) -> Self {
        let var = var.into();
        let mut lock = Environment::lock();
        let previous = Environment::get(var);
        Environment::remove_locked(var, &mut lock);
        Self { var, previous }
    }

    /// Value the variable held before this guard touched it.
    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        let mut lock = Environment::lock();
        match &self.previous {
            Some(previous) => Environment::set_locked(self.var, previous, &mut lock),
            None => Environment::remove_locked(self.var, &mut lock),
        }
    }
}
