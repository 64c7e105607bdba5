//! Environment variables and well-known directories.

use std::env;
use std::path::PathBuf;

use super::RealRuntime;

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn env_var_impl(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn config_dir_impl(&self) -> Option<PathBuf> {
        dirs::config_dir()
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{RealRuntime, Runtime};

    #[test]
    fn test_real_runtime_env() {
        let runtime = RealRuntime;

        // PATH exists on every platform we build for
        assert!(runtime.env_var("PATH").is_ok());
        assert!(
            runtime
                .env_var("KVITT_TEST_SURELY_UNSET_VARIABLE")
                .is_err()
        );

        // CI containers may not have a config dir, but it must not panic
        let _ = runtime.config_dir();
    }
}
