use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::compile::CompileOptions;
use crate::sema::CompatibilityMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read contract file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid contract file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// `[lowering]` and `[frontend]` tables; every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractFile {
    #[serde(default)]
    pub lowering: LoweringTable,
    #[serde(default)]
    pub frontend: FrontendTable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoweringTable {
    pub max_message_send_args: Option<usize>,
    pub runtime_dispatch_symbol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrontendTable {
    pub language_version: Option<u32>,
    pub compatibility_mode: Option<CompatibilityMode>,
    pub migration_assist: Option<bool>,
}

impl ContractFile {
    pub fn parse(toml_text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<ContractFile>(toml_text)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlays the file onto `options`; keys the file omits keep their value.
    pub fn apply(&self, options: &mut CompileOptions) {
        if let Some(n) = self.lowering.max_message_send_args {
            options.lowering.max_message_send_args = n;
        }
        if let Some(symbol) = &self.lowering.runtime_dispatch_symbol {
            options.lowering.runtime_dispatch_symbol = symbol.clone();
        }
        if let Some(v) = self.frontend.language_version {
            options.language_version = v;
        }
        if let Some(mode) = self.frontend.compatibility_mode {
            options.compatibility_mode = mode;
        }
        if let Some(on) = self.frontend.migration_assist {
            options.migration_assist = on;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::LoweringContract;

    #[test]
    fn tables_overlay_defaults() {
        let file = ContractFile::parse(
            "[lowering]\nmax_message_send_args = 6\n\n[frontend]\ncompatibility_mode = \"legacy\"\n",
        )
        .expect("parses");
        let mut options = CompileOptions::default();
        file.apply(&mut options);
        assert_eq!(options.lowering.max_message_send_args, 6);
        assert_eq!(
            options.lowering.runtime_dispatch_symbol,
            LoweringContract::default().runtime_dispatch_symbol
        );
        assert_eq!(options.compatibility_mode, CompatibilityMode::Legacy);
        assert!(!options.migration_assist);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ContractFile::parse("[lowering]\nslots = 3\n").is_err());
        assert!(ContractFile::parse("[backend]\nx = 1\n").is_err());
        assert!(ContractFile::parse("[frontend]\ncompatibility_mode = \"strict\"\n").is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");
        let err = ContractFile::load(&path).expect_err("file is absent");
        assert!(err.to_string().contains("absent.toml"));
    }
}
