//! Configuration loading from disk.

use alloy::primitives::Address;
use std::fs;
use std::path::Path;

use crate::blockchain::TransferKind;
use crate::config::schema::{AppConfig, TransferConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Which kind of transfer the configuration asks for.
pub fn transfer_kind(config: &TransferConfig) -> Result<TransferKind, ConfigError> {
    match &config.asset_contract {
        None => Ok(TransferKind::Standard),
        Some(contract) => contract
            .parse::<Address>()
            .map(|contract| TransferKind::AlternateAsset { contract })
            .map_err(|_| {
                ConfigError::Validation(vec![ValidationError {
                    field: "transfer.asset_contract".to_string(),
                    message: "not a valid address".to_string(),
                }])
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_invalid_values() {
        let err = parse_config("[blockchain]\nchain_id = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("blockchain.chain_id"));
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        let err = parse_config("[blockchain\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_transfer_kind_selection() {
        let mut config = TransferConfig::default();
        assert_eq!(transfer_kind(&config).unwrap(), TransferKind::Standard);

        config.asset_contract = Some("0x00000000000000000000000000000000000000aa".to_string());
        assert!(matches!(
            transfer_kind(&config).unwrap(),
            TransferKind::AlternateAsset { .. }
        ));
    }
}
