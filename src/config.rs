use crate::prelude::*;
use directories::UserDirs;
use serde::Deserialize;
use std::{fs::File, path::PathBuf};

pub const CONFIG_FILE_NAME: &str = "ec2ri.config.json";
pub const DEFAULT_CONFIG: &str = include_str!("../ec2ri.config.json");
pub const DEFAULT_API_VERSION: &str = "2016-11-15";

fn default_profile() -> String {
    "default".into()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.into()
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Overrides `https://ec2.<region>.amazonaws.com`
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_true")]
    pub confirm_purchase: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            profile: default_profile(),
            region: None,
            endpoint: None,
            api_version: default_api_version(),
            confirm_purchase: true,
        }
    }
}

impl Config {
    pub fn user_dirs() -> UserDirs {
        UserDirs::new().expect("can't get user dirs")
    }

    pub fn home_dir() -> PathBuf {
        Self::user_dirs().home_dir().to_owned()
    }

    pub fn aws_dir() -> PathBuf {
        Self::home_dir().join(".aws")
    }

    pub fn config_dir() -> PathBuf {
        Self::home_dir().join(".config").join("ec2ri")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join(CONFIG_FILE_NAME)
    }

    pub fn cache_path() -> PathBuf {
        Self::config_dir().join("cache")
    }

    pub fn load() -> Result<Config> {
        let config_path = Self::config_path();
        std::fs::create_dir_all(Self::config_dir())?;
        if !config_path.exists() {
            std::fs::write(&config_path, DEFAULT_CONFIG)?;
        }
        let config = File::open(&config_path).wrap_err(f!("can't find config: {config_path:?}"))?;
        Self::from_reader(config)
    }

    fn from_reader(reader: impl std::io::Read) -> Result<Config> {
        let config: Config =
            serde_json::from_reader(reader).wrap_err("Error deserializing config")?;
        Ok(Config {
            region: config.region.not_empty(),
            endpoint: config.endpoint.not_empty(),
            ..config
        })
    }

    /// Endpoint for `region`, honouring an explicit override.
    pub fn endpoint_for(&self, region: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => f!("https://ec2.{region}.amazonaws.com"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_deserializes() {
        let config = Config::from_reader(DEFAULT_CONFIG.as_bytes()).unwrap();
        assert_eq!(config.profile, "default");
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
        assert!(config.confirm_purchase);
        assert_eq!(config.region, None);
    }

    #[test]
    fn empty_strings_are_treated_as_unset() {
        let json = r#"{ "region": "", "endpoint": "" }"#;
        let config = Config::from_reader(json.as_bytes()).unwrap();
        assert_eq!(config.region, None);
        assert_eq!(config.endpoint_for("eu-west-1"), "https://ec2.eu-west-1.amazonaws.com");
    }

    #[test]
    fn endpoint_override_wins() {
        let config = Config { endpoint: Some("http://localhost:4566/".into()), ..Config::default() };
        assert_eq!(config.endpoint_for("eu-west-1"), "http://localhost:4566");
    }
}
