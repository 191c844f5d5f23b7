//! Server configuration.
//!
//! Loaded from a TOML file with every unrecognized key rejected.
//! The `move_destinations` table is the resolution seam for C-MOVE:
//! it maps a destination AE title to a `host:port` endpoint.
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ConfigError {
    #[snafu(display("could not read configuration file {}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("could not parse configuration: {}", source))]
    Parse { source: toml::de::Error },

    #[snafu(display(
        "application entity title `{}` is not 1..16 ASCII characters",
        value
    ))]
    InvalidAeTitle { value: String },

    #[snafu(display("port number must not be zero"))]
    InvalidPort,

    #[snafu(display("maximum PDU length {} is below the minimum of 4096", value))]
    InvalidMaxPduLength { value: u32 },

    #[snafu(display("maximum concurrent connections must be positive"))]
    InvalidConnectionLimit,

    #[snafu(display(
        "move destination `{}` endpoint `{}` is not a host:port pair",
        ae_title,
        endpoint
    ))]
    InvalidMoveDestination { ae_title: String, endpoint: String },
}

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// The recognized configuration of a PACS node.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// the application entity title of this node (1..16 ASCII characters)
    #[serde(rename = "aeTitle")]
    pub ae_title: String,
    /// the TCP port to listen on
    pub port: u16,
    /// the storage root
    #[serde(rename = "dataDirectory")]
    pub data_directory: PathBuf,
    /// the number of concurrently served sessions
    #[serde(rename = "maxConcurrentConnections")]
    pub max_concurrent_connections: usize,
    /// the maximum PDU length published to peers
    #[serde(rename = "maxPDULength")]
    pub max_pdu_length: u32,
    /// calling AE titles given clearance (empty = all allowed)
    #[serde(rename = "allowedCallingAETitles")]
    pub allowed_calling_ae_titles: Vec<String>,
    /// calling AE titles always rejected
    #[serde(rename = "blockedCallingAETitles")]
    pub blocked_calling_ae_titles: Vec<String>,
    /// log at debug level
    pub verbose: bool,
    /// C-MOVE destination resolution: AE title to `host:port`
    #[serde(rename = "moveDestinations")]
    pub move_destinations: HashMap<String, String>,
    /// an optional log sink, appended to and flushed per record
    #[serde(rename = "logFile")]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ae_title: "FERROPACS".to_string(),
            port: 11112,
            data_directory: PathBuf::from("./ferropacs-data"),
            max_concurrent_connections: 16,
            max_pdu_length: 16_384,
            allowed_calling_ae_titles: Vec::new(),
            blocked_calling_ae_titles: Vec::new(),
            verbose: false,
            move_destinations: HashMap::new(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::from_toml(&text)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(text: &str) -> Result<Config> {
        let config: Config = toml::from_str(text).context(ParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the value constraints that the type system cannot.
    pub fn validate(&self) -> Result<()> {
        validate_ae_title(&self.ae_title)?;
        for title in self
            .allowed_calling_ae_titles
            .iter()
            .chain(&self.blocked_calling_ae_titles)
            .chain(self.move_destinations.keys())
        {
            validate_ae_title(title)?;
        }
        if self.port == 0 {
            return InvalidPortSnafu.fail();
        }
        if self.max_pdu_length < 4096 {
            return InvalidMaxPduLengthSnafu {
                value: self.max_pdu_length,
            }
            .fail();
        }
        if self.max_concurrent_connections == 0 {
            return InvalidConnectionLimitSnafu.fail();
        }
        for (ae_title, endpoint) in &self.move_destinations {
            self.check_endpoint(ae_title, endpoint)?;
        }
        Ok(())
    }

    fn check_endpoint(&self, ae_title: &str, endpoint: &str) -> Result<()> {
        let parses = endpoint.parse::<SocketAddr>().is_ok()
            || matches!(
                endpoint.rsplit_once(':'),
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().map(|p| p != 0).unwrap_or(false)
            );
        if parses {
            Ok(())
        } else {
            InvalidMoveDestinationSnafu {
                ae_title: ae_title.to_string(),
                endpoint: endpoint.to_string(),
            }
            .fail()
        }
    }

    /// Resolve a C-MOVE destination AE title to its endpoint.
    pub fn move_destination(&self, ae_title: &str) -> Option<&str> {
        self.move_destinations.get(ae_title).map(String::as_str)
    }
}

fn validate_ae_title(value: &str) -> Result<()> {
    let ok = !value.is_empty()
        && value.len() <= 16
        && value
            .bytes()
            .all(|b| b.is_ascii_graphic() || b == b' ')
        && value != "                ";
    if ok {
        Ok(())
    } else {
        InvalidAeTitleSnafu {
            value: value.to_string(),
        }
        .fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn recognized_keys_parse() {
        let config = Config::from_toml(
            r#"
            aeTitle = "MAIN-PACS"
            port = 10400
            dataDirectory = "/srv/pacs"
            maxConcurrentConnections = 8
            maxPDULength = 32768
            allowedCallingAETitles = ["GOOD"]
            blockedCallingAETitles = ["BAD"]
            verbose = true

            [moveDestinations]
            WORKSTATION = "10.0.0.9:104"
            "#,
        )
        .unwrap();
        assert_eq!(config.ae_title, "MAIN-PACS");
        assert_eq!(config.port, 10400);
        assert_eq!(config.max_pdu_length, 32_768);
        assert_eq!(config.move_destination("WORKSTATION"), Some("10.0.0.9:104"));
        assert_eq!(config.move_destination("ELSEWHERE"), None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_toml("portt = 10400").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn constraint_violations_are_rejected() {
        assert!(matches!(
            Config::from_toml("port = 0").unwrap_err(),
            ConfigError::InvalidPort
        ));
        assert!(matches!(
            Config::from_toml("maxPDULength = 512").unwrap_err(),
            ConfigError::InvalidMaxPduLength { value: 512 }
        ));
        assert!(matches!(
            Config::from_toml("maxConcurrentConnections = 0").unwrap_err(),
            ConfigError::InvalidConnectionLimit
        ));
        assert!(matches!(
            Config::from_toml("aeTitle = \"THIS-TITLE-IS-TOO-LONG\"").unwrap_err(),
            ConfigError::InvalidAeTitle { .. }
        ));
        assert!(matches!(
            Config::from_toml("[moveDestinations]\nWS = \"nowhere\"").unwrap_err(),
            ConfigError::InvalidMoveDestination { .. }
        ));
    }

    #[test]
    fn log_file_is_optional() {
        let config = Config::from_toml("logFile = \"/var/log/ferropacs.log\"").unwrap();
        assert_eq!(
            config.log_file.as_deref(),
            Some(Path::new("/var/log/ferropacs.log"))
        );
        assert_eq!(Config::default().log_file, None);
    }
}
