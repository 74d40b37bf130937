// Command-line flags shared by both binaries.

use std::path::PathBuf;

use clap::Parser;

use triage_config::{ConfigError, TriageConfig};

#[derive(Debug, Clone, Default, Parser)]
#[command(version, about = "Wound triage using a persistent vision-language worker")]
pub struct Cli {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// HTTP listen port
    #[arg(long)]
    pub port: Option<u16>,

    /// HTTP listen address
    #[arg(long)]
    pub host: Option<String>,

    /// Directory watched for new images
    #[arg(long, value_name = "DIR")]
    pub watch_dir: Option<PathBuf>,

    /// error, warn, info, debug or trace
    #[arg(long)]
    pub log_level: Option<String>,

    /// Seconds to wait for the worker's end-of-turn marker
    #[arg(long)]
    pub response_timeout_secs: Option<u64>,
}

impl Cli {
    /// Load the configuration file (or defaults), apply flag overrides,
    /// then validate the result.
    pub fn load_config(&self) -> Result<TriageConfig, ConfigError> {
        let mut config = TriageConfig::load_or_default(self.config.as_deref())?;
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut TriageConfig) {
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(host) = &self.host {
            config.http.host = host.clone();
        }
        if let Some(dir) = &self.watch_dir {
            config.watch.dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(secs) = self.response_timeout_secs {
            config.session.response_timeout_secs = secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_no_flags_gives_defaults() {
        let cli = Cli::try_parse_from(["triage_web"]).unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.http.port, 8050);
        assert_eq!(config.session.response_timeout_secs, 30);
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"http": {{"port": 9000, "host": "127.0.0.1"}}}}"#).unwrap();

        let path = file.path().to_string_lossy().into_owned();
        let cli = Cli::try_parse_from([
            "triage_web",
            "--config",
            path.as_str(),
            "--port",
            "9100",
            "--watch-dir",
            "/data/incoming",
            "--log-level",
            "debug",
            "--response-timeout-secs",
            "45",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();

        assert_eq!(config.http.port, 9100);
        assert_eq!(config.http.host, "127.0.0.1");
        assert_eq!(config.watch.dir, PathBuf::from("/data/incoming"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.session.response_timeout_secs, 45);
    }

    #[test]
    fn test_override_is_validated() {
        let cli = Cli::try_parse_from(["triage_web", "--response-timeout-secs", "0"]).unwrap();
        assert!(matches!(
            cli.load_config(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(Cli::try_parse_from(["triage_web", "--port", "not-a-port"]).is_err());
    }
}
