//! Command-line interface for Warden.

use crate::config::ObservabilityConfig;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Warden - evidence custody and integrity service.
#[derive(Parser)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error). Overrides the config file when set.
    #[arg(short, long, env = "WARDEN_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the custody service
    Serve {
        /// Configuration file (JSON). Development defaults when omitted.
        #[arg(short, long, env = "WARDEN_CONFIG")]
        config: Option<PathBuf>,

        /// API bind address
        #[arg(long, env = "WARDEN_BIND")]
        bind: Option<SocketAddr>,

        /// Object store directory
        #[arg(long, env = "WARDEN_OBJECT_DIR")]
        object_dir: Option<PathBuf>,

        /// Signing key file (PKCS#8 Ed25519)
        #[arg(long, env = "WARDEN_SIGNING_KEY")]
        signing_key: Option<PathBuf>,

        /// Emit JSON logs
        #[arg(long, env = "WARDEN_JSON_LOGS")]
        json_logs: bool,
    },

    /// Verify an unpacked evidence package offline
    Verify {
        /// Directory holding the package files, `manifest.json` and `manifest.sig`
        package_dir: PathBuf,

        /// Public key file: raw 32 bytes or base64
        #[arg(long)]
        public_key: PathBuf,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate a package signing key
    Keygen {
        /// Output path of the PKCS#8 private key; the public key is written next to it as `.pub`
        #[arg(short, long)]
        out: PathBuf,

        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Apply `--log-level` to `config` if it was given.
pub fn apply_log_level(config: &mut ObservabilityConfig, flag: Option<String>) {
    if let Some(level) = flag {
        config.log_level = level;
    }
}

/// Path of the public key written next to a private key.
pub fn public_key_path(private_key: &std::path::Path) -> PathBuf {
    let mut path = private_key.as_os_str().to_owned();
    path.push(".pub");
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_verify() {
        let cli = Cli::try_parse_from([
            "warden",
            "verify",
            "/tmp/pkg",
            "--public-key",
            "/tmp/key.pub",
        ])
        .unwrap();
        match cli.command {
            Commands::Verify {
                package_dir,
                public_key,
                json,
            } => {
                assert_eq!(package_dir, PathBuf::from("/tmp/pkg"));
                assert_eq!(public_key, PathBuf::from("/tmp/key.pub"));
                assert!(!json);
            }
            _ => panic!("expected verify"),
        }
    }

    #[test]
    fn test_log_level_flag_only_overrides_when_given() {
        let mut config = ObservabilityConfig {
            log_level: "warn".to_string(),
            ..Default::default()
        };

        let cli = Cli::try_parse_from(["warden", "keygen", "--out", "/tmp/k"]).unwrap();
        assert!(cli.log_level.is_none());
        apply_log_level(&mut config, cli.log_level);
        assert_eq!(config.log_level, "warn");

        let cli = Cli::try_parse_from(["warden", "--log-level", "debug", "keygen", "--out", "/tmp/k"])
            .unwrap();
        apply_log_level(&mut config, cli.log_level);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_public_key_path() {
        assert_eq!(
            public_key_path(std::path::Path::new("/keys/signing.pk8")),
            PathBuf::from("/keys/signing.pk8.pub")
        );
    }
}
