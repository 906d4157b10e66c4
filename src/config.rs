use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "grader", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,

    /// Number of dispatcher loops to run in this process
    #[arg(
        long = "dispatchers",
        short = 'd',
        default_value_t = 1,
        value_parser = clap::value_parser!(u8).range(1..)
    )]
    pub dispatchers: u8,

    /// Only run dispatchers, without the HTTP interface
    #[arg(long = "dispatch-only", default_value_t = false)]
    pub dispatch_only: bool,

    /// Put submissions left in `running` by a crashed dispatcher back in the queue
    #[arg(long = "requeue-running", default_value_t = false)]
    pub requeue_running: bool,
}

impl CliArgs {
    /// Load the configuration from the specified file, or the defaults if none is given
    pub fn to_config(&self) -> std::io::Result<Config> {
        let Some(config_path) = &self.config_path else {
            return Ok(Config::default());
        };
        let file = std::fs::File::open(config_path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub language: LanguageConfig,
    pub dispatcher: DispatcherConfig,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Falls back to the per-user data directory when unset
    pub path: Option<PathBuf>,
}

/// The interpreter submissions are run with
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LanguageConfig {
    pub name: String,
    /// Name the submitted source is written under inside the work directory
    pub file_name: String,
    /// Interpreter command; the program file name is appended as the last argument
    pub command: Vec<String>,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            name: "python".to_string(),
            file_name: "Main.py".to_string(),
            command: vec!["python3".to_string()],
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Delay between polls when no submission is queued
    pub poll_interval_ms: u64,
    /// Parent of the per-run working directories, system temp dir if unset
    pub work_dir: Option<PathBuf>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            work_dir: None,
        }
    }
}
