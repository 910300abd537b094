use std::{
    env,
    fs::File,
    io,
    os::{
        fd::AsFd,
        unix::{fs::MetadataExt, net::UnixDatagram},
    },
    str::FromStr,
};

use chrono::{SecondsFormat, Utc};
use forkguard_core::{ConfigError, DecisionEvent, ModuleConfig};
use thiserror::Error;
use tokio::sync::mpsc;

pub const MODULE_NAME: &str = "threat-logger";

const UNIX_SOCK_PATHS: [&str; 3] = ["/dev/log", "/var/run/syslog", "/var/run/log"];
const PRIORITY: u8 = 25; // facility * 8 + severity. facility: daemon (3); severity: alert (1)

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Plaintext,
    Json,
}

impl FromStr for OutputFormat {
    type Err = ConfigError;
    fn from_str(format: &str) -> Result<Self, Self::Err> {
        match format.to_lowercase().as_str() {
            "plaintext" => Ok(OutputFormat::Plaintext),
            "json" => Ok(OutputFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                field: String::from("output_format"),
                value: format.to_string(),
                err: String::from("Output format must be one of [plaintext, json]"),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub console: bool,
    pub syslog: bool,
    pub output_format: OutputFormat,
    /// Skip decisions which didn't terminate the process.
    pub only_kills: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            console: true,
            syslog: false,
            output_format: OutputFormat::Plaintext,
            only_kills: false,
        }
    }
}

impl TryFrom<&ModuleConfig> for Config {
    type Error = ConfigError;

    fn try_from(config: &ModuleConfig) -> Result<Self, Self::Error> {
        let default = Config::default();
        Ok(Self {
            console: config.with_default("console", default.console)?,
            syslog: config.with_default("syslog", default.syslog)?,
            output_format: config.with_default("output_format", default.output_format)?,
            only_kills: config.with_default("only_kills", default.only_kills)?,
        })
    }
}

/// Drain the decision channel until every sender is gone.
pub async fn run(config: Config, mut rx: mpsc::Receiver<DecisionEvent>) {
    let mut logger = ThreatLogger::from_config(&config).unwrap_or_else(|logger| {
        log::warn!("Failed to connect to syslog");
        logger
    });
    while let Some(event) = rx.recv().await {
        if let Err(e) = logger.process(&event) {
            log::warn!("Writing to logs failed: {e}, syslog disabled");
            logger.syslog = None;
        }
    }
    log::debug!("decision channel closed");
}

#[derive(Debug)]
struct ThreatLogger {
    console: bool,
    syslog: Option<UnixDatagram>,
    output_format: OutputFormat,
    only_kills: bool,
}

#[derive(Debug, Error)]
enum ThreatLoggerError {
    #[error("error serializing event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error")]
    IO(#[from] io::Error),
}

impl ThreatLogger {
    fn from_config(config: &Config) -> Result<Self, Self> {
        let Config {
            console,
            syslog,
            output_format,
            only_kills,
        } = config;

        let connected_to_journal = io::stderr()
            .as_fd()
            .try_clone_to_owned()
            .and_then(|fd| File::from(fd).metadata())
            .map(|meta| format!("{}:{}", meta.dev(), meta.ino()))
            .ok()
            .and_then(|stderr| {
                env::var_os("JOURNAL_STREAM").map(|s| s.to_string_lossy() == stderr.as_str())
            })
            .unwrap_or(false);

        let opt_sock = (*syslog && !connected_to_journal)
            .then(|| {
                let sock = UnixDatagram::unbound().ok()?;
                UNIX_SOCK_PATHS
                    .iter()
                    .find_map(|path| sock.connect(path).ok())
                    .map(|_| sock)
            })
            .flatten();

        let logger = Self {
            console: *console,
            syslog: opt_sock,
            output_format: output_format.clone(),
            only_kills: *only_kills,
        };
        if *syslog && logger.syslog.is_none() && !connected_to_journal {
            Err(logger)
        } else {
            Ok(logger)
        }
    }

    fn format(&self, event: &DecisionEvent, colored: bool) -> Result<String, ThreatLoggerError> {
        Ok(match self.output_format {
            OutputFormat::Plaintext => {
                let time = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
                if colored {
                    format!("[{time}] {event:#}")
                } else {
                    format!("[{time}] {event}")
                }
            }
            OutputFormat::Json => serde_json::to_string(event)?,
        })
    }

    fn process(&mut self, event: &DecisionEvent) -> Result<(), ThreatLoggerError> {
        if self.only_kills && !event.killed {
            return Ok(());
        }

        if self.console {
            println!("{}", self.format(event, true)?);
        }

        if let Some(syslog) = &self.syslog {
            let out = format!("<{PRIORITY}>{}", self.format(event, false)?);
            syslog.send(out.as_bytes())?;
        }
        Ok(())
    }
}
