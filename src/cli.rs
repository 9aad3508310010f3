use clap::ArgMatches;
use anyhow::{anyhow, Result};

use crate::session::SessionConfig;

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub input_file: String,
    pub output_file: Option<String>,
    pub output_format: OutputFormat,
    pub drc_file: Option<String>,
    pub library_file: Option<String>,
    pub history_capacity: Option<usize>,
    pub fail_on_drc: bool,
    pub verbose_level: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputFormat {
    Spice,
    Json,
}

impl CliArgs {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let input_file = matches
            .get_one::<String>("input")
            .ok_or_else(|| anyhow!("Input script is required"))?
            .clone();

        let output_file = matches.get_one::<String>("output").cloned();
        let drc_file = matches.get_one::<String>("drc").cloned();
        let library_file = matches.get_one::<String>("library").cloned();

        let verbose_level = matches.get_count("verbose");
        let fail_on_drc = matches.get_flag("strict");

        let output_format = match matches.get_one::<String>("format").map(|s| s.as_str()) {
            Some("spice") | None => OutputFormat::Spice,
            Some("json") => OutputFormat::Json,
            Some(other) => return Err(anyhow!("Invalid output format: {}", other)),
        };

        let history_capacity = match matches.get_one::<String>("history") {
            Some(value) => Some(parse_capacity(value)?),
            None => None,
        };

        Ok(CliArgs {
            input_file,
            output_file,
            output_format,
            drc_file,
            library_file,
            history_capacity,
            fail_on_drc,
            verbose_level,
        })
    }

    /// Session settings with command-line overrides applied
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::default();
        if let Some(capacity) = self.history_capacity {
            config.history_capacity = capacity;
        }
        config.fail_on_drc = self.fail_on_drc;
        config
    }
}

fn parse_capacity(value: &str) -> Result<usize> {
    let capacity = value
        .trim()
        .parse::<usize>()
        .map_err(|e| anyhow!("Invalid history capacity '{}': {}", value, e))?;
    if capacity == 0 {
        return Err(anyhow!("History capacity must be at least 1"));
    }
    Ok(capacity)
}
