use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use bpf_prog_input::{ProgConfig, SAMPLE_CONFIG};
use clap::ValueEnum;
use serde::Deserialize;

/// Record encoding written to stdout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Output {
    /// InfluxDB line protocol, one line per program.
    #[default]
    Influx,
    /// OpenMetrics text exposition.
    Openmetrics,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Seconds between two collection cycles.
    pub interval: u64,
    pub output: Output,
    bpf_prog: Option<ProgConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            interval: 10,
            output: Output::default(),
            bpf_prog: None,
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    fn parse(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        if config.interval == 0 {
            bail!("interval must be at least 1 second");
        }
        Ok(config)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn prog_config(&self) -> ProgConfig {
        self.bpf_prog.unwrap_or_default()
    }
}

pub fn sample_config() -> String {
    format!(
        "## Seconds between two collection cycles.\n# interval: 10\n\n\
         ## Record encoding: influx or openmetrics.\n# output: influx\n\n{SAMPLE_CONFIG}"
    )
}
