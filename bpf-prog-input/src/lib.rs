#![deny(dead_code)]
#![deny(missing_docs)]
#![deny(unused)]

//! Enumerates the eBPF programs loaded on the host and emits one `bpf_prog` metric record per
//! program, with a configurable set of size, load and runtime attributes.
//!
//! ```no_run
//! use bpf_prog_input::{BpfProgInput, KernelRegistry, LineProtocol, ProgConfig};
//!
//! // Select attributes of interest
//! let config = ProgConfig {
//!     tag: true,
//!     code_size: true,
//!     statistics: true,
//!     ..Default::default()
//! };
//!
//! // Enables `BPF_ENABLE_STATS` for as long as the input lives
//! let mut input = BpfProgInput::with_config(KernelRegistry, config);
//! input.initialize();
//!
//! // Collect one record per loaded program, printed in line protocol
//! let mut out = LineProtocol::new(std::io::stdout());
//! input.gather(&mut out)?;
//! out.finish()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bpf_stats;
pub mod registry;

mod collector;
mod config;
mod line_protocol;
mod metric;
#[cfg(feature = "openmetrics")]
mod openmetrics;
mod prog_info;
mod sys;

pub use collector::{BpfProgInput, GatherError, GatherSummary};
pub use config::{ProgConfig, SAMPLE_CONFIG};
pub use line_protocol::{encode as encode_line, LineProtocol};
pub use metric::{Accumulator, FieldValue, Metric, MEASUREMENT};
#[cfg(feature = "openmetrics")]
pub use openmetrics::OpenMetrics;
pub use prog_info::{CodeSize, ProgramDescriptor, ProgramType};
pub use sys::{KernelRegistry, ProgramFd};
