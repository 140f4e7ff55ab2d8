//! `bpf_prog` input: one pass over the loaded programs per collection cycle.

use std::{io, time::SystemTime};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    bpf_stats::StatsHandle,
    config::ProgConfig,
    metric::{Accumulator, Metric, MEASUREMENT},
    prog_info::{as_nanos, ProgramDescriptor},
    registry::{LoadedPrograms, ProgramRegistry, WalkError},
};

/// Failure of a whole collection cycle.
#[derive(Debug, Error)]
pub enum GatherError {
    /// The registry could not be queried at all.
    #[error("failed to query the program registry")]
    Registry(#[source] io::Error),
}

/// What a collection cycle did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GatherSummary {
    /// Records handed to the accumulator.
    pub emitted: usize,
    /// Programs that could not be looked up, opened or described.
    pub skipped: usize,
    /// Records emitted without runtime statistics because `BPF_ENABLE_STATS` is not held.
    pub stats_unavailable: usize,
}

/// Collects a `bpf_prog` record for every named program in a [`ProgramRegistry`].
///
/// # Example
///
/// ```no_run
/// use bpf_prog_input::{BpfProgInput, KernelRegistry, Metric, ProgConfig};
///
/// let config = ProgConfig {
///     code_size: true,
///     statistics: true,
///     ..Default::default()
/// };
/// let mut input = BpfProgInput::with_config(KernelRegistry, config);
/// input.initialize();
///
/// let mut records: Vec<Metric> = vec![];
/// input.gather(&mut records)?;
///
/// input.shutdown();
/// # Ok::<(), bpf_prog_input::GatherError>(())
/// ```
pub struct BpfProgInput<R: ProgramRegistry> {
    registry: R,
    config: ProgConfig,
    /// Held from [`BpfProgInput::initialize`] until shutdown or drop.
    stats: Option<StatsHandle<R::StatsGuard>>,
}

impl<R: ProgramRegistry> BpfProgInput<R> {
    /// Input with the default configuration (only `time_loaded` enabled).
    pub fn new(registry: R) -> Self {
        Self::with_config(registry, ProgConfig::default())
    }

    /// Input with the given attribute toggles.
    pub fn with_config(registry: R, config: ProgConfig) -> Self {
        Self {
            registry,
            config,
            stats: None,
        }
    }

    /// Registry the input walks.
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Whether the `BPF_ENABLE_STATS` handle is held.
    pub fn stats_enabled(&self) -> bool {
        self.stats.is_some()
    }

    /// Enables runtime statistics tracking when `statistics` is configured.
    ///
    /// Never fails: an unavailable or refused `BPF_ENABLE_STATS` is logged and the input carries
    /// on without runtime statistics.
    pub fn initialize(&mut self) {
        if !self.config.statistics || self.stats.is_some() {
            return;
        }
        match self.registry.enable_runtime_stats() {
            Ok(Some(guard)) => {
                info!("enabled `BPF_ENABLE_STATS`");
                self.stats = Some(StatsHandle::new(guard));
            }
            Ok(None) => error!("`BPF_ENABLE_STATS` is not supported on this host"),
            Err(err) => error!(error = ?err, "`BPF_ENABLE_STATS` syscall failed"),
        }
    }

    /// Releases the `BPF_ENABLE_STATS` handle, if held.
    pub fn shutdown(&mut self) {
        if let Some(stats) = self.stats.take() {
            stats.release();
        }
    }

    /// Runs one collection cycle, adding a record per named program to `acc`.
    ///
    /// Programs that vanish or cannot be inspected mid-walk are skipped. Only a registry that
    /// cannot be queried at all fails the cycle.
    pub fn gather<A: Accumulator + ?Sized>(
        &self,
        acc: &mut A,
    ) -> Result<GatherSummary, GatherError> {
        let mut summary = GatherSummary::default();

        let programs = LoadedPrograms::new(&self.registry).with_map_ids(self.config.map_ids);
        for prog in programs {
            let desc = match prog {
                Ok(desc) => desc,
                Err(WalkError::Registry(err)) => return Err(GatherError::Registry(err)),
                Err(err @ WalkError::Stalled { .. }) => {
                    warn!(error = ?err, "program walk ended early");
                    continue;
                }
                Err(err) => {
                    debug!(error = ?err, "skipping program");
                    summary.skipped += 1;
                    continue;
                }
            };
            // Kernel-internal entries have no name.
            if desc.name.is_empty() {
                continue;
            }

            let (metric, has_stats) = self.to_metric(&desc, SystemTime::now());
            if !has_stats {
                summary.stats_unavailable += 1;
            }
            acc.add_metric(metric);
            summary.emitted += 1;
        }

        if summary.stats_unavailable > 0 {
            warn!(
                programs = summary.stats_unavailable,
                "`BPF_ENABLE_STATS` not enabled, run_time and run_count omitted"
            );
        }
        Ok(summary)
    }

    /// Builds the record for `desc`.
    ///
    /// The flag is `false` when runtime statistics were requested while no handle is held.
    fn to_metric(&self, desc: &ProgramDescriptor, timestamp: SystemTime) -> (Metric, bool) {
        let config = &self.config;
        let mut metric = Metric::new(MEASUREMENT, timestamp);
        let mut has_stats = true;

        // Fields
        if config.code_size {
            if let Some(size) = desc.code_size {
                metric.add_field("jited_size", size.jited);
                metric.add_field("xlated_size", size.xlated);
            }
        }
        if config.time_loaded {
            if let Some(load_time) = desc.load_time {
                metric.add_field("time_loaded", as_nanos(load_time));
            }
        }
        if config.created_by_uid {
            if let Some(uid) = desc.created_by_uid {
                metric.add_field("created_by_uid", uid);
            }
        }
        if config.map_ids {
            if let Some(map_ids) = &desc.map_ids {
                let joined = map_ids
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                metric.add_field("map_ids", joined);
            }
        }
        if config.statistics {
            match (&self.stats, desc.run_stats()) {
                (Some(_), Some((run_time, run_count))) => {
                    metric.add_field("run_time", as_nanos(run_time));
                    metric.add_field("run_count", run_count);
                }
                (Some(_), None) => {}
                (None, _) => has_stats = false,
            }
        }
        if config.recursion_misses {
            if let Some(misses) = desc.recursion_misses {
                metric.add_field("recursion_misses", misses);
            }
        }
        if config.verified_instructions {
            if let Some(insns) = desc.verified_instructions {
                metric.add_field("verified_instructions", insns);
            }
        }

        // Tags
        metric.add_tag("id", desc.id.to_string());
        metric.add_tag("type", desc.program_type.to_string());
        metric.add_tag("name", desc.name.as_str());
        if config.tag {
            if let Some(tag) = desc.tag_hex() {
                metric.add_tag("tag", tag);
            }
        }
        if config.btf_id {
            if let Some(btf_id) = desc.btf_id {
                metric.add_tag("btf_id", btf_id.to_string());
            }
        }

        (metric, has_stats)
    }
}
