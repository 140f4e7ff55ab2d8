//! Access to the kernel's program registry and a lazy walk over it.
//!
//! [`ProgramRegistry`] is the seam between the collector and the kernel. [`KernelRegistry`]
//! talks to the `bpf(2)` syscall; tests swap in a synthetic registry.
//!
//! [`KernelRegistry`]: crate::KernelRegistry

use std::io;

use thiserror::Error;

use crate::{bpf_stats::StatsError, prog_info::ProgramDescriptor};

/// Failure to obtain the next program ID from the registry.
#[derive(Debug, Error)]
#[error("failed to get next program ID")]
pub struct NextIdError {
    /// ID the failed lookup pointed at, when known.
    pub implicated: Option<u32>,
    /// Underlying OS error.
    #[source]
    pub source: io::Error,
}

impl NextIdError {
    /// Lookup failure that does not point at any ID.
    pub fn new(source: io::Error) -> Self {
        Self {
            implicated: None,
            source,
        }
    }

    /// Lookup failure that points at program `id`.
    pub fn at(id: u32, source: io::Error) -> Self {
        Self {
            implicated: Some(id),
            source,
        }
    }
}

/// Open handle to a single program.
pub trait ProgramHandle {
    /// Queries the program's descriptor.
    ///
    /// The IDs of the maps used by the program are only queried when `map_ids` is set.
    fn describe(&self, map_ids: bool) -> io::Result<ProgramDescriptor>;
}

/// Registry of programs currently loaded in the kernel.
pub trait ProgramRegistry {
    /// Handle returned by [`ProgramRegistry::open`].
    type Program: ProgramHandle;
    /// Resource keeping runtime statistics enabled while held.
    type StatsGuard;

    /// Next program ID strictly greater than `after`, or `None` once no programs remain.
    fn next_id(&self, after: u32) -> Result<Option<u32>, NextIdError>;

    /// Opens a handle to program `id`.
    fn open(&self, id: u32) -> io::Result<Self::Program>;

    /// Turns on runtime statistics tracking.
    ///
    /// Returns `None` when the host does not support it.
    fn enable_runtime_stats(&self) -> Result<Option<Self::StatsGuard>, StatsError>;
}

/// Reason a step of [`LoadedPrograms`] produced no descriptor.
#[derive(Debug, Error)]
pub enum WalkError {
    /// The registry could not be queried at all.
    #[error("program registry is unreachable")]
    Registry(#[source] io::Error),
    /// The registry failed without pointing past the cursor, so the walk ended early.
    #[error("program registry stalled after ID {after}")]
    Stalled {
        /// Last ID visited.
        after: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Looking up the ID following the cursor failed.
    #[error("failed to get program ID {id}")]
    NextId {
        /// ID the lookup failed on.
        id: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The program could not be opened.
    #[error("failed to open program {id}")]
    Open {
        /// Program ID.
        id: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The program's info could not be queried.
    #[error("failed to get info of program {id}")]
    Describe {
        /// Program ID.
        id: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

impl WalkError {
    /// Whether the error ends the walk.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Registry(_) | Self::Stalled { .. })
    }
}

/// Iterator over the programs of a [`ProgramRegistry`], in increasing ID order.
///
/// Each step yields the descriptor of the next program, or the [`WalkError`] that caused it to be
/// skipped. The cursor advances past the failing ID either way, so one bad entry never hides
/// those after it.
///
/// In cases where iteration can't be performed, for example the caller does not have the
/// necessary privileges, a single [`WalkError::Registry`] item is yielded.
///
/// # Example
///
/// ```no_run
/// use bpf_prog_input::{registry::LoadedPrograms, KernelRegistry};
///
/// for prog in LoadedPrograms::new(&KernelRegistry) {
///     match prog {
///         Ok(desc) => println!("{} {}", desc.id, desc.name),
///         Err(err) => println!("skipped: {err}"),
///     }
/// }
/// ```
pub struct LoadedPrograms<'r, R> {
    registry: &'r R,
    cursor: u32,
    started: bool,
    done: bool,
    map_ids: bool,
}

impl<'r, R: ProgramRegistry> LoadedPrograms<'r, R> {
    /// Starts a walk before the first program.
    pub fn new(registry: &'r R) -> Self {
        Self {
            registry,
            cursor: 0,
            started: false,
            done: false,
            map_ids: false,
        }
    }

    /// Also queries the map IDs of every program.
    pub fn with_map_ids(mut self, map_ids: bool) -> Self {
        self.map_ids = map_ids;
        self
    }

    fn inspect_program(&self, id: u32) -> Result<ProgramDescriptor, WalkError> {
        let prog = self
            .registry
            .open(id)
            .map_err(|source| WalkError::Open { id, source })?;
        prog.describe(self.map_ids)
            .map_err(|source| WalkError::Describe { id, source })
    }
}

impl<R: ProgramRegistry> Iterator for LoadedPrograms<'_, R> {
    type Item = Result<ProgramDescriptor, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let first = !self.started;
        self.started = true;

        match self.registry.next_id(self.cursor) {
            Ok(Some(id)) if id > self.cursor => {
                let item = self.inspect_program(id);
                self.cursor = id;
                Some(item)
            }
            Ok(Some(id)) => {
                // IDs must increase strictly, anything else would loop forever.
                self.done = true;
                Some(Err(WalkError::Stalled {
                    after: self.cursor,
                    source: io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("registry returned ID {id}"),
                    ),
                }))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(NextIdError {
                implicated: Some(id),
                source,
            }) if id > self.cursor => {
                self.cursor = id;
                Some(Err(WalkError::NextId { id, source }))
            }
            Err(NextIdError { source, .. }) => {
                self.done = true;
                if first {
                    Some(Err(WalkError::Registry(source)))
                } else {
                    Some(Err(WalkError::Stalled {
                        after: self.cursor,
                        source,
                    }))
                }
            }
        }
    }
}
