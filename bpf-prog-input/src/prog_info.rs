//! Snapshot of a loaded program's `bpf_prog_info`.

use std::{fmt, time::Duration};

/// Program category as reported by the kernel in `bpf_prog_info.type`.
///
/// Names follow the canonical spelling used by Go's `cilium/ebpf`, so that records produced here
/// line up with existing `bpf_prog` dashboards.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ProgramType {
    /// `BPF_PROG_TYPE_UNSPEC`
    Unspecified,
    /// `BPF_PROG_TYPE_SOCKET_FILTER`
    SocketFilter,
    /// `BPF_PROG_TYPE_KPROBE`
    Kprobe,
    /// `BPF_PROG_TYPE_SCHED_CLS`
    SchedCls,
    /// `BPF_PROG_TYPE_SCHED_ACT`
    SchedAct,
    /// `BPF_PROG_TYPE_TRACEPOINT`
    TracePoint,
    /// `BPF_PROG_TYPE_XDP`
    Xdp,
    /// `BPF_PROG_TYPE_PERF_EVENT`
    PerfEvent,
    /// `BPF_PROG_TYPE_CGROUP_SKB`
    CgroupSkb,
    /// `BPF_PROG_TYPE_CGROUP_SOCK`
    CgroupSock,
    /// `BPF_PROG_TYPE_LWT_IN`
    LwtIn,
    /// `BPF_PROG_TYPE_LWT_OUT`
    LwtOut,
    /// `BPF_PROG_TYPE_LWT_XMIT`
    LwtXmit,
    /// `BPF_PROG_TYPE_SOCK_OPS`
    SockOps,
    /// `BPF_PROG_TYPE_SK_SKB`
    SkSkb,
    /// `BPF_PROG_TYPE_CGROUP_DEVICE`
    CgroupDevice,
    /// `BPF_PROG_TYPE_SK_MSG`
    SkMsg,
    /// `BPF_PROG_TYPE_RAW_TRACEPOINT`
    RawTracepoint,
    /// `BPF_PROG_TYPE_CGROUP_SOCK_ADDR`
    CgroupSockAddr,
    /// `BPF_PROG_TYPE_LWT_SEG6LOCAL`
    LwtSeg6Local,
    /// `BPF_PROG_TYPE_LIRC_MODE2`
    LircMode2,
    /// `BPF_PROG_TYPE_SK_REUSEPORT`
    SkReuseport,
    /// `BPF_PROG_TYPE_FLOW_DISSECTOR`
    FlowDissector,
    /// `BPF_PROG_TYPE_CGROUP_SYSCTL`
    CgroupSysctl,
    /// `BPF_PROG_TYPE_RAW_TRACEPOINT_WRITABLE`
    RawTracepointWritable,
    /// `BPF_PROG_TYPE_CGROUP_SOCKOPT`
    CgroupSockopt,
    /// `BPF_PROG_TYPE_TRACING`
    Tracing,
    /// `BPF_PROG_TYPE_STRUCT_OPS`
    StructOps,
    /// `BPF_PROG_TYPE_EXT`
    Extension,
    /// `BPF_PROG_TYPE_LSM`
    Lsm,
    /// `BPF_PROG_TYPE_SK_LOOKUP`
    SkLookup,
    /// `BPF_PROG_TYPE_SYSCALL`
    Syscall,
    /// `BPF_PROG_TYPE_NETFILTER`
    Netfilter,
    /// A type newer than this crate knows about.
    Unknown(u32),
}

impl ProgramType {
    /// Maps the raw `bpf_prog_type` value onto a [`ProgramType`].
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::Unspecified,
            1 => Self::SocketFilter,
            2 => Self::Kprobe,
            3 => Self::SchedCls,
            4 => Self::SchedAct,
            5 => Self::TracePoint,
            6 => Self::Xdp,
            7 => Self::PerfEvent,
            8 => Self::CgroupSkb,
            9 => Self::CgroupSock,
            10 => Self::LwtIn,
            11 => Self::LwtOut,
            12 => Self::LwtXmit,
            13 => Self::SockOps,
            14 => Self::SkSkb,
            15 => Self::CgroupDevice,
            16 => Self::SkMsg,
            17 => Self::RawTracepoint,
            18 => Self::CgroupSockAddr,
            19 => Self::LwtSeg6Local,
            20 => Self::LircMode2,
            21 => Self::SkReuseport,
            22 => Self::FlowDissector,
            23 => Self::CgroupSysctl,
            24 => Self::RawTracepointWritable,
            25 => Self::CgroupSockopt,
            26 => Self::Tracing,
            27 => Self::StructOps,
            28 => Self::Extension,
            29 => Self::Lsm,
            30 => Self::SkLookup,
            31 => Self::Syscall,
            32 => Self::Netfilter,
            other => Self::Unknown(other),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Unspecified => "UnspecifiedProgram",
            Self::SocketFilter => "SocketFilter",
            Self::Kprobe => "Kprobe",
            Self::SchedCls => "SchedCLS",
            Self::SchedAct => "SchedACT",
            Self::TracePoint => "TracePoint",
            Self::Xdp => "XDP",
            Self::PerfEvent => "PerfEvent",
            Self::CgroupSkb => "CGroupSKB",
            Self::CgroupSock => "CGroupSock",
            Self::LwtIn => "LWTIn",
            Self::LwtOut => "LWTOut",
            Self::LwtXmit => "LWTXmit",
            Self::SockOps => "SockOps",
            Self::SkSkb => "SkSKB",
            Self::CgroupDevice => "CGroupDevice",
            Self::SkMsg => "SkMsg",
            Self::RawTracepoint => "RawTracepoint",
            Self::CgroupSockAddr => "CGroupSockAddr",
            Self::LwtSeg6Local => "LWTSeg6Local",
            Self::LircMode2 => "LircMode2",
            Self::SkReuseport => "SkReuseport",
            Self::FlowDissector => "FlowDissector",
            Self::CgroupSysctl => "CGroupSysctl",
            Self::RawTracepointWritable => "RawTracepointWritable",
            Self::CgroupSockopt => "CGroupSockopt",
            Self::Tracing => "Tracing",
            Self::StructOps => "StructOps",
            Self::Extension => "Extension",
            Self::Lsm => "LSM",
            Self::SkLookup => "SkLookup",
            Self::Syscall => "Syscall",
            Self::Netfilter => "Netfilter",
            Self::Unknown(_) => "",
        }
    }
}

impl fmt::Display for ProgramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(value) => write!(f, "ProgramType({value})"),
            known => f.write_str(known.name()),
        }
    }
}

/// Size of the program's code before and after translation, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeSize {
    /// Size of the JIT-compiled machine code.
    pub jited: u32,
    /// Size of the translated (post-verifier) bytecode.
    pub xlated: u32,
}

/// Read-only snapshot of one loaded program, taken at query time.
///
/// Every attribute the running kernel may not report is an `Option`. `None` means "not
/// available", never zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramDescriptor {
    /// Unique ID of the program.
    pub id: u32,
    /// Program name. Empty for programs loaded without one.
    pub name: String,
    /// Program type.
    pub program_type: ProgramType,
    /// SHA sum of the program's instructions.
    pub tag: Option<[u8; 8]>,
    /// JIT and translated code size.
    pub code_size: Option<CodeSize>,
    /// Time since boot at which the program was loaded.
    pub load_time: Option<Duration>,
    /// User ID of the program's creator.
    pub created_by_uid: Option<u32>,
    /// IDs of the maps used by the program.
    pub map_ids: Option<Vec<u32>>,
    /// Accumulated time the program has been running. Only tracked while `BPF_ENABLE_STATS` is
    /// held.
    pub run_time: Option<Duration>,
    /// Accumulated execution count. Only tracked while `BPF_ENABLE_STATS` is held.
    pub run_count: Option<u64>,
    /// Number of times the program was not run because of recursion.
    pub recursion_misses: Option<u64>,
    /// Number of instructions processed by the verifier.
    pub verified_instructions: Option<u32>,
    /// ID of the BTF object attached to the program.
    pub btf_id: Option<u32>,
}

impl ProgramDescriptor {
    /// Creates a descriptor carrying only identity attributes.
    pub fn new(id: u32, name: impl Into<String>, program_type: ProgramType) -> Self {
        Self {
            id,
            name: name.into(),
            program_type,
            tag: None,
            code_size: None,
            load_time: None,
            created_by_uid: None,
            map_ids: None,
            run_time: None,
            run_count: None,
            recursion_misses: None,
            verified_instructions: None,
            btf_id: None,
        }
    }

    /// Hex encoded program tag, e.g. `"a04f5eef06a7f555"`.
    pub fn tag_hex(&self) -> Option<String> {
        self.tag.map(hex::encode)
    }

    /// Run time and run count, only when both are available.
    pub fn run_stats(&self) -> Option<(Duration, u64)> {
        self.run_time.zip(self.run_count)
    }
}

/// Nanoseconds in a [`Duration`], saturating at `u64::MAX`.
pub(crate) fn as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
