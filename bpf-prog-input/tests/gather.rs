use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    io,
    rc::Rc,
    time::Duration,
};

use bpf_prog_input::{
    bpf_stats::StatsError,
    registry::{NextIdError, ProgramHandle, ProgramRegistry},
    BpfProgInput, CodeSize, FieldValue, GatherError, Metric, ProgConfig, ProgramDescriptor,
    ProgramType,
};

/// What a synthetic program slot does when visited.
#[derive(Clone)]
enum Slot {
    Loaded(ProgramDescriptor),
    /// Looking up this ID fails.
    LookupFails,
    /// The ID is listed but the program is gone by the time it is opened.
    OpenFails,
    /// The program opens but its info cannot be read.
    DescribeFails,
    /// Looking up this ID fails without pointing at any ID.
    RegistryFails,
    /// Looking up this ID hands out the given ID instead.
    Rewinds(u32),
}

#[derive(Default)]
struct Synthetic {
    slots: BTreeMap<u32, Slot>,
    stats_supported: bool,
    /// Every ID handed out or implicated by `next_id`, in order.
    visited: RefCell<Vec<u32>>,
    /// Set while the stats guard is alive.
    stats_live: Rc<Cell<bool>>,
    /// Number of map ID queries made through handles.
    map_queries: Rc<Cell<usize>>,
}

struct Handle(Slot, Rc<Cell<usize>>);

impl ProgramHandle for Handle {
    fn describe(&self, map_ids: bool) -> io::Result<ProgramDescriptor> {
        match &self.0 {
            Slot::Loaded(desc) => {
                let mut desc = desc.clone();
                if map_ids {
                    self.1.set(self.1.get() + 1);
                    desc.map_ids = Some(vec![3, desc.id]);
                }
                Ok(desc)
            }
            _ => Err(io::Error::from(io::ErrorKind::PermissionDenied)),
        }
    }
}

struct Guard(Rc<Cell<bool>>);

impl Drop for Guard {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl ProgramRegistry for Synthetic {
    type Program = Handle;
    type StatsGuard = Guard;

    fn next_id(&self, after: u32) -> Result<Option<u32>, NextIdError> {
        let Some((&id, slot)) = self.slots.range(after + 1..).next() else {
            return Ok(None);
        };
        self.visited.borrow_mut().push(id);
        match slot {
            Slot::LookupFails => Err(NextIdError::at(
                id,
                io::Error::from(io::ErrorKind::PermissionDenied),
            )),
            Slot::RegistryFails => Err(NextIdError::new(io::Error::from(
                io::ErrorKind::Interrupted,
            ))),
            Slot::Rewinds(to) => Ok(Some(*to)),
            _ => Ok(Some(id)),
        }
    }

    fn open(&self, id: u32) -> io::Result<Handle> {
        match &self.slots[&id] {
            Slot::OpenFails => Err(io::Error::from(io::ErrorKind::NotFound)),
            slot => Ok(Handle(slot.clone(), self.map_queries.clone())),
        }
    }

    fn enable_runtime_stats(&self) -> Result<Option<Guard>, StatsError> {
        if !self.stats_supported {
            return Ok(None);
        }
        self.stats_live.set(true);
        Ok(Some(Guard(self.stats_live.clone())))
    }
}

fn prog(id: u32, name: &str) -> ProgramDescriptor {
    let mut desc = ProgramDescriptor::new(id, name, ProgramType::SchedCls);
    desc.tag = Some([0x1f, 0x2e, 0x3d, 0x4c, 0x5b, 0x6a, 0x79, 0x88]);
    desc.code_size = Some(CodeSize {
        jited: 100 + id,
        xlated: 200 + id,
    });
    desc.load_time = Some(Duration::from_millis(u64::from(id)));
    desc.run_time = Some(Duration::from_micros(5));
    desc.run_count = Some(10);
    desc
}

fn registry<const N: usize>(slots: [(u32, Slot); N]) -> Synthetic {
    Synthetic {
        slots: slots.into_iter().collect(),
        stats_supported: true,
        ..Default::default()
    }
}

fn ids(records: &[Metric]) -> Vec<&str> {
    records.iter().filter_map(|m| m.tag("id")).collect()
}

#[test]
fn one_record_per_described_program() {
    let input = BpfProgInput::new(registry([
        (1, Slot::Loaded(prog(1, "ingress"))),
        (2, Slot::Loaded(prog(2, "egress"))),
    ]));

    let mut records: Vec<Metric> = vec![];
    let summary = input.gather(&mut records).unwrap();

    assert_eq!(summary.emitted, 2);
    assert_eq!(summary.skipped, 0);
    assert_eq!(ids(&records), ["1", "2"]);
    for record in &records {
        assert_eq!(record.name, "bpf_prog");
        assert_eq!(record.tag("type"), Some("SchedCLS"));
        assert!(record.tag("name").is_some());
    }
}

#[test]
fn empty_names_are_never_emitted() {
    let input = BpfProgInput::with_config(
        registry([
            (1, Slot::Loaded(prog(1, ""))),
            (2, Slot::Loaded(prog(2, "named"))),
            (3, Slot::Loaded(prog(3, ""))),
        ]),
        ProgConfig::all(),
    );

    let mut records: Vec<Metric> = vec![];
    let summary = input.gather(&mut records).unwrap();

    assert_eq!(ids(&records), ["2"]);
    assert_eq!(summary.emitted, 1);
    // Unnamed programs are not failures
    assert_eq!(summary.skipped, 0);
}

#[test]
fn lookup_failure_does_not_end_the_cycle() {
    let registry = registry([
        (1, Slot::Loaded(prog(1, "a"))),
        (2, Slot::Loaded(prog(2, "b"))),
        (3, Slot::LookupFails),
        (4, Slot::Loaded(prog(4, "d"))),
        (5, Slot::Loaded(prog(5, "e"))),
    ]);
    let input = BpfProgInput::new(registry);

    let mut records: Vec<Metric> = vec![];
    let summary = input.gather(&mut records).unwrap();

    assert_eq!(*input.registry().visited.borrow(), [1, 2, 3, 4, 5]);
    assert_eq!(ids(&records), ["1", "2", "4", "5"]);
    assert_eq!(summary.skipped, 1);
}

#[test]
fn open_and_describe_failures_are_skipped() {
    let registry = registry([
        (1, Slot::OpenFails),
        (2, Slot::Loaded(prog(2, "b"))),
        (3, Slot::DescribeFails),
        (4, Slot::Loaded(prog(4, "d"))),
    ]);
    let input = BpfProgInput::new(registry);

    let mut records: Vec<Metric> = vec![];
    let summary = input.gather(&mut records).unwrap();

    assert_eq!(ids(&records), ["2", "4"]);
    assert_eq!(summary.skipped, 2);
}

#[test]
fn visits_ids_in_increasing_order() {
    let registry = registry([
        (9, Slot::Loaded(prog(9, "i"))),
        (3, Slot::LookupFails),
        (7, Slot::OpenFails),
        (12, Slot::Loaded(prog(12, "l"))),
    ]);
    let input = BpfProgInput::new(registry);

    let mut records: Vec<Metric> = vec![];
    input.gather(&mut records).unwrap();
    assert_eq!(*input.registry().visited.borrow(), [3, 7, 9, 12]);
    assert_eq!(ids(&records), ["9", "12"]);
}

#[test]
fn registry_failure_mid_walk_keeps_earlier_records() {
    let input = BpfProgInput::new(registry([
        (1, Slot::Loaded(prog(1, "a"))),
        (2, Slot::Loaded(prog(2, "b"))),
        (3, Slot::RegistryFails),
        (4, Slot::Loaded(prog(4, "d"))),
    ]));

    let mut records: Vec<Metric> = vec![];
    let summary = input.gather(&mut records).unwrap();

    assert_eq!(*input.registry().visited.borrow(), [1, 2, 3]);
    assert_eq!(ids(&records), ["1", "2"]);
    assert_eq!(summary.emitted, 2);
    assert_eq!(summary.skipped, 0);
}

#[test]
fn non_increasing_id_ends_the_walk() {
    let input = BpfProgInput::new(registry([
        (1, Slot::Loaded(prog(1, "a"))),
        (2, Slot::Loaded(prog(2, "b"))),
        (3, Slot::Rewinds(1)),
        (4, Slot::Loaded(prog(4, "d"))),
    ]));

    let mut records: Vec<Metric> = vec![];
    let summary = input.gather(&mut records).unwrap();

    // Program 1 is not revisited and nothing past the rewind is reached
    assert_eq!(*input.registry().visited.borrow(), [1, 2, 3]);
    assert_eq!(ids(&records), ["1", "2"]);
    assert_eq!(summary.emitted, 2);

    // Same guard on the very first lookup
    let input = BpfProgInput::new(registry([(5, Slot::Rewinds(0))]));
    let mut records: Vec<Metric> = vec![];
    assert_eq!(input.gather(&mut records).unwrap().emitted, 0);
}

#[test]
fn map_ids_are_queried_only_when_enabled() {
    let slots = [(1, Slot::Loaded(prog(1, "a"))), (2, Slot::Loaded(prog(2, "b")))];

    let registry_off = registry(slots.clone());
    let queries = registry_off.map_queries.clone();
    let mut records: Vec<Metric> = vec![];
    BpfProgInput::new(registry_off).gather(&mut records).unwrap();
    assert_eq!(queries.get(), 0);
    assert!(records[0].field("map_ids").is_none());

    let registry_on = registry(slots);
    let queries = registry_on.map_queries.clone();
    let config = ProgConfig {
        map_ids: true,
        ..Default::default()
    };
    let mut records: Vec<Metric> = vec![];
    BpfProgInput::with_config(registry_on, config)
        .gather(&mut records)
        .unwrap();
    assert_eq!(queries.get(), 2);
    assert_eq!(
        records[1].field("map_ids"),
        Some(&FieldValue::Str("3,2".to_owned()))
    );
}

struct Unreachable;

impl ProgramRegistry for Unreachable {
    type Program = Handle;
    type StatsGuard = ();

    fn next_id(&self, _after: u32) -> Result<Option<u32>, NextIdError> {
        Err(NextIdError::new(io::Error::from(
            io::ErrorKind::PermissionDenied,
        )))
    }

    fn open(&self, _id: u32) -> io::Result<Handle> {
        Err(io::Error::from(io::ErrorKind::NotFound))
    }

    fn enable_runtime_stats(&self) -> Result<Option<()>, StatsError> {
        Err(StatsError::Syscall {
            call: "bpf_enable_stats",
            io_error: io::Error::from(io::ErrorKind::PermissionDenied),
        })
    }
}

#[test]
fn unreachable_registry_fails_the_cycle() {
    let mut input = BpfProgInput::with_config(Unreachable, ProgConfig::all());
    // Never fatal
    input.initialize();
    assert!(!input.stats_enabled());

    let mut records: Vec<Metric> = vec![];
    let err = input.gather(&mut records).unwrap_err();
    assert!(matches!(err, GatherError::Registry(_)));
    assert!(records.is_empty());
}

#[test]
fn empty_registry_is_a_successful_cycle() {
    let input = BpfProgInput::new(registry([]));
    let mut records: Vec<Metric> = vec![];
    let summary = input.gather(&mut records).unwrap();
    assert_eq!(summary.emitted, 0);
    assert!(records.is_empty());
}

#[test]
fn run_stats_need_the_handle() {
    let config = ProgConfig {
        statistics: true,
        ..Default::default()
    };

    // Unsupported host: handle stays unset, no record carries either field
    let mut unsupported = registry([(1, Slot::Loaded(prog(1, "a")))]);
    unsupported.stats_supported = false;
    let mut input = BpfProgInput::with_config(unsupported, config);
    input.initialize();
    assert!(!input.stats_enabled());

    let mut records: Vec<Metric> = vec![];
    let summary = input.gather(&mut records).unwrap();
    assert_eq!(summary.stats_unavailable, 1);
    assert!(records[0].field("run_time").is_none());
    assert!(records[0].field("run_count").is_none());

    // Supported host: both fields together
    let mut input = BpfProgInput::with_config(registry([(1, Slot::Loaded(prog(1, "a")))]), config);
    input.initialize();
    assert!(input.stats_enabled());

    let mut records: Vec<Metric> = vec![];
    let summary = input.gather(&mut records).unwrap();
    assert_eq!(summary.stats_unavailable, 0);
    assert_eq!(records[0].field("run_time"), Some(&FieldValue::UInt(5_000)));
    assert_eq!(records[0].field("run_count"), Some(&FieldValue::UInt(10)));
}

#[test]
fn run_stats_are_emitted_as_a_pair_only() {
    let mut half = prog(1, "a");
    half.run_count = None;
    let mut input = BpfProgInput::with_config(
        registry([(1, Slot::Loaded(half))]),
        ProgConfig {
            statistics: true,
            ..Default::default()
        },
    );
    input.initialize();

    let mut records: Vec<Metric> = vec![];
    input.gather(&mut records).unwrap();
    assert!(records[0].field("run_time").is_none());
    assert!(records[0].field("run_count").is_none());
}

#[test]
fn stats_handle_lives_until_shutdown() {
    let registry = registry([]);
    let live = registry.stats_live.clone();
    let mut input = BpfProgInput::with_config(
        registry,
        ProgConfig {
            statistics: true,
            ..Default::default()
        },
    );

    input.initialize();
    assert!(live.get());
    // A second initialize keeps the existing handle
    input.initialize();
    assert!(live.get());

    input.gather(&mut Vec::<Metric>::new()).unwrap();
    assert!(live.get());

    input.shutdown();
    assert!(!live.get());
}

#[test]
fn stats_handle_released_on_drop() {
    let registry = registry([]);
    let live = registry.stats_live.clone();
    let mut input = BpfProgInput::with_config(registry, ProgConfig::all());
    input.initialize();
    assert!(live.get());

    drop(input);
    assert!(!live.get());
}

#[test]
fn code_size_toggle() {
    let mut sizeless = prog(2, "b");
    sizeless.code_size = None;
    let slots = [(1, Slot::Loaded(prog(1, "a"))), (2, Slot::Loaded(sizeless))];

    let config = ProgConfig {
        code_size: true,
        time_loaded: false,
        ..Default::default()
    };
    let mut records: Vec<Metric> = vec![];
    BpfProgInput::with_config(registry(slots.clone()), config)
        .gather(&mut records)
        .unwrap();

    let keys: Vec<&String> = records[0].fields.keys().collect();
    assert_eq!(keys, ["jited_size", "xlated_size"]);
    assert_eq!(records[0].field("jited_size"), Some(&FieldValue::UInt(101)));
    assert_eq!(records[0].field("xlated_size"), Some(&FieldValue::UInt(201)));
    assert!(records[1].fields.is_empty());

    let mut records: Vec<Metric> = vec![];
    BpfProgInput::with_config(registry(slots), ProgConfig::default())
        .gather(&mut records)
        .unwrap();
    assert!(records[0].field("jited_size").is_none());
    assert!(records[0].field("xlated_size").is_none());
}

#[test]
fn optional_tags_follow_toggles() {
    let mut with_btf = prog(1, "a");
    with_btf.btf_id = Some(77);
    let slots = [(1, Slot::Loaded(with_btf)), (2, Slot::Loaded(prog(2, "b")))];

    let mut records: Vec<Metric> = vec![];
    BpfProgInput::with_config(
        registry(slots.clone()),
        ProgConfig {
            tag: true,
            btf_id: true,
            ..Default::default()
        },
    )
    .gather(&mut records)
    .unwrap();
    assert_eq!(records[0].tag("tag"), Some("1f2e3d4c5b6a7988"));
    assert_eq!(records[0].tag("btf_id"), Some("77"));
    assert_eq!(records[1].tag("btf_id"), None);

    let mut records: Vec<Metric> = vec![];
    BpfProgInput::new(registry(slots))
        .gather(&mut records)
        .unwrap();
    assert_eq!(records[0].tag("tag"), None);
    assert_eq!(records[0].tag("btf_id"), None);
}

#[test]
fn durations_are_nanoseconds() {
    let mut records: Vec<Metric> = vec![];
    BpfProgInput::new(registry([(3, Slot::Loaded(prog(3, "c")))]))
        .gather(&mut records)
        .unwrap();
    assert_eq!(
        records[0].field("time_loaded"),
        Some(&FieldValue::UInt(3_000_000))
    );
}

#[test]
fn consecutive_cycles_match_except_timestamps() {
    let mut input = BpfProgInput::with_config(
        registry([
            (1, Slot::Loaded(prog(1, "a"))),
            (2, Slot::LookupFails),
            (4, Slot::Loaded(prog(4, "d"))),
        ]),
        ProgConfig::all(),
    );
    input.initialize();

    let mut first: Vec<Metric> = vec![];
    let mut second: Vec<Metric> = vec![];
    input.gather(&mut first).unwrap();
    input.gather(&mut second).unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.tags, b.tags);
        assert_eq!(a.fields, b.fields);
        assert!(b.timestamp >= a.timestamp);
    }
}
