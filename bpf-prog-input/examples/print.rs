//! Prints `bpf_prog` records to terminal in 1 second interval.

use std::{io, thread::sleep, time::Duration};

use anyhow::Result;
use bpf_prog_input::{BpfProgInput, KernelRegistry, LineProtocol, ProgConfig};

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let config = ProgConfig {
        code_size: true,
        statistics: true,
        verified_instructions: true,
        ..Default::default()
    };
    let mut input = BpfProgInput::with_config(KernelRegistry, config);
    input.initialize();
    if !input.stats_enabled() {
        panic!("BPF_ENABLE_STATS not available");
    }

    loop {
        let mut out = LineProtocol::new(io::stdout().lock());
        input.gather(&mut out)?;
        drop(out.finish()?);
        println!("---");

        sleep(Duration::from_secs(1));
    }
}
