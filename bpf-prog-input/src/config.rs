//! Attribute toggles for the `bpf_prog` input.

use serde::Deserialize;

/// Sample configuration with every option and its default.
pub const SAMPLE_CONFIG: &str = r#"# Read metadata of the eBPF programs loaded on the host.
bpf_prog:
  ## Add the program's instruction SHA as the "tag" tag.
  # tag: false

  ## Add the ID of the program's BTF object as the "btf_id" tag.
  # btf_id: false

  ## Add "jited_size" and "xlated_size" fields, in bytes.
  # code_size: false

  ## Add the "time_loaded" field, nanoseconds since boot.
  # time_loaded: true

  ## Add the "created_by_uid" field.
  # created_by_uid: false

  ## Add the "map_ids" field, a comma separated list of map IDs.
  # map_ids: false

  ## Add the "run_time" (ns) and "run_count" fields. Enables `BPF_ENABLE_STATS` for the
  ## lifetime of the process, which requires CAP_SYS_ADMIN and kernel 5.8.
  # statistics: false

  ## Add the "recursion_misses" field.
  # recursion_misses: false

  ## Add the "verified_instructions" field.
  # verified_instructions: false
"#;

/// Which optional attributes are added to each record.
///
/// Toggles only select tags and fields; every loaded program is visited regardless.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProgConfig {
    /// Add the `tag` tag.
    pub tag: bool,
    /// Add the `btf_id` tag.
    pub btf_id: bool,
    /// Add the `jited_size` and `xlated_size` fields.
    pub code_size: bool,
    /// Add the `time_loaded` field.
    pub time_loaded: bool,
    /// Add the `created_by_uid` field.
    pub created_by_uid: bool,
    /// Add the `map_ids` field.
    pub map_ids: bool,
    /// Enable runtime statistics and add the `run_time` and `run_count` fields.
    pub statistics: bool,
    /// Add the `recursion_misses` field.
    pub recursion_misses: bool,
    /// Add the `verified_instructions` field.
    pub verified_instructions: bool,
}

impl Default for ProgConfig {
    fn default() -> Self {
        Self {
            tag: false,
            btf_id: false,
            code_size: false,
            time_loaded: true,
            created_by_uid: false,
            map_ids: false,
            statistics: false,
            recursion_misses: false,
            verified_instructions: false,
        }
    }
}

impl ProgConfig {
    /// Every toggle switched on.
    pub fn all() -> Self {
        Self {
            tag: true,
            btf_id: true,
            code_size: true,
            time_loaded: true,
            created_by_uid: true,
            map_ids: true,
            statistics: true,
            recursion_misses: true,
            verified_instructions: true,
        }
    }
}
