//! [`ProgramRegistry`] backed by the `bpf(2)` syscall.

use std::{
    ffi::c_long,
    io, mem,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    time::Duration,
};

use aya_obj::generated::{bpf_attr, bpf_cmd, bpf_prog_info};
use tracing::debug;

use crate::{
    bpf_stats::{enable_stats_fd, StatsError},
    prog_info::{CodeSize, ProgramDescriptor, ProgramType},
    registry::{NextIdError, ProgramHandle, ProgramRegistry},
};

/// Byte offset one past the end of a `bpf_prog_info` field.
macro_rules! field_end {
    ($field:ident: $ty:ty) => {
        mem::offset_of!(bpf_prog_info, $field) + mem::size_of::<$ty>()
    };
}

/// The host kernel's program registry.
///
/// Every call needs `CAP_SYS_ADMIN` (or `CAP_BPF` on newer kernels).
#[derive(Clone, Copy, Debug, Default)]
pub struct KernelRegistry;

/// File descriptor of a loaded program, closed on drop.
#[derive(Debug)]
pub struct ProgramFd(OwnedFd);

impl ProgramRegistry for KernelRegistry {
    type Program = ProgramFd;
    type StatsGuard = OwnedFd;

    fn next_id(&self, after: u32) -> Result<Option<u32>, NextIdError> {
        bpf_prog_get_next_id(after).map_err(NextIdError::new)
    }

    fn open(&self, id: u32) -> io::Result<ProgramFd> {
        bpf_prog_get_fd_by_id(id).map(ProgramFd)
    }

    fn enable_runtime_stats(&self) -> Result<Option<OwnedFd>, StatsError> {
        enable_stats_fd()
    }
}

impl ProgramHandle for ProgramFd {
    fn describe(&self, map_ids: bool) -> io::Result<ProgramDescriptor> {
        // info gets populated by the kernel up to the size it knows about
        let mut info = unsafe { mem::zeroed::<bpf_prog_info>() };
        let info_len = bpf_prog_get_info_by_fd(&self.0, &mut info)?;
        let reported = |end: usize| end <= info_len as usize;

        let mut desc = ProgramDescriptor::new(
            info.id,
            name_from_raw(&info.name),
            ProgramType::from_raw(info.type_ as u32),
        );
        desc.tag = Some(info.tag);
        desc.code_size = Some(CodeSize {
            jited: info.jited_prog_len,
            xlated: info.xlated_prog_len,
        });
        if reported(field_end!(load_time: u64)) {
            desc.load_time = Some(Duration::from_nanos(info.load_time));
        }
        if reported(field_end!(created_by_uid: u32)) {
            desc.created_by_uid = Some(info.created_by_uid);
        }
        if map_ids && reported(field_end!(nr_map_ids: u32)) {
            match self.map_ids(info.nr_map_ids) {
                Ok(ids) => desc.map_ids = Some(ids),
                Err(err) => debug!(id = info.id, error = ?err, "failed to query map IDs"),
            }
        }
        if reported(field_end!(run_time_ns: u64)) && reported(field_end!(run_cnt: u64)) {
            desc.run_time = Some(Duration::from_nanos(info.run_time_ns));
            desc.run_count = Some(info.run_cnt);
        }
        if reported(field_end!(recursion_misses: u64)) {
            desc.recursion_misses = Some(info.recursion_misses);
        }
        if reported(field_end!(verified_insns: u32)) {
            desc.verified_instructions = Some(info.verified_insns);
        }
        if reported(field_end!(btf_id: u32)) && info.btf_id != 0 {
            desc.btf_id = Some(info.btf_id);
        }
        Ok(desc)
    }
}

impl ProgramFd {
    /// Second info query, filling in the IDs of the `count` maps used by the program.
    fn map_ids(&self, count: u32) -> io::Result<Vec<u32>> {
        if count == 0 {
            return Ok(vec![]);
        }
        let mut ids = vec![0u32; count as usize];
        let mut info = unsafe { mem::zeroed::<bpf_prog_info>() };
        info.nr_map_ids = count;
        info.map_ids = ids.as_mut_ptr() as u64;

        bpf_prog_get_info_by_fd(&self.0, &mut info)?;
        // Maps may have been released in between
        ids.truncate(info.nr_map_ids.min(count) as usize);
        Ok(ids)
    }
}

fn name_from_raw(raw: &[std::ffi::c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[inline]
fn sys_bpf(cmd: bpf_cmd, attr: &mut bpf_attr) -> io::Result<c_long> {
    let rc = unsafe {
        libc::syscall(
            libc::SYS_bpf,
            cmd as c_long,
            attr as *mut bpf_attr,
            mem::size_of::<bpf_attr>(),
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc)
}

fn bpf_prog_get_next_id(start_id: u32) -> io::Result<Option<u32>> {
    let mut attr = unsafe { mem::zeroed::<bpf_attr>() };
    attr.__bindgen_anon_6.__bindgen_anon_1.start_id = start_id;

    match sys_bpf(bpf_cmd::BPF_PROG_GET_NEXT_ID, &mut attr) {
        Ok(_) => Ok(Some(unsafe { attr.__bindgen_anon_6.next_id })),
        Err(err) if err.raw_os_error() == Some(libc::ENOENT) => Ok(None),
        Err(err) => Err(err),
    }
}

fn bpf_prog_get_fd_by_id(prog_id: u32) -> io::Result<OwnedFd> {
    let mut attr = unsafe { mem::zeroed::<bpf_attr>() };
    attr.__bindgen_anon_6.__bindgen_anon_1.prog_id = prog_id;

    let fd = sys_bpf(bpf_cmd::BPF_PROG_GET_FD_BY_ID, &mut attr)?;
    // the kernel hands over a fresh fd that nothing else owns
    Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

/// Returns how many bytes of `info` the kernel filled in.
fn bpf_prog_get_info_by_fd(prog: &OwnedFd, info: &mut bpf_prog_info) -> io::Result<u32> {
    let mut attr = unsafe { mem::zeroed::<bpf_attr>() };
    attr.info.bpf_fd = prog.as_raw_fd() as u32;
    attr.info.info = info as *mut bpf_prog_info as u64;
    attr.info.info_len = mem::size_of::<bpf_prog_info>() as u32;

    sys_bpf(bpf_cmd::BPF_OBJ_GET_INFO_BY_FD, &mut attr)?;
    Ok(unsafe { attr.info.info_len })
}
