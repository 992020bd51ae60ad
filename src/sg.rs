//! Linux SCSI generic (`SG_IO`) passthrough.
//!
//! See `<scsi/sg.h>`. The header layout below is the version 3 interface
//! (`interface_id == 'S'`), which is accepted by both `/dev/sgN` and the
//! block nodes (`/dev/sdX`) of SCSI-backed disks.

use crate::command::{Read10Command, READ10_LEN};
use crate::error::{Error, Result};

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

const SG_IO: libc::c_ulong = 0x2285;
const SG_DXFER_FROM_DEV: libc::c_int = -3;
const SG_INFO_OK_MASK: libc::c_uint = 0x1;
const SG_INFO_OK: libc::c_uint = 0x0;
const SENSE_LEN: usize = 32;

#[repr(C)]
struct SgIoHdr {
    interface_id: libc::c_int,
    dxfer_direction: libc::c_int,
    cmd_len: libc::c_uchar,
    mx_sb_len: libc::c_uchar,
    iovec_count: libc::c_ushort,
    dxfer_len: libc::c_uint,
    dxferp: *mut libc::c_void,
    cmdp: *const libc::c_uchar,
    sbp: *mut libc::c_uchar,
    timeout: libc::c_uint,
    flags: libc::c_uint,
    pack_id: libc::c_int,
    usr_ptr: *mut libc::c_void,
    status: libc::c_uchar,
    masked_status: libc::c_uchar,
    msg_status: libc::c_uchar,
    sb_len_wr: libc::c_uchar,
    host_status: libc::c_ushort,
    driver_status: libc::c_ushort,
    resid: libc::c_int,
    duration: libc::c_uint,
    info: libc::c_uint,
}

/// Outcome of one passthrough call, as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Completion {
    info: u32,
    status: u8,
    host_status: u16,
    driver_status: u16,
    sense_key: u8,
    resid: i32,
}

impl Completion {
    fn is_ok(&self) -> bool {
        self.info & SG_INFO_OK_MASK == SG_INFO_OK
            && self.status == 0
            && self.host_status == 0
            && self.driver_status == 0
    }

    /// Bytes actually moved for a request of `requested` bytes.
    fn transferred(&self, requested: usize) -> usize {
        requested.saturating_sub(self.resid.max(0) as usize)
    }
}

/// Sense key from fixed (0x70/0x71) or descriptor (0x72/0x73) sense data.
fn sense_key(sense: &[u8]) -> u8 {
    match sense.first().map(|b| b & 0x7F) {
        Some(0x70) | Some(0x71) => sense.get(2).map_or(0, |b| b & 0x0F),
        Some(0x72) | Some(0x73) => sense.get(1).map_or(0, |b| b & 0x0F),
        _ => 0,
    }
}

/// `SG_IO` transport over an open device node.
#[derive(Debug)]
pub struct SgTransport {
    file: File,
    timeout_ms: u32,
}

impl SgTransport {
    /// Wrap an open device node. `timeout` saturates at `u32::MAX` ms.
    pub fn new(file: File, timeout: Duration) -> Self {
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        Self { file, timeout_ms }
    }

    fn issue(&self, cdb: &[u8; READ10_LEN], buf: &mut [u8]) -> Result<Completion> {
        let dxfer_len =
            libc::c_uint::try_from(buf.len()).map_err(|_| Error::bounds(0u64, buf.len()))?;
        let mut sense = [0u8; SENSE_LEN];

        let mut hdr = SgIoHdr {
            interface_id: b'S' as libc::c_int,
            dxfer_direction: SG_DXFER_FROM_DEV,
            cmd_len: READ10_LEN as libc::c_uchar,
            mx_sb_len: SENSE_LEN as libc::c_uchar,
            iovec_count: 0,
            dxfer_len,
            dxferp: buf.as_mut_ptr().cast(),
            cmdp: cdb.as_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: self.timeout_ms,
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        // SAFETY: `hdr` points at `cdb`, `buf` and `sense`, all of which
        // outlive the call, and `dxfer_len` / `mx_sb_len` match their sizes.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), SG_IO as _, &mut hdr) };
        if ret < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        let written = (hdr.sb_len_wr as usize).min(SENSE_LEN);
        Ok(Completion {
            info: hdr.info,
            status: hdr.status,
            host_status: hdr.host_status,
            driver_status: hdr.driver_status,
            sense_key: sense_key(&sense[..written]),
            resid: hdr.resid,
        })
    }
}

impl crate::transport::Transport for SgTransport {
    fn read10(&mut self, command: &Read10Command, buf: &mut [u8]) -> Result<usize> {
        let completion = self.issue(&command.to_bytes(), buf)?;
        if !completion.is_ok() {
            return Err(Error::CommandRejected {
                lba: command.logical_block_address,
                status: completion.status,
                host_status: completion.host_status,
                driver_status: completion.driver_status,
                sense_key: completion.sense_key,
            });
        }
        Ok(completion.transferred(buf.len()))
    }
}
