//! C-compatible type definitions for FFI.

use crate::config::{PartialPolicy, RuntimeConfig};
use crate::data::{DataInput, DataOutput, SinkSlot};
use crate::error::{ErrorKind, StreamError};
use std::ffi::{c_char, CStr};

/// Result status codes for FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Operation succeeded.
    Ok = 0,
    /// Null pointer was passed.
    NullPointer = 1,
    /// Invalid UTF-8 string.
    InvalidUtf8 = 2,
    /// Invalid argument.
    InvalidArgument = 3,
    /// Unknown stream name or unique id.
    NotFound = 4,
    /// Stream name already in use.
    AlreadyExists = 5,
    /// Unknown entry or exit point.
    InvalidLink = 6,
    /// Call uses a different transmission mode than the stream.
    ModeMismatch = 7,
    /// Result queue overflowed or too many unmatched sends.
    Overflow = 8,
    /// No result before the timeout.
    Timeout = 9,
    /// Stream destroyed during the call.
    InstanceDestroyed = 10,
    /// Engine reported a failure.
    EngineFailure = 11,
    /// Invalid stream description or configuration.
    InvalidConfig = 12,
    /// Output buffer allocation failed.
    AllocationFailed = 13,
}

impl From<ErrorKind> for StreamStatus {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound => StreamStatus::NotFound,
            ErrorKind::AlreadyExists => StreamStatus::AlreadyExists,
            ErrorKind::InvalidLink => StreamStatus::InvalidLink,
            ErrorKind::ModeMismatch => StreamStatus::ModeMismatch,
            ErrorKind::Overflow => StreamStatus::Overflow,
            ErrorKind::Timeout => StreamStatus::Timeout,
            ErrorKind::InstanceDestroyed => StreamStatus::InstanceDestroyed,
            ErrorKind::EngineFailure => StreamStatus::EngineFailure,
            ErrorKind::InvalidConfig => StreamStatus::InvalidConfig,
        }
    }
}

impl From<&StreamError> for StreamStatus {
    fn from(err: &StreamError) -> Self {
        err.kind().into()
    }
}

/// Configuration for creating a manager. Zero fields take their defaults.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct CRuntimeConfig {
    /// Loopback engine worker threads (0 = one per CPU).
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub max_outstanding_per_source: u32,
    /// Timeout used when a get passes 0.
    pub default_timeout_ms: u64,
    /// Multi-sink completion window (0 = disabled).
    pub sink_completion_timeout_ms: u64,
    /// Treat incomplete multi-sink results as timeouts.
    pub fail_on_partial: bool,
    pub result_retention_ms: u64,
    pub max_streams: usize,
}

impl From<CRuntimeConfig> for RuntimeConfig {
    fn from(c: CRuntimeConfig) -> Self {
        let defaults = RuntimeConfig::default();
        RuntimeConfig {
            worker_count: c.worker_count,
            queue_capacity: c.queue_capacity,
            max_outstanding_per_source: c.max_outstanding_per_source,
            default_timeout_ms: c.default_timeout_ms,
            sink_completion_timeout_ms: c.sink_completion_timeout_ms,
            partial_policy: if c.fail_on_partial {
                PartialPolicy::Fail
            } else {
                PartialPolicy::ReturnPartial
            },
            result_retention_ms: if c.result_retention_ms == 0 {
                defaults.result_retention_ms
            } else {
                c.result_retention_ms
            },
            max_streams: c.max_streams,
            ..defaults
        }
        .normalized()
    }
}

/// Input buffer passed to the send functions.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CInput {
    pub data: *const u8,
    pub len: usize,
    pub fragment_id: i32,
    /// NUL-terminated, may be null.
    pub custom_param: *const c_char,
}

impl CInput {
    /// Copy into an owned [`DataInput`].
    ///
    /// # Safety
    /// `data` must be valid for `len` bytes (or null with `len == 0`), and
    /// `custom_param` must be null or a valid C string.
    pub unsafe fn to_input(&self) -> Result<DataInput, StreamStatus> {
        let mut input =
            DataInput::from_raw(self.data, self.len).ok_or(StreamStatus::NullPointer)?;
        input.fragment_id = self.fragment_id;
        if !self.custom_param.is_null() {
            input.custom_param = CStr::from_ptr(self.custom_param)
                .to_str()
                .map_err(|_| StreamStatus::InvalidUtf8)?
                .to_string();
        }
        Ok(input)
    }
}

/// Result buffer filled by the get functions.
///
/// `data` and `custom_param` are allocated with `malloc`; release them with
/// `streamrs_output_free` or `free`.
#[repr(C)]
#[derive(Debug)]
pub struct COutput {
    pub data: *mut u8,
    pub len: usize,
    pub fragment_id: i32,
    /// NUL-terminated, or null when empty.
    pub custom_param: *mut c_char,
    /// Per-slot status for multi-sink results.
    pub status: StreamStatus,
}

impl COutput {
    pub fn empty(status: StreamStatus) -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
            fragment_id: 0,
            custom_param: std::ptr::null_mut(),
            status,
        }
    }

    /// Copy an output into `malloc`ed memory.
    pub fn from_output(output: &DataOutput) -> Result<Self, StreamStatus> {
        let mut out = Self::empty(StreamStatus::Ok);
        out.fragment_id = output.fragment_id;

        if !output.data.is_empty() {
            // SAFETY: allocation is checked for null and sized to the copy.
            unsafe {
                let data = libc::malloc(output.data.len()) as *mut u8;
                if data.is_null() {
                    return Err(StreamStatus::AllocationFailed);
                }
                std::ptr::copy_nonoverlapping(output.data.as_ptr(), data, output.data.len());
                out.data = data;
                out.len = output.data.len();
            }
        }

        if !output.custom_param.is_empty() {
            let bytes = output.custom_param.as_bytes();
            // SAFETY: as above, plus one byte for the terminator.
            unsafe {
                let param = libc::malloc(bytes.len() + 1) as *mut u8;
                if param.is_null() {
                    out.release();
                    return Err(StreamStatus::AllocationFailed);
                }
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), param, bytes.len());
                *param.add(bytes.len()) = 0;
                out.custom_param = param as *mut c_char;
            }
        }

        Ok(out)
    }

    /// Convert one slot of a multi-sink result.
    pub fn from_slot(slot: &SinkSlot) -> Result<Self, StreamStatus> {
        match slot {
            SinkSlot::Delivered(output) => Self::from_output(output),
            SinkSlot::Failed(_) => Ok(Self::empty(StreamStatus::EngineFailure)),
            SinkSlot::Missing => Ok(Self::empty(StreamStatus::Timeout)),
        }
    }

    /// Free owned buffers and reset the pointers.
    pub fn release(&mut self) {
        // SAFETY: both pointers are null or came from `libc::malloc`.
        unsafe {
            if !self.data.is_null() {
                libc::free(self.data as *mut libc::c_void);
            }
            if !self.custom_param.is_null() {
                libc::free(self.custom_param as *mut libc::c_void);
            }
        }
        self.data = std::ptr::null_mut();
        self.custom_param = std::ptr::null_mut();
        self.len = 0;
    }
}
