//! FFI functions for stream management.

use super::types::{CInput, COutput, CRuntimeConfig, StreamStatus};
use crate::config::RuntimeConfig;
use crate::data::{DataInput, SourceSelector};
use crate::engine::LoopbackEngine;
use crate::error::StreamError;
use crate::runtime::PipelineRegistry;
use std::ffi::{c_char, CStr};
use std::sync::Arc;
use std::time::Duration;

/// A registry of streams running on the in-process engine.
pub struct StreamManager {
    registry: PipelineRegistry,
}

impl StreamManager {
    pub fn new(config: RuntimeConfig) -> Result<Self, StreamError> {
        let engine = Arc::new(LoopbackEngine::from_config(&config)?);
        Ok(Self {
            registry: PipelineRegistry::new(engine, config),
        })
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    fn timeout(&self, timeout_ms: u32) -> Duration {
        if timeout_ms == 0 {
            self.registry.config().default_timeout()
        } else {
            Duration::from_millis(u64::from(timeout_ms))
        }
    }
}

/// Opaque handle to a StreamManager.
pub type ManagerHandle = *mut StreamManager;

/// Unwrap a `Result<_, StreamStatus>` or return the status.
macro_rules! ffi_try {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(status) => return status,
        }
    };
}

unsafe fn str_arg<'a>(ptr: *const c_char) -> Result<&'a str, StreamStatus> {
    if ptr.is_null() {
        return Err(StreamStatus::NullPointer);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| StreamStatus::InvalidUtf8)
}

fn fail(err: StreamError) -> StreamStatus {
    tracing::debug!(error = %err, "ffi call failed");
    StreamStatus::from(&err)
}

/// Map a registry result onto a status.
fn status<T>(result: Result<T, StreamError>) -> StreamStatus {
    match result {
        Ok(_) => StreamStatus::Ok,
        Err(err) => fail(err),
    }
}

/// Create a manager.
///
/// # Safety
/// out_handle must be a valid pointer; config may be null.
#[no_mangle]
pub unsafe extern "C" fn streamrs_manager_create(
    config: *const CRuntimeConfig,
    out_handle: *mut ManagerHandle,
) -> StreamStatus {
    if out_handle.is_null() {
        return StreamStatus::NullPointer;
    }

    let cfg = if config.is_null() {
        RuntimeConfig::default()
    } else {
        (*config).clone().into()
    };

    let manager = ffi_try!(StreamManager::new(cfg).map_err(fail));
    *out_handle = Box::into_raw(Box::new(manager));

    StreamStatus::Ok
}

/// Destroy every stream and free the manager.
///
/// # Safety
/// Handle must be valid or null.
#[no_mangle]
pub unsafe extern "C" fn streamrs_manager_free(handle: ManagerHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Create a stream from a JSON graph description.
///
/// # Safety
/// Handle must be valid; name and description must be C strings.
#[no_mangle]
pub unsafe extern "C" fn streamrs_create_stream(
    handle: ManagerHandle,
    name: *const c_char,
    description: *const c_char,
) -> StreamStatus {
    if handle.is_null() {
        return StreamStatus::NullPointer;
    }

    let mgr = &*handle;
    let name = ffi_try!(str_arg(name));
    let description = ffi_try!(str_arg(description));
    status(mgr.registry.create_from_json(name, description))
}

/// Create every stream of a `{ "name": description }` JSON object.
///
/// # Safety
/// Handle must be valid; descriptions must be a C string.
#[no_mangle]
pub unsafe extern "C" fn streamrs_create_multiple_streams(
    handle: ManagerHandle,
    descriptions: *const c_char,
) -> StreamStatus {
    if handle.is_null() {
        return StreamStatus::NullPointer;
    }

    let mgr = &*handle;
    let descriptions = ffi_try!(str_arg(descriptions));
    status(mgr.registry.create_multiple(descriptions))
}

/// Destroy a stream.
///
/// # Safety
/// Handle must be valid; name must be a C string.
#[no_mangle]
pub unsafe extern "C" fn streamrs_destroy_stream(
    handle: ManagerHandle,
    name: *const c_char,
) -> StreamStatus {
    if handle.is_null() {
        return StreamStatus::NullPointer;
    }

    let mgr = &*handle;
    let name = ffi_try!(str_arg(name));
    status(mgr.registry.destroy(name))
}

/// Destroy every stream.
///
/// # Safety
/// Handle must be valid.
#[no_mangle]
pub unsafe extern "C" fn streamrs_destroy_all_streams(handle: ManagerHandle) -> StreamStatus {
    if handle.is_null() {
        return StreamStatus::NullPointer;
    }

    (*handle).registry.destroy_all();
    StreamStatus::Ok
}

/// Send to an entry point in indexed mode.
///
/// # Safety
/// Handle must be valid; name must be a C string; input must be valid.
#[no_mangle]
pub unsafe extern "C" fn streamrs_send_data(
    handle: ManagerHandle,
    name: *const c_char,
    source_index: usize,
    input: *const CInput,
) -> StreamStatus {
    if handle.is_null() || input.is_null() {
        return StreamStatus::NullPointer;
    }

    let mgr = &*handle;
    let name = ffi_try!(str_arg(name));
    let input = ffi_try!((*input).to_input());
    status(mgr.registry.send(name, source_index, input))
}

/// Send to an entry point and receive the unique id of the result.
///
/// # Safety
/// Handle must be valid; name must be a C string; input and out_id must be valid.
#[no_mangle]
pub unsafe extern "C" fn streamrs_send_data_with_unique_id(
    handle: ManagerHandle,
    name: *const c_char,
    source_index: usize,
    input: *const CInput,
    out_id: *mut u64,
) -> StreamStatus {
    if handle.is_null() || input.is_null() || out_id.is_null() {
        return StreamStatus::NullPointer;
    }

    let mgr = &*handle;
    let name = ffi_try!(str_arg(name));
    let input = ffi_try!((*input).to_input());
    *out_id = ffi_try!(mgr.registry.send_with_id(name, source_index, input).map_err(fail));

    StreamStatus::Ok
}

/// Send `count` inputs to `count` entry points under one unique id.
///
/// # Safety
/// Handle must be valid; name must be a C string; source_indices and inputs
/// must hold `count` elements; out_id must be valid.
#[no_mangle]
pub unsafe extern "C" fn streamrs_send_multi_data_with_unique_id(
    handle: ManagerHandle,
    name: *const c_char,
    source_indices: *const usize,
    inputs: *const CInput,
    count: usize,
    out_id: *mut u64,
) -> StreamStatus {
    if handle.is_null() || source_indices.is_null() || inputs.is_null() || out_id.is_null() {
        return StreamStatus::NullPointer;
    }
    if count == 0 {
        return StreamStatus::InvalidArgument;
    }

    let mgr = &*handle;
    let name = ffi_try!(str_arg(name));
    let sources: Vec<SourceSelector> = std::slice::from_raw_parts(source_indices, count)
        .iter()
        .map(|&i| SourceSelector::Index(i))
        .collect();
    let inputs = ffi_try!(std::slice::from_raw_parts(inputs, count)
        .iter()
        .map(|c| c.to_input())
        .collect::<Result<Vec<DataInput>, _>>());

    *out_id = ffi_try!(mgr.registry.send_multi(name, &sources, inputs).map_err(fail));

    StreamStatus::Ok
}

/// Take the oldest result of an exit point (indexed mode).
///
/// A timeout of 0 uses the manager's default.
///
/// # Safety
/// Handle must be valid; name must be a C string; out must be valid.
#[no_mangle]
pub unsafe extern "C" fn streamrs_get_result(
    handle: ManagerHandle,
    name: *const c_char,
    sink_index: usize,
    timeout_ms: u32,
    out: *mut COutput,
) -> StreamStatus {
    if handle.is_null() || out.is_null() {
        return StreamStatus::NullPointer;
    }

    let mgr = &*handle;
    let name = ffi_try!(str_arg(name));
    let output = ffi_try!(mgr
        .registry
        .get_result(name, sink_index, mgr.timeout(timeout_ms))
        .map_err(fail));
    *out = ffi_try!(COutput::from_output(&output));

    StreamStatus::Ok
}

/// Wait for the result of a unique id.
///
/// # Safety
/// Handle must be valid; name must be a C string; out must be valid.
#[no_mangle]
pub unsafe extern "C" fn streamrs_get_result_with_unique_id(
    handle: ManagerHandle,
    name: *const c_char,
    unique_id: u64,
    timeout_ms: u32,
    out: *mut COutput,
) -> StreamStatus {
    if handle.is_null() || out.is_null() {
        return StreamStatus::NullPointer;
    }

    let mgr = &*handle;
    let name = ffi_try!(str_arg(name));
    let output = ffi_try!(mgr
        .registry
        .get_result_with_id(name, unique_id, mgr.timeout(timeout_ms))
        .map_err(fail));
    *out = ffi_try!(COutput::from_output(&output));

    StreamStatus::Ok
}

/// Wait for every exit point's result of a unique id.
///
/// `outs` must have room for one entry per exit point; `out_count` receives
/// the number of exit points. Missing slots carry `Timeout`, failed ones
/// `EngineFailure`.
///
/// # Safety
/// Handle must be valid; name must be a C string; outs must hold `capacity`
/// elements; out_count must be valid.
#[no_mangle]
pub unsafe extern "C" fn streamrs_get_multi_result_with_unique_id(
    handle: ManagerHandle,
    name: *const c_char,
    unique_id: u64,
    timeout_ms: u32,
    outs: *mut COutput,
    capacity: usize,
    out_count: *mut usize,
) -> StreamStatus {
    if handle.is_null() || outs.is_null() || out_count.is_null() {
        return StreamStatus::NullPointer;
    }

    let mgr = &*handle;
    let name = ffi_try!(str_arg(name));
    let stream = ffi_try!(mgr.registry.get(name).map_err(fail));
    let sinks = stream.topology().sink_count();
    *out_count = sinks;
    if capacity < sinks {
        return StreamStatus::InvalidArgument;
    }

    let result = ffi_try!(stream
        .get_multi(unique_id, mgr.timeout(timeout_ms))
        .map_err(fail));
    // `outs` may be uninitialized, so write through the raw pointer.
    for (i, slot) in result.slots.iter().enumerate() {
        match COutput::from_slot(slot) {
            Ok(converted) => outs.add(i).write(converted),
            Err(status) => {
                for j in 0..i {
                    (*outs.add(j)).release();
                }
                return status;
            }
        }
    }

    StreamStatus::Ok
}

/// Give up on a unique id; a result arriving later is discarded.
///
/// # Safety
/// Handle must be valid; name must be a C string.
#[no_mangle]
pub unsafe extern "C" fn streamrs_drop_unique_id(
    handle: ManagerHandle,
    name: *const c_char,
    unique_id: u64,
) -> StreamStatus {
    if handle.is_null() {
        return StreamStatus::NullPointer;
    }

    let mgr = &*handle;
    let name = ffi_try!(str_arg(name));
    status(mgr.registry.drop_result(name, unique_id))
}

/// Free the buffers of an output filled by a get function.
///
/// # Safety
/// out must be null or point to an output filled by this library.
#[no_mangle]
pub unsafe extern "C" fn streamrs_output_free(out: *mut COutput) {
    if let Some(out) = out.as_mut() {
        out.release();
    }
}

/// Install a log subscriber. Returns false if one was already installed.
///
/// # Safety
/// filter must be null or a C string.
#[no_mangle]
pub unsafe extern "C" fn streamrs_init_logging(filter: *const c_char) -> bool {
    let directive = str_arg(filter).unwrap_or("streamrs=info");
    crate::logging::init_logging(directive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    const DESC: &str = r#"{
        "appsrc0": { "factory": "appsrc", "next": "tee" },
        "appsrc1": { "factory": "appsrc", "next": "tee" },
        "tee": { "factory": "tee", "next": ["appsink0", "appsink1"] },
        "appsink0": { "factory": "appsink" },
        "appsink1": { "factory": "appsink" }
    }"#;

    fn input(bytes: &[u8]) -> CInput {
        CInput {
            data: bytes.as_ptr(),
            len: bytes.len(),
            fragment_id: 2,
            custom_param: ptr::null(),
        }
    }

    unsafe fn setup(name: &CString) -> ManagerHandle {
        let config = CRuntimeConfig {
            worker_count: 2,
            ..CRuntimeConfig::default()
        };
        let mut handle: ManagerHandle = ptr::null_mut();
        assert_eq!(streamrs_manager_create(&config, &mut handle), StreamStatus::Ok);
        let desc = CString::new(DESC).unwrap();
        assert_eq!(
            streamrs_create_stream(handle, name.as_ptr(), desc.as_ptr()),
            StreamStatus::Ok
        );
        handle
    }

    #[test]
    fn test_correlated_round_trip() {
        unsafe {
            let name = CString::new("ffi-single").unwrap();
            let handle = setup(&name);

            let payload = b"frame";
            let mut id = u64::MAX;
            assert_eq!(
                streamrs_send_data_with_unique_id(handle, name.as_ptr(), 0, &input(payload), &mut id),
                StreamStatus::Ok
            );
            assert_eq!(id, 0);

            let mut out = COutput::empty(StreamStatus::Ok);
            assert_eq!(
                streamrs_get_result_with_unique_id(handle, name.as_ptr(), id, 2000, &mut out),
                StreamStatus::Ok
            );
            assert_eq!(std::slice::from_raw_parts(out.data, out.len), payload);
            assert_eq!(out.fragment_id, 2);
            streamrs_output_free(&mut out);

            assert_eq!(
                streamrs_get_result_with_unique_id(handle, name.as_ptr(), id, 10, &mut out),
                StreamStatus::NotFound
            );
            streamrs_manager_free(handle);
        }
    }

    #[test]
    fn test_multi_round_trip() {
        unsafe {
            let name = CString::new("ffi-multi").unwrap();
            let handle = setup(&name);

            let indices = [0usize, 1];
            let inputs = [input(b"a"), input(b"b")];
            let mut id = 0;
            assert_eq!(
                streamrs_send_multi_data_with_unique_id(
                    handle,
                    name.as_ptr(),
                    indices.as_ptr(),
                    inputs.as_ptr(),
                    2,
                    &mut id
                ),
                StreamStatus::Ok
            );

            let mut outs = [COutput::empty(StreamStatus::Ok), COutput::empty(StreamStatus::Ok)];
            let mut count = 0;
            assert_eq!(
                streamrs_get_multi_result_with_unique_id(
                    handle,
                    name.as_ptr(),
                    id,
                    2000,
                    outs.as_mut_ptr(),
                    1,
                    &mut count
                ),
                StreamStatus::InvalidArgument
            );
            assert_eq!(count, 2);

            assert_eq!(
                streamrs_get_multi_result_with_unique_id(
                    handle,
                    name.as_ptr(),
                    id,
                    2000,
                    outs.as_mut_ptr(),
                    outs.len(),
                    &mut count
                ),
                StreamStatus::Ok
            );
            for out in outs.iter_mut() {
                assert_eq!(out.status, StreamStatus::Ok);
                assert_eq!(out.len, 1);
                streamrs_output_free(out);
            }
            streamrs_manager_free(handle);
        }
    }

    #[test]
    fn test_argument_errors() {
        unsafe {
            let name = CString::new("ffi-args").unwrap();
            let handle = setup(&name);
            let desc = CString::new(DESC).unwrap();

            assert_eq!(
                streamrs_create_stream(handle, name.as_ptr(), desc.as_ptr()),
                StreamStatus::AlreadyExists
            );
            assert_eq!(
                streamrs_create_stream(ptr::null_mut(), name.as_ptr(), desc.as_ptr()),
                StreamStatus::NullPointer
            );
            let bad = [0xffu8, 0];
            assert_eq!(
                streamrs_destroy_stream(handle, bad.as_ptr() as *const c_char),
                StreamStatus::InvalidUtf8
            );
            assert_eq!(
                streamrs_send_data(handle, name.as_ptr(), 9, &input(b"x")),
                StreamStatus::InvalidLink
            );
            let repeated = [1usize, 1];
            let inputs = [input(b"a"), input(b"b")];
            let mut id = u64::MAX;
            assert_eq!(
                streamrs_send_multi_data_with_unique_id(
                    handle,
                    name.as_ptr(),
                    repeated.as_ptr(),
                    inputs.as_ptr(),
                    2,
                    &mut id
                ),
                StreamStatus::InvalidLink
            );
            assert_eq!(id, u64::MAX);
            assert_eq!(
                streamrs_send_data_with_unique_id(handle, name.as_ptr(), 0, ptr::null(), &mut id),
                StreamStatus::NullPointer
            );
            assert_eq!(streamrs_destroy_all_streams(ptr::null_mut()), StreamStatus::NullPointer);
            assert_eq!(streamrs_destroy_stream(handle, name.as_ptr()), StreamStatus::Ok);
            assert_eq!(
                streamrs_destroy_stream(handle, name.as_ptr()),
                StreamStatus::NotFound
            );
            assert_eq!(streamrs_destroy_all_streams(handle), StreamStatus::Ok);
            streamrs_manager_free(handle);
        }
    }
}
