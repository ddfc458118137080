use std::ffi::{c_char, CStr};
use std::ptr;
use std::time::Duration;

use log::error;

use crate::Client::{ClientBuilder, ClientConnection};
use crate::Core::config::DEFAULT_TIMEOUT;
use crate::Core::error::IpcError;
use crate::Core::naming::ClientType;
use crate::Transport::ShmTransport;

// Return codes. `ksched_client_request` returns ALLOWED / DENIED; only
// `ksched_client_heartbeat` returns SUCCESS. Errors are negative everywhere.

/// `ksched_client_request`: the launch was denied. Same value as `KSCHED_SUCCESS`.
pub const KSCHED_DENIED: i32 = 0;
/// `ksched_client_request`: the launch was allowed.
pub const KSCHED_ALLOWED: i32 = 1;
/// `ksched_client_heartbeat`: the heartbeat was recorded.
pub const KSCHED_SUCCESS: i32 = 0;
pub const KSCHED_ERROR_NULL_POINTER: i32 = -1;
pub const KSCHED_ERROR_INVALID_ARG: i32 = -2;
pub const KSCHED_ERROR_NOT_READY: i32 = -3;
pub const KSCHED_ERROR_TIMEOUT: i32 = -4;
pub const KSCHED_ERROR_DISCONNECTED: i32 = -5;
pub const KSCHED_ERROR_INTERNAL: i32 = -6;

/// Handle to a connected client (opaque pointer)
pub struct ClientHandle {
    inner: ClientConnection,
}

fn error_code(e: &IpcError) -> i32 {
    match e {
        IpcError::SchedulerNotReady | IpcError::Open { .. } | IpcError::NotInitialized { .. } => {
            KSCHED_ERROR_NOT_READY
        }
        IpcError::Timeout { .. } => KSCHED_ERROR_TIMEOUT,
        IpcError::Disconnected | IpcError::SlotReclaimed { .. } => KSCHED_ERROR_DISCONNECTED,
        IpcError::UnknownClientType(_) | IpcError::MalformedFrame(_) => KSCHED_ERROR_INVALID_ARG,
        _ => KSCHED_ERROR_INTERNAL,
    }
}

/// Borrow a C string; `None` for NULL or invalid UTF-8.
unsafe fn c_str<'a>(raw: *const c_char) -> Option<&'a str> {
    if raw.is_null() {
        return None;
    }
    CStr::from_ptr(raw).to_str().ok()
}

fn timeout_from_millis(timeout_ms: i64) -> Duration {
    if timeout_ms < 0 {
        DEFAULT_TIMEOUT
    } else {
        Duration::from_millis(timeout_ms as u64)
    }
}

// -----------------------------------------------------------------------------
// Client API
// -----------------------------------------------------------------------------

/// Connect to the scheduler of the calling user over shared memory.
///
/// # Arguments
/// * `client_type` - "pytorch" or "sglang" (NULL means "pytorch").
/// * `unique_id` - Channel id; NULL or "" uses the pid.
///
/// # Returns
/// * Pointer to `ClientHandle`, or NULL on failure.
#[no_mangle]
pub extern "C" fn ksched_client_connect(
    client_type: *const c_char,
    unique_id: *const c_char,
) -> *mut ClientHandle {
    let client_type = match unsafe { c_str(client_type) } {
        None => ClientType::default(),
        Some(raw) => match raw.parse::<ClientType>() {
            Ok(t) => t,
            Err(e) => {
                error!("ksched_client_connect: {}", e);
                return ptr::null_mut();
            }
        },
    };
    let unique_id = unsafe { c_str(unique_id) }.unwrap_or_default();

    let transport = ShmTransport::from_env();
    match ClientBuilder::new()
        .with_client_type(client_type)
        .with_unique_id(unique_id)
        .connect(&transport)
    {
        Ok(connection) => Box::into_raw(Box::new(ClientHandle { inner: connection })),
        Err(e) => {
            error!("ksched_client_connect: {}", e);
            ptr::null_mut()
        }
    }
}

/// Ask for a decision on a kernel launch.
///
/// # Arguments
/// * `handle` - Pointer to `ClientHandle`.
/// * `kernel_type` - Kernel type tag.
/// * `timeout_ms` - Response timeout; negative uses the default (5000 ms).
/// * `reason` / `reason_len` - Optional buffer receiving the NUL-terminated reason.
///
/// # Returns
/// * `KSCHED_ALLOWED` (1), `KSCHED_DENIED` (0), or a negative `KSCHED_ERROR_*`.
///   Never `KSCHED_SUCCESS`; a 0 here means denied.
#[no_mangle]
pub extern "C" fn ksched_client_request(
    handle: *mut ClientHandle,
    kernel_type: *const c_char,
    timeout_ms: i64,
    reason: *mut c_char,
    reason_len: usize,
) -> i32 {
    if handle.is_null() || kernel_type.is_null() {
        return KSCHED_ERROR_NULL_POINTER;
    }
    let Some(kernel_type) = (unsafe { c_str(kernel_type) }) else {
        return KSCHED_ERROR_INVALID_ARG;
    };
    if kernel_type.contains(['|', '\n']) {
        return KSCHED_ERROR_INVALID_ARG;
    }

    let client = unsafe { &mut (*handle).inner };
    match client.request(kernel_type, timeout_from_millis(timeout_ms)) {
        Ok(response) => {
            if !reason.is_null() && reason_len > 0 {
                let len = response.reason.len().min(reason_len - 1);
                unsafe {
                    ptr::copy_nonoverlapping(response.reason.as_ptr(), reason as *mut u8, len);
                    *reason.add(len) = 0;
                }
            }
            if response.allowed {
                KSCHED_ALLOWED
            } else {
                KSCHED_DENIED
            }
        }
        Err(e) => {
            error!("ksched_client_request: {}", e);
            error_code(&e)
        }
    }
}

/// Refresh the client's registry heartbeat.
///
/// # Returns
/// * `KSCHED_SUCCESS` (0), or a negative `KSCHED_ERROR_*`
///   (`KSCHED_ERROR_DISCONNECTED` once the registration was reaped).
#[no_mangle]
pub extern "C" fn ksched_client_heartbeat(handle: *mut ClientHandle) -> i32 {
    if handle.is_null() {
        return KSCHED_ERROR_NULL_POINTER;
    }
    let client = unsafe { &(*handle).inner };
    match client.heartbeat() {
        Ok(()) => KSCHED_SUCCESS,
        Err(e) => error_code(&e),
    }
}

/// Disconnect and free a client handle.
#[no_mangle]
pub extern "C" fn ksched_client_free(handle: *mut ClientHandle) {
    if !handle.is_null() {
        unsafe {
            let _ = Box::from_raw(handle); // Disconnects on drop
        }
    }
}
