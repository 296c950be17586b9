// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

//! C ABI surface for host applications (language bindings, GUIs) that
//! want the partition-level interface without linking Rust directly.
//!
//! Every exported function is `catch_unwind`-wrapped: a panic crossing
//! the FFI boundary is undefined behavior, so panics are turned into a
//! sentinel failure return and recorded through [`qflash_last_error`]
//! instead of unwinding into the caller's stack.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};

use qflash::engine::ProtocolEngine;
use qflash::transport::Transport;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: impl Into<String>) {
    let msg = msg.into();
    let cstr = CString::new(msg.replace('\0', "")).unwrap_or_else(|_| {
        CString::new("qflash: error message contained interior NUL").unwrap()
    });
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(cstr));
}

/// The most recent failure recorded on this thread, or null if none
/// (or if it has already been retrieved and cleared by a later call
/// that cleared it). The returned pointer is valid until the next
/// `qflash_*` call on this thread.
#[unsafe(no_mangle)]
pub extern "C" fn qflash_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|s| s.as_ptr())
            .unwrap_or(std::ptr::null())
    })
}

/// Opaque handle around a boxed transport. Starts empty; `open` fills
/// it in with a concrete USB backend.
pub struct QflashTransportHandle {
    inner: Option<Box<dyn Transport>>,
}

/// Opaque handle around a protocol engine session.
pub struct QflashEngineHandle {
    inner: ProtocolEngine,
}

fn catch_unit(f: impl FnOnce() -> qflash::Result<()>) -> c_int {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => 1,
        Ok(Err(e)) => {
            set_last_error(e.to_string());
            0
        }
        Err(_) => {
            set_last_error("panic crossed the qflash FFI boundary");
            0
        }
    }
}

unsafe fn str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Allocate an unopened transport handle.
#[unsafe(no_mangle)]
pub extern "C" fn qflash_transport_create() -> *mut QflashTransportHandle {
    Box::into_raw(Box::new(QflashTransportHandle { inner: None }))
}

/// Free a transport handle. Safe to call on a handle that was never
/// opened. `handle` must not be used again afterwards.
///
/// # Safety
/// `handle` must be a pointer returned by [`qflash_transport_create`]
/// and not already freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qflash_transport_destroy(handle: *mut QflashTransportHandle) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle) });
    }
}

/// Enumerate and claim a bulk USB device: tries Qualcomm EDL first,
/// then MediaTek BROM. `serial_no` may be null to match any device.
/// Returns 1 on success, 0 on failure (see [`qflash_last_error`]).
///
/// # Safety
/// `handle` must be a live handle from [`qflash_transport_create`];
/// `serial_no` must be null or a valid NUL-terminated UTF-8 string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qflash_transport_open(
    handle: *mut QflashTransportHandle,
    serial_no: *const c_char,
) -> c_int {
    if handle.is_null() {
        set_last_error("null transport handle");
        return 0;
    }
    let serial = unsafe { str_arg(serial_no) };
    catch_unit(|| {
        let handle = unsafe { &mut *handle };
        let opened: Box<dyn Transport> = match qflash::usb::open_edl(serial) {
            Ok(t) => Box::new(t),
            Err(_) => Box::new(qflash::usb::open_brom(serial)?),
        };
        handle.inner = Some(opened);
        Ok(())
    })
}

/// Release the USB interface held by `handle`, if any.
///
/// # Safety
/// `handle` must be a live handle from [`qflash_transport_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qflash_transport_close(handle: *mut QflashTransportHandle) -> c_int {
    if handle.is_null() {
        set_last_error("null transport handle");
        return 0;
    }
    catch_unit(|| {
        let handle = unsafe { &mut *handle };
        if let Some(t) = handle.inner.as_mut() {
            t.close()?;
        }
        handle.inner = None;
        Ok(())
    })
}

/// Allocate a fresh, unidentified protocol engine.
#[unsafe(no_mangle)]
pub extern "C" fn qflash_engine_create() -> *mut QflashEngineHandle {
    Box::into_raw(Box::new(QflashEngineHandle {
        inner: ProtocolEngine::new(),
    }))
}

/// Free an engine handle.
///
/// # Safety
/// `handle` must be a pointer returned by [`qflash_engine_create`] and
/// not already freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qflash_engine_destroy(handle: *mut QflashEngineHandle) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle) });
    }
}

macro_rules! with_session {
    ($engine:expr, $transport:expr, |$e:ident, $t:ident| $body:expr) => {{
        if $engine.is_null() || $transport.is_null() {
            set_last_error("null engine or transport handle");
            return 0;
        }
        catch_unit(|| {
            let $e = unsafe { &mut (*$engine).inner };
            let handle = unsafe { &mut *$transport };
            let $t = handle
                .inner
                .as_mut()
                .ok_or_else(|| qflash::QflashError::Transport("transport not open".into()))?;
            $body
        })
    }};
}

/// Probe the device on `transport`: BROM first, then Sahara. Returns 1
/// if identification succeeded, 0 otherwise (the session stays
/// unidentified; partition operations will fail with `NotIdentified`).
///
/// # Safety
/// Both handles must be live, non-destroyed handles from their
/// respective `_create` functions.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qflash_identify(
    engine: *mut QflashEngineHandle,
    transport: *mut QflashTransportHandle,
) -> c_int {
    with_session!(engine, transport, |e, t| {
        if e.identify(t.as_mut())? {
            Ok(())
        } else {
            Err(qflash::QflashError::NotIdentified)
        }
    })
}

/// Fetch the partition table and serialize it into `buf` as
/// `name|size_in_bytes\n` lines. Returns the number of bytes written,
/// or -1 if `buf` is too small (nothing is written in that case).
///
/// # Safety
/// Both handles must be live; `buf` must point to at least `buf_len`
/// writable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qflash_get_partitions(
    engine: *mut QflashEngineHandle,
    transport: *mut QflashTransportHandle,
    buf: *mut u8,
    buf_len: usize,
) -> isize {
    if engine.is_null() || transport.is_null() || buf.is_null() {
        set_last_error("null argument to qflash_get_partitions");
        return -1;
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| -> qflash::Result<String> {
        let e = unsafe { &mut (*engine).inner };
        let handle = unsafe { &mut *transport };
        let t = handle
            .inner
            .as_mut()
            .ok_or_else(|| qflash::QflashError::Transport("transport not open".into()))?;
        let parts = e.get_partitions(t.as_mut())?;
        let mut out = String::new();
        for p in parts {
            out.push_str(&format!("{}|{}\n", p.name, p.size_in_bytes));
        }
        Ok(out)
    }));

    let serialized = match result {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            set_last_error(e.to_string());
            return -1;
        }
        Err(_) => {
            set_last_error("panic crossed the qflash FFI boundary");
            return -1;
        }
    };

    if serialized.len() > buf_len {
        set_last_error(format!(
            "partition table is {} bytes, buffer is only {buf_len}",
            serialized.len()
        ));
        return -1;
    }

    unsafe {
        std::ptr::copy_nonoverlapping(serialized.as_ptr(), buf, serialized.len());
    }
    serialized.len() as isize
}

/// Dump `name` in full to `out_path`. Returns 1 on success, 0 on
/// failure.
///
/// # Safety
/// Both handles must be live; `name` and `out_path` must be valid
/// NUL-terminated UTF-8 strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qflash_dump_partition(
    engine: *mut QflashEngineHandle,
    transport: *mut QflashTransportHandle,
    name: *const c_char,
    out_path: *const c_char,
) -> c_int {
    let (name, out_path) = unsafe {
        match (str_arg(name), str_arg(out_path)) {
            (Some(n), Some(p)) => (n.to_string(), p.to_string()),
            _ => {
                set_last_error("name/out_path must be valid UTF-8");
                return 0;
            }
        }
    };
    with_session!(engine, transport, |e, t| {
        let data = e.dump_partition(t.as_mut(), &name)?;
        std::fs::write(&out_path, data)?;
        Ok(())
    })
}

/// Overwrite `name` with the contents of `in_path`. Returns 1 on
/// success, 0 on failure.
///
/// # Safety
/// Both handles must be live; `name` and `in_path` must be valid
/// NUL-terminated UTF-8 strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qflash_flash_partition(
    engine: *mut QflashEngineHandle,
    transport: *mut QflashTransportHandle,
    name: *const c_char,
    in_path: *const c_char,
) -> c_int {
    let (name, in_path) = unsafe {
        match (str_arg(name), str_arg(in_path)) {
            (Some(n), Some(p)) => (n.to_string(), p.to_string()),
            _ => {
                set_last_error("name/in_path must be valid UTF-8");
                return 0;
            }
        }
    };
    with_session!(engine, transport, |e, t| {
        let data = std::fs::read(&in_path)?;
        e.flash_partition(t.as_mut(), &name, &data)
    })
}

/// Erase `name` outright. Returns 1 on success, 0 on failure.
///
/// # Safety
/// Both handles must be live; `name` must be a valid NUL-terminated
/// UTF-8 string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qflash_erase_partition(
    engine: *mut QflashEngineHandle,
    transport: *mut QflashTransportHandle,
    name: *const c_char,
) -> c_int {
    let name = unsafe {
        match str_arg(name) {
            Some(n) => n.to_string(),
            None => {
                set_last_error("name must be valid UTF-8");
                return 0;
            }
        }
    };
    with_session!(engine, transport, |e, t| e.erase_partition(t.as_mut(), &name))
}
