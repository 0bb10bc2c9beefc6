//! FFI bindings for sgnd nodes
//!
//! This module provides a C-compatible interface to single file-backed graph
//! nodes. All functions are panic-safe and use thread-local error reporting.
//!
//! # Safety Guarantees
//!
//! - No panic may cross the FFI boundary (enforced by `ffi_guard`)
//! - Strict UTF-8 validation for all string inputs
//! - Null pointer checks on all pointer arguments
//! - ABI stability via `#[repr(C)]` and `extern "C"`
//!
//! # Error Handling
//!
//! Errors are reported through:
//! - Return values: NULL for handles and strings, `-1` for status codes,
//!   `UINT64_MAX` / `UINT32_MAX` for numeric getters
//! - Thread-local error message: `sgnd_last_error_message()`
//!
//! A NULL from `sgnd_node_get_value()` with no error message set means the
//! key is absent.
//!
//! # Thread Safety
//!
//! A node handle is not thread-safe; use it from one thread at a time. Two
//! handles for the same id race on the backing file (last writer wins).

use libc::{c_char, c_int, size_t};
use sgnd_core::{Node, NodeOptions};
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::ptr;

/// Internal state holder (not exposed to C)
struct SgndNodeState {
    inner: Node,
}

/// Opaque handle to a node (C-compatible)
///
/// C code only sees pointers to this type, never the actual struct.
/// The real data is stored in `SgndNodeState`.
#[repr(C)]
pub struct SgndNode {
    _private: [u8; 0],
}

thread_local! {
    /// Thread-local storage for error messages
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message for the current thread
///
/// Interior NULs are replaced with "\\0" so reporting never panics.
fn set_last_error(err: impl std::fmt::Display) {
    LAST_ERROR.with(|cell| {
        let safe_msg = err.to_string().replace('\0', "\\0");
        let c_str = CString::new(safe_msg).unwrap_or_default();
        *cell.borrow_mut() = Some(c_str);
    });
}

/// Clear the last error message for the current thread
fn clear_last_error() {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Panic barrier that catches all panics at the FFI boundary
///
/// Returns `None` on panic after recording the panic message, so callers
/// can fall back to their sentinel value.
fn ffi_guard<F, R>(f: F) -> Option<R>
where
    F: FnOnce() -> R,
{
    // The operation is abandoned on panic, never resumed.
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => Some(result),
        Err(e) => {
            let msg = if let Some(s) = e.downcast_ref::<&str>() {
                format!("Panic: {s}")
            } else if let Some(s) = e.downcast_ref::<String>() {
                format!("Panic: {s}")
            } else {
                "Unknown panic".to_string()
            };
            set_last_error(msg);
            None
        }
    }
}

/// Borrow a C string argument as UTF-8, recording an error on failure.
///
/// # Safety
///
/// `ptr` must be NULL or a valid NUL-terminated string that outlives `'a`.
unsafe fn str_arg<'a>(ptr: *const c_char, what: &str) -> Option<&'a str> {
    if ptr.is_null() {
        set_last_error(format!("{what} cannot be NULL"));
        return None;
    }

    // SAFETY: Caller guarantees ptr is a valid C string
    let c_str = unsafe { CStr::from_ptr(ptr) };

    // STRICT UTF-8 CHECK: Do not use to_string_lossy()
    match c_str.to_str() {
        Ok(s) => Some(s),
        Err(_) => {
            set_last_error(format!("{what} must be valid UTF-8"));
            None
        }
    }
}

/// Resolve a handle to its node, recording an error for NULL.
///
/// # Safety
///
/// `ptr` must be NULL or a live pointer from `sgnd_node_load()` /
/// `sgnd_node_create()` with no other reference active.
unsafe fn node_mut<'a>(ptr: *mut SgndNode) -> Option<&'a mut Node> {
    // SAFETY: Caller guarantees ptr is valid and has exclusive access
    match unsafe { (ptr as *mut SgndNodeState).as_mut() } {
        Some(state) => Some(&mut state.inner),
        None => {
            set_last_error("Null node pointer");
            None
        }
    }
}

/// Shared-access variant of `node_mut`.
///
/// # Safety
///
/// Same as `node_mut`, minus exclusivity.
unsafe fn node_ref<'a>(ptr: *const SgndNode) -> Option<&'a Node> {
    // SAFETY: Caller guarantees ptr is valid
    unsafe { (ptr as *const SgndNodeState).as_ref() }.map(|state| &state.inner)
}

/// Move an owned string to C, or record an error for interior NULs.
fn into_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(c) => c.into_raw(),
        Err(_) => {
            set_last_error("String contains an interior NUL byte");
            ptr::null_mut()
        }
    }
}

/// Map a unit result to a C status code.
fn status<E: std::fmt::Display>(result: Result<(), E>) -> c_int {
    match result {
        Ok(()) => {
            clear_last_error();
            0
        }
        Err(e) => {
            set_last_error(e);
            -1
        }
    }
}

fn box_node(node: Node) -> *mut SgndNode {
    clear_last_error();
    Box::into_raw(Box::new(SgndNodeState { inner: node })) as *mut SgndNode
}

//
// === LIFECYCLE MANAGEMENT ===
//

/// Load a node from `<folder>/<id>_data.sgnd`
///
/// Identity and connections are read immediately; the payload is read on
/// first access.
///
/// # Returns
///
/// - Non-NULL handle on success
/// - NULL on failure (not found, corrupt file, I/O error)
///
/// # Example (C)
///
/// ```c
/// SgndNode* node = sgnd_node_load("graph", 5);
/// if (node == NULL) {
///     fprintf(stderr, "Error: %s\n", sgnd_last_error_message());
///     exit(1);
/// }
/// ```
///
/// # Safety
///
/// - `folder` must be a valid, NUL-terminated UTF-8 string
/// - Caller must free the returned pointer with `sgnd_node_free()`
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_load(folder: *const c_char, id: u64) -> *mut SgndNode {
    ffi_guard(|| {
        // SAFETY: Caller guarantees folder is a valid C string
        let Some(folder) = (unsafe { str_arg(folder, "Folder") }) else {
            return ptr::null_mut();
        };

        match Node::load(folder, id, &NodeOptions::default()) {
            Ok(node) => box_node(node),
            Err(e) => {
                set_last_error(e);
                ptr::null_mut()
            }
        }
    })
    .unwrap_or(ptr::null_mut())
}

/// Create a new node in memory
///
/// Nothing is written until `sgnd_node_write_data()` or
/// `sgnd_node_dump_data()`.
///
/// # Returns
///
/// - Non-NULL handle on success
/// - NULL if an argument is invalid (NULL, bad UTF-8, reserved separator)
///
/// # Safety
///
/// - `folder` and `name` must be valid, NUL-terminated UTF-8 strings
/// - Caller must free the returned pointer with `sgnd_node_free()`
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_create(
    folder: *const c_char,
    id: u64,
    name: *const c_char,
) -> *mut SgndNode {
    ffi_guard(|| {
        // SAFETY: Caller guarantees both are valid C strings
        let Some(folder) = (unsafe { str_arg(folder, "Folder") }) else {
            return ptr::null_mut();
        };
        let Some(name) = (unsafe { str_arg(name, "Name") }) else {
            return ptr::null_mut();
        };

        match Node::create(folder, id, name, &NodeOptions::default()) {
            Ok(node) => box_node(node),
            Err(e) => {
                set_last_error(e);
                ptr::null_mut()
            }
        }
    })
    .unwrap_or(ptr::null_mut())
}

/// Free a node handle
///
/// Pending changes are NOT written; call `sgnd_node_write_data()` first.
///
/// # Safety
///
/// - `ptr` must be NULL or a valid pointer from `sgnd_node_load()` /
///   `sgnd_node_create()`
/// - After this call, `ptr` is invalid and must not be used
/// - Safe to call with NULL (no-op)
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_free(ptr: *mut SgndNode) {
    if !ptr.is_null() {
        ffi_guard(|| {
            // SAFETY: Caller guarantees ptr is valid
            let _ = unsafe { Box::from_raw(ptr as *mut SgndNodeState) };
        });
    }
}

/// Free a string returned by this library
///
/// # Safety
///
/// `s` must be NULL or a pointer returned by `sgnd_node_name()` or
/// `sgnd_node_get_value()`, freed at most once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_string_free(s: *mut c_char) {
    if !s.is_null() {
        ffi_guard(|| {
            // SAFETY: Caller guarantees s came from CString::into_raw
            let _ = unsafe { CString::from_raw(s) };
        });
    }
}

//
// === IDENTITY & CONNECTIONS ===
//

/// Get the node id
///
/// # Returns
///
/// The id, or `UINT64_MAX` if `ptr` is NULL
///
/// # Safety
///
/// `ptr` must be NULL or a valid node handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_id(ptr: *const SgndNode) -> u64 {
    ffi_guard(|| unsafe { node_ref(ptr) }.map_or(u64::MAX, Node::id)).unwrap_or(u64::MAX)
}

/// Get the node name
///
/// # Returns
///
/// A newly allocated string (free with `sgnd_string_free()`), or NULL
///
/// # Safety
///
/// `ptr` must be NULL or a valid node handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_name(ptr: *const SgndNode) -> *mut c_char {
    ffi_guard(|| match unsafe { node_ref(ptr) } {
        Some(node) => into_c_string(node.name()),
        None => {
            set_last_error("Null node pointer");
            ptr::null_mut()
        }
    })
    .unwrap_or(ptr::null_mut())
}

/// Get the number of nodes pointing at this node
///
/// # Returns
///
/// The count, or `UINT32_MAX` if `ptr` is NULL
///
/// # Safety
///
/// `ptr` must be NULL or a valid node handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_reference_count(ptr: *const SgndNode) -> u32 {
    ffi_guard(|| unsafe { node_ref(ptr) }.map_or(u32::MAX, Node::reference_count))
        .unwrap_or(u32::MAX)
}

/// Get the number of outgoing connections
///
/// # Safety
///
/// `ptr` must be NULL or a valid node handle (NULL returns 0)
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_connection_count(ptr: *const SgndNode) -> size_t {
    ffi_guard(|| unsafe { node_ref(ptr) }.map_or(0, |n| n.connection_ids().len())).unwrap_or(0)
}

/// Copy outgoing connection ids into `out`
///
/// # Returns
///
/// Number of ids written (at most `cap`)
///
/// # Example (C)
///
/// ```c
/// size_t n = sgnd_node_connection_count(node);
/// uint64_t* ids = malloc(n * sizeof(uint64_t));
/// sgnd_node_connections(node, ids, n);
/// ```
///
/// # Safety
///
/// - `ptr` must be NULL or a valid node handle
/// - `out` must have space for at least `cap` u64 values
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_connections(
    ptr: *const SgndNode,
    out: *mut u64,
    cap: size_t,
) -> size_t {
    ffi_guard(|| {
        let Some(node) = (unsafe { node_ref(ptr) }) else {
            set_last_error("Null node pointer");
            return 0;
        };
        if out.is_null() {
            set_last_error("Null output buffer");
            return 0;
        }

        let ids = node.connection_ids();
        let count = ids.len().min(cap);

        // SAFETY: Caller guarantees out has space for cap elements
        unsafe { ptr::copy_nonoverlapping(ids.as_ptr(), out, count) };

        clear_last_error();
        count
    })
    .unwrap_or(0)
}

/// Increment the reference count
///
/// # Returns
///
/// 0 on success, -1 if the count is already `UINT32_MAX` or `ptr` is NULL
///
/// # Safety
///
/// `ptr` must be NULL or a valid node handle with exclusive access
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_add_reference(ptr: *mut SgndNode) -> c_int {
    ffi_guard(|| {
        let Some(node) = (unsafe { node_mut(ptr) }) else { return -1 };
        status(node.add_reference())
    })
    .unwrap_or(-1)
}

/// Decrement the reference count
///
/// # Returns
///
/// 0 on success, -1 if the count is already zero or `ptr` is NULL
///
/// # Safety
///
/// `ptr` must be NULL or a valid node handle with exclusive access
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_remove_reference(ptr: *mut SgndNode) -> c_int {
    ffi_guard(|| {
        let Some(node) = (unsafe { node_mut(ptr) }) else { return -1 };
        status(node.remove_reference())
    })
    .unwrap_or(-1)
}

/// Append an outgoing connection to `target`
///
/// The target's reference count is not updated.
///
/// # Safety
///
/// `ptr` must be NULL or a valid node handle with exclusive access
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_add_connection(ptr: *mut SgndNode, target: u64) -> c_int {
    ffi_guard(|| {
        let Some(node) = (unsafe { node_mut(ptr) }) else { return -1 };
        node.add_connection(target);
        clear_last_error();
        0
    })
    .unwrap_or(-1)
}

/// Remove the first outgoing connection to `target`
///
/// # Returns
///
/// 1 if removed, 0 if there was none, -1 if `ptr` is NULL
///
/// # Safety
///
/// `ptr` must be NULL or a valid node handle with exclusive access
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_remove_connection(ptr: *mut SgndNode, target: u64) -> c_int {
    ffi_guard(|| {
        let Some(node) = (unsafe { node_mut(ptr) }) else { return -1 };
        clear_last_error();
        c_int::from(node.remove_connection(target))
    })
    .unwrap_or(-1)
}

//
// === PAYLOAD ===
//

/// Look up a payload value
///
/// Loads the payload from disk on first use.
///
/// # Returns
///
/// - A newly allocated string (free with `sgnd_string_free()`)
/// - NULL if the key is absent (`sgnd_last_error_message()` is NULL)
/// - NULL on failure (`sgnd_last_error_message()` is set)
///
/// # Safety
///
/// - `ptr` must be NULL or a valid node handle with exclusive access
/// - `key` must be a valid, NUL-terminated UTF-8 string
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_get_value(ptr: *mut SgndNode, key: *const c_char) -> *mut c_char {
    ffi_guard(|| {
        let Some(node) = (unsafe { node_mut(ptr) }) else { return ptr::null_mut() };
        let Some(key) = (unsafe { str_arg(key, "Key") }) else { return ptr::null_mut() };

        match node.get_value(key) {
            Ok(Some(value)) => {
                clear_last_error();
                into_c_string(value)
            }
            Ok(None) => {
                clear_last_error();
                ptr::null_mut()
            }
            Err(e) => {
                set_last_error(e);
                ptr::null_mut()
            }
        }
    })
    .unwrap_or(ptr::null_mut())
}

/// Set a payload value
///
/// # Returns
///
/// 0 on success, -1 on failure
///
/// # Safety
///
/// - `ptr` must be NULL or a valid node handle with exclusive access
/// - `key` and `value` must be valid, NUL-terminated UTF-8 strings
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_set_value(
    ptr: *mut SgndNode,
    key: *const c_char,
    value: *const c_char,
) -> c_int {
    ffi_guard(|| {
        let Some(node) = (unsafe { node_mut(ptr) }) else { return -1 };
        let Some(key) = (unsafe { str_arg(key, "Key") }) else { return -1 };
        let Some(value) = (unsafe { str_arg(value, "Value") }) else { return -1 };
        status(node.set_value(key, value))
    })
    .unwrap_or(-1)
}

/// Erase a payload value
///
/// # Returns
///
/// 1 if the key was removed, 0 if it was absent, -1 on failure
///
/// # Safety
///
/// - `ptr` must be NULL or a valid node handle with exclusive access
/// - `key` must be a valid, NUL-terminated UTF-8 string
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_erase_value(ptr: *mut SgndNode, key: *const c_char) -> c_int {
    ffi_guard(|| {
        let Some(node) = (unsafe { node_mut(ptr) }) else { return -1 };
        let Some(key) = (unsafe { str_arg(key, "Key") }) else { return -1 };

        match node.erase_value(key) {
            Ok(removed) => {
                clear_last_error();
                c_int::from(removed.is_some())
            }
            Err(e) => {
                set_last_error(e);
                -1
            }
        }
    })
    .unwrap_or(-1)
}

//
// === CACHE CONTROL ===
//

/// Check whether the payload is resident in memory
///
/// # Returns
///
/// 1 if loaded, 0 if not loaded or `ptr` is NULL
///
/// # Safety
///
/// `ptr` must be NULL or a valid node handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_is_loaded(ptr: *const SgndNode) -> c_int {
    ffi_guard(|| unsafe { node_ref(ptr) }.map_or(0, |n| c_int::from(n.is_loaded()))).unwrap_or(0)
}

/// Load the payload if it is not resident
///
/// # Returns
///
/// 0 on success, -1 on failure
///
/// # Safety
///
/// `ptr` must be NULL or a valid node handle with exclusive access
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_load_data(ptr: *mut SgndNode) -> c_int {
    ffi_guard(|| {
        let Some(node) = (unsafe { node_mut(ptr) }) else { return -1 };
        status(node.load_data())
    })
    .unwrap_or(-1)
}

/// Write the node to disk if it has changes
///
/// # Returns
///
/// 1 if written, 0 if there was nothing to write, -1 on failure
///
/// # Safety
///
/// `ptr` must be NULL or a valid node handle with exclusive access
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_write_data(ptr: *mut SgndNode) -> c_int {
    ffi_guard(|| {
        let Some(node) = (unsafe { node_mut(ptr) }) else { return -1 };
        match node.write_data() {
            Ok(written) => {
                clear_last_error();
                c_int::from(written)
            }
            Err(e) => {
                set_last_error(e);
                -1
            }
        }
    })
    .unwrap_or(-1)
}

/// Write pending changes and release the payload from memory
///
/// # Returns
///
/// 0 on success, -1 on failure
///
/// # Safety
///
/// `ptr` must be NULL or a valid node handle with exclusive access
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_dump_data(ptr: *mut SgndNode) -> c_int {
    ffi_guard(|| {
        let Some(node) = (unsafe { node_mut(ptr) }) else { return -1 };
        status(node.dump_data())
    })
    .unwrap_or(-1)
}

/// Delete the node's backing file; the handle stays valid
///
/// # Returns
///
/// 1 if the file was deleted, 0 otherwise
///
/// # Safety
///
/// `ptr` must be NULL or a valid node handle with exclusive access
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sgnd_node_delete(ptr: *mut SgndNode) -> c_int {
    ffi_guard(|| {
        let Some(node) = (unsafe { node_mut(ptr) }) else { return 0 };
        if node.delete_node() {
            clear_last_error();
            1
        } else {
            set_last_error(format!("Failed to delete {}", node.path().display()));
            0
        }
    })
    .unwrap_or(0)
}

//
// === ERROR HANDLING ===
//

/// Get the last error message for the current thread
///
/// # Returns
///
/// - Pointer to NUL-terminated error string
/// - NULL if the last call succeeded
///
/// # Lifetime
///
/// Valid until the next FFI call on this thread. **Do NOT** free it.
#[unsafe(no_mangle)]
pub extern "C" fn sgnd_last_error_message() -> *const c_char {
    LAST_ERROR.with(|cell| cell.borrow().as_ref().map_or(ptr::null(), |s| s.as_ptr()))
}

//
// === VERSIONING ===
//

/// Get the library version
///
/// The returned pointer is valid for the lifetime of the program.
/// **Do NOT** free it.
#[unsafe(no_mangle)]
pub extern "C" fn sgnd_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

    VERSION.as_ptr().cast::<c_char>()
}

//
// === TESTS ===
//
