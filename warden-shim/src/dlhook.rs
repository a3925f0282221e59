//! Post-lockdown `dlopen`/`dlsym` override.
//!
//! `dlopen` itself needs syscalls (`openat`, `mmap`) the strict filter
//! forbids, so nothing can be resolved dynamically once it's engaged.
//! [`crate::bootstrap`] resolves a fixed set of libraries/symbols up
//! front; this module swaps glibc's loader hook so that later
//! `dlopen`/`dlsym` calls only ever consult those pre-resolved tables.
//! The hook this relies on (`_dlfcn_hook`) is a glibc internal, not part
//! of any stable ABI — the same fragility the original sandbox's authors
//! accepted.

#![allow(unsafe_code)]

use std::os::raw::{c_char, c_int, c_void};
use std::sync::atomic::Ordering;

use crate::bootstrap::{self, AtomicHandle};

const MAX_LIBS: usize = 8;
const MAX_SYMS: usize = 32;

struct LibSlot {
    name: &'static str,
    handle: AtomicHandle,
}

struct SymSlot {
    lib_name: &'static str,
    sym_name: &'static str,
    handle: AtomicHandle,
    ptr: AtomicHandle,
}

// Backing storage is a fixed array of leaked, process-lifetime strings;
// `register_lib`/`register_sym` only ever run during bootstrap, once.
static mut LIBS: [Option<LibSlot>; MAX_LIBS] = [const { None }; MAX_LIBS];
static mut SYMS: [Option<SymSlot>; MAX_SYMS] = [const { None }; MAX_SYMS];

pub fn register_lib(name: &str, handle: *mut c_void) {
    let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
    // SAFETY: single-threaded, runs only during bootstrap.
    unsafe {
        for slot in (*(&raw mut LIBS)).iter_mut() {
            if slot.is_none() {
                *slot = Some(LibSlot {
                    name: leaked,
                    handle: bootstrap::null_handle(),
                });
                slot.as_ref().unwrap().handle.store(handle, Ordering::SeqCst);
                return;
            }
        }
    }
}

pub fn lib_handle(name: &str) -> Option<*mut c_void> {
    // SAFETY: single-threaded; table is only mutated during bootstrap.
    unsafe {
        (*(&raw const LIBS)).iter().flatten().find_map(|slot| {
            if slot.name == name {
                Some(slot.handle.load(Ordering::SeqCst))
            } else {
                None
            }
        })
    }
}

pub fn register_sym(lib_name: &str, sym_name: &str, ptr: *mut c_void) {
    let Some(handle) = lib_handle(lib_name) else {
        return;
    };
    let lib_leaked: &'static str = Box::leak(lib_name.to_owned().into_boxed_str());
    let sym_leaked: &'static str = Box::leak(sym_name.to_owned().into_boxed_str());
    // SAFETY: single-threaded, runs only during bootstrap.
    unsafe {
        for slot in (*(&raw mut SYMS)).iter_mut() {
            if slot.is_none() {
                let handle_cell = bootstrap::null_handle();
                handle_cell.store(handle, Ordering::SeqCst);
                let ptr_cell = bootstrap::null_handle();
                ptr_cell.store(ptr, Ordering::SeqCst);
                *slot = Some(SymSlot {
                    lib_name: lib_leaked,
                    sym_name: sym_leaked,
                    handle: handle_cell,
                    ptr: ptr_cell,
                });
                return;
            }
        }
    }
}

fn find_lib_by_name(file: *const c_char) -> *mut c_void {
    // SAFETY: table only mutated during bootstrap, read-only afterward.
    unsafe {
        for slot in (*(&raw const LIBS)).iter().flatten() {
            if bootstrap::c_str_eq(file, slot.name) {
                return slot.handle.load(Ordering::SeqCst);
            }
        }
    }
    std::ptr::null_mut()
}

fn find_sym(handle: *mut c_void, name: *const c_char) -> *mut c_void {
    // SAFETY: table only mutated during bootstrap, read-only afterward.
    unsafe {
        for slot in (*(&raw const SYMS)).iter().flatten() {
            if slot.handle.load(Ordering::SeqCst) == handle && bootstrap::c_str_eq(name, slot.sym_name) {
                return slot.ptr.load(Ordering::SeqCst);
            }
        }
    }
    std::ptr::null_mut()
}

extern "C" fn hook_dlopen(file: *const c_char, _mode: c_int, _caller: *mut c_void) -> *mut c_void {
    if file.is_null() {
        return std::ptr::null_mut();
    }
    let handle = find_lib_by_name(file);
    if handle.is_null() {
        crate::log::unimplemented("dlopen (not pre-resolved)");
    }
    handle
}

extern "C" fn hook_dlsym(handle: *mut c_void, name: *const c_char, _caller: *mut c_void) -> *mut c_void {
    let ptr = find_sym(handle, name);
    if ptr.is_null() {
        crate::log::unimplemented("dlsym (not pre-resolved)");
    }
    ptr
}

extern "C" fn hook_dlclose(_handle: *mut c_void) -> c_int {
    0
}

extern "C" fn hook_dlvsym(
    _handle: *mut c_void,
    _name: *const c_char,
    _version: *const c_char,
    _caller: *mut c_void,
) -> *mut c_void {
    crate::log::unimplemented("dlvsym");
    std::ptr::null_mut()
}

extern "C" fn hook_dlerror() -> *mut c_char {
    std::ptr::null_mut()
}

extern "C" fn hook_dladdr(_addr: *const c_void, _info: *mut libc::Dl_info) -> c_int {
    0
}

extern "C" fn hook_dladdr1(
    _addr: *const c_void,
    _info: *mut libc::Dl_info,
    _extra: *mut *mut c_void,
    _flags: c_int,
) -> c_int {
    0
}

extern "C" fn hook_dlinfo(_handle: *mut c_void, _request: c_int, _arg: *mut c_void, _caller: *mut c_void) -> c_int {
    -1
}

extern "C" fn hook_dlmopen(_nsid: isize, _file: *const c_char, _mode: c_int, _caller: *mut c_void) -> *mut c_void {
    crate::log::unimplemented("dlmopen");
    std::ptr::null_mut()
}

/// Mirrors glibc's internal `struct dlfcn_hook` layout.
#[repr(C)]
struct DlfcnHook {
    dlopen: extern "C" fn(*const c_char, c_int, *mut c_void) -> *mut c_void,
    dlclose: extern "C" fn(*mut c_void) -> c_int,
    dlsym: extern "C" fn(*mut c_void, *const c_char, *mut c_void) -> *mut c_void,
    dlvsym: extern "C" fn(*mut c_void, *const c_char, *const c_char, *mut c_void) -> *mut c_void,
    dlerror: extern "C" fn() -> *mut c_char,
    dladdr: extern "C" fn(*const c_void, *mut libc::Dl_info) -> c_int,
    dladdr1: extern "C" fn(*const c_void, *mut libc::Dl_info, *mut *mut c_void, c_int) -> c_int,
    dlinfo: extern "C" fn(*mut c_void, c_int, *mut c_void, *mut c_void) -> c_int,
    dlmopen: extern "C" fn(isize, *const c_char, c_int, *mut c_void) -> *mut c_void,
    pad: [*mut c_void; 4],
}

static HOOK: DlfcnHook = DlfcnHook {
    dlopen: hook_dlopen,
    dlclose: hook_dlclose,
    dlsym: hook_dlsym,
    dlvsym: hook_dlvsym,
    dlerror: hook_dlerror,
    dladdr: hook_dladdr,
    dladdr1: hook_dladdr1,
    dlinfo: hook_dlinfo,
    dlmopen: hook_dlmopen,
    pad: [std::ptr::null_mut(); 4],
};

unsafe extern "C" {
    #[allow(non_upper_case_globals)]
    static mut _dlfcn_hook: *mut c_void;
}

/// Installs [`HOOK`] as glibc's loader hook. Best-effort: if the running
/// glibc doesn't export `_dlfcn_hook` (it was dropped from glibc 2.34
/// onward), linking this symbol will simply fail to resolve and the
/// dynamic linker will refuse to load this shared object at all — in
/// which case the target must run against an older glibc, same as the
/// original sandbox's requirement.
pub fn install() {
    // SAFETY: single-threaded; `HOOK` outlives the process.
    unsafe {
        _dlfcn_hook = std::ptr::from_ref(&HOOK).cast_mut().cast();
    }
}
