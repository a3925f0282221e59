//! `LD_PRELOAD` target that engages kernel strict-mode seccomp and routes
//! every file-related libc call onward to a supervisor process over a pipe
//! pair.
//!
//! This crate is never linked against directly — it's built as a
//! `cdylib` and loaded by the dynamic linker ahead of the target binary's
//! own libc. [`bootstrap::init`] runs from `.init_array`, before the
//! target's `main`, and does the one-time setup (heap reservation, symbol
//! pre-resolution, lockdown) that can't safely happen afterward.

#![feature(c_variadic)]
#![allow(unsafe_code)]

mod alloc;
mod bootstrap;
mod dlhook;
mod fs_hooks;
mod ipc;
mod log;
mod state;
mod stdio;
mod stubs;
