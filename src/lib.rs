#![allow(clippy::multiple_crate_versions)]

//! dprint-rs: render program values through the program's own
//! pretty-printing functions.
//!
//! A debugged program may carry functions such as
//! `char *debug_print_bytes(const Bytes *)` that know how to describe its
//! types. The crate maps type names to those functions (`registry`), works
//! out where a value lives (`value`), calls the function inside the stopped
//! process (`remote`), reads the returned string back and frees it
//! (`render`), and wires the whole thing into a debugger's type-summary
//! mechanism (`summary`).
//!
//! Two evaluation engines implement `remote::Target`: direct ptrace call
//! injection (`inferior`, driven by the `render-rs` binary) and a GDB
//! subprocess over the machine interface (`mi`, driven by `gdbrender-rs`).

pub mod breakpoint;
pub mod diag;
pub mod hwaccess;
pub mod inferior;
pub mod input;
pub mod mi;
pub mod param;
pub mod process;
pub mod registry;
pub mod remote;
pub mod render;
pub mod summary;
pub mod trace;
pub mod value;
