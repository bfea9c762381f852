//! Fault handling for green stacks
//!
//! A green thread that runs past its stack hits the guard page below it.
//! The SIGSEGV/SIGBUS handler installed here recognizes faults inside a
//! guard page, reports the overflow on stderr and aborts. Every other
//! fault goes to whatever handler was installed before.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    }
}
