//! Compile-time defaults
//!
//! Generated by build.rs from the library defaults, optionally merged with
//! the file named by `GREENRT_CONFIG_RS` at build time.

include!(concat!(env!("OUT_DIR"), "/greenrt_merged_config.rs"));
