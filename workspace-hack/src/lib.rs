#![allow(unused_crate_dependencies)]
// This is a stub lib.rs.
