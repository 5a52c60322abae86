//! End-to-end tests over a real index directory.
//!
//! Each test file covers a specific scenario, driving the tree through its
//! public operations against node files on disk.

#![cfg(test)]

mod helpers;

mod test_corruption;
mod test_fault_injection;
mod test_fixture_lookup;
mod test_lock;
mod test_reopen;
