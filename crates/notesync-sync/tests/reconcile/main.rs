//! Integration tests for notesync-sync
//!
//! Runs several devices, each with its own local store and engine, against
//! one shared in-memory remote store and checks that they converge.

mod common;

mod test_conflicts;
mod test_pull;
mod test_push;
mod test_queue;
mod test_recovery;
mod test_poller;
