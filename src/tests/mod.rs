//! Unit tests for the pollcast core
//!
//! Module-local behaviour is tested inline; these files cover the
//! protocol, poll and pipeline components against in-memory fakes.


pub mod queued_test;
