//! Integration tests for the poll bridge
//! These drive the public API against a local Pusher-protocol server

mod harness;
mod pusher_server;

mod connection_test;
mod e2e_test;
