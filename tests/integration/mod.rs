//! Integration tests for the relay
//!
//! Each module drives the relay through its real UDP sockets with synthetic
//! WireGuard traffic: a test socket plays the client, another plays the
//! backend server.

mod common;
mod expiry;
mod handshake;
mod obfuscation;
mod persistence;
mod roaming;
