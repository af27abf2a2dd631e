//! Test fixtures for integration testing

mod client_server;
pub mod faults;

pub use client_server::{ClientServerFixture, test_config};
