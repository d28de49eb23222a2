// ABOUTME: Library crate for paysock exposing the socket pool and configuration

#![allow(missing_docs)]

pub mod config;
pub mod socket_pool;
