//! Gatehouse - Request Admission Control
//!
//! This crate implements the admission-control subsystem of a network
//! service: for every incoming request it decides whether the request may
//! proceed or must be rejected because the caller exceeded an allotted rate.
//! It provides fixed-window and sliding-window-log limiting over an
//! in-memory, reclamation-bounded store, a tower middleware for in-process
//! pipelines, and an HTTP check API for remote ones.

pub mod admission;
pub mod config;
pub mod error;
pub mod http;
