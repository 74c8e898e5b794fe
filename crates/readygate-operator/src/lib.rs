//! readygate operator - controller wiring for the readiness taint reconciler

#![deny(missing_docs)]

pub mod controller_runner;
