//! Broker lifecycle - provisioning and deprovisioning workflows for managed
//! runtime instances.
//!
//! An operation is driven through an ordered list of idempotent steps. Each
//! step may finish, ask to be called again after a delay, or fail the
//! operation. State is persisted after every step so a restarted process
//! resumes where the previous one stopped.

pub mod avs;
pub mod clock;
pub mod config;
pub mod deprovisioning;
pub mod edp;
pub mod http;
pub mod logging;
pub mod operation;
pub mod process;
pub mod provisioning;
pub mod services;
pub mod storage;
pub mod workflows;
