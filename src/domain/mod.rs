//! Domain types and the ports the application layer talks through.

pub mod account;
pub mod payment;
pub mod plan;
pub mod ports;
pub mod provisioning;
pub mod subscription;
