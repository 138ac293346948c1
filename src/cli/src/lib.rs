//! containerdisks CLI - publish and verify KubeVirt containerdisks.

pub mod catalog;
pub mod commands;
pub mod output;
