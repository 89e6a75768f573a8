//! Kubernetes client for logdeck
//!
//! This crate resolves pods by name, deployment or label selector and
//! opens their log streams as line sources.

mod client;
mod overrides;
mod pod_logs;

pub use client::{KubeClient, KubeOptions, LogOptions};
pub use overrides::{ContainerOverrides, OverrideError};
pub use pod_logs::PodLogSource;

// Re-export types that are used in our public API
pub use logdeck_types::{ContainerInfo, PodInfo, PodStatus};
