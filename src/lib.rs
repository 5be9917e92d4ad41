//! Node-level kernel network-state reconciliation.
//!
//! This crate drives the kernel's routing, packet-marking, and tunable state
//! towards a declared target so that hairpin traffic (traffic a node sends to
//! itself through its externally visible address) is NAT'd and routed through
//! a dedicated table while everything else keeps using normal routing.
//!
//! The building blocks, bottom up:
//!
//! - [`primitives`]: narrow capability traits over the kernel clients
//!   (tunables, packet filter, routes, policy rules) with production
//!   implementations, plus the shared [`primitives::KernelError`] taxonomy.
//! - [`config`]: [`config::ConfigItem`], one idempotent unit of desired kernel
//!   state, and [`config::ConfigSet`], the ordered unit of reconciliation and
//!   rollback.
//! - [`discovery`]: resolution of the node's default interface and gateway.
//! - [`policy_routing`]: the process-wide assembly building the hairpin
//!   policy-routing config set from discovered network facts.
//!
//! Scheduling is the caller's job: [`config::ConfigSet::ensure`] is
//! re-entrant and idempotent, so it can be re-run periodically or on
//! network-change events, and [`config::ConfigSet::remove`] tears the managed
//! state back down on shutdown.

pub mod command;
pub mod config;
pub mod discovery;
pub mod policy_routing;
pub mod primitives;
pub mod wrappers;

pub use config::{ConfigItem, ConfigSet, EnsureError, RemoveError};
pub use policy_routing::{policy_routing_set, KernelClients, NetworkFacts};
