//! Narrow capability traits over the kernel primitives this daemon manages,
//! the production clients implementing them, and the shared error taxonomy
//! used to classify kernel rejections.
//!
//! Each trait covers exactly one kernel resource family: tunables
//! ([`SysctlOps`]), packet-filter chains and rules ([`FilterOps`]), routes
//! ([`RouteOps`]), and routing-policy rules ([`RuleOps`]). Config items hold
//! trait objects rather than concrete clients so tests can substitute fakes.

use std::fmt;

use crate::command;

pub mod iptables;
pub mod route;
pub mod rule;
pub mod sysctl;

#[cfg(test)]
pub(crate) mod fake;

pub use iptables::Iptables;
pub use route::{IpRoute, Route};
pub use rule::{FwMark, IpRule, PolicyRule, RT_TABLE_MAIN};
pub use sysctl::ProcSysctl;

/// Classification of kernel rejections.
///
/// `AlreadyExists` is benign for additive operations and `NotFound` is benign
/// for removals; everything else is fatal to the enclosing operation.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("already exists")]
    AlreadyExists,
    #[error("not found")]
    NotFound,
    #[error("kernel operation failed: {0}")]
    Operation(String),
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Tunable read/write by dotted key.
pub trait SysctlOps: fmt::Debug {
    fn read(&self, key: &str) -> Result<String>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
}

/// Packet-filter chain lifecycle and rule management within one table.
///
/// Rule specs are ordered argument lists, compared verbatim.
pub trait FilterOps: fmt::Debug {
    fn create_chain(&self, table: &str, chain: &str) -> Result<()>;
    fn flush_chain(&self, table: &str, chain: &str) -> Result<()>;
    fn delete_chain(&self, table: &str, chain: &str) -> Result<()>;
    fn append_rule(&self, table: &str, chain: &str, spec: &[String]) -> Result<()>;
    fn delete_rule(&self, table: &str, chain: &str, spec: &[String]) -> Result<()>;
    fn rule_exists(&self, table: &str, chain: &str, spec: &[String]) -> Result<bool>;
}

/// Route table entry management.
pub trait RouteOps: fmt::Debug {
    fn add(&self, route: &Route) -> Result<()>;
    fn delete(&self, route: &Route) -> Result<()>;
}

/// Routing-policy database entry management.
pub trait RuleOps: fmt::Debug {
    fn add(&self, rule: &PolicyRule) -> Result<()>;
    fn delete(&self, rule: &PolicyRule) -> Result<()>;
    fn list(&self) -> Result<Vec<PolicyRule>>;
}

/// Maps an `ip(8)` invocation failure onto the taxonomy.
///
/// iproute2 reports duplicates as "File exists" and missing entries as
/// "No such process" (routes) or "No such file or directory" (rules, tables).
pub(crate) fn classify_ip_error(err: command::Error) -> KernelError {
    match err {
        command::Error::NonZero(output) => {
            let stderr = output.stderr.trim();
            if stderr.contains("File exists") {
                KernelError::AlreadyExists
            } else if stderr.contains("No such process")
                || stderr.contains("No such file or directory")
            {
                KernelError::NotFound
            } else if stderr.is_empty() {
                KernelError::Operation(output.status.to_string())
            } else {
                KernelError::Operation(stderr.to_owned())
            }
        }
        command::Error::Io(err) => KernelError::Operation(err.to_string()),
    }
}
