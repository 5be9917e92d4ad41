//! Declarative config items and ordered config sets.
//!
//! An item is a small desired-state unit that can be ensured (converge the
//! kernel towards it) and reverted (converge back to the pre-existing
//! state). A set applies its items in declaration order, stops at the first
//! failure, and removes in reverse order on a best-effort basis. Recovery
//! from partial application is idempotent re-ensure, not compensation:
//! every ensure tolerates finding its work already done.

use std::sync::Arc;

use crate::primitives::{
    FilterOps, KernelError, PolicyRule, Route, RouteOps, RuleOps, SysctlOps,
};

/// A kernel tunable held at a target value.
#[derive(Debug)]
pub struct Tunable {
    key: String,
    target: String,
    restore: String,
    sysctl: Arc<dyn SysctlOps>,
}

impl Tunable {
    pub fn new(
        key: impl Into<String>,
        target: impl Into<String>,
        restore: impl Into<String>,
        sysctl: Arc<dyn SysctlOps>,
    ) -> Self {
        Self { key: key.into(), target: target.into(), restore: restore.into(), sysctl }
    }

    fn ensure(&self) -> crate::primitives::Result<()> {
        let current = self.sysctl.read(&self.key)?;
        if current == self.target {
            return Ok(());
        }
        tracing::debug!(key = %self.key, from = %current, to = %self.target, "updating sysctl");
        self.sysctl.write(&self.key, &self.target)
    }

    fn revert(&self) -> crate::primitives::Result<()> {
        // Writing a value the key already holds is harmless.
        self.sysctl.write(&self.key, &self.restore)
    }
}

/// Packet-filter rules in one chain of one table.
///
/// When the chain is not one of the kernel's built-ins this item owns it:
/// ensure creates it and revert flushes and deletes it.
#[derive(Debug)]
pub struct FilterRule {
    table: String,
    chain: String,
    rules: Vec<Vec<String>>,
    is_default_chain: bool,
    filter: Arc<dyn FilterOps>,
}

impl FilterRule {
    pub fn new(
        table: impl Into<String>,
        chain: impl Into<String>,
        rules: Vec<Vec<String>>,
        is_default_chain: bool,
        filter: Arc<dyn FilterOps>,
    ) -> Self {
        Self { table: table.into(), chain: chain.into(), rules, is_default_chain, filter }
    }

    fn ensure(&self) -> crate::primitives::Result<()> {
        if !self.is_default_chain {
            match self.filter.create_chain(&self.table, &self.chain) {
                Ok(()) | Err(KernelError::AlreadyExists) => {}
                Err(err) => return Err(err),
            }
        }
        for rule in &self.rules {
            // Append stacks duplicates, so check before adding.
            if self.filter.rule_exists(&self.table, &self.chain, rule)? {
                continue;
            }
            match self.filter.append_rule(&self.table, &self.chain, rule) {
                Ok(()) | Err(KernelError::AlreadyExists) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn revert(&self) -> crate::primitives::Result<()> {
        for rule in &self.rules {
            match self.filter.delete_rule(&self.table, &self.chain, rule) {
                Ok(()) | Err(KernelError::NotFound) => {}
                Err(err) => return Err(err),
            }
        }
        if !self.is_default_chain {
            if let Err(err) = self.flush_and_delete_chain() {
                // Leftover empty chains are inert; removal carries on.
                tracing::warn!(table = %self.table, chain = %self.chain, %err, "leaving chain behind");
            }
        }
        Ok(())
    }

    fn flush_and_delete_chain(&self) -> crate::primitives::Result<()> {
        match self.filter.flush_chain(&self.table, &self.chain) {
            Ok(()) | Err(KernelError::NotFound) => {}
            Err(err) => return Err(err),
        }
        match self.filter.delete_chain(&self.table, &self.chain) {
            Ok(()) | Err(KernelError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// A route entry in a kernel route table.
#[derive(Debug)]
pub struct RouteEntry {
    route: Route,
    client: Arc<dyn RouteOps>,
}

impl RouteEntry {
    pub fn new(route: Route, client: Arc<dyn RouteOps>) -> Self {
        Self { route, client }
    }

    /// Discovery may come up empty. A route with neither gateway nor
    /// destination cannot be expressed, so the item degrades to a no-op.
    fn is_degraded(&self) -> bool {
        self.route.gateway.is_none() && self.route.destination.is_none()
    }

    fn ensure(&self) -> crate::primitives::Result<()> {
        if self.is_degraded() {
            tracing::debug!(table = self.route.table, "no gateway known, skipping route");
            return Ok(());
        }
        match self.client.add(&self.route) {
            Ok(()) | Err(KernelError::AlreadyExists) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn revert(&self) -> crate::primitives::Result<()> {
        if self.is_degraded() {
            return Ok(());
        }
        match self.client.delete(&self.route) {
            Ok(()) | Err(KernelError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// A routing-policy database entry.
#[derive(Debug)]
pub struct PolicyRuleEntry {
    rule: PolicyRule,
    client: Arc<dyn RuleOps>,
}

impl PolicyRuleEntry {
    pub fn new(rule: PolicyRule, client: Arc<dyn RuleOps>) -> Self {
        Self { rule, client }
    }

    fn ensure(&self) -> crate::primitives::Result<()> {
        // The kernel accepts duplicate rules, so list-and-compare first.
        let existing = self.client.list()?;
        if existing.iter().any(|rule| *rule == self.rule) {
            return Ok(());
        }
        match self.client.add(&self.rule) {
            Ok(()) | Err(KernelError::AlreadyExists) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn revert(&self) -> crate::primitives::Result<()> {
        match self.client.delete(&self.rule) {
            Ok(()) | Err(KernelError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// One unit of desired kernel state.
#[derive(Debug)]
pub enum ConfigItem {
    Tunable(Tunable),
    FilterRule(FilterRule),
    Route(RouteEntry),
    PolicyRule(PolicyRuleEntry),
}

impl ConfigItem {
    pub fn ensure(&self) -> crate::primitives::Result<()> {
        match self {
            Self::Tunable(item) => item.ensure(),
            Self::FilterRule(item) => item.ensure(),
            Self::Route(item) => item.ensure(),
            Self::PolicyRule(item) => item.ensure(),
        }
    }

    pub fn revert(&self) -> crate::primitives::Result<()> {
        match self {
            Self::Tunable(item) => item.revert(),
            Self::FilterRule(item) => item.revert(),
            Self::Route(item) => item.revert(),
            Self::PolicyRule(item) => item.revert(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Tunable(_) => "tunable",
            Self::FilterRule(_) => "filter rule",
            Self::Route(_) => "route",
            Self::PolicyRule(_) => "policy rule",
        }
    }
}

/// Failure applying one item of a set. Items after the failed one were
/// not attempted.
#[derive(Debug, thiserror::Error)]
#[error("config set {set:?}: {item} at index {index} failed")]
pub struct EnsureError {
    pub set: String,
    pub index: usize,
    pub item: &'static str,
    #[source]
    pub source: KernelError,
}

/// One item that failed to revert during removal.
#[derive(Debug, thiserror::Error)]
#[error("{item} at index {index}: {source}")]
pub struct ItemFailure {
    pub index: usize,
    pub item: &'static str,
    #[source]
    pub source: KernelError,
}

/// Removal failure. Every item was attempted; these are the ones that
/// could not be reverted.
#[derive(Debug, thiserror::Error)]
#[error("config set {set:?}: {} item(s) failed to revert", .failures.len())]
pub struct RemoveError {
    pub set: String,
    pub failures: Vec<ItemFailure>,
}

/// An ordered collection of config items applied and removed as a unit.
#[derive(Debug)]
pub struct ConfigSet {
    name: String,
    applied: bool,
    items: Vec<ConfigItem>,
}

impl ConfigSet {
    pub fn new(name: impl Into<String>, items: Vec<ConfigItem>) -> Self {
        Self { name: name.into(), applied: false, items }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the last ensure ran to completion.
    pub fn is_applied(&self) -> bool {
        self.applied
    }

    pub fn items(&self) -> &[ConfigItem] {
        &self.items
    }

    /// Applies every item in declaration order, stopping at the first
    /// failure. Earlier items stay applied; a later retry converges them
    /// again without side effects.
    pub fn ensure(&mut self) -> Result<(), EnsureError> {
        for (index, item) in self.items.iter().enumerate() {
            item.ensure().map_err(|source| EnsureError {
                set: self.name.clone(),
                index,
                item: item.kind(),
                source,
            })?;
        }
        self.applied = true;
        tracing::info!(set = %self.name, items = self.items.len(), "config set applied");
        Ok(())
    }

    /// Reverts every item in reverse declaration order. Failures are
    /// collected rather than aborting, so one stuck item does not strand
    /// the rest.
    pub fn remove(&mut self) -> Result<(), RemoveError> {
        let mut failures = Vec::new();
        for (index, item) in self.items.iter().enumerate().rev() {
            if let Err(source) = item.revert() {
                tracing::warn!(set = %self.name, index, item = item.kind(), %source, "revert failed");
                failures.push(ItemFailure { index, item: item.kind(), source });
            }
        }
        self.applied = false;
        if failures.is_empty() {
            tracing::info!(set = %self.name, "config set removed");
            Ok(())
        } else {
            Err(RemoveError { set: self.name.clone(), failures })
        }
    }
}
