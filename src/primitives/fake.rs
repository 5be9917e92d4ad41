//! In-memory kernel double for config tests.
//!
//! One [`FakeKernel`] implements all four capability traits over a shared
//! mutex-guarded state, so a single instance can be cloned into every item
//! of a config set and inspected afterwards. Mutations are appended to a
//! journal so tests can assert ordering across resource families.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use super::{FilterOps, KernelError, PolicyRule, Result, Route, RouteOps, RuleOps, SysctlOps};

#[derive(Debug, Default)]
struct State {
    sysctls: HashMap<String, String>,
    sysctl_writes: usize,
    chains: HashMap<(String, String), Vec<Vec<String>>>,
    routes: Vec<Route>,
    rules: Vec<PolicyRule>,
    journal: Vec<String>,
    fail_route_delete: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeKernel {
    state: Arc<Mutex<State>>,
}

impl FakeKernel {
    /// A fake with the built-in mangle chains every kernel ships with.
    pub(crate) fn new() -> Self {
        let fake = Self::default();
        fake.add_default_chain("mangle", "PREROUTING");
        fake.add_default_chain("mangle", "POSTROUTING");
        fake
    }

    fn add_default_chain(&self, table: &str, chain: &str) {
        self.lock().chains.insert((table.to_owned(), chain.to_owned()), Vec::new());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn set_sysctl(&self, key: &str, value: &str) {
        self.lock().sysctls.insert(key.to_owned(), value.to_owned());
    }

    pub(crate) fn sysctl(&self, key: &str) -> Option<String> {
        self.lock().sysctls.get(key).cloned()
    }

    pub(crate) fn sysctl_writes(&self) -> usize {
        self.lock().sysctl_writes
    }

    pub(crate) fn chain(&self, table: &str, chain: &str) -> Option<Vec<Vec<String>>> {
        self.lock().chains.get(&(table.to_owned(), chain.to_owned())).cloned()
    }

    pub(crate) fn routes(&self) -> Vec<Route> {
        self.lock().routes.clone()
    }

    pub(crate) fn rules(&self) -> Vec<PolicyRule> {
        self.lock().rules.clone()
    }

    pub(crate) fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    /// Makes every subsequent route delete fail with an operation error.
    pub(crate) fn fail_route_delete(&self) {
        self.lock().fail_route_delete = true;
    }
}

impl SysctlOps for FakeKernel {
    fn read(&self, key: &str) -> Result<String> {
        self.lock().sysctls.get(key).cloned().ok_or(KernelError::NotFound)
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        state.sysctls.insert(key.to_owned(), value.to_owned());
        state.sysctl_writes += 1;
        state.journal.push(format!("sysctl_write {key}={value}"));
        Ok(())
    }
}

impl FilterOps for FakeKernel {
    fn create_chain(&self, table: &str, chain: &str) -> Result<()> {
        let mut state = self.lock();
        let key = (table.to_owned(), chain.to_owned());
        if state.chains.contains_key(&key) {
            return Err(KernelError::AlreadyExists);
        }
        state.chains.insert(key, Vec::new());
        state.journal.push(format!("create_chain {chain}"));
        Ok(())
    }

    fn flush_chain(&self, table: &str, chain: &str) -> Result<()> {
        let mut state = self.lock();
        let rules = state
            .chains
            .get_mut(&(table.to_owned(), chain.to_owned()))
            .ok_or(KernelError::NotFound)?;
        rules.clear();
        state.journal.push(format!("flush_chain {chain}"));
        Ok(())
    }

    fn delete_chain(&self, table: &str, chain: &str) -> Result<()> {
        let mut state = self.lock();
        let key = (table.to_owned(), chain.to_owned());
        match state.chains.get(&key) {
            None => return Err(KernelError::NotFound),
            Some(rules) if !rules.is_empty() => {
                return Err(KernelError::Operation("chain is not empty".to_owned()));
            }
            Some(_) => {}
        }
        // A chain still targeted by a jump elsewhere cannot be deleted.
        let referenced = state.chains.iter().any(|((t, _), rules)| {
            t == table
                && rules.iter().any(|spec| {
                    spec.windows(2).any(|pair| pair[0] == "-j" && pair[1] == chain)
                })
        });
        if referenced {
            return Err(KernelError::Operation(format!("chain {chain} is still referenced")));
        }
        state.chains.remove(&key);
        state.journal.push(format!("delete_chain {chain}"));
        Ok(())
    }

    fn append_rule(&self, table: &str, chain: &str, spec: &[String]) -> Result<()> {
        let mut state = self.lock();
        let rules = state
            .chains
            .get_mut(&(table.to_owned(), chain.to_owned()))
            .ok_or(KernelError::NotFound)?;
        rules.push(spec.to_vec());
        state.journal.push(format!("append_rule {chain} {}", spec.join(" ")));
        Ok(())
    }

    fn delete_rule(&self, table: &str, chain: &str, spec: &[String]) -> Result<()> {
        let mut state = self.lock();
        let rules = state
            .chains
            .get_mut(&(table.to_owned(), chain.to_owned()))
            .ok_or(KernelError::NotFound)?;
        let position = rules.iter().position(|rule| rule == spec).ok_or(KernelError::NotFound)?;
        rules.remove(position);
        state.journal.push(format!("delete_rule {chain} {}", spec.join(" ")));
        Ok(())
    }

    fn rule_exists(&self, table: &str, chain: &str, spec: &[String]) -> Result<bool> {
        let state = self.lock();
        let rules = state
            .chains
            .get(&(table.to_owned(), chain.to_owned()))
            .ok_or(KernelError::NotFound)?;
        Ok(rules.iter().any(|rule| rule == spec))
    }
}

impl RouteOps for FakeKernel {
    fn add(&self, route: &Route) -> Result<()> {
        let mut state = self.lock();
        let duplicate = state
            .routes
            .iter()
            .any(|existing| existing.table == route.table && existing.destination == route.destination);
        if duplicate {
            return Err(KernelError::AlreadyExists);
        }
        state.routes.push(route.clone());
        state.journal.push(format!("route_add table={}", route.table));
        Ok(())
    }

    fn delete(&self, route: &Route) -> Result<()> {
        let mut state = self.lock();
        if state.fail_route_delete {
            return Err(KernelError::Operation("injected failure".to_owned()));
        }
        let position = state
            .routes
            .iter()
            .position(|existing| existing == route)
            .ok_or(KernelError::NotFound)?;
        state.routes.remove(position);
        state.journal.push(format!("route_del table={}", route.table));
        Ok(())
    }
}

impl RuleOps for FakeKernel {
    fn add(&self, rule: &PolicyRule) -> Result<()> {
        // The kernel accepts duplicate policy rules without complaint.
        let mut state = self.lock();
        state.rules.push(rule.clone());
        state.journal.push(format!("rule_add {}", rule.priority));
        Ok(())
    }

    fn delete(&self, rule: &PolicyRule) -> Result<()> {
        let mut state = self.lock();
        let position =
            state.rules.iter().position(|existing| existing == rule).ok_or(KernelError::NotFound)?;
        state.rules.remove(position);
        state.journal.push(format!("rule_del {}", rule.priority));
        Ok(())
    }

    fn list(&self) -> Result<Vec<PolicyRule>> {
        Ok(self.lock().rules.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referenced_chains_cannot_be_deleted() {
        let fake = FakeKernel::new();
        fake.create_chain("mangle", "TEST-CHAIN").unwrap();
        let jump = vec!["-j".to_owned(), "TEST-CHAIN".to_owned()];
        fake.append_rule("mangle", "PREROUTING", &jump).unwrap();

        let err = fake.delete_chain("mangle", "TEST-CHAIN").unwrap_err();
        assert!(matches!(err, KernelError::Operation(_)));

        fake.delete_rule("mangle", "PREROUTING", &jump).unwrap();
        fake.delete_chain("mangle", "TEST-CHAIN").unwrap();
    }

    #[test]
    fn non_empty_chains_cannot_be_deleted() {
        let fake = FakeKernel::new();
        fake.create_chain("mangle", "TEST-CHAIN").unwrap();
        fake.append_rule("mangle", "TEST-CHAIN", &["-j".to_owned(), "RETURN".to_owned()])
            .unwrap();

        assert!(fake.delete_chain("mangle", "TEST-CHAIN").is_err());
        fake.flush_chain("mangle", "TEST-CHAIN").unwrap();
        fake.delete_chain("mangle", "TEST-CHAIN").unwrap();
    }
}
