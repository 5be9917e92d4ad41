//! Packet-filter client backed by `iptables(8)`.
//!
//! Appends are not idempotent at this level: `iptables -A` happily stacks
//! duplicate rules, which is why [`FilterOps::rule_exists`] is part of the
//! contract. Existence is checked with `iptables -C`, letting the kernel
//! compare the rule spec instead of parsing listings back.

use crate::command::{self, Runner};

use super::{FilterOps, KernelError, Result};

/// [`FilterOps`] implementation shelling out to `iptables`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Iptables;

impl Iptables {
    fn exec(&self, table: &str, args: &[&str]) -> command::Result<command::Output> {
        Runner::run("iptables", ["-t", table].iter().copied().chain(args.iter().copied()))
    }
}

impl FilterOps for Iptables {
    fn create_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.exec(table, &["-N", chain]).map(drop).map_err(classify)
    }

    fn flush_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.exec(table, &["-F", chain]).map(drop).map_err(classify)
    }

    fn delete_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.exec(table, &["-X", chain]).map(drop).map_err(classify)
    }

    fn append_rule(&self, table: &str, chain: &str, spec: &[String]) -> Result<()> {
        self.exec(table, &with_spec("-A", chain, spec)).map(drop).map_err(classify)
    }

    fn delete_rule(&self, table: &str, chain: &str, spec: &[String]) -> Result<()> {
        self.exec(table, &with_spec("-D", chain, spec)).map(drop).map_err(classify)
    }

    fn rule_exists(&self, table: &str, chain: &str, spec: &[String]) -> Result<bool> {
        match self.exec(table, &with_spec("-C", chain, spec)) {
            Ok(_) => Ok(true),
            Err(err) => match classify(err) {
                KernelError::NotFound => Ok(false),
                other => Err(other),
            },
        }
    }
}

fn with_spec<'a>(op: &'a str, chain: &'a str, spec: &'a [String]) -> Vec<&'a str> {
    let mut args = vec![op, chain];
    args.extend(spec.iter().map(String::as_str));
    args
}

/// Maps an `iptables` invocation failure onto the taxonomy.
///
/// iptables reports duplicate chains as "Chain already exists", missing
/// chains as "No chain/target/match by that name", and a failed `-C`/`-D`
/// spec match as "Bad rule (does a matching rule exist in that chain?)".
fn classify(err: command::Error) -> KernelError {
    match err {
        command::Error::NonZero(output) => {
            let stderr = output.stderr.trim();
            if stderr.contains("already exists") {
                KernelError::AlreadyExists
            } else if stderr.contains("No chain/target/match by that name")
                || stderr.contains("does a matching rule exist")
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

#[cfg(test)]
mod tests {
    use std::{os::unix::process::ExitStatusExt as _, process::ExitStatus};

    use super::*;

    fn non_zero(stderr: &str) -> command::Error {
        command::Error::NonZero(command::Output {
            status: ExitStatus::from_raw(1 << 8),
            stdout: String::new(),
            stderr: stderr.to_owned(),
        })
    }

    #[test]
    fn duplicate_chains_classify_as_already_exists() {
        let err = non_zero("iptables: Chain already exists.");
        assert!(matches!(classify(err), KernelError::AlreadyExists));
    }

    #[test]
    fn missing_chains_and_rules_classify_as_not_found() {
        let err = non_zero("iptables: No chain/target/match by that name.");
        assert!(matches!(classify(err), KernelError::NotFound));

        let err = non_zero("iptables: Bad rule (does a matching rule exist in that chain?).");
        assert!(matches!(classify(err), KernelError::NotFound));
    }

    #[test]
    fn anything_else_classifies_as_operation_error() {
        let err = non_zero("iptables v1.8.9: unknown option \"--frobnicate\"");
        assert!(matches!(classify(err), KernelError::Operation(_)));
    }

    #[test]
    fn spec_arguments_follow_the_chain() {
        let spec = vec!["-j".to_owned(), "RETURN".to_owned()];
        assert_eq!(with_spec("-A", "TEST", &spec), vec!["-A", "TEST", "-j", "RETURN"]);
    }
}
