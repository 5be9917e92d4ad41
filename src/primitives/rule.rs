//! Policy-rule client backed by `ip rule`.
//!
//! The kernel accepts duplicate policy rules, so convergence relies on
//! [`RuleOps::list`]: callers list the database and compare before adding.
//! The listing parser understands exactly the selector vocabulary this
//! daemon writes (`not`, `fwmark`, `iif`, `lookup`); lines carrying other
//! selectors still parse as long as they keep the common shape.

use crate::command::Runner;

use super::{classify_ip_error, Result, RuleOps};

/// Numeric id of the kernel's main route table.
pub const RT_TABLE_MAIN: u32 = 254;
const RT_TABLE_DEFAULT: u32 = 253;
const RT_TABLE_LOCAL: u32 = 255;

/// A firewall-mark selector with its mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FwMark {
    pub mark: u32,
    pub mask: u32,
}

/// A single routing-policy database entry.
///
/// Optional selectors are `None` when unset; a legitimate zero value is
/// never confused with "absent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    /// Firewall-mark selector.
    pub fwmark: Option<FwMark>,
    /// Input-interface selector.
    pub iif: Option<String>,
    /// Inverts the selectors.
    pub invert: bool,
    /// Route table consulted on match.
    pub table: u32,
    /// Evaluation priority; the kernel consults lower values first.
    pub priority: u32,
}

/// [`RuleOps`] implementation shelling out to `ip rule`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpRule;

impl RuleOps for IpRule {
    fn add(&self, rule: &PolicyRule) -> Result<()> {
        Runner::run("ip", &rule_args("add", rule)).map(drop).map_err(classify_ip_error)
    }

    fn delete(&self, rule: &PolicyRule) -> Result<()> {
        Runner::run("ip", &rule_args("del", rule)).map(drop).map_err(classify_ip_error)
    }

    fn list(&self) -> Result<Vec<PolicyRule>> {
        let output = Runner::run("ip", ["rule", "show"]).map_err(classify_ip_error)?;
        Ok(output.stdout.lines().filter_map(parse_rule_line).collect())
    }
}

fn rule_args(op: &str, rule: &PolicyRule) -> Vec<String> {
    let mut args = vec!["rule".to_owned(), op.to_owned()];

    if rule.invert {
        args.push("not".to_owned());
    }
    if let Some(fwmark) = rule.fwmark {
        args.extend(["fwmark".to_owned(), format!("{:#x}/{:#x}", fwmark.mark, fwmark.mask)]);
    }
    if let Some(iif) = &rule.iif {
        args.extend(["iif".to_owned(), iif.clone()]);
    }

    args.extend([
        "table".to_owned(),
        rule.table.to_string(),
        "priority".to_owned(),
        rule.priority.to_string(),
    ]);
    args
}

/// Parses one `ip rule show` line, e.g.
/// `30000:  from all fwmark 0x4000/0x4000 lookup main`.
fn parse_rule_line(line: &str) -> Option<PolicyRule> {
    let (priority, rest) = line.split_once(':')?;
    let priority = priority.trim().parse().ok()?;

    let mut fwmark = None;
    let mut iif = None;
    let mut invert = false;
    let mut table = None;

    let mut tokens = rest.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "not" => invert = true,
            // Source/destination selectors carry one value ("all" or a prefix).
            "from" | "to" => {
                tokens.next()?;
            }
            "fwmark" => fwmark = Some(parse_fwmark(tokens.next()?)?),
            "iif" => iif = Some(tokens.next()?.to_owned()),
            "lookup" | "table" => table = Some(parse_table(tokens.next()?)?),
            _ => {}
        }
    }

    Some(PolicyRule { fwmark, iif, invert, table: table?, priority })
}

fn parse_fwmark(value: &str) -> Option<FwMark> {
    match value.split_once('/') {
        Some((mark, mask)) => Some(FwMark { mark: parse_u32(mark)?, mask: parse_u32(mask)? }),
        // The kernel omits the mask when it covers the full mark width.
        None => Some(FwMark { mark: parse_u32(value)?, mask: u32::MAX }),
    }
}

fn parse_u32(value: &str) -> Option<u32> {
    match value.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn parse_table(value: &str) -> Option<u32> {
    match value {
        "main" => Some(RT_TABLE_MAIN),
        "default" => Some(RT_TABLE_DEFAULT),
        "local" => Some(RT_TABLE_LOCAL),
        _ => value.parse().ok(),
    }
}
