//! Policy routing for hairpin traffic.
//!
//! Load-balanced traffic that hairpins off a node back to a pod on the same
//! node must leave through the interface it arrived on, not through the
//! default route. Connections carrying the hairpin bit in their conntrack
//! mark get the mark restored on ingress, matched by a policy rule, and
//! looked up in a dedicated route table whose only entry is the default
//! route of the primary interface.
//!
//! The whole arrangement is expressed as one [`ConfigSet`] built from facts
//! discovered once at startup. Ensuring the set converges the kernel to the
//! desired state; removing it puts everything back.

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
};

use crate::{
    config::{ConfigItem, ConfigSet, FilterRule, PolicyRuleEntry, RouteEntry, Tunable},
    discovery::{Nic, RouteDiscovery},
    primitives::{
        FilterOps, FwMark, IpRoute, IpRule, Iptables, PolicyRule, ProcSysctl, Route, RouteOps,
        RuleOps, SysctlOps, RT_TABLE_MAIN,
    },
};

pub const SYSCTL_SRC_VALID_MARK: &str = "net.ipv4.conf.all.src_valid_mark";

pub const MANGLE_TABLE: &str = "mangle";
pub const PRE_ROUTING_CHAIN: &str = "PREROUTING";
pub const POST_ROUTING_CHAIN: &str = "POSTROUTING";
pub const GCP_PRE_ROUTING_CHAIN: &str = "GCP-PREROUTING";
pub const GCP_POST_ROUTING_CHAIN: &str = "GCP-POSTROUTING";

/// Conntrack bit marking hairpin connections.
pub const HAIRPIN_MARK: u32 = 0x4000;
pub const HAIRPIN_MASK: u32 = 0x4000;

/// Route table holding only the primary interface's default route.
pub const CUSTOM_ROUTE_TABLE: u32 = 1;

/// Rule priorities. The kernel evaluates lower values first, so marked
/// traffic wins over the local-interface rule, which wins over the
/// catch-all redirect.
pub const HAIRPIN_RULE_PRIORITY: u32 = 30000;
pub const LOCAL_RULE_PRIORITY: u32 = 30001;
pub const DEFAULT_NETDEV_RULE_PRIORITY: u32 = 30002;

const DEFAULT_ROUTE_PROBE: IpAddr = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
const LOCAL_ROUTE_PROBE: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

const RESTORE_MARK_COMMENT: &str = "restore the conn mark if applicable";
const PRE_ROUTING_COMMENT: &str = "redirect all traffic to GCP-PREROUTING chain";
const SAVE_MARK_COMMENT: &str =
    "save the conn mark only if hairpin bit (0x4000/0x4000) is set";
const POST_ROUTING_COMMENT: &str = "redirect all traffic to GCP-POSTROUTING chain";

/// Network facts the policy-routing set is built from, discovered once at
/// startup and fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkFacts {
    pub default_link_index: u32,
    pub default_netdev: String,
    pub default_gateway: Option<IpAddr>,
    pub local_link_index: u32,
    pub local_netdev: String,
}

impl NetworkFacts {
    /// Probes the kernel for the default and local interfaces.
    ///
    /// Discovery failures degrade rather than abort: a node without a
    /// default route still gets the mark plumbing, just without the
    /// custom-table route.
    pub fn discover(discovery: &dyn RouteDiscovery) -> Self {
        let default = probe(discovery, DEFAULT_ROUTE_PROBE);
        let local = probe(discovery, LOCAL_ROUTE_PROBE);
        Self {
            default_link_index: default.link_index,
            default_netdev: default.name,
            default_gateway: default.gateway,
            local_link_index: local.link_index,
            local_netdev: local.name,
        }
    }

    fn rp_filter_key(&self) -> String {
        format!("net.ipv4.conf.{}.rp_filter", self.default_netdev)
    }
}

fn probe(discovery: &dyn RouteDiscovery, probe: IpAddr) -> Nic {
    discovery.resolve(probe).unwrap_or_else(|err| {
        tracing::error!(%probe, %err, "route discovery failed, using degraded defaults");
        Nic { link_index: 0, name: String::new(), gateway: None }
    })
}

/// The kernel clients the config items talk through.
#[derive(Debug, Clone)]
pub struct KernelClients {
    pub sysctl: Arc<dyn SysctlOps>,
    pub filter: Arc<dyn FilterOps>,
    pub route: Arc<dyn RouteOps>,
    pub rule: Arc<dyn RuleOps>,
}

impl KernelClients {
    /// Clients operating on the live kernel.
    pub fn system() -> Self {
        Self {
            sysctl: Arc::new(ProcSysctl),
            filter: Arc::new(Iptables),
            route: Arc::new(IpRoute),
            rule: Arc::new(IpRule),
        }
    }
}

/// Builds the policy-routing config set from the discovered facts.
pub fn policy_routing_set(facts: &NetworkFacts, clients: &KernelClients) -> ConfigSet {
    let hairpin_mark = format!("{HAIRPIN_MARK:#x}/{HAIRPIN_MASK:#x}");

    let items = vec![
        // Strict reverse-path filtering drops hairpin replies, loose mode
        // keeps them flowing.
        ConfigItem::Tunable(Tunable::new(
            facts.rp_filter_key(),
            "2",
            "1",
            clients.sysctl.clone(),
        )),
        // Lets the kernel accept packets whose mark names a source device.
        ConfigItem::Tunable(Tunable::new(
            SYSCTL_SRC_VALID_MARK,
            "1",
            "0",
            clients.sysctl.clone(),
        )),
        ConfigItem::FilterRule(FilterRule::new(
            MANGLE_TABLE,
            GCP_PRE_ROUTING_CHAIN,
            vec![strs(&[
                "-j",
                "CONNMARK",
                "--restore-mark",
                "-m",
                "comment",
                "--comment",
                RESTORE_MARK_COMMENT,
            ])],
            false,
            clients.filter.clone(),
        )),
        ConfigItem::FilterRule(FilterRule::new(
            MANGLE_TABLE,
            PRE_ROUTING_CHAIN,
            vec![strs(&[
                "-j",
                GCP_PRE_ROUTING_CHAIN,
                "-m",
                "comment",
                "--comment",
                PRE_ROUTING_COMMENT,
            ])],
            true,
            clients.filter.clone(),
        )),
        ConfigItem::FilterRule(FilterRule::new(
            MANGLE_TABLE,
            GCP_POST_ROUTING_CHAIN,
            vec![strs(&[
                "-m",
                "mark",
                "--mark",
                &hairpin_mark,
                "-j",
                "CONNMARK",
                "--save-mark",
                "-m",
                "comment",
                "--comment",
                SAVE_MARK_COMMENT,
            ])],
            false,
            clients.filter.clone(),
        )),
        ConfigItem::FilterRule(FilterRule::new(
            MANGLE_TABLE,
            POST_ROUTING_CHAIN,
            vec![strs(&[
                "-j",
                GCP_POST_ROUTING_CHAIN,
                "-m",
                "comment",
                "--comment",
                POST_ROUTING_COMMENT,
            ])],
            true,
            clients.filter.clone(),
        )),
        ConfigItem::Route(RouteEntry::new(
            Route {
                table: CUSTOM_ROUTE_TABLE,
                link_index: facts.default_link_index,
                gateway: facts.default_gateway,
                destination: None,
            },
            clients.route.clone(),
        )),
        // Marked hairpin traffic resolves through the main table.
        ConfigItem::PolicyRule(PolicyRuleEntry::new(
            PolicyRule {
                fwmark: Some(FwMark { mark: HAIRPIN_MARK, mask: HAIRPIN_MASK }),
                iif: None,
                invert: false,
                table: RT_TABLE_MAIN,
                priority: HAIRPIN_RULE_PRIORITY,
            },
            clients.rule.clone(),
        )),
        // So does anything arriving on the local interface.
        ConfigItem::PolicyRule(PolicyRuleEntry::new(
            PolicyRule {
                fwmark: None,
                iif: netdev_selector(&facts.local_netdev),
                invert: false,
                table: RT_TABLE_MAIN,
                priority: LOCAL_RULE_PRIORITY,
            },
            clients.rule.clone(),
        )),
        // Everything not from the primary interface goes to the custom
        // table and leaves through the default route.
        ConfigItem::PolicyRule(PolicyRuleEntry::new(
            PolicyRule {
                fwmark: None,
                iif: netdev_selector(&facts.default_netdev),
                invert: true,
                table: CUSTOM_ROUTE_TABLE,
                priority: DEFAULT_NETDEV_RULE_PRIORITY,
            },
            clients.rule.clone(),
        )),
    ];

    ConfigSet::new("PolicyRouting", items)
}

/// Degraded discovery leaves the interface name empty; an empty selector
/// stays unset instead of producing an unparseable rule.
fn netdev_selector(name: &str) -> Option<String> {
    (!name.is_empty()).then(|| name.to_owned())
}

fn strs(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| (*arg).to_owned()).collect()
}
