//! Default-route discovery.
//!
//! Asks the kernel which interface and gateway a probe address would be
//! routed through, via `ip route get`. The answer drives the interface
//! names and link indices baked into the policy-routing set.

use std::{fmt, net::IpAddr};

use crate::{command, wrappers};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The kernel has no route to the probe address.
    #[error("no route to {0}")]
    NoRoute(IpAddr),
    #[error("route probe failed: {0}")]
    Probe(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The interface a probe address resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nic {
    /// Kernel link index.
    pub link_index: u32,
    /// Interface name.
    pub name: String,
    /// Next-hop gateway, absent for directly connected and local routes.
    pub gateway: Option<IpAddr>,
}

/// Resolves a probe address to the interface that would carry it.
pub trait RouteDiscovery: fmt::Debug {
    fn resolve(&self, probe: IpAddr) -> Result<Nic>;
}

/// [`RouteDiscovery`] implementation shelling out to `ip route get`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpRouteProbe;

impl RouteDiscovery for IpRouteProbe {
    fn resolve(&self, probe: IpAddr) -> Result<Nic> {
        let output = command::Runner::run("ip", ["-o", "route", "get", &probe.to_string()])
            .map_err(|err| match err {
                command::Error::NonZero(output) if output.stderr.contains("unreachable") => {
                    Error::NoRoute(probe)
                }
                other => Error::Probe(other.to_string()),
            })?;

        parse_route_get(&output.stdout)
            .ok_or_else(|| Error::Probe(format!("unparseable route for {probe}: {}", output.stdout)))
    }
}

/// Parses `ip -o route get` output, e.g.
/// `8.8.8.8 via 10.0.0.1 dev eth0 src 10.0.0.5 uid 0`.
fn parse_route_get(stdout: &str) -> Option<Nic> {
    let mut gateway = None;
    let mut name = None;

    let mut tokens = stdout.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "via" => gateway = Some(tokens.next()?.parse().ok()?),
            "dev" => name = Some(tokens.next()?.to_owned()),
            _ => {}
        }
    }

    let name = name?;
    let link_index = wrappers::if_nametoindex(&name)?.get();
    Some(Nic { link_index, name, gateway })
}
