//! Route client backed by `ip route`.

use std::net::IpAddr;

use crate::{command::Runner, wrappers};

use super::{classify_ip_error, KernelError, Result, RouteOps};

/// A single kernel route entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Route table the entry lives in.
    pub table: u32,
    /// Kernel link index of the output device.
    pub link_index: u32,
    /// Next-hop gateway, if the route has one.
    pub gateway: Option<IpAddr>,
    /// Destination prefix. `None` denotes the default route for the table.
    pub destination: Option<(IpAddr, u8)>,
}

/// [`RouteOps`] implementation shelling out to `ip route`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpRoute;

impl RouteOps for IpRoute {
    fn add(&self, route: &Route) -> Result<()> {
        Runner::run("ip", &route_args("add", route)?).map(drop).map_err(classify_ip_error)
    }

    fn delete(&self, route: &Route) -> Result<()> {
        Runner::run("ip", &route_args("del", route)?).map(drop).map_err(classify_ip_error)
    }
}

/// Builds the `ip route` argument list for the given route.
///
/// `ip(8)` addresses devices by name, so the link index is resolved back to
/// a name here at the command boundary.
fn route_args(op: &str, route: &Route) -> Result<Vec<String>> {
    let device = wrappers::if_indextoname(route.link_index)
        .ok_or_else(|| KernelError::Operation(format!("no device with index {}", route.link_index)))?;

    let mut args = vec!["route".to_owned(), op.to_owned()];

    match route.destination {
        Some((address, prefix)) => args.push(format!("{address}/{prefix}")),
        None => args.push("default".to_owned()),
    }

    if let Some(gateway) = route.gateway {
        args.extend(["via".to_owned(), gateway.to_string()]);
    }

    args.extend(["dev".to_owned(), device, "table".to_owned(), route.table.to_string()]);

    Ok(args)
}
