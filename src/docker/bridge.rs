//! Network Bridge Resolver: the IP containers use to reach the host as `dockerhost`.
//!
//! Tried in order:
//! 1. start a throwaway container so the default bridge exists, then read `docker0`'s IPv4
//!    address from the host interfaces;
//! 2. run the target image with `ip route` and take the default gateway.

use std::net::Ipv4Addr;

#[cfg(feature = "otel")]
use tracing::instrument;

use super::client::DockerClient;
use crate::errors::{logged, ContainerError};

/// Host-side name of the runtime's default bridge interface.
pub const BRIDGE_INTERFACE: &str = "docker0";

#[cfg_attr(feature = "otel", instrument(level = "info", skip(client), err))]
pub fn resolve_bridge_ip(client: &DockerClient, image: &str) -> Result<Ipv4Addr, ContainerError> {
    if let Some(ip) = bridge_from_interface(client, image)? {
        return Ok(ip);
    }
    match gateway_from_route(client, image) {
        Ok(ip) => Ok(ip),
        Err(ContainerError::BridgeResolutionFailed { image, reason }) => {
            Err(logged(ContainerError::BridgeResolutionFailed { image, reason }))
        }
        Err(e) => Err(e),
    }
}

fn bridge_from_interface(
    client: &DockerClient,
    image: &str,
) -> Result<Option<Ipv4Addr>, ContainerError> {
    // Probe outcome does not matter; it only makes the runtime create its bridge.
    let mut probe = client.command();
    probe
        .arg("run")
        .arg("--rm")
        .arg("--entrypoint")
        .arg("/bin/true")
        .arg(image);
    let _ = probe.status_quiet(client.verbose())?;
    Ok(interface_ipv4(BRIDGE_INTERFACE))
}

#[cfg(unix)]
fn interface_ipv4(name: &str) -> Option<Ipv4Addr> {
    let addrs = nix::ifaddrs::getifaddrs().ok()?;
    for ifa in addrs {
        if ifa.interface_name != name {
            continue;
        }
        if let Some(sin) = ifa.address.as_ref().and_then(|a| a.as_sockaddr_in()) {
            return Some(*std::net::SocketAddrV4::from(*sin).ip());
        }
    }
    None
}

#[cfg(not(unix))]
fn interface_ipv4(_name: &str) -> Option<Ipv4Addr> {
    None
}

fn gateway_from_route(client: &DockerClient, image: &str) -> Result<Ipv4Addr, ContainerError> {
    let mut c = client.command();
    c.arg("run")
        .arg("--tty")
        .arg("--rm")
        .arg("--entrypoint")
        .arg("/sbin/ip")
        .arg(image)
        .arg("route");
    let out = c.output(client.verbose())?;
    if !out.status.success() {
        return Err(ContainerError::BridgeResolutionFailed {
            image: image.to_string(),
            reason: format!("ip route exited with {}", out.status),
        });
    }
    parse_default_gateway(&String::from_utf8_lossy(&out.stdout)).ok_or_else(|| {
        ContainerError::BridgeResolutionFailed {
            image: image.to_string(),
            reason: "no default route in ip route output".to_string(),
        }
    })
}

/// Gateway of the `default` route: the third whitespace-delimited token of its line.
pub fn parse_default_gateway(text: &str) -> Option<Ipv4Addr> {
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>())
        .find(|toks| toks.first() == Some(&"default"))
        .and_then(|toks| toks.get(2).and_then(|t| t.parse().ok()))
}
