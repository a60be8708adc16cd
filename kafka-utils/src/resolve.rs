use std::io;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

use tracing::warn;

pub trait HostResolver {
    fn resolve_ipv4(&self, host: &str, port: u16) -> io::Result<Vec<Ipv4Addr>>;
}

/// Resolves through the system resolver, keeping IPv4 addresses only.
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve_ipv4(&self, host: &str, port: u16) -> io::Result<Vec<Ipv4Addr>> {
        Ok((host, port)
            .to_socket_addrs()?
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .collect())
    }
}

/// Expand `host:port,host:port` into one `ip:port` entry per IPv4 address of each host.
///
/// Entries that can't be parsed or resolved are passed through untouched.
pub fn expand_broker_list(broker_list: &str, resolver: &dyn HostResolver) -> String {
    let mut expanded: Vec<String> = Vec::new();

    for entry in broker_list
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
    {
        let Some((host, port)) = entry
            .rsplit_once(':')
            .and_then(|(host, port)| port.parse::<u16>().ok().map(|port| (host, port)))
        else {
            warn!(broker = entry, "broker address is not host:port, passing it through");
            push_unique(&mut expanded, entry.to_owned());
            continue;
        };

        match resolver.resolve_ipv4(host, port) {
            Ok(ips) if !ips.is_empty() => {
                for ip in ips {
                    push_unique(&mut expanded, format!("{}:{}", ip, port));
                }
            }
            Ok(_) => {
                warn!(broker = entry, "no IPv4 address found, passing it through");
                push_unique(&mut expanded, entry.to_owned());
            }
            Err(e) => {
                warn!(broker = entry, "failed to resolve broker: {}", e);
                push_unique(&mut expanded, entry.to_owned());
            }
        }
    }

    expanded.join(",")
}

fn push_unique(list: &mut Vec<String>, entry: String) {
    if !list.contains(&entry) {
        list.push(entry);
    }
}
