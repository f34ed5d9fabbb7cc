use super::*;

/// An `ip[/prefix]` allow-list entry. A bare address is an exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    addr: IpAddr,
    prefix: u8,
}

impl Subnet {
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        ensure!(prefix <= max, "prefix /{prefix} out of range for {addr}");
        Ok(Self { addr, prefix })
    }

    /// Both families compare through the IPv4-mapped IPv6 space, so
    /// `::ffff:127.0.0.1` matches a `127.0.0.0/8` entry and vice versa.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let prefix = match self.addr {
            IpAddr::V4(_) => self.prefix + 96,
            IpAddr::V6(_) => self.prefix,
        };

        prefix_matches(&to_v6(self.addr).octets(), &to_v6(ip).octets(), prefix)
    }
}

fn to_v6(ip: IpAddr) -> std::net::Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

/// Map IPv4-mapped IPv6 addresses onto plain IPv4 for loopback detection.
fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
        v4 => v4,
    }
}

fn prefix_matches(net: &[u8], ip: &[u8], prefix: u8) -> bool {
    let full = usize::from(prefix / 8);
    let rem = prefix % 8;

    if net[..full] != ip[..full] {
        return false;
    }

    if rem == 0 {
        return true;
    }

    let mask = !(0xffu8 >> rem);
    (net[full] & mask) == (ip[full] & mask)
}

impl FromStr for Subnet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((addr, prefix)) => {
                let addr = addr
                    .parse::<IpAddr>()
                    .with_context(|| format!("invalid subnet address in '{s}'"))?;
                let prefix = prefix
                    .parse::<u8>()
                    .with_context(|| format!("invalid subnet prefix in '{s}'"))?;
                Subnet::new(addr, prefix)
            }
            None => {
                let addr = s
                    .parse::<IpAddr>()
                    .with_context(|| format!("invalid subnet '{s}'"))?;
                let prefix = match addr {
                    IpAddr::V4(_) => 32,
                    IpAddr::V6(_) => 128,
                };
                Subnet::new(addr, prefix)
            }
        }
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Connections from the loopback interface are always allowed; configured
/// subnets extend the set.
pub fn client_allowed(subnets: &[Subnet], ip: IpAddr) -> bool {
    normalize(ip).is_loopback() || subnets.iter().any(|subnet| subnet.contains(ip))
}
