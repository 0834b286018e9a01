use crate::proactor::Family;
use std::fmt;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// IPv4 or IPv6 address plus port, convertible to and from the OS-native
/// sockaddr storage representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    ip: IpAddr,
    port: u16,
}

impl Address {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn family(&self) -> Family {
        match self.ip {
            IpAddr::V4(_) => Family::Ipv4,
            IpAddr::V6(_) => Family::Ipv6,
        }
    }

    pub fn set_ip(&mut self, ip: IpAddr) {
        self.ip = ip;
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn is_loopback(&self) -> bool {
        self.ip.is_loopback()
    }

    /// 169.254.0.0/16, or fe80::/10.
    pub fn is_linklocal(&self) -> bool {
        match self.ip {
            IpAddr::V4(v4) => v4.is_link_local(),
            IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
        }
    }

    /// RFC 1918 ranges, or fc00::/7 unique-local.
    pub fn is_private(&self) -> bool {
        match self.ip {
            IpAddr::V4(v4) => v4.is_private(),
            IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
        }
    }

    /// 100.64.0.0/10 (RFC 6598 carrier-grade NAT space); never true for
    /// IPv6.
    pub fn is_shared(&self) -> bool {
        match self.ip {
            IpAddr::V4(v4) => v4.octets()[0] == 100 && (v4.octets()[1] & 0b1100_0000) == 64,
            IpAddr::V6(_) => false,
        }
    }

    /// OS-native representation, for handing to bind/connect/sendto.
    pub(crate) fn to_storage(self) -> (libc::sockaddr_storage, libc::socklen_t) {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        match self.ip {
            IpAddr::V4(v4) => {
                let sin = libc::sockaddr_in {
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: self.port.to_be(),
                    sin_addr: libc::in_addr {
                        s_addr: u32::from_ne_bytes(v4.octets()),
                    },
                    sin_zero: [0; 8],
                };
                unsafe {
                    std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
                }
                (storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
            }
            IpAddr::V6(v6) => {
                let sin6 = libc::sockaddr_in6 {
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: self.port.to_be(),
                    sin6_flowinfo: 0,
                    sin6_addr: libc::in6_addr {
                        s6_addr: v6.octets(),
                    },
                    sin6_scope_id: 0,
                };
                unsafe {
                    std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
                }
                (storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
            }
        }
    }

    /// Decode from the OS-native representation. Unknown families decode to
    /// the default (unspecified) address.
    pub(crate) fn from_storage(storage: &libc::sockaddr_storage) -> Self {
        match storage.ss_family as libc::c_int {
            libc::AF_INET => {
                let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
                Self {
                    ip: IpAddr::V4(Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes())),
                    port: u16::from_be(sin.sin_port),
                }
            }
            libc::AF_INET6 => {
                let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
                Self {
                    ip: IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)),
                    port: u16::from_be(sin6.sin6_port),
                }
            }
            _ => Self::default(),
        }
    }
}

impl Default for Address {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl From<Address> for SocketAddr {
    fn from(addr: Address) -> Self {
        SocketAddr::new(addr.ip, addr.port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        SocketAddr::from(*self).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str, port: u16) -> Address {
        Address::new(IpAddr::V4(s.parse().expect("ipv4")), port)
    }

    #[test]
    fn test_classification_queries() {
        assert!(v4("127.0.0.1", 80).is_loopback());
        assert!(v4("169.254.1.1", 0).is_linklocal());
        assert!(v4("10.0.0.1", 0).is_private());
        assert!(v4("192.168.1.1", 0).is_private());
        assert!(v4("172.16.0.1", 0).is_private());
        assert!(v4("100.64.0.1", 0).is_shared());
        assert!(v4("100.127.255.254", 0).is_shared());
        assert!(!v4("100.128.0.1", 0).is_shared());
        assert!(!v4("8.8.8.8", 0).is_private());

        let ll6 = Address::new(IpAddr::V6("fe80::1".parse().expect("ipv6")), 0);
        assert!(ll6.is_linklocal());
        let ula = Address::new(IpAddr::V6("fd00::1".parse().expect("ipv6")), 0);
        assert!(ula.is_private());
    }

    #[test]
    fn test_storage_conversion_roundtrip_v4() {
        let addr = v4("192.0.2.7", 30000);
        let (storage, len) = addr.to_storage();
        assert_eq!(len as usize, std::mem::size_of::<libc::sockaddr_in>());
        assert_eq!(Address::from_storage(&storage), addr);
    }

    #[test]
    fn test_storage_conversion_roundtrip_v6() {
        let addr = Address::new(IpAddr::V6("2001:db8::5".parse().expect("ipv6")), 4242);
        let (storage, _) = addr.to_storage();
        assert_eq!(Address::from_storage(&storage), addr);
    }

    #[test]
    fn test_unknown_family_decodes_to_default() {
        let storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        assert_eq!(Address::from_storage(&storage), Address::default());
    }
}
