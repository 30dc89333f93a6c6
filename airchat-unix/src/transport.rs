//! Send side of the medium: one UDP socket writing to the link-local multicast group.

use std::ffi::CString;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};

use tokio::net::UdpSocket;

extern "C" {
    fn if_nametoindex(ifname: *const std::os::raw::c_char) -> u32;
}

/// Interface index for `name`, as needed for the scope of a link-local address.
pub fn interface_index(name: &str) -> std::io::Result<u32> {
    let c_name = CString::new(name)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_name is a valid NUL-terminated string that outlives the call.
    let index = unsafe { if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no such interface: {name}"),
        ));
    }
    Ok(index)
}

/// Where chat datagrams go: `group` on `port`, scoped to `interface` for IPv6 link-local groups.
pub fn destination(group: &str, port: u16, interface: &str) -> std::io::Result<SocketAddr> {
    let ip: IpAddr = group
        .parse()
        .map_err(|e: std::net::AddrParseError| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        })?;
    Ok(match ip {
        IpAddr::V6(v6) if needs_scope(&v6) => {
            SocketAddr::V6(SocketAddrV6::new(v6, port, 0, interface_index(interface)?))
        }
        other => SocketAddr::new(other, port),
    })
}

fn needs_scope(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    // ff02::/16 link-local multicast, fe80::/10 link-local unicast.
    first == 0xff02 || (first & 0xffc0) == 0xfe80
}

/// Unreliable, connectionless send path. Receiving happens through the capture source.
pub struct Transport {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl Transport {
    pub async fn open(group: &str, port: u16, interface: &str) -> std::io::Result<Self> {
        let dest = destination(group, port, interface)?;
        let bind: SocketAddr = match dest {
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
        };
        let socket = UdpSocket::bind(bind).await?;
        Ok(Self::from_socket(socket, dest))
    }

    pub fn from_socket(socket: UdpSocket, dest: SocketAddr) -> Self {
        Self { socket, dest }
    }

    pub fn destination(&self) -> SocketAddr {
        self.dest
    }

    pub async fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
        let n = self.socket.send_to(bytes, self.dest).await?;
        if n != bytes.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short datagram: {n} of {} bytes", bytes.len()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_group_needs_no_interface() {
        let dest = destination("239.255.60.60", 1337, "no-such-if0").unwrap();
        assert_eq!(dest, "239.255.60.60:1337".parse().unwrap());
    }

    #[test]
    fn global_v6_needs_no_interface() {
        let dest = destination("ff05::fb", 1337, "no-such-if0").unwrap();
        assert_eq!(dest.port(), 1337);
    }

    #[test]
    fn link_local_group_needs_real_interface() {
        assert!(destination("ff02::fb", 1337, "no-such-if0").is_err());
        assert!(destination("not an ip", 1337, "lo").is_err());
    }

    #[tokio::test]
    async fn sends_to_destination() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = Transport::from_socket(sock, receiver.local_addr().unwrap());
        transport.send(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }
}
