pub mod address;
pub mod tcp;
pub mod udp;

pub use address::Address;
pub use tcp::TcpSocket;
pub use udp::UdpSocket;
