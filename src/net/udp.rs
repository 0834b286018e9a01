use crate::net::Address;
use crate::proactor::{Family, Proactor, SocketKind};
use crate::task::Task;
use std::sync::Arc;

/// Datagram socket bound to one proactor backend.
///
/// Receives are asynchronous like their stream counterparts; sends are
/// synchronous, since a datagram send on a non-blocking socket either
/// completes or fails without a meaningful partial state.
pub struct UdpSocket<P: Proactor> {
    proactor: Arc<P>,
    family: Family,
    fd: i32,
}

impl<P: Proactor> UdpSocket<P> {
    /// New datagram socket. The status is 0 on success, negative errno
    /// otherwise.
    pub fn create(proactor: Arc<P>, family: Family) -> (Self, i32) {
        let fd = proactor.create(family, SocketKind::Datagram);
        let status = if fd < 0 { fd } else { 0 };
        (
            Self {
                proactor,
                family,
                fd: fd.max(-1),
            },
            status,
        )
    }

    pub fn fd(&self) -> i32 {
        self.fd
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn bind(&self, addr: &Address) -> i32 {
        self.proactor.bind(self.fd, addr)
    }

    /// Fix the default destination for `send`/`recv`.
    pub fn connect(&self, addr: &Address) -> i32 {
        self.proactor.connect_sync(self.fd, addr)
    }

    pub fn close(&self) -> i32 {
        self.proactor.close(self.fd)
    }

    pub fn local_address(&self) -> (Address, i32) {
        self.proactor.local_address(self.fd)
    }

    /// Receive one datagram from the connected peer. Resolves to `(n, buf)`.
    pub fn recv(&self, buf: Vec<u8>) -> Task<(i32, Vec<u8>)> {
        let task = Task::new();
        let completion = task.clone();
        let ret = self.proactor.recv(
            self.fd,
            buf,
            Box::new(move |n, buf| {
                if completion.is_ready() {
                    return;
                }
                completion.set_result((n, buf));
                completion.resume();
            }),
        );
        if ret < 0 {
            task.set_result((ret, Vec::new()));
        }
        task
    }

    /// Receive one datagram from anyone. Resolves to `(n, remote, buf)`.
    pub fn recvfrom(&self, buf: Vec<u8>) -> Task<(i32, Address, Vec<u8>)> {
        let task = Task::new();
        let completion = task.clone();
        let ret = self.proactor.recvfrom(
            self.fd,
            buf,
            Box::new(move |n, addr, buf| {
                if completion.is_ready() {
                    return;
                }
                completion.set_result((n, addr, buf));
                completion.resume();
            }),
        );
        if ret < 0 {
            task.set_result((ret, Address::default(), Vec::new()));
        }
        task
    }

    /// Send to the connected peer. Bytes sent or negative errno.
    pub fn send(&self, buf: &[u8]) -> i32 {
        self.proactor.send_sync(self.fd, buf)
    }

    /// Send one datagram to `addr`. Bytes sent or negative errno.
    pub fn sendto(&self, buf: &[u8], addr: &Address) -> i32 {
        self.proactor.sendto_sync(self.fd, buf, addr)
    }
}

impl<P: Proactor> Clone for UdpSocket<P> {
    fn clone(&self) -> Self {
        Self {
            proactor: self.proactor.clone(),
            family: self.family,
            fd: self.fd,
        }
    }
}
