use crate::net::Address;
use crate::proactor::{Family, Proactor, ShutdownHow, SocketKind};
use crate::task::Task;
use std::sync::Arc;

/// Stream socket bound to one proactor backend.
///
/// All async operations hand back a [`Task`] resolving to the operation's
/// result: a byte count or negative errno, with the buffer travelling along
/// so the caller keeps ownership across the suspension. A synchronous
/// failure from the backend resolves the task immediately, so callers await
/// the same way regardless of which path the error took.
pub struct TcpSocket<P: Proactor> {
    proactor: Arc<P>,
    family: Family,
    fd: i32,
}

impl<P: Proactor> TcpSocket<P> {
    /// New stream socket. The status is 0 on success, negative errno
    /// otherwise (the socket then carries an invalid handle).
    pub fn create(proactor: Arc<P>, family: Family) -> (Self, i32) {
        let fd = proactor.create(family, SocketKind::Stream);
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

    /// Wrap an already-open handle, e.g. one produced by `accept`.
    pub(crate) fn from_raw(proactor: Arc<P>, family: Family, fd: i32) -> Self {
        Self { proactor, family, fd }
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

    pub fn listen(&self, backlog: i32) -> i32 {
        self.proactor.listen(self.fd, backlog)
    }

    pub fn shutdown(&self, how: ShutdownHow) -> i32 {
        self.proactor.shutdown(self.fd, how)
    }

    pub fn close(&self) -> i32 {
        self.proactor.close(self.fd)
    }

    pub fn local_address(&self) -> (Address, i32) {
        self.proactor.local_address(self.fd)
    }

    /// Read into `buf`. Resolves to `(n, buf)`: `n > 0` bytes read, `0`
    /// orderly shutdown by the peer, `< 0` negative errno.
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

    /// Write `buf`. Resolves to `(n, buf)` with the bytes actually sent or
    /// a negative errno.
    pub fn send(&self, buf: Vec<u8>) -> Task<(i32, Vec<u8>)> {
        let task = Task::new();
        let completion = task.clone();
        let ret = self.proactor.send(
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

    /// Accept one connection. Resolves to the connected socket and the
    /// remote address; on failure the socket carries the negative errno in
    /// its handle slot.
    pub fn accept(&self) -> Task<(TcpSocket<P>, Address)> {
        let task = Task::new();
        let completion = task.clone();
        let proactor = self.proactor.clone();
        let family = self.family;
        let ret = self.proactor.accept(
            self.fd,
            Box::new(move |fd, addr| {
                if completion.is_ready() {
                    return;
                }
                completion.set_result((TcpSocket::from_raw(proactor, family, fd), addr));
                completion.resume();
            }),
        );
        if ret < 0 {
            task.set_result((
                TcpSocket::from_raw(self.proactor.clone(), self.family, ret),
                Address::default(),
            ));
        }
        task
    }

    /// Connect to `addr`. Resolves to 0 or negative errno.
    pub fn connect(&self, addr: &Address) -> Task<i32> {
        let task = Task::new();
        let completion = task.clone();
        let ret = self.proactor.connect(
            self.fd,
            addr,
            Box::new(move |status| {
                if completion.is_ready() {
                    return;
                }
                completion.set_result(status);
                completion.resume();
            }),
        );
        if ret < 0 {
            task.set_result(ret);
        }
        task
    }
}

impl<P: Proactor> Clone for TcpSocket<P> {
    fn clone(&self) -> Self {
        Self {
            proactor: self.proactor.clone(),
            family: self.family,
            fd: self.fd,
        }
    }
}
