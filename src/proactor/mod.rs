use crate::executor::PriorityTask;
use crate::net::Address;
use anyhow::Result;

pub mod epoll;
pub(crate) mod sys;

#[cfg(feature = "uring")]
pub mod uring;

pub use epoll::EpollProactor;

#[cfg(feature = "uring")]
pub use uring::UringProactor;

/// Callback for `recv`/`send`: byte count (0 means orderly shutdown on a
/// stream) or negative errno, plus the buffer travelling back to the caller.
pub type IoCallback = Box<dyn FnOnce(i32, Vec<u8>) + Send>;

/// Callback for `accept`: new handle or negative errno, plus the remote
/// address.
pub type AcceptCallback = Box<dyn FnOnce(i32, Address) + Send>;

/// Callback for `connect`: 0 on success, negative errno on failure.
pub type ConnectCallback = Box<dyn FnOnce(i32) + Send>;

/// Callback for `recvfrom`: byte count or negative errno, remote address,
/// and the buffer.
pub type RecvFromCallback = Box<dyn FnOnce(i32, Address, Vec<u8>) + Send>;

/// Hook a proactor calls after queuing fresh completions, wired by the
/// context to the executor's `wake` so the polling cycle cuts its wait
/// short.
pub type WakeHook = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    pub(crate) fn as_raw(self) -> libc::c_int {
        match self {
            Family::Ipv4 => libc::AF_INET,
            Family::Ipv6 => libc::AF_INET6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Datagram,
}

impl SocketKind {
    pub(crate) fn as_raw(self) -> libc::c_int {
        match self {
            SocketKind::Stream => libc::SOCK_STREAM,
            SocketKind::Datagram => libc::SOCK_DGRAM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownHow {
    Read,
    Write,
    Both,
}

impl ShutdownHow {
    pub(crate) fn as_raw(self) -> libc::c_int {
        match self {
            ShutdownHow::Read => libc::SHUT_RD,
            ShutdownHow::Write => libc::SHUT_WR,
            ShutdownHow::Both => libc::SHUT_RDWR,
        }
    }
}

/// Backend-specific async I/O engine.
///
/// Every async entry point follows one contract, identical across backends:
///
/// - return `0`: the request is pending and the supplied callback will be
///   invoked exactly once, on a later [`Proactor::harvest`], never before
///   the requesting call returns;
/// - return `< 0` (negative errno): synchronous failure, the callback is
///   never invoked and is dropped together with the buffer.
///
/// Synchronous setup operations (`create`, `bind`, `listen`, ...) report
/// negative errno directly; nothing is ever thrown across this boundary.
pub trait Proactor: Send + Sync + 'static {
    /// Spin up backend resources (e.g. the readiness poller thread).
    fn start(&self) -> Result<()>;

    /// Tear the backend down. Outstanding registrations are dropped.
    fn stop(&self);

    /// New non-blocking socket handle, or negative errno.
    fn create(&self, family: Family, kind: SocketKind) -> i32;

    fn bind(&self, fd: i32, addr: &Address) -> i32;

    fn listen(&self, fd: i32, backlog: i32) -> i32;

    fn shutdown(&self, fd: i32, how: ShutdownHow) -> i32;

    fn close(&self, fd: i32) -> i32;

    /// Locally bound address of `fd` (getsockname), with a status code.
    fn local_address(&self, fd: i32) -> (Address, i32);

    fn recv(&self, fd: i32, buf: Vec<u8>, cb: IoCallback) -> i32;

    fn send(&self, fd: i32, buf: Vec<u8>, cb: IoCallback) -> i32;

    fn accept(&self, fd: i32, cb: AcceptCallback) -> i32;

    fn connect(&self, fd: i32, addr: &Address, cb: ConnectCallback) -> i32;

    fn recvfrom(&self, fd: i32, buf: Vec<u8>, cb: RecvFromCallback) -> i32;

    /// Synchronous datagram connect.
    fn connect_sync(&self, fd: i32, addr: &Address) -> i32;

    /// Synchronous one-shot send, used by the datagram layer.
    fn send_sync(&self, fd: i32, buf: &[u8]) -> i32;

    /// Synchronous one-shot sendto, used by the datagram layer.
    fn sendto_sync(&self, fd: i32, buf: &[u8], addr: &Address) -> i32;

    /// The batch of callbacks whose completions are ready now. Never
    /// blocks; an empty batch invokes nothing.
    fn harvest(&self) -> Vec<PriorityTask>;

    fn set_wake_hook(&self, hook: WakeHook);
}
