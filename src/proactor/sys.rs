//! Thin libc wrappers shared by the proactor backends. Every function
//! reports failure as a negative errno value, matching the runtime's
//! error-as-value convention.

use crate::net::Address;
use crate::proactor::{Family, ShutdownHow, SocketKind};
use std::io;
use std::mem;

/// Negative errno of the last OS error on this thread.
pub(crate) fn last_errno() -> i32 {
    -io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

pub(crate) fn create_socket(family: Family, kind: SocketKind) -> i32 {
    let fd = unsafe {
        libc::socket(
            family.as_raw(),
            kind.as_raw() | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if fd < 0 {
        return last_errno();
    }
    if kind == SocketKind::Stream {
        let one: libc::c_int = 1;
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }
    fd
}

pub(crate) fn bind_socket(fd: i32, addr: &Address) -> i32 {
    let (storage, len) = addr.to_storage();
    let ret = unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, len) };
    if ret < 0 { last_errno() } else { 0 }
}

pub(crate) fn listen_socket(fd: i32, backlog: i32) -> i32 {
    let ret = unsafe { libc::listen(fd, backlog) };
    if ret < 0 { last_errno() } else { 0 }
}

pub(crate) fn shutdown_socket(fd: i32, how: ShutdownHow) -> i32 {
    let ret = unsafe { libc::shutdown(fd, how.as_raw()) };
    if ret < 0 { last_errno() } else { 0 }
}

pub(crate) fn close_socket(fd: i32) -> i32 {
    let ret = unsafe { libc::close(fd) };
    if ret < 0 { last_errno() } else { 0 }
}

pub(crate) fn connect_socket(fd: i32, addr: &Address) -> i32 {
    let (storage, len) = addr.to_storage();
    let ret = unsafe { libc::connect(fd, &storage as *const _ as *const libc::sockaddr, len) };
    if ret < 0 { last_errno() } else { 0 }
}

pub(crate) fn local_address(fd: i32) -> (Address, i32) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if ret < 0 {
        (Address::default(), last_errno())
    } else {
        (Address::from_storage(&storage), 0)
    }
}

pub(crate) fn send_once(fd: i32, buf: &[u8]) -> i32 {
    let n = unsafe {
        libc::send(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            libc::MSG_NOSIGNAL,
        )
    };
    if n < 0 { last_errno() } else { n as i32 }
}

pub(crate) fn sendto_once(fd: i32, buf: &[u8], addr: &Address) -> i32 {
    let (storage, len) = addr.to_storage();
    let n = unsafe {
        libc::sendto(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            libc::MSG_NOSIGNAL,
            &storage as *const _ as *const libc::sockaddr,
            len,
        )
    };
    if n < 0 { last_errno() } else { n as i32 }
}
