//! Completion-based backend on io_uring. Unlike the readiness backend there
//! is no poller thread: requests go straight into the submission queue and
//! [`UringProactor::harvest`] drains the completion queue on every executor
//! cycle. The kernel reports results as negative errno, which is already the
//! runtime's error convention.

use crate::executor::{Priority, PriorityTask};
use crate::net::Address;
use crate::proactor::sys;
use crate::proactor::{
    AcceptCallback, ConnectCallback, Family, IoCallback, Proactor, RecvFromCallback, ShutdownHow,
    SocketKind, WakeHook,
};
use anyhow::{Context as _, Result};
use io_uring::{IoUring, opcode, squeue, types};
use parking_lot::Mutex;
use slab::Slab;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};

const RING_ENTRIES: u32 = 256;

pub struct UringProactor {
    inner: Mutex<Inner>,
    stopped: AtomicBool,
    wake_hook: Mutex<Option<WakeHook>>,
}

struct Inner {
    ring: IoUring,
    /// In-flight requests keyed by the squeue entry's `user_data`. Each
    /// entry owns the memory the kernel writes into until its completion
    /// arrives.
    ops: Slab<InFlight>,
}

enum InFlight {
    Recv {
        buf: Vec<u8>,
        cb: IoCallback,
    },
    Send {
        buf: Vec<u8>,
        cb: IoCallback,
    },
    Accept {
        addr: Box<(libc::sockaddr_storage, libc::socklen_t)>,
        cb: AcceptCallback,
    },
    Connect {
        // Kept alive until the CQE lands; the kernel may read it late.
        _addr: Box<(libc::sockaddr_storage, libc::socklen_t)>,
        cb: ConnectCallback,
    },
    RecvFrom {
        state: Box<RecvFromState>,
        cb: RecvFromCallback,
    },
}

/// Owned msghdr plumbing for a RecvMsg request. The msghdr points into the
/// sibling fields, so the whole state lives in one heap allocation that
/// never moves while the request is in flight.
struct RecvFromState {
    buf: Vec<u8>,
    iov: libc::iovec,
    storage: libc::sockaddr_storage,
    msg: libc::msghdr,
}

// SAFETY: the raw pointers inside `iov` and `msg` only ever reference the
// sibling fields of the same boxed allocation, so the state as a whole can
// move between threads.
unsafe impl Send for RecvFromState {}

impl UringProactor {
    pub fn new() -> Result<Self> {
        let ring = IoUring::new(RING_ENTRIES).context("failed to create io_uring")?;
        Ok(Self {
            inner: Mutex::new(Inner {
                ring,
                ops: Slab::new(),
            }),
            stopped: AtomicBool::new(false),
            wake_hook: Mutex::new(None),
        })
    }

    /// Push one prepared entry carrying `op`'s slab key as user_data.
    /// Returns 0 or negative errno; on failure the entry is reclaimed and
    /// the callback dropped.
    fn submit(&self, op: InFlight, prepare: impl FnOnce(u64, &mut Inner) -> squeue::Entry) -> i32 {
        if self.stopped.load(Ordering::Acquire) {
            return -libc::ECANCELED;
        }
        let mut inner = self.inner.lock();
        let key = inner.ops.insert(op) as u64;
        let entry = prepare(key, &mut inner);

        // SAFETY: the buffers the entry points at live in the slab until
        // the matching completion is harvested.
        if unsafe { inner.ring.submission().push(&entry) }.is_err() {
            // Queue full: flush and retry once.
            let _ = inner.ring.submit();
            if unsafe { inner.ring.submission().push(&entry) }.is_err() {
                inner.ops.remove(key as usize);
                return -libc::EBUSY;
            }
        }
        if let Err(err) = inner.ring.submit() {
            inner.ops.remove(key as usize);
            return -err.raw_os_error().unwrap_or(libc::EIO);
        }
        drop(inner);
        // Shorten the executor's idle wait: the completion may already be
        // sitting in the queue by the next cycle.
        if let Some(hook) = self.wake_hook.lock().as_ref() {
            hook();
        }
        0
    }
}

impl Proactor for UringProactor {
    fn start(&self) -> Result<()> {
        tracing::debug!("io_uring backend ready");
        Ok(())
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the in-flight table drops the pending callbacks; the
        // ring itself goes away with the proactor.
        self.inner.lock().ops.clear();
        tracing::debug!("io_uring backend stopped");
    }

    fn create(&self, family: Family, kind: SocketKind) -> i32 {
        sys::create_socket(family, kind)
    }

    fn bind(&self, fd: i32, addr: &Address) -> i32 {
        sys::bind_socket(fd, addr)
    }

    fn listen(&self, fd: i32, backlog: i32) -> i32 {
        sys::listen_socket(fd, backlog)
    }

    fn shutdown(&self, fd: i32, how: ShutdownHow) -> i32 {
        sys::shutdown_socket(fd, how)
    }

    fn close(&self, fd: i32) -> i32 {
        sys::close_socket(fd)
    }

    fn local_address(&self, fd: i32) -> (Address, i32) {
        sys::local_address(fd)
    }

    fn recv(&self, fd: i32, buf: Vec<u8>, cb: IoCallback) -> i32 {
        if fd < 0 {
            return -libc::EBADF;
        }
        self.submit(InFlight::Recv { buf, cb }, |key, inner| {
            let InFlight::Recv { buf, .. } = &mut inner.ops[key as usize] else {
                unreachable!()
            };
            opcode::Recv::new(types::Fd(fd), buf.as_mut_ptr(), buf.len() as u32)
                .build()
                .user_data(key)
        })
    }

    fn send(&self, fd: i32, buf: Vec<u8>, cb: IoCallback) -> i32 {
        if fd < 0 {
            return -libc::EBADF;
        }
        self.submit(InFlight::Send { buf, cb }, |key, inner| {
            let InFlight::Send { buf, .. } = &inner.ops[key as usize] else {
                unreachable!()
            };
            opcode::Send::new(types::Fd(fd), buf.as_ptr(), buf.len() as u32)
                .flags(libc::MSG_NOSIGNAL)
                .build()
                .user_data(key)
        })
    }

    fn accept(&self, fd: i32, cb: AcceptCallback) -> i32 {
        if fd < 0 {
            return -libc::EBADF;
        }
        let addr = Box::new((
            unsafe { mem::zeroed::<libc::sockaddr_storage>() },
            mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
        ));
        self.submit(InFlight::Accept { addr, cb }, |key, inner| {
            let InFlight::Accept { addr, .. } = &mut inner.ops[key as usize] else {
                unreachable!()
            };
            opcode::Accept::new(
                types::Fd(fd),
                &mut addr.0 as *mut _ as *mut libc::sockaddr,
                &mut addr.1,
            )
            .flags(libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC)
            .build()
            .user_data(key)
        })
    }

    fn connect(&self, fd: i32, addr: &Address, cb: ConnectCallback) -> i32 {
        if fd < 0 {
            return -libc::EBADF;
        }
        let (storage, len) = addr.to_storage();
        let boxed = Box::new((storage, len));
        self.submit(InFlight::Connect { _addr: boxed, cb }, |key, inner| {
            let InFlight::Connect { _addr, .. } = &inner.ops[key as usize] else {
                unreachable!()
            };
            opcode::Connect::new(
                types::Fd(fd),
                &_addr.0 as *const _ as *const libc::sockaddr,
                _addr.1,
            )
            .build()
            .user_data(key)
        })
    }

    fn recvfrom(&self, fd: i32, buf: Vec<u8>, cb: RecvFromCallback) -> i32 {
        if fd < 0 {
            return -libc::EBADF;
        }
        let state = Box::new(RecvFromState {
            buf,
            iov: libc::iovec {
                iov_base: std::ptr::null_mut(),
                iov_len: 0,
            },
            storage: unsafe { mem::zeroed() },
            msg: unsafe { mem::zeroed() },
        });
        self.submit(InFlight::RecvFrom { state, cb }, |key, inner| {
            let InFlight::RecvFrom { state, .. } = &mut inner.ops[key as usize] else {
                unreachable!()
            };
            state.iov.iov_base = state.buf.as_mut_ptr() as *mut libc::c_void;
            state.iov.iov_len = state.buf.len();
            state.msg.msg_name = &mut state.storage as *mut _ as *mut libc::c_void;
            state.msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
            state.msg.msg_iov = &mut state.iov;
            state.msg.msg_iovlen = 1;
            opcode::RecvMsg::new(types::Fd(fd), &mut state.msg)
                .build()
                .user_data(key)
        })
    }

    fn connect_sync(&self, fd: i32, addr: &Address) -> i32 {
        sys::connect_socket(fd, addr)
    }

    fn send_sync(&self, fd: i32, buf: &[u8]) -> i32 {
        sys::send_once(fd, buf)
    }

    fn sendto_sync(&self, fd: i32, buf: &[u8], addr: &Address) -> i32 {
        sys::sendto_once(fd, buf, addr)
    }

    fn harvest(&self) -> Vec<PriorityTask> {
        let mut inner = self.inner.lock();
        let mut batch = Vec::new();
        // Pull whatever the kernel has finished; never waits.
        let cqes: Vec<_> = inner
            .ring
            .completion()
            .map(|cqe| (cqe.user_data(), cqe.result()))
            .collect();
        for (key, result) in cqes {
            let Some(op) = inner.ops.try_remove(key as usize) else {
                continue;
            };
            batch.push(match op {
                InFlight::Recv { buf, cb } | InFlight::Send { buf, cb } => {
                    PriorityTask::new(Priority::Medium, move || cb(result, buf))
                }
                InFlight::Accept { addr, cb } => {
                    let remote = if result >= 0 {
                        Address::from_storage(&addr.0)
                    } else {
                        Address::default()
                    };
                    PriorityTask::new(Priority::Medium, move || cb(result, remote))
                }
                InFlight::Connect { cb, .. } => {
                    PriorityTask::new(Priority::Medium, move || cb(result))
                }
                InFlight::RecvFrom { state, cb } => {
                    let remote = if result >= 0 {
                        Address::from_storage(&state.storage)
                    } else {
                        Address::default()
                    };
                    let buf = state.buf;
                    PriorityTask::new(Priority::Medium, move || cb(result, remote, buf))
                }
            });
        }
        batch
    }

    fn set_wake_hook(&self, hook: WakeHook) {
        *self.wake_hook.lock() = Some(hook);
    }
}
