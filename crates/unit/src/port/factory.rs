// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Endpoint creation: one function per endpoint kind, each returning an open
//! descriptor owned by the caller.
//!
//! Filesystem objects are only ever deleted as the pre-create step of the
//! next open — never after creation — so external consumers cannot race with
//! removal. Created objects are re-checked after opening; an object that is
//! not exactly what we just asked for means someone else owns the path.

use crate::mac::{CreatedKind, MacPolicy};
use crate::port::options;
use nix::errno::Errno;
use nix::sys::socket::{
    self, getpeername, getsockname, sockopt, AddressFamily, Backlog, NetlinkAddr, SockFlag,
    SockProtocol, SockType, SockaddrIn, SockaddrIn6, SockaddrLike, SockaddrStorage, UnixAddr,
};
use nix::sys::stat::{umask, Mode};
use sockd_core::{
    BindIpv6Only, ConnectionPeer, NetlinkFamily, SocketAddress, SocketConfig, SocketType, UnitName,
};
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, MetadataExt, OpenOptionsExt};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpenError {
    /// The path is occupied by a foreign object we refuse to replace, or the
    /// object found after creation is not the one we asked for.
    #[error("{0} exists and is not ours to replace")]
    AlreadyExists(std::path::PathBuf),

    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: Errno,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn os(op: &'static str) -> impl Fn(Errno) -> OpenError {
    move |source| OpenError::Os { op, source }
}

/// Open one endpoint of any kind.
pub(crate) fn open_port(
    unit: &UnitName,
    kind: &super::PortKind,
    config: &SocketConfig,
    mac: &dyn MacPolicy,
    socket_label: Option<&str>,
) -> Result<OwnedFd, OpenError> {
    match kind {
        super::PortKind::Socket { address } => {
            let fd = open_socket(unit, address, config, mac, socket_label)?;
            Ok(fd)
        }
        super::PortKind::Fifo { path } => {
            let fd = open_fifo(path, config.directory_mode, config.socket_mode, mac)?;
            options::apply_fifo_options(unit, config, fd.as_fd());
            Ok(fd)
        }
        super::PortKind::Special { path } => open_special(path),
        super::PortKind::MessageQueue { path } => {
            open_mqueue(path, config.socket_mode, config.mq_maxmsg, config.mq_msgsize)
        }
    }
}

/// Create, bind and (for connection-oriented types) listen a socket.
/// Options are applied after bind and before listen.
fn open_socket(
    unit: &UnitName,
    address: &SocketAddress,
    config: &SocketConfig,
    mac: &dyn MacPolicy,
    label: Option<&str>,
) -> Result<OwnedFd, OpenError> {
    let (family, ty, protocol) = socket_parameters(address);

    if let Some(label) = label {
        mac.socket_context_set(label);
    }
    let fd = socket::socket(
        family,
        ty,
        SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
        protocol,
    );
    if label.is_some() {
        mac.context_clear();
    }
    let fd = fd.map_err(os("socket"))?;

    match address {
        SocketAddress::Inet { addr, .. } => {
            if let SocketAddr::V6(_) = addr {
                match config.bind_ipv6_only {
                    BindIpv6Only::Default => {}
                    BindIpv6Only::Both => {
                        socket::setsockopt(&fd, sockopt::Ipv6V6Only, &false)
                            .map_err(os("IPV6_V6ONLY"))?;
                    }
                    BindIpv6Only::Ipv6Only => {
                        socket::setsockopt(&fd, sockopt::Ipv6V6Only, &true)
                            .map_err(os("IPV6_V6ONLY"))?;
                    }
                }
            }
            if let Some(device) = &config.bind_to_device {
                let device = std::ffi::OsString::from(device);
                socket::setsockopt(&fd, sockopt::BindToDevice, &device)
                    .map_err(os("SO_BINDTODEVICE"))?;
            }
            if config.free_bind {
                if let Err(e) = socket::setsockopt(&fd, sockopt::IpFreebind, &true) {
                    tracing::warn!(unit = %unit, error = %e, "IP_FREEBIND failed, ignoring");
                }
            }
            if config.transparent {
                if let Err(e) = socket::setsockopt(&fd, sockopt::IpTransparent, &true) {
                    tracing::warn!(unit = %unit, error = %e, "IP_TRANSPARENT failed, ignoring");
                }
            }
            socket::setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(os("SO_REUSEADDR"))?;

            match addr {
                SocketAddr::V4(v4) => {
                    socket::bind(fd.as_raw_fd(), &SockaddrIn::from(*v4)).map_err(os("bind"))?;
                }
                SocketAddr::V6(v6) => {
                    socket::bind(fd.as_raw_fd(), &SockaddrIn6::from(*v6)).map_err(os("bind"))?;
                }
            }
        }
        SocketAddress::Unix { path, .. } => {
            bind_unix(path, config, mac, &fd)?;
        }
        SocketAddress::Netlink { groups, .. } => {
            socket::bind(fd.as_raw_fd(), &NetlinkAddr::new(0, *groups)).map_err(os("bind"))?;
        }
    }

    options::apply_socket_options(unit, config, fd.as_fd());

    if address.ty().is_connection_oriented() {
        let backlog = config
            .backlog
            .and_then(|n| Backlog::new(n).ok())
            .unwrap_or(Backlog::MAXCONN);
        socket::listen(&fd, backlog).map_err(os("listen"))?;
    }

    Ok(fd)
}

fn bind_unix(
    path: &Path,
    config: &SocketConfig,
    mac: &dyn MacPolicy,
    fd: &OwnedFd,
) -> Result<(), OpenError> {
    if let Some(name) = abstract_name(path) {
        let addr = UnixAddr::new_abstract(name.as_bytes()).map_err(os("abstract address"))?;
        return socket::bind(fd.as_raw_fd(), &addr).map_err(os("bind"));
    }

    make_parents(path, config.directory_mode, mac)?;

    // we may only delete an object we are about to replace
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            nix::unistd::unlink(path).map_err(os("unlink stale socket"))?;
        }
        Ok(_) => return Err(OpenError::AlreadyExists(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    mac.context_set(path, CreatedKind::Socket);
    let old_mask = push_creation_mask(config.socket_mode);
    let addr = UnixAddr::new(path).map_err(os("unix address"));
    let bound = addr.and_then(|addr| socket::bind(fd.as_raw_fd(), &addr).map_err(os("bind")));
    umask(old_mask);
    mac.context_clear();
    bound
}

/// Narrow the umask so the next create yields `mode`, still honoring the
/// process umask. Returns the previous mask for restoration.
fn push_creation_mask(mode: u32) -> Mode {
    let old_mask = umask(mode_not(mode));
    umask(Mode::from_bits_truncate(mode_not(mode).bits() | old_mask.bits()));
    old_mask
}

/// Create parent directories with the configured mode, label-aware.
fn make_parents(path: &Path, directory_mode: u32, mac: &dyn MacPolicy) -> Result<(), OpenError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.exists() {
        return Ok(());
    }
    mac.context_set(parent, CreatedKind::Directory);
    let result = std::fs::DirBuilder::new()
        .recursive(true)
        .mode(directory_mode)
        .create(parent);
    mac.context_clear();
    result.map_err(OpenError::from)
}

/// Create and open a FIFO, enforcing the exact mode via umask, and verify the
/// object we opened is the FIFO we just made.
fn open_fifo(
    path: &Path,
    directory_mode: u32,
    socket_mode: u32,
    mac: &dyn MacPolicy,
) -> Result<OwnedFd, OpenError> {
    make_parents(path, directory_mode, mac)?;

    mac.context_set(path, CreatedKind::Fifo);
    let old_mask = push_creation_mask(socket_mode);
    let made = nix::unistd::mkfifo(path, Mode::from_bits_truncate(socket_mode));
    umask(old_mask);
    mac.context_clear();
    match made {
        Ok(()) | Err(Errno::EEXIST) => {}
        Err(e) => return Err(os("mkfifo")(e)),
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_NOFOLLOW)
        .open(path)?;

    let meta = file.metadata()?;
    let expected = socket_mode & !mode_bits(old_mask);
    if !meta.file_type().is_fifo()
        || meta.mode() & 0o777 != expected
        || meta.uid() != nix::unistd::getuid().as_raw()
        || meta.gid() != nix::unistd::getgid().as_raw()
    {
        return Err(OpenError::AlreadyExists(path.to_path_buf()));
    }

    Ok(file.into())
}

/// Open a pre-existing "special" file read-only. Only regular files and
/// character devices qualify.
fn open_special(path: &Path) -> Result<OwnedFd, OpenError> {
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_NOFOLLOW)
        .open(path)?;

    let file_type = file.metadata()?.file_type();
    if !file_type.is_file() && !file_type.is_char_device() {
        return Err(OpenError::AlreadyExists(path.to_path_buf()));
    }

    Ok(file.into())
}

/// Open (creating if needed) a POSIX message queue and verify mode and
/// ownership afterwards.
fn open_mqueue(
    path: &Path,
    mode: u32,
    maxmsg: Option<i64>,
    msgsize: Option<i64>,
) -> Result<OwnedFd, OpenError> {
    let name = path.to_str().ok_or_else(|| OpenError::AlreadyExists(path.to_path_buf()))?;
    let cname = std::ffi::CString::new(name)
        .map_err(|_| OpenError::AlreadyExists(path.to_path_buf()))?;

    let mut attr_storage;
    let attr = match (maxmsg, msgsize) {
        (Some(maxmsg), Some(msgsize)) if maxmsg > 0 && msgsize > 0 => {
            attr_storage = unsafe { std::mem::zeroed::<libc::mq_attr>() };
            attr_storage.mq_flags = libc::O_NONBLOCK as _;
            attr_storage.mq_maxmsg = maxmsg as _;
            attr_storage.mq_msgsize = msgsize as _;
            attr_storage.mq_curmsgs = 0;
            &mut attr_storage as *mut libc::mq_attr
        }
        _ => std::ptr::null_mut(),
    };

    let old_mask = push_creation_mask(mode);
    // nix's mq wrapper hides the descriptor; on Linux mq_open returns a real
    // fd we need to poll and pass on, so call it directly
    let fd = unsafe {
        libc::mq_open(
            cname.as_ptr(),
            libc::O_RDONLY | libc::O_CLOEXEC | libc::O_NONBLOCK | libc::O_CREAT,
            mode as libc::mode_t,
            attr,
        )
    };
    umask(old_mask);
    if fd < 0 {
        return Err(os("mq_open")(Errno::last()));
    }
    let file = std::fs::File::from(unsafe { OwnedFd::from_raw_fd(fd) });

    let meta = file.metadata()?;
    let expected = mode & !mode_bits(old_mask);
    if meta.mode() & 0o777 != expected
        || meta.uid() != nix::unistd::getuid().as_raw()
        || meta.gid() != nix::unistd::getgid().as_raw()
    {
        return Err(OpenError::AlreadyExists(path.to_path_buf()));
    }

    Ok(file.into())
}

/// Resolve both endpoints of an accepted connection for instance naming.
/// `ENOTCONN` propagates so the dispatcher can discard RST'd connections.
pub(crate) fn query_peer(fd: BorrowedFd<'_>) -> Result<ConnectionPeer, Errno> {
    let local = getsockname::<SockaddrStorage>(fd.as_raw_fd())?;
    match local.family() {
        Some(AddressFamily::Inet) | Some(AddressFamily::Inet6) => {
            let remote = getpeername::<SockaddrStorage>(fd.as_raw_fd())?;
            let local = inet_addr(&local).ok_or(Errno::EAFNOSUPPORT)?;
            let remote = inet_addr(&remote).ok_or(Errno::EAFNOSUPPORT)?;
            Ok(ConnectionPeer::Inet { local, remote })
        }
        Some(AddressFamily::Unix) => {
            let creds = socket::getsockopt(&fd, sockopt::PeerCredentials)?;
            Ok(ConnectionPeer::Unix { pid: creds.pid() as u32, uid: creds.uid() })
        }
        _ => Err(Errno::EAFNOSUPPORT),
    }
}

/// Whether an inherited descriptor is a socket bound to `address`, used when
/// sweeping the re-exec fd store.
pub(crate) fn address_matches_fd(address: &SocketAddress, fd: BorrowedFd<'_>) -> bool {
    let Ok(ty) = socket::getsockopt(&fd, sockopt::SockType) else {
        return false;
    };
    if sock_type_number(ty) != address.ty().number() {
        return false;
    }
    let Ok(bound) = getsockname::<SockaddrStorage>(fd.as_raw_fd()) else {
        return false;
    };
    match address {
        SocketAddress::Inet { addr, .. } => inet_addr(&bound) == Some(*addr),
        SocketAddress::Unix { path, .. } => {
            let Some(unix) = bound.as_unix_addr() else {
                return false;
            };
            match abstract_name(path) {
                Some(name) => unix.as_abstract() == Some(name.as_bytes()),
                None => unix.path() == Some(path.as_path()),
            }
        }
        SocketAddress::Netlink { family, groups } => {
            let Some(netlink) = bound.as_netlink_addr() else {
                return false;
            };
            socket_protocol(fd) == Some(family.protocol()) && netlink.groups() == *groups
        }
    }
}

fn socket_parameters(
    address: &SocketAddress,
) -> (AddressFamily, SockType, Option<SockProtocol>) {
    match address {
        SocketAddress::Inet { addr, ty } => {
            let family = match addr {
                SocketAddr::V4(_) => AddressFamily::Inet,
                SocketAddr::V6(_) => AddressFamily::Inet6,
            };
            (family, sock_type(*ty), None)
        }
        SocketAddress::Unix { ty, .. } => (AddressFamily::Unix, sock_type(*ty), None),
        SocketAddress::Netlink { family, .. } => (
            AddressFamily::Netlink,
            SockType::Raw,
            Some(netlink_protocol(*family)),
        ),
    }
}

fn sock_type(ty: SocketType) -> SockType {
    match ty {
        SocketType::Stream => SockType::Stream,
        SocketType::Datagram => SockType::Datagram,
        SocketType::Raw => SockType::Raw,
        SocketType::SequentialPacket => SockType::SeqPacket,
    }
}

fn sock_type_number(ty: SockType) -> i32 {
    match ty {
        SockType::Stream => 1,
        SockType::Datagram => 2,
        SockType::Raw => 3,
        SockType::SeqPacket => 5,
        _ => -1,
    }
}

fn netlink_protocol(family: NetlinkFamily) -> SockProtocol {
    match family {
        NetlinkFamily::Route => SockProtocol::NetlinkRoute,
        NetlinkFamily::SelinuxEvents => SockProtocol::NetlinkSELinux,
        NetlinkFamily::Iscsi => SockProtocol::NetlinkISCSI,
        NetlinkFamily::Audit => SockProtocol::NetlinkAudit,
        NetlinkFamily::FibLookup => SockProtocol::NetlinkFIBLookup,
        NetlinkFamily::Netfilter => SockProtocol::NetlinkNetFilter,
        NetlinkFamily::KobjectUevent => SockProtocol::NetlinkKObjectUEvent,
        NetlinkFamily::Generic => SockProtocol::NetlinkGeneric,
        NetlinkFamily::Scsitransport => SockProtocol::NetlinkSCSITransport,
        NetlinkFamily::Rdma => SockProtocol::NetlinkRDMA,
    }
}

fn inet_addr(storage: &SockaddrStorage) -> Option<SocketAddr> {
    if let Some(v4) = storage.as_sockaddr_in() {
        return Some(SocketAddr::from((v4.ip(), v4.port())));
    }
    if let Some(v6) = storage.as_sockaddr_in6() {
        return Some(SocketAddr::from((v6.ip(), v6.port())));
    }
    None
}

fn socket_protocol(fd: BorrowedFd<'_>) -> Option<i32> {
    let mut value: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let res = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PROTOCOL,
            (&mut value as *mut libc::c_int).cast(),
            &mut len,
        )
    };
    (res == 0).then_some(value)
}

fn abstract_name(path: &Path) -> Option<&str> {
    path.to_str().and_then(|p| p.strip_prefix('@'))
}

fn mode_not(mode: u32) -> Mode {
    Mode::from_bits_truncate(!mode & 0o777)
}

fn mode_bits(mode: Mode) -> u32 {
    mode.bits() as u32
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
