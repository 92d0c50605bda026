// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Unix datagram socket transport.
//!
//! Frame: `[tag:u32le, payload...]`. Both ends bind a filesystem path so replies can be addressed
//! to the sender; datagrams from unnamed sockets are dropped.

use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;

use crate::{Datagram, DatagramTransport, IpcError, Result, Wait};

const TAG_LEN: usize = 4;

/// Socket bound to a filesystem path.
pub struct UnixEndpoint {
    socket: UnixDatagram,
    path: PathBuf,
    max_payload: usize,
    recv_buf: Mutex<Vec<u8>>,
}

impl UnixEndpoint {
    /// Binds `path`, replacing a stale socket file left by an earlier run.
    pub fn bind(path: impl AsRef<Path>, max_payload: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        match std::fs::remove_file(&path) {
            Ok(()) => log::debug!("kapi-ipc: removed stale socket {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        let socket = UnixDatagram::bind(&path)?;
        Ok(Self {
            socket,
            path,
            max_payload,
            recv_buf: Mutex::new(vec![0u8; TAG_LEN + max_payload + 1]),
        })
    }

    /// Bound path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn configure(&self, wait: Wait) -> io::Result<()> {
        match wait {
            Wait::NonBlocking => self.socket.set_nonblocking(true),
            Wait::Timeout(timeout) if timeout.is_zero() => self.socket.set_nonblocking(true),
            Wait::Blocking => {
                self.socket.set_nonblocking(false)?;
                self.socket.set_read_timeout(None)
            }
            Wait::Timeout(timeout) => {
                self.socket.set_nonblocking(false)?;
                self.socket.set_read_timeout(Some(timeout.max(Duration::from_micros(1))))
            }
        }
    }
}

impl DatagramTransport for UnixEndpoint {
    type Addr = PathBuf;

    fn send_to(&self, to: &PathBuf, tag: u32, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_payload {
            return Err(IpcError::TooLarge);
        }
        let mut frame = Vec::with_capacity(TAG_LEN + payload.len());
        frame.extend_from_slice(&tag.to_le_bytes());
        frame.extend_from_slice(payload);
        let sent = self.socket.send_to(&frame, to)?;
        if sent != frame.len() {
            return Err(IpcError::Io(io::ErrorKind::WriteZero));
        }
        Ok(())
    }

    fn recv_from(&self, wait: Wait) -> Result<Datagram<PathBuf>> {
        let mut buf = self.recv_buf.lock();
        self.configure(wait)?;
        loop {
            let (len, addr) = self.socket.recv_from(&mut buf).map_err(|err| {
                match (IpcError::from(err), wait) {
                    (IpcError::WouldBlock, Wait::Timeout(t)) if !t.is_zero() => IpcError::Timeout,
                    (other, _) => other,
                }
            })?;
            let Some(from) = addr.as_pathname().map(Path::to_path_buf) else {
                log::warn!("kapi-ipc: dropping datagram from unnamed socket");
                continue;
            };
            if len < TAG_LEN {
                log::warn!("kapi-ipc: dropping {len}-byte datagram without tag");
                continue;
            }
            if len > TAG_LEN + self.max_payload {
                log::warn!("kapi-ipc: dropping oversized datagram from {}", from.display());
                continue;
            }
            let tag = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
            return Ok(Datagram { from, tag, payload: buf[TAG_LEN..len].to_vec() });
        }
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Drop for UnixEndpoint {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_travels_in_header() {
        let dir = tempfile::tempdir().unwrap();
        let a = UnixEndpoint::bind(dir.path().join("a.sock"), 128).unwrap();
        let b = UnixEndpoint::bind(dir.path().join("b.sock"), 128).unwrap();

        a.send_to(&b.path().to_path_buf(), 0xdead, b"hello").unwrap();
        let dg = b.recv_from(Wait::Timeout(Duration::from_secs(2))).unwrap();
        assert_eq!(dg.tag, 0xdead);
        assert_eq!(dg.payload, b"hello");
        assert_eq!(dg.from, a.path());

        b.send_to(&dg.from, dg.tag, b"").unwrap();
        let back = a.recv_from(Wait::Timeout(Duration::from_secs(2))).unwrap();
        assert_eq!((back.tag, back.payload.len()), (0xdead, 0));
    }

    #[test]
    fn idle_receive() {
        let dir = tempfile::tempdir().unwrap();
        let a = UnixEndpoint::bind(dir.path().join("a.sock"), 16).unwrap();
        assert_eq!(a.recv_from(Wait::NonBlocking), Err(IpcError::WouldBlock));
        assert_eq!(a.recv_from(Wait::Timeout(Duration::from_millis(10))), Err(IpcError::Timeout));
        assert_eq!(
            a.send_to(&dir.path().join("a.sock"), 0, &[0; 17]),
            Err(IpcError::TooLarge)
        );
    }

    #[test]
    fn rebind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        drop(UnixDatagram::bind(&path).unwrap());
        assert!(path.exists());
        assert!(UnixEndpoint::bind(&path, 16).is_ok());
    }
}
