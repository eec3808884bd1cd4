use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::BusStream;

#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Listening end of a frame bridge.
///
/// A simulator or serial adapter connects here and exchanges raw wire frames.
/// The socket file is removed on drop unless something else replaced it.
pub struct BridgeSocket {
    listener: UnixListener,
    path: PathBuf,
    identity: (u64, u64),
}

impl BridgeSocket {
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind a bridge socket at `path`, replacing a stale socket file.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bind_err = |path: &Path, source| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        let len = path.as_os_str().len();
        if len >= MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: MAX_PATH_LEN,
            });
        }

        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_socket() => {
                debug!(?path, "removing stale bridge socket");
                std::fs::remove_file(&path).map_err(|e| bind_err(&path, e))?;
            }
            Ok(_) => {
                return Err(bind_err(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(bind_err(&path, err)),
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| bind_err(&path, e))?;
        let meta = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;

        info!(?path, "bridge socket listening");

        Ok(Self {
            listener,
            path,
            identity: (meta.dev(), meta.ino()),
        })
    }

    /// Accept one bridge connection (blocking).
    pub fn accept(&self) -> Result<BusStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "bridge connected");
        Ok(BusStream::from_unix(stream))
    }

    /// Connect to a listening bridge (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<BusStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to bridge");
        Ok(BusStream::from_unix(stream))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BridgeSocket {
    fn drop(&mut self) {
        let Ok(meta) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        if meta.file_type().is_socket() && (meta.dev(), meta.ino()) == self.identity {
            debug!(path = ?self.path, "removing bridge socket");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "bridge path replaced; leaving it");
        }
    }
}
