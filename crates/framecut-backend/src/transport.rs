//! Local duplex channels the editor connects to.
//!
//! A channel name maps to a Unix domain socket under the system temp
//! directory (or the name itself when it is an absolute path) on Unix, and
//! to `\\.\pipe\<name>` on Windows.

use std::io;

#[cfg(unix)]
pub use self::unix::{endpoint, Connection, Listener};
#[cfg(windows)]
pub use self::windows::{endpoint, Connection, Listener};

#[cfg(unix)]
mod unix {
    use std::io;
    use std::os::unix::fs::FileTypeExt;
    use std::path::{Path, PathBuf};

    use tokio::net::{UnixListener, UnixStream};

    pub type Connection = UnixStream;

    pub fn endpoint(name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::temp_dir().join(name)
        }
    }

    pub struct Listener {
        inner: UnixListener,
        path: PathBuf,
    }

    impl Listener {
        pub fn bind(name: &str) -> io::Result<Self> {
            let path = endpoint(name);
            remove_stale_socket(&path)?;
            let inner = UnixListener::bind(&path)?;
            Ok(Self { inner, path })
        }

        pub async fn accept(&mut self) -> io::Result<Connection> {
            let (stream, _) = self.inner.accept().await?;
            Ok(stream)
        }

        pub fn endpoint(&self) -> String {
            self.path.display().to_string()
        }
    }

    /// A socket file left behind by a crashed run blocks bind. Anything at
    /// the endpoint that is not a socket is left alone.
    fn remove_stale_socket(path: &Path) -> io::Result<()> {
        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_socket() => {
                std::fs::remove_file(path)?;
                tracing::debug!("Removed stale socket {}", path.display());
                Ok(())
            }
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a socket", path.display()),
            )),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    impl Drop for Listener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::io;

    use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};

    pub type Connection = NamedPipeServer;

    pub fn endpoint(name: &str) -> String {
        if name.starts_with(r"\\.\pipe\") {
            name.to_string()
        } else {
            format!(r"\\.\pipe\{name}")
        }
    }

    pub struct Listener {
        name: String,
        pending: Option<NamedPipeServer>,
    }

    impl Listener {
        pub fn bind(name: &str) -> io::Result<Self> {
            let name = endpoint(name);
            let first = ServerOptions::new().first_pipe_instance(true).create(&name)?;
            Ok(Self {
                name,
                pending: Some(first),
            })
        }

        /// Wait for a client on a fresh pipe instance. A new instance is only
        /// created once the previous client is handed out.
        pub async fn accept(&mut self) -> io::Result<Connection> {
            let server = match self.pending.take() {
                Some(server) => server,
                None => ServerOptions::new().create(&self.name)?,
            };
            server.connect().await?;
            Ok(server)
        }

        pub fn endpoint(&self) -> String {
            self.name.clone()
        }
    }
}

/// Bind `name`, tagging failures with the channel they belong to.
pub fn bind(name: &str) -> io::Result<Listener> {
    Listener::bind(name).map_err(|err| {
        io::Error::new(err.kind(), format!("cannot listen on `{name}`: {err}"))
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_endpoint_resolution() {
        assert_eq!(endpoint("/run/fc.sock"), std::path::PathBuf::from("/run/fc.sock"));
        assert_eq!(endpoint("fc-ctl"), std::env::temp_dir().join("fc-ctl"));
    }

    #[tokio::test]
    async fn test_bind_accept_and_cleanup() {
        let name = format!("framecut_transport_{}.sock", uuid::Uuid::new_v4());
        let mut listener = bind(&name).unwrap();
        let path = endpoint(&name);
        assert!(path.exists());

        let mut client = tokio::net::UnixStream::connect(&path).await.unwrap();
        let mut server = listener.accept().await.unwrap();
        client.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let name = format!("framecut_stale_{}.sock", uuid::Uuid::new_v4());
        let path = endpoint(&name);
        let stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
        drop(stale);
        assert!(path.exists());

        let listener = bind(&name).unwrap();
        assert!(path.exists());
        drop(listener);
    }

    #[tokio::test]
    async fn test_bind_refuses_to_remove_regular_file() {
        let path = std::env::temp_dir().join(format!("framecut_notasocket_{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"keep me").unwrap();

        let err = bind(&path.to_string_lossy()).err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
        std::fs::remove_file(&path).unwrap();
    }
}
