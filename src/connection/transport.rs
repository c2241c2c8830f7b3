//! Byte stream to the server: TCP, TLS over TCP, or a Unix socket

use super::tls::{parse_server_name, TlsConfig};
use crate::{Error, Result};
use bytes::BytesMut;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::client::TlsStream;

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Stream for S {}

/// Connected socket
pub enum Transport {
    /// Plain TCP
    Tcp(TcpStream),
    /// TCP after the TLS upgrade
    Tls(Box<TlsStream<TcpStream>>),
    /// Unix domain socket
    Unix(UnixStream),
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Transport::Tcp(_) => "tcp",
            Transport::Tls(_) => "tls",
            Transport::Unix(_) => "unix",
        };
        f.debug_tuple("Transport").field(&kind).finish()
    }
}

async fn dial<T>(
    timeout: Option<Duration>,
    fut: impl std::future::Future<Output = std::io::Result<T>>,
) -> Result<T> {
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit))??,
        None => fut.await?,
    };
    Ok(stream)
}

impl Transport {
    /// Dial `host:port`, bounded by `timeout` when given
    pub async fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let stream = dial(timeout, TcpStream::connect((host, port))).await?;
        // Every command waits for its reply
        let _ = stream.set_nodelay(true);
        Ok(Transport::Tcp(stream))
    }

    /// Dial a Unix socket, bounded by `timeout` when given
    pub async fn connect_unix(path: &Path, timeout: Option<Duration>) -> Result<Self> {
        let stream = dial(timeout, UnixStream::connect(path)).await?;
        Ok(Transport::Unix(stream))
    }

    /// Whether bytes on this transport are protected from eavesdropping
    pub fn is_secure(&self) -> bool {
        !matches!(self, Transport::Tcp(_))
    }

    fn stream(&mut self) -> &mut dyn Stream {
        match self {
            Transport::Tcp(stream) => stream,
            Transport::Tls(stream) => stream.as_mut(),
            Transport::Unix(stream) => stream,
        }
    }

    /// Write the whole buffer
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.stream().write_all(buf).await?;
        Ok(())
    }

    /// Flush buffered writes
    pub async fn flush(&mut self) -> Result<()> {
        self.stream().flush().await?;
        Ok(())
    }

    /// Append whatever is readable to `buf`; 0 means end of stream
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        Ok(self.stream().read_buf(buf).await?)
    }

    /// Run the TLS handshake on a plain TCP transport.
    ///
    /// Called right after the SSLRequest packet has been written.
    pub async fn upgrade_to_tls(self, tls_config: &TlsConfig, hostname: &str) -> Result<Self> {
        let tcp = match self {
            Transport::Tcp(tcp) => tcp,
            Transport::Tls(_) => return Err(Error::Config("transport is already TLS".into())),
            Transport::Unix(_) => {
                return Err(Error::Config("cannot upgrade a Unix socket to TLS".into()))
            }
        };

        let name = parse_server_name(tls_config.server_name().unwrap_or(hostname))?;
        let server_name = rustls_pki_types::ServerName::try_from(name)
            .map_err(|_| Error::Config(format!("invalid hostname for TLS: {}", hostname)))?;

        let connector = tokio_rustls::TlsConnector::from(tls_config.client_config());
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Config(format!("TLS handshake failed: {}", e)))?;

        Ok(Transport::Tls(Box::new(stream)))
    }

    /// Shut down the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream().shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Transport::connect_tcp("127.0.0.1", port, None).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut transport =
            Transport::connect_tcp("127.0.0.1", port, Some(Duration::from_secs(5)))
                .await
                .unwrap();
        assert!(!transport.is_secure());

        transport.write_all(b"ping").await.unwrap();
        transport.flush().await.unwrap();
        let mut buf = BytesMut::new();
        while buf.len() < 4 {
            assert_ne!(transport.read_buf(&mut buf).await.unwrap(), 0);
        }
        assert_eq!(&buf[..], b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unix_transport_is_secure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mysql.sock");
        let _listener = tokio::net::UnixListener::bind(&path).unwrap();

        let transport = Transport::connect_unix(&path, None).await.unwrap();
        assert!(transport.is_secure());
        assert!(format!("{:?}", transport).contains("unix"));
    }

    #[tokio::test]
    async fn test_unix_connect_failure() {
        let result = Transport::connect_unix(Path::new("/nonexistent/mysql.sock"), None).await;
        assert!(result.is_err());
    }
}
