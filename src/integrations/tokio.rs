use core::ops::{Deref, DerefMut};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ReadWrite;

pub struct TokioIo<T: AsyncRead + AsyncWrite + Unpin + Send>(pub T);
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Deref for TokioIo<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DerefMut for TokioIo<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ReadWrite for TokioIo<T> {
    type Error = tokio::io::Error;
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.0.read(buf).await
    }

    async fn write_single(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        if buf.is_empty() {
            return Ok(());
        }
        self.0.write_all(buf).await?;
        // tls streams hold on to records until flushed
        self.0.flush().await
    }

    async fn write_multi(&mut self, buf: &[&[u8]]) -> Result<(), Self::Error> {
        // commands are short, one write keeps them in a single record
        let command = buf.concat();
        self.write_single(&command).await
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.0.shutdown().await
    }
}

#[cfg(feature = "rustls")]
pub use rustls_support::{ConnectError, connect_tls};

#[cfg(feature = "rustls")]
mod rustls_support {
    use std::sync::Arc;

    use tokio::net::TcpStream;
    use tokio_rustls::{TlsConnector, client::TlsStream};

    use super::TokioIo;

    #[derive(Debug, thiserror::Error)]
    pub enum ConnectError {
        #[error("IO Error: {0}")]
        Io(#[from] std::io::Error),
        #[error("Invalid server name {0:?}")]
        InvalidServerName(String),
    }

    /// Opens an implicit-TLS (SMTPS) connection, verified against the webpki roots.
    pub async fn connect_tls(
        host: &str,
        port: u16,
    ) -> Result<TokioIo<TlsStream<TcpStream>>, ConnectError> {
        let server_name = rustls::pki_types::ServerName::try_from(host)
            .map_err(|_| ConnectError::InvalidServerName(host.to_owned()))?
            .to_owned();

        #[cfg(feature = "log-04")]
        log::debug!("connecting to {host}:{port}");
        let tcp = TcpStream::connect((host, port)).await?;

        let root_cert_store =
            rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let tls = connector.connect(server_name, tcp).await?;
        Ok(TokioIo(tls))
    }
}
