//! TLS connector and the byte-stream seam used by the fetcher.

use std::io::Read;
use std::io::Write;
use std::net::TcpStream;

use vt_core::ShellError;
use vt_core::ShellResult;

/// Where TLS trust anchors come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustStoreMode {
    /// Bundled Web PKI roots only.
    WebPkiOnly,
    /// Bundled roots plus the operating system trust store.
    WebPkiAndOs,
}

/// Stream the fetcher reads responses from, TLS or plain TCP.
pub trait IoStream: Read + Write {}
impl<T: Read + Write> IoStream for T {}

pub type BoxedIoStream = Box<dyn IoStream>;

/// Upgrades a TCP connection to TLS for `server_name`.
#[cfg(feature = "tls-rustls")]
pub fn connect_tls(
    mut stream: TcpStream,
    server_name: &str,
    mode: TrustStoreMode,
) -> ShellResult<BoxedIoStream> {
    use std::sync::Arc;

    use rustls::ClientConfig;
    use rustls::ClientConnection;
    use rustls::StreamOwned;
    use rustls::pki_types::ServerName;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let roots = system_root_store(mode)?;

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|error| {
            ShellError::new(
                "net.tls.config_versions_invalid",
                format!("failed to configure TLS protocol versions: {error}"),
            )
        })?
        .with_root_certificates(Arc::new(roots))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    let server_name = ServerName::try_from(server_name.to_owned()).map_err(|error| {
        ShellError::new(
            "net.tls.server_name_invalid",
            format!("invalid TLS server name `{server_name}`: {error}"),
        )
    })?;

    let mut connection = ClientConnection::new(Arc::new(config), server_name.clone()).map_err(
        |error| {
            ShellError::new(
                "net.tls.connection_init_failed",
                format!("failed to initialize TLS connection for `{server_name:?}`: {error}"),
            )
        },
    )?;

    connection.complete_io(&mut stream).map_err(|error| {
        ShellError::new(
            "net.tls.handshake_failed",
            format!("TLS handshake failed for `{server_name:?}`: {error}"),
        )
    })?;

    Ok(Box::new(StreamOwned::new(connection, stream)))
}

#[cfg(feature = "tls-rustls")]
fn system_root_store(mode: TrustStoreMode) -> ShellResult<rustls::RootCertStore> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if matches!(mode, TrustStoreMode::WebPkiAndOs) {
        let native = rustls_native_certs::load_native_certs();
        if native.certs.is_empty() && !native.errors.is_empty() {
            let details = native
                .errors
                .iter()
                .map(std::string::ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ShellError::new(
                "net.tls.os_roots_load_failed",
                format!("failed to load operating-system roots: {details}"),
            ));
        }

        for cert in native.certs {
            roots.add(cert).map_err(|error| {
                ShellError::new(
                    "net.tls.os_root_add_failed",
                    format!("failed to add operating-system root: {error}"),
                )
            })?;
        }
    }

    if roots.is_empty() {
        return Err(ShellError::new(
            "net.tls.root_store_empty",
            "no trust anchors available for TLS verification",
        ));
    }

    Ok(roots)
}

#[cfg(not(feature = "tls-rustls"))]
pub fn connect_tls(
    _stream: TcpStream,
    server_name: &str,
    _mode: TrustStoreMode,
) -> ShellResult<BoxedIoStream> {
    Err(ShellError::new(
        "net.tls.backend_unavailable",
        format!(
            "rustls backend is disabled for this build; enable `vt-net/tls-rustls` to reach `{server_name}`"
        ),
    ))
}
