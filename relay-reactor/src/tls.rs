//! TLS config construction, wrapped with `async-tls` rather than
//! `tokio-rustls` so the resulting stream stays a plain
//! `futures::io::{AsyncRead,AsyncWrite}` like the rest of the `smol`-based
//! pipeline, instead of pulling in a second async runtime.

use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use rustls::{
    Certificate, ClientConfig, NoClientAuth, PrivateKey, RootCertStore, ServerCertVerified,
    ServerCertVerifier, ServerConfig, TLSError,
};
use webpki::DNSNameRef;

struct NoCertVerifier;

impl ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _roots: &RootCertStore,
        _presented_certs: &[Certificate],
        _dns_name: DNSNameRef,
        _ocsp_response: &[u8],
    ) -> Result<ServerCertVerified, TLSError> {
        Ok(ServerCertVerified::assertion())
    }
}

/// A client config that accepts any server certificate. Until a trusted
/// root store is wired in, this is the only client config relay can offer;
/// callers that need real verification should build their own
/// `rustls::ClientConfig` and skip this helper.
pub fn insecure_client_config() -> ClientConfig {
    let mut cfg = ClientConfig::new();
    cfg.dangerous()
        .set_certificate_verifier(Arc::new(NoCertVerifier));
    cfg
}

pub fn load_server_config(cert_path: &Path, key_path: &Path) -> anyhow::Result<ServerConfig> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .map_err(|_| anyhow::anyhow!("failed to parse certificate file {}", cert_path.display()))?
        .into_iter()
        .map(Certificate)
        .collect::<Vec<_>>();
    anyhow::ensure!(!certs.is_empty(), "certificate file {} has no certificates", cert_path.display());

    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(File::open(key_path)?))
        .map_err(|_| anyhow::anyhow!("failed to parse key file {}", key_path.display()))?;
    anyhow::ensure!(
        keys.len() == 1,
        "key file {} must contain exactly one key, found {}",
        key_path.display(),
        keys.len()
    );
    let key = PrivateKey(keys.remove(0));

    let mut cfg = ServerConfig::new(NoClientAuth::new());
    cfg.set_single_cert(certs, key)
        .map_err(|e| anyhow::anyhow!("setting certificate/key: {}", e))?;
    Ok(cfg)
}

pub fn connector(cfg: ClientConfig) -> async_tls::TlsConnector {
    async_tls::TlsConnector::from(Arc::new(cfg))
}

pub fn acceptor(cfg: ServerConfig) -> async_tls::TlsAcceptor {
    async_tls::TlsAcceptor::from(Arc::new(cfg))
}
