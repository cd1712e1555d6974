//! TLS is delegated to a platform provider (§6); the core only configures
//! SNI, ALPN and the version/cipher allow-list and hands the socket to
//! `rustls` for the actual handshake.

use std::sync::Arc;

/// The subset of TLS parameters the core configures on every handshake.
/// Everything else (the handshake itself, certificate verification) is the
/// platform provider's concern.
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) min_version: TlsVersion,
    pub(crate) max_version: TlsVersion,
    #[cfg(feature = "rustls-tls")]
    pub(crate) client_config: Arc<rustls::ClientConfig>,
    #[cfg(not(feature = "rustls-tls"))]
    pub(crate) _marker: std::marker::PhantomData<Arc<()>>,
}

impl PartialEq for TlsConfig {
    fn eq(&self, other: &Self) -> bool {
        self.min_version == other.min_version
            && self.max_version == other.max_version
            && self.provider_ptr_eq(other)
    }
}

impl TlsConfig {
    #[cfg(feature = "rustls-tls")]
    fn provider_ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.client_config, &other.client_config)
    }

    #[cfg(not(feature = "rustls-tls"))]
    fn provider_ptr_eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Minimum/maximum negotiable TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

#[cfg(feature = "rustls-tls")]
impl TlsConfig {
    /// Build a default TLS configuration trusting the `webpki-roots` bundle,
    /// matching the teacher's `rustls-tls-webpki-roots` feature.
    pub fn webpki_roots() -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        let config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();
        TlsConfig {
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            client_config: Arc::new(config),
        }
    }

    pub(crate) fn rustls_config_for(&self, alpn: &[Vec<u8>]) -> Arc<rustls::ClientConfig> {
        if alpn.is_empty() {
            return self.client_config.clone();
        }
        let mut cfg = (*self.client_config).clone();
        cfg.alpn_protocols = alpn.to_vec();
        Arc::new(cfg)
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .finish()
    }
}

/// Handshake metadata surfaced on a [`crate::response::Response`] when the
/// connection was secured (§3).
#[derive(Debug, Clone)]
pub struct HandshakeInfo {
    pub protocol: &'static str,
    pub cipher_suite: String,
    pub alpn: Option<String>,
}
