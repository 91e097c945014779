use serde::Serialize;

/// TLS connection metadata extracted after handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TlsMetadata {
    /// TLS protocol version (e.g., "TLSv1.3")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Cipher suite used (e.g., `TLS13_AES_256_GCM_SHA384`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
    /// Certificate subject DN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_subject: Option<String>,
    /// Certificate issuer DN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_issuer: Option<String>,
    /// Days until certificate expiration (negative if expired)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_expiry_days: Option<i64>,
}
