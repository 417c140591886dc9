/// Fingerprinting configuration
#[derive(Debug, Clone)]
pub struct FingerprintConfig {
    /// Header name carrying the JA3 fingerprint
    pub ja3_header: String,
    /// Header name carrying the JA4 fingerprint
    pub ja4_header: String,
    /// Header name carrying the Akamai-style HTTP/2 fingerprint
    pub http2_header: String,
    /// Upper bound on PRIORITY frames recorded per connection.
    /// Excess frames are dropped silently; minimum usable value is 1.
    pub max_priority_frames: usize,
    /// Maximum bytes buffered while observing the HTTP/2 preface
    pub max_capture: usize,
    /// Answer `kube-probe/` requests directly without forwarding
    pub kubernetes_probe: bool,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            ja3_header: "X-JA3-Fingerprint".to_string(),
            ja4_header: "X-JA4-Fingerprint".to_string(),
            http2_header: "X-HTTP2-Fingerprint".to_string(),
            max_priority_frames: 10000,
            max_capture: default_max_capture(),
            kubernetes_probe: true,
        }
    }
}

fn default_max_capture() -> usize {
    64 * 1024
}
