use std::sync::Once;

static PROVIDER: Once = Once::new();

/// Installs the process-wide rustls crypto provider. Safe to call from every
/// client construction site; only the first call has an effect.
pub fn ensure_rustls_provider() {
    PROVIDER.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_install_is_idempotent() {
        ensure_rustls_provider();
        ensure_rustls_provider();
    }
}
