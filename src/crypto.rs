// SPDX-License-Identifier: Apache-2.0

use rustls::crypto::CryptoProvider;
use tower::BoxError;

/// Installs the process-wide rustls provider used by the push client. Safe to call repeatedly.
pub fn init_crypto_provider() -> Result<(), BoxError> {
    if CryptoProvider::get_default().is_none() {
        // A concurrent caller may win the race; that still leaves a usable default.
        if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
            if CryptoProvider::get_default().is_none() {
                return Err(format!("failed to initialize crypto library: {:?}", e).into());
            }
        }
    }
    Ok(())
}
