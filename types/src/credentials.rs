//! [`Credentials`]: the secret bundle loaded from the encrypted
//! `secrets.enc` file (§3, §6, §9 "Secrets at rest").

use serde::{Deserialize, Serialize};
use std::fmt;

/// `apiKey`/`apiSecret` authenticate the agent to the control plane (§4.5);
/// `sharedSecret` signs/verifies terminal bridge frames (§4.3, §6).
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub shared_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("shared_secret", &"<redacted>")
            .finish()
    }
}

/// An elevated credential presented alongside an OPERATOR-sourced
/// `RESET_SAFETY` command (§4.2 "Latch semantics").
#[derive(Clone, Serialize, Deserialize)]
pub struct ElevatedCredential(pub String);

impl fmt::Debug for ElevatedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElevatedCredential(<redacted>)")
    }
}
