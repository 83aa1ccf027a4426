use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngExt;
use sha2::{Digest, Sha256};

pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
}

/// `n` random bytes from the thread-local CSPRNG, base64url without padding.
pub fn random_urlsafe(n: usize) -> String {
    let mut buf = vec![0u8; n];
    rand::rng().fill(&mut buf[..]);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Fresh anti-forgery `state` value: 256 bits.
pub fn generate_state() -> String {
    random_urlsafe(32)
}

pub fn generate_pkce() -> PkceChallenge {
    let code_verifier = random_urlsafe(32);
    let code_challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()));

    PkceChallenge {
        code_verifier,
        code_challenge,
    }
}
