//! SCRAM-SHA-256 authentication (RFC 5802 / RFC 7677).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// The only SASL mechanism this client speaks.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// SCRAM-SHA-256 client exchange state.
pub struct ScramClient {
    username: String,
    password: String,
    client_nonce: String,
    auth_message: Option<String>,
    salted_password: Option<[u8; 32]>,
}

impl ScramClient {
    /// Create a new SCRAM client with a random nonce.
    pub fn new(username: &str, password: &str) -> Self {
        let nonce_bytes: [u8; 18] = rand::thread_rng().gen();
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_nonce: BASE64.encode(nonce_bytes),
            auth_message: None,
            salted_password: None,
        }
    }

    /// Generate the client-first-message: `n,,n=<username>,r=<client-nonce>`.
    pub fn client_first_message(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare()).into_bytes()
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", self.username, self.client_nonce)
    }

    /// Process the server-first-message (`r=<nonce>,s=<salt>,i=<iterations>`)
    /// and produce the client-final-message.
    pub fn process_server_first(&mut self, server_msg: &[u8]) -> Result<Vec<u8>> {
        let server_str = std::str::from_utf8(server_msg)
            .map_err(|_| Error::Auth("SCRAM: server message is not UTF-8".into()))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_str.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value.to_string());
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(value)
                        .map_err(|_| Error::Auth("SCRAM: invalid salt encoding".into()))?,
                );
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| Error::Auth("SCRAM: invalid iteration count".into()))?,
                );
            }
        }

        let combined_nonce = nonce.ok_or_else(|| Error::Auth("SCRAM: missing nonce".into()))?;
        let salt = salt.ok_or_else(|| Error::Auth("SCRAM: missing salt".into()))?;
        let iterations =
            iterations.ok_or_else(|| Error::Auth("SCRAM: missing iterations".into()))?;

        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(Error::Auth("SCRAM: server nonce mismatch".into()));
        }

        let salted_password = hi(&self.password, &salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);

        let client_final_without_proof = format!("c=biws,r={}", combined_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_str,
            client_final_without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let mut client_proof = [0u8; 32];
        for i in 0..32 {
            client_proof[i] = client_key[i] ^ client_signature[i];
        }

        self.auth_message = Some(auth_message);
        self.salted_password = Some(salted_password);

        let client_final = format!(
            "{},p={}",
            client_final_without_proof,
            BASE64.encode(client_proof)
        );
        Ok(client_final.into_bytes())
    }

    /// Verify the server-final-message (`v=<verifier>`).
    pub fn verify_server_final(&self, server_msg: &[u8]) -> Result<()> {
        let server_str = std::str::from_utf8(server_msg)
            .map_err(|_| Error::Auth("SCRAM: server message is not UTF-8".into()))?;

        let verifier_b64 = server_str
            .strip_prefix("v=")
            .ok_or_else(|| Error::Auth("SCRAM: missing server signature".into()))?;
        let server_signature = BASE64
            .decode(verifier_b64)
            .map_err(|_| Error::Auth("SCRAM: invalid server signature encoding".into()))?;

        let salted_password = self
            .salted_password
            .ok_or_else(|| Error::Auth("SCRAM: exchange out of order".into()))?;
        let auth_message = self
            .auth_message
            .as_ref()
            .ok_or_else(|| Error::Auth("SCRAM: exchange out of order".into()))?;

        let server_key = hmac_sha256(&salted_password, b"Server Key");
        let expected = hmac_sha256(&server_key, auth_message.as_bytes());

        if server_signature != expected {
            return Err(Error::Auth(
                "SCRAM: server signature verification failed".into(),
            ));
        }
        Ok(())
    }
}

/// Hi() - PBKDF2 with HMAC-SHA-256.
fn hi(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut output = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut output)
        .expect("valid output length");
    output
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scram_exchange_shape() {
        let mut client = ScramClient::new("user", "pencil");

        let first = String::from_utf8(client.client_first_message()).unwrap();
        assert!(first.starts_with("n,,n=user,r="));

        let client_nonce = first.strip_prefix("n,,n=user,r=").unwrap();
        let server_first = format!(
            "r={}srvnonce,s={},i=4096",
            client_nonce,
            BASE64.encode(b"salt1234salt1234")
        );

        let final_msg =
            String::from_utf8(client.process_server_first(server_first.as_bytes()).unwrap())
                .unwrap();
        assert!(final_msg.starts_with("c=biws,r="));
        assert!(final_msg.contains(",p="));
    }

    #[test]
    fn test_scram_rejects_foreign_nonce() {
        let mut client = ScramClient::new("user", "pencil");
        let server_first = format!("r=notournonce,s={},i=4096", BASE64.encode(b"salt"));
        assert!(client.process_server_first(server_first.as_bytes()).is_err());
    }

    #[test]
    fn test_scram_rejects_bad_server_signature() {
        let mut client = ScramClient::new("user", "pencil");
        let first = String::from_utf8(client.client_first_message()).unwrap();
        let client_nonce = first.strip_prefix("n,,n=user,r=").unwrap().to_string();
        let server_first = format!("r={}x,s={},i=4096", client_nonce, BASE64.encode(b"salt"));
        client.process_server_first(server_first.as_bytes()).unwrap();

        let bogus = format!("v={}", BASE64.encode([0u8; 32]));
        assert!(client.verify_server_final(bogus.as_bytes()).is_err());
    }
}
