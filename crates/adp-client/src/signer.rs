//! TC3-HMAC-SHA256 request signing for the vendor REST API.
//!
//! The scheme is exact-match at the HTTP layer: any deviation in the
//! canonical request or the key-derivation ladder shows up as an
//! authentication failure upstream, not here.

use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const SERVICE: &str = "lke";
pub const HOST: &str = "lke.tencentcloudapi.com";
pub const REGION: &str = "ap-guangzhou";
pub const API_VERSION: &str = "2023-11-30";

const ALGORITHM: &str = "TC3-HMAC-SHA256";
const CONTENT_TYPE: &str = "application/json";
const SIGNED_HEADERS: &str = "content-type;host;x-tc-action";
const SCOPE_SUFFIX: &str = "tc3_request";

/// Signs vendor API requests. Pure and deterministic.
#[derive(Debug, Clone)]
pub struct Signer {
    secret_id: String,
    secret_key: String,
}

impl Signer {
    pub fn new(secret_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Build the `Authorization` header value for one request.
    ///
    /// `timestamp` is unix seconds and must match the `X-TC-Timestamp`
    /// header sent with the request.
    pub fn authorization(&self, action: &str, body: &[u8], timestamp: i64) -> String {
        let date = utc_date(timestamp);

        let canonical_headers = format!(
            "content-type:{}\nhost:{}\nx-tc-action:{}\n",
            CONTENT_TYPE,
            HOST,
            action.to_lowercase()
        );
        let canonical_request = format!(
            "POST\n/\n\n{}\n{}\n{}",
            canonical_headers,
            SIGNED_HEADERS,
            sha256_hex(body)
        );

        let credential_scope = format!("{}/{}/{}", date, SERVICE, SCOPE_SUFFIX);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            timestamp,
            credential_scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let signature = self.sign(&date, &string_to_sign);

        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.secret_id, credential_scope, SIGNED_HEADERS, signature
        )
    }

    /// The TC3 key-derivation ladder: date -> service -> scope suffix.
    fn sign(&self, date: &str, string_to_sign: &str) -> String {
        let k_date = hmac_sha256(format!("TC3{}", self.secret_key).as_bytes(), date.as_bytes());
        let k_service = hmac_sha256(&k_date, SERVICE.as_bytes());
        let k_signing = hmac_sha256(&k_service, SCOPE_SUFFIX.as_bytes());
        hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()))
    }
}

fn utc_date(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference vector computed independently from the vendor's
    // documented TC3 algorithm.
    const SECRET_ID: &str = "AKIDexample";
    const SECRET_KEY: &str = "examplesecretkey";
    const BODY: &[u8] = br#"{"Type":5,"BotAppKey":"test-bot-key"}"#;
    const TIMESTAMP: i64 = 1_700_000_000;

    #[test]
    fn test_authorization_matches_reference_vector() {
        let signer = Signer::new(SECRET_ID, SECRET_KEY);
        let authorization = signer.authorization("GetWsToken", BODY, TIMESTAMP);
        assert_eq!(
            authorization,
            "TC3-HMAC-SHA256 Credential=AKIDexample/2023-11-14/lke/tc3_request, \
             SignedHeaders=content-type;host;x-tc-action, \
             Signature=470893f348f8c2e021162c0c8b1e5e5c45798931bf00035558f02a46b95cc1f4"
        );
    }

    #[test]
    fn test_deterministic() {
        let signer = Signer::new(SECRET_ID, SECRET_KEY);
        let a = signer.authorization("GetWsToken", BODY, TIMESTAMP);
        let b = signer.authorization("GetWsToken", BODY, TIMESTAMP);
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_depends_on_inputs() {
        let signer = Signer::new(SECRET_ID, SECRET_KEY);
        let base = signer.authorization("GetWsToken", BODY, TIMESTAMP);
        assert_ne!(base, signer.authorization("GetWsToken", b"{}", TIMESTAMP));
        assert_ne!(
            base,
            signer.authorization("GetWsToken", BODY, TIMESTAMP + 1)
        );
        let other = Signer::new(SECRET_ID, "othersecretkey");
        assert_ne!(base, other.authorization("GetWsToken", BODY, TIMESTAMP));
    }

    #[test]
    fn test_date_scope_is_utc() {
        // 2023-11-14T23:59:59Z and 2023-11-15T00:00:01Z fall on
        // different scope dates.
        let signer = Signer::new(SECRET_ID, SECRET_KEY);
        let before = signer.authorization("GetWsToken", BODY, 1_700_006_399);
        let after = signer.authorization("GetWsToken", BODY, 1_700_006_401);
        assert!(before.contains("/2023-11-14/"));
        assert!(after.contains("/2023-11-15/"));
    }
}
