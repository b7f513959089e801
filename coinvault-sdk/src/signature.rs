//! Integrity signature for partner exchange requests.
//!
//! The partner API authenticates a request with
//!
//! ```text
//! sign = hex(SHA1(canonical_query))
//! ```
//!
//! where `canonical_query` is every request parameter plus the shared
//! `secret`, sorted by key and url-encoded as `k=v&k=v`. The secret itself
//! is never transmitted; only `sign` travels with the request.

/// Query parameter carrying the shared secret while signing.
pub const SECRET_PARAM: &str = "secret";

/// Query parameter carrying the hex signature.
pub const SIGN_PARAM: &str = "sign";

/// Errors produced by signature verification.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("missing `sign` parameter")]
    MissingSignature,
    #[error("invalid signature")]
    SignatureMismatch,
}

/// Build the canonical query string: keys sorted, values url-encoded.
pub fn canonical_query(params: &[(&str, String)]) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
        .into_iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercase hex SHA-1 digest.
pub fn sha1_hex(data: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, data);
    hex::encode(digest.as_ref())
}

fn compute_sign(params: &[(&str, String)], secret: &str) -> String {
    let mut signing: Vec<(&str, String)> = params.to_vec();
    signing.push((SECRET_PARAM, secret.to_owned()));
    sha1_hex(canonical_query(&signing).as_bytes())
}

/// Append the `sign` parameter to `params`.
///
/// The returned list never contains the secret.
pub fn sign_params(
    mut params: Vec<(&'static str, String)>,
    secret: &str,
) -> Vec<(&'static str, String)> {
    params.retain(|(k, _)| *k != SECRET_PARAM && *k != SIGN_PARAM);
    let sign = compute_sign(&params, secret);
    params.push((SIGN_PARAM, sign));
    params
}

/// Verify a parameter list produced by [`sign_params`].
pub fn verify_params(params: &[(&str, String)], secret: &str) -> Result<(), SignatureError> {
    let sign = params
        .iter()
        .find(|(k, _)| *k == SIGN_PARAM)
        .map(|(_, v)| v.as_str())
        .ok_or(SignatureError::MissingSignature)?;
    let unsigned: Vec<(&str, String)> = params
        .iter()
        .filter(|(k, _)| *k != SIGN_PARAM)
        .cloned()
        .collect();
    if compute_sign(&unsigned, secret) != sign {
        return Err(SignatureError::SignatureMismatch);
    }
    Ok(())
}
