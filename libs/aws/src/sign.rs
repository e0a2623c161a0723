//! SigV4 request signing.
//!
//! Implements the AWS Signature Version 4 scheme in both flavors the
//! clients need: `Authorization`-header signing for direct API calls and
//! query-string presigning for the STS URL embedded in EKS bearer tokens.
//!
//! The canonicalization rules follow the published algorithm exactly:
//! RFC 3986 percent-encoding with uppercase hex, query pairs sorted by
//! encoded key then value, header names lowercased and values trimmed,
//! and the `AWS4-HMAC-SHA256` key derivation chain.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::credentials::Credentials;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SHA256_BLOCK: usize = 64;

/// HMAC-SHA256 per RFC 2104 over the sha2 primitives.
fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut block = [0u8; SHA256_BLOCK];
    if key.len() > SHA256_BLOCK {
        let digest = Sha256::digest(key);
        block[..digest.len()].copy_from_slice(&digest);
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha256::new();
    let mut ipad = [0u8; SHA256_BLOCK];
    for (i, b) in block.iter().enumerate() {
        ipad[i] = b ^ 0x36;
    }
    inner.update(ipad);
    inner.update(data);
    let inner_digest = inner.finalize();

    let mut outer = Sha256::new();
    let mut opad = [0u8; SHA256_BLOCK];
    for (i, b) in block.iter().enumerate() {
        opad[i] = b ^ 0x5c;
    }
    outer.update(opad);
    outer.update(inner_digest);
    outer.finalize().into()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

fn short_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d").to_string()
}

fn credential_scope(now: DateTime<Utc>, region: &str, service: &str) -> String {
    format!("{}/{}/{}/aws4_request", short_date(now), region, service)
}

/// RFC 3986 encode with the unreserved set left intact.
fn uri_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Build the canonical query string: encode, sort, join.
fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercase, trim, and sort headers; collapse runs of spaces in values.
fn canonical_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    let mut canonical: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| {
            let mut squeezed = String::with_capacity(value.len());
            let mut last_space = false;
            for c in value.trim().chars() {
                if c == ' ' {
                    if !last_space {
                        squeezed.push(c);
                    }
                    last_space = true;
                } else {
                    squeezed.push(c);
                    last_space = false;
                }
            }
            (name.to_ascii_lowercase(), squeezed)
        })
        .collect();
    canonical.sort();
    canonical
}

/// Canonical request text plus the semicolon-joined signed-header list.
fn canonical_request(
    method: &str,
    path: &str,
    encoded_query: &str,
    headers: &[(String, String)],
    payload_hash: &str,
) -> (String, String) {
    let canonical = canonical_headers(headers);
    let signed_headers = canonical
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let header_lines = canonical
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect::<String>();

    let path = if path.is_empty() { "/" } else { path };
    let request = format!(
        "{method}\n{path}\n{encoded_query}\n{header_lines}\n{signed_headers}\n{payload_hash}"
    );
    (request, signed_headers)
}

fn string_to_sign(now: DateTime<Utc>, scope: &str, canonical_request: &str) -> String {
    format!(
        "{ALGORITHM}\n{}\n{scope}\n{}",
        amz_date(now),
        sha256_hex(canonical_request.as_bytes())
    )
}

fn signing_key(secret: &str, now: DateTime<Utc>, region: &str, service: &str) -> [u8; 32] {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), short_date(now).as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn compute_signature(
    secret: &str,
    now: DateTime<Utc>,
    region: &str,
    service: &str,
    to_sign: &str,
) -> String {
    let key = signing_key(secret, now, region, service);
    hex::encode(hmac_sha256(&key, to_sign.as_bytes()))
}

/// Sign a request for `Authorization`-header authentication.
///
/// Returns every header the caller must attach: the extras passed in,
/// `x-amz-date`, the session token when present, and `authorization`.
/// The `Host` header is signed but not returned; the HTTP client derives
/// it from the URL.
#[allow(clippy::too_many_arguments)]
pub fn sign_request(
    method: &str,
    host: &str,
    path: &str,
    query: &[(String, String)],
    extra_headers: &[(String, String)],
    payload: &[u8],
    creds: &Credentials,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let mut to_sign_headers: Vec<(String, String)> = extra_headers.to_vec();
    to_sign_headers.push(("host".to_string(), host.to_string()));
    to_sign_headers.push(("x-amz-date".to_string(), amz_date(now)));
    if let Some(token) = &creds.session_token {
        to_sign_headers.push(("x-amz-security-token".to_string(), token.clone()));
    }

    let encoded_query = canonical_query(query);
    let payload_hash = sha256_hex(payload);
    let (request, signed_headers) =
        canonical_request(method, path, &encoded_query, &to_sign_headers, &payload_hash);

    let scope = credential_scope(now, region, service);
    let to_sign = string_to_sign(now, &scope, &request);
    let signature = compute_signature(&creds.secret_access_key, now, region, service, &to_sign);

    let mut out: Vec<(String, String)> = extra_headers.to_vec();
    out.push(("x-amz-date".to_string(), amz_date(now)));
    if let Some(token) = &creds.session_token {
        out.push(("x-amz-security-token".to_string(), token.clone()));
    }
    out.push((
        "authorization".to_string(),
        format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            creds.access_key_id
        ),
    ));
    out
}

/// Presign a GET request, returning the complete URL.
///
/// The signature covers the query string itself (`X-Amz-*` parameters
/// included) plus `host` and any `extra_headers`; whoever later executes
/// the URL must send those headers verbatim.
#[allow(clippy::too_many_arguments)]
pub fn presign_url(
    host: &str,
    path: &str,
    query: &[(String, String)],
    extra_headers: &[(String, String)],
    creds: &Credentials,
    region: &str,
    service: &str,
    expires_secs: u32,
    now: DateTime<Utc>,
) -> String {
    let scope = credential_scope(now, region, service);

    let mut to_sign_headers: Vec<(String, String)> = extra_headers.to_vec();
    to_sign_headers.push(("host".to_string(), host.to_string()));
    let canonical = canonical_headers(&to_sign_headers);
    let signed_headers = canonical
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let mut full_query: Vec<(String, String)> = query.to_vec();
    full_query.push(("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()));
    full_query.push((
        "X-Amz-Credential".to_string(),
        format!("{}/{scope}", creds.access_key_id),
    ));
    full_query.push(("X-Amz-Date".to_string(), amz_date(now)));
    full_query.push(("X-Amz-Expires".to_string(), expires_secs.to_string()));
    full_query.push(("X-Amz-SignedHeaders".to_string(), signed_headers));
    if let Some(token) = &creds.session_token {
        full_query.push(("X-Amz-Security-Token".to_string(), token.clone()));
    }

    let encoded_query = canonical_query(&full_query);
    let payload_hash = sha256_hex(b"");
    let (request, _) =
        canonical_request("GET", path, &encoded_query, &to_sign_headers, &payload_hash);
    let to_sign = string_to_sign(now, &scope, &request);
    let signature = compute_signature(&creds.secret_access_key, now, region, service, &to_sign);

    let path = if path.is_empty() { "/" } else { path };
    format!("https://{host}{path}?{encoded_query}&X-Amz-Signature={signature}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // RFC 4231 test vectors.
    #[test]
    fn hmac_sha256_matches_rfc4231() {
        let mac = hmac_sha256(&[0x0b; 20], b"Hi There");
        assert_eq!(
            hex::encode(mac),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
        );

        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    fn vector_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap()
    }

    // The ListUsers example from the AWS SigV4 documentation.
    #[test]
    fn reproduces_the_published_sigv4_vector() {
        let now = vector_time();
        let query = vec![
            ("Action".to_string(), "ListUsers".to_string()),
            ("Version".to_string(), "2010-05-08".to_string()),
        ];
        let headers = vec![
            (
                "content-type".to_string(),
                "application/x-www-form-urlencoded; charset=utf-8".to_string(),
            ),
            ("host".to_string(), "iam.amazonaws.com".to_string()),
            ("x-amz-date".to_string(), amz_date(now)),
        ];

        let encoded_query = canonical_query(&query);
        assert_eq!(encoded_query, "Action=ListUsers&Version=2010-05-08");

        let (request, signed) =
            canonical_request("GET", "/", &encoded_query, &headers, &sha256_hex(b""));
        assert_eq!(signed, "content-type;host;x-amz-date");
        assert_eq!(
            sha256_hex(request.as_bytes()),
            "f536975d06c0309214f805bb90ccff089219ecd68b2577efef23edd43b7e1a59"
        );

        let scope = credential_scope(now, "us-east-1", "iam");
        assert_eq!(scope, "20150830/us-east-1/iam/aws4_request");

        let to_sign = string_to_sign(now, &scope, &request);
        let signature = compute_signature(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            now,
            "us-east-1",
            "iam",
            &to_sign,
        );
        assert_eq!(
            signature,
            "5d672d79c15b13162d9279b0855cfba6789a8edb4c82c400e06b5924a6f2b5d7"
        );
    }

    #[test]
    fn sign_request_emits_date_token_and_authorization() {
        let creds = Credentials::new("AKID", "secret", Some("session".to_string()));
        let headers = sign_request(
            "POST",
            "ec2.us-east-1.amazonaws.com",
            "/",
            &[],
            &[("content-type".to_string(), "application/x-www-form-urlencoded".to_string())],
            b"Action=DescribeInstances",
            &creds,
            "us-east-1",
            "ec2",
            vector_time(),
        );

        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "content-type",
                "x-amz-date",
                "x-amz-security-token",
                "authorization"
            ]
        );

        let auth = &headers.last().unwrap().1;
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKID/20150830/us-east-1/ec2/aws4_request"));
        assert!(auth.contains(
            "SignedHeaders=content-type;host;x-amz-date;x-amz-security-token"
        ));
        assert!(auth.contains("Signature="));
    }

    #[test]
    fn presigned_url_carries_the_signing_parameters() {
        let creds = Credentials::new("AKID", "secret", None);
        let url = presign_url(
            "sts.us-west-2.amazonaws.com",
            "/",
            &[
                ("Action".to_string(), "GetCallerIdentity".to_string()),
                ("Version".to_string(), "2011-06-15".to_string()),
            ],
            &[("x-k8s-aws-id".to_string(), "demo".to_string())],
            &creds,
            "us-west-2",
            "sts",
            60,
            vector_time(),
        );

        assert!(url.starts_with("https://sts.us-west-2.amazonaws.com/?"));
        assert!(url.contains("Action=GetCallerIdentity"));
        assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Credential=AKID%2F20150830%2Fus-west-2%2Fsts%2Faws4_request"));
        assert!(url.contains("X-Amz-Expires=60"));
        assert!(url.contains("X-Amz-SignedHeaders=host%3Bx-k8s-aws-id"));

        let signature = url.split("X-Amz-Signature=").nth(1).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
