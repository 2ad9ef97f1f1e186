//! Short-lived URLs for stored objects, handed to the inference backends.

use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};

use crate::config::StorageConfig;

pub trait UrlResolver: Send + Sync {
    /// A URL a remote backend can fetch `key` from.
    fn resolve(&self, key: &str) -> Result<String>;
}

/// Signs `{base}/{key}?expires={unix}&signature={hex}` where the signature is
/// `sha256("{secret}:{key}:{expires}")`. Without a secret it hands out the
/// plain public URL.
pub struct SignedUrlResolver {
    base_url: String,
    secret: Option<String>,
    ttl: Duration,
}

impl SignedUrlResolver {
    pub fn new(base_url: &str, secret: Option<&str>, ttl: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.filter(|s| !s.is_empty()).map(str::to_string),
            ttl,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        if config.signing_secret.is_none() {
            tracing::warn!("No storage signing secret configured, backends get unsigned URLs");
        }
        Self::new(
            &config.public_base_url,
            config.signing_secret.as_deref(),
            Duration::seconds(config.url_ttl_secs as i64),
        )
    }

    fn signature(secret: &str, key: &str, expires: i64) -> String {
        let digest = Sha256::digest(format!("{}:{}:{}", secret, key, expires).as_bytes());
        format!("{:x}", digest)
    }
}

impl UrlResolver for SignedUrlResolver {
    fn resolve(&self, key: &str) -> Result<String> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            bail!("Cannot resolve an empty object key");
        }
        let url = format!("{}/{}", self.base_url, key);

        match self.secret {
            Some(ref secret) => {
                let expires = (Utc::now() + self.ttl).timestamp();
                let signature = Self::signature(secret, key, expires);
                Ok(format!("{}?expires={}&signature={}", url, expires, signature))
            }
            None => Ok(url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_param<'a>(url: &'a str, name: &str) -> &'a str {
        let query = url.split_once('?').unwrap().1;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix(&format!("{}=", name)))
            .unwrap()
    }

    #[test]
    fn test_signed_url_carries_signature() {
        let resolver = SignedUrlResolver::new("https://cdn.example/photos/", Some("s3cret"), Duration::hours(1));
        let url = resolver.resolve("proj/1/thumb.webp").unwrap();
        assert!(url.starts_with("https://cdn.example/photos/proj/1/thumb.webp?expires="));

        let expires: i64 = query_param(&url, "expires").parse().unwrap();
        let signature = query_param(&url, "signature");
        assert_eq!(signature.len(), 64);
        assert_eq!(signature, SignedUrlResolver::signature("s3cret", "proj/1/thumb.webp", expires));
        assert_ne!(signature, SignedUrlResolver::signature("s3cret", "proj/1/other.webp", expires));
        assert!(expires > Utc::now().timestamp());
    }

    #[test]
    fn test_expiry_follows_ttl() {
        let resolver = SignedUrlResolver::new("https://cdn", Some("k"), Duration::minutes(5));
        let before = Utc::now().timestamp();
        let url = resolver.resolve("a.webp").unwrap();
        let expires: i64 = query_param(&url, "expires").parse().unwrap();
        assert!(expires >= before + 300 && expires <= Utc::now().timestamp() + 300);
    }

    #[test]
    fn test_unsigned_without_secret() {
        let resolver = SignedUrlResolver::new("https://cdn", Some(""), Duration::hours(1));
        assert_eq!(resolver.resolve("/a.webp").unwrap(), "https://cdn/a.webp");
        assert!(resolver.resolve("").is_err());
    }
}
