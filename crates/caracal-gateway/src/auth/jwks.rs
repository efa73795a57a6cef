use anyhow::{Context, Result};
use jsonwebtoken::DecodingKey;
use moka::sync::Cache;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
struct Jwk {
    kid: String,
    kty: String,
    alg: Option<String>,
    n: Option<String>,
    e: Option<String>,
    // EC (ES256) fields
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Clone)]
pub struct JwksProvider {
    cache: Cache<String, Arc<DecodingKey>>, // map kid -> key
    client: Client,
    jwks_uri: Url,
}

impl JwksProvider {
    pub fn new(jwks_uri: Url) -> Result<Self> {
        Self::validate_uri(&jwks_uri)?;

        Ok(Self {
            // Cap max keys to bound memory; an hour TTL keeps rotated keys from
            // sticking around past a reasonable rotation window.
            cache: Cache::builder()
                .max_capacity(100)
                .time_to_live(Duration::from_secs(3600))
                .build(),
            client: Client::builder()
                .timeout(Duration::from_secs(5))
                .user_agent("caracal-gateway/0.1")
                .redirect(reqwest::redirect::Policy::none())
                .build()?,
            jwks_uri,
        })
    }

    /// Rejects a JWKS URI that resolves to a loopback/private/link-local
    /// address, so a compromised config can't turn key refresh into an SSRF
    /// probe of internal network space.
    fn validate_uri(uri: &Url) -> Result<()> {
        if let Some(host) = uri.host() {
            match host {
                url::Host::Ipv4(addr) => {
                    if Self::is_unsafe_ip(&std::net::IpAddr::V4(addr)) {
                        anyhow::bail!("Use of unsafe IP address in JWKS URI: {}", addr);
                    }
                }
                url::Host::Ipv6(addr) => {
                    if Self::is_unsafe_ip(&std::net::IpAddr::V6(addr)) {
                        anyhow::bail!("Use of unsafe IP address in JWKS URI: {}", addr);
                    }
                }
                url::Host::Domain(_) => {}
            }
        }
        Ok(())
    }

    fn is_unsafe_ip(ip: &std::net::IpAddr) -> bool {
        match ip {
            std::net::IpAddr::V4(addr) => {
                let octets = addr.octets();
                addr.is_loopback() || addr.is_link_local() || addr.is_multicast() || addr.is_unspecified() ||
                // Private Ranges (manual chk for stable rust)
                (octets[0] == 10) ||
                (octets[0] == 192 && octets[1] == 168) ||
                (octets[0] == 172 && octets[1] >= 16 && octets[1] <= 31)
            }
            std::net::IpAddr::V6(addr) => {
                // An IPv4-mapped literal (`::ffff:a.b.c.d`) carries an IPv4
                // address through an IPv6 host field; unwrap it and recheck
                // under the IPv4 rules rather than letting it skirt them.
                if let Some(mapped) = addr.to_ipv4_mapped() {
                    return Self::is_unsafe_ip(&std::net::IpAddr::V4(mapped));
                }
                addr.is_loopback()
                    || addr.is_multicast()
                    || addr.is_unspecified()
                    || ((addr.segments()[0] & 0xfe00) == 0xfc00) // Unique Local (fc00::/7)
            }
        }
    }

    pub async fn get_key(&self, kid: &str) -> Result<Arc<DecodingKey>> {
        if let Some(key) = self.cache.get(kid) {
            return Ok(key);
        }

        self.refresh().await?;

        self.cache
            .get(kid)
            .ok_or_else(|| anyhow::anyhow!("Public key not found for kid: {}", kid))
    }

    async fn refresh(&self) -> Result<()> {
        tracing::info!(event = "jwks_refresh", uri = %self.jwks_uri);
        let resp = self.client.get(self.jwks_uri.clone()).send().await?;

        if let Some(len) = resp.content_length() {
            if len > 512 * 1024 {
                return Err(anyhow::anyhow!("JWKS response too large: {} bytes", len));
            }
        }

        let jwks: JwksResponse = resp.json().await.context("Failed to parse JWKS")?;

        for key in jwks.keys {
            let decoding_key = match key.kty.as_str() {
                "RSA" => match (&key.n, &key.e) {
                    (Some(n), Some(e)) => DecodingKey::from_rsa_components(n, e).ok(),
                    _ => None,
                },
                "EC" => match (&key.x, &key.y) {
                    (Some(x), Some(y)) => DecodingKey::from_ec_components(x, y).ok(),
                    _ => None,
                },
                _ => None,
            };
            if let Some(decoding_key) = decoding_key {
                self.cache.insert(key.kid.clone(), Arc::new(decoding_key));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[test]
    fn ipv4_mapped_loopback_is_unsafe() {
        let mapped = Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0x7f00, 0x0001);
        assert!(JwksProvider::is_unsafe_ip(&IpAddr::V6(mapped)));
    }

    #[test]
    fn ipv4_mapped_public_address_is_safe() {
        let mapped = Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0x0808, 0x0808);
        assert!(!JwksProvider::is_unsafe_ip(&IpAddr::V6(mapped)));
    }

    #[test]
    fn plain_loopback_v4_is_unsafe() {
        assert!(JwksProvider::is_unsafe_ip(&IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
    }

    #[test]
    fn validate_uri_rejects_ipv4_mapped_loopback_host() {
        let uri = Url::parse("https://[::ffff:127.0.0.1]/jwks.json").unwrap();
        assert!(JwksProvider::validate_uri(&uri).is_err());
    }

    #[test]
    fn refresh_parses_both_rsa_and_ec_jwk_shapes() {
        let rsa: Jwk = serde_json::from_str(
            r#"{"kid":"rsa-1","kty":"RSA","n":"AQAB","e":"AQAB"}"#,
        )
        .unwrap();
        assert_eq!(rsa.kty, "RSA");
        assert!(DecodingKey::from_rsa_components(rsa.n.as_ref().unwrap(), rsa.e.as_ref().unwrap()).is_ok());

        let ec: Jwk = serde_json::from_str(
            r#"{"kid":"ec-1","kty":"EC","crv":"P-256","x":"MKBCTNIcKUSDii11ySs3526iDZ8AiTo7Tu6KPAqv7D4","y":"4Etl6SRW2YiLUrN5vfvVHuhp7x8PxltmWWlbbM4IFyM"}"#,
        )
        .unwrap();
        assert_eq!(ec.kty, "EC");
        assert!(DecodingKey::from_ec_components(ec.x.as_ref().unwrap(), ec.y.as_ref().unwrap()).is_ok());
    }
}
