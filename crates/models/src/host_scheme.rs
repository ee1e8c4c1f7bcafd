use crate::{CustomerId, HostSchemeId};

/// Expiration value meaning "no SSL expiration known".
pub const UNKNOWN_SSL_EXPIRATION: u64 = 0;

/// The (scheme, authority) origin shared by all monitors on one site for one
/// customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostScheme {
    pub id: HostSchemeId,
    pub customer_id: CustomerId,
    /// Always `scheme://authority` with no path, query or fragment.
    pub url: url::Url,
    /// Unix seconds; [`UNKNOWN_SSL_EXPIRATION`] when never probed.
    pub ssl_expiration_timestamp: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostSchemeUrlError {
    #[error("invalid scheme")]
    InvalidScheme,
    #[error("url can-not have path, query, or fragment")]
    ExtraComponents,
    #[error("user authentication is not supported")]
    UserInfo,
    #[error("invalid URL: {0}")]
    Unparseable(String),
}

impl HostScheme {
    /// Parses and validates a host/scheme URL: one of the supported schemes,
    /// an authority, and nothing else.
    pub fn parse_url(value: &str) -> Result<url::Url, HostSchemeUrlError> {
        let url = url::Url::parse(value)
            .map_err(|err| HostSchemeUrlError::Unparseable(err.to_string()))?;

        if !matches!(url.scheme(), "http" | "https" | "ftp" | "sftp") {
            return Err(HostSchemeUrlError::InvalidScheme);
        }
        if url.host_str().unwrap_or("").is_empty() {
            return Err(HostSchemeUrlError::Unparseable("missing host".to_string()));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(HostSchemeUrlError::UserInfo);
        }
        if !matches!(url.path(), "" | "/") || url.query().is_some() || url.fragment().is_some() {
            return Err(HostSchemeUrlError::ExtraComponents);
        }

        Ok(url)
    }

    /// `scheme://authority` without the trailing slash `url::Url` renders.
    pub fn url_str(&self) -> String {
        let rendered = self.url.as_str();
        rendered.strip_suffix('/').unwrap_or(rendered).to_string()
    }

    /// Case-folded (scheme, authority) key used to match submitted entries
    /// against existing rows.
    pub fn origin_key(url: &url::Url) -> (String, String) {
        (
            url.scheme().to_ascii_lowercase(),
            url.authority().to_ascii_lowercase(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_bare_origins() {
        for ok in [
            "https://a.example",
            "http://a.example:8080",
            "ftp://files.example",
            "sftp://files.example",
            "https://a.example/",
        ] {
            assert!(HostScheme::parse_url(ok).is_ok(), "{ok}");
        }
    }

    #[test]
    fn rejects_non_origin_urls() {
        assert_eq!(
            HostScheme::parse_url("gopher://a.example"),
            Err(HostSchemeUrlError::InvalidScheme)
        );
        assert_eq!(
            HostScheme::parse_url("https://a.example/path"),
            Err(HostSchemeUrlError::ExtraComponents)
        );
        assert_eq!(
            HostScheme::parse_url("https://a.example?q=1"),
            Err(HostSchemeUrlError::ExtraComponents)
        );
        assert_eq!(
            HostScheme::parse_url("https://a.example#frag"),
            Err(HostSchemeUrlError::ExtraComponents)
        );
        assert_eq!(
            HostScheme::parse_url("https://user@a.example"),
            Err(HostSchemeUrlError::UserInfo)
        );
        assert!(HostScheme::parse_url("not a url").is_err());
    }

    #[test]
    fn origin_key_is_case_folded() {
        let a = HostScheme::parse_url("HTTPS://A.Example").unwrap();
        let b = HostScheme::parse_url("https://a.example").unwrap();
        assert_eq!(HostScheme::origin_key(&a), HostScheme::origin_key(&b));
    }

    #[test]
    fn url_str_drops_trailing_slash() {
        let hs = HostScheme {
            id: HostSchemeId::new(1),
            customer_id: CustomerId::new(1),
            url: HostScheme::parse_url("https://a.example").unwrap(),
            ssl_expiration_timestamp: UNKNOWN_SSL_EXPIRATION,
        };
        assert_eq!(hs.url_str(), "https://a.example");
    }
}
