//! Response header policy for the forum's web surface.
//!
//! Nothing here serves HTTP; the `headers` subcommand prints the computed set so deployments
//! can diff it against what the proxy actually sends.

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS,
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, CONTENT_SECURITY_POLICY, REFERRER_POLICY, STRICT_TRANSPORT_SECURITY,
    X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use url::Url;

use crate::config::SecurityConfig;

const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");
const EXPECT_CT: HeaderName = HeaderName::from_static("expect-ct");
const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");

const SCRIPT_SRC: &str = "script-src 'self' 'unsafe-inline' 'unsafe-eval' https://www.googletagmanager.com https://static.cloudflareinsights.com";
const SCRIPT_SRC_PRODUCTION: &str = "script-src 'self' 'unsafe-inline' 'unsafe-eval' https://www.googletagmanager.com https://js.stripe.com https://checkout.stripe.com https://static.cloudflareinsights.com";
const CONNECT_SRC: &str = "connect-src 'self' https://api.openai.com https://*.openai.com https://api.igdb.com https://api.rawg.io https://api.stripe.com https://checkout.stripe.com https://www.google-analytics.com https://www.googletagmanager.com https://cloudflareinsights.com https://*.cloudflareinsights.com https://*.herokuapp.com wss: ws:";

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS, PATCH";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization, X-Requested-With, Cookie";

const IMAGE_HOSTS: [&str; 2] = ["ik.imagekit.io", "res.cloudinary.com"];
const IMAGE_HOST_SUFFIX: &str = ".amazonaws.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityProfile {
    pub production: bool,
    pub allowed_origins: Vec<String>,
}

impl From<&SecurityConfig> for SecurityProfile {
    fn from(cfg: &SecurityConfig) -> Self {
        let allowed_origins = if cfg.allowed_origins.is_empty() {
            vec![cfg.app_url.clone()]
        } else {
            cfg.allowed_origins.clone()
        };
        Self {
            production: cfg.production,
            allowed_origins,
        }
    }
}

pub fn content_security_policy(profile: &SecurityProfile) -> String {
    let mut directives = vec![
        "default-src 'self'",
        if profile.production {
            SCRIPT_SRC_PRODUCTION
        } else {
            SCRIPT_SRC
        },
        "style-src 'self' 'unsafe-inline' https://fonts.googleapis.com",
        "font-src 'self' https://fonts.gstatic.com data:",
        "img-src 'self' data: blob: https:",
        CONNECT_SRC,
        "media-src 'self' blob:",
        "object-src 'none'",
        "base-uri 'self'",
        "form-action 'self'",
        "frame-ancestors 'none'",
    ];
    if profile.production {
        directives.push("upgrade-insecure-requests");
    }
    directives.join("; ")
}

pub fn security_headers(profile: &SecurityProfile) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    headers.insert(
        REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        PERMISSIONS_POLICY,
        HeaderValue::from_static(
            "camera=(), microphone=(), geolocation=(), interest-cohort=(), payment=(), usb=()",
        ),
    );
    if profile.production {
        headers.insert(
            STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
        );
    }
    if let Ok(csp) = HeaderValue::from_str(&content_security_policy(profile)) {
        headers.insert(CONTENT_SECURITY_POLICY, csp);
    }
    if profile.production {
        headers.insert(EXPECT_CT, HeaderValue::from_static("max-age=86400, enforce"));
    }
    headers
}

/// CORS headers for a request to `path`. Empty outside `/api/`.
pub fn cors_headers(profile: &SecurityProfile, path: &str, origin: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if !path.starts_with("/api/") {
        return headers;
    }

    headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));

    let allow_origin = if profile.production {
        origin.filter(|origin| profile.allowed_origins.iter().any(|allowed| allowed == origin))
    } else {
        Some(origin.unwrap_or("*"))
    };
    if let Some(value) = allow_origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }

    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    headers
}

/// Writes the full header set into `headers`, overwriting existing values.
pub fn apply_security_headers(
    profile: &SecurityProfile,
    path: &str,
    origin: Option<&str>,
    headers: &mut HeaderMap,
) {
    for (name, value) in security_headers(profile)
        .into_iter()
        .chain(cors_headers(profile, path, origin))
    {
        if let Some(name) = name {
            headers.insert(name, value);
        }
    }
    headers.insert(X_POWERED_BY, HeaderValue::from_static(""));
}

/// Whether a remote image URL points at one of the upload CDNs.
pub fn is_allowed_image_host(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if url.scheme() != "https" {
        return false;
    }
    match url.host_str() {
        Some(host) => {
            IMAGE_HOSTS.contains(&host)
                || (host.ends_with(IMAGE_HOST_SUFFIX) && host.len() > IMAGE_HOST_SUFFIX.len())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev() -> SecurityProfile {
        SecurityProfile::from(&SecurityConfig::default())
    }

    fn prod() -> SecurityProfile {
        SecurityProfile {
            production: true,
            ..dev()
        }
    }

    #[test]
    fn development_headers_skip_transport_rules() {
        let headers = security_headers(&dev());
        assert_eq!(headers[X_FRAME_OPTIONS], "DENY");
        assert_eq!(headers[X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert!(headers.get(STRICT_TRANSPORT_SECURITY).is_none());
        assert!(headers.get("expect-ct").is_none());

        let csp = content_security_policy(&dev());
        assert!(csp.starts_with("default-src 'self'; script-src"));
        assert!(csp.ends_with("frame-ancestors 'none'"));
        assert!(!csp.contains("js.stripe.com"));
    }

    #[test]
    fn production_adds_hsts_and_stripe() {
        let headers = security_headers(&prod());
        assert_eq!(
            headers[STRICT_TRANSPORT_SECURITY],
            "max-age=31536000; includeSubDomains; preload"
        );
        assert_eq!(headers["expect-ct"], "max-age=86400, enforce");
        let csp = headers[CONTENT_SECURITY_POLICY].to_str().unwrap();
        assert!(csp.contains("https://js.stripe.com"));
        assert!(csp.ends_with("; upgrade-insecure-requests"));
    }

    #[test]
    fn cors_only_for_api_paths() {
        assert!(cors_headers(&dev(), "/forum/abc", Some("http://localhost:3000")).is_empty());

        let headers = cors_headers(&dev(), "/api/getForumTopic", None);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[ACCESS_CONTROL_MAX_AGE], "86400");

        let echoed = cors_headers(&dev(), "/api/x", Some("http://localhost:3000"));
        assert_eq!(echoed[ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");
    }

    #[test]
    fn production_cors_checks_allow_list() {
        let profile = prod();
        let allowed = cors_headers(
            &profile,
            "/api/x",
            Some("https://assistant.videogamewingman.com/"),
        );
        assert_eq!(
            allowed[ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://assistant.videogamewingman.com/"
        );

        let denied = cors_headers(&profile, "/api/x", Some("https://evil.example"));
        assert!(denied.get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert!(denied.get(ACCESS_CONTROL_ALLOW_METHODS).is_some());

        assert!(cors_headers(&profile, "/api/x", None)
            .get(ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[test]
    fn apply_blanks_powered_by() {
        let mut headers = HeaderMap::new();
        headers.insert(X_POWERED_BY, HeaderValue::from_static("Next.js"));
        headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
        apply_security_headers(&dev(), "/api/x", None, &mut headers);
        assert_eq!(headers["x-powered-by"], "");
        assert_eq!(headers[X_FRAME_OPTIONS], "DENY");
        assert!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).is_some());
    }

    #[test]
    fn image_hosts() {
        assert!(is_allowed_image_host("https://ik.imagekit.io/abc/1.png"));
        assert!(is_allowed_image_host("https://res.cloudinary.com/x.jpg"));
        assert!(is_allowed_image_host("https://bucket.s3.us-east-1.amazonaws.com/k.png"));
        assert!(!is_allowed_image_host("http://ik.imagekit.io/abc/1.png"));
        assert!(!is_allowed_image_host("https://evil.example/x.png"));
        assert!(!is_allowed_image_host("https://notamazonaws.com/x.png"));
        assert!(!is_allowed_image_host("not a url"));
    }
}
