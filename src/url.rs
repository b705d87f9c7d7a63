//! Request URL as seen by the pipeline.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The URL of an incoming request, split the way the pipeline needs it.
///
/// `base_path` is the path of the base URL the host was configured with;
/// `path` is the remainder, relative to it.
///
/// Rendering is idempotent and omits the port when it is absent or equals the
/// scheme's default, so redirect targets compare by exact string equality:
///
/// ```rust
/// use vestibule::Url;
///
/// let url = Url::new("https", "localhost").with_port(443).with_path("/x");
/// assert_eq!(url.to_string(), "https://localhost/x");
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Url {
    pub scheme: String,
    pub host_name: String,
    pub port: Option<u16>,
    pub base_path: String,
    pub path: String,
    pub query: String,
}

impl Url {
    pub fn new(scheme: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host_name: host_name.into(),
            port: None,
            base_path: String::new(),
            path: "/".to_owned(),
            query: String::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn is_secure(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("https")
    }

    /// Default port for the scheme: 80 for http, 443 for https.
    pub fn default_port(&self) -> Option<u16> {
        default_port(&self.scheme)
    }

    /// The explicit port, or the scheme default when none is set.
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.default_port())
    }

    /// `scheme://host[:port]`, without any path.
    pub fn site_base(&self) -> String {
        let mut out = format!("{}://{}", self.scheme, render_host(&self.host_name));
        if let Some(port) = self.port.filter(|p| Some(*p) != self.default_port()) {
            out.push_str(&format!(":{port}"));
        }
        out
    }
}

pub(crate) fn default_port(scheme: &str) -> Option<u16> {
    if scheme.eq_ignore_ascii_case("http") {
        Some(80)
    } else if scheme.eq_ignore_ascii_case("https") {
        Some(443)
    } else {
        None
    }
}

fn render_host(host: &str) -> std::borrow::Cow<'_, str> {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]").into()
    } else {
        host.into()
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.site_base())?;
        if !self.base_path.is_empty() && self.base_path != "/" {
            f.write_str(self.base_path.trim_end_matches('/'))?;
        }
        if self.path.is_empty() {
            f.write_str("/")?;
        } else {
            f.write_str(&self.path)?;
        }
        if !self.query.is_empty() {
            if !self.query.starts_with('?') {
                f.write_str("?")?;
            }
            f.write_str(&self.query)?;
        }
        Ok(())
    }
}

/// Parses an absolute URL. Scheme and host are required.
///
/// The whole path lands in `path`; `base_path` is left empty.
impl FromStr for Url {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = url::Url::parse(s).map_err(|_| Error::InvalidBaseUrl(s.to_owned()))?;
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidBaseUrl(s.to_owned()))?;

        Ok(Self {
            scheme: parsed.scheme().to_owned(),
            host_name: host.trim_start_matches('[').trim_end_matches(']').to_owned(),
            // `url` already drops a port equal to the scheme default.
            port: parsed.port(),
            base_path: String::new(),
            path: parsed.path().to_owned(),
            query: parsed.query().unwrap_or_default().to_owned(),
        })
    }
}
