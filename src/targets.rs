//! Request targets and the screenshot endpoint they are sent to.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use tracing::info;
use url::Url;

use crate::error::ConfigError;

const DEFAULT_URIS: [&str; 10] = [
    "https://yewolf.fr",
    "https://google.com",
    "https://github.com",
    "https://twitter.com",
    "https://facebook.com",
    "https://instagram.com",
    "https://linkedin.com",
    "https://youtube.com",
    "https://reddit.com",
    "https://wikipedia.org",
];

/// A URI the screenshot service is asked to render. Opaque to the harness.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestTarget(Arc<str>);

impl RequestTarget {
    pub fn new(uri: impl Into<Arc<str>>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only candidate list shared by every worker. Never empty.
#[derive(Debug, Clone)]
pub struct TargetPool {
    targets: Arc<[RequestTarget]>,
}

impl TargetPool {
    pub fn new(uris: Vec<String>) -> Result<Self, ConfigError> {
        if uris.is_empty() {
            return Err(ConfigError::EmptyTargets);
        }

        Ok(Self {
            targets: uris.into_iter().map(RequestTarget::new).collect(),
        })
    }

    pub fn fixed(uri: impl Into<Arc<str>>) -> Self {
        Self {
            targets: Arc::from([RequestTarget::new(uri)]),
        }
    }

    pub fn default_uris() -> Self {
        Self {
            targets: DEFAULT_URIS.iter().map(|uri| RequestTarget::new(*uri)).collect(),
        }
    }

    /// Loads a JSON array of URI strings.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let uris: Vec<String> =
            sonic_rs::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        info!("Loaded {} targets from {:?}", uris.len(), path);

        Self::new(uris)
    }

    /// Uniform pick with replacement. Keeps no state between calls.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &RequestTarget {
        &self.targets[rng.random_range(0..self.targets.len())]
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RequestTarget> {
        self.targets.iter()
    }
}

/// `GET <base>/api/screenshot?url=<target>` builder.
#[derive(Debug, Clone)]
pub struct Endpoint {
    screenshot: Url,
}

impl Endpoint {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason,
        };

        let mut screenshot = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(screenshot.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", screenshot.scheme())));
        }

        screenshot
            .path_segments_mut()
            .map_err(|()| invalid("cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "screenshot"]);
        screenshot.set_query(None);
        screenshot.set_fragment(None);

        Ok(Self { screenshot })
    }

    pub fn request_url(&self, target: &RequestTarget) -> Url {
        let mut url = self.screenshot.clone();
        url.query_pairs_mut().append_pair("url", target.as_str());
        url
    }
}
