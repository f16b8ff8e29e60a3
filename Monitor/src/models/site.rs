// src/models/site.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{AppError, Result};

/// Opaque identifier of the person a report is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Scheme and host of a tracked website, always ending in `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RootUrl(Url);

impl RootUrl {
    /// Parse user input into a root URL.
    ///
    /// A bare host gets an `https://` scheme. Anything carrying a path,
    /// query or fragment is rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AppError::validation("empty website address"));
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        let url = Url::parse(&candidate)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::validation(format!(
                "unsupported scheme '{}' in {trimmed}",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(AppError::validation(format!("missing host in {trimmed}")));
        }
        if url.path() != "/" {
            return Err(AppError::validation(format!(
                "{trimmed} must not contain a path"
            )));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(AppError::validation(format!(
                "{trimmed} must not contain a query or fragment"
            )));
        }

        Ok(Self(url))
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Host name, used as the site's display name.
    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }

    /// Location of the robots file for this site.
    pub fn robots_url(&self) -> Result<Url> {
        Ok(self.0.join("robots.txt")?)
    }
}

impl fmt::Display for RootUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for RootUrl {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RootUrl> for String {
    fn from(value: RootUrl) -> Self {
        value.0.into()
    }
}

/// A website tracked on behalf of an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub site_id: String,
    pub owner_id: OwnerId,
    pub root_url: RootUrl,
    pub registered_at: DateTime<Utc>,
}

impl Site {
    /// Create a site, deriving its identifier from owner and root URL.
    pub fn new(owner_id: OwnerId, root_url: RootUrl, registered_at: DateTime<Utc>) -> Self {
        let site_id = Self::derive_id(&owner_id, &root_url);
        Self {
            site_id,
            owner_id,
            root_url,
            registered_at,
        }
    }

    /// Host name of the site.
    pub fn name(&self) -> &str {
        self.root_url.host()
    }

    /// Whether the reporting threshold has been reached at `now`.
    pub fn is_due(&self, now: DateTime<Utc>, report_after: chrono::Duration) -> bool {
        now.signed_duration_since(self.registered_at) >= report_after
    }

    fn derive_id(owner_id: &OwnerId, root_url: &RootUrl) -> String {
        let mut hasher = Sha256::new();
        hasher.update(owner_id.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(root_url.as_str().as_bytes());
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_string()
    }
}
