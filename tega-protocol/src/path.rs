//! Dotted path to URL encoding for the REST API.
//!
//! `a.b.c` is stored at `http://{host}:{port}/a/b/c/`. A dot is always a
//! separator; there is no escaping.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Version constraint for CRUD calls. `-1` means "latest".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionCursor(i64);

impl VersionCursor {
    /// Unspecified version; no `version` query parameter is sent.
    pub const LATEST: VersionCursor = VersionCursor(-1);

    pub fn new(version: i64) -> Self {
        Self(version)
    }

    pub fn is_latest(&self) -> bool {
        self.0 < 0
    }

    /// Returns the value to send as `version`, if any.
    pub fn as_query(&self) -> Option<i64> {
        (self.0 >= 0).then_some(self.0)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl Default for VersionCursor {
    fn default() -> Self {
        Self::LATEST
    }
}

impl From<i64> for VersionCursor {
    fn from(version: i64) -> Self {
        Self(version)
    }
}

impl fmt::Display for VersionCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Query parameters attached to every REST call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryParams<'a> {
    pub tega_id: &'a str,
    pub version: VersionCursor,
    pub ephemeral: bool,
    /// Ask for internal attributes on reads.
    pub internal: bool,
    /// Match the path as a regular expression on reads.
    pub regex: bool,
    /// Transaction id while a transaction is open.
    pub txid: Option<&'a str>,
}

impl<'a> QueryParams<'a> {
    pub fn new(tega_id: &'a str) -> Self {
        Self {
            tega_id,
            version: VersionCursor::LATEST,
            ephemeral: false,
            internal: false,
            regex: false,
            txid: None,
        }
    }

    pub fn with_version(mut self, version: VersionCursor) -> Self {
        self.version = version;
        self
    }

    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    pub fn with_internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    pub fn with_regex(mut self, regex: bool) -> Self {
        self.regex = regex;
        self
    }

    pub fn with_txid(mut self, txid: Option<&'a str>) -> Self {
        self.txid = txid;
        self
    }

    fn append_to(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("tega_id", self.tega_id);
        if let Some(version) = self.version.as_query() {
            pairs.append_pair("version", &version.to_string());
        }
        if self.ephemeral {
            pairs.append_pair("ephemeral", "true");
        }
        if self.internal {
            pairs.append_pair("internal", "true");
        }
        if self.regex {
            pairs.append_pair("regex_flag", "true");
        }
        if let Some(txid) = self.txid {
            pairs.append_pair("txid", txid);
        }
    }
}

/// Replaces every `.` with `/`.
pub fn path_to_url_path(path: &str) -> String {
    path.replace('.', "/")
}

/// Inverse of [`path_to_url_path`], ignoring leading and trailing slashes.
pub fn url_path_to_path(url_path: &str) -> String {
    url_path.trim_matches('/').replace('/', ".")
}

/// Builds REST URLs for one server.
#[derive(Debug, Clone)]
pub struct PathCodec {
    base: Url,
}

impl PathCodec {
    /// Creates a codec for `http://{host}:{port}/`.
    pub fn new(host: &str, port: u16) -> Result<Self, ProtocolError> {
        let base = Url::parse(&format!("http://{}:{}/", host, port))?;
        Ok(Self { base })
    }

    /// Encodes a CRUD URL for a dotted path.
    pub fn encode(&self, path: &str, params: &QueryParams<'_>) -> Url {
        let mut url = self.base.clone();
        if path.is_empty() {
            url.set_path("/");
        } else {
            url.set_path(&format!("/{}/", path_to_url_path(path)));
        }
        params.append_to(&mut url);
        url
    }

    /// Encodes a management command URL (`/_{name}`), with extra query pairs
    /// appended after the standard ones.
    pub fn command(&self, name: &str, params: &QueryParams<'_>, extra: &[(&str, &str)]) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("/_{}", name));
        params.append_to(&mut url);
        if !extra.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in extra {
                pairs.append_pair(k, v);
            }
        }
        url
    }
}
