//! Endpoint identifiers.
//!
//! Endpoints are opaque URI strings. Registrations may use a trailing `*`
//! to match every endpoint that shares the prefix before it.

use super::*;

/// The null endpoint, used when a bundle has no custodian or report-to.
pub const NULL_EID: &str = "dtn:none";

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct EndpointId(Arc<str>);

impl EndpointId {
    pub fn null() -> Self {
        Self(Arc::from(NULL_EID))
    }

    pub fn is_null(&self) -> bool {
        self.0.as_ref() == NULL_EID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Does this endpoint, read as a pattern, match `other`?
    pub fn matches(&self, other: &EndpointId) -> bool {
        match self.0.strip_suffix('*') {
            Some(prefix) => other.0.starts_with(prefix),
            None => self.0 == other.0,
        }
    }

    /// Appends a demux path to this endpoint, e.g. `dtn://node` + `admin` = `dtn://node/admin`.
    pub fn with_service(&self, service: &str) -> Self {
        let base = self.0.trim_end_matches('/');
        Self(Arc::from(format!("{base}/{}", service.trim_start_matches('/'))))
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::null()
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for EndpointId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl core::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.0.as_ref())
    }
}
