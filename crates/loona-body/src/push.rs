use std::fmt;

use http::{
    uri::{Authority, InvalidUri, InvalidUriParts, PathAndQuery, Scheme},
    Method, Uri,
};

use crate::Response;

/// The default stream weight, cf. RFC 7540, section 5.3.5
pub const DEFAULT_WEIGHT: u16 = 16;

/// Smallest and largest stream weights, cf. RFC 7540, section 5.3.2
pub const MIN_WEIGHT: u16 = 1;
pub const MAX_WEIGHT: u16 = 256;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PushPromiseError {
    #[error("push promise path is empty")]
    EmptyPath,

    #[error("push promise path must be absolute, got {path:?}")]
    RelativePath { path: String },

    #[error("push promise path {path:?} is invalid: {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: InvalidUri,
    },

    #[error("push promise weight must be within 1..=256, got {weight}")]
    WeightOutOfRange { weight: u16 },
}

b_x::make_bxable!(PushPromiseError);

/// A response the server pushes alongside the main response, for a
/// resource it predicts the client will request.
pub struct PushPromise {
    path: PathAndQuery,
    response: Response,
    weight: u16,
}

impl PushPromise {
    pub fn new(path: &str, response: Response, weight: u16) -> Result<Self, PushPromiseError> {
        if path.is_empty() {
            return Err(PushPromiseError::EmptyPath);
        }
        if !path.starts_with('/') {
            return Err(PushPromiseError::RelativePath { path: path.into() });
        }
        if !(MIN_WEIGHT..=MAX_WEIGHT).contains(&weight) {
            return Err(PushPromiseError::WeightOutOfRange { weight });
        }

        let path = PathAndQuery::try_from(path).map_err(|source| PushPromiseError::InvalidPath {
            path: path.into(),
            source,
        })?;

        Ok(Self {
            path,
            response,
            weight,
        })
    }

    pub fn path(&self) -> &PathAndQuery {
        &self.path
    }

    pub fn weight(&self) -> u16 {
        self.weight
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    /// The pseudo-request the promise announces. Scheme and authority
    /// come from the request the promise is associated with.
    pub fn promised_request(&self, scheme: Scheme, authority: Authority) -> PromisedRequest {
        PromisedRequest {
            method: Method::GET,
            scheme,
            authority,
            path: self.path.clone(),
        }
    }

    pub fn into_response(self) -> Response {
        self.response
    }
}

impl fmt::Debug for PushPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushPromise")
            .field("path", &self.path)
            .field("weight", &self.weight)
            .field("response", &self.response)
            .finish()
    }
}

/// `:method`, `:scheme`, `:authority` and `:path` of a pushed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromisedRequest {
    pub method: Method,
    pub scheme: Scheme,
    pub authority: Authority,
    pub path: PathAndQuery,
}

impl PromisedRequest {
    pub fn uri(&self) -> Result<Uri, InvalidUriParts> {
        let mut parts = http::uri::Parts::default();
        parts.scheme = Some(self.scheme.clone());
        parts.authority = Some(self.authority.clone());
        parts.path_and_query = Some(self.path.clone());
        Uri::from_parts(parts)
    }
}
