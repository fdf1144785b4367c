use bytes::Bytes;
use http::StatusCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Put,
    Get,
}

/// One object-store operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectRequest {
    Put {
        key: String,
        payload: Bytes,
        /// Canned ACL, e.g. `public-read`.
        acl: Option<String>,
    },
    Get {
        key: String,
        /// Cached validator; the server answers 304 while it still matches.
        if_none_match: Option<String>,
    },
}

impl ObjectRequest {
    pub fn key(&self) -> &str {
        match self {
            ObjectRequest::Put { key, .. } | ObjectRequest::Get { key, .. } => key,
        }
    }

    pub const fn kind(&self) -> OperationKind {
        match self {
            ObjectRequest::Put { .. } => OperationKind::Put,
            ObjectRequest::Get { .. } => OperationKind::Get,
        }
    }
}

/// A successful (2xx) or not-modified (304) response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectResponse {
    pub status: StatusCode,
    pub etag: Option<String>,
}

impl ObjectResponse {
    pub fn new(status: StatusCode, etag: Option<String>) -> Self {
        Self { status, etag }
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }
}
