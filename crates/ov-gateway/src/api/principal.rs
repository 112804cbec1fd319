//! Principal resolution (§6.1, "all endpoints require an authenticated
//! principal and scope results/ownership to that principal").
//!
//! The API bearer token (`auth.rs`) authenticates the *caller*; this header
//! identifies *which owner* the caller is acting as, the same two-layer
//! split the teacher uses between its API token and per-session identity.

use axum::http::HeaderMap;
use ov_domain::error::Error;
use uuid::Uuid;

pub const OWNER_HEADER: &str = "x-owner-id";

pub fn owner_id_from_headers(headers: &HeaderMap) -> Result<Uuid, Error> {
    let raw = headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Validation(format!("missing {OWNER_HEADER} header")))?;

    Uuid::parse_str(raw).map_err(|_| Error::Validation(format!("{OWNER_HEADER} is not a valid UUID")))
}
