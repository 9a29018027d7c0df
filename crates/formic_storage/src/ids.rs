#![forbid(unsafe_code)]

use rand::RngCore;

/// Identifier width used by the multi-tenant deployment (8 hex chars).
pub const MULTI_TENANT_ID_BYTES: usize = 4;
/// Identifier width used by the single-tenant deployment (16 hex chars).
pub const SINGLE_TENANT_ID_BYTES: usize = 8;

/// Draws `nbytes` random bytes and renders them as lowercase hex.
///
/// No uniqueness check happens here; the record store probes the target key before
/// accepting a fresh id.
pub fn new_id(nbytes: usize) -> String {
    let mut buf = vec![0u8; nbytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
