// BLOB version prefix helpers for raw_results.delay_data. [version: u8][wincode payload].
// Version 1 = Vec<f64> of delay samples in arrival order.

use crate::error::{CoreError, CoreResult};

pub(super) const BLOB_VERSION_DELAYS: u8 = 1;

fn with_version_prefix(version: u8, payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(version);
    out.extend_from_slice(&payload);
    out
}

/// Payload after the version byte, or None for an empty or unknown-version blob.
fn blob_payload(bytes: &[u8], expected_version: u8) -> Option<&[u8]> {
    match bytes.split_first() {
        Some((v, rest)) if *v == expected_version => Some(rest),
        _ => None,
    }
}

pub(super) fn encode_delays(delays: &[f64]) -> CoreResult<Vec<u8>> {
    let payload = wincode::serialize(&delays.to_vec())
        .map_err(|e| CoreError::StoreUnavailable(format!("wincode delays: {}", e).into()))?;
    Ok(with_version_prefix(BLOB_VERSION_DELAYS, payload))
}

/// Decode delay samples; on unknown/corrupt blob return empty and log.
pub(super) fn decode_delays(bytes: &[u8]) -> Vec<f64> {
    let Some(payload) = blob_payload(bytes, BLOB_VERSION_DELAYS) else {
        tracing::debug!(len = bytes.len(), "delay blob with unknown version, using empty");
        return Vec::new();
    };
    wincode::deserialize::<Vec<f64>>(payload).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "wincode deserialize delays (corrupt), using empty");
        Vec::new()
    })
}
