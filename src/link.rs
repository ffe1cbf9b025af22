//! Holder-facing representations of invitation and proof URLs. Both splice
//! the URL text as the agent returned it, without parsing or re-encoding.

/// App-launch URI for a wallet: `scheme` followed by the query component of
/// `url`. Returns `None` when `url` carries no query.
#[must_use]
pub fn deep_link(url: &str, scheme: &str) -> Option<String> {
    url.split_once('?').map(|(_, query)| format!("{scheme}?{query}"))
}

/// Scannable payload for an out-of-band proof: the proof URL without its
/// query, followed by `url/<proof id>`.
#[must_use]
pub fn scan_payload(proof_url: &str, proof_id: &str) -> String {
    let base = proof_url.split_once('?').map_or(proof_url, |(base, _)| base);
    format!("{base}url/{proof_id}")
}
