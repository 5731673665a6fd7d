//! Nearest access point selection.

use crate::bssid::{Bssid, ObservedBssid};
use crate::catalog::{ApTargetRecord, Position};
use crate::matcher;

/// An observed BSSID together with the catalog record it was matched to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate<'a> {
    pub record: &'a ApTargetRecord,
    pub observed: Bssid,
}

/// Match every observed address against the catalog, dropping the misses.
///
/// Output order follows `observed`, which keeps the selector's tie-break
/// deterministic.
pub fn match_candidates<'a>(observed: &[Bssid], records: &'a [ApTargetRecord]) -> Vec<Candidate<'a>> {
    observed
        .iter()
        .filter_map(|bssid| {
            let record = matcher::match_bssid(bssid, records);
            if record.is_none() {
                tracing::debug!(bssid = %bssid, "no catalog entry for observed BSSID");
            }
            record.map(|record| Candidate {
                record,
                observed: *bssid,
            })
        })
        .collect()
}

/// Keep only the addresses advertising the highest bitrate in the scan.
pub fn fastest(scan: &[ObservedBssid]) -> Vec<Bssid> {
    let Some(max) = scan.iter().map(|o| o.max_bitrate).max() else {
        return Vec::new();
    };
    scan.iter()
        .filter(|o| o.max_bitrate == max)
        .map(|o| o.address)
        .collect()
}

/// Pick the candidate geometrically closest to `station`.
///
/// Ties go to the earliest candidate. Returns the observed address, since
/// that is what the connection profile gets pinned to.
pub fn nearest(station: Position, candidates: &[Candidate<'_>]) -> Option<Bssid> {
    let mut best: Option<(f64, Bssid)> = None;
    for candidate in candidates {
        let dist = station.distance(&candidate.record.position());
        tracing::trace!(
            bssid = %candidate.observed,
            ap = %candidate.record.id,
            dist,
            "candidate"
        );
        match best {
            Some((best_dist, _)) if dist >= best_dist => {}
            _ => best = Some((dist, candidate.observed)),
        }
    }
    best.map(|(_, bssid)| bssid)
}
