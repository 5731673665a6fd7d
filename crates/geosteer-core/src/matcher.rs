//! Map an observed BSSID back to the physical access point that emits it.
//!
//! Multi-radio APs derive their BSSIDs from one base address. Two vendor
//! numbering conventions are folded into the match:
//!
//! - the first octet may have bit 3 toggled between co-located radios
//!   (octet delta 0 or 8);
//! - each radio exposes up to [`VIRTUAL_BSSIDS_PER_AP`] virtual BSSIDs whose
//!   last octet counts up from the catalog's base octet.
//!
//! The middle four octets must match exactly.

use crate::bssid::Bssid;
use crate::catalog::ApTargetRecord;

/// Allowed first-octet deltas between an observed address and its base.
pub const FIRST_OCTET_DELTAS: [u8; 2] = [0, 8];

/// Number of virtual BSSIDs a single radio may advertise.
pub const VIRTUAL_BSSIDS_PER_AP: u8 = 16;

/// Whether `observed` belongs to the access point whose base address is `base`.
pub fn matches(observed: &Bssid, base: &Bssid) -> bool {
    let o = observed.octets();
    let r = base.octets();

    o[1..5] == r[1..5]
        && FIRST_OCTET_DELTAS.contains(&o[0].abs_diff(r[0]))
        && o[5].wrapping_sub(r[5]) < VIRTUAL_BSSIDS_PER_AP
}

/// Find the access point record for `observed`.
///
/// When several records match, the first one in catalog order wins and the
/// ambiguity is logged.
pub fn match_bssid<'a>(observed: &Bssid, records: &'a [ApTargetRecord]) -> Option<&'a ApTargetRecord> {
    let mut hits = records.iter().filter(|r| matches(observed, &r.id));
    let first = hits.next()?;

    let others: Vec<String> = hits.map(|r| r.id.to_string()).collect();
    if !others.is_empty() {
        tracing::warn!(
            bssid = %observed,
            selected = %first.id,
            ignored = ?others,
            "ambiguous access point match; selecting the first catalog entry"
        );
    }
    Some(first)
}
