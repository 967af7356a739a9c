//! Option negotiation (C4): turns a peer's raw `OptionMap` into the
//! accepted subset plus the typed values a session acts on (spec §4.4).

use std::time::Duration;

use bytes::Bytes;

use crate::codec::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::options::OptionMap;

const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 255;
const DEFAULT_SCHEDULE: [u64; 3] = [1, 3, 5];

/// Which side of the transfer is negotiating. `tsize=0` on a read means
/// "tell me the size"; on a write it means "unknown", so the two roles
/// process the option differently (spec §4.4).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Read,
    Write,
}

/// The typed, accepted negotiation result a session reads from — never the
/// raw wire `OptionMap` (spec §3 `NegotiatedOptions`).
#[derive(Clone, Debug, PartialEq)]
pub struct NegotiatedOptions {
    pub block_size: usize,
    pub timeout: Vec<Duration>,
    pub tsize: Option<u64>,
}

impl Default for NegotiatedOptions {
    fn default() -> Self {
        NegotiatedOptions {
            block_size: DEFAULT_BLOCK_SIZE,
            timeout: DEFAULT_SCHEDULE.iter().map(|&s| Duration::from_secs(s)).collect(),
            tsize: None,
        }
    }
}

fn parse_u64(value: &Bytes) -> Option<u64> {
    std::str::from_utf8(value).ok()?.parse::<u64>().ok()
}

fn format_u64(v: u64) -> Bytes {
    Bytes::from(v.to_string().into_bytes())
}

/// Parses an OACK the remote peer has already accepted into typed values,
/// trusting its contents rather than re-running the validation rules —
/// used by the locally-originated bootstrap shapes, which are the
/// requesting side and never the one enforcing §4.4's limits.
pub fn from_accepted(accepted: &OptionMap) -> NegotiatedOptions {
    let mut out = NegotiatedOptions::default();
    if let Some(raw) = accepted.get(b"blksize") {
        if let Some(n) = parse_u64(raw) {
            out.block_size = n as usize;
        }
    }
    if let Some(raw) = accepted.get(b"timeout") {
        if let Some(n) = parse_u64(raw) {
            out.timeout = vec![Duration::from_secs(n); 3];
        }
    }
    if let Some(raw) = accepted.get(b"tsize") {
        if let Some(n) = parse_u64(raw) {
            out.tsize = Some(n);
        }
    }
    out
}

/// Applies the per-option validation/clamping rules of spec §4.4 to
/// `requested`, returning the subset to echo back in an OACK and the typed
/// values the session should adopt. `actual_size` is the reader's `size()`
/// for a read session answering `tsize=0`; ignored for writes.
pub fn process_options(
    requested: &OptionMap,
    role: Role,
    actual_size: Option<u64>,
) -> (OptionMap, NegotiatedOptions) {
    let mut accepted = OptionMap::new();
    let mut negotiated = NegotiatedOptions::default();

    if let Some(raw) = requested.get(b"blksize") {
        if let Some(n) = parse_u64(raw) {
            let min = MIN_BLOCK_SIZE as u64;
            let max = MAX_BLOCK_SIZE as u64;
            if n >= min && n <= max {
                negotiated.block_size = n as usize;
                let _ = accepted.insert(Bytes::from_static(b"blksize"), raw.clone());
            } else if n > max {
                negotiated.block_size = MAX_BLOCK_SIZE;
                let _ = accepted.insert(Bytes::from_static(b"blksize"), format_u64(max));
            }
            // n < MIN_BLOCK_SIZE: dropped silently, default stands.
        }
    }

    if let Some(raw) = requested.get(b"timeout") {
        if let Some(n) = parse_u64(raw) {
            if n >= MIN_TIMEOUT_SECS && n <= MAX_TIMEOUT_SECS {
                negotiated.timeout = vec![Duration::from_secs(n); 3];
                let _ = accepted.insert(Bytes::from_static(b"timeout"), raw.clone());
            }
        }
    }

    if let Some(raw) = requested.get(b"tsize") {
        if let Some(n) = parse_u64(raw) {
            match role {
                Role::Read => {
                    // A read-side tsize is a query; 0 means "tell me the
                    // size", anything else is echoed back unchanged.
                    let reported = if n == 0 { actual_size.unwrap_or(0) } else { n };
                    negotiated.tsize = Some(reported);
                    let _ = accepted.insert(Bytes::from_static(b"tsize"), format_u64(reported));
                }
                Role::Write => {
                    negotiated.tsize = Some(n);
                    let _ = accepted.insert(Bytes::from_static(b"tsize"), raw.clone());
                }
            }
        }
    }

    (accepted, negotiated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(pairs: &[(&[u8], &[u8])]) -> OptionMap {
        let mut m = OptionMap::new();
        for (n, v) in pairs {
            m.insert(Bytes::copy_from_slice(n), Bytes::copy_from_slice(v))
                .unwrap();
        }
        m
    }

    #[test]
    fn blksize_within_range_is_accepted() {
        let req = map_with(&[(b"blksize", b"8")]);
        let (accepted, negotiated) = process_options(&req, Role::Read, None);
        assert_eq!(accepted.get(b"blksize"), Some(&Bytes::from_static(b"8")));
        assert_eq!(negotiated.block_size, 8);
    }

    #[test]
    fn blksize_below_minimum_is_dropped() {
        let req = map_with(&[(b"blksize", b"7")]);
        let (accepted, negotiated) = process_options(&req, Role::Read, None);
        assert!(accepted.is_empty());
        assert_eq!(negotiated.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn blksize_at_maximum_is_accepted() {
        let req = map_with(&[(b"blksize", b"65464")]);
        let (accepted, negotiated) = process_options(&req, Role::Read, None);
        assert_eq!(
            accepted.get(b"blksize"),
            Some(&Bytes::from_static(b"65464"))
        );
        assert_eq!(negotiated.block_size, 65464);
    }

    #[test]
    fn blksize_above_maximum_is_clamped() {
        let req = map_with(&[(b"blksize", b"65465")]);
        let (accepted, negotiated) = process_options(&req, Role::Read, None);
        assert_eq!(
            accepted.get(b"blksize"),
            Some(&Bytes::from_static(b"65464"))
        );
        assert_eq!(negotiated.block_size, 65464);
    }

    #[test]
    fn blksize_non_integer_is_dropped() {
        let req = map_with(&[(b"blksize", b"foo")]);
        let (accepted, negotiated) = process_options(&req, Role::Read, None);
        assert!(accepted.is_empty());
        assert_eq!(negotiated.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn timeout_within_range_yields_three_equal_attempts() {
        let req = map_with(&[(b"timeout", b"2")]);
        let (accepted, negotiated) = process_options(&req, Role::Write, None);
        assert_eq!(accepted.get(b"timeout"), Some(&Bytes::from_static(b"2")));
        assert_eq!(
            negotiated.timeout,
            vec![Duration::from_secs(2); 3]
        );
    }

    #[test]
    fn timeout_out_of_range_is_dropped() {
        let req = map_with(&[(b"timeout", b"256")]);
        let (accepted, negotiated) = process_options(&req, Role::Write, None);
        assert!(accepted.is_empty());
        assert_eq!(
            negotiated.timeout,
            NegotiatedOptions::default().timeout
        );
    }

    #[test]
    fn read_tsize_zero_is_replaced_by_actual_size() {
        let req = map_with(&[(b"tsize", b"0")]);
        let (accepted, negotiated) = process_options(&req, Role::Read, Some(1234));
        assert_eq!(
            accepted.get(b"tsize"),
            Some(&Bytes::from_static(b"1234"))
        );
        assert_eq!(negotiated.tsize, Some(1234));
    }

    #[test]
    fn write_tsize_is_recorded_as_sent() {
        let req = map_with(&[(b"tsize", b"45")]);
        let (accepted, negotiated) = process_options(&req, Role::Write, None);
        assert_eq!(accepted.get(b"tsize"), Some(&Bytes::from_static(b"45")));
        assert_eq!(negotiated.tsize, Some(45));
    }

    #[test]
    fn unknown_option_is_silently_omitted() {
        let req = map_with(&[(b"windowsize", b"4")]);
        let (accepted, _) = process_options(&req, Role::Read, None);
        assert!(accepted.is_empty());
    }

    #[test]
    fn preserves_insertion_order_of_accepted_options() {
        let req = map_with(&[(b"timeout", b"2"), (b"blksize", b"1024")]);
        let (accepted, _) = process_options(&req, Role::Read, None);
        let names: Vec<&[u8]> = accepted.iter().map(|(n, _)| n.as_ref()).collect();
        assert_eq!(names, vec![b"timeout".as_ref(), b"blksize".as_ref()]);
    }
}
