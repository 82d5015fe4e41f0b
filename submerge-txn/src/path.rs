// Pure functions mapping (app-id, key, tx-id) triples to coordination-
// service paths. Every other component must go through these instead of
// hand-assembling strings: entity keys are opaque and may contain `/`,
// which is also the name-space separator, so every segment derived from
// untrusted input is percent-encoded before it is joined in.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::TxId;

/// Characters a URL-style `quote_plus` would also escape, beyond the
/// baseline control-character set: everything that is not unreserved.
const ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'!')
    .add(b'$')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b';')
    .add(b'=')
    .add(b':')
    .add(b'@')
    .add(b'[')
    .add(b']');

pub const APPS_PATH: &str = "/appscale/apps";
pub const APP_TX_SEGMENT: &str = "txids";
pub const APP_LOCK_SEGMENT: &str = "locks";
pub const APP_TX_PREFIX: &str = "tx";
pub const TX_UPDATEDKEY_PREFIX: &str = "ukey";
pub const TX_LOCK_SEGMENT: &str = "lockpath";
pub const TX_BLACKLIST_SEGMENT: &str = "blacklist";
pub const TX_VALIDLIST_SEGMENT: &str = "validlist";
pub const XG_SEGMENT: &str = "xg";
pub const GC_LOCK_SEGMENT: &str = "gclock";
pub const GC_TIME_SEGMENT: &str = "gclast_time";
pub const DS_GROOM_LOCK_PATH: &str = "/appscale_datastore_groomer";
pub const MAX_GROUPS_FOR_XG: usize = 5;
pub const LOCK_LIST_SEPARATOR: &str = "!XG_LIST!";

pub fn encode(segment: &str) -> String {
    utf8_percent_encode(segment, ENCODE_SET).to_string()
}

pub fn decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

pub fn app_root_path(app_id: &str) -> String {
    format!("{APPS_PATH}/{}", encode(app_id))
}

pub fn txn_prefix_path(app_id: &str) -> String {
    format!("{}/{APP_TX_SEGMENT}", app_root_path(app_id))
}

/// The prefix callers create a sequence child of to obtain a new
/// transaction ID, e.g. `.../txids/tx`.
pub fn txn_path_before_id(app_id: &str) -> String {
    format!("{}/{APP_TX_PREFIX}", txn_prefix_path(app_id))
}

pub fn format_txid(tx_id: TxId) -> String {
    format!("{APP_TX_PREFIX}{:010}", tx_id.0)
}

/// Parses a child name like `tx0000000042` back into a `TxId`. Returns
/// `None` for names that aren't transaction nodes at all (the GC sweep
/// uses this to skip non-transaction children of `txids`).
pub fn parse_txid(segment: &str) -> Option<TxId> {
    let digits = segment.strip_prefix(APP_TX_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(TxId)
}

pub fn txn_path(app_id: &str, tx_id: TxId) -> String {
    format!("{}/{}", txn_prefix_path(app_id), format_txid(tx_id))
}

pub fn txn_lock_list_path(app_id: &str, tx_id: TxId) -> String {
    format!("{}/{TX_LOCK_SEGMENT}", txn_path(app_id, tx_id))
}

pub fn xg_path(app_id: &str, tx_id: TxId) -> String {
    format!("{}/{XG_SEGMENT}", txn_path(app_id, tx_id))
}

pub fn blacklist_root_path(app_id: &str) -> String {
    format!("{}/{TX_BLACKLIST_SEGMENT}", txn_prefix_path(app_id))
}

pub fn blacklist_entry_path(app_id: &str, tx_id: TxId) -> String {
    format!("{}/{}", blacklist_root_path(app_id), tx_id.0)
}

pub fn valid_txn_root_path(app_id: &str) -> String {
    format!("{}/{TX_VALIDLIST_SEGMENT}", txn_prefix_path(app_id))
}

pub fn valid_txn_path(app_id: &str, entity_key: &str) -> String {
    format!("{}/{}", valid_txn_root_path(app_id), encode(entity_key))
}

pub fn lock_root_path(app_id: &str, entity_key: &str) -> String {
    format!(
        "{}/{APP_LOCK_SEGMENT}/{}",
        app_root_path(app_id),
        encode(entity_key)
    )
}

pub fn gc_lock_path(app_id: &str) -> String {
    format!("{}/{GC_LOCK_SEGMENT}", app_root_path(app_id))
}

pub fn gc_time_path(app_id: &str) -> String {
    format!("{}/{GC_TIME_SEGMENT}", app_root_path(app_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn paths_match_the_documented_layout() {
        assert_eq!(app_root_path("guestbook"), "/appscale/apps/guestbook");
        assert_eq!(
            txn_path_before_id("guestbook"),
            "/appscale/apps/guestbook/txids/tx"
        );
        assert_eq!(
            txn_path("guestbook", TxId(42)),
            "/appscale/apps/guestbook/txids/tx0000000042"
        );
        assert_eq!(
            lock_root_path("guestbook", "Greeting:1"),
            "/appscale/apps/guestbook/locks/Greeting%3A1"
        );
        assert_eq!(DS_GROOM_LOCK_PATH, "/appscale_datastore_groomer");
    }

    #[test_log::test]
    fn encoding_round_trips_separators_and_special_characters() {
        for key in ["a/b", "a b", "a%b", "!XG_LIST!", "plain"] {
            assert_eq!(decode(&encode(key)), key);
            assert!(!encode(key).contains('/') || key == "plain");
        }
    }

    #[test_log::test]
    fn parse_txid_rejects_non_transaction_children() {
        assert_eq!(parse_txid("tx0000000007"), Some(TxId(7)));
        assert_eq!(parse_txid("lockpath"), None);
        assert_eq!(parse_txid("xg"), None);
        assert_eq!(parse_txid("tx"), None);
    }
}
