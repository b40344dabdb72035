//! LCP / prefix / suffix search scenarios, default and sis modes.

use quern_hash::{Hash, HashFlags};
use quern_pat::{PatFlags, PatTrie};
use quern_types::{CursorFlags, Encoding, Id, SearchFlags};

const KEYS: [&str; 5] = ["セナ", "ナセナセ", "Senna", "セナ + Ruby", "セナセナ"];

fn build_trie(flags: PatFlags) -> PatTrie {
    let mut pat = PatTrie::create(None, 4096, flags, Encoding::Utf8).expect("create trie");
    for key in KEYS {
        let id = pat
            .lookup(key.as_bytes(), SearchFlags::ADD)
            .expect("insert key");
        assert!(!id.is_nil());
    }
    pat
}

fn id_hash() -> Hash {
    Hash::create(None, 4, 0, HashFlags::TINY, Encoding::Utf8).expect("create id hash")
}

/// Read the matched keys back through the id hash, descending id order,
/// the way the engine's own search consumers do.
fn matched_keys(pat: &PatTrie, hits: &mut Hash) -> Vec<String> {
    let mut keys = Vec::new();
    let mut cursor = hits.cursor(CursorFlags::DESCENDING);
    while !cursor.next().is_nil() {
        let raw = cursor.key().expect("id key");
        let mut buf = [0u8; 4];
        buf.copy_from_slice(raw);
        let id = Id(u32::from_le_bytes(buf));
        let key = pat.get_key(id).expect("live trie id");
        keys.push(String::from_utf8(key.to_vec()).expect("utf8 key"));
    }
    keys.sort();
    keys
}

fn sorted(expected: &[&str]) -> Vec<String> {
    let mut out: Vec<String> = expected.iter().map(|s| (*s).to_string()).collect();
    out.sort();
    out
}

#[test]
fn lcp_search_default_mode() {
    let pat = build_trie(PatFlags::empty());
    let cases: [(&str, Option<&str>); 4] = [
        ("カッター", None),
        ("セ", None),
        ("セナ", Some("セナ")),
        ("セナセナセナ", Some("セナセナ")),
    ];
    for (query, expected) in cases {
        let id = pat.lcp_search(query.as_bytes()).expect("lcp search");
        match expected {
            None => assert!(id.is_nil(), "query {query}"),
            Some(key) => {
                assert_eq!(pat.get_key(id).expect("live id"), key.as_bytes(), "query {query}");
            }
        }
    }
}

#[test]
fn lcp_search_sis_mode() {
    let pat = build_trie(PatFlags::WITH_SIS);
    let cases: [(&str, Option<&str>); 4] = [
        ("カッター", None),
        ("セ", Some("セ")),
        ("セナ", Some("セナ")),
        ("セナセナセナ", Some("セナセナ")),
    ];
    for (query, expected) in cases {
        let id = pat.lcp_search(query.as_bytes()).expect("lcp search");
        match expected {
            None => assert!(id.is_nil(), "query {query}"),
            Some(key) => {
                assert_eq!(pat.get_key(id).expect("live id"), key.as_bytes(), "query {query}");
            }
        }
    }
}

#[test]
fn prefix_search_default_mode() {
    let pat = build_trie(PatFlags::empty());

    let mut hits = id_hash();
    assert!(
        pat.prefix_search("カッター".as_bytes(), &mut hits)
            .unwrap_err()
            .is_end_of_data()
    );

    let mut hits = id_hash();
    pat.prefix_search("セ".as_bytes(), &mut hits).expect("prefix hit");
    assert_eq!(
        matched_keys(&pat, &mut hits),
        sorted(&["セナ", "セナ + Ruby", "セナセナ"])
    );

    let mut hits = id_hash();
    pat.prefix_search("セナ".as_bytes(), &mut hits).expect("prefix hit");
    assert_eq!(
        matched_keys(&pat, &mut hits),
        sorted(&["セナ", "セナ + Ruby", "セナセナ"])
    );

    let mut hits = id_hash();
    assert!(
        pat.prefix_search("セナセナセナ".as_bytes(), &mut hits)
            .unwrap_err()
            .is_end_of_data()
    );
}

#[test]
fn prefix_search_sis_mode() {
    let pat = build_trie(PatFlags::WITH_SIS);

    let mut hits = id_hash();
    pat.prefix_search("セ".as_bytes(), &mut hits).expect("prefix hit");
    assert_eq!(
        matched_keys(&pat, &mut hits),
        sorted(&["セ", "セナ", "セナ + Ruby", "セナセ", "セナセナ"])
    );

    let mut hits = id_hash();
    pat.prefix_search("セナ".as_bytes(), &mut hits).expect("prefix hit");
    assert_eq!(
        matched_keys(&pat, &mut hits),
        sorted(&["セナ", "セナ + Ruby", "セナセ", "セナセナ"])
    );

    let mut hits = id_hash();
    assert!(
        pat.prefix_search("セナセナセナ".as_bytes(), &mut hits)
            .unwrap_err()
            .is_end_of_data()
    );
}

#[test]
fn suffix_search_default_mode_is_exact_only() {
    let pat = build_trie(PatFlags::empty());

    let mut hits = id_hash();
    assert!(
        pat.suffix_search("ナ".as_bytes(), &mut hits)
            .unwrap_err()
            .is_end_of_data()
    );

    let mut hits = id_hash();
    pat.suffix_search("セナ".as_bytes(), &mut hits).expect("suffix hit");
    assert_eq!(matched_keys(&pat, &mut hits), sorted(&["セナ"]));

    let mut hits = id_hash();
    assert!(
        pat.suffix_search("セナセナセナ".as_bytes(), &mut hits)
            .unwrap_err()
            .is_end_of_data()
    );
}

#[test]
fn suffix_search_sis_mode_walks_extensions() {
    let pat = build_trie(PatFlags::WITH_SIS);

    let mut hits = id_hash();
    assert!(
        pat.suffix_search("カッター".as_bytes(), &mut hits)
            .unwrap_err()
            .is_end_of_data()
    );

    let mut hits = id_hash();
    pat.suffix_search("ナ".as_bytes(), &mut hits).expect("suffix hit");
    assert_eq!(
        matched_keys(&pat, &mut hits),
        sorted(&["セナセナ", "ナセナ", "セナ", "ナ"])
    );

    let mut hits = id_hash();
    pat.suffix_search("セナ".as_bytes(), &mut hits).expect("suffix hit");
    assert_eq!(
        matched_keys(&pat, &mut hits),
        sorted(&["セナセナ", "ナセナ", "セナ"])
    );

    let mut hits = id_hash();
    assert!(
        pat.suffix_search("セナセナセナ".as_bytes(), &mut hits)
            .unwrap_err()
            .is_end_of_data()
    );
}
