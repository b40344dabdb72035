use proptest::prelude::*;

use super::*;

const KEYS: [&str; 5] = ["セナ", "ナセナセ", "Senna", "セナ + Ruby", "セナセナ"];

fn trie_with_keys() -> PatTrie {
    let mut pat = PatTrie::create(None, 4096, PatFlags::empty(), Encoding::Utf8).unwrap();
    for key in KEYS {
        pat.lookup(key.as_bytes(), SearchFlags::ADD).unwrap();
    }
    pat
}

fn collect(cursor: &mut PatCursor<'_>) -> Vec<String> {
    let mut out = Vec::new();
    while !cursor.next().is_nil() {
        out.push(String::from_utf8(cursor.key().unwrap().to_vec()).unwrap());
    }
    out
}

#[test]
fn add_then_exact_lookup_round_trips() {
    let mut pat = trie_with_keys();
    for key in KEYS {
        let id = pat.lookup(key.as_bytes(), SearchFlags::EXACT).unwrap();
        assert!(!id.is_nil(), "missing {key}");
        assert_eq!(pat.get_key(id).unwrap(), key.as_bytes());
    }
    assert_eq!(
        pat.lookup("カッター".as_bytes(), SearchFlags::EXACT).unwrap(),
        Id::NIL
    );
}

#[test]
fn add_is_idempotent() {
    let mut pat = trie_with_keys();
    let before = pat.len();
    let id1 = pat.lookup("セナ".as_bytes(), SearchFlags::ADD).unwrap();
    let id2 = pat.lookup("セナ".as_bytes(), SearchFlags::ADD).unwrap();
    assert_eq!(id1, id2);
    assert_eq!(pat.len(), before);
}

#[test]
fn cursor_ascending_is_byte_lexicographic() {
    let pat = trie_with_keys();
    let mut cursor = pat.cursor(None, None, CursorFlags::ASCENDING);
    assert_eq!(
        collect(&mut cursor),
        ["Senna", "セナ", "セナ + Ruby", "セナセナ", "ナセナセ"]
    );
}

#[test]
fn cursor_descending_is_the_reverse() {
    let pat = trie_with_keys();
    let mut cursor = pat.cursor(None, None, CursorFlags::DESCENDING);
    assert_eq!(
        collect(&mut cursor),
        ["ナセナセ", "セナセナ", "セナ + Ruby", "セナ", "Senna"]
    );
}

#[test]
fn cursor_honors_closed_and_open_bounds() {
    let pat = trie_with_keys();
    let min = "セナ".as_bytes();
    let max = "セナセナ".as_bytes();

    let mut closed = pat.cursor(Some(min), Some(max), CursorFlags::ASCENDING);
    assert_eq!(collect(&mut closed), ["セナ", "セナ + Ruby", "セナセナ"]);

    let mut open = pat.cursor(
        Some(min),
        Some(max),
        CursorFlags::ASCENDING | CursorFlags::GT | CursorFlags::LT,
    );
    assert_eq!(collect(&mut open), ["セナ + Ruby"]);

    let mut desc = pat.cursor(Some(min), Some(max), CursorFlags::DESCENDING);
    assert_eq!(collect(&mut desc), ["セナセナ", "セナ + Ruby", "セナ"]);
}

#[test]
fn delete_unsplices_and_recycles_ids() {
    let mut pat = trie_with_keys();
    let doomed = pat.lookup("セナ + Ruby".as_bytes(), SearchFlags::EXACT).unwrap();
    pat.delete("セナ + Ruby".as_bytes()).unwrap();
    assert_eq!(
        pat.lookup("セナ + Ruby".as_bytes(), SearchFlags::EXACT).unwrap(),
        Id::NIL
    );
    let mut cursor = pat.cursor(None, None, CursorFlags::ASCENDING);
    assert_eq!(collect(&mut cursor), ["Senna", "セナ", "セナセナ", "ナセナセ"]);
    // The freed id is handed to the next insertion.
    let reused = pat.lookup(b"newcomer", SearchFlags::ADD).unwrap();
    assert_eq!(reused, doomed);
}

#[test]
fn oversize_and_empty_keys_are_rejected() {
    let mut pat = PatTrie::create(None, 8, PatFlags::empty(), Encoding::Utf8).unwrap();
    assert!(matches!(
        pat.lookup(b"", SearchFlags::ADD),
        Err(QuernError::InvalidArgument(_))
    ));
    assert!(matches!(
        pat.lookup(b"123456789", SearchFlags::ADD),
        Err(QuernError::InvalidArgument(_))
    ));
}

#[test]
fn read_only_rejects_add() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pat");
    {
        let mut pat =
            PatTrie::create(Some(&path), 4096, PatFlags::empty(), Encoding::Utf8).unwrap();
        pat.lookup("セナ".as_bytes(), SearchFlags::ADD).unwrap();
        pat.close().unwrap();
    }
    let mut pat = PatTrie::open_read_only(&path).unwrap();
    assert!(!pat.lookup("セナ".as_bytes(), SearchFlags::EXACT).unwrap().is_nil());
    assert!(matches!(
        pat.lookup(b"other", SearchFlags::ADD),
        Err(QuernError::InvalidArgument(_))
    ));
}

#[test]
fn persistent_trie_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pat");
    let mut ids = Vec::new();
    {
        let mut pat =
            PatTrie::create(Some(&path), 4096, PatFlags::WITH_SIS, Encoding::Utf8).unwrap();
        for key in KEYS {
            ids.push(pat.lookup(key.as_bytes(), SearchFlags::ADD).unwrap());
        }
        pat.close().unwrap();
    }
    let mut pat = PatTrie::open(&path).unwrap();
    for (key, id) in KEYS.iter().zip(&ids) {
        assert_eq!(pat.lookup(key.as_bytes(), SearchFlags::EXACT).unwrap(), *id);
    }
    // sis links survive: entries ending in "ナ" are reachable again.
    let mut hits = Hash::create(
        None,
        4,
        0,
        quern_hash::HashFlags::TINY,
        Encoding::Utf8,
    )
    .unwrap();
    pat.suffix_search("ナ".as_bytes(), &mut hits).unwrap();
    assert_eq!(hits.len(), 4);
}

#[test]
fn bad_magic_reports_corrupt_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pat");
    {
        let mut file = quern_io::SegFile::create(&path, 96, 4096, 4).unwrap();
        file.write_meta(b"WRONG-ID").unwrap();
        file.flush().unwrap();
    }
    assert!(matches!(
        PatTrie::open(&path),
        Err(QuernError::FileCorrupt { .. })
    ));
}

proptest! {
    // Cursor output always equals the sorted live key set, whatever the
    // insertion order and deletions.
    #[test]
    fn cursor_matches_sorted_model(
        keys in proptest::collection::vec(
            proptest::collection::vec(97u8..100, 1..6), 1..48),
        drops in proptest::collection::vec(any::<bool>(), 48),
    ) {
        let mut pat = PatTrie::create(None, 64, PatFlags::empty(), Encoding::None).unwrap();
        let mut model = std::collections::BTreeSet::new();
        for key in &keys {
            pat.lookup(key, SearchFlags::ADD).unwrap();
            model.insert(key.clone());
        }
        for (i, key) in keys.iter().enumerate() {
            if drops[i % drops.len()] && model.remove(key) {
                pat.delete(key).unwrap();
            }
        }
        let mut cursor = pat.cursor(None, None, CursorFlags::ASCENDING);
        let mut walked = Vec::new();
        while !cursor.next().is_nil() {
            walked.push(cursor.key().unwrap().to_vec());
        }
        let expected: Vec<Vec<u8>> = model.into_iter().collect();
        prop_assert_eq!(walked, expected);
    }

    // lcp_search agrees with a brute-force longest-prefix scan.
    #[test]
    fn lcp_matches_brute_force(
        keys in proptest::collection::vec(
            proptest::collection::vec(97u8..100, 1..5), 1..24),
        query in proptest::collection::vec(97u8..100, 1..6),
    ) {
        let mut pat = PatTrie::create(None, 64, PatFlags::empty(), Encoding::None).unwrap();
        for key in &keys {
            pat.lookup(key, SearchFlags::ADD).unwrap();
        }
        let brute = keys
            .iter()
            .filter(|k| query.starts_with(k))
            .max_by_key(|k| k.len())
            .cloned();
        let got = pat.lcp_search(&query).unwrap();
        let got_key = pat.get_key(got).map(<[u8]>::to_vec);
        prop_assert_eq!(got_key, brute);
    }
}
