use super::*;

const TEXT: &str = "Groonga is an embeddable fulltext search engine, which you can use in\n\
conjunction with various scripting languages and databases. Groonga is\n\
an inverted index based engine, & combines the best of n-gram\n\
indexing and word indexing to achieve fast, precise searches. While\n\
groonga codebase is rather compact it is scalable enough to handle large\n\
amounts of data and queries.";

const TEXT_JA: &str = "Groongaは組み込み型の全文検索エンジンです。DBMSやスクリプト言語処理系等に\n\
組み込むことによって、その全文検索機能を強化することができます。n-gram\n\
インデックスと単語インデックスの特徴を兼ね備えた、高速かつ高精度な転置\n\
インデックスタイプのエンジンです。コンパクトな実装ですが、大規模な文書\n\
量と検索要求を処理できるように設計されています。また、純粋なn-gramイン\n\
デックスの作成も可能です。";

fn open_snip(flags: SnipFlags, mapping: SnipMapping) -> Snip {
    Snip::new(Encoding::Utf8, flags, 100, 10, b"[[", b"]]", mapping).expect("open snip")
}

fn result_string(snip: &Snip, index: u32) -> String {
    String::from_utf8(snip.get_result(index).expect("result")).expect("utf8 result")
}

#[test]
fn simple_exec() {
    let mut snip = open_snip(SnipFlags::empty(), SnipMapping::None);
    snip.add_cond(b"Groonga", b"", b"").unwrap();

    let (n_results, max_tagged_len) = snip.exec(TEXT.as_bytes()).unwrap();
    assert_eq!(n_results, 2);
    assert_eq!(max_tagged_len, 105);

    let first = result_string(&snip, 0);
    assert_eq!(
        first,
        "[[Groonga]] is an embeddable fulltext search engine, which you can use in\n\
         conjunction with various scrip"
    );
    assert_eq!(first.len(), 104);

    let second = result_string(&snip, 1);
    assert!(second.contains("[[Groonga]] is\nan inverted index based engine"));
    assert_eq!(second.len(), 104);
}

#[test]
fn every_result_fits_max_tagged_len() {
    let mut snip = open_snip(SnipFlags::empty(), SnipMapping::None);
    snip.add_cond(b"in", b"", b"").unwrap();
    let (n_results, max_tagged_len) = snip.exec(TEXT.as_bytes()).unwrap();
    assert!(n_results > 0);
    for i in 0..n_results {
        let rendered = snip.get_result(i).unwrap();
        assert!(
            rendered.len() + 1 <= max_tagged_len as usize,
            "result {i} length {} exceeds {max_tagged_len}",
            rendered.len()
        );
    }
}

#[test]
fn customized_tags() {
    let mut snip = open_snip(SnipFlags::empty(), SnipMapping::None);
    snip.add_cond(b"engine", b"((*", b"*))").unwrap();

    let (n_results, max_tagged_len) = snip.exec(TEXT.as_bytes()).unwrap();
    assert_eq!(n_results, 2);
    assert_eq!(max_tagged_len, 107);

    let first = result_string(&snip, 0);
    assert_eq!(
        first,
        "Groonga is an embeddable fulltext search ((*engine*)), which you can use in\n\
         conjunction with various scrip"
    );
    assert_eq!(first.len(), 106);
}

#[test]
fn multiple_conditions_use_their_own_tags() {
    let mut snip = open_snip(SnipFlags::empty(), SnipMapping::None);
    snip.add_cond(b"fulltext", b"((*", b"*))").unwrap();
    // Empty tags fall back to the snip defaults.
    snip.add_cond(b"groonga", b"", b"").unwrap();

    let (n_results, max_tagged_len) = snip.exec(TEXT.as_bytes()).unwrap();
    assert_eq!(n_results, 2);
    assert_eq!(max_tagged_len, 107);

    assert_eq!(
        result_string(&snip, 0),
        "Groonga is an embeddable ((*fulltext*)) search engine, which you can use in\n\
         conjunction with various scrip"
    );
    assert_eq!(
        result_string(&snip, 1),
        "xing to achieve fast, precise searches. While\n\
         [[groonga]] codebase is rather compact it is scalable enou"
    );
}

#[test]
fn normalize_matches_across_a_line_break() {
    let keyword = "転置インデックス";

    let mut plain = open_snip(SnipFlags::empty(), SnipMapping::None);
    plain.add_cond(keyword.as_bytes(), b"", b"").unwrap();
    let (n_results, _) = plain.exec(TEXT_JA.as_bytes()).unwrap();
    assert_eq!(n_results, 0);

    let mut folded = open_snip(SnipFlags::NORMALIZE, SnipMapping::None);
    folded.add_cond(keyword.as_bytes(), b"", b"").unwrap();
    let (n_results, max_tagged_len) = folded.exec(TEXT_JA.as_bytes()).unwrap();
    assert_eq!(n_results, 1);
    assert_eq!(max_tagged_len, 105);

    let rendered = result_string(&folded, 0);
    assert_eq!(
        rendered,
        "備えた、高速かつ高精度な[[転置\nインデックス]]タイプのエンジンです。コン"
    );
    assert_eq!(rendered.len(), 104);
}

#[test]
fn html_mapping_escapes_outside_keyword_spans() {
    let mut snip = open_snip(SnipFlags::empty(), SnipMapping::Html);
    snip.add_cond(b"indexing", b"<<", b"").unwrap();

    let (n_results, max_tagged_len) = snip.exec(TEXT.as_bytes()).unwrap();
    assert_eq!(n_results, 1);
    assert_eq!(max_tagged_len, 113);

    let rendered = result_string(&snip, 0);
    assert_eq!(
        rendered,
        "x based engine, &amp; combines the best of n-gram\n\
         <<indexing]] and word <<indexing]] to achieve fast, precise se"
    );
    assert_eq!(rendered.len(), 112);
}

#[test]
fn result_index_out_of_range_is_rejected() {
    let mut snip = open_snip(SnipFlags::empty(), SnipMapping::None);
    snip.add_cond(b"index", b"", b"").unwrap();
    let (n_results, _) = snip.exec(TEXT.as_bytes()).unwrap();
    assert!(n_results >= 1);
    assert!(snip.get_result(0).is_ok());
    assert!(matches!(
        snip.get_result(n_results),
        Err(QuernError::InvalidArgument(_))
    ));
}

#[test]
fn exec_with_no_conditions_finds_nothing() {
    let mut snip = open_snip(SnipFlags::empty(), SnipMapping::None);
    let (n_results, max_tagged_len) = snip.exec(TEXT.as_bytes()).unwrap();
    assert_eq!(n_results, 0);
    assert_eq!(max_tagged_len, 0);
}

#[test]
fn max_results_bounds_are_enforced() {
    for bad in [0u32, MAX_RESULTS + 1] {
        assert!(matches!(
            Snip::new(
                Encoding::Utf8,
                SnipFlags::empty(),
                100,
                bad,
                b"[[",
                b"]]",
                SnipMapping::None,
            ),
            Err(QuernError::InvalidArgument(_))
        ));
    }
    assert!(
        Snip::new(
            Encoding::Utf8,
            SnipFlags::empty(),
            100,
            MAX_RESULTS,
            b"[[",
            b"]]",
            SnipMapping::None,
        )
        .is_ok()
    );
}

#[test]
fn cond_limits_are_enforced() {
    let mut snip = open_snip(SnipFlags::empty(), SnipMapping::None);
    assert!(matches!(
        snip.add_cond(b"", b"", b""),
        Err(QuernError::InvalidArgument(_))
    ));
    // Keyword longer than the window width never fits.
    let oversize = vec![b'a'; 101];
    assert!(matches!(
        snip.add_cond(&oversize, b"", b""),
        Err(QuernError::InvalidArgument(_))
    ));
    assert!(snip.add_cond(&oversize[..100], b"", b"").is_ok());

    for _ in 1..MAX_CONDS {
        snip.add_cond(b"keyword", b"", b"").unwrap();
    }
    assert!(matches!(
        snip.add_cond(b"keyword", b"", b""),
        Err(QuernError::InvalidArgument(_))
    ));
}

#[test]
fn result_count_is_capped_at_max_results() {
    let mut snip = Snip::new(
        Encoding::Utf8,
        SnipFlags::empty(),
        4,
        2,
        b"[",
        b"]",
        SnipMapping::None,
    )
    .unwrap();
    snip.add_cond(b"ab", b"", b"").unwrap();
    let (n_results, _) = snip.exec(b"ab..ab..ab..ab").unwrap();
    assert_eq!(n_results, 2);
}

#[test]
fn skip_leading_spaces_advances_the_window() {
    let mut snip = Snip::new(
        Encoding::Utf8,
        SnipFlags::SKIP_LEADING_SPACES,
        10,
        4,
        b"[",
        b"]",
        SnipMapping::None,
    )
    .unwrap();
    snip.add_cond(b"word", b"", b"").unwrap();
    let (n_results, _) = snip.exec(b"aaaaaaaa   word tail").unwrap();
    assert_eq!(n_results, 1);
    let rendered = snip.get_result(0).unwrap();
    assert!(rendered.starts_with(b"[word]"), "{rendered:?}");
}
