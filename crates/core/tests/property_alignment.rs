use proptest::prelude::*;
use tmpldiff_core::{
    align_blocks, select_monotonic, similarity, tokenize, AlignConfig, AnchorPair, Lexicon,
    TextBlock, TokenKind, VariableRange,
};

fn block_texts() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[A-Za-z]{1,8}( [A-Za-z0-9:]{1,6}){0,3}", 0..8)
}

fn marked_block_texts() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("(Nome|Valor|Data)?[A-Za-z]{1,8}( [A-Za-z0-9:]{1,6}){0,3}", 0..8)
}

fn marker_lexicon() -> Lexicon {
    Lexicon::builder()
        .add_phrases("nome", ["Nome"], 0.86, false, false)
        .add_phrases("valor", ["Valor"], 0.86, false, false)
        .add_phrases("data", ["Data"], 0.86, false, false)
        .build()
}

fn to_blocks(texts: &[String]) -> Vec<TextBlock> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| TextBlock::from_text(i + 1, i + 1, i + 1, t.clone(), t.clone()))
        .collect()
}

fn candidate() -> impl Strategy<Value = AnchorPair> {
    (0usize..20, 0usize..20, 0.0f64..1.0).prop_map(|(a, b, score)| AnchorPair::new(a, b, score))
}

proptest! {
    #[test]
    fn alignment_covers_every_block_once(a in block_texts(), b in block_texts()) {
        let blocks_a = to_blocks(&a);
        let blocks_b = to_blocks(&b);
        let alignment = align_blocks(&blocks_a, &blocks_b, &Lexicon::default(), &AlignConfig::default());
        let seen_a: Vec<usize> = alignment.pairs.iter().filter_map(|p| p.a_index).collect();
        let seen_b: Vec<usize> = alignment.pairs.iter().filter_map(|p| p.b_index).collect();
        prop_assert_eq!(seen_a, (0..a.len()).collect::<Vec<_>>());
        prop_assert_eq!(seen_b, (0..b.len()).collect::<Vec<_>>());
        prop_assert!(alignment.pairs.iter().all(|p| p.a_index.is_some() || p.b_index.is_some()));
    }

    #[test]
    fn lexicon_alignment_covers_every_block_once(a in marked_block_texts(), b in marked_block_texts()) {
        let blocks_a = to_blocks(&a);
        let blocks_b = to_blocks(&b);
        let alignment = align_blocks(&blocks_a, &blocks_b, &marker_lexicon(), &AlignConfig::default());
        let seen_a: Vec<usize> = alignment.pairs.iter().filter_map(|p| p.a_index).collect();
        let seen_b: Vec<usize> = alignment.pairs.iter().filter_map(|p| p.b_index).collect();
        prop_assert_eq!(seen_a, (0..a.len()).collect::<Vec<_>>());
        prop_assert_eq!(seen_b, (0..b.len()).collect::<Vec<_>>());
        prop_assert!(alignment.lexicon.used_in_final_anchors <= alignment.anchors.len());
        prop_assert!(alignment.lexicon.used_in_final_anchors <= alignment.lexicon.accepted);
        for pair in alignment.anchors.windows(2) {
            prop_assert!(pair[0].a_index < pair[1].a_index);
            prop_assert!(pair[0].b_index < pair[1].b_index);
        }
    }

    #[test]
    fn anchor_chains_strictly_increase(candidates in prop::collection::vec(candidate(), 0..30)) {
        let chain = select_monotonic(&candidates);
        prop_assert_eq!(chain.is_empty(), candidates.is_empty());
        for pair in chain.windows(2) {
            prop_assert!(pair[0].a_index < pair[1].a_index);
            prop_assert!(pair[0].b_index < pair[1].b_index);
        }
    }

    #[test]
    fn similarity_is_symmetric(a in "[a-z ]{0,20}", b in "[a-z ]{0,20}") {
        prop_assert!((similarity(&a, &b) - similarity(&b, &a)).abs() < 1e-12);
        prop_assert!((similarity(&a, &a) - 1.0).abs() < 1e-9);
        let s = similarity(&a, &b);
        prop_assert!((0.0..=1.0 + 1e-9).contains(&s));
    }

    #[test]
    fn backoff_keeps_a_valid_range(first in 0usize..500, last in 0usize..500, backoff in 0usize..10) {
        let range = VariableRange { has_value: true, first_start_op: first, last_end_op: last };
        let (start, end) = range.apply_backoff(backoff);
        prop_assert!(start >= 1);
        prop_assert!(end >= start);
    }

    #[test]
    fn nested_literals_stay_one_token(outer in "[a-zA-Z0-9 ]{0,8}", inner in "[a-zA-Z0-9 ]{0,8}") {
        let literal = format!("({outer}({inner})\\({outer})");
        let stream = format!("{literal} Tj");
        let tokens = tokenize(stream.as_bytes());
        prop_assert_eq!(tokens.len(), 2);
        prop_assert_eq!(tokens[0].kind, TokenKind::LiteralString);
        prop_assert_eq!(&tokens[0].text, &literal);
        prop_assert_eq!(tokens[1].kind, TokenKind::Operator);
    }

    #[test]
    fn hex_strings_keep_their_span(hex in "[0-9A-Fa-f]{0,16}") {
        let stream = format!("<{hex}> Tj");
        let tokens = tokenize(stream.as_bytes());
        prop_assert_eq!(tokens.len(), 2);
        prop_assert_eq!(tokens[0].kind, TokenKind::HexString);
        prop_assert_eq!(&tokens[0].text, &format!("<{hex}>"));
        prop_assert_eq!((tokens[0].start, tokens[0].end), (0, hex.len() + 2));
    }
}
