//! Tests for block reassembly.

use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const LIMIT: usize = 256;

fn block(json: &str) -> String {
    format!("{START_SENTINEL}{json}{END_SENTINEL}")
}

/// Feed `input` split at the given chunk sizes and finish.
fn run_chunks(input: &str, sizes: &mut dyn Iterator<Item = usize>) -> Vec<Segment> {
    let chars: Vec<char> = input.chars().collect();
    let mut reassembler = Reassembler::new(LIMIT);
    let mut pos = 0;
    while pos < chars.len() {
        let n = sizes.next().unwrap_or(1).max(1).min(chars.len() - pos);
        let chunk: String = chars[pos..pos + n].iter().collect();
        reassembler.push_str(&chunk);
        pos += n;
    }
    let mut out = Vec::new();
    reassembler.finish(&mut out);
    reassembler.into_visible()
}

/// Blocks replaced by a fixed placeholder.
fn with_placeholders(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| match s {
            Segment::Text(t) => t.clone(),
            Segment::Block(_) => "<BLOCK>".to_string(),
        })
        .collect()
}

#[test]
fn test_plain_text_passes_through() {
    let mut r = Reassembler::new(LIMIT);
    let out = r.push_str("hello world");
    let text: String = out.iter().map(ToString::to_string).collect();
    assert_eq!(text, "hello world");
    assert_eq!(r.visible(), &[Segment::Text("hello world".into())]);
    assert_eq!(r.state(), State::Plain);
}

#[test]
fn test_five_fragment_json_scenario() {
    let mut r = Reassembler::new(LIMIT);
    let mut out = Vec::new();
    for fragment in [
        "hello ",
        START_SENTINEL,
        r#"{"type":"json","content":{"a":1}}"#,
        END_SENTINEL,
        " world",
    ] {
        out.extend(r.push_str(fragment));
    }
    r.finish(&mut out);

    assert_eq!(
        r.visible(),
        &[
            Segment::Text("hello ".into()),
            Segment::Block(Rendered::Json("{\n  \"a\": 1\n}".into())),
            Segment::Text(" world".into()),
        ]
    );
    assert_eq!(r.visible_text(), "hello {\n  \"a\": 1\n} world");
}

#[test]
fn test_sentinel_prefix_never_shown_early() {
    let mut r = Reassembler::new(LIMIT);
    let out = r.push_str("a!#blo");
    assert_eq!(out, vec![Segment::Text("a".into())]);
    assert_eq!(r.pending(), "!#blo");

    // Not a sentinel after all: released verbatim.
    let out = r.push_str("x");
    let text: String = out.iter().map(ToString::to_string).collect();
    assert_eq!(text, "!#blox");
    assert_eq!(r.visible_text(), "a!#blox");
}

#[test]
fn test_state_transitions() {
    let mut r = Reassembler::new(LIMIT);
    r.push_str(START_SENTINEL);
    assert!(r.is_buffering());
    assert_eq!(r.pending(), START_SENTINEL);

    r.push_str(r#"{"type":"json","content":[]}"#);
    assert!(r.is_buffering());

    r.push_str(END_SENTINEL);
    assert_eq!(r.state(), State::Plain);
    assert_eq!(r.pending(), "");
}

#[test]
fn test_back_to_back_blocks() {
    let input = format!(
        "{}{}",
        block(r#"{"type":"json","content":1}"#),
        block(r#"{"type":"image","content":{"src":"a.png"}}"#)
    );
    let mut r = Reassembler::new(LIMIT);
    r.push_str(&input);
    let visible = r.visible();
    assert_eq!(visible.len(), 2);
    assert_eq!(visible[0], Segment::Block(Rendered::Json("1".into())));
    assert!(matches!(&visible[1], Segment::Block(Rendered::Media { .. })));
    assert_eq!(r.visible_text(), "1[image] a.png");
}

#[test]
fn test_back_to_back_blocks_in_one_fragment_with_tail() {
    let input = format!(
        "{}{}tail",
        block(r#"{"type":"json","content":"x"}"#),
        block(r#"{"type":"json","content":"y"}"#)
    );
    let mut r = Reassembler::new(LIMIT);
    let out = r.push_str(&input);
    assert_eq!(
        out,
        vec![
            Segment::Block(Rendered::Json("\"x\"".into())),
            Segment::Block(Rendered::Json("\"y\"".into())),
            Segment::Text("t".into()),
            Segment::Text("a".into()),
            Segment::Text("i".into()),
            Segment::Text("l".into()),
        ]
    );
}

#[test]
fn test_unterminated_block_flushed_verbatim() {
    let junk: String = "z".repeat(LIMIT);
    let input = format!("before {START_SENTINEL}{junk} after");
    let mut r = Reassembler::new(LIMIT);
    r.push_str(&input);
    let mut out = Vec::new();
    r.finish(&mut out);

    assert_eq!(r.state(), State::Plain);
    assert_eq!(r.visible_text(), input);
    assert!(r.visible().iter().all(|s| matches!(s, Segment::Text(_))));
}

#[test]
fn test_overflow_flush_happens_before_stream_end() {
    let mut r = Reassembler::new(16);
    r.push_str(START_SENTINEL);
    r.push_str("0123456");
    assert!(r.is_buffering());
    let out = r.push_str("7");
    assert!(!r.is_buffering());
    assert_eq!(out, vec![Segment::Text(format!("{START_SENTINEL}01234567"))]);
}

#[test]
fn test_stream_end_inside_block_is_not_lost() {
    let mut r = Reassembler::new(LIMIT);
    r.push_str("x !#block#!{\"type\":");
    let mut out = Vec::new();
    r.finish(&mut out);
    assert_eq!(r.visible_text(), "x !#block#!{\"type\":");
}

#[test]
fn test_finish_releases_held_prefix() {
    let mut r = Reassembler::new(LIMIT);
    r.push_str("end!#");
    let mut out = Vec::new();
    r.finish(&mut out);
    assert_eq!(out, vec![Segment::Text("!#".into())]);
    assert_eq!(r.visible_text(), "end!#");
}

#[test]
fn test_malformed_interior_isolated() {
    let input = format!(
        "a{}b{}c",
        block("{broken"),
        block(r#"{"type":"json","content":true}"#)
    );
    let mut r = Reassembler::new(LIMIT);
    r.push_str(&input);

    let notices: Vec<_> = r
        .visible()
        .iter()
        .filter(|s| matches!(s, Segment::Block(b) if b.is_notice()))
        .collect();
    assert_eq!(notices.len(), 1);
    assert_eq!(with_placeholders(r.visible()), "a<BLOCK>b<BLOCK>c");
    assert_eq!(
        r.visible().last(),
        Some(&Segment::Text("c".into()))
    );
    assert!(matches!(
        &r.visible()[3],
        Segment::Block(Rendered::Json(j)) if j == "true"
    ));
}

#[test]
fn test_empty_block_is_an_error_not_a_hang() {
    let mut r = Reassembler::new(LIMIT);
    r.push_str(&format!("{START_SENTINEL}{END_SENTINEL}!"));
    assert_eq!(r.state(), State::Plain);
    let mut out = Vec::new();
    r.finish(&mut out);
    assert!(matches!(&r.visible()[0], Segment::Block(Rendered::Error(_))));
    assert_eq!(r.visible()[1], Segment::Text("!".into()));
}

#[test]
fn test_end_sentinel_does_not_reuse_start_chars() {
    // "!#block#!" followed by "#/block#!" would end in "!#/block#!" if the
    // start sentinel's trailing '!' were reused.
    let mut r = Reassembler::new(LIMIT);
    r.push_str("!#block#!#/block#!");
    assert!(r.is_buffering());
}

#[test]
fn test_multibyte_text_around_blocks() {
    let input = format!("caf\u{e9} {} \u{1F600}!", block(r#"{"type":"json","content":null}"#));
    let mut r = Reassembler::new(LIMIT);
    r.push_str(&input);
    let mut out = Vec::new();
    r.finish(&mut out);
    assert_eq!(with_placeholders(r.visible()), "caf\u{e9} <BLOCK> \u{1F600}!");
}

#[test]
fn test_chunking_independence() {
    let texts = [
        "Intro text with ! and # marks, ",
        "!#blo almost a sentinel ",
        "\u{4f60}\u{597d} ",
        "",
        "trailing !#",
    ];
    let blocks = [
        block(r#"{"type":"json","content":{"k":[1,2,3]}}"#),
        block(r#"{"type":"markdown","content":"**bold**"}"#),
        block(r#"{"type":"video","content":{}}"#),
        block("oops"),
    ];

    let mut input = String::new();
    let mut expected = String::new();
    for (i, text) in texts.iter().enumerate() {
        input.push_str(text);
        expected.push_str(text);
        if let Some(b) = blocks.get(i) {
            input.push_str(b);
            expected.push_str("<BLOCK>");
        }
    }

    let reference = run_chunks(&input, &mut std::iter::repeat(1));
    assert_eq!(with_placeholders(&reference), expected);

    let whole = run_chunks(&input, &mut std::iter::once(usize::MAX));
    assert_eq!(whole, reference);

    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..50 {
        let mut sizes = std::iter::from_fn(|| Some(rng.random_range(1..=24)));
        assert_eq!(run_chunks(&input, &mut sizes), reference);
    }
}

#[test]
fn test_partial_start_len() {
    assert_eq!(partial_start_len(""), 0);
    assert_eq!(partial_start_len("abc"), 0);
    assert_eq!(partial_start_len("ab!"), 1);
    assert_eq!(partial_start_len("a!#bl"), 4);
    assert_eq!(partial_start_len("!!"), 1);
    assert_eq!(partial_start_len("\u{e9}!#"), 2);
}
