mod common;

use common::entry;
use feed_enricher::content;
use feed_enricher::rules::{Rule, RuleSet, Verdict};
use feed_enricher::types::{Category, EnricherError, Feed};

fn feed() -> Feed {
    Feed {
        id: 1,
        title: "Hacker Daily".to_string(),
        site_url: "https://hacker.example.com".to_string(),
        category: Some(Category {
            id: 3,
            title: "Technology".to_string(),
        }),
    }
}

fn rules(allow: &[&str], deny: &[&str]) -> RuleSet {
    let allow: Vec<String> = allow.iter().map(|s| s.to_string()).collect();
    let deny: Vec<String> = deny.iter().map(|s| s.to_string()).collect();
    RuleSet::compile(&allow, &deny).expect("rules compile")
}

#[test]
fn deny_takes_precedence_over_allow() {
    let set = rules(&["EntryTitle=Rust"], &["EntryTitle=Rust"]);
    let e = entry(1, "Rust 2.0 released", "<p>big news</p>");
    assert_eq!(set.evaluate(&e, &feed()), Verdict::Reject);
}

#[test]
fn empty_allow_set_defaults_to_accept() {
    let set = rules(&[], &["EntryTitle=sponsored"]);
    let e = entry(1, "An ordinary article", "<p>text</p>");
    assert_eq!(set.evaluate(&e, &feed()), Verdict::Accept);
}

#[test]
fn allow_rule_must_match_when_present() {
    let set = rules(&["FeedCategoryTitle=Technology"], &[]);
    let e = entry(1, "Anything", "<p>text</p>");
    assert_eq!(set.evaluate(&e, &feed()), Verdict::Accept);

    let set = rules(&["FeedCategoryTitle=Sports"], &[]);
    assert_eq!(set.evaluate(&e, &feed()), Verdict::Reject);
}

#[test]
fn case_insensitive_inline_flag() {
    let set = rules(&["EntryTitle=(?i)breaking"], &[]);
    let e = entry(1, "BREAKING: something happened", "<p>text</p>");
    assert_eq!(set.evaluate(&e, &feed()), Verdict::Accept);
}

#[test]
fn never_match_is_inert_on_both_sides() {
    let set = rules(&[], &["NeverMatch="]);
    let e = entry(1, "Anything", "<p>text</p>");
    assert_eq!(set.evaluate(&e, &feed()), Verdict::Accept);

    // As the only allow rule it can never accept, so everything is rejected.
    let set = rules(&["NeverMatch="], &[]);
    assert_eq!(set.evaluate(&e, &feed()), Verdict::Reject);
}

#[test]
fn tag_rule_matches_joined_tags() {
    let set = rules(&["EntryTag=rust"], &[]);
    let mut e = entry(1, "Title", "<p>text</p>");
    e.tags = vec!["news".to_string(), "rust".to_string()];
    assert_eq!(set.evaluate(&e, &feed()), Verdict::Accept);
}

#[test]
fn content_rule_sees_text_not_markup() {
    let set = rules(&["EntryContent=div"], &[]);
    let e = entry(1, "Title", "<div>plain words only</div>");
    // "div" only appears in markup, which the extractor strips.
    assert_eq!(set.evaluate(&e, &feed()), Verdict::Reject);
}

#[test]
fn between_operator_is_a_closed_interval() {
    let feed = feed();
    let words = |n: usize| {
        let body: Vec<String> = (0..n).map(|i| format!("word{i}")).collect();
        entry(1, "Title", &format!("<p>{}</p>", body.join(" ")))
    };

    let set = RuleSet::compile(&["EntryContentLength=between:50,200".to_string()], &[])
        .expect("rules compile");
    assert_eq!(set.evaluate(&words(49), &feed), Verdict::Reject);
    assert_eq!(set.evaluate(&words(50), &feed), Verdict::Accept);
    assert_eq!(set.evaluate(&words(200), &feed), Verdict::Accept);
    assert_eq!(set.evaluate(&words(201), &feed), Verdict::Reject);
}

#[test]
fn numeric_operators() {
    let accepts = |spec: &str, n: usize| {
        let set = RuleSet::compile(&[format!("EntryContentLength={spec}")], &[])
            .expect("rules compile");
        let body: Vec<String> = (0..n).map(|i| format!("word{i}")).collect();
        let e = entry(1, "Title", &format!("<p>{}</p>", body.join(" ")));
        set.evaluate(&e, &feed()) == Verdict::Accept
    };

    assert!(accepts("gt:10", 11));
    assert!(!accepts("gt:10", 10));
    assert!(accepts("ge:10", 10));
    assert!(!accepts("ge:10", 9));
    assert!(accepts("lt:10", 9));
    assert!(!accepts("lt:10", 10));
    assert!(accepts("le:10", 10));
    assert!(!accepts("le:10", 11));
    assert!(accepts("eq:10", 10));
    assert!(!accepts("eq:10", 11));
}

#[test]
fn malformed_rules_fail_at_compile_time() {
    let cases = [
        "EntryTitle",                        // no separator
        "UnknownField=pattern",              // unsupported field
        "EntryTitle=",                       // empty pattern
        "EntryTitle=[unclosed",              // bad regex
        "EntryContentLength=huge",           // missing operator
        "EntryContentLength=gt:abc",         // non-numeric threshold
        "EntryContentLength=between:200",    // missing upper bound
        "EntryContentLength=between:200,50", // inverted bounds
        "EntryContentLength=near:10",        // unknown operator
    ];
    for raw in cases {
        let err = Rule::parse(raw).expect_err(raw);
        assert!(matches!(err, EnricherError::Rule { .. }), "{raw}: {err}");
    }
}

#[test]
fn token_count_is_script_fair() {
    // Whitespace-delimited words and bare ideographs each count as one token.
    assert_eq!(content::token_count("one two three four five"), 5);
    assert_eq!(content::token_count("这是一个测试"), 6);
    assert_eq!(content::token_count("mixed 测试 words"), 4);
}

#[test]
fn content_tokens_ignore_invisible_blocks() {
    let html = "<p>visible words here</p><script>var hidden = 'lots of tokens';</script>";
    assert_eq!(content::content_tokens(html), 3);
}
