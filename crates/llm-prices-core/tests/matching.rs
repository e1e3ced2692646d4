use llm_prices_core::matching::{Clause, Pattern};

fn equals(s: &str) -> Clause {
    Clause::Equals(s.to_string())
}

fn starts_with(s: &str) -> Clause {
    Clause::StartsWith(s.to_string())
}

fn regex(s: &str) -> Clause {
    Clause::Regex(Pattern::new(s).expect("valid regex"))
}

#[test]
fn or_of_equals_ignores_case() {
    let clause = Clause::Or(vec![equals("openai"), equals("gpt")]);
    assert!(clause.is_match("GPT"));
    assert!(clause.is_match("OpenAI"));
    assert!(!clause.is_match("gpt-4"));
}

#[test]
fn starts_with_and_equals() {
    assert!(starts_with("gpt-4").is_match("gpt-4o"));
    assert!(!equals("gpt-4").is_match("gpt-4o"));
    assert!(Clause::EndsWith("-mini".into()).is_match("o3-MINI"));
    assert!(Clause::Contains("sonnet".into()).is_match("claude-3-7-sonnet-latest"));
}

#[test]
fn and_requires_every_child() {
    let clause = Clause::And(vec![starts_with("claude-"), Clause::Contains("haiku".into())]);
    assert!(clause.is_match("claude-3-5-haiku-latest"));
    assert!(!clause.is_match("claude-3-5-sonnet"));
    assert!(!clause.is_match("my-haiku"));
}

#[test]
fn regex_searches_anywhere_and_keeps_case() {
    assert!(regex(r"4o-\d{4}").is_match("openai/gpt-4o-2024-08-06"));
    assert!(regex(r"^gpt").is_match("gpt-4"));
    assert!(!regex(r"^gpt").is_match("GPT-4"));
    assert!(regex(r"(?i)^gpt").is_match("GPT-4"));
}

#[test]
fn nested_clauses() {
    let clause = Clause::Or(vec![
        Clause::And(vec![starts_with("gemini-2.5"), Clause::Contains("flash".into())]),
        equals("gemini-pro"),
    ]);
    assert!(clause.is_match("gemini-2.5-flash-preview-05-20"));
    assert!(clause.is_match("Gemini-Pro"));
    assert!(!clause.is_match("gemini-2.5-pro"));
}

#[test]
fn json_form_is_a_single_key_object() {
    let clause: Clause = serde_json::from_str(
        r#"{"or": [{"starts_with": "claude-opus-4"}, {"regex": "^claude-4-opus"}]}"#,
    )
    .unwrap();
    assert!(clause.is_match("claude-4-opus-20250514"));
    let back = serde_json::to_value(&clause).unwrap();
    assert_eq!(back["or"][0]["starts_with"], "claude-opus-4");
    assert_eq!(back["or"][1]["regex"], "^claude-4-opus");
}

#[test]
fn bad_regex_fails_to_parse() {
    assert!(serde_json::from_str::<Clause>(r#"{"regex": "(unclosed"}"#).is_err());
    assert!(serde_json::from_str::<Clause>(r#"{"sounds_like": "gpt"}"#).is_err());
}

#[test]
fn duplicate_children_are_invalid() {
    let clause = Clause::Or(vec![equals("a"), equals("b"), equals("a")]);
    assert!(clause.validate().is_err());
    let nested = Clause::And(vec![Clause::Or(vec![equals("x"), equals("x")]), equals("y")]);
    assert!(nested.validate().is_err());
    assert!(Clause::Or(vec![equals("a"), equals("b")]).validate().is_ok());
}
