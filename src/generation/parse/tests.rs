use super::*;
use serde_json::json;

#[test]
fn whole_text_json_parses_directly() {
    assert_eq!(
        parse_json(r#"  {"answer": "Paris"}  "#),
        ParsedJson::Ok(json!({"answer": "Paris"}))
    );
    assert_eq!(parse_json("[1, 2]"), ParsedJson::Ok(json!([1, 2])));
}

#[test]
fn fenced_code_block_is_extracted() {
    let text = "Here is the result:\n```json\n{\"answer\": \"Paris\", \"confidence\": 0.9}\n```\nHope that helps.";
    assert_eq!(
        parse_json(text),
        ParsedJson::Ok(json!({"answer": "Paris", "confidence": 0.9}))
    );

    let untagged = "```\n[\"a\", \"b\"]\n```";
    assert_eq!(parse_json(untagged), ParsedJson::Ok(json!(["a", "b"])));
}

#[test]
fn balanced_span_inside_prose_is_found() {
    let text = r#"Thought: the capital is Paris. {"thought": "capital of France", "answer": "Paris"} Done."#;
    assert_eq!(
        parse_json(text),
        ParsedJson::Ok(json!({"thought": "capital of France", "answer": "Paris"}))
    );
}

#[test]
fn braces_inside_strings_do_not_end_the_span() {
    let text = r#"Output: {"answer": "use } and { carefully", "n": 1} trailing"#;
    assert_eq!(
        parse_json(text),
        ParsedJson::Ok(json!({"answer": "use } and { carefully", "n": 1}))
    );
}

#[test]
fn trailing_commas_and_raw_newlines_are_cleaned() {
    let text = "Result: {\"items\": [\"a\", \"b\",],\n\"answer\": \"yes\",\n}";
    assert_eq!(
        parse_json(text),
        ParsedJson::Ok(json!({"items": ["a", "b"], "answer": "yes"}))
    );
}

#[test]
fn unparseable_prefix_span_is_skipped() {
    let text = r#"See [ref 1] then {"answer": "42"}"#;
    assert_eq!(parse_json(text), ParsedJson::Ok(json!({"answer": "42"})));
}

#[test]
fn unclosed_bracket_does_not_hide_later_object() {
    let text = r#"Thought [step 1: {"answer": "Paris", "thought": "capital"}"#;
    assert_eq!(
        parse_json(text),
        ParsedJson::Ok(json!({"answer": "Paris", "thought": "capital"}))
    );
}

#[test]
fn unescaped_inner_quotes_are_repaired() {
    assert_eq!(
        parse_json(r#"{"answer": "He said "yes" to it"}"#),
        ParsedJson::Ok(json!({"answer": r#"He said "yes" to it"#}))
    );

    let fenced = "```json\n{\"thought\": \"the \"real\" capital\", \"answer\": \"Paris\"}\n```";
    assert_eq!(
        parse_json(fenced),
        ParsedJson::Ok(json!({"thought": r#"the "real" capital"#, "answer": "Paris"}))
    );
}

#[test]
fn quote_escaping_keeps_valid_json_intact() {
    let valid = r#"{"a": "x \"y\" z", "b": ["c", "d"], "e": 1}"#;
    assert_eq!(escape_inner_quotes(valid), valid);
    assert_eq!(
        escape_inner_quotes(r#"["say "hi" now", "ok"]"#),
        r#"["say \"hi\" now", "ok"]"#
    );
}

#[test]
fn truncated_object_is_malformed() {
    assert_eq!(
        parse_json(r#"The answer: {"answer": "Par"#),
        ParsedJson::MalformedJson
    );
    assert_eq!(parse_json("{answer: Paris}"), ParsedJson::MalformedJson);
}

#[test]
fn prose_without_json_is_not_found() {
    assert_eq!(parse_json("The answer is Paris."), ParsedJson::NotFound);
    assert_eq!(parse_json(""), ParsedJson::NotFound);
    assert_eq!(ParsedJson::NotFound.value(), None);
}

#[test]
fn extract_field_prefers_parsed_json() {
    let text = r#"```json
{"answer": "Paris", "score": 3}
```"#;
    assert_eq!(extract_field(text, "answer").as_deref(), Some("Paris"));
    assert_eq!(extract_field(text, "score").as_deref(), Some("3"));
    assert_eq!(extract_field(text, "missing"), None);
}

#[test]
fn extract_field_falls_back_to_pattern() {
    let broken = r#"{"thought": "the \"capital\" is known", "answer": "Paris" "#;
    assert_eq!(extract_field(broken, "answer").as_deref(), Some("Paris"));
    assert_eq!(
        extract_field(broken, "thought").as_deref(),
        Some(r#"the "capital" is known"#)
    );

    let bare = r#"{"answer": 1889, "unit": "year" oops"#;
    assert_eq!(extract_field(bare, "answer").as_deref(), Some("1889"));
}

#[test]
fn extract_field_searches_arrays_of_objects() {
    let text = r#"[{"question": "Q1"}, {"answer": "A2"}]"#;
    assert_eq!(extract_field(text, "answer").as_deref(), Some("A2"));
}

#[test]
fn string_list_from_array_or_object() {
    assert_eq!(
        extract_string_list(r#"Sub-questions: ["Who directed it?", "When was he born?"]"#),
        vec!["Who directed it?", "When was he born?"]
    );
    assert_eq!(
        extract_string_list(r#"{"questions": ["a", "b"]}"#),
        vec!["a", "b"]
    );
}

#[test]
fn string_list_falls_back_to_quoted_strings() {
    let text = r#"Questions: "Who directed it?", "When was he born?", and "" (broken ["#;
    assert_eq!(
        extract_string_list(text),
        vec!["Who directed it?", "When was he born?"]
    );
    assert!(extract_string_list("nothing quoted here").is_empty());
}
