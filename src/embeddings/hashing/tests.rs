use super::*;
use crate::embeddings::pooling::l2_norm;

fn encoder() -> HashingEncoder {
    HashingEncoder::new(128, 32, Device::Cpu)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn vectors_are_unit_norm() {
    let texts = vec![
        "Paris is the capital of France.".to_string(),
        String::new(),
        "   ".to_string(),
        "Ünïcödé wörds and numbers 1928".to_string(),
    ];

    let vectors = encoder().encode(&texts, 8).expect("should encode");
    assert_eq!(vectors.len(), texts.len());
    for vector in &vectors {
        assert_eq!(vector.len(), 128);
        assert!((l2_norm(vector) - 1.0).abs() < 1e-5);
    }
}

#[test]
fn encoding_is_deterministic_and_order_preserving() {
    let texts: Vec<String> = (0..40).map(|i| format!("document number {i}")).collect();

    let large_batch = encoder().encode(&texts, 40).expect("should encode");
    let small_batch = encoder().encode(&texts, 3).expect("should encode");
    assert_eq!(large_batch, small_batch);

    let single = encoder()
        .encode_one("document number 17")
        .expect("should encode single");
    assert_eq!(single, large_batch[17]);
}

#[test]
fn shared_words_score_higher() {
    let enc = encoder();
    let query = enc.encode_one("capital of France").expect("query");
    let related = enc
        .encode_one("Paris is the capital of France.")
        .expect("related");
    let unrelated = enc
        .encode_one("Penicillin was discovered by Alexander Fleming.")
        .expect("unrelated");

    assert!(dot(&query, &related) > dot(&query, &unrelated));
}

#[test]
fn tokenize_truncates_without_error() {
    let enc = HashingEncoder::new(16, 4, Device::Cpu);
    let tokens = enc.tokenize("one two three four five six");
    assert_eq!(tokens, vec!["[CLS]", "one", "two", "three"]);

    let long_text = "word ".repeat(10_000);
    let vectors = enc.encode(&[long_text], 1).expect("long text should encode");
    assert_eq!(vectors.len(), 1);
}

#[test]
fn tokenize_lowercases_words() {
    let tokens = encoder().tokenize("Hello, World!");
    assert_eq!(tokens, vec!["[CLS]", "hello", "world"]);
}

#[test]
fn empty_input_returns_empty_output() {
    let vectors = encoder().encode(&[], 16).expect("should encode nothing");
    assert!(vectors.is_empty());
}

#[test]
fn padding_does_not_change_vectors() {
    let enc = encoder();
    let alone = enc.encode_one("short").expect("alone");
    let batched = enc
        .encode(
            &[
                "short".to_string(),
                "a much longer sentence that forces padding".to_string(),
            ],
            2,
        )
        .expect("batched");

    for (a, b) in alone.iter().zip(&batched[0]) {
        assert!((a - b).abs() < 1e-6);
    }
}
