use super::*;

#[test]
fn encoder_configuration() {
    let config = EncoderConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        device: Device::Accelerator,
        ..EncoderConfig::default()
    };
    let encoder = OllamaEncoder::new(&config).expect("Failed to create encoder");

    assert_eq!(encoder.model(), "test-model");
    assert_eq!(encoder.device, Device::Accelerator);
    assert_eq!(encoder.base_url.host_str(), Some("test-host"));
    assert_eq!(encoder.base_url.port(), Some(1234));
    assert_eq!(encoder.retry.max_attempts, DEFAULT_RETRY_ATTEMPTS);
    assert_eq!(encoder.dimension_hint(), None);
}

#[test]
fn encoder_builder_methods() {
    let encoder = OllamaEncoder::new(&EncoderConfig::default())
        .expect("Failed to create encoder")
        .with_timeout(Duration::from_secs(60))
        .with_retry_policy(RetryPolicy::new(5, Duration::from_millis(10)));

    assert_eq!(encoder.retry.max_attempts, 5);
    assert_eq!(encoder.retry.backoff, Duration::from_millis(10));
}

#[test]
fn empty_input_skips_the_network() {
    let config = EncoderConfig {
        host: "unreachable.invalid".to_string(),
        ..EncoderConfig::default()
    };
    let encoder = OllamaEncoder::new(&config).expect("Failed to create encoder");

    let vectors = encoder.encode(&[], 8).expect("empty input should not fail");
    assert!(vectors.is_empty());
}

#[test]
fn request_serializes_as_input_array() {
    let inputs = vec!["a".to_string(), "b".to_string()];
    let request = BatchEmbedRequest {
        model: "m",
        inputs: &inputs,
        truncate: true,
    };

    let json: serde_json::Value = serde_json::to_value(&request).expect("serialize");
    assert_eq!(json["model"], "m");
    assert_eq!(json["input"], serde_json::json!(["a", "b"]));
    assert_eq!(json["truncate"], true);
}

#[test]
fn server_errors_are_retryable_client_errors_are_not() {
    assert!(is_retryable(&ureq::Error::StatusCode(503)));
    assert!(is_retryable(&ureq::Error::ConnectionFailed));
    assert!(!is_retryable(&ureq::Error::StatusCode(404)));
    assert!(!is_retryable(&ureq::Error::StatusCode(400)));
}
