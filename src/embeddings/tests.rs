use super::*;

#[test]
fn batch_size_is_capped_per_device() {
    assert_eq!(Device::Accelerator.effective_batch_size(64), 16);
    assert_eq!(Device::Accelerator.effective_batch_size(8), 8);
    assert_eq!(Device::Cpu.effective_batch_size(64), 64);
    assert_eq!(Device::Cpu.effective_batch_size(500), CPU_BATCH_CAP);
    assert_eq!(Device::Cpu.effective_batch_size(0), 1);
}

#[test]
fn build_hashing_encoder_from_config() {
    let config = EncoderConfig {
        backend: EncoderBackend::Hashing,
        dimension: 96,
        ..EncoderConfig::default()
    };

    let encoder = build_encoder(&config).expect("hashing encoder should build");
    assert_eq!(encoder.dimension_hint(), Some(96));

    let vector = encoder
        .encode_one("capital of France")
        .expect("should encode query");
    assert_eq!(vector.len(), 96);
}

#[test]
fn build_ollama_encoder_from_config() {
    let config = EncoderConfig::default();
    let encoder = build_encoder(&config).expect("ollama encoder should build without network");
    assert_eq!(encoder.dimension_hint(), None);
}

#[test]
fn backend_display_matches_serde_names() {
    assert_eq!(EncoderBackend::Ollama.to_string(), "ollama");
    assert_eq!(EncoderBackend::Hashing.to_string(), "hashing");
    assert_eq!(Device::Accelerator.to_string(), "accelerator");
    assert_eq!(
        serde_json::to_string(&Device::Cpu).expect("should serialize"),
        "\"cpu\""
    );
}
