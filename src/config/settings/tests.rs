use super::*;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.encoder.backend, EncoderBackend::Ollama);
    assert_eq!(config.encoder.host, "localhost");
    assert_eq!(config.encoder.port, 11434);
    assert_eq!(config.encoder.model, "nomic-embed-text:latest");
    assert_eq!(config.retriever.batch_size, 64);
    assert_eq!(config.retriever.save_every, 1_000_000);
    assert_eq!(config.retriever.oversample, 10);
    assert_eq!(config.generation.max_attempts, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.encoder.protocol = "ftp".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidProtocol(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.encoder.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.encoder.model = "  ".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.retriever.batch_size = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.retriever.save_every = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidSaveEvery(0))
    ));

    let mut invalid_config = config.clone();
    invalid_config.retriever.oversample = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.generation.endpoint = "not a url".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.generation.max_attempts = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidMaxAttempts(0))
    ));
}

#[test]
fn dimension_is_checked_only_for_hashing_backend() {
    let mut config = Config::default();
    config.encoder.dimension = 0;
    assert_eq!(config.encoder.backend, EncoderBackend::Ollama);
    assert!(config.validate().is_ok());

    config.encoder.backend = EncoderBackend::Hashing;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidEmbeddingDimension(0))
    ));

    config.encoder.dimension = 384;
    assert!(config.validate().is_ok());
}

#[test]
fn encoder_url_generation() {
    let config = Config::default();
    let url = config
        .encoder_url()
        .expect("should generate encoder url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn generation_endpoint_keeps_prefix() {
    let config = GenerationServiceConfig::default();
    let url = config.endpoint_url().expect("endpoint should parse");
    let joined = url
        .join("chat/completions")
        .expect("relative join should work");
    assert_eq!(joined.as_str(), "http://localhost:8000/v1/chat/completions");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let mut parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    parsed_config.base_dir = config.base_dir.clone();
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let toml_str = r#"
        [encoder]
        backend = "hashing"
        dimension = 128

        [retriever]
        save_every = 500
    "#;

    let config: Config = toml::from_str(toml_str).expect("should parse partial toml");
    assert_eq!(config.encoder.backend, EncoderBackend::Hashing);
    assert_eq!(config.encoder.dimension, 128);
    assert_eq!(config.encoder.port, 11434);
    assert_eq!(config.retriever.save_every, 500);
    assert_eq!(config.retriever.batch_size, 64);
    assert_eq!(config.generation, GenerationServiceConfig::default());
}

#[test]
fn setter_validation() {
    let mut config = EncoderConfig::default();

    assert!(config.set_batch_size(128).is_ok());
    assert_eq!(config.batch_size, 128);
    assert!(config.set_batch_size(0).is_err());
    assert!(config.set_batch_size(1001).is_err());

    assert!(config.set_model("contriever".to_string()).is_ok());
    assert!(config.set_model(String::new()).is_err());
    assert_eq!(config.model, "contriever");
}

#[test]
fn load_missing_config_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("missing config should load defaults");
    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.encoder, EncoderConfig::default());
}

#[test]
fn save_and_reload() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.encoder.backend = EncoderBackend::Hashing;
    config.encoder.device = Device::Accelerator;
    config.generation.api_key = Some("secret".to_string());
    config.save().expect("should save config");

    let loaded = Config::load(temp_dir.path()).expect("should reload config");
    assert_eq!(config, loaded);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(
        temp_dir.path().join("config.toml"),
        "[retriever]\nsave_every = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn index_dir_layout() {
    let config = Config {
        base_dir: PathBuf::from("/tmp/hop"),
        ..Config::default()
    };
    assert_eq!(config.index_dir("qa"), PathBuf::from("/tmp/hop/index/qa"));
}
