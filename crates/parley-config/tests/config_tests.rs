use parley_config::{ConfigLoader, ParleyConfig};

#[test]
fn defaults_are_sane() {
    let config = ParleyConfig::default();
    assert_eq!(config.llm.provider, "anthropic");
    assert_eq!(config.refinement.max_iterations, 3);
    assert!((config.refinement.delta_threshold - 0.05).abs() < f64::EPSILON);
    assert!(config.refinement.stop_on_no_high_issues);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn parses_partial_toml_with_defaults() {
    let raw = r#"
        [llm]
        provider = "mock"
        model = "test-model"

        [refinement]
        max_iterations = 5
    "#;
    let config: ParleyConfig = toml::from_str(raw).unwrap();
    assert_eq!(config.llm.provider, "mock");
    assert_eq!(config.llm.model, "test-model");
    assert_eq!(config.refinement.max_iterations, 5);
    // Unspecified sections fall back to defaults
    assert_eq!(config.refinement.num_participants, 3);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn validate_rejects_unknown_provider() {
    let mut config = ParleyConfig::default();
    config.llm.provider = "carrier-pigeon".into();
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_zero_iterations() {
    let mut config = ParleyConfig::default();
    config.llm.provider = "mock".into();
    config.refinement.max_iterations = 0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_out_of_range_threshold() {
    let mut config = ParleyConfig::default();
    config.llm.provider = "mock".into();
    config.refinement.delta_threshold = 1.5;
    assert!(config.validate().is_err());
    config.refinement.delta_threshold = 0.0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_warns_on_participant_range() {
    let mut config = ParleyConfig::default();
    config.llm.provider = "mock".into();
    config.refinement.num_participants = 9;
    let warnings = config.validate().unwrap();
    assert!(warnings.iter().any(|w| w.contains("num_participants")));
}

#[test]
fn loads_from_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("parley.toml");
    std::fs::write(
        &path,
        r#"
            [llm]
            provider = "mock"

            [logging]
            level = "debug"
        "#,
    )
    .unwrap();

    let loader = ConfigLoader::load(Some(&path)).unwrap();
    let config = loader.get();
    assert_eq!(config.llm.provider, "mock");
    assert_eq!(config.logging.level, "debug");
    assert_eq!(loader.path(), path);
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does-not-exist.toml");
    let loader = ConfigLoader::load(Some(&path)).unwrap();
    assert_eq!(loader.get().refinement.max_iterations, 3);
}
