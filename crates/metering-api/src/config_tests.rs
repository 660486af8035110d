use super::*;
use metering_core::MetricValue;

fn valid_config() -> Config {
    Config {
        identities: vec![IdentityConfig {
            name: "billing-token".to_string(),
            credential: Credential::Bearer {
                token: "secret".to_string(),
            },
        }],
        metrics: vec![MetricConfig {
            name: "requests".to_string(),
            r#type: ValueTypeConfig::Int,
            endpoints: vec!["disk".to_string(), "billing".to_string()],
            mode: MetricModeConfig::Aggregation { buffer_seconds: 60 },
        }],
        endpoints: vec![
            EndpointConfig {
                name: "disk".to_string(),
                kind: EndpointKindConfig::Disk {
                    path: PathBuf::from("/var/lib/metering/out.jsonl"),
                },
            },
            EndpointConfig {
                name: "billing".to_string(),
                kind: EndpointKindConfig::Http {
                    url: "https://billing.example.com/ingest".to_string(),
                    identity: Some("billing-token".to_string()),
                    timeout_seconds: 10,
                },
            },
        ],
        sources: vec![SourceConfig {
            name: "heartbeat".to_string(),
            kind: SourceKindConfig::Heartbeat {
                metric: "requests".to_string(),
                interval_seconds: 60,
                value: MetricValue::Int64(0),
                labels: Default::default(),
            },
        }],
        filters: vec![FilterConfig {
            kind: FilterKindConfig::AddLabels {
                omit_empty: true,
                labels: BTreeMap::from([("region".to_string(), "us-east".to_string())]),
            },
        }],
    }
}

#[test]
fn valid_config_passes_validation() {
    assert!(valid_config().validate().is_ok());
}

#[test]
fn duplicate_identity_name_is_rejected() {
    let mut config = valid_config();
    config.identities.push(config.identities[0].clone());
    assert!(matches!(
        config.validate(),
        Err(ConfigError::DuplicateIdentity { .. })
    ));
}

#[test]
fn empty_bearer_token_is_rejected() {
    let mut config = valid_config();
    config.identities[0].credential = Credential::Bearer {
        token: String::new(),
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::EmptyCredential { .. })
    ));
}

#[test]
fn metric_referencing_undefined_endpoint_is_rejected() {
    let mut config = valid_config();
    config.metrics[0].endpoints.push("missing".to_string());
    assert!(matches!(
        config.validate(),
        Err(ConfigError::UndefinedEndpoint { .. })
    ));
}

#[test]
fn zero_buffer_seconds_is_rejected() {
    let mut config = valid_config();
    config.metrics[0].mode = MetricModeConfig::Aggregation { buffer_seconds: 0 };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidBufferSeconds { .. })
    ));
}

#[test]
fn heartbeat_source_value_type_mismatch_is_rejected() {
    let mut config = valid_config();
    let SourceKindConfig::Heartbeat { value, .. } = &mut config.sources[0].kind;
    *value = MetricValue::Float64(1.0);
    assert!(matches!(
        config.validate(),
        Err(ConfigError::SourceValueTypeMismatch { .. })
    ));
}

#[test]
fn heartbeat_source_referencing_undefined_metric_is_rejected() {
    let mut config = valid_config();
    let SourceKindConfig::Heartbeat { metric, .. } = &mut config.sources[0].kind;
    *metric = "missing".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::UndefinedSourceMetric { .. })
    ));
}

#[test]
fn endpoint_referencing_undefined_identity_is_rejected() {
    let mut config = valid_config();
    let EndpointKindConfig::Http { identity, .. } = &mut config.endpoints[1].kind else {
        panic!("expected http endpoint");
    };
    *identity = Some("missing".to_string());
    assert!(matches!(
        config.validate(),
        Err(ConfigError::UndefinedIdentity { .. })
    ));
}

#[test]
fn credential_debug_and_serialize_redact_the_token() {
    let credential = Credential::Bearer {
        token: "super-secret".to_string(),
    };
    assert!(!format!("{credential:?}").contains("super-secret"));
    let json = serde_json::to_string(&credential).unwrap();
    assert!(!json.contains("super-secret"));
    assert!(json.contains("REDACTED"));
}

#[test]
fn to_pipeline_config_merges_add_labels_filters_into_default_labels() {
    let pipeline_config = valid_config().to_pipeline_config();
    assert_eq!(
        pipeline_config.default_labels.get("region").map(String::as_str),
        Some("us-east")
    );
}

#[test]
fn to_pipeline_config_resolves_http_endpoint_identity_to_its_credential() {
    let pipeline_config = valid_config().to_pipeline_config();
    let billing = pipeline_config
        .endpoints
        .iter()
        .find(|e| e.name == "billing")
        .unwrap();
    match &billing.kind {
        metering_core::EndpointKind::Http { credential, .. } => {
            assert_eq!(credential.as_deref(), Some("secret"));
        }
        _ => panic!("expected http endpoint"),
    }
}

#[test]
fn omit_empty_drops_empty_valued_labels() {
    let mut config = valid_config();
    config.filters.push(FilterConfig {
        kind: FilterKindConfig::AddLabels {
            omit_empty: true,
            labels: BTreeMap::from([("zone".to_string(), String::new())]),
        },
    });
    let pipeline_config = config.to_pipeline_config();
    assert!(!pipeline_config.default_labels.contains_key("zone"));
}
