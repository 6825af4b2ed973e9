//! Full pipeline against a canned Observation — no network (spec §10.4).

use std::collections::BTreeMap;

use stackscout::observation::{CertificateInfo, MultiMap, Observation};
use stackscout::rules::RuleDocument;
use stackscout::{fusion, pattern_engine, result, Catalog};

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

fn nginx_observation() -> Observation {
    let mut headers = MultiMap::new();
    headers.insert("server", "nginx/1.19.0");
    Observation {
        url: "https://example.com/".to_string(),
        status_code: 200,
        title: "Welcome to nginx".to_string(),
        html: "<html><body>Welcome to nginx! Powered by WP</body></html>".to_string(),
        headers,
        scripts: vec![],
        cookies: Default::default(),
        meta: MultiMap::new(),
        dns: Default::default(),
        cert_issuer: vec![],
        favicon: None,
        favicon_hash: None,
        certificate: CertificateInfo::default(),
    }
}

fn nginx_catalog() -> Catalog {
    let json = r#"{
        "categories": { "62": { "name": "Web servers", "priority": 1 } },
        "technologies": {
            "Nginx": {
                "cats": [62],
                "headers": { "server": "nginx(?:/([\\d.]+))?\\;version:\\1" }
            }
        }
    }"#;
    Catalog::parse(json).expect("catalog parses")
}

#[tokio::test]
async fn pipeline_detects_nginx_with_version_and_confidence() {
    init_logger();
    let catalog = nginx_catalog();
    let obs = nginx_observation();

    println!("TEST: pattern engine against canned nginx Observation");
    let detected = pattern_engine::run(&catalog, &obs, None::<&dyn pattern_engine::JsEvaluator>).await;
    let nginx = detected.get("Nginx").expect("nginx header pattern matches");
    assert_eq!(nginx.version, "1.19.0");
    assert_eq!(nginx.confidence, 100);

    let fused = fusion::merge(&catalog, &detected, &[]);
    assert!(fused.technologies.iter().any(|t| t.name == "Nginx"));
    assert!(fused.buckets.web_container.contains(&"Nginx".to_string()));

    let finger_result = result::build(obs, fused);
    assert_eq!(finger_result.status_code, 200);
    assert_eq!(finger_result.headers.get("server").map(String::as_str), Some("nginx/1.19.0"));
}

#[tokio::test]
async fn rule_engine_detection_flows_through_fusion_with_metadata() {
    init_logger();
    let catalog = Catalog::parse(r#"{"categories": {}, "technologies": {}}"#).unwrap();
    let yaml = r#"
id: wordpress
info:
  confidence: 90
  categories: ["CMS"]
http:
  - path: ["{{BaseURL}}"]
    matchers:
      - type: dsl
        dsl:
          - 'contains(body, "Powered by WP") && status_code == 200'
    extractors:
      - name: wp_marker
        type: regex
        part: body
        regex: ["Powered by (WP)"]
"#;
    let doc = RuleDocument::parse_yaml(yaml).expect("rule document parses");
    let obs = nginx_observation();

    let rule_detected: Vec<_> = [&doc]
        .iter()
        .filter_map(|d| stackscout::rules::evaluate(d, &obs))
        .collect();
    assert_eq!(rule_detected.len(), 1);
    assert_eq!(rule_detected[0].metadata.get("wp_marker"), Some(&vec!["WP".to_string()]));

    let pattern_detected = pattern_engine::Detected::new();
    let fused = fusion::merge(&catalog, &pattern_detected, &rule_detected);
    let wp = fused.technologies.iter().find(|t| t.name == "wordpress").expect("wordpress fused in");
    let mut expected_metadata = BTreeMap::new();
    expected_metadata.insert("wp_marker".to_string(), vec!["WP".to_string()]);
    assert_eq!(wp.metadata, expected_metadata);
}
