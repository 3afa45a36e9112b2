//! Scenario tests for the derived topology, runnable without credentials
//!
//! These pin the externally observable decisions: listener port/protocol,
//! URL shape, task sizing defaults, and scaling parameters.

use webship::aws::{ListenerSpec, ScalingSpec, TaskSpec};
use webship::config::{AutoscalingConfig, ServiceConfig};
use webship::deploy::service_url;
use webship_common::naming::{fqdn, qualified_name};

const DEPLOY_ID: &str = "0198c2f4a1b2";

fn nginx(hosted_zone: Option<&str>) -> ServiceConfig {
    ServiceConfig {
        name: "nginx".into(),
        image: "nginx:latest".into(),
        port: 80,
        cpu: None,
        memory: None,
        autoscaling: None,
        hosted_zone: hosted_zone.map(String::from),
    }
}

#[test]
fn hosted_zone_switches_the_whole_ingress_path_to_https() {
    let config = nginx(Some("labs.example.com"));
    assert_eq!(config.exposed_port(), 443);

    // An HTTPS listener cannot exist without an issued certificate
    let spec = ListenerSpec::https("arn:aws:acm:us-east-2:123456789012:certificate/abc");
    assert_eq!(spec.port(), 443);
    assert!(spec.certificate_arn().is_some());

    let domain = fqdn(&qualified_name(&config.name, DEPLOY_ID), "labs.example.com");
    assert_eq!(domain, "nginx-0198c2f4a1b2.labs.example.com");

    let url = service_url(Some(&domain), "ignored.elb.amazonaws.com");
    assert_eq!(url, "https://nginx-0198c2f4a1b2.labs.example.com");
}

#[test]
fn without_a_hosted_zone_the_service_is_plain_http() {
    let config = nginx(None);
    assert_eq!(config.exposed_port(), 80);

    let spec = ListenerSpec::http();
    assert_eq!(spec.port(), 80);
    assert_eq!(spec.certificate_arn(), None);

    let url = service_url(None, "nginx-0198c2f4a1b2-1234.us-east-2.elb.amazonaws.com");
    assert_eq!(
        url,
        "http://nginx-0198c2f4a1b2-1234.us-east-2.elb.amazonaws.com"
    );
}

#[test]
fn task_definition_defaults_and_overrides() {
    let role = "arn:aws:iam::123456789012:role/nginx-0198c2f4a1b2-exec";

    let defaulted = TaskSpec::new(&nginx(None), DEPLOY_ID, "us-east-2", role);
    assert_eq!(defaulted.cpu(), "256");
    assert_eq!(defaulted.memory(), "512");
    assert_eq!(defaulted.port_mapping(), (80, 80));

    let mut config = nginx(None);
    config.cpu = Some("1024".into());
    config.memory = Some("4096".into());
    let sized = TaskSpec::new(&config, DEPLOY_ID, "us-east-2", role);
    assert_eq!(sized.cpu(), "1024");
    assert_eq!(sized.memory(), "4096");
}

#[test]
fn scaling_target_mirrors_the_configured_bounds() {
    let scaling = AutoscalingConfig {
        min: 1,
        max: 5,
        cpu_avg_threshold: 50.0,
    };
    let cluster = qualified_name("nginx", DEPLOY_ID);
    let spec = ScalingSpec::new(&scaling, &cluster, &cluster);

    assert_eq!(spec.min_capacity(), 1);
    assert_eq!(spec.max_capacity(), 5);
    assert_eq!(spec.target_value(), 50.0);
    assert_eq!(
        spec.resource_id(),
        "service/nginx-0198c2f4a1b2/nginx-0198c2f4a1b2"
    );
}

#[test]
fn config_without_scaling_produces_no_scaling_spec() {
    // The deploy path only builds a ScalingSpec from Some(autoscaling);
    // mirror that decision here
    let config = nginx(None);
    assert!(config.autoscaling.is_none());
    assert!(config.autoscaling.map(|s| ScalingSpec::new(&s, "c", "s")).is_none());
}

#[test]
fn validation_runs_before_any_topology_is_derived() {
    let mut config = nginx(Some("labs.example.com"));
    config.port = 0;
    assert!(config.validate().is_err());

    config.port = 80;
    config.autoscaling = Some(AutoscalingConfig {
        min: 3,
        max: 1,
        cpu_avg_threshold: 75.0,
    });
    assert!(config.validate().is_err());
}
