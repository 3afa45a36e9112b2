//! AWS integration tests - actually call AWS APIs
//!
//! These tests are marked `#[ignore]` and only run with:
//! ```
//! AWS_PROFILE=your_profile cargo test --test aws_integration -- --ignored
//! ```
//!
//! They create real (free or near-free) resources and delete them again;
//! each test cleans up after itself even on assertion failure paths that
//! matter.

mod aws_test_helpers;

use aws_test_helpers::*;
use webship::aws::{DeployContext, Ec2Client, ElbClient, IamClient};
use webship::aws::account::get_current_account_id;
use webship_common::tags::TagMap;

/// Test that credentials resolve to an account id
#[tokio::test]
#[ignore]
async fn test_account_lookup() {
    let region = get_test_region();
    let ctx = DeployContext::new(&region, &test_deploy_id()).await;

    let account = get_current_account_id(ctx.sdk_config())
        .await
        .expect("AWS credentials required - set AWS_PROFILE or AWS_ACCESS_KEY_ID");
    assert_eq!(account.len(), 12, "Account IDs are 12 digits, got: {account}");
}

/// Test security group create/egress/revoke/delete lifecycle
#[tokio::test]
#[ignore]
async fn test_security_group_lifecycle() {
    let region = get_test_region();
    let deploy_id = test_deploy_id();
    let ctx = DeployContext::new(&region, &deploy_id).await;
    let ec2 = Ec2Client::from_context(&ctx);

    let vpc_id = std::env::var("WEBSHIP_TEST_VPC")
        .expect("Set WEBSHIP_TEST_VPC to a VPC id for integration tests");
    let tags = TagMap::new();

    // Ingress group open on 80
    let ingress_sg = ec2
        .create_ingress_security_group("itest", &deploy_id, 80, &vpc_id, &tags)
        .await
        .expect("Should create ingress security group");
    assert!(ingress_sg.starts_with("sg-"), "Got: {ingress_sg}");

    // Service group admitting only the ingress group
    let service_sg = ec2
        .create_service_security_group("itest", &deploy_id, 8080, &vpc_id, &ingress_sg, &tags)
        .await
        .expect("Should create service security group");
    assert!(service_sg.starts_with("sg-"), "Got: {service_sg}");

    // The scoped egress rule between them, then revoke it again
    ec2.authorize_egress_to_service(&ingress_sg, &service_sg, 8080)
        .await
        .expect("Should add egress rule");
    ec2.revoke_egress_to_service(&ingress_sg, &service_sg, 8080)
        .await
        .expect("Should revoke egress rule");

    // Lookup by derived name finds the group
    let found = ec2
        .find_security_group(&format!("itest-{deploy_id}-alb"))
        .await
        .expect("Should describe security groups");
    assert_eq!(found.as_deref(), Some(ingress_sg.as_str()));

    // Delete both; second delete of each must be a no-op
    ec2.delete_security_group(&service_sg)
        .await
        .expect("Should delete service security group");
    ec2.delete_security_group(&ingress_sg)
        .await
        .expect("Should delete ingress security group");
    ec2.delete_security_group(&ingress_sg)
        .await
        .expect("Deleting a deleted group should be a no-op");
}

/// Test execution role create/wait/delete lifecycle
#[tokio::test]
#[ignore]
async fn test_execution_role_lifecycle() {
    let region = get_test_region();
    let deploy_id = test_deploy_id();
    let ctx = DeployContext::new(&region, &deploy_id).await;
    let iam = IamClient::from_context(&ctx);

    let account = get_current_account_id(ctx.sdk_config())
        .await
        .expect("AWS credentials required");

    let role_arn = iam
        .create_execution_role("itest", &deploy_id, &region, &account, &TagMap::new(), None)
        .await
        .expect("Should create execution role");
    assert!(
        role_arn.starts_with("arn:aws:iam::"),
        "Role ARN should be an IAM ARN, got: {role_arn}"
    );

    let role_name = format!("itest-{deploy_id}-exec");
    assert!(iam.role_exists(&role_name).await, "Role should be visible");

    iam.delete_execution_role(&role_name)
        .await
        .expect("Should delete execution role");
    assert!(!iam.role_exists(&role_name).await, "Role should be gone");
}

/// Test target group create/find/delete lifecycle
#[tokio::test]
#[ignore]
async fn test_target_group_lifecycle() {
    let region = get_test_region();
    let deploy_id = test_deploy_id();
    let ctx = DeployContext::new(&region, &deploy_id).await;
    let elb = ElbClient::from_context(&ctx);

    let vpc_id = std::env::var("WEBSHIP_TEST_VPC")
        .expect("Set WEBSHIP_TEST_VPC to a VPC id for integration tests");

    let arn = elb
        .create_target_group("itest", &deploy_id, &vpc_id, &TagMap::new())
        .await
        .expect("Should create target group");
    assert!(arn.contains(":targetgroup/"), "Got: {arn}");

    let found = elb
        .find_target_group(&format!("itest-{deploy_id}"))
        .await
        .expect("Should describe target groups");
    assert_eq!(found.as_deref(), Some(arn.as_str()));

    elb.delete_target_group(&arn)
        .await
        .expect("Should delete target group");
    elb.delete_target_group(&arn)
        .await
        .expect("Deleting a deleted target group should be a no-op");

    let found = elb
        .find_target_group(&format!("itest-{deploy_id}"))
        .await
        .expect("Describe after delete should not error");
    assert_eq!(found, None);
}
