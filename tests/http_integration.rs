//! Integration tests for the Resource Manager client using wiremock
//!
//! These tests verify URL construction, pagination and the mapping of status
//! codes into the collector's error taxonomy against mocked endpoints.

use azinv::azure::api::CloudApi;
use azinv::azure::auth::ArmCredentials;
use azinv::azure::client::ArmClient;
use azinv::azure::http::{HttpTemplateFetcher, TemplateTransport};
use azinv::snapshot::JsonSnapshotStore;
use azinv::{ApiError, Collector, CollectorConfig};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{bearer_token, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SUB: &str = "sub-1";
const RG_PATH: &str = "/subscriptions/sub-1/resourceGroups/rg1/providers";

fn client(server: &MockServer) -> ArmClient {
    ArmClient::with_endpoint(SUB, ArmCredentials::from_static("test-token"), &server.uri())
        .expect("client should build")
}

fn deployments_path(suffix: &str) -> String {
    format!("{RG_PATH}/Microsoft.Resources/deployments{suffix}")
}

mod arm_client_tests {
    use super::*;

    /// Listing follows nextLink until the last page
    #[tokio::test]
    async fn test_list_follows_next_link() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/resourcegroups"))
            .and(query_param("api-version", "2021-04-01"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "/subscriptions/sub-1/resourceGroups/rg1", "name": "rg1", "location": "eastus"}],
                "nextLink": format!("{}/page2", server.uri())
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/page2"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"name": "rg2", "location": "westus"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let groups = client(&server).list_resource_groups().await.unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "rg1");
        assert_eq!(groups[1].location, "westus");
    }

    /// Deployments carry their resource group even when the payload omits it
    #[tokio::test]
    async fn test_list_deployments_fills_resource_group() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(deployments_path("")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {
                        "id": format!("{RG_PATH}/Microsoft.Resources/deployments/web"),
                        "name": "web",
                        "properties": {
                            "timestamp": "2024-03-01T10:00:00.1234567Z",
                            "provisioningState": "Succeeded",
                            "templateLink": {"uri": "https://t/web.json", "contentVersion": "1.0.0.0"}
                        }
                    },
                    {"id": "opaque", "name": "bare", "properties": {}}
                ]
            })))
            .mount(&server)
            .await;

        let stacks = client(&server).list_deployments("rg1").await.unwrap();

        assert_eq!(stacks.len(), 2);
        assert_eq!(stacks[0].resource_group, "rg1");
        assert_eq!(stacks[1].resource_group, "rg1");
        assert_eq!(stacks[0].template_uri(), Some("https://t/web.json"));
        assert!(stacks[0].timestamp().is_some());
        assert!(stacks[1].timestamp().is_none());
    }

    /// 404 maps to NotFound
    #[tokio::test]
    async fn test_404_returns_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(deployments_path("/missing")))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "DeploymentNotFound", "message": "not found"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_deployment("missing", "rg1")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::NotFound(_)));
    }

    /// exportTemplate is a POST; 409 maps to Conflict
    #[tokio::test]
    async fn test_export_template_conflict() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(deployments_path("/old/exportTemplate")))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_deployment_template("old", "rg1")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Conflict(_)));
    }

    /// The stored template is unwrapped from the export response
    #[tokio::test]
    async fn test_export_template_returns_template() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(deployments_path("/web/exportTemplate")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "template": {"contentVersion": "1.0.0.0", "resources": []}
            })))
            .mount(&server)
            .await;

        let template = client(&server)
            .get_deployment_template("web", "rg1")
            .await
            .unwrap();

        assert_eq!(template["contentVersion"], "1.0.0.0");
    }

    /// An empty body decodes to null
    #[tokio::test]
    async fn test_empty_export_is_null() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(deployments_path("/web/exportTemplate")))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let template = client(&server)
            .get_deployment_template("web", "rg1")
            .await
            .unwrap();

        assert!(template.is_null());
    }

    #[tokio::test]
    async fn test_instance_view_power_state() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!(
                "{RG_PATH}/Microsoft.Compute/virtualMachines/vm1/instanceView"
            )))
            .and(query_param("api-version", "2023-03-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "statuses": [
                    {"code": "ProvisioningState/succeeded", "displayStatus": "Provisioning succeeded"},
                    {"code": "PowerState/running", "displayStatus": "VM running"}
                ]
            })))
            .mount(&server)
            .await;

        let view = client(&server).get_instance_view("vm1", "rg1").await.unwrap();

        assert_eq!(view.status_with_prefix("PowerState/"), Some("VM running"));
    }

    /// listKeys is a POST returning a `keys` array
    #[tokio::test]
    async fn test_list_account_keys() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!(
                "{RG_PATH}/Microsoft.Storage/storageAccounts/acct1/listKeys"
            )))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [
                    {"keyName": "key1", "value": "abc", "permissions": "FULL"},
                    {"keyName": "key2", "value": "def", "permissions": "FULL"}
                ]
            })))
            .mount(&server)
            .await;

        let keys = client(&server).list_account_keys("acct1", "rg1").await.unwrap();

        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1].key_name, "key2");
    }

    /// Subscription-wide disks get their group from the id
    #[tokio::test]
    async fn test_list_managed_disks() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/providers/Microsoft.Compute/disks"))
            .and(query_param("api-version", "2023-04-02"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "id": "/subscriptions/sub-1/resourceGroups/RG2/providers/Microsoft.Compute/disks/d1",
                    "name": "d1",
                    "location": "eastus",
                    "properties": {"diskSizeGB": 30}
                }]
            })))
            .mount(&server)
            .await;

        let disks = client(&server).list_managed_disks().await.unwrap();

        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].resource_group, "RG2");
        assert_eq!(disks[0].properties["diskSizeGB"], 30);
    }

    #[tokio::test]
    async fn test_401_returns_unauthorized() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/resourcegroups"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"code": "InvalidAuthenticationToken", "message": "expired"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).list_resource_groups().await.unwrap_err();

        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_500_returns_http_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(deployments_path("/web/operations")))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server)
            .list_deployment_operations("web", "rg1")
            .await
            .unwrap_err();

        match err {
            ApiError::Http { status, .. } => assert_eq!(status, 500),
            other => panic!("unexpected error {other:?}"),
        }
    }

    /// Malformed JSON is a decode error, not a panic
    #[tokio::test]
    async fn test_invalid_json_is_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/resourcegroups"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(&server).list_resource_groups().await.unwrap_err();

        assert!(matches!(err, ApiError::Decode(_)));
    }
}

mod template_fetcher_tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_returns_raw_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/templates/web.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{ \"a\": 1 }"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpTemplateFetcher::new(None, true).unwrap();
        let body = fetcher
            .fetch(&format!("{}/templates/web.json", server.uri()))
            .await
            .unwrap();

        assert_eq!(body, "{ \"a\": 1 }");
    }

    #[tokio::test]
    async fn test_fetch_404_is_not_found() {
        let server = MockServer::start().await;

        let fetcher = HttpTemplateFetcher::new(None, false).unwrap();
        let err = fetcher
            .fetch(&format!("{}/templates/gone.json", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::NotFound(_)));
    }
}

/// Full path from HTTP to the collector's stack and template views
mod collector_over_http_tests {
    use super::*;

    async fn mount_stack(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/resourcegroups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "/subscriptions/sub-1/resourceGroups/rg1", "name": "rg1", "location": "eastus"}]
            })))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path(deployments_path("")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "id": format!("{RG_PATH}/Microsoft.Resources/deployments/web"),
                    "name": "web",
                    "properties": {
                        "timestamp": "2024-03-01T10:00:05Z",
                        "templateLink": {
                            "uri": format!("{}/templates/web.json", server.uri()),
                            "contentVersion": "2.0.0.0"
                        }
                    }
                }]
            })))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path(deployments_path("/web/operations")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {
                        "id": "/ops/1",
                        "operationId": "1",
                        "properties": {
                            "provisioningOperation": "Create",
                            "provisioningState": "Succeeded",
                            "timestamp": "2024-03-01T10:00:04Z",
                            "targetResource": {
                                "id": "/vnet/1",
                                "resourceName": "vnet1",
                                "resourceType": "Microsoft.Network/virtualNetworks"
                            }
                        }
                    },
                    {
                        "id": "/ops/2",
                        "operationId": "2",
                        "properties": {"provisioningOperation": "EvaluateDeploymentOutput"}
                    }
                ]
            })))
            .expect(1)
            .mount(server)
            .await;

        Mock::given(method("POST"))
            .and(path(deployments_path("/web/exportTemplate")))
            .respond_with(ResponseTemplate::new(409))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path("/templates/web.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\n  \"resources\": []\n}"))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_changed_stack_collected_over_http() {
        let server = MockServer::start().await;
        mount_stack(&server).await;

        let snapshot = JsonSnapshotStore::from_json(&format!(
            r#"{{"stacks": [{{"id": 1, "ems_ref": "{RG_PATH}/Microsoft.Resources/deployments/web", "finish_time": "2024-03-01T10:00:00Z"}}]}}"#
        ))
        .unwrap();

        let collector = Collector::new(
            Arc::new(client(&server)),
            Arc::new(snapshot),
            Arc::new(HttpTemplateFetcher::new(None, true).unwrap()),
            CollectorConfig::default(),
            "EastUS",
        );

        let stacks = collector.stacks().await.unwrap();
        assert_eq!(stacks.len(), 1);

        let resources = collector.stack_resources(&stacks[0]).await.unwrap();
        assert_eq!(resources.resources.len(), 1);
        assert_eq!(resources.resources[0].name.as_deref(), Some("vnet1"));
        assert_eq!(
            resources.resources[0].resource_category.as_deref(),
            Some("Microsoft.Network/virtualNetworks")
        );

        let templates = collector.stack_templates().await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].description, "contentVersion: 2.0.0.0");
        assert_eq!(templates[0].content.as_deref(), Some(r#"{"resources":[]}"#));
    }
}
