//! API Management stage
//!
//! The one long-running create in the pipeline: an APIM instance can take
//! tens of minutes to provision, so the create is asynchronous acceptance
//! followed by the completion poller.

use super::StageContext;
use crate::arm::client::ArmClient;
use crate::config::{ApimSku, VnetMode};
use crate::error::Result;
use crate::resource::descriptor::{ProvisioningState, ResourceDescriptor, ResourceKind};
use crate::resource::outputs::ExportedOutputs;
use crate::resource::reconciler::{reconcile, wait_for_provisioning, CreateMode, ResourceSpec};
use serde_json::{json, Value};

struct ApimSpec {
    desc: ResourceDescriptor,
    sku: ApimSku,
    publisher_email: String,
    publisher_name: String,
    vnet_mode: VnetMode,
    subnet_id: Option<String>,
    system_identity: bool,
}

impl ResourceSpec for ApimSpec {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.desc
    }

    fn url(&self, client: &ArmClient) -> String {
        client.apim_url(&self.desc.resource_group, &self.desc.name)
    }

    fn create_body(&self) -> Value {
        let mut properties = json!({
            "publisherEmail": self.publisher_email,
            "publisherName": self.publisher_name,
            "virtualNetworkType": self.vnet_mode.as_str()
        });
        if let Some(subnet_id) = &self.subnet_id {
            properties["virtualNetworkConfiguration"] = json!({"subnetResourceId": subnet_id});
        }

        let mut body = json!({
            "location": self.desc.location,
            "sku": {
                "name": self.sku.as_str(),
                "capacity": self.sku.capacity()
            },
            "properties": properties
        });
        if self.system_identity {
            body["identity"] = json!({"type": "SystemAssigned"});
        }
        body
    }

    fn create_mode(&self) -> CreateMode {
        CreateMode::Async
    }
}

/// Required-key and allow-list checks, run before the first cloud call
pub fn preflight(settings: &crate::config::Settings) -> Result<()> {
    settings.apim_sku()?;
    let mode = settings.vnet_mode()?;
    settings.publisher_email()?;
    settings.publisher_name()?;
    if mode != VnetMode::None {
        settings.apim_subnet_id()?;
    }
    Ok(())
}

pub async fn run(ctx: &StageContext) -> Result<ExportedOutputs> {
    let sku = ctx.settings.apim_sku()?;
    let vnet_mode = ctx.settings.vnet_mode()?;
    let publisher_email = ctx.settings.publisher_email()?.to_string();
    let publisher_name = ctx.settings.publisher_name()?.to_string();
    let subnet_id = match vnet_mode {
        VnetMode::None => None,
        _ => Some(ctx.settings.apim_subnet_id()?.to_string()),
    };
    let name = ctx.settings.apim_name();
    let policy = ctx.settings.poll_policy();

    let spec = ApimSpec {
        desc: ResourceDescriptor::new(
            ResourceKind::ApiManagement,
            &name,
            &ctx.resource_group,
            &ctx.location,
        ),
        sku,
        publisher_email,
        publisher_name,
        vnet_mode,
        subnet_id,
        system_identity: ctx.settings.apim_system_identity(),
    };

    let outcome = reconcile(&ctx.client, &spec, &policy).await?;

    // A rerun can land while an earlier create is still in flight; keep
    // waiting rather than exporting identifiers that are not confirmed yet
    let details = if !outcome.was_created()
        && ProvisioningState::of(outcome.details()) == ProvisioningState::Creating
    {
        tracing::info!(
            "{} '{}' found mid-provisioning, waiting for it to finish",
            spec.desc.kind,
            spec.desc.name
        );
        wait_for_provisioning(&ctx.client, &spec.url(&ctx.client), &spec.desc, &policy).await?
    } else {
        outcome.details().clone()
    };

    let mut outputs = ExportedOutputs::new();
    outputs.push("APIM_NAME", name);
    outputs.push_from("APIM_ID", &details, "id");
    outputs.push_from("APIM_GATEWAY_URL", &details, "properties.gatewayUrl");
    outputs.push_from("APIM_PORTAL_URL", &details, "properties.developerPortalUrl");
    outputs.push_from("APIM_PRINCIPAL_ID", &details, "identity.principalId");

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::auth::AzureCredentials;
    use crate::config::Settings;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const APIM_PATH: &str = "/subscriptions/sub-123/resourceGroups/rg-test/providers/Microsoft.ApiManagement/service/apim-demo";

    fn base_settings() -> Settings {
        Settings {
            apim_name: Some("apim-demo".to_string()),
            publisher_email: Some("ops@example.com".to_string()),
            publisher_name: Some("Example Ops".to_string()),
            poll_interval_secs: Some(0),
            ..Settings::default()
        }
    }

    fn ctx_for(server: &MockServer, settings: Settings) -> StageContext {
        StageContext {
            client: ArmClient::with_endpoint(
                AzureCredentials::with_static_token("test-token"),
                "sub-123",
                &server.uri(),
            )
            .unwrap(),
            settings,
            resource_group: "rg-test".to_string(),
            location: "westeurope".to_string(),
        }
    }

    #[tokio::test]
    async fn existing_instance_reexports_without_creating() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(APIM_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "/fake/apim",
                "properties": {
                    "provisioningState": "Succeeded",
                    "gatewayUrl": "https://apim-demo.azure-api.net",
                    "developerPortalUrl": "https://apim-demo.developer.azure-api.net"
                },
                "identity": {"principalId": "11111111-2222-3333-4444-555555555555"}
            })))
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let ctx = ctx_for(&server, base_settings());
        let outputs = run(&ctx).await.unwrap();

        assert_eq!(
            outputs.get("APIM_GATEWAY_URL"),
            Some("https://apim-demo.azure-api.net")
        );
        assert_eq!(
            outputs.get("APIM_PRINCIPAL_ID"),
            Some("11111111-2222-3333-4444-555555555555")
        );
    }

    #[tokio::test]
    async fn create_polls_until_succeeded_and_exports_confirmed_urls() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(APIM_PATH))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path(APIM_PATH))
            .and(body_partial_json(json!({
                "sku": {"name": "Developer", "capacity": 1},
                "properties": {
                    "publisherEmail": "ops@example.com",
                    "virtualNetworkType": "None"
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "properties": {"provisioningState": "Activating"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(APIM_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"provisioningState": "Creating"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(APIM_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "/fake/apim",
                "properties": {
                    "provisioningState": "Succeeded",
                    "gatewayUrl": "https://apim-demo.azure-api.net"
                }
            })))
            .mount(&server)
            .await;

        let ctx = ctx_for(&server, base_settings());
        let outputs = run(&ctx).await.unwrap();

        assert_eq!(
            outputs.get("APIM_GATEWAY_URL"),
            Some("https://apim-demo.azure-api.net")
        );
    }

    #[tokio::test]
    async fn rerun_mid_provisioning_waits_instead_of_exporting_early() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(APIM_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"provisioningState": "Creating"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(APIM_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "/fake/apim",
                "properties": {
                    "provisioningState": "Succeeded",
                    "gatewayUrl": "https://apim-demo.azure-api.net"
                }
            })))
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let ctx = ctx_for(&server, base_settings());
        let outputs = run(&ctx).await.unwrap();

        assert_eq!(outputs.get("APIM_ID"), Some("/fake/apim"));
    }

    #[tokio::test]
    async fn unsupported_sku_fails_without_cloud_calls() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let settings = Settings {
            apim_sku: Some("Gold".to_string()),
            ..base_settings()
        };
        let ctx = ctx_for(&server, settings);

        assert!(run(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn vnet_mode_requires_a_subnet_id() {
        let server = MockServer::start().await;

        let settings = Settings {
            vnet_mode: Some("External".to_string()),
            ..base_settings()
        };
        let ctx = ctx_for(&server, settings);

        let err = run(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("APIM_SUBNET_ID"));
    }

    #[test]
    fn consumption_sku_body_has_zero_capacity_units() {
        let spec = ApimSpec {
            desc: ResourceDescriptor::new(
                ResourceKind::ApiManagement,
                "apim-demo",
                "rg-test",
                "westeurope",
            ),
            sku: ApimSku::Consumption,
            publisher_email: "ops@example.com".to_string(),
            publisher_name: "Example Ops".to_string(),
            vnet_mode: VnetMode::None,
            subnet_id: None,
            system_identity: true,
        };

        let body = spec.create_body();
        assert_eq!(body["sku"]["capacity"], 0);
        assert_eq!(body["identity"]["type"], "SystemAssigned");
        assert!(body["properties"]
            .get("virtualNetworkConfiguration")
            .is_none());
    }

    #[test]
    fn poll_interval_zero_is_honored_in_tests() {
        // Settings with poll_interval_secs 0 keep the test polls fast
        let policy = base_settings().poll_policy();
        assert_eq!(policy.interval, Duration::from_secs(0));
    }
}
