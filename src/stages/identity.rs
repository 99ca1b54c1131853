//! Managed identity stage
//!
//! Creates the user-assigned identity the application presents to Key Vault.
//! Creation can be disabled; the stage then only reports an identity that
//! already exists.

use super::StageContext;
use crate::arm::client::ArmClient;
use crate::error::Result;
use crate::resource::descriptor::{ResourceDescriptor, ResourceKind};
use crate::resource::outputs::ExportedOutputs;
use crate::resource::reconciler::{reconcile, ResourceSpec};
use serde_json::{json, Value};

struct IdentitySpec {
    desc: ResourceDescriptor,
}

impl ResourceSpec for IdentitySpec {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.desc
    }

    fn url(&self, client: &ArmClient) -> String {
        client.identity_url(&self.desc.resource_group, &self.desc.name)
    }

    fn create_body(&self) -> Value {
        json!({"location": self.desc.location})
    }
}

pub async fn run(ctx: &StageContext) -> Result<ExportedOutputs> {
    let name = ctx.settings.identity_name().to_string();
    let mut outputs = ExportedOutputs::new();

    if !ctx.settings.create_identity() {
        let url = ctx.client.identity_url(&ctx.resource_group, &name);
        match ctx.client.get_optional(&url).await? {
            Some(details) => export_identity(&mut outputs, &name, &details),
            None => tracing::info!(
                "Identity creation disabled and '{}' does not exist, nothing to do",
                name
            ),
        }
        return Ok(outputs);
    }

    let spec = IdentitySpec {
        desc: ResourceDescriptor::new(
            ResourceKind::ManagedIdentity,
            &name,
            &ctx.resource_group,
            &ctx.location,
        ),
    };
    let outcome = reconcile(&ctx.client, &spec, &ctx.settings.poll_policy()).await?;

    export_identity(&mut outputs, &name, outcome.details());
    Ok(outputs)
}

fn export_identity(outputs: &mut ExportedOutputs, name: &str, details: &Value) {
    outputs.push("IDENTITY_NAME", name);
    outputs.push_from("IDENTITY_ID", details, "id");
    outputs.push_from("IDENTITY_PRINCIPAL_ID", details, "properties.principalId");
    outputs.push_from("IDENTITY_CLIENT_ID", details, "properties.clientId");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::auth::AzureCredentials;
    use crate::config::Settings;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const IDENTITY_PATH: &str = "/subscriptions/sub-123/resourceGroups/rg-test/providers/Microsoft.ManagedIdentity/userAssignedIdentities/id-subnetcalc";

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

    fn identity_body() -> serde_json::Value {
        // Identity payloads carry no provisioningState; the PUT response is
        // the finished resource
        json!({
            "id": "/fake/id-subnetcalc",
            "properties": {
                "principalId": "aaaa-bbbb",
                "clientId": "cccc-dddd"
            }
        })
    }

    #[tokio::test]
    async fn creates_identity_and_exports_both_ids() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(IDENTITY_PATH))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path(IDENTITY_PATH))
            .respond_with(ResponseTemplate::new(201).set_body_json(identity_body()))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = ctx_for(&server, Settings::default());
        let outputs = run(&ctx).await.unwrap();

        assert_eq!(outputs.get("IDENTITY_PRINCIPAL_ID"), Some("aaaa-bbbb"));
        assert_eq!(outputs.get("IDENTITY_CLIENT_ID"), Some("cccc-dddd"));
    }

    #[tokio::test]
    async fn disabled_creation_only_reports_existing_state() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(IDENTITY_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let settings = Settings {
            create_identity: Some(false),
            ..Settings::default()
        };
        let ctx = ctx_for(&server, settings);
        let outputs = run(&ctx).await.unwrap();

        assert!(outputs.is_empty());
    }

    #[tokio::test]
    async fn existing_identity_is_reexported_unchanged() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(IDENTITY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(identity_body()))
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let ctx = ctx_for(&server, Settings::default());
        let outputs = run(&ctx).await.unwrap();

        assert_eq!(outputs.get("IDENTITY_ID"), Some("/fake/id-subnetcalc"));
    }
}
