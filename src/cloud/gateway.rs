//! HTTP client for a fleet-control gateway
//!
//! The gateway exposes the capability interfaces as JSON resources under
//! `/v1`. Region, fleet and balancer identifiers are sent as escaped path
//! segments so target group ARNs survive the round trip.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{
    AutoscalingApi, CloudError, EndpointState, FleetPage, IdentityApi, LoadBalancingApi,
};
use crate::fleet::{BalancerKind, Capacity};

#[derive(Debug, Serialize)]
struct ProcessesRequest<'a> {
    processes: &'a [String],
}

#[derive(Debug, Deserialize)]
struct BalancersResponse {
    balancers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    endpoints: Vec<EndpointState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityResponse {
    account_id: String,
}

/// Gateway-backed implementation of every cloud capability
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl GatewayClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, CloudError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| CloudError::Http(format!("invalid gateway URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(CloudError::Http(format!(
                "invalid gateway URL '{}': not a base URL",
                base_url
            )));
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Build `base/v1/<segments...>` with each segment escaped
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v1").extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        not_found: impl FnOnce() -> CloudError,
    ) -> Result<reqwest::Response, CloudError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| CloudError::Http(e.to_string()))?;

        let status = response.status();
        trace!(status = status.as_u16(), url = %response.url(), "Gateway response");

        if status == StatusCode::NOT_FOUND {
            return Err(not_found());
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CloudError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        not_found: impl FnOnce() -> CloudError,
    ) -> Result<T, CloudError> {
        self.execute(request, not_found)
            .await?
            .json::<T>()
            .await
            .map_err(|e| CloudError::Parse(e.to_string()))
    }
}

fn fleet_not_found(name: &str, region: &str) -> impl FnOnce() -> CloudError {
    let name = name.to_string();
    let region = region.to_string();
    move || CloudError::FleetNotFound { name, region }
}

fn balancer_not_found(id: &str) -> impl FnOnce() -> CloudError {
    let id = id.to_string();
    move || CloudError::BalancerNotFound(id)
}

#[async_trait]
impl AutoscalingApi for GatewayClient {
    async fn list_fleets(
        &self,
        region: &str,
        page_token: Option<&str>,
    ) -> Result<FleetPage, CloudError> {
        let mut request = self
            .client
            .get(self.endpoint(&["regions", region, "fleets"]));
        if let Some(token) = page_token {
            request = request.query(&[("nextToken", token)]);
        }
        let region_owned = region.to_string();
        self.fetch(request, move || {
            CloudError::Api {
                status: 404,
                message: format!("unknown region {}", region_owned),
            }
        })
        .await
    }

    async fn update_capacity(
        &self,
        name: &str,
        region: &str,
        capacity: Capacity,
    ) -> Result<(), CloudError> {
        let request = self
            .client
            .put(self.endpoint(&["regions", region, "fleets", name, "capacity"]))
            .json(&capacity);
        self.execute(request, fleet_not_found(name, region)).await?;
        Ok(())
    }

    async fn suspend_processes(
        &self,
        name: &str,
        region: &str,
        processes: &[String],
    ) -> Result<(), CloudError> {
        let request = self
            .client
            .post(self.endpoint(&["regions", region, "fleets", name, "processes", "suspend"]))
            .json(&ProcessesRequest { processes });
        self.execute(request, fleet_not_found(name, region)).await?;
        Ok(())
    }

    async fn resume_processes(
        &self,
        name: &str,
        region: &str,
        processes: &[String],
    ) -> Result<(), CloudError> {
        let request = self
            .client
            .post(self.endpoint(&["regions", region, "fleets", name, "processes", "resume"]))
            .json(&ProcessesRequest { processes });
        self.execute(request, fleet_not_found(name, region)).await?;
        Ok(())
    }

    async fn attached_balancers(
        &self,
        name: &str,
        region: &str,
        kind: BalancerKind,
    ) -> Result<Vec<String>, CloudError> {
        let request = self
            .client
            .get(self.endpoint(&["regions", region, "fleets", name, "balancers"]))
            .query(&[("kind", kind.as_str())]);
        let response: BalancersResponse =
            self.fetch(request, fleet_not_found(name, region)).await?;
        Ok(response.balancers)
    }
}

#[async_trait]
impl LoadBalancingApi for GatewayClient {
    async fn classic_instance_health(
        &self,
        balancer: &str,
        region: &str,
    ) -> Result<Vec<EndpointState>, CloudError> {
        let request = self.client.get(self.endpoint(&[
            "regions",
            region,
            "classic-balancers",
            balancer,
            "instance-health",
        ]));
        let response: HealthResponse = self.fetch(request, balancer_not_found(balancer)).await?;
        Ok(response.endpoints)
    }

    async fn target_group_health(
        &self,
        target_group: &str,
        region: &str,
    ) -> Result<Vec<EndpointState>, CloudError> {
        let request = self.client.get(self.endpoint(&[
            "regions",
            region,
            "target-groups",
            target_group,
            "target-health",
        ]));
        let response: HealthResponse =
            self.fetch(request, balancer_not_found(target_group)).await?;
        Ok(response.endpoints)
    }
}

#[async_trait]
impl IdentityApi for GatewayClient {
    async fn account_id(&self) -> Result<String, CloudError> {
        let request = self.client.get(self.endpoint(&["identity"]));
        let response: IdentityResponse = self
            .fetch(request, || CloudError::Api {
                status: 404,
                message: "identity endpoint not available".to_string(),
            })
            .await?;
        Ok(response.account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_escapes_segments() {
        let client = GatewayClient::new("http://localhost:9000/", None).unwrap();
        let url = client.endpoint(&[
            "regions",
            "us-east-1",
            "target-groups",
            "arn:aws:elasticloadbalancing:us-east-1:1:targetgroup/web/abc",
            "target-health",
        ]);
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/v1/regions/us-east-1/target-groups/arn:aws:elasticloadbalancing:us-east-1:1:targetgroup%2Fweb%2Fabc/target-health"
        );
    }

    #[test]
    fn test_endpoint_with_base_path() {
        let client = GatewayClient::new("https://gw.internal/fleet", None).unwrap();
        let url = client.endpoint(&["identity"]);
        assert_eq!(url.as_str(), "https://gw.internal/fleet/v1/identity");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            GatewayClient::new("not a url", None),
            Err(CloudError::Http(_))
        ));
        assert!(GatewayClient::new("mailto:ops@example.com", None).is_err());
    }
}
