use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::sleep;

use crate::polycloud::common::config_store::RuntimeConfig;
use crate::polycloud::driver::types::{
    AutoscaleSizeReqInfo, ClusterInfo, ClusterReqInfo, DiskAttachReqInfo, DiskInfo, DiskReqInfo,
    ImageInfo, KeyPairInfo, KeyPairReqInfo, ReqWrapper, SecurityGroupInfo, SecurityGroupReqInfo,
    SubnetReqInfo, UpgradeClusterReqInfo, VmInfo, VmReqInfo, VmSpecInfo, VmStatusInfo, VpcInfo,
    VpcReqInfo,
};
use crate::polycloud::logger::log_warn;
use crate::polycloud::observability::metrics;

const DRIVER_COMPONENT: &str = "driver";
const RETRY_ATTEMPTS: usize = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Deadline class attached to every outbound driver request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeoutClass {
    Short,
    Medium,
    Long,
    VeryLong,
}

impl TimeoutClass {
    pub fn deadline(self) -> Duration {
        match self {
            TimeoutClass::Short => Duration::from_secs(5),
            TimeoutClass::Medium => Duration::from_secs(30),
            TimeoutClass::Long => Duration::from_secs(300),
            TimeoutClass::VeryLong => Duration::from_secs(1800),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    fn is_idempotent(self) -> bool {
        matches!(self, HttpMethod::Get)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DriverFailureKind {
    BadRequest,
    NotFound,
    Conflict,
    Unavailable,
    Timeout,
    Other,
}

impl DriverFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DriverFailureKind::BadRequest => "BadRequest",
            DriverFailureKind::NotFound => "NotFound",
            DriverFailureKind::Conflict => "Conflict",
            DriverFailureKind::Unavailable => "Unavailable",
            DriverFailureKind::Timeout => "Timeout",
            DriverFailureKind::Other => "Other",
        }
    }
}

/// Upstream driver failure carrying the sub-kind and raw driver message.
#[derive(Clone, Debug)]
pub struct DriverFailure {
    pub kind: DriverFailureKind,
    pub status: Option<u16>,
    pub message: String,
}

impl DriverFailure {
    pub fn new(kind: DriverFailureKind, message: impl Into<String>) -> Self {
        DriverFailure {
            kind,
            status: None,
            message: message.into(),
        }
    }

    fn from_status(status: u16, message: String) -> Self {
        let kind = match status {
            400 => DriverFailureKind::BadRequest,
            404 => DriverFailureKind::NotFound,
            409 => DriverFailureKind::Conflict,
            408 | 504 => DriverFailureKind::Timeout,
            429 | 502 | 503 => DriverFailureKind::Unavailable,
            _ => DriverFailureKind::Other,
        };
        DriverFailure {
            kind,
            status: Some(status),
            message,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DriverFailureKind::Unavailable | DriverFailureKind::Timeout
        )
    }
}

impl fmt::Display for DriverFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(
                f,
                "driver {} (status {}): {}",
                self.kind.as_str(),
                status,
                self.message
            ),
            None => write!(f, "driver {}: {}", self.kind.as_str(), self.message),
        }
    }
}

impl Error for DriverFailure {}

/// A single outbound driver call, fully described.
#[derive(Clone, Debug)]
pub struct DriverRequest {
    pub endpoint: &'static str,
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
    pub timeout: TimeoutClass,
}

pub type DriverFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, DriverFailure>> + Send + 'a>>;

/// Single choke point for every outbound cloud effect. Implementations other
/// than [`HttpTransport`] exist only for tests.
pub trait DriverTransport: Send + Sync {
    fn execute(&self, request: DriverRequest) -> DriverFuture<'_>;
}

fn next_backoff(current: Duration) -> Duration {
    current
        .checked_mul(2)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}

/// Production transport speaking HTTP to the Spider driver. The base URL is
/// read from the live config mirror on every request so config updates take
/// effect without restarting.
pub struct HttpTransport {
    client: reqwest::Client,
    runtime: Arc<RuntimeConfig>,
    credentials: Option<(String, String)>,
}

impl HttpTransport {
    pub fn new(runtime: Arc<RuntimeConfig>) -> Self {
        HttpTransport {
            client: reqwest::Client::new(),
            runtime,
            credentials: None,
        }
    }

    pub fn with_basic_auth(runtime: Arc<RuntimeConfig>, user: String, password: String) -> Self {
        HttpTransport {
            client: reqwest::Client::new(),
            runtime,
            credentials: Some((user, password)),
        }
    }

    async fn send_once(&self, request: &DriverRequest) -> Result<Value, DriverFailure> {
        let base = self.runtime.spider_rest_url();
        let url = format!("{}{}", base.trim_end_matches('/'), request.path);

        let mut builder = self
            .client
            .request(request.method.as_reqwest(), url.as_str())
            .timeout(request.timeout.deadline());

        if let Some((user, password)) = self.credentials.as_ref() {
            builder = builder.basic_auth(user, Some(password));
        }

        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                DriverFailure::new(DriverFailureKind::Timeout, err.to_string())
            } else if err.is_connect() {
                DriverFailure::new(DriverFailureKind::Unavailable, err.to_string())
            } else {
                DriverFailure::new(DriverFailureKind::Other, err.to_string())
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|err| {
            DriverFailure::new(
                DriverFailureKind::Other,
                format!("failed to read driver response: {err}"),
            )
        })?;

        if !status.is_success() {
            return Err(DriverFailure::from_status(status.as_u16(), text));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|err| {
            DriverFailure::new(
                DriverFailureKind::Other,
                format!("driver returned malformed JSON: {err}"),
            )
        })
    }
}

impl DriverTransport for HttpTransport {
    fn execute(&self, request: DriverRequest) -> DriverFuture<'_> {
        Box::pin(async move {
            let started = Instant::now();
            let mut backoff = RETRY_BACKOFF;
            let mut attempt = 0;

            let outcome = loop {
                attempt += 1;
                match self.send_once(&request).await {
                    Ok(value) => break Ok(value),
                    Err(failure) => {
                        // Only idempotent reads are retried; mutating calls
                        // must surface the first failure untouched.
                        if request.method.is_idempotent()
                            && failure.is_retryable()
                            && attempt < RETRY_ATTEMPTS
                        {
                            log_warn(
                                DRIVER_COMPONENT,
                                "Retrying idempotent driver request",
                                &[
                                    ("endpoint", request.endpoint),
                                    ("attempt", &attempt.to_string()),
                                    ("cause", failure.kind.as_str()),
                                ],
                            );
                            sleep(backoff).await;
                            backoff = next_backoff(backoff);
                            continue;
                        }
                        break Err(failure);
                    }
                }
            };

            let result_label = match &outcome {
                Ok(_) => "ok",
                Err(failure) => failure.kind.as_str(),
            };
            metrics::record_driver_request(request.endpoint, result_label, started.elapsed());

            outcome
        })
    }
}

/// Typed facade over the transport: one method per driver endpoint, request
/// wrappers built here, responses decoded into the structs of
/// [`crate::polycloud::driver::types`].
#[derive(Clone)]
pub struct DriverClient {
    transport: Arc<dyn DriverTransport>,
}

impl DriverClient {
    pub fn new(transport: Arc<dyn DriverTransport>) -> Self {
        DriverClient { transport }
    }

    async fn call<T: DeserializeOwned>(&self, request: DriverRequest) -> Result<T, DriverFailure> {
        let value = self.transport.execute(request).await?;
        serde_json::from_value(value).map_err(|err| {
            DriverFailure::new(
                DriverFailureKind::Other,
                format!("failed to decode driver response: {err}"),
            )
        })
    }

    fn wrap<T: Serialize>(connection_name: &str, req_info: T) -> Value {
        serde_json::to_value(ReqWrapper {
            connection_name: connection_name.to_string(),
            req_info,
        })
        .expect("driver request wrappers always serialize")
    }

    fn connection_body(connection_name: &str) -> Value {
        serde_json::json!({ "ConnectionName": connection_name })
    }

    pub async fn create_vpc(
        &self,
        connection_name: &str,
        req: VpcReqInfo,
    ) -> Result<VpcInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "vpc",
            method: HttpMethod::Post,
            path: "/vpc".to_string(),
            body: Some(Self::wrap(connection_name, req)),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn lookup_vpc(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<VpcInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "vpc",
            method: HttpMethod::Get,
            path: format!("/vpc/{name}"),
            body: Some(Self::connection_body(connection_name)),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn register_vpc(
        &self,
        connection_name: &str,
        req: VpcReqInfo,
    ) -> Result<VpcInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "regvpc",
            method: HttpMethod::Post,
            path: "/regvpc".to_string(),
            body: Some(Self::wrap(connection_name, req)),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn delete_vpc(
        &self,
        connection_name: &str,
        name: &str,
        force: bool,
    ) -> Result<(), DriverFailure> {
        let path = if force {
            format!("/vpc/{name}?force=true")
        } else {
            format!("/vpc/{name}")
        };
        self.transport
            .execute(DriverRequest {
                endpoint: "vpc",
                method: HttpMethod::Delete,
                path,
                body: Some(Self::connection_body(connection_name)),
                timeout: TimeoutClass::Medium,
            })
            .await?;
        Ok(())
    }

    pub async fn create_subnet(
        &self,
        connection_name: &str,
        vpc_name: &str,
        req: SubnetReqInfo,
    ) -> Result<VpcInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "subnet",
            method: HttpMethod::Post,
            path: format!("/vpc/{vpc_name}/subnet"),
            body: Some(Self::wrap(connection_name, req)),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn delete_subnet(
        &self,
        connection_name: &str,
        vpc_name: &str,
        name: &str,
        force: bool,
    ) -> Result<(), DriverFailure> {
        let path = if force {
            format!("/vpc/{vpc_name}/subnet/{name}?force=true")
        } else {
            format!("/vpc/{vpc_name}/subnet/{name}")
        };
        self.transport
            .execute(DriverRequest {
                endpoint: "subnet",
                method: HttpMethod::Delete,
                path,
                body: Some(Self::connection_body(connection_name)),
                timeout: TimeoutClass::Medium,
            })
            .await?;
        Ok(())
    }

    pub async fn create_security_group(
        &self,
        connection_name: &str,
        req: SecurityGroupReqInfo,
    ) -> Result<SecurityGroupInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "securitygroup",
            method: HttpMethod::Post,
            path: "/securitygroup".to_string(),
            body: Some(Self::wrap(connection_name, req)),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn delete_security_group(
        &self,
        connection_name: &str,
        name: &str,
        force: bool,
    ) -> Result<(), DriverFailure> {
        let path = if force {
            format!("/securitygroup/{name}?force=true")
        } else {
            format!("/securitygroup/{name}")
        };
        self.transport
            .execute(DriverRequest {
                endpoint: "securitygroup",
                method: HttpMethod::Delete,
                path,
                body: Some(Self::connection_body(connection_name)),
                timeout: TimeoutClass::Medium,
            })
            .await?;
        Ok(())
    }

    pub async fn create_keypair(
        &self,
        connection_name: &str,
        req: KeyPairReqInfo,
    ) -> Result<KeyPairInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "keypair",
            method: HttpMethod::Post,
            path: "/keypair".to_string(),
            body: Some(Self::wrap(connection_name, req)),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn delete_keypair(
        &self,
        connection_name: &str,
        name: &str,
        force: bool,
    ) -> Result<(), DriverFailure> {
        let path = if force {
            format!("/keypair/{name}?force=true")
        } else {
            format!("/keypair/{name}")
        };
        self.transport
            .execute(DriverRequest {
                endpoint: "keypair",
                method: HttpMethod::Delete,
                path,
                body: Some(Self::connection_body(connection_name)),
                timeout: TimeoutClass::Medium,
            })
            .await?;
        Ok(())
    }

    pub async fn lookup_image(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<ImageInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "vmimage",
            method: HttpMethod::Get,
            path: format!("/vmimage/{name}"),
            body: Some(Self::connection_body(connection_name)),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn lookup_vm_spec(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<VmSpecInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "vmspec",
            method: HttpMethod::Get,
            path: format!("/vmspec/{name}"),
            body: Some(Self::connection_body(connection_name)),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn start_vm(
        &self,
        connection_name: &str,
        req: VmReqInfo,
    ) -> Result<VmInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "vm",
            method: HttpMethod::Post,
            path: "/vm".to_string(),
            body: Some(Self::wrap(connection_name, req)),
            timeout: TimeoutClass::Long,
        })
        .await
    }

    pub async fn lookup_vm(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<VmInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "vm",
            method: HttpMethod::Get,
            path: format!("/vm/{name}"),
            body: Some(Self::connection_body(connection_name)),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn vm_status(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<VmStatusInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "vmstatus",
            method: HttpMethod::Get,
            path: format!("/vmstatus/{name}"),
            body: Some(Self::connection_body(connection_name)),
            timeout: TimeoutClass::Short,
        })
        .await
    }

    pub async fn control_vm(
        &self,
        connection_name: &str,
        name: &str,
        action: &str,
    ) -> Result<VmStatusInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "controlvm",
            method: HttpMethod::Get,
            path: format!("/controlvm/{name}?action={action}"),
            body: Some(Self::connection_body(connection_name)),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn terminate_vm(
        &self,
        connection_name: &str,
        name: &str,
        force: bool,
    ) -> Result<(), DriverFailure> {
        let path = if force {
            format!("/vm/{name}?force=true")
        } else {
            format!("/vm/{name}")
        };
        self.transport
            .execute(DriverRequest {
                endpoint: "vm",
                method: HttpMethod::Delete,
                path,
                body: Some(Self::connection_body(connection_name)),
                timeout: TimeoutClass::Long,
            })
            .await?;
        Ok(())
    }

    pub async fn create_disk(
        &self,
        connection_name: &str,
        req: DiskReqInfo,
    ) -> Result<DiskInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "disk",
            method: HttpMethod::Post,
            path: "/disk".to_string(),
            body: Some(Self::wrap(connection_name, req)),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn delete_disk(
        &self,
        connection_name: &str,
        name: &str,
        force: bool,
    ) -> Result<(), DriverFailure> {
        let path = if force {
            format!("/disk/{name}?force=true")
        } else {
            format!("/disk/{name}")
        };
        self.transport
            .execute(DriverRequest {
                endpoint: "disk",
                method: HttpMethod::Delete,
                path,
                body: Some(Self::connection_body(connection_name)),
                timeout: TimeoutClass::Medium,
            })
            .await?;
        Ok(())
    }

    pub async fn attach_disk(
        &self,
        connection_name: &str,
        disk_name: &str,
        vm_name: &str,
    ) -> Result<DiskInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "disk",
            method: HttpMethod::Put,
            path: format!("/disk/{disk_name}/attach"),
            body: Some(Self::wrap(
                connection_name,
                DiskAttachReqInfo {
                    vm_name: vm_name.to_string(),
                },
            )),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn detach_disk(
        &self,
        connection_name: &str,
        disk_name: &str,
        vm_name: &str,
    ) -> Result<(), DriverFailure> {
        self.transport
            .execute(DriverRequest {
                endpoint: "disk",
                method: HttpMethod::Put,
                path: format!("/disk/{disk_name}/detach"),
                body: Some(Self::wrap(
                    connection_name,
                    DiskAttachReqInfo {
                        vm_name: vm_name.to_string(),
                    },
                )),
                timeout: TimeoutClass::Medium,
            })
            .await?;
        Ok(())
    }

    pub async fn create_cluster(
        &self,
        connection_name: &str,
        req: ClusterReqInfo,
    ) -> Result<ClusterInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "cluster",
            method: HttpMethod::Post,
            path: "/cluster".to_string(),
            body: Some(Self::wrap(connection_name, req)),
            timeout: TimeoutClass::VeryLong,
        })
        .await
    }

    pub async fn get_cluster(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<ClusterInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "cluster",
            method: HttpMethod::Get,
            path: format!("/cluster/{name}"),
            body: Some(Self::connection_body(connection_name)),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn delete_cluster(
        &self,
        connection_name: &str,
        name: &str,
        force: bool,
    ) -> Result<(), DriverFailure> {
        let path = if force {
            format!("/cluster/{name}?force=true")
        } else {
            format!("/cluster/{name}")
        };
        self.transport
            .execute(DriverRequest {
                endpoint: "cluster",
                method: HttpMethod::Delete,
                path,
                body: Some(Self::connection_body(connection_name)),
                timeout: TimeoutClass::Long,
            })
            .await?;
        Ok(())
    }

    pub async fn add_node_group(
        &self,
        connection_name: &str,
        cluster_name: &str,
        req: crate::polycloud::driver::types::NodeGroupReqInfo,
    ) -> Result<ClusterInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "nodegroup",
            method: HttpMethod::Post,
            path: format!("/cluster/{cluster_name}/nodegroup"),
            body: Some(Self::wrap(connection_name, req)),
            timeout: TimeoutClass::Long,
        })
        .await
    }

    pub async fn remove_node_group(
        &self,
        connection_name: &str,
        cluster_name: &str,
        node_group_name: &str,
    ) -> Result<(), DriverFailure> {
        self.transport
            .execute(DriverRequest {
                endpoint: "nodegroup",
                method: HttpMethod::Delete,
                path: format!("/cluster/{cluster_name}/nodegroup/{node_group_name}"),
                body: Some(Self::connection_body(connection_name)),
                timeout: TimeoutClass::Long,
            })
            .await?;
        Ok(())
    }

    pub async fn set_node_group_autoscaling(
        &self,
        connection_name: &str,
        cluster_name: &str,
        node_group_name: &str,
        on: bool,
    ) -> Result<(), DriverFailure> {
        self.transport
            .execute(DriverRequest {
                endpoint: "nodegroup",
                method: HttpMethod::Put,
                path: format!("/cluster/{cluster_name}/nodegroup/{node_group_name}/onautoscaling"),
                body: Some(serde_json::json!({
                    "ConnectionName": connection_name,
                    "ReqInfo": { "OnAutoScaling": on },
                })),
                timeout: TimeoutClass::Medium,
            })
            .await?;
        Ok(())
    }

    pub async fn change_node_group_scale(
        &self,
        connection_name: &str,
        cluster_name: &str,
        node_group_name: &str,
        req: AutoscaleSizeReqInfo,
    ) -> Result<ClusterInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "nodegroup",
            method: HttpMethod::Put,
            path: format!("/cluster/{cluster_name}/nodegroup/{node_group_name}/autoscalesize"),
            body: Some(Self::wrap(connection_name, req)),
            timeout: TimeoutClass::Medium,
        })
        .await
    }

    pub async fn upgrade_cluster(
        &self,
        connection_name: &str,
        cluster_name: &str,
        version: &str,
    ) -> Result<ClusterInfo, DriverFailure> {
        self.call(DriverRequest {
            endpoint: "cluster",
            method: HttpMethod::Put,
            path: format!("/cluster/{cluster_name}/upgrade"),
            body: Some(Self::wrap(
                connection_name,
                UpgradeClusterReqInfo {
                    version: version.to_string(),
                },
            )),
            timeout: TimeoutClass::Long,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_classes_are_ordered() {
        assert!(TimeoutClass::Short.deadline() < TimeoutClass::Medium.deadline());
        assert!(TimeoutClass::Medium.deadline() < TimeoutClass::Long.deadline());
        assert!(TimeoutClass::Long.deadline() < TimeoutClass::VeryLong.deadline());
    }

    #[test]
    fn status_codes_map_to_failure_kinds() {
        assert_eq!(
            DriverFailure::from_status(400, String::new()).kind,
            DriverFailureKind::BadRequest
        );
        assert_eq!(
            DriverFailure::from_status(404, String::new()).kind,
            DriverFailureKind::NotFound
        );
        assert_eq!(
            DriverFailure::from_status(409, String::new()).kind,
            DriverFailureKind::Conflict
        );
        assert_eq!(
            DriverFailure::from_status(503, String::new()).kind,
            DriverFailureKind::Unavailable
        );
        assert_eq!(
            DriverFailure::from_status(504, String::new()).kind,
            DriverFailureKind::Timeout
        );
        assert_eq!(
            DriverFailure::from_status(500, String::new()).kind,
            DriverFailureKind::Other
        );
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let first = next_backoff(RETRY_BACKOFF);
        assert_eq!(first, Duration::from_millis(400));
        let capped = next_backoff(Duration::from_secs(90));
        assert_eq!(capped, MAX_BACKOFF);
    }

    #[test]
    fn only_gets_are_idempotent() {
        assert!(HttpMethod::Get.is_idempotent());
        assert!(!HttpMethod::Post.is_idempotent());
        assert!(!HttpMethod::Delete.is_idempotent());
        assert!(!HttpMethod::Put.is_idempotent());
    }
}
