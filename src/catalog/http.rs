//! HTTP adapter for the service's JSON API.

use super::{ArtifactStream, CatalogClient};
use crate::config::{CatalogConfig, Credentials};
use crate::error::{CatalogError, Error};
use crate::types::{ArtifactKind, ArtifactRef, SyncFilter};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

const LOGIN: &str = "/web/api/auth/login";
const EMPLOYEES: &str = "/web/api/employee/no-paging";
const CLIENTS: &str = "/web/api/client/no-paging";
const CONTRACT_DETAIL: &str = "/web/api/report/check-report-service";
const STS_REPORTS: &str = "/web/api/report/form-sts";
const UPLOADED_FILES: &str = "/web/api/schedule/file-uploaded";

/// How long the image half of a walk stays claimable after the report half
const WALK_REUSE_WINDOW: Duration = Duration::from_secs(300);

/// Technician as known to the remote service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Technician {
    /// Employee id used in report queries
    pub id: i64,
    /// Full name, as used in [`SyncFilter`] technician sets
    pub name: String,
}

/// Authenticated state after a successful login
struct Session {
    token: String,
    branch_id: Value,
    technicians: Vec<Technician>,
}

/// Result of one catalog walk, split by kind
///
/// Each half is handed out once and then dropped, so a later run always walks again.
#[derive(Default)]
struct Walk {
    reports: Option<Vec<ArtifactRef>>,
    images: Option<Vec<ArtifactRef>>,
}

impl Walk {
    fn take(&mut self, kind: ArtifactKind) -> Option<Vec<ArtifactRef>> {
        match kind {
            ArtifactKind::Report => self.reports.take(),
            ArtifactKind::Image => self.images.take(),
        }
    }

    fn is_drained(&self) -> bool {
        self.reports.is_none() && self.images.is_none()
    }
}

/// [`CatalogClient`] backed by the service's HTTP API
///
/// Call [`login`](Self::login) first; listing without a session fails with
/// [`CatalogError::AuthExpired`].
///
/// Reports and their uploaded photos come out of the same walk over
/// clients → contracts → STS reports, so the walk runs once per filter and
/// [`list_reports`](CatalogClient::list_reports) and
/// [`list_images`](CatalogClient::list_images) share it. A report listing always walks
/// afresh, and a cached image half is only handed out shortly after its walk.
pub struct HttpCatalogClient {
    http: reqwest::Client,
    base_url: String,
    session: RwLock<Option<Session>>,
    walk_cache: Mutex<Option<CachedWalk>>,
    reuse_window: Duration,
}

/// Walk kept for the other half of the same run
struct CachedWalk {
    filter: SyncFilter,
    walked_at: Instant,
    walk: Walk,
}

impl HttpCatalogClient {
    /// Create a client for the configured service
    ///
    /// # Errors
    /// Returns error if the base URL is invalid or the HTTP client cannot be created
    pub fn new(config: &CatalogConfig) -> crate::Result<Self> {
        url::Url::parse(&config.base_url).map_err(|e| Error::Config {
            message: format!("invalid catalog base URL '{}': {}", config.base_url, e),
            key: Some("catalog.base_url".to_string()),
        })?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session: RwLock::new(None),
            walk_cache: Mutex::new(None),
            reuse_window: WALK_REUSE_WINDOW,
        })
    }

    /// Override how long a walk's unclaimed half may be handed out
    #[cfg(test)]
    pub(super) fn with_reuse_window(mut self, window: Duration) -> Self {
        self.reuse_window = window;
        self
    }

    /// Authenticate and return the technicians of the account's branch
    ///
    /// A rejected login is reported as [`CatalogError::AuthExpired`].
    pub async fn login(&self, credentials: &Credentials) -> Result<Vec<Technician>, CatalogError> {
        let request = self.http.post(self.url(LOGIN)).json(&json!({
            "username": credentials.username,
            "password": credentials.password,
        }));
        let body = self.send_raw(request, LOGIN).await?;

        let code_ok = body.get("code").and_then(Value::as_i64).is_none_or(|c| c == 200);
        let payload = body.get("body").unwrap_or(&Value::Null);
        let token = payload
            .get("accessToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty());
        let Some(token) = token.filter(|_| code_ok) else {
            return Err(CatalogError::AuthExpired(
                "login rejected: invalid username or password".to_string(),
            ));
        };
        let token = token.to_string();

        let branch_id = payload
            .get("account")
            .and_then(|a| a.get("employee_branch_id"))
            .cloned()
            .unwrap_or(Value::Null);

        let employees = self
            .get_with_token(&token, EMPLOYEES, &[("branch_id", id_text(&branch_id))])
            .await?;
        let technicians: Vec<Technician> = as_array(employees, EMPLOYEES)?
            .iter()
            .filter_map(|e| {
                let id = id_number(e.get("id")?)?;
                let name = e.get("fullname")?.as_str()?.trim();
                (!name.is_empty()).then(|| Technician {
                    id,
                    name: name.to_string(),
                })
            })
            .collect();

        tracing::info!(
            technicians = technicians.len(),
            "Logged in to catalog"
        );

        *self.session.write().await = Some(Session {
            token,
            branch_id,
            technicians: technicians.clone(),
        });
        *self.walk_cache.lock().await = None;

        Ok(technicians)
    }

    /// Whether a session token is held
    pub async fn is_logged_in(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Bearer token of the current session, for downloads that need the same login
    pub async fn session_token(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.token.clone())
    }

    /// Service root every endpoint hangs off
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Drop the session token and any cached listing
    pub async fn logout(&self) {
        *self.session.write().await = None;
        *self.walk_cache.lock().await = None;
    }

    /// Technicians learned at login
    pub async fn technicians(&self) -> Vec<Technician> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.technicians.clone())
            .unwrap_or_default()
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Send a request and decode the JSON response without unwrapping the envelope
    async fn send_raw(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<Value, CatalogError> {
        let response = request.send().await.map_err(|e| {
            let msg = if e.is_timeout() {
                format!("timeout calling {}", endpoint)
            } else {
                format!("{}: {}", endpoint, e)
            };
            CatalogError::Network(msg)
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(CatalogError::AuthExpired(format!(
                "{} answered HTTP {}",
                endpoint,
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(CatalogError::Http {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CatalogError::Protocol {
                endpoint: endpoint.to_string(),
                reason: format!("invalid JSON: {}", e),
            })
    }

    /// Send a request and return the payload under `body` (or `data`)
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<Value, CatalogError> {
        let envelope = self.send_raw(request, endpoint).await?;
        Ok(unwrap_envelope(envelope))
    }

    async fn get_with_token(
        &self,
        token: &str,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Value, CatalogError> {
        let request = self
            .http
            .get(self.url(endpoint))
            .bearer_auth(token)
            .query(query);
        self.send(request, endpoint).await
    }

    async fn post_with_token(
        &self,
        token: &str,
        endpoint: &str,
        body: &Value,
    ) -> Result<Value, CatalogError> {
        let request = self.http.post(self.url(endpoint)).bearer_auth(token).json(body);
        self.send(request, endpoint).await
    }

    /// Walk clients, contracts and STS reports for `filter`
    async fn walk(&self, filter: &SyncFilter) -> Result<Walk, CatalogError> {
        let (token, branch_id, technicians) = {
            let session = self.session.read().await;
            let session = session.as_ref().ok_or_else(|| {
                CatalogError::AuthExpired("not logged in".to_string())
            })?;
            (
                session.token.clone(),
                session.branch_id.clone(),
                session.technicians.clone(),
            )
        };

        let names_by_id: HashMap<i64, String> = technicians
            .iter()
            .map(|t| (t.id, t.name.clone()))
            .collect();
        let employee_ids: Vec<i64> = technicians
            .iter()
            .filter(|t| filter.technicians().contains(&t.name))
            .map(|t| t.id)
            .collect();
        if employee_ids.is_empty() {
            return Err(CatalogError::Protocol {
                endpoint: EMPLOYEES.to_string(),
                reason: "none of the selected technicians belong to this account".to_string(),
            });
        }

        let want_reports = filter.kinds().includes(ArtifactKind::Report);
        let want_images = filter.kinds().includes(ArtifactKind::Image);
        let mut reports = Vec::new();
        let mut images = Vec::new();

        let clients = self
            .get_with_token(&token, CLIENTS, &[("branch_id", id_text(&branch_id))])
            .await?;
        let clients = as_array(clients, CLIENTS)?;
        tracing::debug!(clients = clients.len(), "Walking catalog");

        for client in &clients {
            let Some(client_id) = client.get("id").map(id_text).filter(|s| !s.is_empty()) else {
                continue;
            };
            let client_name = client
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Client_{}", client_id));

            let contracts_endpoint = format!("/web/api/contract/{}/client", client_id);
            let contracts = self
                .get_with_token(&token, &contracts_endpoint, &[("is_void", "yes".to_string())])
                .await?;

            for contract in as_array(contracts, &contracts_endpoint)? {
                let Some(contract_id) = contract.get("id").filter(|v| !v.is_null()).cloned()
                else {
                    continue;
                };

                let sts = self
                    .post_with_token(
                        &token,
                        STS_REPORTS,
                        &json!({ "contract_id": contract_id, "employee_ids": employee_ids }),
                    )
                    .await?;
                let in_range: Vec<Value> = as_array(sts, STS_REPORTS)?
                    .into_iter()
                    .filter(|r| {
                        report_date(r).is_some_and(|d| filter.contains_date(d))
                            && r.get("schedule_id").is_some_and(|v| !id_text(v).is_empty())
                    })
                    .collect();
                if in_range.is_empty() {
                    continue;
                }

                tracing::debug!(
                    client = %client_name,
                    contract_id = %id_text(&contract_id),
                    reports = in_range.len(),
                    "Found STS reports in range"
                );

                let contract_detail = if want_reports {
                    self.post_with_token(
                        &token,
                        CONTRACT_DETAIL,
                        &json!({ "contract_id": contract_id }),
                    )
                    .await?
                } else {
                    Value::Null
                };
                let contract_info = contract_detail.get("contract").unwrap_or(&Value::Null);
                let client_address = contract_info
                    .get("clients")
                    .and_then(|c| c.get("address"))
                    .and_then(Value::as_str)
                    .unwrap_or("N/A");
                let branch_name = contract_info
                    .get("branches")
                    .and_then(|b| b.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or("N/A");

                for report in in_range {
                    let Some(created_at) = report_date(&report) else {
                        continue;
                    };
                    let schedule_id = report.get("schedule_id").map(id_text).unwrap_or_default();
                    let technician_name = report
                        .get("employee_id")
                        .and_then(id_number)
                        .and_then(|id| names_by_id.get(&id).cloned())
                        .or_else(|| {
                            report
                                .get("employee_name")
                                .and_then(Value::as_str)
                                .map(str::to_string)
                        })
                        .unwrap_or_else(|| "Unknown_Technician".to_string());

                    let files = self
                        .post_with_token(
                            &token,
                            UPLOADED_FILES,
                            &json!({ "schedule_id": report["schedule_id"], "type": "sts" }),
                        )
                        .await?;
                    let files = as_array(files, UPLOADED_FILES)?;

                    if want_images {
                        for file in &files {
                            let url = file.get("filename").and_then(Value::as_str).unwrap_or("");
                            let file_id = file.get("id").map(id_text).unwrap_or_default();
                            if url.is_empty() || file_id.is_empty() {
                                continue;
                            }
                            images.push(ArtifactRef {
                                kind: ArtifactKind::Image,
                                remote_id: format!("{}_{}", schedule_id, file_id),
                                technician_name: technician_name.clone(),
                                client_name: client_name.clone(),
                                created_at,
                                source_url: url.to_string(),
                                details: None,
                            });
                        }
                    }

                    if want_reports {
                        let mut details = match report {
                            Value::Object(map) => map,
                            _ => Map::new(),
                        };
                        details
                            .entry("client_name")
                            .or_insert_with(|| Value::String(client_name.clone()));
                        details.insert("client_address".into(), client_address.into());
                        details.insert("branch_name".into(), branch_name.into());
                        details.insert("uploaded_files".into(), Value::Array(files));

                        reports.push(ArtifactRef {
                            kind: ArtifactKind::Report,
                            remote_id: schedule_id,
                            technician_name,
                            client_name: client_name.clone(),
                            created_at,
                            source_url: String::new(),
                            details: Some(Value::Object(details)),
                        });
                    }
                }
            }
        }

        tracing::info!(
            reports = reports.len(),
            images = images.len(),
            "Catalog walk complete"
        );

        Ok(Walk {
            reports: want_reports.then_some(reports),
            images: want_images.then_some(images),
        })
    }

    /// Hand out one kind of a walk's result, walking first if nothing is cached
    async fn take_listing(
        &self,
        filter: &SyncFilter,
        kind: ArtifactKind,
    ) -> Result<Vec<ArtifactRef>, CatalogError> {
        let mut cache = self.walk_cache.lock().await;

        // Reports open a run; anything left from an earlier, abandoned run is stale
        if kind == ArtifactKind::Report {
            *cache = None;
        }

        let cached = match cache.as_mut() {
            Some(c) if c.filter == *filter && c.walked_at.elapsed() < self.reuse_window => {
                c.walk.take(kind)
            }
            _ => None,
        };

        let items = match cached {
            Some(items) => items,
            None => {
                let mut walk = self.walk(filter).await?;
                let items = walk.take(kind).unwrap_or_default();
                *cache = Some(CachedWalk {
                    filter: filter.clone(),
                    walked_at: Instant::now(),
                    walk,
                });
                items
            }
        };

        if cache.as_ref().is_some_and(|c| c.walk.is_drained()) {
            *cache = None;
        }

        Ok(items)
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn list_reports(&self, filter: &SyncFilter) -> Result<ArtifactStream, CatalogError> {
        let items = self.take_listing(filter, ArtifactKind::Report).await?;
        Ok(futures::stream::iter(items.into_iter().map(Ok)).boxed())
    }

    async fn list_images(&self, filter: &SyncFilter) -> Result<ArtifactStream, CatalogError> {
        let items = self.take_listing(filter, ArtifactKind::Image).await?;
        Ok(futures::stream::iter(items.into_iter().map(Ok)).boxed())
    }
}

/// Payload under `body`, falling back to `data`
fn unwrap_envelope(envelope: Value) -> Value {
    let Value::Object(mut map) = envelope else {
        return envelope;
    };
    match map.remove("body") {
        Some(body) if !body.is_null() => body,
        _ => map.remove("data").unwrap_or(Value::Null),
    }
}

/// Treat a payload as a list; a missing payload is an empty list
fn as_array(payload: Value, endpoint: &str) -> Result<Vec<Value>, CatalogError> {
    match payload {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(CatalogError::Protocol {
            endpoint: endpoint.to_string(),
            reason: format!("expected a list, got {}", json_type(&other)),
        }),
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Identifier as text; numbers and strings are both used by the API
fn id_text(v: &Value) -> String {
    match v {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => String::new(),
    }
}

fn id_number(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Service date of an STS report (`date_work`, `YYYY-MM-DD`)
fn report_date(report: &Value) -> Option<NaiveDate> {
    let raw = report.get("date_work")?.as_str()?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}
