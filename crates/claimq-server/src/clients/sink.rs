//! Persistence service client.

use super::build_client;
use async_trait::async_trait;
use claimq_config::SinkConfig;
use claimq_core::ClaimqResult;
use claimq_jobs::{Artifact, Job, PermanentFailure, ResultSink, SinkError};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

/// [`ResultSink`] posting to the persistence service.
pub struct HttpResultSink {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ArtifactRecord<'a> {
    job: &'a Job,
    artifact: &'a Artifact,
}

impl HttpResultSink {
    /// Creates a new sink client.
    pub fn new(config: &SinkConfig) -> ClaimqResult<Self> {
        Ok(Self {
            client: build_client("sink", config.request_timeout())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(SinkError::Rejected(format!("{}: {}", status, text)))
        } else {
            Err(SinkError::Unavailable(format!("{}: {}", status, text)))
        }
    }
}

#[async_trait]
impl ResultSink for HttpResultSink {
    async fn write_permanent_failure(&self, failure: &PermanentFailure) -> Result<(), SinkError> {
        debug!(key = %failure.key, failures = failure.failures, "Writing permanent failure");
        self.post("/failures", failure).await
    }

    async fn write_artifact(&self, job: &Job, artifact: &Artifact) -> Result<(), SinkError> {
        debug!(key = %job.key, "Writing artifact");
        let job = job.redacted();
        self.post(
            "/artifacts",
            &ArtifactRecord {
                job: &job,
                artifact,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimq_jobs::{JobRequest, WorkerError};
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sink(base_url: String) -> HttpResultSink {
        HttpResultSink::new(&SinkConfig {
            base_url,
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    async fn accepting_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        server
    }

    async fn received_bodies(server: &MockServer, route: &str) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.url.path() == route)
            .map(|request| request.body_json::<Value>().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_write_permanent_failure() {
        let server = accepting_server().await;
        let job = Job::new(JobRequest::new("100", "ABC")).unwrap();
        let failure = PermanentFailure::new(&job, &WorkerError::Failed("timeout".into()), 10);

        sink(server.uri()).write_permanent_failure(&failure).await.unwrap();

        let bodies = received_bodies(&server, "/failures").await;
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["key"]["record_id"], "100");
        assert_eq!(bodies[0]["failures"], 10);
    }

    #[tokio::test]
    async fn test_write_artifact_redacts_credentials() {
        let server = accepting_server().await;
        let job = Job::new(JobRequest::new("100", "ABC").credentials("agent", "s3cret")).unwrap();

        sink(server.uri())
            .write_artifact(&job, &json!({ "parts": 3 }))
            .await
            .unwrap();

        let bodies = received_bodies(&server, "/artifacts").await;
        assert_eq!(bodies[0]["artifact"]["parts"], 3);
        assert_eq!(bodies[0]["job"]["payload"]["credentials"]["password"], "***");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/failures"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/artifacts"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sink = sink(server.uri());
        let job = Job::new(JobRequest::new("1", "A")).unwrap();
        let failure = PermanentFailure::new(&job, &WorkerError::Crashed("panic".into()), 10);

        assert!(matches!(
            sink.write_permanent_failure(&failure).await,
            Err(SinkError::Rejected(_))
        ));
        assert!(matches!(
            sink.write_artifact(&job, &Artifact::Null).await,
            Err(SinkError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_sink() {
        let sink = sink("http://127.0.0.1:1".to_string());
        let job = Job::new(JobRequest::new("1", "A")).unwrap();

        assert!(matches!(
            sink.write_artifact(&job, &Artifact::Null).await,
            Err(SinkError::Unavailable(_))
        ));
    }
}
