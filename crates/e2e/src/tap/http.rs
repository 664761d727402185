//! TAP client over HTTP

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use rspval_common::{ApiEndpoint, Config, TapApplication};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{E2eError, E2eResult};
use crate::tap::votable::{parse_job, parse_tableset, parse_votable};
use crate::tap::{JobInfo, JobPhase, JobPolling, TapClient, TapResultSet};

/// Interval between phase checks while waiting for an async query
const ASYNC_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long an async query may stay queued or executing
const ASYNC_QUERY_TIMEOUT: Duration = Duration::from_secs(600);

/// TAP client authenticating with a bearer token.
///
/// `reqwest::Client` pools connections internally and is safe to share, so a
/// single instance may serve every simulated user of a scenario.
#[derive(Debug, Clone)]
pub struct HttpTapClient {
    http: reqwest::Client,
    service_url: String,
    async_polling: JobPolling,
}

impl HttpTapClient {
    /// Build a client for a TAP application of the configured deployment
    pub fn new(config: &Config, app: TapApplication) -> E2eResult<Self> {
        Self::with_url(config.api_endpoint(ApiEndpoint::Tap, app), &config.token)
    }

    /// Build a client for an arbitrary TAP service root
    pub fn with_url(service_url: impl Into<String>, token: &str) -> E2eResult<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| E2eError::InvalidArgument(format!("Invalid token: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            service_url: service_url.into().trim_end_matches('/').to_string(),
            async_polling: JobPolling {
                interval: ASYNC_POLL_INTERVAL,
                ceiling: ASYNC_QUERY_TIMEOUT,
            },
        })
    }

    /// Change how async queries wait for their job
    pub fn with_async_polling(mut self, polling: JobPolling) -> Self {
        self.async_polling = polling;
        self
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}{}", self.service_url, suffix)
    }

    async fn get_bytes(&self, url: &str) -> E2eResult<Vec<u8>> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn fetch_result(&self, job_url: &str, info: &JobInfo) -> E2eResult<TapResultSet> {
        let url = info
            .result_hrefs
            .first()
            .cloned()
            .unwrap_or_else(|| format!("{}/results/result", job_url));
        debug!("Fetching job result from {}", url);
        parse_votable(&self.get_bytes(&url).await?)
    }
}

fn query_form(query: &str) -> [(&'static str, &str); 3] {
    [("LANG", "ADQL"), ("REQUEST", "doQuery"), ("QUERY", query)]
}

#[async_trait]
impl TapClient for HttpTapClient {
    fn service_url(&self) -> &str {
        &self.service_url
    }

    async fn run_sync(&self, query: &str) -> E2eResult<TapResultSet> {
        let response = self
            .http
            .post(self.url("/sync"))
            .form(&query_form(query))
            .send()
            .await?
            .error_for_status()?;

        parse_votable(&response.bytes().await?)
    }

    async fn run_async(&self, query: &str) -> E2eResult<TapResultSet> {
        let job_url = self.submit_job(query).await?;
        self.run_job(&job_url).await?;

        let start = Instant::now();
        let mut phase = self.job_phase(&job_url).await?;
        while phase.is_active() {
            if start.elapsed() > self.async_polling.ceiling {
                if let Err(e) = self.delete_job(&job_url).await {
                    warn!("Failed to delete job {}: {}", job_url, e);
                }
                return Err(E2eError::JobTimeout {
                    job_id: job_url.rsplit('/').next().unwrap_or(&job_url).to_string(),
                    phase: phase.to_string(),
                    waited_secs: start.elapsed().as_secs_f64(),
                });
            }
            sleep(self.async_polling.interval).await;
            phase = self.job_phase(&job_url).await?;
        }

        let info = self.job_info(&job_url).await?;
        let result = if phase == JobPhase::Completed {
            self.fetch_result(&job_url, &info).await
        } else {
            Err(E2eError::Tap(format!(
                "job {} finished in phase {}",
                info.job_id.as_deref().unwrap_or(&job_url),
                phase
            )))
        };

        if let Err(e) = self.delete_job(&job_url).await {
            warn!("Failed to delete job {}: {}", job_url, e);
        }

        result
    }

    async fn tables(&self) -> E2eResult<Vec<String>> {
        parse_tableset(&self.get_bytes(&self.url("/tables")).await?)
    }

    async fn capabilities(&self) -> E2eResult<Vec<u8>> {
        self.get_bytes(&self.url("/capabilities")).await
    }

    async fn submit_job(&self, query: &str) -> E2eResult<String> {
        // The service answers with a 303 to the new job, which reqwest follows
        let response = self
            .http
            .post(self.url("/async"))
            .form(&query_form(query))
            .send()
            .await?
            .error_for_status()?;

        let job_url = response.url().to_string();
        if job_url.trim_end_matches('/') == self.url("/async") {
            return Err(E2eError::Tap("job creation did not redirect to a job".to_string()));
        }

        debug!("Created job {}", job_url);
        Ok(job_url)
    }

    async fn run_job(&self, job_url: &str) -> E2eResult<()> {
        self.http
            .post(format!("{}/phase", job_url))
            .form(&[("PHASE", "RUN")])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn job_phase(&self, job_url: &str) -> E2eResult<JobPhase> {
        let response = self
            .http
            .get(format!("{}/phase", job_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(JobPhase::parse(&response.text().await?))
    }

    async fn job_info(&self, job_url: &str) -> E2eResult<JobInfo> {
        parse_job(&self.get_bytes(job_url).await?)
    }

    async fn delete_job(&self, job_url: &str) -> E2eResult<()> {
        self.http.delete(job_url).send().await?.error_for_status()?;
        Ok(())
    }
}
