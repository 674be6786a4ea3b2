use std::{
    fmt,
    time::{Duration, Instant},
};

use reqwest::StatusCode;
use tokio::time;

use crate::error::Error;

/// One captured probe: the status code and body observed at an endpoint.
#[derive(Clone, Debug)]
pub struct ProbeResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ProbeResponse {
    pub fn body_contains(&self, needle: &str) -> bool {
        self.body.contains(needle)
    }
}

/// What a poll loop saw on its final attempt, carried into the timeout error.
#[derive(Debug)]
pub enum LastObservation {
    /// No probe completed before the deadline.
    None,
    /// The endpoint responded, with the wrong status.
    Status { status: StatusCode, body: String },
    /// A non-HTTP observation, such as a transport failure.
    Other(String),
}

impl fmt::Display for LastObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "nothing"),
            Self::Status { status, body } => {
                let trimmed = body.trim();
                let shown: String = trimmed.chars().take(200).collect();
                let ellipsis = if trimmed.chars().count() > 200 { "…" } else { "" };
                write!(f, "{status} with body {shown:?}{ellipsis}")
            }
            Self::Other(what) => write!(f, "{what}"),
        }
    }
}

/// Issues a single GET and captures the response.
pub async fn get(http: &reqwest::Client, url: &str) -> Result<ProbeResponse, reqwest::Error> {
    let rsp = http.get(url).send().await?;
    let status = rsp.status();
    let body = rsp.text().await?;
    Ok(ProbeResponse { status, body })
}

/// Fixed-interval poller with a bounded deadline.
#[derive(Copy, Clone, Debug)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
}

impl Poller {
    pub const INTERVAL: Duration = Duration::from_secs(1);
    pub const READINESS_TIMEOUT: Duration = Duration::from_secs(180);
    pub const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(300);

    /// Waits for an endpoint that is expected to already be serving.
    pub fn readiness() -> Self {
        Self::new(Self::INTERVAL, Self::READINESS_TIMEOUT)
    }

    /// Waits out policy propagation or pod replacement.
    pub fn convergence() -> Self {
        Self::new(Self::INTERVAL, Self::CONVERGENCE_TIMEOUT)
    }

    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Polls `url` until it returns `expected`, returning the first matching
    /// response. An endpoint that already matches returns without sleeping.
    /// Transport failures are observations, not errors: the endpoint may
    /// legitimately be unreachable until the cluster converges.
    pub async fn await_status(
        &self,
        http: &reqwest::Client,
        url: &str,
        expected: StatusCode,
    ) -> Result<ProbeResponse, Error> {
        let start = Instant::now();
        #[allow(unused_assignments)]
        let mut last = LastObservation::None;
        loop {
            match get(http, url).await {
                Ok(rsp) if rsp.status == expected => {
                    tracing::debug!(%url, status = %rsp.status, "endpoint converged");
                    return Ok(rsp);
                }
                Ok(rsp) => {
                    tracing::trace!(%url, status = %rsp.status, "still waiting");
                    last = LastObservation::Status {
                        status: rsp.status,
                        body: rsp.body,
                    };
                }
                Err(error) => {
                    tracing::trace!(%url, %error, "probe did not complete");
                    last = LastObservation::Other(format!("transport failure: {error}"));
                }
            }
            if start.elapsed() >= self.timeout {
                return Err(Error::PollTimeout {
                    condition: format!("{url} to return {expected}"),
                    timeout: self.timeout,
                    last,
                });
            }
            time::sleep(self.interval).await;
        }
    }
}

/// Joins a base URL and a path without doubling the separator.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
