//! Bounded-retry HTTP GET against externally routable node ports.

use tracing::debug;

use crate::await_engine::{await_condition, Condition, PollSchedule, Satisfied};
use crate::predicate::Predicate;

/// Reaches services through `http://<node_host>:<node_port>`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    node_host: String,
    schedule: PollSchedule,
}

impl HttpProbe {
    pub fn new(node_host: impl Into<String>, schedule: PollSchedule) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(schedule.poll_interval())
            .timeout(schedule.timeout())
            .build()?;
        Ok(Self {
            client,
            node_host: node_host.into(),
            schedule,
        })
    }

    pub fn node_host(&self) -> &str {
        &self.node_host
    }

    pub fn schedule(&self) -> PollSchedule {
        self.schedule
    }

    pub fn url_for(&self, port: i32, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://{}:{port}/{path}", self.node_host)
    }

    /// Poll `port` until it answers 2xx with a body satisfying `content`.
    pub async fn await_body(
        &self,
        port: i32,
        path: &str,
        content: &Predicate<String>,
    ) -> crate::Result<Satisfied<String>> {
        let url = self.url_for(port, path);
        let client = &self.client;
        let target = url.as_str();
        debug!(url = %url, "probing node port");

        let fetch = move || async move {
            client
                .get(target)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await
        };
        await_condition(fetch, &Condition::new(content.clone(), self.schedule))
            .await
            .map_err(|e| e.into_verify_error(format!("GET {url}")))
    }
}

/// Probe schedule used when none is configured.
pub const DEFAULT_SCHEDULE: PollSchedule = PollSchedule::fixed_secs(30, 1);
