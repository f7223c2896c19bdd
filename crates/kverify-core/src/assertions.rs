//! Fail-fast structural checks over one immutable resource snapshot.
//!
//! Each check evaluates immediately and returns the chain again, so checks
//! compose with `?`:
//!
//! ```ignore
//! AssertionChain::of(ResourceKind::Deployment, workload)
//!     .assert_replicas(equal_to(1))?
//!     .assert_containers(has_size(1))?;
//! ```
//!
//! The first mismatch stops the chain. Checks only read the snapshot, so
//! repeating one yields the same outcome; observing newer cluster state means
//! building a new chain from a fresh snapshot.

use std::fmt;

use tracing::trace;

use crate::cluster::{
    Container, Exposure, ImageStream, Labels, Named, Pod, PodExt, ResourceKind, Service,
    ServiceExt, ServicePort, Workload,
};
use crate::error::VerifyError;
use crate::http_probe::HttpProbe;
use crate::predicate::Predicate;

#[derive(Debug, Clone)]
pub struct AssertionChain<R> {
    subject: String,
    snapshot: R,
}

impl<R: fmt::Debug> AssertionChain<R> {
    pub fn new(subject: impl Into<String>, snapshot: R) -> Self {
        Self {
            subject: subject.into(),
            snapshot,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn snapshot(&self) -> &R {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> R {
        self.snapshot
    }

    /// Check a projection of the snapshot against `expected`.
    pub fn assert_that<U, G>(
        &self,
        check: &str,
        project: G,
        expected: &Predicate<U>,
    ) -> crate::Result<&Self>
    where
        U: fmt::Debug + ?Sized,
        G: FnOnce(&R) -> &U,
    {
        let actual = project(&self.snapshot);
        if expected.test(actual) {
            trace!(subject = %self.subject, check, "assertion passed");
            Ok(self)
        } else {
            Err(self.mismatch(check, expected.description(), format!("{actual:?}")))
        }
    }

    fn mismatch(&self, check: &str, expected: &str, actual: String) -> VerifyError {
        VerifyError::AssertionMismatch {
            subject: self.subject.clone(),
            check: check.to_string(),
            expected: expected.to_string(),
            actual,
        }
    }
}

impl<R: Named + fmt::Debug> AssertionChain<R> {
    /// Chain whose subject reads `<Kind> <namespace>/<name>`.
    pub fn of(kind: ResourceKind, snapshot: R) -> Self {
        let subject = match snapshot.namespace() {
            Some(ns) => format!("{kind} {ns}/{}", snapshot.name()),
            None => format!("{kind} {}", snapshot.name()),
        };
        Self::new(subject, snapshot)
    }

    pub fn assert_labels(&self, expected: Predicate<Labels>) -> crate::Result<&Self> {
        self.assert_that("labels", |r| r.labels(), &expected)
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

impl AssertionChain<Service> {
    pub fn assert_ports(&self, expected: Predicate<Vec<ServicePort>>) -> crate::Result<&Self> {
        self.assert_that("ports", |s| s.ports(), &expected)
    }

    /// The port called `name` listens on `number`; when
    /// `require_externally_routable` is set it must also carry a node port.
    pub fn assert_port(
        &self,
        name: &str,
        number: i32,
        require_externally_routable: bool,
    ) -> crate::Result<&Self> {
        let check = format!("port {name}");
        let expected = if require_externally_routable {
            format!("port {number} with a node port")
        } else {
            format!("port {number}")
        };
        let port = self
            .snapshot
            .port_named(name)
            .ok_or_else(|| self.mismatch(&check, &expected, "no such port".to_string()))?;

        let routable = port.node_port.is_some()
            && self.snapshot.exposure() == Some(Exposure::NodePort);
        if port.port != number || (require_externally_routable && !routable) {
            return Err(self.mismatch(&check, &expected, format!("{port:?}")));
        }
        Ok(self)
    }

    pub fn assert_is_cluster_ip(&self) -> crate::Result<&Self> {
        self.assert_exposure(Exposure::ClusterIp)
    }

    pub fn assert_is_node_port(&self) -> crate::Result<&Self> {
        self.assert_exposure(Exposure::NodePort)
    }

    fn assert_exposure(&self, expected: Exposure) -> crate::Result<&Self> {
        let actual = self.snapshot.exposure();
        if actual == Some(expected) {
            Ok(self)
        } else {
            Err(self.mismatch(
                "exposure",
                &format!("{expected:?}"),
                format!("{:?}", self.snapshot.service_type()),
            ))
        }
    }

    /// GET the node port behind `port_name` until the body satisfies
    /// `content`, retrying within the probe's schedule.
    pub async fn assert_node_port_response(
        &self,
        probe: &HttpProbe,
        port_name: &str,
        content: Predicate<String>,
    ) -> crate::Result<&Self> {
        self.assert_is_node_port()?;
        let check = format!("node port {port_name}");
        let node_port = self
            .snapshot
            .port_named(port_name)
            .and_then(|p| p.node_port)
            .ok_or_else(|| {
                self.mismatch(
                    &check,
                    "an allocated node port",
                    format!("{:?}", self.snapshot.port_named(port_name)),
                )
            })?;
        probe.await_body(node_port, "/", &content).await?;
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Workloads
// ---------------------------------------------------------------------------

impl AssertionChain<Workload> {
    pub fn assert_replicas(&self, expected: Predicate<i32>) -> crate::Result<&Self> {
        let replicas = self.snapshot.replicas();
        if expected.test(&replicas) {
            Ok(self)
        } else {
            Err(self.mismatch("replicas", expected.description(), replicas.to_string()))
        }
    }

    pub fn assert_containers(&self, expected: Predicate<Vec<Container>>) -> crate::Result<&Self> {
        self.assert_that("containers", Workload::containers, &expected)
    }

    pub fn assert_available(&self) -> crate::Result<&Self> {
        if self.snapshot.is_available() {
            Ok(self)
        } else {
            Err(self.mismatch(
                "available replicas",
                &format!("at least {}", self.snapshot.replicas()),
                format!("{:?}", self.snapshot.status.available_replicas),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Pods and image streams
// ---------------------------------------------------------------------------

impl AssertionChain<Pod> {
    pub fn assert_containers(&self, expected: Predicate<Vec<Container>>) -> crate::Result<&Self> {
        self.assert_that("containers", |p| p.containers(), &expected)
    }

    pub fn assert_ready(&self) -> crate::Result<&Self> {
        if self.snapshot.is_ready() {
            Ok(self)
        } else {
            Err(self.mismatch(
                "readiness",
                "Running with all containers ready",
                format!("{:?}", self.snapshot.status),
            ))
        }
    }
}

impl AssertionChain<ImageStream> {
    pub fn assert_tags(&self, expected: Predicate<Vec<String>>) -> crate::Result<&Self> {
        let tags = self.snapshot.tag_names();
        if expected.test(&tags) {
            Ok(self)
        } else {
            Err(self.mismatch("tags", expected.description(), format!("{tags:?}")))
        }
    }

    /// The most recent status tag, which the API server lists first.
    pub fn assert_first_tag(&self, expected: Predicate<String>) -> crate::Result<&Self> {
        let first = self.snapshot.first_tag().map(str::to_string);
        match &first {
            Some(tag) if expected.test(tag) => Ok(self),
            _ => Err(self.mismatch("first tag", expected.description(), format!("{first:?}"))),
        }
    }
}
