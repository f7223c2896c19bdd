//! Post-generate checks: the expected manifest files and Helm chart files
//! exist and are non-empty.
//!
//! Files are only stat'ed, never parsed.

use std::path::{Path, PathBuf};

use kverify_core::VerifyError;
use tracing::debug;

use crate::spec::{BuildToolKind, ClusterFlavor, HelmChartExpectation, ScenarioSpec};

/// Directory the resource goal writes into, relative to the project.
pub fn output_dir(tool: BuildToolKind) -> PathBuf {
    match tool {
        BuildToolKind::Maven => PathBuf::from("target/classes/META-INF/jkube"),
        BuildToolKind::Gradle => PathBuf::from("build/classes/java/main/META-INF/jkube"),
    }
}

/// Aggregate list plus one file per generated object.
pub fn default_manifests(
    tool: BuildToolKind,
    flavor: ClusterFlavor,
    application: &str,
) -> Vec<PathBuf> {
    let base = output_dir(tool);
    let per_object = base.join(flavor.name());
    let mut files = vec![base.join(format!("{}.yml", flavor.name()))];
    files.extend(
        object_stems(flavor, application)
            .into_iter()
            .map(|stem| per_object.join(format!("{stem}.yml"))),
    );
    files
}

/// `<app>-<object>` file stems, one per generated object.
fn object_stems(flavor: ClusterFlavor, application: &str) -> Vec<String> {
    let workload = match flavor {
        ClusterFlavor::Kubernetes => "deployment",
        ClusterFlavor::OpenShift => "deploymentconfig",
    };
    let mut stems = vec![
        format!("{application}-{workload}"),
        format!("{application}-service"),
    ];
    if flavor.has_routes() {
        stems.push(format!("{application}-route"));
    }
    stems
}

/// Manifests the scenario expects, relative to its project directory.
pub fn expected_manifests(spec: &ScenarioSpec) -> Vec<PathBuf> {
    if spec.expectations.manifests.is_empty() {
        default_manifests(spec.build_tool, spec.flavor, &spec.application)
    } else {
        spec.expectations.manifests.clone()
    }
}

/// Directory the helm goal writes the chart into, relative to the project.
pub fn helm_dir(tool: BuildToolKind, flavor: ClusterFlavor, application: &str) -> PathBuf {
    let build_dir = match tool {
        BuildToolKind::Maven => "target",
        BuildToolKind::Gradle => "build",
    };
    PathBuf::from(build_dir)
        .join("jkube/helm")
        .join(application)
        .join(flavor.name())
}

/// Chart archive, `Chart.yaml` and one template per generated object.
/// `values.yaml` is checked separately since an empty one is valid.
pub fn expected_helm_chart(spec: &ScenarioSpec, chart: &HelmChartExpectation) -> Vec<PathBuf> {
    let dir = helm_dir(spec.build_tool, spec.flavor, &spec.application);
    let templates = dir.join("templates");
    let mut files = vec![
        dir.join(format!("{}-{}.tar.gz", spec.application, chart.version)),
        dir.join("Chart.yaml"),
    ];
    files.extend(
        object_stems(spec.flavor, &spec.application)
            .into_iter()
            .map(|stem| templates.join(format!("{stem}.yaml"))),
    );
    files
}

fn check_file(
    project_dir: &Path,
    relative: &Path,
    what: &str,
    allow_empty: bool,
) -> kverify_core::Result<u64> {
    let path = project_dir.join(relative);
    let expected = if allow_empty { "a file" } else { "a non-empty file" };
    let mismatch = |actual: &str| VerifyError::AssertionMismatch {
        subject: format!("{what} {}", relative.display()),
        check: "content".to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    };
    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_file() && (allow_empty || meta.len() > 0) => Ok(meta.len()),
        Ok(meta) if meta.is_file() => Err(mismatch("an empty file")),
        Ok(_) => Err(mismatch("a directory")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(mismatch("no such file")),
        Err(e) => Err(e.into()),
    }
}

/// Stop at the first missing or empty manifest.
pub fn check_manifests(spec: &ScenarioSpec) -> kverify_core::Result<Vec<PathBuf>> {
    let files = expected_manifests(spec);
    for relative in &files {
        let size = check_file(&spec.project_dir, relative, "manifest", false)?;
        debug!(manifest = %relative.display(), size, "manifest present");
    }
    Ok(files)
}

/// Stop at the first missing or empty chart file.
pub fn check_helm_chart(
    spec: &ScenarioSpec,
    chart: &HelmChartExpectation,
) -> kverify_core::Result<Vec<PathBuf>> {
    let mut files = expected_helm_chart(spec, chart);
    for relative in &files {
        let size = check_file(&spec.project_dir, relative, "helm chart file", false)?;
        debug!(file = %relative.display(), size, "chart file present");
    }
    let values = helm_dir(spec.build_tool, spec.flavor, &spec.application).join("values.yaml");
    check_file(&spec.project_dir, &values, "helm chart file", true)?;
    files.push(values);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, relative: &Path, content: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_default_manifests_per_flavor() {
        let k8s = default_manifests(BuildToolKind::Maven, ClusterFlavor::Kubernetes, "web");
        assert_eq!(
            k8s,
            vec![
                PathBuf::from("target/classes/META-INF/jkube/kubernetes.yml"),
                PathBuf::from("target/classes/META-INF/jkube/kubernetes/web-deployment.yml"),
                PathBuf::from("target/classes/META-INF/jkube/kubernetes/web-service.yml"),
            ]
        );

        let oc = default_manifests(BuildToolKind::Gradle, ClusterFlavor::OpenShift, "web");
        assert_eq!(oc.len(), 4);
        assert_eq!(
            oc[1],
            PathBuf::from("build/classes/java/main/META-INF/jkube/openshift")
                .join("web-deploymentconfig.yml")
        );
        assert!(oc[3].ends_with("web-route.yml"));
    }

    #[test]
    fn test_check_manifests_passes_when_all_present() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ScenarioSpec::new(
            "web",
            dir.path(),
            BuildToolKind::Maven,
            ClusterFlavor::Kubernetes,
        );
        for file in expected_manifests(&spec) {
            write(dir.path(), &file, "apiVersion: v1\n");
        }
        assert_eq!(check_manifests(&spec).unwrap().len(), 3);
    }

    #[test]
    fn test_check_manifests_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ScenarioSpec::new(
            "web",
            dir.path(),
            BuildToolKind::Maven,
            ClusterFlavor::Kubernetes,
        );
        let files = expected_manifests(&spec);
        write(dir.path(), &files[0], "kind: List\n");
        write(dir.path(), &files[1], "");
        write(dir.path(), &files[2], "kind: Service\n");

        match check_manifests(&spec).unwrap_err() {
            VerifyError::AssertionMismatch {
                subject, actual, ..
            } => {
                assert!(subject.ends_with("web-deployment.yml"));
                assert_eq!(actual, "an empty file");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_explicit_manifest_list_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = ScenarioSpec::new(
            "web",
            dir.path(),
            BuildToolKind::Maven,
            ClusterFlavor::OpenShift,
        );
        spec.expectations.manifests = vec![PathBuf::from("custom/openshift.yml")];

        let err = check_manifests(&spec).unwrap_err();
        assert!(err.to_string().contains("no such file"));

        write(dir.path(), Path::new("custom/openshift.yml"), "kind: List\n");
        assert!(check_manifests(&spec).is_ok());
    }

    #[test]
    fn test_helm_chart_layout_per_tool() {
        let spec = ScenarioSpec::new(
            "sb-zero-config",
            ".",
            BuildToolKind::Gradle,
            ClusterFlavor::OpenShift,
        );
        let files = expected_helm_chart(&spec, &HelmChartExpectation::default());
        let dir = PathBuf::from("build/jkube/helm/sb-zero-config/openshift");
        assert_eq!(
            files,
            vec![
                dir.join("sb-zero-config-0.0.0-SNAPSHOT.tar.gz"),
                dir.join("Chart.yaml"),
                dir.join("templates/sb-zero-config-deploymentconfig.yaml"),
                dir.join("templates/sb-zero-config-service.yaml"),
                dir.join("templates/sb-zero-config-route.yaml"),
            ]
        );
        assert_eq!(
            helm_dir(BuildToolKind::Maven, ClusterFlavor::Kubernetes, "web"),
            PathBuf::from("target/jkube/helm/web/kubernetes")
        );
    }

    #[test]
    fn test_helm_chart_accepts_empty_values_but_not_empty_templates() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ScenarioSpec::new(
            "web",
            dir.path(),
            BuildToolKind::Maven,
            ClusterFlavor::Kubernetes,
        );
        let chart = HelmChartExpectation::default();
        let chart_dir = helm_dir(spec.build_tool, spec.flavor, &spec.application);
        for file in expected_helm_chart(&spec, &chart) {
            write(dir.path(), &file, "apiVersion: v1\n");
        }

        let err = check_helm_chart(&spec, &chart).unwrap_err();
        assert!(err.to_string().contains("values.yaml"), "{err}");

        write(dir.path(), &chart_dir.join("values.yaml"), "");
        assert_eq!(check_helm_chart(&spec, &chart).unwrap().len(), 5);

        write(dir.path(), &chart_dir.join("templates/web-service.yaml"), "");
        match check_helm_chart(&spec, &chart).unwrap_err() {
            VerifyError::AssertionMismatch {
                subject, actual, ..
            } => {
                assert!(subject.starts_with("helm chart file"));
                assert!(subject.ends_with("web-service.yaml"));
                assert_eq!(actual, "an empty file");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
