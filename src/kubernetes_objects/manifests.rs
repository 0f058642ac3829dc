use std::borrow::Cow;
use std::path::Path;

use serde_json::{Value, json};

use super::cluster::{ClusterError, ManagedResource, ResourceKind};
use crate::config::{Config, ProxyConfig, RuntimeClassConfig, SecurityPolicy, TolerationConfig};

pub const PROXY_PODDEFAULT: &str = "notebook-proxy";
pub const TOLERATION_PODDEFAULT: &str = "gpu-toleration";
pub const SECURITY_POLICY_PODDEFAULT: &str = "security-policy";

pub const TEST_CONTAINER: &str = "test-kubeflow";
pub const GIT_SYNC_CONTAINER: &str = "git-sync";
pub const RUNNER_INSTALL_CONTAINER: &str = "install-runner";
const GIT_SYNC_IMAGE: &str = "registry.k8s.io/git-sync/git-sync:v4.4.0";
const SERVICE_ACCOUNT: &str = "default-editor";
const TESTS_ROOT: &str = "/tests";
const REPO_DIR: &str = "/tests/repo";
const TESTS_DIR: &str = "/tests/repo/tests";
const RUNNER_ROOT: &str = "/opt/uats";
const RUNNER_BIN: &str = "/opt/uats/bin/kubeflow-uats";

fn build(
    kind: ResourceKind,
    value: Value,
    namespace: Option<&str>,
) -> Result<ManagedResource, ClusterError> {
    let object =
        serde_json::from_value(value).map_err(|e| ClusterError::Invalid(kind, e.to_string()))?;
    ManagedResource::new(kind, object, namespace)
}

pub fn profile(config: &Config) -> Result<ManagedResource, ClusterError> {
    build(
        ResourceKind::Profile,
        json!({
            "apiVersion": "kubeflow.org/v1",
            "kind": "Profile",
            "metadata": { "name": config.namespace },
            "spec": {
                "owner": { "kind": "User", "name": config.profile_owner },
            },
        }),
        None,
    )
}

fn poddefault(
    name: &str,
    desc: &str,
    namespace: &str,
    extra_spec: Value,
) -> Result<ManagedResource, ClusterError> {
    let mut spec = json!({
        "desc": desc,
        "selector": { "matchLabels": { name: "true" } },
    });
    if let (Some(spec), Value::Object(extra)) = (spec.as_object_mut(), extra_spec) {
        spec.extend(extra);
    }
    build(
        ResourceKind::PodDefault,
        json!({
            "apiVersion": "kubeflow.org/v1alpha1",
            "kind": "PodDefault",
            "metadata": { "name": name },
            "spec": spec,
        }),
        Some(namespace),
    )
}

/// Injects the proxy variables, in both cases, into pods labelled
/// `notebook-proxy: "true"`.
pub fn proxy_poddefault(
    namespace: &str,
    proxy: &ProxyConfig,
) -> Result<ManagedResource, ClusterError> {
    let env: Vec<Value> = [
        ("HTTP_PROXY", &proxy.http_proxy),
        ("HTTPS_PROXY", &proxy.https_proxy),
        ("NO_PROXY", &proxy.no_proxy),
    ]
    .into_iter()
    .flat_map(|(name, value)| {
        [
            json!({ "name": name, "value": value }),
            json!({ "name": name.to_lowercase(), "value": value }),
        ]
    })
    .collect();

    poddefault(
        PROXY_PODDEFAULT,
        "Add proxy settings",
        namespace,
        json!({ "env": env }),
    )
}

/// Lets GPU workload pods started by the notebooks schedule onto tainted nodes.
pub fn toleration_poddefault(
    namespace: &str,
    toleration: &TolerationConfig,
) -> Result<ManagedResource, ClusterError> {
    let mut rendered = json!({
        "key": toleration.key,
        "operator": toleration.operator.as_deref().unwrap_or("Exists"),
    });
    if let Some(value) = &toleration.value {
        rendered["value"] = json!(value);
    }
    if let Some(effect) = &toleration.effect {
        rendered["effect"] = json!(effect);
    }

    poddefault(
        TOLERATION_PODDEFAULT,
        "Add GPU toleration",
        namespace,
        json!({ "tolerations": [rendered] }),
    )
}

/// Tells the notebooks which Pod Security Standard their workloads run under.
pub fn security_policy_poddefault(
    namespace: &str,
    policy: SecurityPolicy,
) -> Result<ManagedResource, ClusterError> {
    poddefault(
        SECURITY_POLICY_PODDEFAULT,
        "Add security policy",
        namespace,
        json!({ "env": [{ "name": "SECURITY_POLICY", "value": policy.as_str() }] }),
    )
}

pub fn runtime_class(runtimeclass: &RuntimeClassConfig) -> Result<ManagedResource, ClusterError> {
    build(
        ResourceKind::RuntimeClass,
        json!({
            "apiVersion": "node.k8s.io/v1",
            "kind": "RuntimeClass",
            "metadata": { "name": runtimeclass.name },
            "handler": runtimeclass.handler,
        }),
        None,
    )
}

pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn shell_word(s: &str) -> Cow<'_, str> {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=".contains(c));
    if plain {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(shell_quote(s))
    }
}

pub fn runner_args(config: &Config) -> Vec<String> {
    let mut args = vec!["notebooks".to_string()];
    if let Some(filter) = &config.filter {
        args.push("--filter".to_string());
        args.push(filter.clone());
    }
    if config.include_gpu_tests {
        args.push("--include-gpu-tests".to_string());
    }
    if config.include_kubeflow_trainer_tests {
        args.push("--include-kubeflow-trainer-tests".to_string());
    }
    args
}

pub fn runner_command(config: &Config) -> String {
    let mut cmd = RUNNER_BIN.to_string();
    for arg in runner_args(config) {
        cmd.push(' ');
        cmd.push_str(&shell_word(&arg));
    }
    cmd
}

/// Builds the runner from the checked out repository into the `runner`
/// volume, since the tests image ships only Jupyter.
fn runner_install_container(config: &Config, repo_mount: &str) -> Value {
    json!({
        "name": RUNNER_INSTALL_CONTAINER,
        "image": config.runner_build_image,
        "command": ["cargo", "install", "--root", RUNNER_ROOT, "--path", REPO_DIR],
        "env": [{ "name": "CARGO_TARGET_DIR", "value": format!("{RUNNER_ROOT}/target") }],
        "volumeMounts": [
            { "name": "tests", "mountPath": repo_mount },
            { "name": "runner", "mountPath": RUNNER_ROOT },
        ],
    })
}

/// The Job executing the notebook suite. Remote runs clone `repository` at
/// `commit` with a git-sync init container; local runs mount
/// `local_repo_dir` from the node and use the exempted RuntimeClass. Both
/// build the runner binary in an init container first.
pub fn test_job(config: &Config) -> Result<ManagedResource, ClusterError> {
    let kind = ResourceKind::Job;

    let mut labels = json!({ config.kfp_poddefault.as_str(): "true" });
    if config.proxy.is_some() {
        labels[PROXY_PODDEFAULT] = json!("true");
    }
    if config
        .security_policy
        .is_some_and(|policy| policy != SecurityPolicy::Privileged)
    {
        labels[SECURITY_POLICY_PODDEFAULT] = json!("true");
    }

    let (tests_volume, repo_mount) = if config.local_run {
        let host_path = std::path::absolute(&config.local_repo_dir)
            .map_err(|e| ClusterError::Invalid(kind, format!("local_repo_dir: {e}")))?;
        let volume = json!({
            "name": "tests",
            "hostPath": { "path": host_path_str(&host_path, kind)?, "type": "Directory" },
        });
        (volume, REPO_DIR)
    } else {
        (json!({ "name": "tests", "emptyDir": {} }), TESTS_ROOT)
    };

    let command = format!("cd {} && {}", TESTS_DIR, runner_command(config));
    let container = json!({
        "name": TEST_CONTAINER,
        "image": config.tests_image,
        "command": ["bash", "-c", command],
        "env": [{
            "name": "include_gpu_tests",
            "value": config.include_gpu_tests.to_string(),
        }],
        "volumeMounts": [
            { "name": "tests", "mountPath": repo_mount },
            { "name": "runner", "mountPath": RUNNER_ROOT },
        ],
    });

    let mut init_containers = Vec::new();
    let mut pod_spec = json!({
        "serviceAccountName": SERVICE_ACCOUNT,
        "restartPolicy": "Never",
        "volumes": [tests_volume, { "name": "runner", "emptyDir": {} }],
        "containers": [container],
    });

    if config.local_run {
        pod_spec["runtimeClassName"] = json!(config.runtimeclass.name);
    } else {
        let missing =
            |what: &str| ClusterError::Invalid(kind, format!("no {what} to clone the tests from"));
        let repository = config
            .repository
            .as_deref()
            .ok_or_else(|| missing("repository"))?;
        let commit = config.commit.as_deref().ok_or_else(|| missing("commit"))?;
        init_containers.push(json!({
            "name": GIT_SYNC_CONTAINER,
            "image": GIT_SYNC_IMAGE,
            "args": [
                format!("--repo={repository}"),
                format!("--ref={commit}"),
                format!("--root={TESTS_ROOT}"),
                "--link=repo",
                "--one-time",
            ],
            "volumeMounts": [{ "name": "tests", "mountPath": TESTS_ROOT }],
        }));
    }
    init_containers.push(runner_install_container(config, repo_mount));
    pod_spec["initContainers"] = json!(init_containers);

    build(
        kind,
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": config.job_name },
            "spec": {
                "backoffLimit": 0,
                "template": {
                    "metadata": { "labels": labels },
                    "spec": pod_spec,
                },
            },
        }),
        Some(&config.namespace),
    )
}

fn host_path_str(path: &Path, kind: ResourceKind) -> Result<&str, ClusterError> {
    path.to_str().ok_or_else(|| {
        ClusterError::Invalid(kind, format!("{} is not valid UTF-8", path.display()))
    })
}
