use super::{ContainerRuntime, ContainerSpec, ContainerState, RuntimeError, RuntimeStatus};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

/// `docker` CLI backed runtime.
pub struct DockerRuntime {
    binary: String,
    command_timeout: Duration,
    stop_grace_secs: u32,
}

#[derive(Debug)]
pub struct DockerOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl DockerRuntime {
    pub fn new(command_timeout: Duration, stop_grace_secs: u32) -> Self {
        Self {
            binary: "docker".to_string(),
            command_timeout,
            stop_grace_secs,
        }
    }

    /// Use a different CLI binary, such as `podman` or an absolute path.
    pub fn with_binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_string();
        self
    }

    /// Execute a docker command and return parsed output.
    async fn exec(&self, op: &'static str, args: &[String]) -> Result<DockerOutput, RuntimeError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(RuntimeError::Engine(format!(
                    "failed to run {}: {}",
                    self.binary, e
                )))
            }
            Err(_) => {
                return Err(RuntimeError::Timeout {
                    op,
                    after: self.command_timeout,
                })
            }
        };

        Ok(DockerOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        })
    }

    /// Run a command that targets one container, mapping failures.
    async fn exec_on(
        &self,
        op: &'static str,
        container: &str,
        args: &[String],
    ) -> Result<DockerOutput, RuntimeError> {
        let out = self.exec(op, args).await?;
        if out.success {
            return Ok(out);
        }
        Err(classify_failure(op, container, &out.stderr))
    }
}

/// Map a failed docker invocation to a runtime error.
fn classify_failure(op: &str, container: &str, stderr: &str) -> RuntimeError {
    if is_missing_container(stderr) {
        RuntimeError::NotFound(container.to_string())
    } else {
        RuntimeError::Engine(format!("docker {} failed: {}", op, stderr.trim()))
    }
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

/// Build `docker create` arguments for a tenant container.
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let memory_flag = format!("{}m", spec.memory_mb);
    let mut args: Vec<String> = vec![
        "create".into(),
        "--name".into(),
        spec.name.clone(),
        "--security-opt=no-new-privileges".into(),
        "--memory".into(),
        memory_flag.clone(),
        "--memory-swap".into(),
        memory_flag,
        "--cpus".into(),
        format!("{:.2}", spec.cpu_limit),
        "--restart=unless-stopped".into(),
        "--log-opt".into(),
        "max-size=10m".into(),
        "--log-opt".into(),
        "max-file=3".into(),
    ];

    if let Some(port) = spec.host_port {
        args.push("-p".into());
        args.push(format!("127.0.0.1:{}:{}", port, spec.container_port));
    }

    for (k, v) in &spec.env {
        args.push("-e".into());
        args.push(format!("{}={}", k, v));
    }

    args.push(spec.image.clone());
    args
}

/// Parse `docker inspect -f '{{.Id}}|{{.Name}}|{{.State.Status}}'` output.
fn parse_inspect_line(line: &str) -> Option<ContainerState> {
    let mut parts = line.trim().splitn(3, '|');
    let id = parts.next()?.trim();
    let name = parts.next()?.trim().trim_start_matches('/');
    let status = parts.next()?;
    if id.is_empty() {
        return None;
    }
    Some(ContainerState {
        id: id.to_string(),
        name: name.to_string(),
        status: RuntimeStatus::parse(status),
    })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        let args = vec![
            "info".to_string(),
            "--format".to_string(),
            "{{.ServerVersion}}".to_string(),
        ];
        let out = self.exec("ping", &args).await?;
        if !out.success {
            return Err(RuntimeError::Engine(format!(
                "docker daemon not reachable: {}",
                out.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let out = self.exec("create", &create_args(spec)).await?;
        if !out.success {
            return Err(RuntimeError::Engine(format!(
                "docker create failed: {}",
                out.stderr.trim()
            )));
        }
        let container_id = out.stdout.trim().to_string();

        if let Some(network) = &spec.network {
            let connect = vec![
                "network".to_string(),
                "connect".to_string(),
                network.clone(),
                spec.name.clone(),
            ];
            let connect_out = self.exec("network connect", &connect).await?;
            if !connect_out.success {
                tracing::warn!(
                    container = %spec.name,
                    network = %network,
                    "failed to attach network: {}",
                    connect_out.stderr.trim()
                );
            }
        }

        Ok(container_id)
    }

    async fn start(&self, container: &str) -> Result<(), RuntimeError> {
        let args = vec!["start".to_string(), container.to_string()];
        self.exec_on("start", container, &args).await?;
        Ok(())
    }

    async fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        let args = vec![
            "stop".to_string(),
            "-t".to_string(),
            self.stop_grace_secs.to_string(),
            container.to_string(),
        ];
        self.exec_on("stop", container, &args).await?;
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<(), RuntimeError> {
        let args = vec!["rm".to_string(), "-f".to_string(), container.to_string()];
        self.exec_on("rm", container, &args).await?;
        Ok(())
    }

    async fn inspect(&self, container: &str) -> Result<ContainerState, RuntimeError> {
        let args = vec![
            "inspect".to_string(),
            "--type".to_string(),
            "container".to_string(),
            "-f".to_string(),
            "{{.Id}}|{{.Name}}|{{.State.Status}}".to_string(),
            container.to_string(),
        ];
        let out = self.exec_on("inspect", container, &args).await?;
        parse_inspect_line(&out.stdout).ok_or_else(|| {
            RuntimeError::Engine(format!(
                "unexpected docker inspect output: {}",
                out.stdout.trim()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "acme".into(),
            image: "tenant:latest".into(),
            env: vec![("SITE_NAME".into(), "acme.example.com".into())],
            memory_mb: 512,
            cpu_limit: 0.5,
            host_port: Some(8001),
            container_port: 8000,
            network: None,
        }
    }

    #[test]
    fn test_create_args_carry_limits_port_and_env() {
        let args = create_args(&spec());
        assert_eq!(&args[..3], &["create", "--name", "acme"]);
        let joined = args.join(" ");
        assert!(joined.contains("--memory 512m --memory-swap 512m"));
        assert!(joined.contains("--cpus 0.50"));
        assert!(joined.contains("-p 127.0.0.1:8001:8000"));
        assert!(joined.contains("-e SITE_NAME=acme.example.com"));
        assert_eq!(args.last().map(String::as_str), Some("tenant:latest"));
    }

    #[test]
    fn test_create_args_without_port_publish() {
        let mut s = spec();
        s.host_port = None;
        assert!(!create_args(&s).iter().any(|a| a == "-p"));
    }

    #[test]
    fn test_parses_inspect_output() {
        let state = parse_inspect_line("4f1c2d|/acme|running\n").unwrap();
        assert_eq!(state.id, "4f1c2d");
        assert_eq!(state.name, "acme");
        assert_eq!(state.status, RuntimeStatus::Running);

        assert!(parse_inspect_line("").is_none());
        assert!(parse_inspect_line("|/acme|running").is_none());
    }

    #[test]
    fn test_missing_container_maps_to_not_found() {
        let err = classify_failure(
            "stop",
            "acme",
            "Error response from daemon: No such container: acme",
        );
        assert!(err.is_not_found());

        let err = classify_failure("start", "acme", "permission denied");
        assert!(matches!(err, RuntimeError::Engine(ref m) if m.contains("permission denied")));
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_engine_error() {
        let rt = DockerRuntime::new(Duration::from_secs(5), 5)
            .with_binary("/nonexistent/tenantd-docker");
        let err = rt.ping().await.unwrap_err();
        assert!(
            matches!(err, RuntimeError::Engine(ref m) if m.contains("/nonexistent/tenantd-docker"))
        );
    }

    #[tokio::test]
    #[ignore] // Requires Docker daemon
    async fn test_lifecycle_against_real_docker() {
        let rt = DockerRuntime::new(Duration::from_secs(60), 5);
        rt.ping().await.unwrap();
        let mut s = spec();
        s.name = "tenantd-lifecycle-test".into();
        s.image = "alpine:latest".into();
        s.host_port = None;
        let _ = rt.remove(&s.name).await;

        let id = rt.create(&s).await.unwrap();
        assert_eq!(rt.inspect(&id).await.unwrap().status, RuntimeStatus::Created);
        rt.remove(&id).await.unwrap();
        assert!(rt.inspect(&id).await.unwrap_err().is_not_found());
    }
}
