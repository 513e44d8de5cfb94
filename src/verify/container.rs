use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIdentity {
    pub name: String,
    pub image: String,
    pub running: bool,
}

pub trait ContainerInspector: Send + Sync {
    fn inspect<'a>(&'a self, container: &'a str) -> BoxFuture<'a, Result<ContainerIdentity>>;
}

/// Inspects containers through the local `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerInspector {
    binary: String,
}

impl Default for DockerInspector {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerInspector {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run_inspect(&self, container: &str) -> Result<ContainerIdentity> {
        let output = Command::new(&self.binary)
            .args([
                "inspect",
                "--format",
                "{{.Config.Image}}|{{.State.Running}}",
                container,
            ])
            .output()
            .await
            .with_context(|| format!("failed to spawn {} inspect", self.binary))?;

        if !output.status.success() {
            bail!(
                "{} inspect {container} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_inspect_output(container, &String::from_utf8_lossy(&output.stdout))
    }
}

impl ContainerInspector for DockerInspector {
    fn inspect<'a>(&'a self, container: &'a str) -> BoxFuture<'a, Result<ContainerIdentity>> {
        Box::pin(self.run_inspect(container))
    }
}

fn parse_inspect_output(container: &str, stdout: &str) -> Result<ContainerIdentity> {
    let line = stdout.lines().next().unwrap_or_default().trim();
    let Some((image, running)) = line.split_once('|') else {
        bail!("unexpected inspect output for {container}: {line:?}");
    };
    Ok(ContainerIdentity {
        name: container.to_owned(),
        image: image.trim().to_owned(),
        running: running.trim().eq_ignore_ascii_case("true"),
    })
}
