// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StatsOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    DeviceMapping, HostConfig, HostConfigLogConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::Docker;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::domain::application::AuthConfiguration;
use crate::domain::container_spec::{self, ContainerParameters};
use crate::domain::driver::{
    ContainerDriver, ContainerExit, ContainerId, DriverError, ExecSession, OutputStream, StatsStream,
};
use crate::domain::node_config::DockerConfig;

/// Seconds the engine waits for a graceful stop before killing.
const STOP_TIMEOUT_SECS: i64 = 10;

pub struct DockerDriver {
    docker: Docker,
}

fn status_code(e: &BollardError) -> Option<u16> {
    match e {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn engine_error(e: BollardError) -> DriverError {
    DriverError::Engine(e.to_string())
}

fn lookup_error(id: &str, e: BollardError) -> DriverError {
    match status_code(&e) {
        Some(404) => DriverError::NotFound(id.to_string()),
        _ => engine_error(e),
    }
}

fn none_if_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

fn restart_policy(policy: &container_spec::RestartPolicy) -> RestartPolicy {
    let name = match policy.name.as_str() {
        "always" => RestartPolicyNameEnum::ALWAYS,
        "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        _ => RestartPolicyNameEnum::NO,
    };
    RestartPolicy {
        name: Some(name),
        maximum_retry_count: policy.maximum_retry_count,
    }
}

/// Engine creation body for translated goal parameters.
fn container_config(params: &ContainerParameters) -> Config<String> {
    let config = &params.config;
    let host = &params.host_config;

    let host_config = HostConfig {
        binds: none_if_empty(host.binds.clone()),
        port_bindings: Some(
            host.port_bindings
                .iter()
                .map(|(port, bindings)| {
                    let bindings: Vec<PortBinding> = bindings
                        .iter()
                        .map(|b| PortBinding {
                            host_ip: None,
                            host_port: Some(b.host_port.clone()),
                        })
                        .collect();
                    (port.clone(), Some(bindings))
                })
                .collect(),
        ),
        links: none_if_empty(host.links.clone()),
        extra_hosts: none_if_empty(host.extra_hosts.clone()),
        dns: none_if_empty(host.dns.clone()),
        dns_search: none_if_empty(host.dns_search.clone()),
        cap_add: none_if_empty(host.cap_add.clone()),
        cap_drop: none_if_empty(host.cap_drop.clone()),
        security_opt: none_if_empty(host.security_opt.clone()),
        devices: none_if_empty(
            host.devices
                .iter()
                .map(|d| DeviceMapping {
                    path_on_host: Some(d.path_on_host.clone()),
                    path_in_container: Some(d.path_in_container.clone()),
                    cgroup_permissions: Some(d.cgroup_permissions.clone()),
                })
                .collect(),
        ),
        privileged: Some(host.privileged),
        readonly_rootfs: Some(host.readonly_rootfs),
        memory: host.memory,
        memory_swap: host.memory_swap,
        cpu_shares: host.cpu_shares,
        cpuset_cpus: host.cpuset_cpus.clone(),
        cpuset_mems: host.cpuset_mems.clone(),
        restart_policy: host.restart_policy.as_ref().map(restart_policy),
        network_mode: host.network_mode.clone(),
        log_config: host.log_config.as_ref().map(|log| HostConfigLogConfig {
            typ: Some(log.typ.clone()),
            config: Some(log.config.clone().into_iter().collect()),
        }),
        volume_driver: host.volume_driver.clone(),
        ..Default::default()
    };

    Config {
        image: Some(config.image.clone()),
        cmd: none_if_empty(config.cmd.clone()),
        entrypoint: none_if_empty(config.entrypoint.clone()),
        env: none_if_empty(config.env.clone()),
        labels: Some(config.labels.clone().into_iter().collect()),
        exposed_ports: Some(
            config
                .exposed_ports
                .iter()
                .map(|port| (port.clone(), HashMap::new()))
                .collect(),
        ),
        working_dir: config.working_dir.clone(),
        user: config.user.clone(),
        hostname: config.hostname.clone(),
        domainname: config.domainname.clone(),
        mac_address: config.mac_address.clone(),
        open_stdin: Some(config.open_stdin),
        attach_stdin: Some(config.attach_stdin),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(config.tty),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn credentials(auth: &AuthConfiguration) -> DockerCredentials {
    DockerCredentials {
        username: auth.username.clone(),
        password: auth.password.clone(),
        email: auth.email.clone(),
        serveraddress: auth.serveraddress.clone(),
        ..Default::default()
    }
}

impl DockerDriver {
    pub fn new(config: &DockerConfig) -> Result<Self, DriverError> {
        // Connect to Docker daemon (custom socket or auto-detect)
        let docker = if let Some(path) = &config.socket_path {
            Docker::connect_with_unix(path, config.connect_timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    DriverError::Engine(format!(
                        "Failed to connect to Docker at {}: {}\n\n\
                         Ensure Docker is running and the socket path is correct.",
                        path, e
                    ))
                })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                DriverError::Engine(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Common causes:\n\
                     - Docker daemon not running (check: docker ps)\n\
                     - Permission denied accessing Docker socket\n\
                     - Current user not in 'docker' group",
                    e
                ))
            })?
        };

        Ok(Self { docker })
    }

    /// Verify Docker daemon is accessible
    pub async fn healthcheck(&self) -> Result<(), DriverError> {
        self.docker.ping().await.map_err(|e| {
            DriverError::Engine(format!(
                "Cannot connect to Docker daemon: {}\n\n\
                 Verify with: docker ps",
                e
            ))
        })?;
        Ok(())
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn pull_image(
        &self,
        image: &str,
        credentials_config: Option<&AuthConfiguration>,
    ) -> Result<(), DriverError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!("Image {} present locally", image);
            return Ok(());
        }

        info!("Pulling image: {}", image);
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        });
        let mut stream = Box::pin(self.docker.create_image(
            options,
            None,
            credentials_config.map(credentials),
        ));
        while let Some(result) = stream.next().await {
            if let Err(e) = result {
                return Err(match e {
                    BollardError::DockerStreamError { error } => {
                        DriverError::ImageUnavailable(format!("{}: {}", image, error))
                    }
                    e if matches!(status_code(&e), Some(401 | 403 | 404)) => {
                        DriverError::ImageUnavailable(format!("{}: {}", image, e))
                    }
                    e => engine_error(e),
                });
            }
        }
        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    async fn create(&self, params: &ContainerParameters) -> Result<ContainerId, DriverError> {
        let options = CreateContainerOptions {
            name: params.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(params))
            .await
            .map_err(|e| match status_code(&e) {
                Some(404) => DriverError::ImageUnavailable(params.config.image.clone()),
                _ => engine_error(e),
            })?;
        debug!("Created container {} ({})", params.name, response.id);
        Ok(ContainerId::new(response.id))
    }

    async fn start(&self, id: &ContainerId) -> Result<(), DriverError> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| lookup_error(id.as_str(), e))
    }

    async fn wait(&self, id: &ContainerId) -> Result<ContainerExit, DriverError> {
        let options = Some(WaitContainerOptions {
            condition: "not-running".to_string(),
        });
        let mut stream = Box::pin(self.docker.wait_container(id.as_str(), options));
        match stream.next().await {
            Some(Ok(response)) => Ok(ContainerExit::Code(response.status_code)),
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(ContainerExit::Code(code)),
            Some(Err(e)) if status_code(&e) == Some(404) => Ok(ContainerExit::Vanished),
            Some(Err(e)) => Err(engine_error(e)),
            None => Ok(ContainerExit::Vanished),
        }
    }

    async fn stop(&self, id: &ContainerId) -> Result<(), DriverError> {
        let options = Some(StopContainerOptions { t: STOP_TIMEOUT_SECS });
        match self.docker.stop_container(id.as_str(), options).await {
            Ok(()) => Ok(()),
            // already stopped
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(lookup_error(id.as_str(), e)),
        }
    }

    async fn remove(&self, id_or_name: &str) -> Result<(), DriverError> {
        let options = Some(RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        });
        match self.docker.remove_container(id_or_name, options).await {
            Ok(()) => {
                debug!("Removed container {}", id_or_name);
                Ok(())
            }
            Err(e) if status_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(engine_error(e)),
        }
    }

    async fn inspect(&self, id: &ContainerId) -> Result<serde_json::Value, DriverError> {
        let response = self
            .docker
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| lookup_error(id.as_str(), e))?;
        serde_json::to_value(response).map_err(|e| DriverError::Engine(e.to_string()))
    }

    async fn stats(&self, id: &ContainerId) -> Result<StatsStream, DriverError> {
        let options = Some(StatsOptions {
            stream: true,
            one_shot: false,
        });
        let stream = self
            .docker
            .stats(id.as_str(), options)
            .map_err(engine_error)
            .and_then(|stats| async move {
                serde_json::to_value(stats).map_err(|e| DriverError::Engine(e.to_string()))
            });
        Ok(stream.boxed())
    }

    async fn logs(&self, id: &ContainerId) -> Result<OutputStream, DriverError> {
        let options = Some(LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        });
        let stream = self
            .docker
            .logs(id.as_str(), options)
            .map_ok(|output| output.into_bytes())
            .map_err(engine_error);
        Ok(stream.boxed())
    }

    async fn exec(&self, id: &ContainerId, command: &[String]) -> Result<ExecSession, DriverError> {
        let exec_config = CreateExecOptions {
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(true),
            cmd: Some(command.to_vec()),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(id.as_str(), exec_config)
            .await
            .map_err(|e| lookup_error(id.as_str(), e))?;

        match self.docker.start_exec(&exec.id, None).await.map_err(engine_error)? {
            StartExecResults::Attached { output, input } => Ok(ExecSession {
                output: output.map_ok(|o| o.into_bytes()).map_err(engine_error).boxed(),
                input,
            }),
            StartExecResults::Detached => Err(DriverError::Engine(format!(
                "exec in {} started detached",
                id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::application::{GoalSpec, GoalTable};
    use crate::domain::container_spec::{translate, TranslationContext};

    #[test]
    fn test_engine_config_from_parameters() {
        let mut spec = GoalSpec::new("redis:7");
        spec.ports = vec!["6379".to_string(), "16379:6380".to_string()];
        spec.devices = vec!["/dev/fuse".to_string()];
        spec.restart = Some("on-failure:3".to_string());
        spec.log_driver = Some("json-file".to_string());
        let mut goals = GoalTable::new();
        goals.insert("cache", spec.clone()).unwrap();
        let params = translate("cache", &spec, &goals, &TranslationContext::new("shop", "marshal")).unwrap();

        let config = container_config(&params);
        assert_eq!(config.image.as_deref(), Some("redis:7"));
        assert!(config.cmd.is_none());

        let exposed = config.exposed_ports.unwrap();
        assert!(exposed.contains_key("6379/tcp"));
        assert!(exposed.contains_key("6380/tcp"));

        let host = config.host_config.unwrap();
        let bindings = host.port_bindings.unwrap();
        assert_eq!(bindings["6379/tcp"], Some(vec![]));
        assert_eq!(
            bindings["6380/tcp"].as_ref().unwrap()[0].host_port.as_deref(),
            Some("16379")
        );
        assert_eq!(
            host.devices.unwrap()[0].cgroup_permissions.as_deref(),
            Some("mrw")
        );
        let policy = host.restart_policy.unwrap();
        assert_eq!(policy.name, Some(RestartPolicyNameEnum::ON_FAILURE));
        assert_eq!(policy.maximum_retry_count, Some(3));
        assert_eq!(host.log_config.unwrap().typ.as_deref(), Some("json-file"));
    }
}
