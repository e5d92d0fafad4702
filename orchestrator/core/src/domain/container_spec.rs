// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Container Spec Translation
//!
//! Deterministic mapping from a [`GoalSpec`] to the parameters the container
//! engine needs to create the goal's container. The output types serialize
//! with the engine's native field names (`HostConfig.PortBindings`, ...), which
//! is also the shape returned by goal inspection.
//!
//! ## Mini-grammars
//!
//! | Option | Accepted forms |
//! |--------|----------------|
//! | `ports` | `cport[/proto]`, `hport:cport[/proto]` |
//! | `expose` | `cport[/proto]` |
//! | `volumes` | `path`, `path:ro`, `host:container`, `host:container:mode` |
//! | `devices` | `host`, `host:perm`, `host:container`, `host:container:perm` |
//! | `links` | `name`, `name:alias` |
//! | `restart` | `no`, `always`, `unless-stopped`, `on-failure[:max]` |

use serde::{Serialize, Serializer};
use serde::ser::SerializeMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::domain::application::{GoalSpec, GoalTable, LinkReference};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("invalid port {entry:?}: {reason}")]
    InvalidPort { entry: String, reason: &'static str },

    #[error("invalid volume {0:?}")]
    InvalidVolume(String),

    #[error("invalid device {0:?}")]
    InvalidDevice(String),

    #[error("invalid link {0:?}")]
    InvalidLink(String),

    #[error("unknown restart policy {0:?}")]
    InvalidRestartPolicy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        })
    }
}

/// One `ports`/`expose` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortSpec {
    /// Engine key, e.g. `53/udp`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

fn parse_port_number(entry: &str, value: &str) -> Result<u16, TranslationError> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(TranslationError::InvalidPort {
            entry: entry.to_string(),
            reason: "port must be a number between 1 and 65535",
        }),
    }
}

impl FromStr for PortSpec {
    type Err = TranslationError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let (ports, protocol) = match entry.split_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some((ports, "sctp")) => (ports, Protocol::Sctp),
            Some(_) => {
                return Err(TranslationError::InvalidPort {
                    entry: entry.to_string(),
                    reason: "protocol must be tcp, udp or sctp",
                })
            }
            None => (entry, Protocol::Tcp),
        };

        let parts: Vec<&str> = ports.split(':').collect();
        match parts.as_slice() {
            [container] => Ok(Self {
                host_port: None,
                container_port: parse_port_number(entry, container)?,
                protocol,
            }),
            [host, container] => Ok(Self {
                host_port: Some(parse_port_number(entry, host)?),
                container_port: parse_port_number(entry, container)?,
                protocol,
            }),
            _ => Err(TranslationError::InvalidPort {
                entry: entry.to_string(),
                reason: "expected [hostPort:]containerPort[/protocol]",
            }),
        }
    }
}

/// One `volumes` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub host_path: String,
    pub container_path: String,
    pub mode: Option<String>,
}

impl FromStr for VolumeSpec {
    type Err = TranslationError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = entry.split(':').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(TranslationError::InvalidVolume(entry.to_string()));
        }
        let (host_path, container_path, mode) = match parts.as_slice() {
            [path] => (*path, *path, None),
            [path, mode @ ("ro" | "rw")] => (*path, *path, Some(*mode)),
            [host, container] => (*host, *container, None),
            [host, container, mode] => (*host, *container, Some(*mode)),
            _ => return Err(TranslationError::InvalidVolume(entry.to_string())),
        };
        Ok(Self {
            host_path: host_path.to_string(),
            container_path: container_path.to_string(),
            mode: mode.map(str::to_string),
        })
    }
}

impl VolumeSpec {
    /// Bind string, with `./` host paths resolved against `base_dir`.
    pub fn bind(&self, base_dir: Option<&Path>) -> String {
        let host = match (base_dir, self.host_path.strip_prefix("./")) {
            (Some(base), Some(relative)) => base.join(relative).to_string_lossy().into_owned(),
            _ => self.host_path.clone(),
        };
        match &self.mode {
            Some(mode) => format!("{}:{}:{}", host, self.container_path, mode),
            None => format!("{}:{}", host, self.container_path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceMapping {
    pub path_on_host: String,
    pub path_in_container: String,
    pub cgroup_permissions: String,
}

fn is_permission_string(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| matches!(c, 'r' | 'w' | 'm'))
}

impl FromStr for DeviceMapping {
    type Err = TranslationError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = entry.split(':').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(TranslationError::InvalidDevice(entry.to_string()));
        }
        let (host, container, permissions) = match parts.as_slice() {
            [host] => (*host, *host, "mrw"),
            [host, permissions] if is_permission_string(permissions) => (*host, *host, *permissions),
            [host, container] => (*host, *container, "mrw"),
            [host, container, permissions] => (*host, *container, *permissions),
            _ => return Err(TranslationError::InvalidDevice(entry.to_string())),
        };
        Ok(Self {
            path_on_host: host.to_string(),
            path_in_container: container.to_string(),
            cgroup_permissions: permissions.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    pub host_port: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestartPolicy {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_retry_count: Option<i64>,
}

impl FromStr for RestartPolicy {
    type Err = TranslationError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let invalid = || TranslationError::InvalidRestartPolicy(entry.to_string());
        match entry.split_once(':') {
            Some(("on-failure", count)) => Ok(Self {
                name: "on-failure".to_string(),
                maximum_retry_count: Some(count.parse().map_err(|_| invalid())?),
            }),
            Some(_) => Err(invalid()),
            None if matches!(entry, "no" | "always" | "unless-stopped" | "on-failure") => Ok(Self {
                name: entry.to_string(),
                maximum_retry_count: None,
            }),
            None => Err(invalid()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogConfig {
    #[serde(rename = "Type")]
    pub typ: String,
    #[serde(rename = "Config")]
    pub config: BTreeMap<String, String>,
}

fn serialize_port_set<S: Serializer>(ports: &BTreeSet<String>, serializer: S) -> Result<S::Ok, S::Error> {
    let empty = serde_json::Map::new();
    let mut map = serializer.serialize_map(Some(ports.len()))?;
    for port in ports {
        map.serialize_entry(port, &empty)?;
    }
    map.end()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    pub image: String,
    pub cmd: Vec<String>,
    pub entrypoint: Vec<String>,
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    #[serde(serialize_with = "serialize_port_set")]
    pub exposed_ports: BTreeSet<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub domainname: Option<String>,
    pub mac_address: Option<String>,
    pub open_stdin: bool,
    pub attach_stdin: bool,
    pub tty: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfiguration {
    pub binds: Vec<String>,
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
    pub links: Vec<String>,
    pub extra_hosts: Vec<String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub devices: Vec<DeviceMapping>,
    pub privileged: bool,
    pub readonly_rootfs: bool,
    pub memory: Option<i64>,
    pub memory_swap: Option<i64>,
    pub cpu_shares: Option<i64>,
    pub cpuset_cpus: Option<String>,
    pub cpuset_mems: Option<String>,
    pub restart_policy: Option<RestartPolicy>,
    pub network_mode: Option<String>,
    pub log_config: Option<LogConfig>,
    pub volume_driver: Option<String>,
}

/// Everything the engine needs to create one goal container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerParameters {
    pub name: String,
    pub config: ContainerConfig,
    pub host_config: HostConfiguration,
}

/// Per-application inputs to translation that are not part of the goal itself.
#[derive(Debug, Clone)]
pub struct TranslationContext {
    pub application: String,
    pub container_prefix: String,
    pub base_dir: Option<PathBuf>,
}

impl TranslationContext {
    pub fn new(application: impl Into<String>, container_prefix: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            container_prefix: container_prefix.into(),
            base_dir: None,
        }
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    pub fn container_name(&self, goal: &str, spec: &GoalSpec) -> String {
        match &spec.container_name {
            Some(name) => name.clone(),
            None => format!("{}_{}_{}", self.container_prefix, self.application, goal),
        }
    }
}

fn link_entry(entry: &str) -> Result<LinkReference, TranslationError> {
    let link = LinkReference::parse(entry);
    if link.name.is_empty() || link.alias.is_empty() {
        return Err(TranslationError::InvalidLink(entry.to_string()));
    }
    Ok(link)
}

/// Translates one goal of `goals` into engine creation parameters.
pub fn translate(
    goal: &str,
    spec: &GoalSpec,
    goals: &GoalTable,
    context: &TranslationContext,
) -> Result<ContainerParameters, TranslationError> {
    let mut config = ContainerConfig {
        image: spec.image.clone(),
        cmd: spec.command.clone(),
        entrypoint: spec.entrypoint.clone(),
        env: spec
            .environment
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect(),
        labels: spec.labels.clone(),
        working_dir: spec.working_dir.clone(),
        user: spec.user.clone(),
        hostname: spec.hostname.clone(),
        domainname: spec.domainname.clone(),
        mac_address: spec.mac_address.clone(),
        open_stdin: spec.stdin_open,
        attach_stdin: spec.stdin_open,
        tty: spec.tty,
        ..Default::default()
    };

    let mut host_config = HostConfiguration {
        extra_hosts: spec.extra_hosts.clone(),
        dns: spec.dns.clone(),
        dns_search: spec.dns_search.clone(),
        cap_add: spec.cap_add.clone(),
        cap_drop: spec.cap_drop.clone(),
        security_opt: spec.security_opt.clone(),
        privileged: spec.privileged,
        readonly_rootfs: spec.read_only,
        memory: spec.mem_limit,
        memory_swap: spec.memswap_limit,
        cpu_shares: spec.cpu_shares,
        cpuset_cpus: spec.cpuset.clone(),
        cpuset_mems: spec.cpuset.clone(),
        network_mode: spec.net.clone(),
        volume_driver: spec.volume_driver.clone(),
        ..Default::default()
    };

    for entry in &spec.ports {
        let port: PortSpec = entry.parse()?;
        let bindings = port
            .host_port
            .map(|host| vec![PortBinding { host_port: host.to_string() }])
            .unwrap_or_default();
        config.exposed_ports.insert(port.key());
        host_config.port_bindings.insert(port.key(), bindings);
    }

    for entry in &spec.expose {
        let port: PortSpec = entry.parse()?;
        config.exposed_ports.insert(port.key());
    }

    for entry in &spec.volumes {
        let volume: VolumeSpec = entry.parse()?;
        host_config.binds.push(volume.bind(context.base_dir.as_deref()));
    }

    for entry in &spec.devices {
        host_config.devices.push(entry.parse()?);
    }

    for entry in &spec.links {
        let link = link_entry(entry)?;
        let target = goals
            .get(&link.name)
            .ok_or_else(|| TranslationError::InvalidLink(entry.clone()))?;
        let target_container = context.container_name(&link.name, target);
        host_config.links.push(format!("{}:{}", target_container, link.alias));
    }

    for entry in &spec.external_links {
        let link = link_entry(entry)?;
        host_config.links.push(format!("{}:{}", link.name, link.alias));
    }

    if let Some(restart) = &spec.restart {
        host_config.restart_policy = Some(restart.parse()?);
    }

    if let Some(driver) = &spec.log_driver {
        host_config.log_config = Some(LogConfig {
            typ: driver.clone(),
            config: spec.log_config.clone(),
        });
    }

    Ok(ContainerParameters {
        name: context.container_name(goal, spec),
        config,
        host_config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn single(spec: GoalSpec) -> ContainerParameters {
        let mut goals = GoalTable::new();
        goals.insert("task1", spec.clone()).unwrap();
        translate("task1", &spec, &goals, &TranslationContext::new("demo", "marshal")).unwrap()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ports_expose_and_bind() {
        let mut spec = GoalSpec::new("alpine:3.2");
        spec.ports = strings(&["3000", "49100:22", "33/udp", "53:53/udp"]);
        spec.expose = strings(&["2000/udp"]);
        let params = serde_json::to_value(single(spec)).unwrap();

        assert_eq!(
            params["HostConfig"]["PortBindings"],
            json!({
                "22/tcp": [{"HostPort": "49100"}],
                "3000/tcp": [],
                "33/udp": [],
                "53/udp": [{"HostPort": "53"}]
            })
        );
        let exposed = params["Config"]["ExposedPorts"].as_object().unwrap();
        for key in ["3000/tcp", "33/udp", "22/tcp", "53/udp", "2000/udp"] {
            assert_eq!(exposed.get(key), Some(&json!({})), "missing {key}");
        }
        assert_eq!(exposed.len(), 5);
    }

    #[test]
    fn test_port_grammar_errors() {
        assert!("http".parse::<PortSpec>().is_err());
        assert!("1:2:3".parse::<PortSpec>().is_err());
        assert!("80/icmp".parse::<PortSpec>().is_err());
        assert!("0".parse::<PortSpec>().is_err());
        assert_eq!(
            "8080:80".parse::<PortSpec>().unwrap(),
            PortSpec { host_port: Some(8080), container_port: 80, protocol: Protocol::Tcp }
        );
    }

    #[test]
    fn test_devices_disambiguate_permissions() {
        let mut spec = GoalSpec::new("alpine:3.2");
        spec.devices = strings(&["/dev/tty", "/dev/console:/dev/con", "/dev/ttyS0:mr", "/dev/ttyS1:/dev/XT:r"]);
        let params = serde_json::to_value(single(spec)).unwrap();

        assert_eq!(
            params["HostConfig"]["Devices"],
            json!([
                {"PathOnHost": "/dev/tty", "PathInContainer": "/dev/tty", "CgroupPermissions": "mrw"},
                {"PathOnHost": "/dev/console", "PathInContainer": "/dev/con", "CgroupPermissions": "mrw"},
                {"PathOnHost": "/dev/ttyS0", "PathInContainer": "/dev/ttyS0", "CgroupPermissions": "mr"},
                {"PathOnHost": "/dev/ttyS1", "PathInContainer": "/dev/XT", "CgroupPermissions": "r"}
            ])
        );
    }

    #[test]
    fn test_short_device_path_is_not_a_permission() {
        // Three characters but contains a slash: a container path.
        let device: DeviceMapping = "/dev/fb0:/fb".parse().unwrap();
        assert_eq!(device.path_in_container, "/fb");
        assert_eq!(device.cgroup_permissions, "mrw");
    }

    #[test]
    fn test_volumes_keep_order_and_self_bind() {
        let mut spec = GoalSpec::new("alpine:3.2");
        spec.volumes = strings(&["/tmp", "/tmp:/foo", "/tmp:/bar:ro", "/data:ro"]);
        let params = single(spec);
        assert_eq!(
            params.host_config.binds,
            strings(&["/tmp:/tmp", "/tmp:/foo", "/tmp:/bar:ro", "/data:/data:ro"])
        );
    }

    #[test]
    fn test_relative_volume_uses_base_dir() {
        let mut spec = GoalSpec::new("alpine:3.2");
        spec.volumes = strings(&["./conf:/etc/app"]);
        let mut goals = GoalTable::new();
        goals.insert("web", spec.clone()).unwrap();
        let context = TranslationContext::new("demo", "marshal").with_base_dir("/srv/demo");

        let params = translate("web", &spec, &goals, &context).unwrap();
        assert_eq!(params.host_config.binds, strings(&["/srv/demo/conf:/etc/app"]));
        assert!("/a::b".parse::<VolumeSpec>().is_err());
    }

    #[test]
    fn test_task_flag_does_not_reach_the_engine() {
        let mut task = GoalSpec::new("alpine:3.20");
        task.command = strings(&["./migrate.sh"]);
        let mut plain = task.clone();
        task.task = true;
        plain.task = false;

        assert_eq!(single(task), single(plain));
    }

    #[test]
    fn test_scalars_resources_and_logging() {
        let mut spec = GoalSpec::new("alpine:3.2");
        spec.environment.insert("FOO".to_string(), "BAR".to_string());
        spec.environment.insert("BUZ".to_string(), "LIGHTYEAR".to_string());
        spec.cpuset = Some("0".to_string());
        spec.mem_limit = Some(8_000_000);
        spec.cpu_shares = Some(73);
        spec.restart = Some("on-failure".to_string());
        spec.smart_restart = true;
        spec.stdin_open = true;
        spec.net = Some("bridge".to_string());
        spec.log_driver = Some("syslog".to_string());
        spec.log_config.insert("syslog-address".to_string(), "udp://192.168.0.42:123".to_string());

        let params = single(spec);
        let value = serde_json::to_value(&params).unwrap();

        assert_eq!(params.config.env, strings(&["BUZ=LIGHTYEAR", "FOO=BAR"]));
        assert_eq!(value["HostConfig"]["CpusetCpus"], "0");
        assert_eq!(value["HostConfig"]["CpusetMems"], "0");
        assert_eq!(value["HostConfig"]["Memory"], 8_000_000);
        assert_eq!(value["HostConfig"]["CpuShares"], 73);
        assert_eq!(value["HostConfig"]["RestartPolicy"], json!({"Name": "on-failure"}));
        assert_eq!(value["HostConfig"]["NetworkMode"], "bridge");
        assert_eq!(
            value["HostConfig"]["LogConfig"],
            json!({"Type": "syslog", "Config": {"syslog-address": "udp://192.168.0.42:123"}})
        );
        assert_eq!(value["Config"]["AttachStdin"], true);
        assert!(!value.to_string().contains("smart"));
    }

    #[test]
    fn test_restart_policy_grammar() {
        let policy: RestartPolicy = "on-failure:5".parse().unwrap();
        assert_eq!(policy.maximum_retry_count, Some(5));
        assert!("sometimes".parse::<RestartPolicy>().is_err());
        assert!("always:3".parse::<RestartPolicy>().is_err());
    }

    #[test]
    fn test_links_resolve_container_names() {
        let mut goals = GoalTable::new();
        let mut db = GoalSpec::new("postgres:16");
        db.container_name = Some("shared-db".to_string());
        goals.insert("db", db).unwrap();
        goals.insert("cache", GoalSpec::new("redis:7")).unwrap();
        let mut web = GoalSpec::new("nginx:1.27");
        web.links = strings(&["db:database", "cache"]);
        web.external_links = strings(&["registry", "legacy:old"]);
        goals.insert("web", web.clone()).unwrap();

        let params = translate("web", &web, &goals, &TranslationContext::new("demo", "marshal")).unwrap();
        assert_eq!(params.name, "marshal_demo_web");
        assert_eq!(
            params.host_config.links,
            strings(&["shared-db:database", "marshal_demo_cache:cache", "registry:registry", "legacy:old"])
        );
    }
}
