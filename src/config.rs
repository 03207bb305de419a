//! Process configuration, loaded from a TOML file named on the command
//! line. Everything here belongs to the non-core collaborators §6
//! describes: the listening socket, the host key, and the client handles
//! for the relational store, KV store and container runtime.

use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct Config {
    /// Address to bind the SSH listener on, e.g. `"0.0.0.0:2222"`.
    pub listen_addr: String,
    /// Path to the host's SSH private key, in OpenSSH PEM form.
    pub host_key_path: String,
    /// `mysql://` connection string for the container registry.
    pub database_url: String,
    /// Base URL of the Consul-compatible KV store, e.g. `"http://127.0.0.1:8500"`.
    pub kv_host: String,
    /// Key prefix under which per-owner default shells are stored.
    #[serde(default = "default_kv_prefix")]
    pub kv_key_prefix: String,
    /// Unix socket path for the container runtime's API.
    pub runtime_socket_path: String,
    /// API version string the container runtime client negotiates, e.g. `"1.41"`.
    #[serde(default = "default_runtime_api_version")]
    pub runtime_api_version: String,
    /// Name of the process-environment variable consulted as the last
    /// fallback in the default-shell precedence chain, before the literal
    /// `"sh"`.
    #[serde(default = "default_shell_env_var")]
    pub default_shell_env_var: String,
}

fn default_kv_prefix() -> String {
    "sshexecd/default-shell".to_string()
}

fn default_runtime_api_version() -> String {
    "1.41".to_string()
}

fn default_shell_env_var() -> String {
    "SSHEXECD_DEFAULT_SHELL".to_string()
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {path}: {e}"))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config file {path}: {e}"))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_optional_fields() {
        let toml = r#"
            listen_addr = "0.0.0.0:2222"
            host_key_path = "/etc/sshexecd/host_key"
            database_url = "mysql://root@localhost/sshexecd"
            kv_host = "http://127.0.0.1:8500"
            runtime_socket_path = "/var/run/docker.sock"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.kv_key_prefix, "sshexecd/default-shell");
        assert_eq!(config.runtime_api_version, "1.41");
        assert_eq!(config.default_shell_env_var, "SSHEXECD_DEFAULT_SHELL");
    }
}
