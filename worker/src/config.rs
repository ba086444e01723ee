use std::{env, str::FromStr};

use crate::{Result, WorkerErr, device::Device};

const DEFAULT_HOST: &str = "127.0.0.1";

/// Process level configuration of a worker binary, read from the environment.
///
/// | variable | default |
/// |---|---|
/// | `HOST` | `127.0.0.1` |
/// | `PORT` | required |
/// | `WORKER_ID` | required |
/// | `LOCAL_WORKER_ID` | `WORKER_ID` |
/// | `NUM_WORKERS` | required |
/// | `NUM_GROUPS` | `1` |
/// | `DEVICE` | `cpu:0` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub host: String,
    pub port: u16,
    pub worker_id: usize,
    pub local_worker_id: usize,
    pub num_workers: usize,
    pub num_groups: usize,
    pub device: Device,
}

impl WorkerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let worker_id = required(&lookup, "WORKER_ID")?;

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: required(&lookup, "PORT")?,
            worker_id,
            local_worker_id: optional(&lookup, "LOCAL_WORKER_ID")?.unwrap_or(worker_id),
            num_workers: required(&lookup, "NUM_WORKERS")?,
            num_groups: optional(&lookup, "NUM_GROUPS")?.unwrap_or(1),
            device: optional(&lookup, "DEVICE")?.unwrap_or_default(),
        })
    }

    /// The address the worker listens on for its controller.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn optional<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.parse()
                .map_err(|e| WorkerErr::InvalidConfig(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

fn required<T, F>(lookup: &F, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, key)?.ok_or_else(|| WorkerErr::InvalidConfig(format!("{key} is not set")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::device::DeviceKind;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn fills_in_defaults() {
        let vars = [("PORT", "9000"), ("WORKER_ID", "2"), ("NUM_WORKERS", "4")];
        let cfg = WorkerConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.local_worker_id, 2);
        assert_eq!(cfg.num_groups, 1);
        assert_eq!(cfg.device, Device::default());
    }

    #[test]
    fn parses_every_variable() {
        let vars = [
            ("HOST", "0.0.0.0"),
            ("PORT", "9001"),
            ("WORKER_ID", "5"),
            ("LOCAL_WORKER_ID", "1"),
            ("NUM_WORKERS", "8"),
            ("NUM_GROUPS", "2"),
            ("DEVICE", "cuda:1"),
        ];
        let cfg = WorkerConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(cfg.local_worker_id, 1);
        assert_eq!(cfg.num_groups, 2);
        assert_eq!(cfg.device.kind, DeviceKind::Cuda);
    }

    #[test]
    fn reports_missing_and_malformed_variables() {
        let missing = WorkerConfig::from_lookup(lookup(&[("PORT", "1")]));
        assert!(matches!(missing, Err(WorkerErr::InvalidConfig(_))));

        let vars = [("PORT", "x"), ("WORKER_ID", "0"), ("NUM_WORKERS", "1")];
        let malformed = WorkerConfig::from_lookup(lookup(&vars));
        assert!(matches!(malformed, Err(WorkerErr::InvalidConfig(_))));
    }
}
