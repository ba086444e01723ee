use std::{
    fmt::{self, Display},
    str::FromStr,
};

/// The kind of device a worker allocates on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    #[default]
    Cpu,
    Cuda,
    Rocm,
    Metal,
    Vulkan,
}

impl DeviceKind {
    fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Cuda => "cuda",
            DeviceKind::Rocm => "rocm",
            DeviceKind::Metal => "metal",
            DeviceKind::Vulkan => "vulkan",
        }
    }
}

/// The device a worker allocates data on when none is specified, `cpu:0` by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Device {
    pub kind: DeviceKind,
    pub id: usize,
}

impl Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for Device {
    type Err = String;

    /// Parses `kind[:id]`, e.g. `cuda:1` or `cpu`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = match s.split_once(':') {
            Some((kind, id)) => {
                let id = id
                    .parse()
                    .map_err(|e| format!("invalid device id in {s:?}: {e}"))?;
                (kind, id)
            }
            None => (s, 0),
        };

        let kind = match kind.to_ascii_lowercase().as_str() {
            "cpu" => DeviceKind::Cpu,
            "cuda" => DeviceKind::Cuda,
            "rocm" => DeviceKind::Rocm,
            "metal" => DeviceKind::Metal,
            "vulkan" => DeviceKind::Vulkan,
            other => return Err(format!("unknown device kind {other:?}")),
        };

        Ok(Self { kind, id })
    }
}
