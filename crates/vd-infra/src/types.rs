/// In-guest mount point of the per-VPS data volume.
pub const DATA_PATH: &str = "/var/lib/vpsdata";

/// Specification for launching a VPS container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub memory_mb: u32,
    pub cpus: u32,
    pub volume: String,
}
