// ── Container types ──────────────────────────────────────────────────

/// Arguments for `docker run -d`.
#[derive(Debug, Clone)]
pub struct RunContainerRequest {
    pub name: String,
    pub image: String,
    pub memory_mb: u32,
    pub cpus: u32,
    pub privileged: bool,
    pub mounts: Vec<Mount>,
    pub tmpfs: Vec<String>,
    pub command: Vec<String>,
}

/// A `-v source:target[:ro]` mount. `source` is a volume name or a host path.
#[derive(Debug, Clone)]
pub struct Mount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn spec(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

impl RunContainerRequest {
    /// Render the full argument list, starting at `run`.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string()];
        if self.privileged {
            args.push("--privileged".into());
        }
        args.push("--name".into());
        args.push(self.name.clone());
        args.push(format!("--memory={}m", self.memory_mb));
        args.push(format!("--cpus={}", self.cpus));
        for mount in &self.mounts {
            args.push("-v".into());
            args.push(mount.spec());
        }
        for path in &self.tmpfs {
            args.push("--tmpfs".into());
            args.push(path.clone());
        }
        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}
