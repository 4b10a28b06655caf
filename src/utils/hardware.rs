use sysinfo::System;

/// Load-generator host capacity, logged with every run so results from
/// different machines can be told apart.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProfile {
    pub cpu_cores: u64,
    pub total_memory: u64,
    pub available_memory: u64,
}

impl HostProfile {
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();

        Self {
            cpu_cores: sys.cpus().len() as u64,
            total_memory: sys.total_memory(),
            available_memory: sys.available_memory(),
        }
    }

    pub fn total_memory_mb(&self) -> u64 {
        self.total_memory / (1024 * 1024)
    }

    pub fn available_memory_mb(&self) -> u64 {
        self.available_memory / (1024 * 1024)
    }
}

impl std::fmt::Display for HostProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} cores, {} MB memory, {} MB available",
            self.cpu_cores,
            self.total_memory_mb(),
            self.available_memory_mb()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reports_megabytes() {
        let host = HostProfile {
            cpu_cores: 8,
            total_memory: 16 * 1024 * 1024 * 1024,
            available_memory: 512 * 1024 * 1024,
        };
        assert_eq!(host.to_string(), "8 cores, 16384 MB memory, 512 MB available");
    }
}
