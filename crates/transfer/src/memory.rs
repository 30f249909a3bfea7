//! Available-memory introspection for adaptive chunk sizing.

/// Source of the host's currently available memory.
///
/// Injected into the planner so tests can pin a value.
pub trait MemoryProbe: Send + Sync {
    /// Available memory in bytes, or `None` when it cannot be determined.
    fn available_bytes(&self) -> Option<u64>;
}

/// Reads available memory from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_bytes(&self) -> Option<u64> {
        read_mem_available()
    }
}

/// Reports a fixed amount of available memory.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub u64);

impl MemoryProbe for FixedMemory {
    fn available_bytes(&self) -> Option<u64> {
        Some(self.0)
    }
}

/// Reads `MemAvailable` from `/proc/meminfo`, in bytes.
#[cfg(target_os = "linux")]
fn read_mem_available() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available(&content)
}

#[cfg(not(target_os = "linux"))]
fn read_mem_available() -> Option<u64> {
    None
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_mem_available(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| parse_meminfo_kb(line, "MemAvailable:"))
        .map(|kb| kb * 1024)
}

/// Parses a line from `/proc/meminfo` matching a prefix, returns value in kB.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo_kb(line: &str, prefix: &str) -> Option<u64> {
    if !line.starts_with(prefix) {
        return None;
    }
    line[prefix.len()..]
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
}
