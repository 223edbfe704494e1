//! Startup Diagnostics
//!
//! Host and desktop environment facts worth having at the top of a log when
//! screen capture misbehaves.

use std::path::Path;
use std::process::Command;

use sysinfo::System;
use tracing::{info, warn};

/// Portal backend binaries, by install location
const PORTAL_BACKENDS: &[(&str, &str)] = &[
    ("xdg-desktop-portal-gnome", "GNOME"),
    ("xdg-desktop-portal-kde", "KDE"),
    ("xdg-desktop-portal-wlr", "wlroots"),
    ("xdg-desktop-portal-hyprland", "Hyprland"),
    ("xdg-desktop-portal-cosmic", "COSMIC"),
];

const LIBEXEC_DIRS: &[&str] = &["/usr/libexec", "/usr/lib", "/usr/lib/xdg-desktop-portal"];

/// Host facts
#[derive(Debug, Clone)]
pub struct SystemInfo {
    /// Distribution or OS name
    pub os_name: String,
    /// OS version string
    pub os_version: String,
    /// Kernel version
    pub kernel_version: String,
    /// Logical CPUs, which bounds how many viewers encode cost can be spread over
    pub cpu_count: usize,
    /// Total memory in megabytes
    pub total_memory_mb: u64,
    /// Hostname
    pub hostname: String,
}

impl SystemInfo {
    /// Gather from the running system
    pub fn gather() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();

        Self {
            os_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
            kernel_version: System::kernel_version().unwrap_or_else(|| "Unknown".to_string()),
            cpu_count: sys.cpus().len(),
            total_memory_mb: sys.total_memory() / 1024 / 1024,
            hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        }
    }

    /// Log at info level
    pub fn log(&self) {
        info!("=== System Information ===");
        info!("  OS: {} {}", self.os_name, self.os_version);
        info!("  Kernel: {}", self.kernel_version);
        info!("  Hostname: {}", self.hostname);
        info!("  CPUs: {}", self.cpu_count);
        info!("  Memory: {} MB", self.total_memory_mb);
    }
}

/// Desktop the session reports, if any
pub fn detect_compositor() -> Option<String> {
    compositor_from(
        std::env::var("XDG_CURRENT_DESKTOP").ok(),
        std::env::var("WAYLAND_DISPLAY").ok(),
    )
}

fn compositor_from(desktop: Option<String>, wayland_display: Option<String>) -> Option<String> {
    match (desktop.filter(|d| !d.is_empty()), wayland_display.filter(|d| !d.is_empty())) {
        (Some(desktop), Some(display)) => Some(format!("{} (Wayland, {})", desktop, display)),
        (Some(desktop), None) => Some(desktop),
        (None, Some(display)) => Some(format!("Wayland ({})", display)),
        (None, None) => None,
    }
}

/// True when a Wayland display is advertised
pub fn is_wayland_session() -> bool {
    std::env::var_os("WAYLAND_DISPLAY").is_some_and(|d| !d.is_empty())
}

/// Installed ScreenCast portal backends
pub fn detect_portal_backends() -> Vec<&'static str> {
    let mut found = Vec::new();
    for (binary, name) in PORTAL_BACKENDS {
        let installed = LIBEXEC_DIRS
            .iter()
            .any(|dir| Path::new(dir).join(binary).exists());
        if installed && !found.contains(name) {
            found.push(*name);
        }
    }
    found
}

/// `pipewire --version`, first line
pub fn get_pipewire_version() -> Option<String> {
    let output = Command::new("pipewire").arg("--version").output().ok()?;
    String::from_utf8(output.stdout)
        .ok()?
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
}

/// Log everything above once at startup
pub fn log_startup_diagnostics() {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║          Startup Diagnostics                               ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    SystemInfo::gather().log();

    info!("=== Capture Environment ===");
    match detect_compositor() {
        Some(compositor) => info!("  Desktop: {}", compositor),
        None => info!("  Desktop: Unknown"),
    }
    if !is_wayland_session() {
        warn!("  WAYLAND_DISPLAY is not set; the ScreenCast portal may refuse capture");
    }

    let backends = detect_portal_backends();
    if backends.is_empty() {
        warn!("  Portal backends: none detected");
    } else {
        info!("  Portal backends: {}", backends.join(", "));
    }

    match get_pipewire_version() {
        Some(version) => info!("  PipeWire: {}", version),
        None => info!("  PipeWire: not found in PATH"),
    }

    info!("=== Build ===");
    info!("  Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        "  Capture: {}",
        if cfg!(feature = "capture") { "enabled" } else { "disabled (built without PipeWire)" }
    );
    #[cfg(debug_assertions)]
    info!("  Profile: debug");
    #[cfg(not(debug_assertions))]
    info!("  Profile: release");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_info_gather() {
        let info = SystemInfo::gather();
        assert!(!info.os_name.is_empty());
        assert!(info.cpu_count > 0);
    }

    #[test]
    fn test_compositor_description() {
        assert_eq!(
            compositor_from(Some("GNOME".into()), Some("wayland-0".into())).as_deref(),
            Some("GNOME (Wayland, wayland-0)")
        );
        assert_eq!(compositor_from(Some("KDE".into()), None).as_deref(), Some("KDE"));
        assert_eq!(
            compositor_from(Some(String::new()), Some("wayland-1".into())).as_deref(),
            Some("Wayland (wayland-1)")
        );
        assert_eq!(compositor_from(None, None), None);
    }

    #[test]
    fn test_portal_backends_have_no_duplicates() {
        let found = detect_portal_backends();
        let mut deduped = found.clone();
        deduped.dedup();
        assert_eq!(found, deduped);
    }
}
