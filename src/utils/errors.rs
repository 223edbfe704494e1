//! User-Friendly Error Formatting
//!
//! Turns startup and negotiation failures into a message with likely causes
//! and the commands that check them.

use std::fmt::Write;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Broad class of a failure, decided from its message chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User refused the screen capture dialog
    PermissionDenied,
    /// Portal unreachable or misbehaving
    Portal,
    /// PipeWire connection or stream failure
    PipeWire,
    /// JPEG encoder failure
    Encoder,
    /// Socket bind / address problem
    Network,
    /// Configuration file or value problem
    Config,
    /// Anything else
    Other,
}

/// Classify an error by its full context chain
pub fn categorize(error: &anyhow::Error) -> ErrorCategory {
    let chain = format!("{:#}", error);

    if chain.contains("permission denied at") {
        ErrorCategory::PermissionDenied
    } else if chain.contains("Portal") || chain.contains("portal") || chain.contains("D-Bus") {
        ErrorCategory::Portal
    } else if chain.contains("PipeWire") || chain.contains("pipewire") {
        ErrorCategory::PipeWire
    } else if chain.contains("JPEG") {
        ErrorCategory::Encoder
    } else if chain.contains("bind") || chain.contains("address") {
        ErrorCategory::Network
    } else if chain.contains("config") || chain.contains("Invalid") {
        ErrorCategory::Config
    } else {
        ErrorCategory::Other
    }
}

/// Format error for user consumption
///
/// Produces a boxed summary, likely causes with checks to run, and the full
/// technical chain.
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();

    writeln!(output).ok();
    writeln!(output, "╔════════════════════════════════════════════════════════════╗").ok();
    writeln!(output, "║                     ERROR                                  ║").ok();
    writeln!(output, "╚════════════════════════════════════════════════════════════╝").ok();
    writeln!(output).ok();

    match categorize(error) {
        ErrorCategory::PermissionDenied => write_section(
            &mut output,
            "Screen Capture Was Not Allowed",
            "The screen sharing dialog was cancelled or denied.",
            &[(
                "Permission dialog dismissed",
                &[
                    "Start the server again and choose 'Share' in the dialog",
                    "Pick a monitor; window capture is not requested",
                ],
            )],
        ),
        ErrorCategory::Portal => write_section(
            &mut output,
            "Screen Capture Permission Error",
            "Could not negotiate screen capture with xdg-desktop-portal.",
            &[
                (
                    "Portal is not running",
                    &[
                        "Run: systemctl --user status xdg-desktop-portal",
                        "Start it: systemctl --user start xdg-desktop-portal",
                    ],
                ),
                (
                    "No ScreenCast backend for this desktop",
                    &[
                        "GNOME: install xdg-desktop-portal-gnome",
                        "KDE: install xdg-desktop-portal-kde",
                        "wlroots (Sway, Hyprland): install xdg-desktop-portal-wlr or -hyprland",
                    ],
                ),
                (
                    "Not a Wayland desktop session",
                    &[
                        "Check: echo $WAYLAND_DISPLAY (should not be empty)",
                        "Check: echo $DBUS_SESSION_BUS_ADDRESS",
                    ],
                ),
            ],
        ),
        ErrorCategory::PipeWire => write_section(
            &mut output,
            "Screen Capture System Error (PipeWire)",
            "Capture was allowed, but the PipeWire stream could not be opened.",
            &[
                (
                    "PipeWire is not running",
                    &[
                        "Run: systemctl --user status pipewire wireplumber",
                        "Start them: systemctl --user start pipewire wireplumber",
                    ],
                ),
                (
                    "PipeWire too old",
                    &["Run: pipewire --version (0.3.x or newer needed)"],
                ),
            ],
        ),
        ErrorCategory::Encoder => write_section(
            &mut output,
            "JPEG Encoder Error",
            "The libjpeg-turbo encoder could not be set up.",
            &[(
                "Unsupported encoder settings",
                &[
                    "Check [encoder] quality is between 1 and 100",
                    "Check chroma_subsampling is one of 4:4:4, 4:2:2, 4:2:0, 4:4:0, gray",
                ],
            )],
        ),
        ErrorCategory::Network => write_section(
            &mut output,
            "Network Error",
            "Could not open the HTTP listening socket.",
            &[
                (
                    "Port already in use",
                    &[
                        "Check: ss -tlnp | grep 8080",
                        "Use another port: lamco-mjpeg-server --port 8081",
                    ],
                ),
                (
                    "Privileged port or bad address",
                    &[
                        "Ports below 1024 need elevated privileges",
                        "Check listen_addr in the [server] section",
                    ],
                ),
            ],
        ),
        ErrorCategory::Config => write_section(
            &mut output,
            "Configuration Error",
            "The configuration could not be loaded or is invalid.",
            &[(
                "Invalid configuration value",
                &[
                    "Check TOML syntax and section names",
                    "Run without --config to use built-in defaults",
                ],
            )],
        ),
        ErrorCategory::Other => {
            writeln!(output, "An unexpected error occurred.").ok();
        }
    }

    writeln!(output).ok();
    writeln!(output, "{}", RULE).ok();
    writeln!(output, "Technical Details:").ok();
    writeln!(output).ok();
    writeln!(output, "{:#}", error).ok();
    writeln!(output).ok();
    writeln!(output, "{}", RULE).ok();
    writeln!(output, "Need Help?").ok();
    writeln!(output, "  - Run with --verbose for detailed logs: lamco-mjpeg-server -vvv").ok();
    writeln!(output, "  - Report issues: https://github.com/lamco-admin/lamco-mjpeg-server/issues").ok();

    output
}

fn write_section(output: &mut String, title: &str, summary: &str, causes: &[(&str, &[&str])]) {
    writeln!(output, "{}", title).ok();
    writeln!(output).ok();
    writeln!(output, "{}", summary).ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();

    for (index, (cause, checks)) in causes.iter().enumerate() {
        writeln!(output).ok();
        writeln!(output, "  {}. {}", index + 1, cause).ok();
        for check in checks.iter() {
            writeln!(output, "     → {}", check).ok();
        }
    }
}
