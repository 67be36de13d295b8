//! Device name heuristics

use crate::backend::FilesystemPath;
use regex::Regex;
use std::sync::OnceLock;

const ROOT_PATH: &str = "/";

fn boot_device_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(?:xvda|sda)\d*|nvme0n1(?:p\d+)?)$").expect("boot device pattern is valid")
    })
}

/// Device name without the /dev/ prefix
pub fn short_name(device: &str) -> &str {
    device.strip_prefix("/dev/").unwrap_or(device)
}

/// Whether a device name looks like an instance's boot disk
pub fn is_boot_device(device: &str) -> bool {
    boot_device_pattern().is_match(short_name(device))
}

/// Pick the filesystem path whose usage represents `device`
///
/// Boot devices map to `/`. Otherwise prefer a non-root path naming the
/// device, then any non-root path, then `/`. Returns `None` when nothing
/// is reported.
pub fn select_filesystem_path(device: &str, paths: &[FilesystemPath]) -> Option<String> {
    if paths.is_empty() {
        return None;
    }
    if is_boot_device(device) {
        return Some(ROOT_PATH.to_string());
    }

    let short = short_name(device);
    let non_root = || paths.iter().filter(|p| p.path != ROOT_PATH);

    let by_name = non_root().find(|p| {
        p.path.contains(short)
            || p
                .device
                .as_deref()
                .map(|d| short_name(d).starts_with(short))
                .unwrap_or(false)
    });

    let chosen = by_name
        .or_else(|| non_root().next())
        .map(|p| p.path.clone())
        .unwrap_or_else(|| ROOT_PATH.to_string());
    Some(chosen)
}

/// Conventional mount point for common secondary device names
pub fn guess_mount_point(device: &str) -> Option<&'static str> {
    match short_name(device) {
        "xvdf" | "sdf" | "nvme1n1" => Some("/data"),
        "xvdg" | "sdg" => Some("/data2"),
        _ => None,
    }
}

/// Drive letter a Windows instance most likely assigned to `device`
pub fn windows_drive_letter(device: &str) -> Option<char> {
    if is_boot_device(device) {
        return Some('C');
    }
    short_name(device)
        .chars()
        .last()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
}
