//! Terminal output for upload events.

use std::collections::HashMap;

use partwise_protocol::UploadStatus;
use partwise_uploader::{UploadEvent, UploadView};

/// Prints status changes and every tenth percent of progress.
#[derive(Default)]
pub struct EventPrinter {
    last: HashMap<String, (UploadStatus, u8)>,
}

impl EventPrinter {
    pub fn print(&mut self, event: &UploadEvent) {
        if let Some(line) = self.line(event) {
            println!("{line}");
        }
    }

    fn line(&mut self, event: &UploadEvent) -> Option<String> {
        match event {
            UploadEvent::Changed(view) => {
                let step = view.progress / 10;
                let previous = self.last.insert(view.id.clone(), (view.status, step));
                if previous == Some((view.status, step)) {
                    return None;
                }
                Some(describe(view))
            }
            UploadEvent::Rejected(rejection) => {
                Some(format!("{}: rejected ({})", rejection.name, rejection.reason))
            }
            UploadEvent::Retrying {
                part_number,
                attempt,
                delay_ms,
                error,
                ..
            } => Some(format!(
                "  part {part_number}: {error}; retry {attempt} in {:.1}s",
                *delay_ms as f64 / 1000.0
            )),
            UploadEvent::Removed { id } => {
                self.last.remove(id);
                None
            }
        }
    }
}

fn describe(view: &UploadView) -> String {
    match view.status {
        UploadStatus::Uploading => {
            let mut line = format!(
                "{}: {:>3}%  {} / {}",
                view.name,
                view.progress,
                format_bytes(view.uploaded_bytes),
                format_bytes(view.size)
            );
            if view.bytes_per_second > 0.0 {
                line.push_str(&format!("  {}/s", format_bytes(view.bytes_per_second as u64)));
            }
            if let Some(eta) = view.eta_secs {
                line.push_str(&format!("  eta {}", format_eta(eta)));
            }
            line
        }
        UploadStatus::Done => match &view.location {
            Some(location) => format!("{}: uploaded to {location}", view.name),
            None => format!("{}: uploaded", view.name),
        },
        UploadStatus::Error => format!(
            "{}: failed: {}",
            view.name,
            view.error.as_deref().unwrap_or("unknown error")
        ),
        status => format!("{}: {}", view.name, status.label()),
    }
}

/// Formats a byte count with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

fn format_eta(secs: u64) -> String {
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
    }
}
