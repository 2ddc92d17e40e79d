//! Plain-text rendering of device views.

use iotdash_ota::{CheckResult, ConnectionStatus, DeviceOtaView, OtaInfo, RolloutState};

pub fn connection_label(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Online => "online",
        ConnectionStatus::Offline => "offline",
    }
}

pub fn rollout_label(state: &RolloutState) -> String {
    match state {
        RolloutState::Idle => "idle".to_string(),
        RolloutState::Triggering => "triggering".to_string(),
        RolloutState::InProgress { progress } => format!("updating {}%", progress),
        RolloutState::Completed => "completed".to_string(),
        RolloutState::Failed { errors } => format!("failed: {}", errors.join("; ")),
    }
}

pub fn check_label(check: &CheckResult) -> String {
    match check {
        CheckResult::Unchecked => "-".to_string(),
        CheckResult::Checking => "checking".to_string(),
        CheckResult::UpToDate => "up to date".to_string(),
        CheckResult::UpdateAvailable => "update available".to_string(),
        CheckResult::CheckFailed { message } => format!("check failed: {}", message),
    }
}

fn version_label(info: Option<&OtaInfo>) -> String {
    info.and_then(|i| i.current_version.as_ref())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "?".to_string())
}

fn available_label(info: Option<&OtaInfo>) -> &'static str {
    match info {
        Some(i) if i.has_new_version => "yes",
        Some(_) => "no",
        None => "?",
    }
}

/// One line per device, aligned under a header.
pub fn device_table(views: &[DeviceOtaView]) -> String {
    let headers = ["ID", "NAME", "TYPE", "STATUS", "VERSION", "NEW", "OTA"];
    let rows: Vec<[String; 7]> = views
        .iter()
        .map(|v| {
            [
                v.device.id.clone(),
                v.device.name.clone(),
                v.device.device_type.clone(),
                connection_label(v.device.connection_status).to_string(),
                version_label(v.info.as_ref()),
                available_label(v.info.as_ref()).to_string(),
                rollout_label(&v.rollout),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let format_row = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![format_row(headers.to_vec())];
    lines.extend(rows.iter().map(|row| format_row(row.iter().map(String::as_str).collect())));
    lines.join("\n")
}

/// Multi-line summary of one device.
pub fn device_summary(view: &DeviceOtaView) -> String {
    let info = view.info.as_ref();
    let mut lines = vec![
        format!("Device:          {} ({})", view.device.name, view.device.id),
        format!("Connection:      {}", connection_label(view.device.connection_status)),
        format!("Current version: {}", version_label(info)),
    ];

    if let Some(latest) = info.and_then(|i| i.last_version.as_ref()) {
        lines.push(format!("Latest version:  {}", latest));
    }
    if let Some(at) = info.and_then(|i| i.last_update_at) {
        lines.push(format!("Last update:     {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    lines.push(format!("Check:           {}", check_label(&view.check)));
    lines.push(format!("Rollout:         {}", rollout_label(&view.rollout)));

    lines.join("\n")
}
