//! Plain-text presentation of the controller's view.

use std::fmt::Write;

use labsync_core::{LabRecord, LabStats};

use crate::banner::{Banner, BannerKind};

const NAME_WIDTH: usize = 24;
const TEXT_WIDTH: usize = 16;

pub fn banner_line(banner: &Banner) -> String {
    let marker = match banner.kind {
        BannerKind::Success => "[ok]",
        BannerKind::Warning => "[!]",
        BannerKind::Danger => "[erro]",
        BannerKind::Info => "[i]",
    };
    format!("{marker} {}", banner.text)
}

pub fn stats_line(stats: &LabStats) -> String {
    format!(
        "Total: {} | Ativos: {} | Capacidade total: {}",
        stats.total, stats.active, stats.total_capacity
    )
}

/// Record table with a 1-based row number used by the row commands.
pub fn record_table(records: &[LabRecord]) -> String {
    if records.is_empty() {
        return "Nenhum laboratório cadastrado.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>3}  {:<NAME_WIDTH$}  {:<TEXT_WIDTH$}  {:>5}  {:>5}  {:<TEXT_WIDTH$}  {}",
        "#", "Nome", "Localização", "Cap.", "Equip", "Responsável", "Status"
    );
    for (row, record) in records.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>3}  {:<NAME_WIDTH$}  {:<TEXT_WIDTH$}  {:>5}  {:>5}  {:<TEXT_WIDTH$}  {}",
            row + 1,
            truncate(&record.name, NAME_WIDTH),
            truncate(record.location.as_deref().unwrap_or("-"), TEXT_WIDTH),
            record.capacity,
            record.equipment_count,
            truncate(record.responsible.as_deref().unwrap_or("-"), TEXT_WIDTH),
            record.status.label(),
        );
    }
    out
}

pub fn screen(header: &str, banner: Option<&Banner>, stats: &LabStats, records: &[LabRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Laboratórios === {header}");
    if let Some(banner) = banner {
        let _ = writeln!(out, "{}", banner_line(banner));
    }
    let _ = writeln!(out, "{}", stats_line(stats));
    out.push_str(&record_table(records));
    out
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
