use hwscope_core::{DeviceRecord, DisplayTone};
use hwscope_inventory::{CommandAvailability, InventorySnapshot};
use std::fmt::Write;

fn tone_marker(record: &DeviceRecord) -> &'static str {
    match record.display_tone() {
        DisplayTone::Normal => "",
        DisplayTone::Hidden => " (hidden)",
        DisplayTone::Absent => " (absent)",
    }
}

pub fn list(snapshot: &InventorySnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", snapshot.list_label());
    for record in &snapshot.records {
        let ids = record.hardware_ids();
        let _ = writeln!(
            out,
            "{:<16} {}:{} {:<34} {}{}",
            record.device_id,
            ids.vendor_id,
            ids.product_id,
            record.class_description,
            record.description,
            tone_marker(record)
        );
    }
    out
}

pub fn tree(snapshot: &InventorySnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}  {}", snapshot.forest.host_label, snapshot.tree_label());
    for (depth, node) in snapshot.forest.walk() {
        let record = &node.record;
        let icon = snapshot
            .icon_for(record)
            .map(|icon| format!(" [{}]", icon.name))
            .unwrap_or_default();
        let kind = if record.is_interface { " <interface>" } else { "" };
        let _ = writeln!(
            out,
            "{}{}{}{}{}  {}",
            "  ".repeat(depth + 1),
            record.description,
            kind,
            tone_marker(record),
            icon,
            record.device_id
        );
    }
    out
}

pub fn details(record: &DeviceRecord, availability: CommandAvailability) -> String {
    let ids = record.hardware_ids();
    let mut out = String::new();
    let _ = writeln!(out, "{}", record.description);
    let rows = [
        ("Device id", record.device_id.clone()),
        ("Parent", record.parent_device_id.clone()),
        ("Class", format!("{} {}", record.class_description, record.class_guid)),
        ("Manufacturer", record.manufacturer.clone()),
        ("Path", record.device_path.clone()),
        ("Vendor id", ids.vendor_id),
        ("Product id", ids.product_id),
        ("Revision", ids.revision),
        ("Status", record.status.describe()),
        ("Present", record.is_present.to_string()),
        ("Removable", record.is_removable.to_string()),
    ];
    for (name, value) in rows {
        let _ = writeln!(out, "  {name:<13} {value}");
    }
    let mut commands: Vec<&str> = Vec::new();
    if availability.enable {
        commands.push("enable");
    }
    if availability.disable {
        commands.push("disable");
    }
    if availability.remove {
        commands.push("remove");
    }
    let _ = writeln!(out, "  {:<13} {}", "Commands", commands.join(", "));
    out
}
