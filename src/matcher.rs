//! Resolve a slicer filament preset to a Spoolman spool.
//!
//! Presets are expected as `Vendor - Material - Color`. Matching runs in
//! three tiers so a well-kept inventory resolves exactly, while sloppier
//! setups still land on something plausible. A big inventory can hold the
//! same color name across vendors and materials, which is why the exact
//! tier is always preferred over the fallbacks.

use crate::spoolman::Spool;

/// Split a `Vendor - Material - Color` preset into trimmed parts.
///
/// The color itself may contain dashes; everything after the second
/// segment is re-joined. Fewer than three segments, or an empty vendor,
/// material or color, is an invalid preset: an empty part would compare
/// equal to absent spool fields and match an arbitrary spool.
pub fn split_preset(preset: &str) -> Option<(String, String, String)> {
    let parts: Vec<&str> = preset.split('-').map(str::trim).collect();
    if parts.len() < 3 {
        return None;
    }

    let vendor = parts[0];
    let material = parts[1];
    let color = parts[2..].join("-");
    if vendor.is_empty() || material.is_empty() || color.is_empty() {
        return None;
    }

    Some((vendor.to_string(), material.to_string(), color))
}

/// Find the spool id for a preset, first hit of the first tier that
/// produces any hit:
///
/// 1. vendor + material + color against the nested filament record;
/// 2. flat vendor field + color-or-name;
/// 3. color-or-name only.
///
/// Within a tier the first spool in snapshot order wins. All comparisons
/// are case-insensitive. Returns `None` for an invalid preset without
/// inspecting the snapshot at all.
pub fn find_spool_for_preset(preset: &str, spools: &[Spool]) -> Option<i64> {
    let Some((vendor, material, color)) = split_preset(preset) else {
        tracing::error!("invalid preset format: '{}'", preset);
        return None;
    };

    let vendor = vendor.to_lowercase();
    let material = material.to_lowercase();
    let color = color.to_lowercase();

    // Exact: vendor + material + color from the nested filament record.
    for spool in spools {
        let f = &spool.filament;
        if f.vendor.name.to_lowercase() == vendor
            && f.material.to_lowercase() == material
            && f.name.to_lowercase() == color
        {
            return Some(spool.id);
        }
    }

    // Vendor + color.
    for spool in spools {
        if spool.flat_vendor().to_lowercase() == vendor
            && spool.color_or_name().to_lowercase() == color
        {
            return Some(spool.id);
        }
    }

    // Color only.
    for spool in spools {
        if spool.color_or_name().to_lowercase() == color {
            return Some(spool.id);
        }
    }

    None
}
