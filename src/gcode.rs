//! Sliced-file metadata extraction and filament-usage normalization.
//!
//! Orca-style slicers embed the filament presets and per-filament usage as
//! comment lines near the top of the G-code. Both lines are parallel lists:
//! the Nth preset corresponds to the Nth gram value.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Line marker for the ordered filament preset list.
const PRESETS_MARKER: &str = "filament_settings_id";
/// Line marker for the per-filament mass usage list.
const USAGE_MARKER: &str = "filament used [g]";

/// Usage entries below this many grams are purge-line artifacts of a color
/// switch, not meaningful spool consumption.
const TINY_USAGE_THRESHOLD: f64 = 1.0;

/// Scan a sliced file for the preset and usage marker lines.
///
/// The file is read line by line and the scan stops as soon as both markers
/// have been seen, so large G-code bodies are never read in full. The first
/// line matching each marker wins. A missing marker yields an empty
/// sequence. Undecodable bytes are replaced rather than treated as errors;
/// the markers themselves are plain ASCII.
pub fn parse_metadata(path: &Path) -> io::Result<(Vec<String>, Vec<f64>)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    let mut presets: Option<Vec<String>> = None;
    let mut grams: Option<Vec<f64>> = None;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let lower = line.to_lowercase();

        if presets.is_none() && lower.contains(PRESETS_MARKER) {
            let quoted = extract_quoted(&line);
            if !quoted.is_empty() {
                presets = Some(quoted);
            }
        }

        if grams.is_none() && lower.contains(USAGE_MARKER) {
            let numbers = extract_numbers(&line);
            if !numbers.is_empty() {
                grams = Some(numbers);
            }
        }

        if presets.is_some() && grams.is_some() {
            break;
        }
    }

    Ok((presets.unwrap_or_default(), grams.unwrap_or_default()))
}

/// Fold sub-gram usage entries into the dominant filament.
///
/// With zero or one usage value there is nothing to fold. Otherwise every
/// entry other than the maximum (first occurrence wins ties) that is
/// strictly below [`TINY_USAGE_THRESHOLD`] is summed into the maximum entry
/// and removed from both sequences. Removals run from the highest index
/// down so earlier indices stay valid, and the relative order of the
/// surviving entries is preserved.
pub fn normalize_usage(
    mut presets: Vec<String>,
    mut grams: Vec<f64>,
) -> (Vec<String>, Vec<f64>) {
    if grams.len() <= 1 {
        return (presets, grams);
    }

    let mut max_idx = 0;
    for (i, g) in grams.iter().enumerate() {
        if *g > grams[max_idx] {
            max_idx = i;
        }
    }

    let tiny: Vec<usize> = grams
        .iter()
        .enumerate()
        .filter(|(i, g)| **g < TINY_USAGE_THRESHOLD && *i != max_idx)
        .map(|(i, _)| i)
        .collect();
    if tiny.is_empty() {
        return (presets, grams);
    }

    let tiny_sum: f64 = tiny.iter().map(|&i| grams[i]).sum();
    grams[max_idx] += tiny_sum;

    for &i in tiny.iter().rev() {
        grams.remove(i);
        if i < presets.len() {
            presets.remove(i);
        }
    }

    (presets, grams)
}

/// All complete double-quoted substrings of a line, in order.
fn extract_quoted(line: &str) -> Vec<String> {
    let parts: Vec<&str> = line.split('"').collect();
    // An even part count means the final quote was never closed; the last
    // fragment is not a complete quoted string.
    let complete = if parts.len() % 2 == 0 {
        parts.len() - 1
    } else {
        parts.len()
    };

    parts
        .iter()
        .take(complete)
        .enumerate()
        .filter(|(i, part)| i % 2 == 1 && !part.is_empty())
        .map(|(_, part)| (*part).to_string())
        .collect()
}

/// All numeric substrings of a line (optional sign, optional decimal
/// point), in order. Tokens that fail to parse are skipped.
fn extract_numbers(line: &str) -> Vec<f64> {
    let bytes = line.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let mut j = i;
        if bytes[j] == b'+' || bytes[j] == b'-' {
            j += 1;
        }
        let mut digits = 0;
        let mut seen_dot = false;
        while j < bytes.len() {
            match bytes[j] {
                b'0'..=b'9' => {
                    digits += 1;
                    j += 1;
                }
                b'.' if !seen_dot => {
                    seen_dot = true;
                    j += 1;
                }
                _ => break,
            }
        }
        if digits > 0 {
            if let Ok(value) = line[start..j].parse::<f64>() {
                out.push(value);
            }
            i = j;
        } else {
            i = start + 1;
        }
    }

    out
}
