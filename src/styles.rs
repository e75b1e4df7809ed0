use crate::patch::model::{
    AlignmentSnapshot, BorderSideSnapshot, BorderSnapshot, FillSnapshot, FontSnapshot,
};
use crate::tools::param_enums::{HorizontalAlign, VerticalAlign};
use anyhow::{Result, bail};
use once_cell::sync::Lazy;
use regex::Regex;
use umya_spreadsheet::structs::{EnumTrait, HorizontalAlignmentValues, VerticalAlignmentValues};
use umya_spreadsheet::{Border, Color, PatternValues, Style};

static HEX_COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#?(?:[0-9A-Fa-f]{6}|[0-9A-Fa-f]{8})$").expect("regex"));

pub const THIN_BORDER: &str = "thin";
pub const BLACK_ARGB: &str = "FF000000";

/// Normalize user input to `#RRGGBB` or `#AARRGGBB`, uppercase.
pub fn normalize_hex_input(value: &str, field_name: &str) -> Result<String> {
    let text = value.trim().to_ascii_uppercase();
    if !HEX_COLOR_RE.is_match(&text) {
        bail!(
            "Invalid {field_name} format. Use 'RRGGBB', 'AARRGGBB', '#RRGGBB', or '#AARRGGBB'."
        );
    }
    Ok(if text.starts_with('#') {
        text
    } else {
        format!("#{text}")
    })
}

/// `#RRGGBB` gets an opaque alpha prefix; `#AARRGGBB` is kept.
pub fn hex_to_argb(hex: &str) -> String {
    let digits = hex.trim_start_matches('#').to_ascii_uppercase();
    if digits.len() == 6 {
        format!("FF{digits}")
    } else {
        digits
    }
}

/// Host automation colors are little-endian BGR integers.
pub fn hex_to_host_rgb(hex: &str) -> i64 {
    let digits = hex.trim_start_matches('#');
    let rgb = if digits.len() == 8 { &digits[2..] } else { digits };
    let channel = |range: std::ops::Range<usize>| {
        rgb.get(range)
            .and_then(|s| i64::from_str_radix(s, 16).ok())
            .unwrap_or(0)
    };
    channel(0..2) + channel(2..4) * 256 + channel(4..6) * 65_536
}

pub fn host_rgb_to_hex(value: i64) -> String {
    let value = value.clamp(0, 0xFF_FF_FF);
    let r = value & 0xFF;
    let g = (value >> 8) & 0xFF;
    let b = (value >> 16) & 0xFF;
    format!("#{r:02X}{g:02X}{b:02X}")
}

pub fn horizontal_to_umya(value: HorizontalAlign) -> HorizontalAlignmentValues {
    match value {
        HorizontalAlign::General => HorizontalAlignmentValues::General,
        HorizontalAlign::Left => HorizontalAlignmentValues::Left,
        HorizontalAlign::Center => HorizontalAlignmentValues::Center,
        HorizontalAlign::Right => HorizontalAlignmentValues::Right,
        HorizontalAlign::Fill => HorizontalAlignmentValues::Fill,
        HorizontalAlign::Justify => HorizontalAlignmentValues::Justify,
        HorizontalAlign::CenterContinuous => HorizontalAlignmentValues::CenterContinuous,
        HorizontalAlign::Distributed => HorizontalAlignmentValues::Distributed,
    }
}

pub fn vertical_to_umya(value: VerticalAlign) -> VerticalAlignmentValues {
    match value {
        VerticalAlign::Top => VerticalAlignmentValues::Top,
        VerticalAlign::Center => VerticalAlignmentValues::Center,
        VerticalAlign::Bottom => VerticalAlignmentValues::Bottom,
        VerticalAlign::Justify => VerticalAlignmentValues::Justify,
        VerticalAlign::Distributed => VerticalAlignmentValues::Distributed,
    }
}

fn non_empty(value: &str) -> Option<String> {
    Some(value.to_string()).filter(|s| !s.is_empty())
}

fn border_side(border: &Border) -> BorderSideSnapshot {
    let style = border.get_border_style();
    BorderSideSnapshot {
        style: if style.eq_ignore_ascii_case("none") || style.is_empty() {
            None
        } else {
            Some(style.to_string())
        },
        color: non_empty(border.get_color().get_argb()),
    }
}

pub fn border_snapshot(cell: &str, style: &Style) -> BorderSnapshot {
    match style.get_borders() {
        Some(borders) => BorderSnapshot {
            cell: cell.to_string(),
            top: border_side(borders.get_top_border()),
            right: border_side(borders.get_right_border()),
            bottom: border_side(borders.get_bottom_border()),
            left: border_side(borders.get_left_border()),
        },
        None => BorderSnapshot {
            cell: cell.to_string(),
            top: BorderSideSnapshot::default(),
            right: BorderSideSnapshot::default(),
            bottom: BorderSideSnapshot::default(),
            left: BorderSideSnapshot::default(),
        },
    }
}

pub fn font_snapshot(cell: &str, style: &Style) -> FontSnapshot {
    let font = style.get_font().cloned().unwrap_or_default();
    FontSnapshot {
        cell: cell.to_string(),
        bold: Some(*font.get_bold()),
        size: Some(*font.get_size()).filter(|s| *s > 0.0),
        color: non_empty(font.get_color().get_argb()),
    }
}

pub fn fill_snapshot(cell: &str, style: &Style) -> FillSnapshot {
    let pattern = style.get_fill().and_then(|fill| fill.get_pattern_fill());
    let Some(pattern) = pattern else {
        return FillSnapshot {
            cell: cell.to_string(),
            fill_type: None,
            start_color: None,
            end_color: None,
        };
    };
    let kind = pattern.get_pattern_type().get_value_string();
    FillSnapshot {
        cell: cell.to_string(),
        fill_type: if kind.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(kind.to_string())
        },
        start_color: pattern
            .get_foreground_color()
            .and_then(|c| non_empty(c.get_argb())),
        end_color: pattern
            .get_background_color()
            .and_then(|c| non_empty(c.get_argb())),
    }
}

pub fn alignment_snapshot(cell: &str, style: &Style) -> AlignmentSnapshot {
    let alignment = style.get_alignment().cloned().unwrap_or_default();
    AlignmentSnapshot {
        cell: cell.to_string(),
        horizontal: Some(alignment.get_horizontal().get_value_string().to_string()),
        vertical: Some(alignment.get_vertical().get_value_string().to_string()),
        wrap_text: Some(*alignment.get_wrap_text()),
    }
}

fn restore_border_side(border: &mut Border, side: &BorderSideSnapshot) {
    border.set_border_style(side.style.clone().unwrap_or_else(|| "none".to_string()));
    border
        .get_color_mut()
        .set_argb(side.color.clone().unwrap_or_default());
}

pub fn restore_borders(style: &mut Style, snapshot: &BorderSnapshot) {
    let borders = style.get_borders_mut();
    restore_border_side(borders.get_top_border_mut(), &snapshot.top);
    restore_border_side(borders.get_right_border_mut(), &snapshot.right);
    restore_border_side(borders.get_bottom_border_mut(), &snapshot.bottom);
    restore_border_side(borders.get_left_border_mut(), &snapshot.left);
}

pub fn restore_font(style: &mut Style, snapshot: &FontSnapshot) {
    let font = style.get_font_mut();
    font.set_bold(snapshot.bold.unwrap_or(false));
    if let Some(size) = snapshot.size {
        font.set_size(size);
    }
    font.get_color_mut()
        .set_argb(snapshot.color.clone().unwrap_or_default());
}

fn pattern_from_name(name: &str) -> PatternValues {
    match name {
        "none" => PatternValues::None,
        "gray125" => PatternValues::Gray125,
        "lightGray" => PatternValues::LightGray,
        "mediumGray" => PatternValues::MediumGray,
        "darkGray" => PatternValues::DarkGray,
        _ => PatternValues::Solid,
    }
}

pub fn restore_fill(style: &mut Style, snapshot: &FillSnapshot) {
    let pattern = style.get_fill_mut().get_pattern_fill_mut();
    pattern.set_pattern_type(
        snapshot
            .fill_type
            .as_deref()
            .map(pattern_from_name)
            .unwrap_or(PatternValues::None),
    );
    match snapshot.start_color.as_deref() {
        Some(argb) => {
            pattern.get_foreground_color_mut().set_argb(argb);
        }
        None => {
            pattern.set_foreground_color(Color::default());
        }
    }
    match snapshot.end_color.as_deref() {
        Some(argb) => {
            pattern.get_background_color_mut().set_argb(argb);
        }
        None => {
            pattern.set_background_color(Color::default());
        }
    }
}

pub fn horizontal_from_name(name: &str) -> HorizontalAlignmentValues {
    HorizontalAlign::parse(name)
        .map(horizontal_to_umya)
        .unwrap_or(HorizontalAlignmentValues::General)
}

pub fn vertical_from_name(name: &str) -> VerticalAlignmentValues {
    VerticalAlign::parse(name)
        .map(vertical_to_umya)
        .unwrap_or(VerticalAlignmentValues::Bottom)
}

pub fn restore_alignment(style: &mut Style, snapshot: &AlignmentSnapshot) {
    let alignment = style.get_alignment_mut();
    alignment.set_horizontal(
        snapshot
            .horizontal
            .as_deref()
            .map(horizontal_from_name)
            .unwrap_or(HorizontalAlignmentValues::General),
    );
    alignment.set_vertical(
        snapshot
            .vertical
            .as_deref()
            .map(vertical_from_name)
            .unwrap_or(VerticalAlignmentValues::Bottom),
    );
    alignment.set_wrap_text(snapshot.wrap_text.unwrap_or(false));
}

/// Thin black border on every side.
pub fn apply_thin_border(style: &mut Style) {
    let borders = style.get_borders_mut();
    set_thin(borders.get_top_border_mut());
    set_thin(borders.get_right_border_mut());
    set_thin(borders.get_bottom_border_mut());
    set_thin(borders.get_left_border_mut());
}

fn set_thin(border: &mut Border) {
    border.set_border_style(THIN_BORDER);
    border.get_color_mut().set_argb(BLACK_ARGB);
}

pub fn apply_solid_fill(style: &mut Style, argb: &str) {
    style
        .get_fill_mut()
        .get_pattern_fill_mut()
        .set_pattern_type(PatternValues::Solid)
        .get_foreground_color_mut()
        .set_argb(argb);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_inputs_normalize_to_hash_form() {
        assert_eq!(normalize_hex_input("d9e1f2", "fill_color").unwrap(), "#D9E1F2");
        assert_eq!(normalize_hex_input("#80ffffff", "color").unwrap(), "#80FFFFFF");
        let err = normalize_hex_input("#12345", "color").unwrap_err().to_string();
        assert!(err.starts_with("Invalid color format."));
    }

    #[test]
    fn argb_and_host_rgb_conversions() {
        assert_eq!(hex_to_argb("#1F4E79"), "FF1F4E79");
        assert_eq!(hex_to_argb("#801F4E79"), "801F4E79");
        assert_eq!(hex_to_host_rgb("#FF0000"), 255);
        assert_eq!(hex_to_host_rgb("#0000FF"), 255 * 65_536);
        assert_eq!(host_rgb_to_hex(hex_to_host_rgb("#1F4E79")), "#1F4E79");
    }

    #[test]
    fn fill_restore_round_trips_snapshot() {
        let mut style = Style::default();
        let before = fill_snapshot("A1", &style);
        apply_solid_fill(&mut style, "FFD9E1F2");
        let applied = fill_snapshot("A1", &style);
        assert_eq!(applied.fill_type.as_deref(), Some("solid"));
        assert_eq!(applied.start_color.as_deref(), Some("FFD9E1F2"));
        restore_fill(&mut style, &before);
        assert_eq!(fill_snapshot("A1", &style), before);
    }

    #[test]
    fn border_restore_clears_sides() {
        let mut style = Style::default();
        let before = border_snapshot("B2", &style);
        apply_thin_border(&mut style);
        assert_eq!(border_snapshot("B2", &style).top.style.as_deref(), Some("thin"));
        restore_borders(&mut style, &before);
        assert_eq!(border_snapshot("B2", &style), before);
    }
}
