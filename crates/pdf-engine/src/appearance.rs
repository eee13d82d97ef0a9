//! Appearance stream generation for exported annotations
//!
//! Each function returns the content stream of a Form XObject drawn in
//! default user space. The form's `/BBox` equals the annotation `/Rect`, so
//! no `/Matrix` is needed and coordinates are written unchanged.

use std::fmt::{self, Write};

use lopdf::{dictionary, Dictionary, Object, Stream};
use pdf_annotator_core::Color;

use crate::objects::{name, real, reals};

/// A point in default user space
pub type Point = (f64, f64);

/// Corners in `/QuadPoints` order: upper-left, upper-right, lower-left, lower-right
pub type Quad = [Point; 4];

pub type AppearanceResult = Result<String, fmt::Error>;

/// Resource name of the graphics state carrying opacity and blend mode
const GS_NAME: &str = "GS0";

/// Resource name of the standard font used by free-text notes
pub const FONT_NAME: &str = "Helv";

/// Compact number formatting for content streams
struct Num(f64);

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rounded = (self.0 * 1000.0).round() / 1000.0;
        if rounded == 0.0 {
            return f.write_str("0");
        }
        let text = format!("{rounded:.3}");
        f.write_str(text.trim_end_matches('0').trim_end_matches('.'))
    }
}

fn rgb(color: Color) -> (Num, Num, Num) {
    let (r, g, b, _) = color.to_normalized();
    (Num(r), Num(g), Num(b))
}

fn graphics_state(stream: &mut String, opacity: f64) -> fmt::Result {
    if opacity < 1.0 {
        writeln!(stream, "/{GS_NAME} gs")?;
    }
    Ok(())
}

/// Filled quadrilaterals, used for highlights
pub fn filled_quads(quads: &[Quad], color: Color, opacity: f64) -> AppearanceResult {
    let mut stream = String::new();
    graphics_state(&mut stream, opacity)?;
    let (r, g, b) = rgb(color);
    writeln!(stream, "{r} {g} {b} rg")?;

    for [ul, ur, ll, lr] in quads {
        writeln!(stream, "{} {} m", Num(ll.0), Num(ll.1))?;
        writeln!(stream, "{} {} l", Num(lr.0), Num(lr.1))?;
        writeln!(stream, "{} {} l", Num(ur.0), Num(ur.1))?;
        writeln!(stream, "{} {} l", Num(ul.0), Num(ul.1))?;
        writeln!(stream, "h f")?;
    }
    Ok(stream)
}

/// Stroked polylines, used for underlines and ink
pub fn stroked_paths(paths: &[Vec<Point>], color: Color, width: f64, opacity: f64, round: bool) -> AppearanceResult {
    let mut stream = String::new();
    graphics_state(&mut stream, opacity)?;
    let (r, g, b) = rgb(color);
    writeln!(stream, "{r} {g} {b} RG")?;
    writeln!(stream, "{} w", Num(width))?;
    if round {
        // Round caps and joins
        writeln!(stream, "1 J 1 j")?;
    }

    for path in paths {
        let Some((first, rest)) = path.split_first() else {
            continue;
        };
        writeln!(stream, "{} {} m", Num(first.0), Num(first.1))?;
        if rest.is_empty() {
            // Single point: zero-length segment so round caps draw a dot
            writeln!(stream, "{} {} l", Num(first.0), Num(first.1))?;
        }
        for point in rest {
            writeln!(stream, "{} {} l", Num(point.0), Num(point.1))?;
        }
        writeln!(stream, "S")?;
    }
    Ok(stream)
}

/// Stroked rectangle outline
pub fn stroked_rect(rect: [f64; 4], color: Color, width: f64, opacity: f64) -> AppearanceResult {
    let mut stream = String::new();
    graphics_state(&mut stream, opacity)?;
    let (r, g, b) = rgb(color);
    writeln!(stream, "{r} {g} {b} RG")?;
    writeln!(stream, "{} w", Num(width))?;
    let [x0, y0, x1, y1] = rect;
    writeln!(stream, "{} {} {} {} re", Num(x0), Num(y0), Num(x1 - x0), Num(y1 - y0))?;
    writeln!(stream, "S")?;
    Ok(stream)
}

/// Background box with left-aligned text lines
pub fn free_text(
    rect: [f64; 4],
    lines: &[&str],
    font_size: f64,
    padding: f64,
    background: Color,
    opacity: f64,
) -> AppearanceResult {
    let mut stream = String::new();
    graphics_state(&mut stream, opacity)?;
    let [x0, y0, x1, y1] = rect;
    let (r, g, b) = rgb(background);
    writeln!(stream, "{r} {g} {b} rg")?;
    writeln!(stream, "{} {} {} {} re f", Num(x0), Num(y0), Num(x1 - x0), Num(y1 - y0))?;

    writeln!(stream, "0 g")?;
    writeln!(stream, "BT")?;
    writeln!(stream, "/{FONT_NAME} {} Tf", Num(font_size))?;
    writeln!(stream, "{} TL", Num(font_size * LINE_HEIGHT))?;
    writeln!(stream, "{} {} Td", Num(x0 + padding), Num(y1 - padding - font_size))?;
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            writeln!(stream, "T*")?;
        }
        writeln!(stream, "({}) Tj", escape_text(line))?;
    }
    writeln!(stream, "ET")?;
    Ok(stream)
}

/// Folded-corner note icon for collapsed sticky notes
pub fn note_icon(rect: [f64; 4], color: Color) -> AppearanceResult {
    let mut stream = String::new();
    let [x0, y0, x1, y1] = rect;
    let fold = (x1 - x0).min(y1 - y0) * 0.3;
    let (r, g, b) = rgb(color);
    writeln!(stream, "{r} {g} {b} rg")?;
    writeln!(stream, "0 G 1 w")?;
    writeln!(stream, "{} {} m", Num(x0 + 0.5), Num(y0 + 0.5))?;
    writeln!(stream, "{} {} l", Num(x1 - 0.5), Num(y0 + 0.5))?;
    writeln!(stream, "{} {} l", Num(x1 - 0.5), Num(y1 - fold))?;
    writeln!(stream, "{} {} l", Num(x1 - fold), Num(y1 - 0.5))?;
    writeln!(stream, "{} {} l", Num(x0 + 0.5), Num(y1 - 0.5))?;
    writeln!(stream, "h B")?;

    // Text lines
    for step in 1..=3 {
        let y = y1 - fold - (y1 - y0 - fold) * f64::from(step) / 4.0;
        writeln!(stream, "{} {} m {} {} l", Num(x0 + 4.0), Num(y), Num(x1 - 4.0), Num(y))?;
    }
    writeln!(stream, "S")?;
    Ok(stream)
}

/// Line spacing as a multiple of the font size
pub const LINE_HEIGHT: f64 = 1.2;

/// Escape a line for a literal string in a content stream
///
/// Latin-1 characters become octal escapes for `WinAnsiEncoding`; anything
/// outside it is replaced with `?`.
fn escape_text(line: &str) -> String {
    let mut escaped = String::with_capacity(line.len());
    for ch in line.chars() {
        match ch {
            '\\' | '(' | ')' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            ' '..='~' => escaped.push(ch),
            '\u{a0}'..='\u{ff}' => {
                let _ = write!(escaped, "\\{:03o}", ch as u32);
            }
            _ => escaped.push('?'),
        }
    }
    escaped
}

/// Resources for an appearance form
pub fn resources(opacity: f64, multiply: bool, with_font: bool) -> Dictionary {
    let mut resources = Dictionary::new();
    if opacity < 1.0 || multiply {
        let mut state = dictionary! {
            "Type" => "ExtGState",
            "CA" => real(opacity),
            "ca" => real(opacity),
        };
        if multiply {
            state.set("BM", name("Multiply"));
        }
        resources.set("ExtGState", dictionary! { GS_NAME => state });
    }
    if with_font {
        resources.set(
            "Font",
            dictionary! {
                FONT_NAME => dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                    "Encoding" => "WinAnsiEncoding",
                },
            },
        );
    }
    resources
}

/// Wrap a content stream into a Form XObject whose `/BBox` is `rect`
pub fn form_xobject(content: String, rect: [f64; 4], resources: Dictionary) -> Stream {
    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Form",
        "FormType" => 1,
        "BBox" => reals(rect),
        "Resources" => Object::Dictionary(resources),
    };
    Stream::new(dict, content.into_bytes())
}
