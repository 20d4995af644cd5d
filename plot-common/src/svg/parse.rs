//! SVG document walking.
//!
//! Extracts drawable geometry from the supported element subset and
//! ignores everything else. Only attribute data is consulted; styling
//! and transforms are out of scope for plotter input.

use super::path::parse_path_data;
use crate::errors::{PlotError, Result};
use crate::types::{Point, Polyline, ViewBox};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// Segments used to polygonalize a circle.
const CIRCLE_SEGMENTS: usize = 36;

/// Geometry pulled out of one SVG document, in SVG units.
#[derive(Debug, Clone)]
pub struct SvgDocument {
    pub polylines: Vec<Polyline>,
    pub view_box: ViewBox,
}

/// Parse an SVG string into polylines.
pub fn parse_document(svg: &str) -> Result<SvgDocument> {
    let mut reader = Reader::from_str(svg);
    let mut polylines: Vec<Polyline> = Vec::new();
    let mut view_box: Option<ViewBox> = None;
    let mut saw_svg = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.name();
                let name = name.as_ref();
                match name {
                    b"svg" => {
                        saw_svg = true;
                        view_box = document_box(&e)?;
                    }
                    b"path" => {
                        if let Some(d) = attr(&e, b"d")? {
                            polylines.extend(parse_path_data(&d)?);
                        }
                    }
                    b"polyline" => {
                        if let Some(points) = attr(&e, b"points")? {
                            if let Some(line) = parse_points(&points)? {
                                polylines.push(line);
                            }
                        }
                    }
                    b"polygon" => {
                        if let Some(points) = attr(&e, b"points")? {
                            if let Some(mut line) = parse_points(&points)? {
                                if line.first() != line.last() {
                                    line.push(line[0]);
                                }
                                polylines.push(line);
                            }
                        }
                    }
                    b"line" => {
                        let x1 = number_attr(&e, b"x1")?.unwrap_or(0.0);
                        let y1 = number_attr(&e, b"y1")?.unwrap_or(0.0);
                        let x2 = number_attr(&e, b"x2")?.unwrap_or(0.0);
                        let y2 = number_attr(&e, b"y2")?.unwrap_or(0.0);
                        polylines.push(vec![Point::new(x1, y1), Point::new(x2, y2)]);
                    }
                    b"circle" => {
                        let cx = number_attr(&e, b"cx")?.unwrap_or(0.0);
                        let cy = number_attr(&e, b"cy")?.unwrap_or(0.0);
                        let r = number_attr(&e, b"r")?.unwrap_or(0.0);
                        if r > 0.0 {
                            polylines.push(circle(cx, cy, r));
                        }
                    }
                    b"rect" => {
                        let x = number_attr(&e, b"x")?.unwrap_or(0.0);
                        let y = number_attr(&e, b"y")?.unwrap_or(0.0);
                        let w = number_attr(&e, b"width")?.unwrap_or(0.0);
                        let h = number_attr(&e, b"height")?.unwrap_or(0.0);
                        if w > 0.0 && h > 0.0 {
                            polylines.push(vec![
                                Point::new(x, y),
                                Point::new(x + w, y),
                                Point::new(x + w, y + h),
                                Point::new(x, y + h),
                                Point::new(x, y),
                            ]);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(PlotError::parse(format!("svg: {e}"))),
        }
    }

    if !saw_svg {
        return Err(PlotError::parse("document has no <svg> root"));
    }

    Ok(SvgDocument {
        polylines,
        view_box: view_box.unwrap_or_default(),
    })
}

/// Prefer `viewBox`; fall back to `width`/`height` seeding a box at the
/// origin.
fn document_box(e: &BytesStart<'_>) -> Result<Option<ViewBox>> {
    if let Some(vb) = attr(e, b"viewBox")? {
        let parts: Vec<f64> = vb
            .split([' ', ','])
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| PlotError::parse(format!("bad viewBox {vb:?}")))?;
        if parts.len() != 4 {
            return Err(PlotError::parse(format!("bad viewBox {vb:?}")));
        }
        return Ok(Some(ViewBox {
            min_x: parts[0],
            min_y: parts[1],
            width: parts[2],
            height: parts[3],
        }));
    }
    let width = number_attr(e, b"width")?;
    let height = number_attr(e, b"height")?;
    match (width, height) {
        (Some(w), Some(h)) => Ok(Some(ViewBox {
            min_x: 0.0,
            min_y: 0.0,
            width: w,
            height: h,
        })),
        _ => Ok(None),
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a.map_err(|err| PlotError::parse(format!("svg attribute: {err}")))?;
        if a.key.as_ref() == key {
            let value = a
                .unescape_value()
                .map_err(|err| PlotError::parse(format!("svg attribute: {err}")))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Parse a numeric attribute, tolerating a trailing unit suffix such as
/// `mm` or `px`.
fn number_attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<f64>> {
    let Some(text) = attr(e, key)? else {
        return Ok(None);
    };
    let trimmed = text.trim();
    let digits: &str = trimmed
        .trim_end_matches(|c: char| c.is_ascii_alphabetic() || c == '%')
        .trim();
    digits
        .parse::<f64>()
        .map(Some)
        .map_err(|_| PlotError::parse(format!("bad numeric attribute {trimmed:?}")))
}

fn parse_points(points: &str) -> Result<Option<Polyline>> {
    let values: Vec<f64> = points
        .split([' ', ',', '\n', '\t'])
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| PlotError::parse(format!("bad points list {points:?}")))?;
    if values.len() < 4 {
        return Ok(None);
    }
    let line: Polyline = values
        .chunks_exact(2)
        .map(|pair| Point::new(pair[0], pair[1]))
        .collect();
    Ok(Some(line))
}

fn circle(cx: f64, cy: f64, r: f64) -> Polyline {
    let mut line = Polyline::with_capacity(CIRCLE_SEGMENTS + 1);
    for i in 0..=CIRCLE_SEGMENTS {
        let theta = 2.0 * std::f64::consts::PI * i as f64 / CIRCLE_SEGMENTS as f64;
        line.push(Point::new(cx + r * theta.cos(), cy + r * theta.sin()));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_element() {
        let doc =
            parse_document(r#"<svg><line x1="0" y1="0" x2="100" y2="0"/></svg>"#).unwrap();
        assert_eq!(doc.polylines.len(), 1);
        assert_eq!(doc.polylines[0], vec![Point::new(0.0, 0.0), Point::new(100.0, 0.0)]);
    }

    #[test]
    fn polygon_is_auto_closed() {
        let doc =
            parse_document(r#"<svg><polygon points="0,0 10,0 10,10"/></svg>"#).unwrap();
        let p = &doc.polylines[0];
        assert_eq!(p.len(), 4);
        assert_eq!(p.first(), p.last());
    }

    #[test]
    fn polyline_is_left_open() {
        let doc =
            parse_document(r#"<svg><polyline points="0,0 10,0 10,10"/></svg>"#).unwrap();
        assert_eq!(doc.polylines[0].len(), 3);
    }

    #[test]
    fn circle_polygonalizes_to_36_segments() {
        let doc = parse_document(r#"<svg><circle cx="5" cy="5" r="2"/></svg>"#).unwrap();
        let p = &doc.polylines[0];
        assert_eq!(p.len(), 37);
        assert_eq!(p.first(), p.last());
        for point in p {
            let d = ((point.x - 5.0).powi(2) + (point.y - 5.0).powi(2)).sqrt();
            assert!((d - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn rect_closes_back_to_origin_corner() {
        let doc =
            parse_document(r#"<svg><rect x="1" y="2" width="3" height="4"/></svg>"#).unwrap();
        let p = &doc.polylines[0];
        assert_eq!(p.len(), 5);
        assert_eq!(p[0], Point::new(1.0, 2.0));
        assert_eq!(p[2], Point::new(4.0, 6.0));
    }

    #[test]
    fn unsupported_elements_are_ignored() {
        let doc = parse_document(
            r#"<svg><text x="0" y="0">hi</text><ellipse cx="1" cy="1" rx="2" ry="3"/><line x1="0" y1="0" x2="1" y2="1"/></svg>"#,
        )
        .unwrap();
        assert_eq!(doc.polylines.len(), 1);
    }

    #[test]
    fn view_box_is_preferred_over_dimensions() {
        let doc = parse_document(
            r#"<svg width="10" height="10" viewBox="0 0 200 100"><line x1="0" y1="0" x2="1" y2="1"/></svg>"#,
        )
        .unwrap();
        assert_eq!(doc.view_box.width, 200.0);
        assert_eq!(doc.view_box.height, 100.0);
    }

    #[test]
    fn dimensions_seed_the_box_when_view_box_is_absent() {
        let doc = parse_document(r#"<svg width="50mm" height="30mm"></svg>"#).unwrap();
        assert_eq!(doc.view_box.width, 50.0);
        assert_eq!(doc.view_box.height, 30.0);
    }

    #[test]
    fn empty_document_yields_no_polylines() {
        let doc = parse_document(r#"<svg viewBox="0 0 10 10"></svg>"#).unwrap();
        assert!(doc.polylines.is_empty());
    }

    #[test]
    fn non_svg_input_is_an_error() {
        assert!(parse_document("<html></html>").is_err());
        assert!(parse_document("not xml at all").is_err());
    }

    #[test]
    fn nested_groups_are_walked() {
        let doc = parse_document(
            r#"<svg><g><g><path d="M0 0 L5 5"/></g><line x1="0" y1="0" x2="1" y2="0"/></g></svg>"#,
        )
        .unwrap();
        assert_eq!(doc.polylines.len(), 2);
    }
}
