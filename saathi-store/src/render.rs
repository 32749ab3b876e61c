use anyhow::Result;
use chrono::{DateTime, Utc};
use qrcode::{render::svg, Color, QrCode};
use std::fmt::Write;

/// Tags on one printed A4 page.
pub const TAGS_PER_PAGE: usize = 6;

const PAGE_WIDTH: u32 = 595;
const PAGE_HEIGHT: u32 = 842;
const COLUMNS: u32 = 2;
const ROWS: u32 = 3;
const HEADER: u32 = 60;
const QR_SIZE: u32 = 170;
const QUIET_ZONE: usize = 4;

/// A tag to print: its id and the URL its QR code encodes.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetEntry {
    pub qr_id: i64,
    pub url: String,
}

/// Render one QR code as a standalone SVG image
pub fn render_qr_svg(data: &str, min_size: u32) -> Result<String> {
    let code = QrCode::new(data.as_bytes())?;
    let image = code
        .render()
        .min_dimensions(min_size, min_size)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    Ok(image)
}

/// Render a printable sheet of tags.
///
/// The document is a single SVG made of A4 pages (595x842 points) stacked
/// vertically, each holding up to six tags in two columns of three rows.
pub fn render_qr_sheet(entries: &[SheetEntry], generated_on: DateTime<Utc>) -> Result<String> {
    let pages = entries.chunks(TAGS_PER_PAGE).count().max(1) as u32;
    let total_height = PAGE_HEIGHT * pages;
    let date = generated_on.format("%Y-%m-%d");

    let mut out = String::new();
    write!(
        out,
        r#"<?xml version="1.0" encoding="UTF-8"?><svg xmlns="http://www.w3.org/2000/svg" version="1.1" width="{PAGE_WIDTH}" height="{total_height}" viewBox="0 0 {PAGE_WIDTH} {total_height}">"#
    )?;

    let cell_width = PAGE_WIDTH / COLUMNS;
    let cell_height = (PAGE_HEIGHT - HEADER) / ROWS;

    for page in 0..pages {
        let top = page * PAGE_HEIGHT;
        write!(
            out,
            r##"<g transform="translate(0 {top})"><rect width="{PAGE_WIDTH}" height="{PAGE_HEIGHT}" fill="#ffffff"/>"##
        )?;
        write!(
            out,
            r#"<text x="{}" y="36" font-family="Helvetica, Arial, sans-serif" font-size="18" text-anchor="middle">Saathi QR tags, page {} of {pages} ({date})</text>"#,
            PAGE_WIDTH / 2,
            page + 1
        )?;

        let start = page as usize * TAGS_PER_PAGE;
        let on_page = entries.iter().skip(start).take(TAGS_PER_PAGE);
        for (slot, entry) in on_page.enumerate() {
            let slot = slot as u32;
            let x = (slot % COLUMNS) * cell_width;
            let y = HEADER + (slot / COLUMNS) * cell_height;
            write_tag(&mut out, entry, x, y, cell_width, cell_height)?;
        }
        out.push_str("</g>");
    }

    out.push_str("</svg>");
    Ok(out)
}

fn write_tag(
    out: &mut String,
    entry: &SheetEntry,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> Result<()> {
    let code = QrCode::new(entry.url.as_bytes())?;
    let modules = code.width();
    let colors = code.to_colors();
    let span = modules + 2 * QUIET_ZONE;
    let module = QR_SIZE as f64 / span as f64;

    let left = x as f64 + (width - QR_SIZE) as f64 / 2.0;
    let top = y as f64 + 12.0;

    write!(
        out,
        r##"<rect x="{}" y="{}" width="{}" height="{}" fill="none" stroke="#999999" stroke-dasharray="4 3"/>"##,
        x + 8,
        y + 4,
        width - 16,
        height - 8
    )?;

    let mut path = String::new();
    for (i, color) in colors.iter().enumerate() {
        if *color != Color::Dark {
            continue;
        }
        let col = (i % modules + QUIET_ZONE) as f64;
        let row = (i / modules + QUIET_ZONE) as f64;
        write!(
            path,
            "M{:.2} {:.2}h{m:.2}v{m:.2}h-{m:.2}z",
            left + col * module,
            top + row * module,
            m = module
        )?;
    }
    write!(out, r##"<path d="{path}" fill="#000000"/>"##)?;

    let center = x + width / 2;
    let label_y = top as u32 + QR_SIZE + 22;
    write!(
        out,
        r#"<text x="{center}" y="{label_y}" font-family="Helvetica, Arial, sans-serif" font-size="14" font-weight="bold" text-anchor="middle">QR #{}</text>"#,
        entry.qr_id
    )?;
    write!(
        out,
        r#"<text x="{center}" y="{}" font-family="Helvetica, Arial, sans-serif" font-size="8" text-anchor="middle">{}</text>"#,
        label_y + 14,
        escape_xml(&entry.url)
    )?;
    Ok(())
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use k9::assert_equal;

    fn entries(count: i64) -> Vec<SheetEntry> {
        (1..=count)
            .map(|id| SheetEntry {
                qr_id: id,
                url: format!("https://app.jyada.in/member-details/{id}"),
            })
            .collect()
    }

    #[test]
    fn generate_qr_svg() {
        let svg = render_qr_svg("https://app.jyada.in/member-details/1", 200).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("</svg>"));
    }

    #[test]
    fn sheet_has_one_page_per_six_tags() {
        let svg = render_qr_sheet(&entries(7), Utc::now()).unwrap();
        assert!(svg.starts_with("<?xml"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains(r#"height="1684""#));
        assert_equal!(svg.matches("<g transform=").count(), 2);
        assert_equal!(svg.matches("<path d=").count(), 7);
        assert!(svg.contains("QR #7"));
        assert!(svg.contains("page 2 of 2"));
    }

    #[test]
    fn empty_sheet_still_has_a_page() {
        let svg = render_qr_sheet(&[], Utc::now()).unwrap();
        assert_equal!(svg.matches("<g transform=").count(), 1);
    }

    #[test]
    fn labels_are_escaped() {
        let sheet = vec![SheetEntry {
            qr_id: 1,
            url: "https://example.test/?a=1&b=<2>".to_string(),
        }];
        let svg = render_qr_sheet(&sheet, Utc::now()).unwrap();
        assert!(svg.contains("a=1&amp;b=&lt;2&gt;"));
    }
}
