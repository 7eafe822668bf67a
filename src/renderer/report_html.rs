//! Service Treatment Slip HTML
//!
//! Builds a self-contained HTML document from a report payload as returned by the catalog
//! (the STS report object plus `client_address`, `branch_name` and `uploaded_files`).
//! Missing or mistyped fields render as `N/A` or empty sections; nothing here fails.
//! Every value taken from the payload is HTML-escaped.
//!
//! Photos and signatures can be inlined as `data:` URIs (see [`build_embedded`]) so the
//! printed document does not depend on the engine reaching the image hosts.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write;

/// Image URL to the `data:` URI that replaces it
pub type EmbeddedImages = HashMap<String, String>;

const STYLE: &str = r#"
@page { size: A4 portrait; margin: 0.8cm; }
* { box-sizing: border-box; }
body { font-family: "Poppins", "Segoe UI", Arial, sans-serif; font-size: 8.5pt; color: #333; margin: 0; }
table { border-collapse: collapse; width: 100%; }
td { vertical-align: top; padding: 0; }
.title { font-size: 14pt; font-weight: bold; text-align: center; padding-bottom: 4px; border-bottom: 2px solid #000; margin-bottom: 10px; }
.info-grid { table-layout: fixed; }
.info-grid td { padding-bottom: 8px; }
.info-label { font-weight: bold; }
.section-title { font-weight: bold; text-decoration: underline; margin-top: 10px; margin-bottom: 5px; font-size: 10pt; }
.italic-note { font-style: italic; font-size: 8pt; margin: 10px 0; }
.checkbox-grid { display: grid; grid-template-columns: repeat(4, 1fr); gap: 4px 15px; }
.checkbox-item { display: flex; align-items: center; }
.box { display: inline-block; width: 12px; height: 12px; border: 1px solid #6b7280; border-radius: 3px; margin-right: 5px; font-size: 9px; line-height: 11px; text-align: center; }
.box.checked { background: #2563eb; border-color: #2563eb; color: #fff; }
.chemicals-table th, .chemicals-table td { border: 1px solid #000; padding: 4px; text-align: center; font-size: 8pt; }
.notes { margin-top: 8px; }
.notes-label { font-weight: bold; }
.keep-together { page-break-inside: avoid; }
.image-grid { display: grid; grid-template-columns: repeat(4, 1fr); gap: 10px; }
.image-cell { text-align: center; }
.image-cell img { max-width: 100%; height: 150px; object-fit: contain; border: 1px solid #ccc; margin-bottom: 3px; }
.image-cell p { font-size: 8pt; margin-top: 0; }
.footer-text { font-size: 8pt; margin-top: 15px; }
.signatures { margin-top: 20px; table-layout: fixed; }
.signatures td { width: 50%; vertical-align: bottom; text-align: center; font-size: 9pt; }
.signatures img { width: 120px; height: 60px; object-fit: contain; margin: 10px auto; display: block; }
.signatures hr { width: 150px; margin: 0 auto; border: 0; border-top: 1px solid #333; }
"#;

/// Build the report document, linking images by their remote URL
pub fn build(report: &Value) -> String {
    build_embedded(report, &EmbeddedImages::new())
}

/// Build the report document, inlining every image found in `embedded`
///
/// Images missing from `embedded` keep their remote URL.
pub fn build_embedded(report: &Value, embedded: &EmbeddedImages) -> String {
    let mut html = String::with_capacity(8 * 1024);

    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n");
    let _ = writeln!(
        html,
        "<title>STS Report {}</title>",
        escape(&text(report, "schedule_id"))
    );
    let _ = writeln!(html, "<style>{}</style>\n</head>\n<body>", STYLE);

    html.push_str("<div class=\"title\">SERVICE TREATMENT SLIP (BERITA ACARA SERVICE)</div>\n");

    // Info grid
    html.push_str("<table class=\"info-grid\">\n<tr>\n");
    info_cell(&mut html, "Branch", &or_na(text(report, "branch_name")));
    info_cell(
        &mut html,
        "Time IN",
        &format_datetime(report.get("checkin_time"), "%d %b %Y, %I:%M %p"),
    );
    info_cell(
        &mut html,
        "Time OUT",
        &format_datetime(report.get("checkout_time"), "%d %b %Y, %I:%M %p"),
    );
    html.push_str("</tr>\n<tr>\n");
    info_cell(&mut html, "Report No", &report_number(report));
    info_cell(
        &mut html,
        "Date",
        &format_datetime(report.get("date_work"), "%d %b %Y"),
    );
    info_cell(
        &mut html,
        "Paket Program",
        &or_na(text(report, "product_service_name")),
    );
    html.push_str("</tr>\n<tr>\n<td colspan=\"3\" style=\"padding-top: 5px;\">");
    let _ = write!(
        html,
        "<div class=\"info-label\">Client Information :</div><div>{}</div><div>{}</div>",
        escape(&or_na(text(report, "client_name"))),
        escape(&or_na(text(report, "client_address"))),
    );
    html.push_str("</td>\n</tr>\n</table>\n");

    html.push_str(
        "<div class=\"italic-note\"><b>This is to advise you that our technician will carry out \
         our service duties at your premises as follows :</b></div>\n",
    );

    section_title(&mut html, "Type of Service");
    checkbox_grid(&mut html, list(report, "report_detail_treatments"));
    note_inline(&mut html, "Others (Please Specify):", &text(report, "note_type_service"));

    section_title(&mut html, "Type of Work");
    checkbox_grid(&mut html, list(report, "report_detail_type_works"));
    note_inline(&mut html, "Others:", &text(report, "note_type_work"));

    section_title(&mut html, "Pesticide Detail");
    chemicals_table(&mut html, list(report, "report_detail_chemicals"));

    note_block(&mut html, "Action Taken:", &text(report, "note_action_taken"));
    note_block(&mut html, "Remarks:", &text(report, "note_remark"));

    html.push_str("<div class=\"keep-together\">\n");
    section_title(&mut html, "File Uploaded:");
    uploaded_images(&mut html, list(report, "uploaded_files"), embedded);

    html.push_str(
        "<div class=\"footer-text\">With this, it is our pleasure to inform you that all service \
         requested has been completed well and delivered accordingly. I/We agree that all work \
         has been performed to a satisfactory standard.</div>\n",
    );

    html.push_str("<table class=\"signatures\">\n<tr>\n");
    signature_cell(
        &mut html,
        "Signature Client",
        &text(report, "url_signature_client"),
        &text(report, "signature_client_name"),
        embedded,
    );
    signature_cell(
        &mut html,
        "Technician",
        &text(report, "url_signature_employee"),
        &text(report, "employee_name"),
        embedded,
    );
    html.push_str("</tr>\n</table>\n</div>\n</body>\n</html>\n");

    html
}

/// Escape text for use in HTML content and double-quoted attributes
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Field as display text; numbers are printed, everything else is empty
fn text(v: &Value, key: &str) -> String {
    match v.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn or_na(s: String) -> String {
    if s.is_empty() { "N/A".to_string() } else { s }
}

/// Field as a list; anything that is not a list counts as empty
fn list<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn report_number(report: &Value) -> String {
    let seq = report.get("sequence_number").and_then(Value::as_i64);
    let total = report
        .get("visit_total_base_period_contract")
        .and_then(Value::as_i64);
    match (seq, total) {
        (Some(seq), Some(total)) => format!("{} / {}", seq, total),
        _ => "N/A".to_string(),
    }
}

/// Format an ISO timestamp or plain date; unparseable input is shown as-is
fn format_datetime(v: Option<&Value>, format: &str) -> String {
    let Some(raw) = v.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty()) else {
        return "N/A".to_string();
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format(format).to_string();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return dt.format(format).to_string();
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        // Time fields only make sense with a time; fall back to the date part of the format
        let date_only = format.split(',').next().unwrap_or(format);
        return d.format(date_only).to_string();
    }
    raw.to_string()
}

fn info_cell(html: &mut String, label: &str, value: &str) {
    let _ = writeln!(
        html,
        "<td><div class=\"info-label\">{} :</div><div>{}</div></td>",
        escape(label),
        escape(value)
    );
}

fn section_title(html: &mut String, title: &str) {
    let _ = writeln!(html, "<div class=\"section-title\">{}</div>", escape(title));
}

fn checkbox_grid(html: &mut String, items: &[Value]) {
    if items.is_empty() {
        html.push_str("<p>N/A</p>\n");
        return;
    }
    html.push_str("<div class=\"checkbox-grid\">\n");
    for item in items {
        let label = or_na(match text(item, "name") {
            s if s.is_empty() => text(item, "type_work_name"),
            s => s,
        });
        let checked = item.get("selected").and_then(Value::as_i64) == Some(1)
            || item.get("selected").and_then(Value::as_bool) == Some(true);
        let _ = writeln!(
            html,
            "<div class=\"checkbox-item\"><span class=\"box{}\">{}</span><label>{}</label></div>",
            if checked { " checked" } else { "" },
            if checked { "&#10003;" } else { "" },
            escape(&label)
        );
    }
    html.push_str("</div>\n");
}

fn chemicals_table(html: &mut String, items: &[Value]) {
    html.push_str(
        "<table class=\"chemicals-table\">\n<thead><tr><th>Active Ingredient</th><th>Dosis/Kons</th>\
         <th>Batch Number</th><th>Method of Application</th><th>Total Usage</th></tr></thead>\n<tbody>\n",
    );
    if items.is_empty() {
        html.push_str(
            "<tr><td colspan=\"5\" style=\"text-align:center;\">No chemical data available.</td></tr>\n",
        );
    }
    for item in items {
        let usage = format!("{} {}", text(item, "total_usage"), text(item, "uom_name"));
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&text(item, "active_ingredient")),
            escape(&text(item, "dosis")),
            escape(&text(item, "no_batch")),
            escape(&text(item, "method_application_name")),
            escape(usage.trim()),
        );
    }
    html.push_str("</tbody>\n</table>\n");
}

fn note_inline(html: &mut String, label: &str, value: &str) {
    let _ = writeln!(
        html,
        "<div class=\"notes\"><span class=\"notes-label\">{}</span> <span>{}</span></div>",
        escape(label),
        non_empty_or_nbsp(value)
    );
}

fn note_block(html: &mut String, label: &str, value: &str) {
    let _ = writeln!(
        html,
        "<div class=\"notes\"><div class=\"notes-label\">{}</div><div>{}</div></div>",
        escape(label),
        non_empty_or_nbsp(value)
    );
}

fn non_empty_or_nbsp(value: &str) -> String {
    if value.is_empty() {
        "&nbsp;".to_string()
    } else {
        escape(value)
    }
}

/// Remote images the document shows: uploaded photos, then both signatures
pub fn image_urls(report: &Value) -> Vec<String> {
    let mut urls: Vec<String> = list(report, "uploaded_files")
        .iter()
        .map(|item| text(item, "filename"))
        .chain([
            text(report, "url_signature_client"),
            text(report, "url_signature_employee"),
        ])
        .filter(|url| is_http_url(url))
        .collect();
    let mut seen = std::collections::HashSet::new();
    urls.retain(|url| seen.insert(url.clone()));
    urls
}

/// `data:` URI for raw image bytes; the type is sniffed from the leading bytes
pub fn data_uri(bytes: &[u8]) -> String {
    let mime = match bytes {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/png",
    };
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

fn image_src(url: &str, embedded: &EmbeddedImages) -> String {
    escape(embedded.get(url).map_or(url, String::as_str))
}

fn uploaded_images(html: &mut String, items: &[Value], embedded: &EmbeddedImages) {
    let images: Vec<(String, String)> = items
        .iter()
        .map(|item| (text(item, "filename"), text(item, "notes")))
        .filter(|(url, _)| is_http_url(url))
        .collect();

    if images.is_empty() {
        html.push_str("<p>No files uploaded.</p>\n");
        return;
    }
    html.push_str("<div class=\"image-grid\">\n");
    for (url, note) in images {
        let _ = writeln!(
            html,
            "<div class=\"image-cell\"><img src=\"{}\" /><p>{}</p></div>",
            image_src(&url, embedded),
            escape(&note)
        );
    }
    html.push_str("</div>\n");
}

fn signature_cell(
    html: &mut String,
    title: &str,
    image_url: &str,
    name: &str,
    embedded: &EmbeddedImages,
) {
    let _ = write!(html, "<td><b>{}</b><br/>", escape(title));
    if is_http_url(image_url) {
        let _ = write!(html, "<img src=\"{}\" />", image_src(image_url, embedded));
    } else {
        html.push_str("<div style=\"height: 80px;\"></div>");
    }
    let _ = writeln!(html, "<hr/><span>{}</span></td>", escape(name));
}

/// Only remote images are embedded; anything else could point into the local filesystem
fn is_http_url(s: &str) -> bool {
    url::Url::parse(s).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}
