//! Rendering an [`AssembledBody`] to a target format

use serde_json::json;

use super::{AssembledBody, Block, OutputFormat};

pub fn render(body: &AssembledBody, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => render_text(body),
        OutputFormat::Markdown => render_markdown(body),
        OutputFormat::Json => render_json(body),
        OutputFormat::Html => render_html(body),
    }
}

fn confidence_note(block: &Block) -> Option<String> {
    block
        .confidence
        .map(|c| format!("confidence {:.0}%", c * 100.0))
}

fn render_text(body: &AssembledBody) -> String {
    let mut out = format!("{}\n{}\n", body.title, "=".repeat(body.title.chars().count()));

    for section in &body.sections {
        if let Some(heading) = &section.heading {
            let underline = if section.level <= 1 { '=' } else { '-' };
            out.push_str(&format!(
                "\n{}\n{}\n",
                heading,
                underline.to_string().repeat(heading.chars().count())
            ));
        }
        for block in &section.blocks {
            out.push('\n');
            match (&block.label, confidence_note(block)) {
                (Some(label), Some(note)) => out.push_str(&format!("{} [{}]:\n", label, note)),
                (Some(label), None) => out.push_str(&format!("{}:\n", label)),
                (None, Some(note)) => out.push_str(&format!("[{}]\n", note)),
                (None, None) => {}
            }
            out.push_str(&block.text);
            out.push('\n');
        }
    }

    out
}

fn render_markdown(body: &AssembledBody) -> String {
    let mut out = format!("# {}\n", body.title);

    for section in &body.sections {
        if let Some(heading) = &section.heading {
            let hashes = "#".repeat(usize::from(section.level.clamp(1, 4)) + 1);
            out.push_str(&format!("\n{} {}\n", hashes, heading));
        }
        for block in &section.blocks {
            out.push('\n');
            if let Some(label) = &block.label {
                out.push_str(&format!("**{}**", label));
                if let Some(note) = confidence_note(block) {
                    out.push_str(&format!(" _({})_", note));
                }
                out.push_str("\n\n");
            } else if let Some(note) = confidence_note(block) {
                out.push_str(&format!("_({})_\n\n", note));
            }
            out.push_str(&block.text);
            out.push('\n');
        }
    }

    out
}

fn render_json(body: &AssembledBody) -> String {
    let sections: Vec<serde_json::Value> = body
        .sections
        .iter()
        .map(|section| {
            json!({
                "heading": section.heading,
                "level": section.level,
                "items": section.blocks.iter().map(|b| json!({
                    "label": b.label,
                    "content": b.text,
                    "confidence": b.confidence,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    let value = json!({
        "title": body.title,
        "sections": sections,
    });
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}

/// Escape text for HTML element content and attribute values
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_html(body: &AssembledBody) -> String {
    let mut out = format!("<article>\n<h1>{}</h1>\n", escape_html(&body.title));

    for section in &body.sections {
        out.push_str("<section>\n");
        if let Some(heading) = &section.heading {
            let level = usize::from(section.level.clamp(1, 4)) + 1;
            out.push_str(&format!("<h{0}>{1}</h{0}>\n", level, escape_html(heading)));
        }
        for block in &section.blocks {
            match block.confidence {
                Some(c) => out.push_str(&format!(
                    "<div class=\"block\" data-confidence=\"{:.2}\">\n",
                    c
                )),
                None => out.push_str("<div class=\"block\">\n"),
            }
            if let Some(label) = &block.label {
                out.push_str(&format!("<strong>{}</strong>\n", escape_html(label)));
            }
            for paragraph in block.text.split("\n\n").filter(|p| !p.trim().is_empty()) {
                out.push_str(&format!(
                    "<p>{}</p>\n",
                    escape_html(paragraph.trim()).replace('\n', "<br>")
                ));
            }
            out.push_str("</div>\n");
        }
        out.push_str("</section>\n");
    }

    out.push_str("</article>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Section;

    fn body() -> AssembledBody {
        AssembledBody {
            title: "Kitchen <estimate>".to_string(),
            sections: vec![Section {
                heading: Some("Construction".to_string()),
                level: 1,
                blocks: vec![
                    Block {
                        label: Some("Price materials".to_string()),
                        text: "Tiles & grout: 1200 EUR".to_string(),
                        confidence: Some(0.9),
                    },
                    Block {
                        label: None,
                        text: "line one\nline two".to_string(),
                        confidence: None,
                    },
                ],
            }],
        }
    }

    #[test]
    fn test_markdown() {
        let out = render(&body(), OutputFormat::Markdown);
        assert!(out.starts_with("# Kitchen <estimate>\n"));
        assert!(out.contains("\n## Construction\n"));
        assert!(
            out.contains("**Price materials** _(confidence 90%)_\n\nTiles & grout: 1200 EUR\n")
        );
    }

    #[test]
    fn test_text() {
        let out = render(&body(), OutputFormat::Text);
        assert!(out.starts_with("Kitchen <estimate>\n==================\n"));
        assert!(out.contains("Price materials [confidence 90%]:\nTiles & grout: 1200 EUR\n"));
    }

    #[test]
    fn test_json_is_parseable() {
        let out = render(&body(), OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["title"], "Kitchen <estimate>");
        assert_eq!(value["sections"][0]["items"][0]["content"], "Tiles & grout: 1200 EUR");
        assert_eq!(value["sections"][0]["items"][1]["label"], serde_json::Value::Null);
    }

    #[test]
    fn test_html_escapes_content() {
        let out = render(&body(), OutputFormat::Html);
        assert!(out.contains("<h1>Kitchen &lt;estimate&gt;</h1>"));
        assert!(out.contains("<p>Tiles &amp; grout: 1200 EUR</p>"));
        assert!(out.contains("<p>line one<br>line two</p>"));
        assert!(out.contains("data-confidence=\"0.90\""));
        assert!(!out.contains("<estimate>"));
    }

    #[test]
    fn test_escape_html_quotes() {
        assert_eq!(escape_html(r#"a "b" 'c'"#), "a &quot;b&quot; &#39;c&#39;");
    }
}
