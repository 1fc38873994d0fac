// src/comicinfo.rs

use anyhow::{Context, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;
use tracing::warn;

/// Entry name the metadata lives under at the archive root.
pub const METADATA_NAME: &str = "ComicInfo.xml";

/// The descriptive fields the scan report surfaces. Everything else in
/// the document is passed through untouched; matching only ever looks at
/// `title`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComicFields {
    pub title: String,
    pub series: String,
    pub number: String,
}

fn element_text(doc: &roxmltree::Document, tag: &str) -> String {
    doc.root_element()
        .children()
        .find(|n| n.has_tag_name(tag))
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

/// Reads the `<Title>` of a ComicInfo document. Returns `None` on
/// malformed XML or a blank title; the caller records the file as
/// skipped rather than aborting the batch.
pub fn read_title(xml: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(xml).ok()?;
    let doc = match roxmltree::Document::parse(text) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("malformed ComicInfo.xml: {}", e);
            return None;
        }
    };
    let title = element_text(&doc, "Title");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Reads the fields surfaced by the scan report. Malformed XML yields
/// the empty field set, mirroring how a missing entry is rendered.
pub fn read_fields(xml: &[u8]) -> ComicFields {
    let Some(text) = std::str::from_utf8(xml).ok() else {
        return ComicFields::default();
    };
    let Ok(doc) = roxmltree::Document::parse(text) else {
        return ComicFields::default();
    };
    ComicFields {
        title: element_text(&doc, "Title"),
        series: element_text(&doc, "Series"),
        number: element_text(&doc, "Number"),
    }
}

/// Current `<Number>` text, used to skip rewrites that would be no-ops.
pub fn read_number(xml: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(xml).ok()?;
    let doc = roxmltree::Document::parse(text).ok()?;
    Some(element_text(&doc, "Number"))
}

/// Rewrites the document with `<Number>` set to `number`, creating the
/// element just before `</ComicInfo>` when absent. All other events are
/// streamed through unchanged.
pub fn set_number(xml: &[u8], number: &str) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut in_number = false;
    let mut wrote_text = false;
    let mut seen_number = false;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .context("reading ComicInfo.xml")?;
        match event {
            Event::Start(e) if e.name().as_ref() == b"Number" => {
                seen_number = true;
                in_number = true;
                wrote_text = false;
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) if e.name().as_ref() == b"Number" => {
                seen_number = true;
                writer.write_event(Event::Start(BytesStart::new("Number")))?;
                writer.write_event(Event::Text(BytesText::new(number)))?;
                writer.write_event(Event::End(BytesEnd::new("Number")))?;
            }
            Event::Text(_) if in_number => {
                if !wrote_text {
                    writer.write_event(Event::Text(BytesText::new(number)))?;
                    wrote_text = true;
                }
            }
            Event::End(e) if in_number && e.name().as_ref() == b"Number" => {
                if !wrote_text {
                    writer.write_event(Event::Text(BytesText::new(number)))?;
                    wrote_text = true;
                }
                in_number = false;
                writer.write_event(Event::End(e))?;
            }
            Event::End(e) if !seen_number && e.name().as_ref() == b"ComicInfo" => {
                seen_number = true;
                writer.write_event(Event::Start(BytesStart::new("Number")))?;
                writer.write_event(Event::Text(BytesText::new(number)))?;
                writer.write_event(Event::End(BytesEnd::new("Number")))?;
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
        buf.clear();
    }
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ComicInfo>
  <Title>天漫浮世錄 第093.2話</Title>
  <Series>天漫浮世錄</Series>
  <Number>93</Number>
  <Writer>某人</Writer>
</ComicInfo>"#;

    #[test]
    fn test_read_title() {
        assert_eq!(
            read_title(SAMPLE.as_bytes()).as_deref(),
            Some("天漫浮世錄 第093.2話")
        );
    }

    #[test]
    fn test_read_title_malformed() {
        assert!(read_title(b"<ComicInfo><Title>x").is_none());
        assert!(read_title(b"not xml at all").is_none());
    }

    #[test]
    fn test_read_title_blank_is_none() {
        let xml = b"<ComicInfo><Title>  </Title></ComicInfo>";
        assert!(read_title(xml).is_none());
    }

    #[test]
    fn test_read_fields() {
        let f = read_fields(SAMPLE.as_bytes());
        assert_eq!(f.series, "天漫浮世錄");
        assert_eq!(f.number, "93");
    }

    #[test]
    fn test_set_number_replaces_existing() {
        let out = set_number(SAMPLE.as_bytes(), "093").unwrap();
        assert_eq!(read_number(&out).as_deref(), Some("093"));
        // Untouched siblings survive the rewrite.
        let f = read_fields(&out);
        assert_eq!(f.title, "天漫浮世錄 第093.2話");
        assert_eq!(f.series, "天漫浮世錄");
    }

    #[test]
    fn test_set_number_creates_missing_element() {
        let xml = b"<ComicInfo><Title>t</Title></ComicInfo>";
        let out = set_number(xml, "012").unwrap();
        assert_eq!(read_number(&out).as_deref(), Some("012"));
        assert_eq!(read_title(&out).as_deref(), Some("t"));
    }

    #[test]
    fn test_set_number_handles_empty_element() {
        let xml = b"<ComicInfo><Number/></ComicInfo>";
        let out = set_number(xml, "7").unwrap();
        assert_eq!(read_number(&out).as_deref(), Some("7"));
    }

    #[test]
    fn test_set_number_is_stable() {
        let once = set_number(SAMPLE.as_bytes(), "093").unwrap();
        let twice = set_number(&once, "093").unwrap();
        assert_eq!(once, twice);
    }
}
