use crate::error::{Result, VastError};
use crate::models::*;
use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::str::from_utf8;

/// The fields of one VAST document and the wrapped document's URI, if any
#[derive(Debug, Default, PartialEq)]
pub struct ParsedLevel {
    pub fields: AdFields,
    pub wrapper_uri: Option<String>,
}

/// Parse a VAST XML string into the fields of its first ad
pub fn parse_vast(xml: &str) -> Result<ParsedLevel> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut level = ParsedLevel::default();

    // Look for the VAST element
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"VAST" => {
                level.fields.version = attribute(e, b"version");
                parse_ads(&mut reader, &mut level)?;
                break;
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"VAST" => {
                return Err(VastError::MissingField("Ad".to_string()));
            }
            Ok(Event::Eof) => {
                return Err(VastError::MissingField("VAST".to_string()));
            }
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(level)
}

/// Parse Ad elements; only the first one contributes fields
fn parse_ads(reader: &mut Reader<&[u8]>, level: &mut ParsedLevel) -> Result<()> {
    let mut buf = Vec::new();
    let mut seen_ad = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Ad" && !seen_ad => {
                parse_ad_element(reader, level)?;
                seen_ad = true;
            }
            Ok(Event::Start(ref e)) => {
                if e.name().as_ref() == b"Ad" {
                    debug!("Ignoring additional Ad element");
                }
                skip_element(reader)?;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"VAST" => break,
            Ok(Event::Eof) => {
                return Err(VastError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    if !seen_ad {
        return Err(VastError::MissingField("Ad".to_string()));
    }
    Ok(())
}

/// Parse a single Ad element
fn parse_ad_element(reader: &mut Reader<&[u8]>, level: &mut ParsedLevel) -> Result<()> {
    let mut buf = Vec::new();

    // Parse InLine or Wrapper
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"InLine" => {
                    parse_ad_body(reader, level, b"InLine")?;
                }
                b"Wrapper" => {
                    parse_ad_body(reader, level, b"Wrapper")?;
                }
                _ => {
                    // Skip other elements
                    skip_element(reader)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Ad" => break,
            Ok(Event::Eof) => {
                return Err(VastError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Parse the body of an InLine or Wrapper element
///
/// Both share the `Impression` and `Creatives` structure; `VASTAdTagURI`
/// is only honoured inside a Wrapper.
fn parse_ad_body(reader: &mut Reader<&[u8]>, level: &mut ParsedLevel, tag: &[u8]) -> Result<()> {
    let is_wrapper = tag == b"Wrapper";
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Impression" => {
                    if let Some(url) = read_url_element(reader)? {
                        level.fields.impression_tracker_url = Some(url);
                    }
                }
                b"Creatives" => {
                    parse_creatives(reader, &mut level.fields)?;
                }
                b"VASTAdTagURI" if is_wrapper => {
                    level.wrapper_uri = read_url_element(reader)?;
                }
                _ => {
                    // Skip other elements
                    skip_element(reader)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == tag => break,
            Ok(Event::Eof) => {
                return Err(VastError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    if is_wrapper && level.wrapper_uri.is_none() {
        return Err(VastError::MissingField("VASTAdTagURI".to_string()));
    }
    Ok(())
}

/// Helper function to read the text content of an XML element
///
/// Text and CDATA at any depth below the element are concatenated.
fn read_text_element(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut text = String::new();
    let mut buf = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(e)) => {
                text.push_str(&e.unescape()?);
            }
            Ok(Event::CData(e)) => {
                if let Ok(value) = from_utf8(&e) {
                    text.push_str(value);
                }
            }
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Ok(Event::Eof) => {
                return Err(VastError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(text.trim().to_string())
}

/// Read an element holding a single URL; blank content yields `None`
fn read_url_element(reader: &mut Reader<&[u8]>) -> Result<Option<String>> {
    let text = read_text_element(reader)?;
    Ok((!text.is_empty()).then_some(text))
}

/// Skip the rest of the current element, keeping start/end tags balanced
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<()> {
    let mut buf = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Ok(Event::Eof) => {
                return Err(VastError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Read an attribute value by name
fn attribute(start: &BytesStart, name: &[u8]) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| from_utf8(&attr.value).ok().map(|v| v.trim().to_string()))
}

/// Parse Creatives element
fn parse_creatives(reader: &mut Reader<&[u8]>, fields: &mut AdFields) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Creative" => {
                parse_creative(reader, fields)?;
            }
            Ok(Event::Start(_)) => skip_element(reader)?,
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Creatives" => break,
            Ok(Event::Eof) => {
                return Err(VastError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Parse Creative element; only the Linear child is of interest
fn parse_creative(reader: &mut Reader<&[u8]>, fields: &mut AdFields) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Linear" => {
                if let Some(offset) = attribute(e, b"skipoffset") {
                    fields.skip_offset_percent = parse_skip_offset(&offset);
                }
                parse_linear(reader, fields)?;
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"Linear" => {
                if let Some(offset) = attribute(e, b"skipoffset") {
                    fields.skip_offset_percent = parse_skip_offset(&offset);
                }
            }
            Ok(Event::Start(_)) => {
                // CompanionAds, NonLinearAds and anything else
                skip_element(reader)?;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Creative" => break,
            Ok(Event::Eof) => {
                return Err(VastError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Parse the `skipoffset` attribute of a Linear element
///
/// Only the percentage form is supported. The absolute-time form
/// (`HH:MM:SS`) and anything unparseable map to `SKIP_OFFSET_UNSET`.
pub fn parse_skip_offset(value: &str) -> i32 {
    let value = value.trim();
    if value.contains(':') {
        warn!(
            "Unsupported skipoffset format {:?}: only percentages are supported",
            value
        );
        return SKIP_OFFSET_UNSET;
    }

    match value.strip_suffix('%').map(|n| n.trim().parse::<i32>()) {
        Some(Ok(percent)) if (0..=100).contains(&percent) => percent,
        _ => {
            warn!("Invalid skipoffset {:?}", value);
            SKIP_OFFSET_UNSET
        }
    }
}

/// Parse Linear element
fn parse_linear(reader: &mut Reader<&[u8]>, fields: &mut AdFields) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Duration" => {
                    if let Some(duration) = read_url_element(reader)? {
                        fields.duration_text = Some(duration);
                    }
                }
                b"MediaFiles" => {
                    parse_media_files(reader, fields)?;
                }
                b"VideoClicks" => {
                    parse_video_clicks(reader, fields)?;
                }
                b"TrackingEvents" => {
                    parse_tracking_events(reader, fields)?;
                }
                _ => {
                    // Skip other elements
                    skip_element(reader)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Linear" => break,
            Ok(Event::Eof) => {
                return Err(VastError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Parse MediaFiles element; the last MediaFile wins
fn parse_media_files(reader: &mut Reader<&[u8]>, fields: &mut AdFields) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"MediaFile" => {
                if let Some(url) = read_url_element(reader)? {
                    fields.media_file_url = Some(url);
                }
            }
            Ok(Event::Start(_)) => skip_element(reader)?,
            Ok(Event::End(ref e)) if e.name().as_ref() == b"MediaFiles" => break,
            Ok(Event::Eof) => {
                return Err(VastError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Parse VideoClicks element
fn parse_video_clicks(reader: &mut Reader<&[u8]>, fields: &mut AdFields) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"ClickThrough" => {
                    if let Some(url) = read_url_element(reader)? {
                        fields.click_through_url = Some(url);
                    }
                }
                b"ClickTracking" => {
                    if let Some(url) = read_url_element(reader)? {
                        fields.click_tracking_url = Some(url);
                    }
                }
                _ => {
                    // CustomClick and anything else
                    skip_element(reader)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"VideoClicks" => break,
            Ok(Event::Eof) => {
                return Err(VastError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Parse TrackingEvents element
fn parse_tracking_events(reader: &mut Reader<&[u8]>, fields: &mut AdFields) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Tracking" => {
                let event_type = attribute(e, b"event")
                    .map(|event| EventType::from_attribute(&event))
                    .unwrap_or(EventType::Unknown);
                if let Some(url) = read_url_element(reader)? {
                    fields.trackings.push(Tracking::new(event_type, url));
                }
            }
            Ok(Event::Start(_)) => skip_element(reader)?,
            Ok(Event::End(ref e)) if e.name().as_ref() == b"TrackingEvents" => break,
            Ok(Event::Eof) => {
                return Err(VastError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}
