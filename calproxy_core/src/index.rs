//! Extraction of calendar locators from the upstream's index document.
//!
//! The index is an XHTML page with the calendars listed in tables:
//!
//! ```html
//! <html><body>
//!   <section>
//!     <table class="nodeTable">
//!       <tr><td class="nameColumn"><a href="/calendars/work.ics">work</a></td></tr>
//!     </table>
//!   </section>
//! </body></html>
//! ```
//!
//! The page is read as XML, anything that is not well-formed fails the whole index.

use quick_xml::{
    escape::{unescape, EscapeError},
    events::{attributes::AttrError, BytesStart, Event},
    Reader,
};

static TABLE_CLASS: &str = "nodeTable";
static NAME_CLASS: &str = "nameColumn";

static ROOT: &str = "html";
/// Element path from the root to a link in a calendar listing.
static LINK_PATH: [&str; 7] = ["html", "body", "section", "table", "tr", "td", "a"];

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("malformed markup: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed attribute: {0}")]
    Attribute(#[from] AttrError),
    #[error("malformed attribute value: {0}")]
    Escape(#[from] EscapeError),
    #[error("invalid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("document has no root element")]
    Empty,
    #[error("expected root element <html>, found <{0}>")]
    UnexpectedRoot(String),
    #[error("element <{0}> is never closed")]
    Unclosed(String),
}

/// State of the table row currently being read.
#[derive(Debug, Default)]
struct Row {
    /// Set once the name cell was seen, later cells are ignored.
    done: bool,
    cell_class: Option<String>,
    href: Option<String>,
}

/// Get the locators listed in the index, in document order.
///
/// Only tables of class `nodeTable` are considered.
/// Every row contributes the link of its first `nameColumn` cell, rows without one are skipped.
pub fn locators(xml: &[u8]) -> Result<Vec<String>, IndexError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut seen_root = false;
    let mut listing = false;
    let mut row: Option<Row> = None;
    let mut locators = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let name = local_name(e)?;
                check_root(&mut seen_root, &path, &name)?;
                path.push(name);
                open(e, &path, &mut listing, &mut row)?;
            }
            Event::Empty(ref e) => {
                let name = local_name(e)?;
                check_root(&mut seen_root, &path, &name)?;
                path.push(name);
                open(e, &path, &mut listing, &mut row)?;
                close(&path, &mut listing, &mut row, &mut locators);
                path.pop();
            }
            Event::End(_) => {
                close(&path, &mut listing, &mut row, &mut locators);
                path.pop();
            }
            // Text is never used, it only has to be well-formed.
            Event::Text(ref e) => {
                unescape(std::str::from_utf8(e)?)?;
            }
            Event::GeneralRef(ref e) => {
                unescape(&format!("&{};", std::str::from_utf8(e)?))?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(name) = path.pop() {
        return Err(IndexError::Unclosed(name));
    }
    if !seen_root {
        return Err(IndexError::Empty);
    }
    Ok(locators)
}

fn local_name(e: &BytesStart<'_>) -> Result<String, IndexError> {
    let local_name = e.local_name();
    Ok(std::str::from_utf8(local_name.as_ref())?.to_owned())
}

fn check_root(seen_root: &mut bool, path: &[String], name: &str) -> Result<(), IndexError> {
    if path.is_empty() {
        if *seen_root || name != ROOT {
            return Err(IndexError::UnexpectedRoot(name.to_owned()));
        }
        *seen_root = true;
    }
    Ok(())
}

/// Whether `path` ends exactly at the element `depth` levels down the listing path.
fn at(path: &[String], depth: usize) -> bool {
    path.len() == depth && path.iter().zip(LINK_PATH).all(|(name, expected)| name == expected)
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, IndexError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == key {
            let raw = std::str::from_utf8(&attr.value)?;
            return Ok(Some(unescape(raw)?.into_owned()));
        }
    }
    Ok(None)
}

fn open(
    e: &BytesStart<'_>,
    path: &[String],
    listing: &mut bool,
    row: &mut Option<Row>,
) -> Result<(), IndexError> {
    if at(path, 4) {
        *listing = attribute(e, b"class")?.as_deref() == Some(TABLE_CLASS);
    } else if *listing && at(path, 5) {
        *row = Some(Row::default());
    } else if let Some(row) = row.as_mut().filter(|row| !row.done) {
        if at(path, 6) {
            row.cell_class = attribute(e, b"class")?;
            row.href = None;
        } else if at(path, 7) {
            row.href = attribute(e, b"href")?;
        }
    }
    Ok(())
}

fn close(path: &[String], listing: &mut bool, row: &mut Option<Row>, locators: &mut Vec<String>) {
    if at(path, 4) {
        *listing = false;
    } else if at(path, 5) {
        *row = None;
    } else if at(path, 6) {
        let Some(row) = row.as_mut().filter(|row| !row.done) else {
            return;
        };
        if row.cell_class.as_deref() == Some(NAME_CLASS) {
            row.done = true;
            if let Some(href) = row.href.take().filter(|href| !href.is_empty()) {
                locators.push(href);
            }
        }
    }
}
