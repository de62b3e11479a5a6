//! Calendar entries as they travel from a fetched calendar to the aggregate.

use std::io::{BufReader, Cursor};

use ical::{
    parser::ical::component::{IcalCalendar, IcalEvent, IcalTimeZone},
    property::Property,
    IcalParser, LineReader,
};

use crate::error::Result;

/// Calendar components the typed parser accepts.
static KNOWN_KINDS: [&str; 6] = ["VEVENT", "VTODO", "VJOURNAL", "VFREEBUSY", "VTIMEZONE", "VALARM"];

/// One component of a parsed calendar.
#[derive(Debug)]
pub enum Entry {
    Event(IcalEvent),
    Timezone(IcalTimeZone),
    /// A component which is not merged, named by its kind, e.g. `VTODO`.
    Other(String),
}

impl Entry {
    /// The component name.
    pub fn kind(&self) -> &str {
        match self {
            Entry::Event(_) => "VEVENT",
            Entry::Timezone(_) => "VTIMEZONE",
            Entry::Other(kind) => kind,
        }
    }

    /// The `UID` of an event or the `TZID` of a timezone.
    pub fn id(&self) -> Option<&str> {
        match self {
            Entry::Event(event) => property_value(&event.properties, "UID"),
            Entry::Timezone(timezone) => property_value(&timezone.properties, "TZID"),
            Entry::Other(_) => None,
        }
    }
}

pub(crate) fn property_value<'a>(properties: &'a [Property], name: &str) -> Option<&'a str> {
    properties
        .iter()
        .find(|property| property.name == name)
        .and_then(|property| property.value.as_deref())
}

/// Parse a fetched calendar into its entries.
///
/// A resource may hold several `VCALENDAR`s, their entries are concatenated.
/// Components of a kind the parser does not know become [`Entry::Other`].
/// Any syntax error fails the whole resource.
pub fn parse(raw: &[u8]) -> Result<Vec<Entry>> {
    let (known, others) = split_unknown(raw);
    let parser = IcalParser::new(BufReader::new(Cursor::new(known)));
    let mut entries = vec![];
    for calendar in parser {
        push_entries(&mut entries, calendar?);
    }
    entries.extend(others.into_iter().map(Entry::Other));
    Ok(entries)
}

enum Delimiter<'a> {
    Begin(&'a str),
    End,
}

fn delimiter(line: &str) -> Option<Delimiter<'_>> {
    let (key, value) = line.split_once(':')?;
    let name = key.split(';').next()?;
    if name.eq_ignore_ascii_case("BEGIN") {
        Some(Delimiter::Begin(value.trim()))
    } else if name.eq_ignore_ascii_case("END") {
        Some(Delimiter::End)
    } else {
        None
    }
}

/// Cut the components of unknown kind out of the calendars in `raw`.
///
/// Returns the remaining content lines and the kinds of the removed components.
fn split_unknown(raw: &[u8]) -> (String, Vec<String>) {
    let mut known = String::new();
    let mut others = vec![];
    let mut depth = 0usize;
    // Nesting inside a removed component.
    let mut skipped = 0usize;
    for line in LineReader::new(BufReader::new(Cursor::new(raw))) {
        let line: &str = line.as_str();
        let marker = delimiter(line);
        if skipped > 0 {
            match marker {
                Some(Delimiter::Begin(_)) => skipped += 1,
                Some(Delimiter::End) => skipped -= 1,
                None => {}
            }
            continue;
        }
        match marker {
            Some(Delimiter::Begin(kind)) => {
                let kind = kind.to_ascii_uppercase();
                if depth == 1 && !KNOWN_KINDS.contains(&kind.as_str()) {
                    others.push(kind);
                    skipped = 1;
                    continue;
                }
                depth += 1;
            }
            Some(Delimiter::End) => depth = depth.saturating_sub(1),
            None => {}
        }
        known.push_str(line);
        known.push_str("\r\n");
    }
    (known, others)
}

fn push_entries(entries: &mut Vec<Entry>, calendar: IcalCalendar) {
    entries.extend(calendar.timezones.into_iter().map(Entry::Timezone));
    entries.extend(calendar.events.into_iter().map(Entry::Event));
    for (kind, count) in [
        ("VTODO", calendar.todos.len()),
        ("VJOURNAL", calendar.journals.len()),
        ("VFREEBUSY", calendar.free_busys.len()),
        ("VALARM", calendar.alarms.len()),
    ] {
        entries.extend((0..count).map(|_| Entry::Other(String::from(kind))));
    }
}
