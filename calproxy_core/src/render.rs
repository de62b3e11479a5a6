//! Creation and serialization of the aggregate calendar.

use ical::{
    generator::{Emitter, IcalCalendarBuilder},
    parser::ical::component::IcalCalendar,
};

static PROD_ID: &str = "-//calproxy//calproxy";

/// Get an empty calendar to merge entries into.
pub fn calendar() -> IcalCalendar {
    IcalCalendarBuilder::version("2.0")
        .gregorian()
        .prodid(PROD_ID)
        .build()
}

/// Serialize the calendar to iCalendar text.
pub fn render(calendar: &IcalCalendar) -> String {
    calendar.generate()
}
