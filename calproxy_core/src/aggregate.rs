//! Concurrent fetching of the listed calendars and merging of their entries.
//!
//! Every locator gets its own task which fetches and parses one calendar.
//! The tasks never touch the aggregate calendar, they send their entries to a single merge task
//! owning it. Once all tasks are joined the last sender is dropped, the merge task drains what
//! is left in the channel and returns the calendar through its join handle.

use std::{num::NonZeroUsize, sync::Arc};

use ical::parser::ical::component::IcalCalendar;
use reqwest::Url;
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        Semaphore,
    },
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, warn};

use crate::{
    entry::{self, Entry},
    error::Result,
    fetch::{resolve, Source},
};

/// Fetches the calendars behind a list of locators and merges them.
pub struct Aggregator<S> {
    source: Arc<S>,
    base: Url,
    permits: Option<Arc<Semaphore>>,
}

impl<S: Source> Aggregator<S> {
    /// Locators are resolved against `base`.
    /// With `max_concurrent_fetches` set, at most that many fetches are in flight at once.
    pub fn new(source: Arc<S>, base: Url, max_concurrent_fetches: Option<NonZeroUsize>) -> Self {
        Self {
            source,
            base,
            permits: max_concurrent_fetches.map(|max| Arc::new(Semaphore::new(max.get()))),
        }
    }

    /// Merge the entries of all calendars into `calendar`.
    ///
    /// Calendars which cannot be fetched or parsed are logged and skipped.
    /// The order of the merged entries depends on which fetch finishes first.
    pub async fn aggregate(
        &self,
        locators: Vec<String>,
        calendar: IcalCalendar,
    ) -> Result<IcalCalendar> {
        let (entries, merger) = spawn_merger(calendar);
        let mut tasks = JoinSet::new();
        for locator in locators {
            tasks.spawn(contribute(
                self.source.clone(),
                self.base.clone(),
                self.permits.clone(),
                locator,
                entries.clone(),
            ));
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "calendar task failed");
            }
        }
        drop(entries);
        Ok(merger.await?)
    }
}

/// Fetch and parse one calendar and send its entries to the merge task.
async fn contribute<S: Source>(
    source: Arc<S>,
    base: Url,
    permits: Option<Arc<Semaphore>>,
    locator: String,
    entries: UnboundedSender<Entry>,
) {
    let parsed = match download(&*source, &base, permits, &locator).await {
        Ok(raw) => entry::parse(&raw),
        Err(err) => {
            warn!(%locator, error = %err, "skipping calendar, fetch failed");
            return;
        }
    };
    let parsed = match parsed {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(%locator, error = %err, "skipping calendar, parse failed");
            return;
        }
    };
    debug!(%locator, entries = parsed.len(), "parsed calendar");
    for entry in parsed {
        if entries.send(entry).is_err() {
            warn!(%locator, "merge task is gone, dropping remaining entries");
            return;
        }
    }
}

async fn download<S: Source>(
    source: &S,
    base: &Url,
    permits: Option<Arc<Semaphore>>,
    locator: &str,
) -> Result<Vec<u8>> {
    let url = resolve(base, locator)?;
    // Held until the body is read. The semaphore is never closed.
    let _permit = match permits {
        Some(permits) => permits.acquire_owned().await.ok(),
        None => None,
    };
    source.fetch(url).await
}

/// Start the task owning the aggregate calendar.
///
/// The calendar is returned by the handle after every sender is dropped and all sent entries are
/// merged.
pub fn spawn_merger(
    calendar: IcalCalendar,
) -> (UnboundedSender<Entry>, JoinHandle<IcalCalendar>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let handle = tokio::spawn(merge(receiver, calendar));
    (sender, handle)
}

async fn merge(mut entries: UnboundedReceiver<Entry>, mut calendar: IcalCalendar) -> IcalCalendar {
    while let Some(entry) = entries.recv().await {
        match entry {
            Entry::Event(event) => calendar.events.push(event),
            Entry::Timezone(timezone) => calendar.timezones.push(timezone),
            Entry::Other(kind) => warn!(%kind, "dropping unhandled calendar entry"),
        }
    }
    calendar
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        future::Future,
        num::NonZeroUsize,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use ical::parser::ical::component::IcalCalendar;
    use reqwest::{StatusCode, Url};

    use crate::{
        aggregate::{spawn_merger, Aggregator},
        entry::{
            self,
            property_value,
            tests::{calendar, event, timezone},
            Entry,
        },
        error::{Error, Result},
        fetch::Source,
        render,
    };

    /// Serves canned calendars by path, after an optional delay.
    #[derive(Default)]
    struct FakeSource {
        calendars: HashMap<String, (Duration, Option<String>)>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeSource {
        fn with(mut self, path: &str, delay: Duration, body: Option<String>) -> Self {
            self.calendars.insert(path.to_owned(), (delay, body));
            self
        }
    }

    /// Counts a fetch as in flight until it finishes or is dropped.
    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Source for FakeSource {
        fn fetch(&self, url: Url) -> impl Future<Output = Result<Vec<u8>>> + Send {
            async move {
                let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                let _guard = InFlight(&self.in_flight);
                self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
                let (delay, body) = self
                    .calendars
                    .get(url.path())
                    .cloned()
                    .unwrap_or((Duration::ZERO, None));
                tokio::time::sleep(delay).await;
                body.map(String::into_bytes).ok_or(Error::Status {
                    url,
                    status: StatusCode::NOT_FOUND,
                })
            }
        }
    }

    fn base() -> Url {
        Url::parse("https://dav.example.org/index.html").unwrap()
    }

    /// The `UID`s of the events and the `TZID`s of the timezones, sorted.
    fn ids(calendar: &IcalCalendar) -> Vec<String> {
        let mut ids: Vec<String> = calendar
            .events
            .iter()
            .filter_map(|event| property_value(&event.properties, "UID"))
            .chain(
                calendar
                    .timezones
                    .iter()
                    .filter_map(|timezone| property_value(&timezone.properties, "TZID")),
            )
            .map(String::from)
            .collect();
        ids.sort();
        ids
    }

    async fn aggregate(source: FakeSource, locators: &[&str]) -> IcalCalendar {
        Aggregator::new(Arc::new(source), base(), None)
            .aggregate(
                locators.iter().map(|locator| locator.to_string()).collect(),
                render::calendar(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_aggregate_independent_of_completion_order() {
        for (events_delay, timezone_delay) in [(10, 50), (50, 10), (0, 0)] {
            let source = FakeSource::default()
                .with(
                    "/events.ics",
                    Duration::from_millis(events_delay),
                    Some(calendar(&[event("E1"), event("E2")])),
                )
                .with(
                    "/timezone.ics",
                    Duration::from_millis(timezone_delay),
                    Some(calendar(&[timezone("Z1")])),
                );

            let merged = aggregate(source, &["/events.ics", "/timezone.ics"]).await;

            assert_eq!(ids(&merged), vec!["E1", "E2", "Z1"]);
            assert_eq!(merged.events.len(), 2);
            assert_eq!(merged.timezones.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_aggregate_independent_of_random_delays() {
        let mut rng = fastrand::Rng::new();
        for _ in 0..5 {
            let mut source = FakeSource::default();
            let mut expected = vec![];
            let locators: Vec<String> = (0..8).map(|i| format!("/{i}.ics")).collect();
            for (i, locator) in locators.iter().enumerate() {
                let component = if i % 3 == 0 {
                    expected.push(format!("Z{i}"));
                    timezone(&format!("Z{i}"))
                } else {
                    expected.push(format!("E{i}"));
                    event(&format!("E{i}"))
                };
                source = source.with(
                    locator,
                    Duration::from_millis(rng.u64(0..30)),
                    Some(calendar(&[component])),
                );
            }
            expected.sort();

            let merged = Aggregator::new(Arc::new(source), base(), None)
                .aggregate(locators, render::calendar())
                .await
                .unwrap();

            assert_eq!(ids(&merged), expected);
        }
    }

    #[tokio::test]
    async fn test_aggregate_dropped_aborts_fetches() {
        let mut source = FakeSource::default();
        for path in ["/a.ics", "/b.ics"] {
            source = source.with(path, Duration::from_secs(60), Some(calendar(&[event(path)])));
        }
        let source = Arc::new(source);
        let aggregator = Aggregator::new(source.clone(), base(), None);

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            aggregator.aggregate(
                vec![String::from("/a.ics"), String::from("/b.ics")],
                render::calendar(),
            ),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 2);
        // Aborted tasks are dropped the next time the runtime gets to them.
        for _ in 0..100 {
            if source.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(source.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_aggregate_skips_missing_calendar() {
        let source = FakeSource::default()
            .with("/a.ics", Duration::ZERO, Some(calendar(&[event("A")])))
            .with("/b.ics", Duration::ZERO, None)
            .with("/c.ics", Duration::ZERO, Some(calendar(&[event("C")])));

        let merged = aggregate(source, &["/a.ics", "/b.ics", "/c.ics"]).await;

        assert_eq!(ids(&merged), vec!["A", "C"]);
    }

    #[tokio::test]
    async fn test_aggregate_skips_unparsable_calendar() {
        let source = FakeSource::default()
            .with("/a.ics", Duration::ZERO, Some(calendar(&[event("A")])))
            .with(
                "/broken.ics",
                Duration::ZERO,
                Some(String::from("BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\n")),
            );

        let merged = aggregate(source, &["/a.ics", "/broken.ics"]).await;

        assert_eq!(ids(&merged), vec!["A"]);
    }

    #[tokio::test]
    async fn test_aggregate_drops_other_entries() {
        let todo = ["BEGIN:VTODO", "UID:T", "END:VTODO"]
            .map(String::from)
            .to_vec();
        let source = FakeSource::default().with(
            "/mixed.ics",
            Duration::ZERO,
            Some(calendar(&[todo, event("E")])),
        );

        let merged = aggregate(source, &["/mixed.ics"]).await;

        assert_eq!(ids(&merged), vec!["E"]);
        assert!(merged.todos.is_empty());
    }

    #[tokio::test]
    async fn test_aggregate_keeps_events_next_to_unknown_kinds() {
        let availability = ["BEGIN:VAVAILABILITY", "UID:av", "END:VAVAILABILITY"]
            .map(String::from)
            .to_vec();
        let source = FakeSource::default().with(
            "/availability.ics",
            Duration::ZERO,
            Some(calendar(&[event("E"), availability, timezone("UTC")])),
        );

        let merged = aggregate(source, &["/availability.ics"]).await;

        assert_eq!(ids(&merged), vec!["E", "UTC"]);
    }

    #[tokio::test]
    async fn test_aggregate_keeps_duplicates() {
        let source = FakeSource::default()
            .with("/a.ics", Duration::ZERO, Some(calendar(&[event("same")])))
            .with("/b.ics", Duration::ZERO, Some(calendar(&[event("same")])));

        let merged = aggregate(source, &["/a.ics", "/b.ics", "/a.ics"]).await;

        assert_eq!(ids(&merged), vec!["same", "same", "same"]);
    }

    #[tokio::test]
    async fn test_aggregate_many_locators_terminates() {
        let mut source = FakeSource::default();
        let locators: Vec<String> = (0..50).map(|i| format!("/{i}.ics")).collect();
        for (i, locator) in locators.iter().enumerate() {
            source = source.with(
                locator,
                Duration::from_millis((i % 7) as u64),
                Some(calendar(&[event(&format!("E{i}")), timezone(&format!("Z{i}"))])),
            );
        }
        let aggregator = Aggregator::new(Arc::new(source), base(), None);

        let merged = tokio::time::timeout(
            Duration::from_secs(10),
            aggregator.aggregate(locators, render::calendar()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(merged.events.len(), 50);
        assert_eq!(merged.timezones.len(), 50);
    }

    #[tokio::test]
    async fn test_aggregate_bounds_concurrent_fetches() {
        let mut source = FakeSource::default();
        let locators: Vec<String> = (0..20).map(|i| format!("/{i}.ics")).collect();
        for (i, locator) in locators.iter().enumerate() {
            source = source.with(
                locator,
                Duration::from_millis(5),
                Some(calendar(&[event(&format!("E{i}"))])),
            );
        }
        let source = Arc::new(source);
        let aggregator = Aggregator::new(source.clone(), base(), NonZeroUsize::new(3));

        let merged = aggregator
            .aggregate(locators, render::calendar())
            .await
            .unwrap();

        assert_eq!(merged.events.len(), 20);
        assert!(source.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_aggregate_no_locators() {
        let merged = aggregate(FakeSource::default(), &[]).await;
        assert!(merged.events.is_empty());
        assert!(merged.timezones.is_empty());
    }

    #[tokio::test]
    async fn test_merger_drains_before_stopping() {
        let (sender, merger) = spawn_merger(render::calendar());
        let entries = entry::parse(calendar(&[event("early"), event("last")]).as_bytes()).unwrap();
        for entry in entries {
            sender.send(entry).unwrap();
        }
        drop(sender);

        let merged = merger.await.unwrap();

        assert_eq!(ids(&merged), vec!["early", "last"]);
    }

    #[tokio::test]
    async fn test_merger_with_many_senders() {
        let (sender, merger) = spawn_merger(render::calendar());
        let mut producers = vec![];
        for i in 0..10 {
            let sender = sender.clone();
            producers.push(tokio::spawn(async move {
                let raw = calendar(&[event(&format!("E{i}"))]);
                for entry in entry::parse(raw.as_bytes()).unwrap() {
                    sender.send(entry).unwrap();
                }
                sender.send(Entry::Other(String::from("VJOURNAL"))).unwrap();
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        drop(sender);

        let merged = merger.await.unwrap();

        assert_eq!(merged.events.len(), 10);
        assert!(merged.journals.is_empty());
    }
}
