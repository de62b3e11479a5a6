//! The whole request: index, calendars, merge and rendering.

use std::{num::NonZeroUsize, sync::Arc};

use ical::parser::ical::component::IcalCalendar;
use reqwest::Url;
use tracing::{debug, instrument};

use crate::{
    aggregate::Aggregator,
    config::{without_userinfo, Config},
    error::Result,
    fetch::{Fetcher, Source},
    index,
    metrics::Metrics,
    render,
};

pub struct Pipeline<S = Fetcher> {
    target: Url,
    source: Arc<S>,
    aggregator: Aggregator<S>,
}

impl Pipeline<Fetcher> {
    /// Build the pipeline talking to the configured upstream.
    pub fn new(config: &Config, metrics: Arc<dyn Metrics>) -> Result<Self> {
        let fetcher = Fetcher::new(config, metrics)?;
        Ok(Self::with_source(
            config.target.clone(),
            Arc::new(fetcher),
            config.max_concurrent_fetches,
        ))
    }
}

impl<S: Source> Pipeline<S> {
    /// Userinfo in `target` is dropped, requests authenticate with the configured credentials.
    pub fn with_source(
        target: Url,
        source: Arc<S>,
        max_concurrent_fetches: Option<NonZeroUsize>,
    ) -> Self {
        let target = without_userinfo(&target);
        let aggregator = Aggregator::new(source.clone(), target.clone(), max_concurrent_fetches);
        Self {
            target,
            source,
            aggregator,
        }
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Get the locators listed in the index document.
    pub async fn locators(&self) -> Result<Vec<String>> {
        let raw = self.source.fetch(self.target.clone()).await?;
        Ok(index::locators(&raw)?)
    }

    /// Get the merged calendar.
    ///
    /// Fails only if the index cannot be fetched or read.
    pub async fn calendar(&self) -> Result<IcalCalendar> {
        let locators = self.locators().await?;
        debug!(locators = locators.len(), "read index");
        self.aggregator
            .aggregate(locators, render::calendar())
            .await
    }

    /// Get the merged calendar as iCalendar text.
    #[instrument(skip(self), fields(target = %self.target))]
    pub async fn run(&self) -> Result<String> {
        let calendar = self.calendar().await?;
        debug!(
            events = calendar.events.len(),
            timezones = calendar.timezones.len(),
            "merged calendar"
        );
        Ok(render::render(&calendar))
    }
}
