//! Request counters.
//!
//! The counters are handed to the fetcher and the server explicitly instead of living in a
//! process wide registry, so tests can use [`NoMetrics`] or inspect their own [`Counters`].

use std::{
    fmt::Write,
    sync::atomic::{AtomicU64, Ordering},
};

/// Outcome of one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Err,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Err => "err",
        }
    }
}

pub trait Metrics: Send + Sync {
    /// Count one request sent to the upstream.
    fn outbound_request(&self);
    /// Count one served request.
    fn inbound_request(&self, outcome: Outcome);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoMetrics;

impl Metrics for NoMetrics {
    fn outbound_request(&self) {}

    fn inbound_request(&self, _outcome: Outcome) {}
}

#[derive(Debug, Default)]
pub struct Counters {
    inbound_ok: AtomicU64,
    inbound_err: AtomicU64,
    outbound: AtomicU64,
}

impl Counters {
    pub fn inbound(&self, outcome: Outcome) -> u64 {
        match outcome {
            Outcome::Ok => self.inbound_ok.load(Ordering::Relaxed),
            Outcome::Err => self.inbound_err.load(Ordering::Relaxed),
        }
    }

    pub fn outbound(&self) -> u64 {
        self.outbound.load(Ordering::Relaxed)
    }

    /// Render the counters in the Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut text = String::new();
        text.push_str("# HELP calproxy_in_requests incoming requests\n");
        text.push_str("# TYPE calproxy_in_requests counter\n");
        for outcome in [Outcome::Err, Outcome::Ok] {
            let _ = writeln!(
                text,
                "calproxy_in_requests{{status=\"{}\"}} {}",
                outcome.as_str(),
                self.inbound(outcome)
            );
        }
        text.push_str("# HELP calproxy_outgoing_reqs outgoing requests\n");
        text.push_str("# TYPE calproxy_outgoing_reqs counter\n");
        let _ = writeln!(text, "calproxy_outgoing_reqs {}", self.outbound());
        text
    }
}

impl Metrics for Counters {
    fn outbound_request(&self) {
        self.outbound.fetch_add(1, Ordering::Relaxed);
    }

    fn inbound_request(&self, outcome: Outcome) {
        match outcome {
            Outcome::Ok => self.inbound_ok.fetch_add(1, Ordering::Relaxed),
            Outcome::Err => self.inbound_err.fetch_add(1, Ordering::Relaxed),
        };
    }
}
