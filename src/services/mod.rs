//! Service layer for the harvester.
//!
//! This module contains the crawl engine:
//! - Request signing (`Signer`)
//! - Adaptive rate-limit backoff (`Backoff`)
//! - The transport seam (`Transport`) and a recorded-reply implementation
//! - Retrying request execution (`RequestEngine`)
//! - Page-by-page listing sweeps (`Paginator`)

mod backoff;
mod paginate;
mod replay;
mod request;
mod signature;
mod transport;

pub use backoff::{Backoff, jittered, pause_duration};
pub use paginate::{PageSource, Paginator, Sweep, Termination};
pub use replay::{Matcher, ReplayTransport, Reply};
pub use request::{EngineStats, RequestEngine, RetryPolicy};
pub use signature::Signer;
pub use transport::{ApiRequest, HttpResponse, Method, Transport, TransportError};
