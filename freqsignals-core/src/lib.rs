//! FreqSignals core: signal client and time-windowed projection engine.
//!
//! This crate contains:
//! - OAuth2 client-credentials token caching
//! - An authenticated request layer with bounded retry on connect timeouts
//! - A deduplicated in-memory signal store fed by live polling
//! - One-shot paginated historical backfill per (symbol, dataset)
//! - Signal publishing
//! - Projection of TTL-windowed signal values onto a time series
//! - CSV/Parquet series I/O
//!
//! Everything is synchronous and driven by the host's periodic tick.
//! [`SignalSession`] bundles the stateful pieces into one owned value.

pub mod auth;
pub mod backfill;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod projector;
pub mod publisher;
pub mod series;
pub mod series_io;
pub mod session;
pub mod signal;
pub mod store;
pub mod transport;

pub use auth::{AuthToken, TokenManager};
pub use backfill::{BackfillOutcome, HistoricalBackfillLoader};
pub use client::{RequestPolicy, ResilientHttpClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, NumericEncoding};
pub use error::{Result, SignalError};
pub use projector::{ProjectionOptions, ProjectionSummary, SeriesProjector};
pub use publisher::{NewSignal, SignalPublisher};
pub use series::{Series, SeriesRow};
pub use session::{RunMode, SignalSession, TickSummary};
pub use signal::{HistoricalRecord, Page, Scalar, Signal, SignalKey, ValidityWindow};
pub use store::{PollSummary, RetentionPolicy, SignalStore};
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, ScriptedTransport, Transport,
    TransportError,
};
