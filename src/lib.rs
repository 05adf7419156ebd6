//! Per-alert AI analysis orchestration.
//!
//! An alert is analyzed by six stages (classification, deep analysis, MITRE
//! mapping, two playbooks and one SOAR orchestration transport). Each stage
//! has its own lifecycle, keyed by `(alert_id, stage)`:
//!
//! - [`coordinator`] claims stages, enforces dependencies and drives
//!   one-click runs over the [`dag`].
//! - [`executor`] turns a claimed stage into provider or SOAR calls with
//!   retries and a per-organization concurrency cap.
//! - [`progress`] sequences and fans out state transitions per alert.
//! - [`feedback`] records analyst verdicts against stage outputs.
//! - [`http`] exposes all of the above over REST and WebSocket.

pub mod config;
pub mod coordinator;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod feedback;
pub mod http;
pub mod ioc;
pub mod logging;
pub mod progress;
pub mod provider;
pub mod soar;
pub mod timeline;
pub mod ui;
