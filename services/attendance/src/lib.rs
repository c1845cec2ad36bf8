//! Attendance Service
//!
//! Frame ingestion and inference relay service for edge attendance devices.
//! Devices upload image frames over HTTP; the service persists registration
//! frames in PostgreSQL and forwards attendance frames to an external
//! inference service, then reports whether the pending attendance has been
//! resolved to an identity.
//!
//! ## Features
//!
//! - **Registration**: store an owner record and its reference images, then
//!   notify the inference service
//! - **Frame Relay**: forward uploaded frames as one multipart request and
//!   pass the answer back verbatim
//! - **Result Polling**: classify the inference service's current result as
//!   resolved or pending
//!
//! ## Architecture
//!
//! ```text
//! Edge Device                Attendance Service               Inference Service
//! ┌──────────────┐          ┌──────────────────┐            ┌──────────────┐
//! │ /register    │─────────▶│ Ingestion        │───notify──▶│ success      │
//! │              │          │ Handler          │            │              │
//! │ /attendance/ │─────────▶│        │         │───relay───▶│ predict      │
//! │   new        │          │        │         │            │              │
//! │ /attendance/ │─────────▶│        │         │───poll────▶│ frame status │
//! │   pending    │          └────────┼─────────┘            └──────────────┘
//! └──────────────┘                   │                             │
//!                                    ▼                             ▼
//!                           ┌──────────────────┐          ┌──────────────────┐
//!                           │ Record Store     │          │ Resolution       │
//!                           │ (users, frames)  │          │ Interpreter      │
//!                           └──────────────────┘          └──────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod inference_client;
pub mod record_store;
pub mod resolution;
pub mod upload;

#[cfg(test)]
mod test_support;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::ApiError;
pub use inference_client::{InferenceClient, InferenceError, InferenceService, RelayResponse};
pub use record_store::{FrameId, OwnerId, PgRecordStore, RecordStore, StoreError};
pub use resolution::{classify, InferenceResult, Resolution};
pub use upload::{UploadForm, UploadedFile};
