//! Pipeline stages for document-to-table extraction.
//!
//! Each submodule implements one step. The orchestrator in
//! [`crate::extract`] strings them together; none of them knows about the
//! others beyond the types it consumes.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ client ──▶ repair ──▶ (fallback) ──▶ aggregate
//! (path/URL) (pdfium)  (service)  (grid fix)  (field/value)  (sheets, confidence)
//! ```
//!
//! 1. [`input`]    — read a local path or download a URL, enforcing the size cap
//! 2. [`render`]   — rasterise pages (or decode a scan) in `spawn_blocking`
//! 3. [`encode`]   — canonical PNG encoding and the base64 request payload
//! 4. [`service`]  — the [`service::StructuredExtractionService`] seam and its
//!    edgequake-llm implementation; the only stage with network I/O
//! 5. [`client`]   — one call, one parsed payload or one classified error
//! 6. [`repair`]   — deterministic rectangular-grid repair
//! 7. [`fallback`] — field/value re-query for pages without tables
//! 8. [`aggregate`] — page-ordered concatenation, sheet naming, confidence
//!
//! [`policy`] wraps every remote call with the timeout, retry and
//! cancellation rules.

pub mod aggregate;
pub mod client;
pub mod encode;
pub mod fallback;
pub mod input;
pub mod policy;
pub mod render;
pub mod repair;
pub mod service;
