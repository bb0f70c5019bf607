//! Observability for the mesh coordinator.
//!
//! Logging goes through `tracing` with `mesh.*` targets and safe structured
//! fields (participant ids, link ids, states; never negotiation payloads).
//! Installing a subscriber or a metrics recorder is left to the embedding
//! application.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `mesh_signals_total` | Counter | `kind`, `outcome` | Signals sent, applied, deferred or rejected |
//! | `mesh_signals_duplicate_total` | Counter | `kind` | Relay replays caught by the deduplicator |
//! | `mesh_peers_active` | Gauge | none | Live peer links |
//! | `mesh_peer_failures_total` | Counter | `reason` | Peer links torn down by failure |
//! | `mesh_negotiation_duration_seconds` | Histogram | none | Time out of `Stable` per negotiation |
//! | `mesh_relay_send_failures_total` | Counter | none | Relay hand-off failures |
//! | `mesh_pending_signals_dropped_total` | Counter | none | Pending-queue evictions |

pub mod metrics;
