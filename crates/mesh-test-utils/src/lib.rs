//! # Mesh Test Utilities
//!
//! Test doubles and fixtures for exercising the mesh coordinator without a
//! real relay, registry, capture device or media engine.
//!
//! ## Modules
//!
//! - `mock_relay` - In-memory signal relay with duplication, holding and
//!   drop modes
//! - `mock_registry` - In-memory session registry that broadcasts roster
//!   changes
//! - `mock_media` - Local media controller that hands out shared captures
//! - `mock_connection` - Loopback peer connections that describe their local
//!   streams in the session description
//! - `fixtures` - Participant spawning, config and wait helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let mesh = TestMesh::new("session-1");
//!     let alice = mesh.spawn("111", &test_config());
//!     let bob = mesh.spawn("222", &test_config());
//!
//!     alice.handle.join_session().await.unwrap();
//!     bob.handle.join_session().await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod mock_connection;
pub mod mock_media;
pub mod mock_registry;
pub mod mock_relay;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_connection::*;
pub use mock_media::*;
pub use mock_registry::*;
pub use mock_relay::*;
