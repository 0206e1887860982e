//! # ethrex-crypto
//!
//! Cryptographic primitives used by the state cache.
//!
//! This crate provides an optimized Keccak-256 implementation, selecting
//! hand-rolled assembly on platforms that support it and falling back to a
//! pure-Rust implementation elsewhere.
//!
//! ## Quick Start
//!
//! ```rust
//! use ethrex_crypto::keccak::{keccak_hash, Keccak256};
//!
//! // Single-shot
//! let hash = keccak_hash(b"hello");
//!
//! // Streaming
//! let hash = Keccak256::new()
//!     .update(b"hello")
//!     .update(b" world")
//!     .finalize();
//! ```
//!
//! ## Platform Support
//!
//! - **x86_64 / aarch64**: assembly-backed Keccak-f[1600] permutation.
//! - **Other**: pure-Rust fallback (`tiny-keccak`).

pub mod keccak;
