#![warn(missing_docs)]
//! # reprint-core
//!
//! Core types and algorithms for the Reprint HTTP output cache.
//!
//! This crate holds the pure, store-independent half of the engine: the
//! pieces that decide whether two requests are "the same request" and
//! whether a stored response may stand in for a fresh one. The `reprint`
//! crate wires them to a store and to the host's request pipeline.
//!
//! ## Architecture
//!
//! A cached family of responses is addressed in two phases. The **bare
//! key** (verb class plus path) resolves to a [`VaryDescriptor`]: the
//! dimensions the family varies on. The descriptor's materials are then
//! folded into a **varied key** that resolves to one [`CachedEntry`].
//! This crate provides the algorithms both phases lean on:
//!
//! - **Build** canonical keys ([`KeyBuilder`])
//! - **Negotiate** a content encoding against `Accept-Encoding`
//!   ([`encoding::select_encoding`])
//! - **Evaluate** conditional headers for a `304` answer
//!   ([`conditional::evaluate`])
//! - **Freeze** a response's caching policy ([`PolicySettings`])
//!

pub mod conditional;
pub mod encoding;
pub mod entry;
pub mod http_date;
pub mod key;
pub mod request;
pub mod response;
pub mod settings;
pub mod vary;

pub use conditional::ConditionalDecision;
pub use encoding::Negotiated;
pub use entry::{CachedEntry, RawResponse};
pub use key::{CacheKey, DEFAULT_MAX_POST_BODY, KeyBuilder};
pub use request::{CacheRequest, Params, RequestBody, Verb};
pub use response::CacheResponse;
pub use settings::{
    Cacheability, PolicySettings, ValidationCallback, ValidationStatus, VaryMaterials,
};
pub use vary::{CustomVaryError, CustomVaryResolver, VaryDescriptor, VaryId};
