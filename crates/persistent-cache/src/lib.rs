//! Persistent key/value storage and fingerprinting for GPU pipeline caches.
//!
//! This library is the backend-agnostic half of a persistent pipeline cache.
//! A GPU-API implementation uses it to avoid re-compiling shaders and
//! re-building pipeline state objects across process runs.
//!
//! # How it works
//!
//! The embedding application provides a [`CachingInterface`](caching::CachingInterface),
//! an opaque key to blob store (for example [`DiskCache`](caching::DiskCache)).
//! Every device wraps it in a [`PersistentCache`](persistent::PersistentCache),
//! which offers the load-or-create combinator used by all higher-level caches.
//!
//! Cache keys are never derived from pointers. Objects that take part in caching
//! implement [`RecordedObject`](fingerprint::RecordedObject) and fingerprint
//! their defining fields into a [`FingerprintRecorder`](fingerprint::FingerprintRecorder),
//! which yields a stable content hash. Byte-exact persistent keys are assembled
//! with a [`KeyBuilder`](key::KeyBuilder).

pub mod blob;
pub mod caching;
pub mod config;
pub mod fingerprint;
pub mod key;
pub mod persistent;
