// src/lib.rs

//! Depot: a content-addressed package store engine
//!
//! Depot reads Nix-style stores, where every package lives in a directory
//! named `<hash>-<name>` and refers to its dependencies by embedding their
//! hashes. It can index a store, discover the dependency graph between its
//! packages, and install a package's closure into another store.
//!
//! # Architecture
//!
//! - Backends: uniform read-only access to local directories and HTTP/S3 caches
//! - Store: an append-only package index with memoized dependency resolution
//! - Discovery: narinfo sidecars first, then a multi-pattern scan of file contents
//! - NAR: streaming reader and writer for the Nix archive format
//! - Install: topological ordering, staging and atomic rename into place

pub mod backend;
pub mod catalog;
pub mod config;
mod error;
pub mod install;
pub mod nar;
pub mod narinfo;
pub mod scanner;
pub mod store;

pub use error::{Error, Result};
