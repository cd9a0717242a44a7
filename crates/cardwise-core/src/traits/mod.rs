// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator traits consumed by the economy engine.
//!
//! All adapters extend the [`PluginAdapter`] base trait and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod storage;
pub mod sync;

pub use adapter::PluginAdapter;
pub use storage::LedgerStore;
pub use sync::RemoteSync;
