/*
 * 5D Labs Agent Platform - Component Reconciler
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Component reconciliation runtime
//!
//! This crate brings a named component (a set of Kubernetes manifests) to a target
//! version on a target cluster:
//! - [`service::WorkerPool`] admits tasks, checks component dependencies and runs them
//!   on a fixed number of workers
//! - [`service::Runner`] executes the pre/main/post actions with retries and reports
//!   progress through heartbeat callbacks
//! - [`kubernetes::ManifestEngine`] applies or deletes manifests, running the
//!   [`interceptors`] pipeline and resolving an update strategy per resource
//! - [`progress::Tracker`] polls workload resources until they are ready or gone

pub mod callback;
pub mod chart;
pub mod config;
pub mod dependency;
pub mod error;
pub mod heartbeat;
pub mod interceptors;
pub mod kubernetes;
pub mod model;
pub mod progress;
pub mod server;
pub mod service;

// Re-export commonly used types
pub use config::ReconcilerConfig;
pub use error::{Error, Result};
pub use model::{CallbackMessage, OperationType, Status, Task};
pub use service::{ComponentReconciler, ComponentRegistry, RuntimeContext, WorkerPool};
