// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Casura Core - Case Orchestration Engine
//!
//! This crate instantiates declarative plan models (stages, tasks,
//! milestones, event listeners, guarded by entry/exit sentries) into live
//! execution trees and drives them through a lifecycle state machine in
//! response to external commands, persisting all state to PostgreSQL or
//! SQLite under optimistic locking.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         External Clients                                │
//! │                     (casura-server, embedders)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ commands / queries
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           CaseEngine                                    │
//! │   resolve target → authorize → load snapshot → dispatch → commit        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!              │                          │
//!              │ behavior dispatch        │ sentry evaluation
//!              ▼                          ▼
//! ┌───────────────────────┐    ┌─────────────────────────────┐
//! │ Execution tree (arena)│◄───│  Entry / exit criteria      │
//! │ composite propagation │    │  (variables + siblings)     │
//! └───────────────────────┘    └─────────────────────────────┘
//!              │
//!              ▼ versioned commit + history projection
//! ┌───────────────────────┐
//! │  PostgreSQL / SQLite  │
//! └───────────────────────┘
//! ```
//!
//! # Execution Node State Machine
//!
//! ```text
//!                  ┌───────────┐
//!                  │ AVAILABLE │
//!                  └─────┬─────┘
//!                 enable │   occur (milestone / event listener)
//!                        ▼
//!                  ┌───────────┐  disable   ┌──────────┐
//!                  │  ENABLED  │───────────►│ DISABLED │
//!                  └─────┬─────┘◄───────────└──────────┘
//!                  start │        reenable
//!                        ▼
//!                  ┌───────────┐  suspend   ┌───────────┐
//!                  │  ACTIVE   │───────────►│ SUSPENDED │
//!                  └─────┬─────┘◄───────────└───────────┘
//!        ┌───────────────┼────────────────┐   resume
//!        ▼               ▼                ▼
//!  ┌───────────┐  ┌────────────┐    ┌──────────┐
//!  │ COMPLETED │  │ TERMINATED │    │  FAILED  │
//!  └───────────┘  └────────────┘    └──────────┘
//! ```
//!
//! A new node starts `AVAILABLE` when it has unsatisfied entry criteria and
//! `ENABLED` otherwise; non-manual nodes auto-start. A composite completes
//! only once every required child is terminal; child transitions bubble to
//! the parent as typed events within the same command. Terminal children
//! leave the live tree once the parent has processed them; history keeps
//! their record.
//!
//! # Concurrency
//!
//! Commands against the same instance contend on per-row version counters:
//! a command reads a snapshot, mutates in memory, and commits conditionally
//! (`UPDATE … WHERE version = ?`) in one transaction. Exactly one of two
//! racing commands wins; the loser retries up to a configurable bound and
//! then surfaces `CONCURRENT_MODIFICATION`.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CASURA_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `CASURA_HTTP_PORT` | No | `8080` | HTTP API port (casura-server) |
//! | `CASURA_COMMAND_RETRIES` | No | `3` | Optimistic-lock retry bound |
//! | `CASURA_AUTHORIZATION_ENABLED` | No | `false` | Enforce permission checks |
//!
//! # Modules
//!
//! - [`config`]: Server configuration from environment variables
//! - [`plan`]: Immutable plan models and their builder
//! - [`lifecycle`]: The execution node state machine
//! - [`execution`]: Execution nodes and the per-instance tree arena
//! - [`behavior`]: Behavior dispatch and composite propagation
//! - [`sentry`]: Entry/exit criteria evaluation
//! - [`variables`]: Typed variable values and comparison semantics
//! - [`commands`]: Typed external triggers
//! - [`engine`]: The embeddable engine facade
//! - [`query`]: Fluent, permission-scoped query builders
//! - [`authorization`]: Permissions, grants, subject contexts
//! - [`identity`]: Users, groups, tenants, memberships
//! - [`filter`]: Saved filters
//! - [`history`]: Audit projection and the reporting surface
//! - [`persistence`]: Versioned storage backends (SQLite, PostgreSQL)
//! - [`error`]: Error types with stable error codes

#![deny(missing_docs)]

/// Server configuration loaded from environment variables.
pub mod config;

/// Error types for engine operations with stable error codes.
pub mod error;

/// Immutable plan models: items, sentries, guards, builder.
pub mod plan;

/// The execution node lifecycle state machine.
pub mod lifecycle;

/// Execution nodes and the per-instance case tree arena.
pub mod execution;

/// Behavior dispatch and composite propagation.
pub mod behavior;

/// Entry/exit criteria (sentry) evaluation.
pub mod sentry;

/// Typed variable values and comparison semantics.
pub mod variables;

/// Typed external triggers.
pub mod commands;

/// The embeddable case engine facade.
pub mod engine;

/// Fluent, permission-scoped query builders.
pub mod query;

/// Permissions, grants, and per-call subject contexts.
pub mod authorization;

/// Users, groups, tenants and tenant memberships.
pub mod identity;

/// Saved filters.
pub mod filter;

/// History projection and the read-only reporting surface.
pub mod history;

/// Persistence abstraction and SQL backends.
pub mod persistence;

/// Embedded database migrations.
pub mod migrations;
