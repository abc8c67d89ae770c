// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod api;
pub mod auth;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod gate;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod test_support;
pub mod token;
pub mod transport;
