// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest page the object-storage listing API returns
pub const LIST_PAGE_SIZE_MAX: usize = 1000;

/// Tuning for one accessor instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessorConfig {
    pub retry: RetryPolicy,
    /// Objects requested per listing page, clamped to `1..=1000`
    pub list_page_size: usize,
    pub request_timeout_secs: u64,
}

impl Default for AccessorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            list_page_size: LIST_PAGE_SIZE_MAX,
            request_timeout_secs: 60,
        }
    }
}

impl AccessorConfig {
    pub fn page_size(&self) -> usize {
        self.list_page_size.clamp(1, LIST_PAGE_SIZE_MAX)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
