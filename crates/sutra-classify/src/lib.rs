// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod classifier;
mod features;
mod keywords;

pub use classifier::{classify, Classification, Intent, Route};
pub use features::{extract_features, Features};
pub use keywords::extract_keywords;
