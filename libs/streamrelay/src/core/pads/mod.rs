// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod resolver;

pub use resolver::{PadOutcome, PadResolver, ResolverState};
