// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod buffer;
mod exchange;
mod format;
mod preprocess;
mod view;

pub use buffer::{HostFrame, PipelineBuffer};
pub use exchange::{ExchangeStats, FrameExchange};
pub use format::{FrameLayout, PixelFormat, Plane};
pub use preprocess::{FramePreprocessor, NormalizePreprocessor};
pub use view::{FrameView, Ownership};
