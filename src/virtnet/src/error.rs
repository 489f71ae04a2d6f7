/*
Copyright 2026  The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use thiserror::Error;

/// The error type for virtnet operations.
///
/// The driver surfaces errors only at configuration time and from the
/// notification channel; a host that violates the ring protocol is a fatal
/// condition handled by assertions, not by this type.
#[derive(Error, Debug)]
pub enum VirtnetError {
    /// Ring sizes must be a power of two so that index masking works.
    #[error("ring size {0} is not a power of two")]
    RingSizeNotPowerOfTwo(u32),

    /// Setting up the eventfd notification channel failed.
    #[error("eventfd setup failed: {0}")]
    EventfdSetup(std::io::Error),

    /// The notifier's wait channel failed; the owning ring stops reaping.
    #[error("notifier wait failed: {0}")]
    NotifierWait(std::io::Error),
}

/// Result type alias for virtnet operations.
pub type Result<T> = core::result::Result<T, VirtnetError>;
