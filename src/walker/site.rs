//! The environment the walker moves through.

use std::future::Future;

use crate::error::Result;
use crate::model::{Page, Target};

/// A browsable index: something with locations, listings and downloads.
///
/// Implementations must not cache between calls. Every step loads its page
/// afresh, the same way a reload would.
pub trait Site {
    /// Load the view at `location` (relative to the index root).
    fn load(&self, location: &str) -> impl Future<Output = Result<Page>> + Send;

    /// Fetch `target`, saving it under its own file name. Returns the byte count.
    fn download(&self, target: &Target) -> impl Future<Output = Result<u64>> + Send;
}
