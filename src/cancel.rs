use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{ExtractError, Result};

/// Abort signal shared between the caller and a running extraction.
///
/// Extractors check it between blocks, so a raster already being written is
/// always finished before the call returns `Aborted`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self, completed: usize) -> Result<()> {
        if self.is_cancelled() {
            Err(ExtractError::Aborted { completed })
        } else {
            Ok(())
        }
    }
}
