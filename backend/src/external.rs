//! Seams to the outside world.
//!
//! The core never talks to an object store or a message bus directly;
//! it goes through these traits. The in-memory implementations below
//! are the defaults for tests and for the CLI's dry runs.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::models::CashflowBatchId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("storage error: {0}")]
pub struct StorageError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notification error: {0}")]
pub struct NotifyError(pub String);

/// Write-only object store for rendered invoice documents.
pub trait InvoiceStorage {
    fn store(&mut self, object_id: &str, document: &[u8]) -> Result<(), StorageError>;
}

/// Told once per run that a batch's invoices were generated.
/// Fire-and-forget: the caller logs failures and moves on.
pub trait BatchExportNotifier {
    fn batch_exported(&mut self, batch_id: CashflowBatchId, label: &str)
        -> Result<(), NotifyError>;
}

/// Keeps stored documents in a map.
#[derive(Debug, Default)]
pub struct MemoryInvoiceStorage {
    objects: BTreeMap<String, Vec<u8>>,
}

impl MemoryInvoiceStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, object_id: &str) -> Option<&[u8]> {
        self.objects.get(object_id).map(|bytes| bytes.as_slice())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl InvoiceStorage for MemoryInvoiceStorage {
    fn store(&mut self, object_id: &str, document: &[u8]) -> Result<(), StorageError> {
        self.objects.insert(object_id.to_string(), document.to_vec());
        Ok(())
    }
}

/// Records every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    exported: Vec<(CashflowBatchId, String)>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exported(&self) -> &[(CashflowBatchId, String)] {
        &self.exported
    }
}

impl BatchExportNotifier for RecordingNotifier {
    fn batch_exported(
        &mut self,
        batch_id: CashflowBatchId,
        label: &str,
    ) -> Result<(), NotifyError> {
        self.exported.push((batch_id, label.to_string()));
        Ok(())
    }
}
