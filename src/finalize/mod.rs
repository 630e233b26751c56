//! Session finalization: naming, assembly, counter advance and upload.
//!
//! # Architecture
//!
//! * [`counter`]: durable marker-file counter used to name documents.
//! * [`assembler`]: [`DocumentAssembler`] trait and the `img2pdf` implementation.
//! * [`upload`]: [`Uploader`] trait and the multipart HTTP implementation.
//!
//! # Ordering
//!
//! The counter is advanced after the assembler call returns, whether or not
//! assembly succeeded. A crash between the two can reuse a document number
//! on restart. Upload only runs for successfully assembled documents and
//! its failure never rolls the counter back.

pub mod assembler;
pub mod counter;
pub mod upload;

use std::path::PathBuf;

use thiserror::Error;

pub use assembler::{AssemblyError, DocumentAssembler, Img2PdfAssembler};
pub use counter::{CounterError, CounterStore};
pub use upload::{BackendUrl, HttpUploader, UploadError, Uploader};

use crate::session::ScanSession;

/// Error type for finalization steps that prevent producing a document.
#[derive(Debug, Error)]
pub enum FinalizeError {
    /// The session has no captured pages.
    #[error("session {0} has no captured pages")]
    EmptySession(PathBuf),

    /// The counter could not be read or has no next value, so the document
    /// cannot be named.
    #[error(transparent)]
    Counter(#[from] CounterError),
}

/// Outcome of finalizing one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Path the document was (or should have been) written to.
    pub document: PathBuf,
    /// Counter value used for the document name.
    pub number: u64,
    /// Number of pages handed to the assembler.
    pub pages: usize,
    /// Whether the assembler reported success.
    pub assembled: bool,
    /// Whether the counter marker was advanced.
    pub counter_advanced: bool,
    /// Whether the document was accepted by the backend.
    pub uploaded: bool,
}

/// Turns a finished session into an uploaded document.
pub struct SessionFinalizer {
    counter: CounterStore,
    assembler: Box<dyn DocumentAssembler>,
    uploader: Option<Box<dyn Uploader>>,
    document_prefix: String,
}

impl std::fmt::Debug for SessionFinalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFinalizer")
            .field("counter", &self.counter)
            .field("assembler", &"<assembler>")
            .field("uploader", &self.uploader.as_ref().map(|_| "<uploader>"))
            .field("document_prefix", &self.document_prefix)
            .finish()
    }
}

impl SessionFinalizer {
    /// Create a finalizer. Pass `None` as `uploader` to skip uploads.
    #[must_use]
    pub fn new(
        counter: CounterStore,
        assembler: Box<dyn DocumentAssembler>,
        uploader: Option<Box<dyn Uploader>>,
    ) -> Self {
        Self {
            counter,
            assembler,
            uploader,
            document_prefix: "invoice".to_string(),
        }
    }

    /// Set the document file name prefix.
    #[must_use]
    pub fn with_document_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.document_prefix = prefix.into();
        self
    }

    /// Assemble, number and upload the pages of `session`.
    ///
    /// Assembly, counter-advance and upload failures are logged and
    /// reflected in the report.
    ///
    /// # Errors
    ///
    /// Returns [`FinalizeError::EmptySession`] if nothing was captured, or
    /// [`FinalizeError::Counter`] if the counter cannot be read or advanced
    /// past its current value.
    pub fn finalize(&self, session: ScanSession) -> Result<FinalizeReport, FinalizeError> {
        if session.is_empty() {
            return Err(FinalizeError::EmptySession(session.dir().to_path_buf()));
        }

        let number = self.counter.next_value()?;
        let document = session
            .dir()
            .join(format!("{}_{}.pdf", self.document_prefix, number));

        let assembled = match self.assembler.assemble(session.pages(), &document) {
            Ok(()) => {
                log::info!("Document created: {}", document.display());
                true
            }
            Err(e) => {
                log::error!("Document assembly failed: {}", e);
                false
            }
        };

        let counter_advanced = match self.counter.advance_to(number) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to advance document counter: {}", e);
                false
            }
        };

        let uploaded = match (&self.uploader, assembled) {
            (Some(uploader), true) => match uploader.upload(&document) {
                Ok(()) => {
                    log::info!("Upload successful");
                    true
                }
                Err(e) => {
                    log::error!("Upload failed: {}", e);
                    false
                }
            },
            (Some(_), false) => {
                log::warn!("Skipping upload, no document was produced");
                false
            }
            (None, _) => {
                log::debug!("Upload disabled");
                false
            }
        };

        Ok(FinalizeReport {
            document,
            number,
            pages: session.pages().len(),
            assembled,
            counter_advanced,
            uploaded,
        })
    }
}
