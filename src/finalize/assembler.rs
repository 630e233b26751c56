//! Document assembly through an external image-to-PDF converter.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

/// Error type for document assembly.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Nothing to assemble.
    #[error("no pages to assemble")]
    NoPages,

    /// The converter could not be started.
    #[error("cannot run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The converter ran but reported failure.
    #[error("{program} failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Turns an ordered list of page images into one document.
pub trait DocumentAssembler {
    /// Write `pages`, in order, into `output`.
    ///
    /// # Errors
    ///
    /// Returns an [`AssemblyError`] if the document could not be produced.
    fn assemble(&self, pages: &[PathBuf], output: &Path) -> Result<(), AssemblyError>;
}

/// Runs `img2pdf <pages...> --output <pdf>`.
#[derive(Debug, Clone)]
pub struct Img2PdfAssembler {
    program: String,
}

impl Default for Img2PdfAssembler {
    fn default() -> Self {
        Self::new("img2pdf")
    }
}

impl Img2PdfAssembler {
    /// Create an assembler using `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, pages: &[PathBuf], output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(pages).arg("--output").arg(output);
        cmd
    }
}

impl DocumentAssembler for Img2PdfAssembler {
    fn assemble(&self, pages: &[PathBuf], output: &Path) -> Result<(), AssemblyError> {
        if pages.is_empty() {
            return Err(AssemblyError::NoPages);
        }

        log::info!(
            "Assembling {} page(s) into {}",
            pages.len(),
            output.display()
        );
        let result = self
            .command(pages, output)
            .output()
            .map_err(|source| AssemblyError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if result.status.success() {
            Ok(())
        } else {
            Err(AssemblyError::Failed {
                program: self.program.clone(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            })
        }
    }
}
